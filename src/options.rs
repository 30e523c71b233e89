//! Construction-time tuning for [`WeakValueMap`](crate::WeakValueMap).

use core::num::NonZeroUsize;

/// Reaping and sizing knobs.
///
/// ```
/// use weak_value_map::Options;
///
/// let opts = Options::new().with_capacity(64).with_sweep_interval(1024);
/// assert!(opts.reap_on_write);
/// assert_eq!(opts.sweep_interval.map(|n| n.get()), Some(1024));
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Options {
    /// Physically remove notified entries at the start of every `&mut`
    /// operation. When off, entries are only marked until `reap`/`sweep`.
    pub reap_on_write: bool,
    /// Run a full sweep after this many inserts. Bounds the table for hosts
    /// that never fire finalization notices.
    pub sweep_interval: Option<NonZeroUsize>,
    /// Initial number of entries to reserve room for.
    pub capacity: usize,
}

impl Options {
    pub const fn new() -> Self {
        Self {
            reap_on_write: true,
            sweep_interval: None,
            capacity: 0,
        }
    }

    pub fn with_reap_on_write(mut self, on: bool) -> Self {
        self.reap_on_write = on;
        self
    }

    /// `0` disables periodic sweeping.
    pub fn with_sweep_interval(mut self, inserts: usize) -> Self {
        self.sweep_interval = NonZeroUsize::new(inserts);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
