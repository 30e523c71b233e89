//! Error types for weak-value-map.
//!
//! Missing keys and dead values are ordinary negative results (`None` or
//! `false`), not errors. The only failure is constructing a map over a host
//! that cannot hand out weak references.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The host memory manager has no weak-reference primitive.
    #[error("host `{host}` does not support weak references")]
    Unavailable { host: &'static str },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
