//! Point-in-time iterators. Each one owns a copy of what was in the map
//! when it was created; later inserts and removals do not show up in it.

use core::iter::FusedIterator;
use std::vec;

macro_rules! snapshot_iter {
    ($(#[$meta:meta])* $name:ident<$($g:ident),+> => $item:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name<$($g),+> {
            inner: vec::IntoIter<$item>,
        }

        impl<$($g),+> $name<$($g),+> {
            pub(crate) fn new(items: Vec<$item>) -> Self {
                Self {
                    inner: items.into_iter(),
                }
            }

            /// Items not yet yielded.
            pub fn as_slice(&self) -> &[$item] {
                self.inner.as_slice()
            }
        }

        impl<$($g),+> Iterator for $name<$($g),+> {
            type Item = $item;

            #[inline]
            fn next(&mut self) -> Option<Self::Item> {
                self.inner.next()
            }

            fn size_hint(&self) -> (usize, Option<usize>) {
                self.inner.size_hint()
            }
        }

        impl<$($g),+> DoubleEndedIterator for $name<$($g),+> {
            fn next_back(&mut self) -> Option<Self::Item> {
                self.inner.next_back()
            }
        }

        impl<$($g),+> ExactSizeIterator for $name<$($g),+> {}
        impl<$($g),+> FusedIterator for $name<$($g),+> {}
    };
}

snapshot_iter! {
    /// Keys in insertion order, as returned by
    /// [`WeakValueMap::keys`](crate::WeakValueMap::keys).
    Keys<K> => K
}

snapshot_iter! {
    /// Live values in insertion order.
    Values<V> => V
}

snapshot_iter! {
    /// Live key/value pairs in insertion order.
    Iter<K, V> => (K, V)
}
