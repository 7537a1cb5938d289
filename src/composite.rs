use std::fmt::Debug;
use std::hash::Hash;

use crate::{loader::KeyedLoader, slot::LoadFuture};

/// Loaders keyed by several independent values are plain [`KeyedLoader`]s over a tuple key. This
/// adds `load_composite(k1, .., kn)` for tuples of two to seven components so callers do not have
/// to build the tuple themselves.
macro_rules! load_composite {
    ($($key:ident: $ty:ident),+) => {
        impl<$($ty,)+ V> KeyedLoader<($($ty,)+), V>
        where
            ($($ty,)+): 'static + Eq + Hash + Clone + Debug + Send + Sync,
            V: 'static + Clone + Send + Sync,
        {
            pub fn load_composite(&self, $($key: $ty),+) -> LoadFuture<Option<V>> {
                self.load(($($key,)+))
            }
        }
    };
}

load_composite!(k1: K1, k2: K2);
load_composite!(k1: K1, k2: K2, k3: K3);
load_composite!(k1: K1, k2: K2, k3: K3, k4: K4);
load_composite!(k1: K1, k2: K2, k3: K3, k4: K4, k5: K5);
load_composite!(k1: K1, k2: K2, k3: K3, k4: K4, k5: K5, k6: K6);
load_composite!(k1: K1, k2: K2, k3: K3, k4: K4, k5: K5, k6: K6, k7: K7);
