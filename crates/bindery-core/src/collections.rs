//! Map types for the engine's caches, switched by the `std-hash` feature.

#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::{HashMap, HashSet};
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
}

/// Keyed by the address of a shared container value (`Rc::as_ptr`).
pub type IdentityMap<V> = map::HashMap<usize, V>;

pub type IdentitySet = map::HashSet<usize>;
