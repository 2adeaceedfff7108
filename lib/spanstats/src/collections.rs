//! Hash-based collections.

/// A hash map based on `hashbrown` using `foldhash` as the hasher.
///
/// Iteration order is unspecified and varies between processes.
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, FastBuildHasher>;

/// [`BuildHasher`][std::hash::BuildHasher] used by [`FastHashMap`].
pub type FastBuildHasher = foldhash::quality::RandomState;
