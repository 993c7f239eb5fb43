//! Hashing primitives and hash-based collections.
use std::{
    hash::{BuildHasher as _, Hash, Hasher as _},
    sync::LazyLock,
};

/// [`BuildHasher`][std::hash::BuildHasher] used by every hash-based collection in the workspace.
pub type FastBuildHasher = foldhash::quality::RandomState;

/// A `hashbrown` hash map using [`FastBuildHasher`].
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, FastBuildHasher>;

/// A `hashbrown` hash set using [`FastBuildHasher`].
pub type FastHashSet<T> = hashbrown::HashSet<T, FastBuildHasher>;

// Shared so that precomputed keys agree for the lifetime of the process.
static KEY_HASHER: LazyLock<FastBuildHasher> = LazyLock::new(FastBuildHasher::default);

/// Hashes a value with the process-wide key hasher.
///
/// Hashes are stable within a process, but not across runs.
pub fn hash_single<H: Hash>(value: H) -> u64 {
    let mut hasher = KEY_HASHER.build_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Creates an empty [`FastHashMap`].
pub fn new_fast_hashmap<K, V>() -> FastHashMap<K, V> {
    FastHashMap::with_hasher(FastBuildHasher::default())
}

/// Creates an empty [`FastHashSet`].
pub fn new_fast_hashset<T>() -> FastHashSet<T> {
    FastHashSet::with_hasher(FastBuildHasher::default())
}
