use std::hash::{Hash, Hasher};

#[cfg(feature = "std-hash")]
fn content_hasher() -> impl Hasher {
    std::collections::hash_map::DefaultHasher::new()
}

#[cfg(not(feature = "std-hash"))]
fn content_hasher() -> impl Hasher {
    // Fixed keys, so equal text hashes equally for the life of the process.
    ahash::AHasher::default()
}

/// Hash of a handler's source text, used where a closure has no parse id to
/// key caches by.
pub fn content_hash<T: Hash + ?Sized>(content: &T) -> u64 {
    let mut hasher = content_hasher();
    content.hash(&mut hasher);
    hasher.finish()
}
