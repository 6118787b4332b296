//! Content fingerprints for stored artifacts using blake3.
//!
//! Fingerprints are derived state. Stores compare them to skip rewriting
//! artifacts that did not change, and sessions compare them to decide
//! whether the graph differs from what was last saved.

use crate::types::Artifacts;

/// Hashes both artifacts. Each part is length-prefixed so that moving bytes
/// between the structural form and the program text changes the hash.
pub fn fingerprint(artifacts: &Artifacts) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for part in [&artifacts.structural, &artifacts.source] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize()
}
