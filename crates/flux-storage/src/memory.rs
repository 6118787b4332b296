//! In-memory implementation of [`ArtifactStore`].
//!
//! [`InMemoryStore`] keeps artifacts in a `BTreeMap` with the same
//! semantics as the persistent backends. Used by tests and by sessions that
//! never touch disk.

use std::collections::BTreeMap;

use crate::error::StorageError;
use crate::hash::fingerprint;
use crate::traits::ArtifactStore;
use crate::types::{Artifacts, FunctionKey};

#[derive(Debug, Clone)]
struct Stored {
    artifacts: Artifacts,
    fingerprint: blake3::Hash,
}

/// Artifact store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    functions: BTreeMap<FunctionKey, Stored>,
    writes: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saves that actually wrote artifacts.
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl ArtifactStore for InMemoryStore {
    fn save_function(&mut self, key: &FunctionKey, artifacts: &Artifacts) -> Result<bool, StorageError> {
        let hash = fingerprint(artifacts);
        if self.functions.get(key).is_some_and(|s| s.fingerprint == hash) {
            return Ok(false);
        }
        self.functions.insert(
            key.clone(),
            Stored {
                artifacts: artifacts.clone(),
                fingerprint: hash,
            },
        );
        self.writes += 1;
        Ok(true)
    }

    fn load_structural(&self, key: &FunctionKey) -> Result<Option<String>, StorageError> {
        Ok(self.functions.get(key).map(|s| s.artifacts.structural.clone()))
    }

    fn load_source(&self, key: &FunctionKey) -> Result<Option<String>, StorageError> {
        Ok(self.functions.get(key).map(|s| s.artifacts.source.clone()))
    }

    fn list_functions(&self) -> Result<Vec<FunctionKey>, StorageError> {
        Ok(self.functions.keys().cloned().collect())
    }

    fn delete_function(&mut self, key: &FunctionKey) -> Result<(), StorageError> {
        self.functions
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::FunctionNotFound(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts(source: &str) -> Artifacts {
        Artifacts {
            structural: "{}".into(),
            source: source.into(),
        }
    }

    #[test]
    fn test_unchanged_save_is_skipped() {
        let mut store = InMemoryStore::new();
        let key = FunctionKey::new("example.com/app", "F");
        assert!(store.save_function(&key, &artifacts("a")).unwrap());
        assert!(!store.save_function(&key, &artifacts("a")).unwrap());
        assert!(store.save_function(&key, &artifacts("b")).unwrap());
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.load_source(&key).unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_missing_function_loads_none() {
        let store = InMemoryStore::new();
        let key = FunctionKey::new("example.com/app", "F");
        assert_eq!(store.load_structural(&key).unwrap(), None);
    }
}
