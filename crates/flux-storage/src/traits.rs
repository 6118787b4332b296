//! The [`ArtifactStore`] trait defining the storage contract for function
//! artifacts.
//!
//! All backends ([`InMemoryStore`](crate::InMemoryStore),
//! [`DirStore`](crate::DirStore), [`SqliteStore`](crate::SqliteStore))
//! implement this trait and are interchangeable. The trait is synchronous;
//! one session owns one store.

use crate::error::StorageError;
use crate::types::{Artifacts, FunctionKey};

pub trait ArtifactStore {
    /// Stores both artifacts of a function, replacing earlier ones.
    ///
    /// Returns `false` when the stored artifacts already had the same
    /// fingerprint and nothing was written.
    fn save_function(&mut self, key: &FunctionKey, artifacts: &Artifacts) -> Result<bool, StorageError>;

    /// The structural form of a function, or `None` if it was never saved.
    fn load_structural(&self, key: &FunctionKey) -> Result<Option<String>, StorageError>;

    /// The program text of a function, or `None` if it was never saved.
    fn load_source(&self, key: &FunctionKey) -> Result<Option<String>, StorageError>;

    /// All stored functions, ordered by package then name.
    fn list_functions(&self) -> Result<Vec<FunctionKey>, StorageError>;

    /// Removes both artifacts. Fails with
    /// [`StorageError::FunctionNotFound`] if there are none.
    fn delete_function(&mut self, key: &FunctionKey) -> Result<(), StorageError>;
}
