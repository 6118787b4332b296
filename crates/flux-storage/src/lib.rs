//! Storage for flux function artifacts.
//!
//! Each function is kept as two artifacts: its structural form, which is
//! what gets reloaded, and its program text, which is output only. The
//! [`ArtifactStore`] trait is the contract every backend implements.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: FunctionKey and Artifacts
//! - [`traits`]: ArtifactStore trait definition
//! - [`hash`]: blake3 fingerprints of artifacts
//! - [`memory`]: InMemoryStore implementation
//! - [`dir`]: DirStore implementation (one directory per package)
//! - [`schema`]: migration setup for the SQLite backend
//! - [`sqlite`]: SqliteStore implementation

pub mod dir;
pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use dir::DirStore;
pub use error::StorageError;
pub use hash::fingerprint;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::ArtifactStore;
pub use types::{Artifacts, FunctionKey};
