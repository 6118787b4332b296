//! SQLite implementation of [`ArtifactStore`].
//!
//! [`SqliteStore`] keeps one row per function in the `functions` table,
//! with the fingerprint stored alongside the artifacts. Every write runs in
//! a transaction.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::hash::fingerprint;
use crate::traits::ArtifactStore;
use crate::types::{Artifacts, FunctionKey};

/// SQLite-backed artifact store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path.as_ref())?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory database.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    fn column(&self, key: &FunctionKey, column: &str) -> Result<Option<String>, StorageError> {
        let sql = format!(
            "SELECT {} FROM functions WHERE package = ?1 AND name = ?2",
            column
        );
        let value = self
            .conn
            .query_row(&sql, params![key.package, key.name], |row| row.get(0))
            .optional()?;
        Ok(value)
    }
}

impl ArtifactStore for SqliteStore {
    fn save_function(&mut self, key: &FunctionKey, artifacts: &Artifacts) -> Result<bool, StorageError> {
        let hash = fingerprint(artifacts).to_hex().to_string();
        let tx = self.conn.transaction()?;
        let stored: Option<String> = tx
            .query_row(
                "SELECT fingerprint FROM functions WHERE package = ?1 AND name = ?2",
                params![key.package, key.name],
                |row| row.get(0),
            )
            .optional()?;
        if stored.as_deref() == Some(hash.as_str()) {
            tracing::debug!(function = %key, "artifacts unchanged, skipping write");
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO functions (package, name, structural, source, fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (package, name) DO UPDATE SET
                structural = excluded.structural,
                source = excluded.source,
                fingerprint = excluded.fingerprint,
                saved_at = datetime('now')",
            params![key.package, key.name, artifacts.structural, artifacts.source, hash],
        )?;
        tx.commit()?;
        tracing::info!(function = %key, "saved function artifacts");
        Ok(true)
    }

    fn load_structural(&self, key: &FunctionKey) -> Result<Option<String>, StorageError> {
        self.column(key, "structural")
    }

    fn load_source(&self, key: &FunctionKey) -> Result<Option<String>, StorageError> {
        self.column(key, "source")
    }

    fn list_functions(&self) -> Result<Vec<FunctionKey>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT package, name FROM functions ORDER BY package, name")?;
        let rows = stmt.query_map([], |row| {
            Ok(FunctionKey {
                package: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn delete_function(&mut self, key: &FunctionKey) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM functions WHERE package = ?1 AND name = ?2",
            params![key.package, key.name],
        )?;
        if removed == 0 {
            return Err(StorageError::FunctionNotFound(key.clone()));
        }
        tx.commit()?;
        tracing::info!(function = %key, "deleted function artifacts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stored_as_hex() {
        let mut store = SqliteStore::in_memory().unwrap();
        let key = FunctionKey::new("example.com/app", "F");
        let artifacts = Artifacts {
            structural: "{}".into(),
            source: "package app\n".into(),
        };
        store.save_function(&key, &artifacts).unwrap();
        let stored = store.column(&key, "fingerprint").unwrap().unwrap();
        assert_eq!(stored, fingerprint(&artifacts).to_hex().to_string());
    }
}
