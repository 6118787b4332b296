//! Directory implementation of [`ArtifactStore`].
//!
//! Layout under the store root, one directory per package path segment:
//!
//! ```text
//! <root>/example.com/app/Sum.flux.json   structural form
//! <root>/example.com/app/Sum.go          program text
//! ```
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! failed save leaves the previous artifacts intact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::hash::fingerprint;
use crate::traits::ArtifactStore;
use crate::types::{Artifacts, FunctionKey};

const STRUCTURAL_EXT: &str = ".flux.json";
const SOURCE_EXT: &str = ".go";

/// Artifact store backed by a directory tree.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Uses `root` as the store directory. It is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, key: &FunctionKey) -> Result<PathBuf, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidKey {
            key: key.clone(),
            reason: reason.to_string(),
        };
        if key.name.is_empty() || key.name.contains(|c: char| c == '/' || c == '\\') || key.name.starts_with('.') {
            return Err(invalid("function name is not a file name"));
        }
        let mut dir = self.root.clone();
        for segment in key.package.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(invalid("package path has an empty or relative segment"));
            }
            dir.push(segment);
        }
        Ok(dir)
    }

    fn paths(&self, key: &FunctionKey) -> Result<(PathBuf, PathBuf), StorageError> {
        let dir = self.package_dir(key)?;
        Ok((
            dir.join(format!("{}{}", key.name, STRUCTURAL_EXT)),
            dir.join(format!("{}{}", key.name, SOURCE_EXT)),
        ))
    }

    fn stored(&self, key: &FunctionKey) -> Result<Option<Artifacts>, StorageError> {
        let (structural, source) = self.paths(key)?;
        match (read_optional(&structural)?, read_optional(&source)?) {
            (Some(structural), Some(source)) => Ok(Some(Artifacts { structural, source })),
            _ => Ok(None),
        }
    }

    fn collect(&self, dir: &Path, package: &mut Vec<String>, out: &mut Vec<FunctionKey>) -> io::Result<()> {
        let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                package.push(name);
                self.collect(&entry.path(), package, out)?;
                package.pop();
            } else if let Some(func) = name.strip_suffix(STRUCTURAL_EXT) {
                if !package.is_empty() && !func.is_empty() {
                    out.push(FunctionKey::new(package.join("/"), func));
                }
            }
        }
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_replacing(path: &Path, text: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)
}

impl ArtifactStore for DirStore {
    fn save_function(&mut self, key: &FunctionKey, artifacts: &Artifacts) -> Result<bool, StorageError> {
        if let Some(existing) = self.stored(key)? {
            if fingerprint(&existing) == fingerprint(artifacts) {
                tracing::debug!(function = %key, "artifacts unchanged, skipping write");
                return Ok(false);
            }
        }
        let dir = self.package_dir(key)?;
        fs::create_dir_all(&dir)?;
        let (structural, source) = self.paths(key)?;
        write_replacing(&structural, &artifacts.structural)?;
        write_replacing(&source, &artifacts.source)?;
        tracing::info!(function = %key, dir = %dir.display(), "saved function artifacts");
        Ok(true)
    }

    fn load_structural(&self, key: &FunctionKey) -> Result<Option<String>, StorageError> {
        let (structural, _) = self.paths(key)?;
        read_optional(&structural)
    }

    fn load_source(&self, key: &FunctionKey) -> Result<Option<String>, StorageError> {
        let (_, source) = self.paths(key)?;
        read_optional(&source)
    }

    fn list_functions(&self) -> Result<Vec<FunctionKey>, StorageError> {
        let mut out = Vec::new();
        match self.collect(&self.root, &mut Vec::new(), &mut out) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        out.sort();
        Ok(out)
    }

    fn delete_function(&mut self, key: &FunctionKey) -> Result<(), StorageError> {
        let (structural, source) = self.paths(key)?;
        match fs::remove_file(&structural) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::FunctionNotFound(key.clone()))
            }
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = fs::remove_file(&source) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        tracing::info!(function = %key, "deleted function artifacts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_path_becomes_directories() {
        let store = DirStore::new("/store");
        let (structural, source) = store
            .paths(&FunctionKey::new("example.com/app", "Sum"))
            .unwrap();
        assert_eq!(structural, PathBuf::from("/store/example.com/app/Sum.flux.json"));
        assert_eq!(source, PathBuf::from("/store/example.com/app/Sum.go"));
    }

    #[test]
    fn test_relative_segments_are_rejected() {
        let store = DirStore::new("/store");
        for key in [
            FunctionKey::new("../outside", "F"),
            FunctionKey::new("a//b", "F"),
            FunctionKey::new("app", "x/y"),
            FunctionKey::new("app", ""),
        ] {
            let err = store.paths(&key).unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey { .. }), "{}", key);
        }
    }

    #[test]
    fn test_missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path().join("absent"));
        assert!(store.list_functions().unwrap().is_empty());
    }
}
