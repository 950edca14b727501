use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors from the key/value store
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Simple on-disk key/value store for widget state.
///
/// Values are stored as `<data_dir>/<key>.json`. Every write replaces the
/// whole value (last full write wins).
#[derive(Debug, Clone)]
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&data_dir) {
            log::warn!("Storage: failed to create {}: {}", data_dir.display(), e);
        }
        Self { dir: data_dir }
    }

    fn is_safe_key(key: &str) -> bool {
        // Keys are fixed identifiers; anything else could escape the directory.
        !key.trim().is_empty()
            && key
                .bytes()
                .all(|b| matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_'))
    }

    fn path_for_key(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !Self::is_safe_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    /// Read the raw value stored under `key`, if any.
    pub fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for_key(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    /// Replace the value stored under `key`.
    ///
    /// Written to a sibling temp file then renamed so a crash never leaves a
    /// half-written value behind.
    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for_key(key)?;
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })
    }

    /// Remove the value stored under `key`. Missing values are not an error.
    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for_key(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());

        assert_eq!(storage.get_item("mas_display_mode").unwrap(), None);
        storage.set_item("mas_display_mode", "\"popup\"").unwrap();
        assert_eq!(
            storage.get_item("mas_display_mode").unwrap().as_deref(),
            Some("\"popup\"")
        );
        assert!(storage.directory().join("mas_display_mode.json").exists());

        storage.remove_item("mas_display_mode").unwrap();
        assert_eq!(storage.get_item("mas_display_mode").unwrap(), None);
        // Removing twice is fine.
        storage.remove_item("mas_display_mode").unwrap();
    }

    #[test]
    fn test_set_replaces_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());

        storage.set_item("k", "first").unwrap();
        storage.set_item("k", "second").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("second"));
        assert!(!dir.path().join("k.json.tmp").exists());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf());

        assert!(matches!(
            storage.set_item("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(storage.get_item(""), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let storage = LocalStorage::new(nested.clone());
        storage.set_item("k", "v").unwrap();
        assert!(nested.join("k.json").exists());
    }
}
