use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::errors::StorageError;
use crate::storage::StorageBackend;

const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Durable backend: one JSON file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStorage { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys are user-configurable, so every byte outside `[A-Za-z0-9_-]` is
    /// percent-encoded. The mapping is reversible: distinct keys never share
    /// a file and none can leave `dir`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_name = utf8_percent_encode(key, FILE_NAME);
        self.dir.join(format!("{file_name}.json"))
    }
}

impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        // Write-then-rename so a crash never leaves a half-written snapshot.
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, value)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trips_entries_on_disk() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());

        assert_eq!(storage.get_item("state").unwrap(), None);
        storage.set_item("state", "{\"flags\":{}}").unwrap();
        assert_eq!(
            storage.get_item("state").unwrap().as_deref(),
            Some("{\"flags\":{}}")
        );

        // A second instance over the same directory sees the same data.
        let reopened = FileStorage::new(storage.dir());
        assert!(reopened.get_item("state").unwrap().is_some());

        storage.remove_item("state").unwrap();
        assert_eq!(reopened.get_item("state").unwrap(), None);
        // Removing twice is fine.
        storage.remove_item("state").unwrap();
    }

    #[test]
    fn test_keys_cannot_escape_directory() {
        let storage = FileStorage::new("/tmp/toolbar");
        assert_eq!(
            storage.path_for("../../etc/passwd"),
            PathBuf::from("/tmp/toolbar/%2E%2E%2F%2E%2E%2Fetc%2Fpasswd.json")
        );
        assert_eq!(
            storage.path_for("unleash-toolbar-state"),
            PathBuf::from("/tmp/toolbar/unleash-toolbar-state.json")
        );
    }

    #[test]
    fn test_similar_keys_use_separate_files() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        assert_ne!(storage.path_for("a.b"), storage.path_for("a_b"));

        storage.set_item("a.b", "dotted").unwrap();
        storage.set_item("a_b", "underscored").unwrap();

        assert_eq!(storage.get_item("a.b").unwrap().as_deref(), Some("dotted"));
        assert_eq!(
            storage.get_item("a_b").unwrap().as_deref(),
            Some("underscored")
        );
    }
}
