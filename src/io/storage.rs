use std::fs;
use std::path::{Path, PathBuf};

use crate::io::recovery::atomic_write;
use crate::model::entry::FORMAT_MARKER_KEY;
use crate::parse::FRONTMATTER_FENCE;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("document not found: {path}")]
    NotFound { path: PathBuf },
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where document text comes from and goes to
pub trait Storage {
    fn read(&self, path: &Path) -> Result<String, StorageError>;

    /// Replace the whole document
    fn write(&self, path: &Path, text: &str) -> Result<(), StorageError>;

    /// Make sure the document exists, creating it with the format marker
    /// frontmatter when `auto_create` is set.
    fn ensure_exists(&self, path: &Path, auto_create: bool) -> Result<(), StorageError>;
}

/// Text of a freshly created document: frontmatter carrying the format marker.
pub fn new_document_text() -> String {
    format!(
        "{fence}\n{key}: true\n{fence}\n",
        fence = FRONTMATTER_FENCE,
        key = FORMAT_MARKER_KEY
    )
}

/// Storage on the local filesystem. Writes are atomic (temp file + rename).
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

impl Storage for FsStorage {
    fn read(&self, path: &Path) -> Result<String, StorageError> {
        fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                StorageError::Read {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })
    }

    fn write(&self, path: &Path, text: &str) -> Result<(), StorageError> {
        atomic_write(path, text.as_bytes()).map_err(|e| StorageError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn ensure_exists(&self, path: &Path, auto_create: bool) -> Result<(), StorageError> {
        if path.exists() {
            return Ok(());
        }
        if !auto_create {
            return Err(StorageError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let create_err = |e| StorageError::Create {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(create_err)?;
        }
        atomic_write(path, new_document_text().as_bytes()).map_err(create_err)
    }
}

/// In-memory storage for exercising the store without touching disk.
#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryStorage {
        pub files: Mutex<HashMap<PathBuf, String>>,
        /// When set, every write fails
        pub fail_writes: Mutex<bool>,
        pub writes: Mutex<usize>,
    }

    impl MemoryStorage {
        pub fn with(path: &Path, text: &str) -> Self {
            let storage = MemoryStorage::default();
            storage.put(path, text);
            storage
        }

        pub fn put(&self, path: &Path, text: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), text.to_string());
        }

        pub fn get(&self, path: &Path) -> Option<String> {
            self.files.lock().unwrap().get(path).cloned()
        }

        pub fn write_count(&self) -> usize {
            *self.writes.lock().unwrap()
        }
    }

    impl Storage for MemoryStorage {
        fn read(&self, path: &Path) -> Result<String, StorageError> {
            self.get(path).ok_or_else(|| StorageError::NotFound {
                path: path.to_path_buf(),
            })
        }

        fn write(&self, path: &Path, text: &str) -> Result<(), StorageError> {
            if *self.fail_writes.lock().unwrap() {
                return Err(StorageError::Write {
                    path: path.to_path_buf(),
                    source: std::io::Error::other("disk full"),
                });
            }
            *self.writes.lock().unwrap() += 1;
            self.put(path, text);
            Ok(())
        }

        fn ensure_exists(&self, path: &Path, auto_create: bool) -> Result<(), StorageError> {
            if self.get(path).is_some() {
                return Ok(());
            }
            if !auto_create {
                return Err(StorageError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            self.put(path, &new_document_text());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_document;
    use tempfile::TempDir;

    #[test]
    fn new_document_is_marked() {
        let doc = parse_document(&new_document_text(), "YYYY-MM-DD HH:mm");
        assert!(doc.is_moments_document());
        assert!(doc.entries.is_empty());
        assert!(doc.errors.is_empty());
    }

    #[test]
    fn ensure_exists_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes").join("Moments.md");
        FsStorage.ensure_exists(&path, true).unwrap();
        assert_eq!(FsStorage.read(&path).unwrap(), new_document_text());
    }

    #[test]
    fn ensure_exists_leaves_existing_document() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Moments.md");
        fs::write(&path, "- hand written\n").unwrap();
        FsStorage.ensure_exists(&path, true).unwrap();
        assert_eq!(FsStorage.read(&path).unwrap(), "- hand written\n");
    }

    #[test]
    fn missing_document_without_auto_create() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Moments.md");
        assert!(matches!(
            FsStorage.ensure_exists(&path, false),
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(FsStorage.read(&path), Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn write_replaces_whole_document() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Moments.md");
        FsStorage.write(&path, "first\n").unwrap();
        FsStorage.write(&path, "second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
    }
}
