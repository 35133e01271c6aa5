use crate::error::{CertError, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

/// Durable home of serialized keystore containers, addressed by locator
pub trait ContainerStorage: Send + Sync {
    fn write(&self, locator: &str, bytes: &[u8]) -> Result<()>;
    fn read(&self, locator: &str) -> Result<Option<Vec<u8>>>;
    /// Returns false when nothing was stored under `locator`
    fn remove(&self, locator: &str) -> Result<bool>;
    fn exists(&self, locator: &str) -> Result<bool>;
}

fn check_locator(locator: &str) -> Result<()> {
    let valid = !locator.is_empty()
        && !locator.starts_with('.')
        && locator
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CertError::InvalidArgument(format!(
            "invalid container locator '{locator}'"
        )))
    }
}

/// One file per container under a base directory
#[derive(Debug, Clone)]
pub struct FileContainerStorage {
    base_dir: PathBuf,
}

impl FileContainerStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, locator: &str) -> Result<PathBuf> {
        check_locator(locator)?;
        Ok(self.base_dir.join(locator))
    }
}

impl ContainerStorage for FileContainerStorage {
    fn write(&self, locator: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(locator)?;
        let tmp_path = self.base_dir.join(format!("{locator}.tmp"));
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(bytes)?;
            f.flush()?;
            f.sync_all()?;
        }
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    fn read(&self, locator: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(locator)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    fn remove(&self, locator: &str) -> Result<bool> {
        let path = self.path_for(locator)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn exists(&self, locator: &str) -> Result<bool> {
        Ok(self.path_for(locator)?.exists())
    }
}

/// Process-local storage, used by tests and short-lived tools
#[derive(Debug, Default)]
pub struct MemoryContainerStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryContainerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContainerStorage for MemoryContainerStorage {
    fn write(&self, locator: &str, bytes: &[u8]) -> Result<()> {
        check_locator(locator)?;
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, locator: &str) -> Result<Option<Vec<u8>>> {
        check_locator(locator)?;
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locator)
            .cloned())
    }

    fn remove(&self, locator: &str) -> Result<bool> {
        check_locator(locator)?;
        Ok(self
            .blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(locator)
            .is_some())
    }

    fn exists(&self, locator: &str) -> Result<bool> {
        check_locator(locator)?;
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(locator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn ContainerStorage) -> Result<()> {
        assert_eq!(storage.read("a.cvks")?, None);
        storage.write("a.cvks", b"blob")?;
        assert!(storage.exists("a.cvks")?);
        assert_eq!(storage.read("a.cvks")?, Some(b"blob".to_vec()));
        storage.write("a.cvks", b"blob2")?;
        assert_eq!(storage.read("a.cvks")?, Some(b"blob2".to_vec()));
        assert!(storage.remove("a.cvks")?);
        assert!(!storage.remove("a.cvks")?);
        assert!(!storage.exists("a.cvks")?);
        Ok(())
    }

    #[test]
    fn file_storage_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = FileContainerStorage::new(dir.path().join("containers"))?;
        exercise(&storage)
    }

    #[test]
    fn memory_storage_round_trip() -> Result<()> {
        let storage = MemoryContainerStorage::new();
        exercise(&storage)?;
        assert!(storage.is_empty());
        Ok(())
    }

    #[test]
    fn locators_cannot_escape_the_base_dir() {
        let storage = MemoryContainerStorage::new();
        for bad in ["", "../x", ".hidden", "a/b", "a\\b"] {
            assert!(matches!(
                storage.write(bad, b"x"),
                Err(CertError::InvalidArgument(_))
            ));
        }
    }
}
