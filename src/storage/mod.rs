//! Key/value stores backing `localStorage` and `sessionStorage`.

use std::{cell::RefCell, collections::HashMap, fs, io, path::PathBuf};

use anyhow::{Context, Result};

use crate::config::Config;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Lives as long as its owner; used for `sessionStorage` and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Durable store: one file per key, named by the md5 digest of the key.
#[derive(Debug, Clone)]
pub struct FileStore {
    storage_path: PathBuf,
}

impl FileStore {
    pub fn new(storage_path: impl Into<PathBuf>) -> Result<Self> {
        let storage_path = storage_path.into();
        fs::create_dir_all(&storage_path)
            .with_context(|| format!("creating storage dir: {}", storage_path.display()))?;
        Ok(Self { storage_path })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.storage_path())
    }

    fn file_path(&self, key: &str) -> PathBuf {
        let digest = md5::compute(key.as_bytes());
        self.storage_path.join(format!("{:x}", digest))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let p = self.file_path(key);
        match fs::read_to_string(&p) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading storage entry: {}", p.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let p = self.file_path(key);
        fs::write(&p, value).with_context(|| format!("writing storage entry: {}", p.display()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let p = self.file_path(key);
        match fs::remove_file(&p) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing storage entry: {}", p.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(store.get("k")?, None);
        store.set("k", "v")?;
        assert_eq!(store.get("k")?.as_deref(), Some("v"));
        store.remove("k")?;
        assert_eq!(store.get("k")?, None);
        Ok(())
    }

    #[test]
    fn file_store_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        FileStore::new(dir.path())?.set("lastRun", "today")?;
        let reopened = FileStore::new(dir.path())?;
        assert_eq!(reopened.get("lastRun")?.as_deref(), Some("today"));
        reopened.remove("lastRun")?;
        reopened.remove("lastRun")?;
        assert_eq!(reopened.get("lastRun")?, None);
        Ok(())
    }
}
