//! In-memory store

use super::{append_along_time, ArrayStore, StoredArray};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Process-local store keyed by path
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<PathBuf, BTreeMap<String, StoredArray>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArrayStore for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    fn keys(&self, path: &Path) -> Result<Vec<String>> {
        let files = self.files.read();
        let file = files
            .get(path)
            .ok_or_else(|| Error::storage(format!("No such file: {}", path.display())))?;
        Ok(file.keys().cloned().collect())
    }

    fn load(&self, path: &Path, key: &str) -> Result<StoredArray> {
        self.files
            .read()
            .get(path)
            .and_then(|file| file.get(key))
            .cloned()
            .ok_or_else(|| Error::KeyNotFound {
                path: path.to_path_buf(),
                key: key.to_string(),
            })
    }

    fn save(&self, path: &Path, key: &str, array: StoredArray, _compression: Option<u8>) -> Result<()> {
        let mut files = self.files.write();
        let file = files.entry(path.to_path_buf()).or_default();
        let value = match file.remove(key) {
            Some(existing) => append_along_time(existing, array, key)?,
            None => array,
        };
        file.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, path: &Path, keys: &[String]) -> Result<Vec<String>> {
        let mut files = self.files.write();
        let Some(file) = files.get_mut(path) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter(|key| file.remove(key.as_str()).is_some())
            .cloned()
            .collect())
    }

    fn shape(&self, path: &Path, key: &str) -> Result<Vec<usize>> {
        self.files
            .read()
            .get(path)
            .and_then(|file| file.get(key))
            .map(|a| a.shape().to_vec())
            .ok_or_else(|| Error::KeyNotFound {
                path: path.to_path_buf(),
                key: key.to_string(),
            })
    }
}
