//! JSON file store
//!
//! Each path holds one JSON object mapping keys to typed arrays:
//!
//! ```text
//! { "u": { "dtype": "f32", "array": { "v": 1, "dim": [...], "data": [...] } }, ... }
//! ```

use super::{append_along_time, ArrayStore, StoredArray};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

type Document = BTreeMap<String, StoredArray>;

/// Modification time and length identifying one version of a file
type Stamp = (Option<SystemTime>, u64);

#[derive(Debug)]
struct CachedDocument {
    path: PathBuf,
    stamp: Stamp,
    document: Arc<Document>,
}

/// Store writing one JSON document per path
///
/// The most recently parsed document is kept in memory, so row-by-row
/// reads of one file parse it once. The cache is dropped as soon as the
/// file's modification time or length changes.
#[derive(Debug, Default)]
pub struct JsonStore {
    cache: Mutex<Option<CachedDocument>>,
}

fn stamp(path: &Path) -> Result<Stamp> {
    let metadata = std::fs::metadata(path)?;
    Ok((metadata.modified().ok(), metadata.len()))
}

impl JsonStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, path: &Path) -> Result<Arc<Document>> {
        let stamp = stamp(path)?;
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.path == path && cached.stamp == stamp {
                return Ok(Arc::clone(&cached.document));
            }
        }

        debug!("Parsing {}", path.display());
        let file = File::open(path)?;
        let document: Arc<Document> = Arc::new(serde_json::from_reader(BufReader::new(file))?);
        *cache = Some(CachedDocument {
            path: path.to_path_buf(),
            stamp,
            document: Arc::clone(&document),
        });
        Ok(document)
    }

    /// Parsed document for in-place edits; the cache gives up its copy
    fn read_owned(&self, path: &Path) -> Result<Document> {
        let document = self.read(path)?;
        self.cache.lock().take();
        Ok(Arc::try_unwrap(document).unwrap_or_else(|shared| (*shared).clone()))
    }

    fn write(&self, path: &Path, document: Document) -> Result<()> {
        {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer(&mut writer, &document)?;
            writer.flush()?;
        }
        *self.cache.lock() = Some(CachedDocument {
            path: path.to_path_buf(),
            stamp: stamp(path)?,
            document: Arc::new(document),
        });
        Ok(())
    }
}

impl ArrayStore for JsonStore {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn keys(&self, path: &Path) -> Result<Vec<String>> {
        Ok(self.read(path)?.keys().cloned().collect())
    }

    fn load(&self, path: &Path, key: &str) -> Result<StoredArray> {
        self.read(path)?.get(key).cloned().ok_or_else(|| Error::KeyNotFound {
            path: path.to_path_buf(),
            key: key.to_string(),
        })
    }

    fn save(&self, path: &Path, key: &str, array: StoredArray, compression: Option<u8>) -> Result<()> {
        if compression.is_some() {
            debug!("JSON store ignores compression for '{}'", key);
        }
        let mut document = if self.exists(path) {
            self.read_owned(path)?
        } else {
            Document::new()
        };
        let value = match document.remove(key) {
            Some(existing) => append_along_time(existing, array, key)?,
            None => array,
        };
        document.insert(key.to_string(), value);
        self.write(path, document)
    }

    fn delete(&self, path: &Path, keys: &[String]) -> Result<Vec<String>> {
        if !self.exists(path) {
            return Ok(Vec::new());
        }
        let mut document = self.read_owned(path)?;
        let removed: Vec<String> = keys
            .iter()
            .filter(|key| document.remove(key.as_str()).is_some())
            .cloned()
            .collect();
        if !removed.is_empty() {
            self.write(path, document)?;
        }
        Ok(removed)
    }
}
