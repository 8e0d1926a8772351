//! Key/array persistence
//!
//! A store maps a file path to a set of named n-dimensional arrays.
//! Saving to an existing key appends along the first (time) axis; output
//! files are never overwritten by the pipeline, see
//! [`ArrayStore::ensure_absent`].
//!
//! Backends:
//! - [`MemoryStore`]: process-local, for tests and dry runs
//! - [`JsonStore`]: one JSON document per path
//! - `Hdf5Store`: HDF5 files (feature `hdf5`)

pub mod dataset;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod json;
pub mod memory;

use crate::error::{Error, Result};
use crate::volume::ScanAxis;
use ndarray::{concatenate, ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub use dataset::{save_ensemble, FlowDataset};
#[cfg(feature = "hdf5")]
pub use self::hdf5::Hdf5Store;
pub use json::JsonStore;
pub use memory::MemoryStore;

// ─────────────────────────────────────────────────────────────────────────────
// Stored Arrays
// ─────────────────────────────────────────────────────────────────────────────

/// Array as persisted, keeping its element type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "array", rename_all = "lowercase")]
pub enum StoredArray {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl StoredArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            StoredArray::F32(a) => a.shape(),
            StoredArray::F64(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn is_f64(&self) -> bool {
        matches!(self, StoredArray::F64(_))
    }

    /// Convert to single precision
    pub fn into_f32(self) -> ArrayD<f32> {
        match self {
            StoredArray::F32(a) => a,
            StoredArray::F64(a) => a.mapv(|x| x as f32),
        }
    }

    /// Convert to double precision
    pub fn into_f64(self) -> ArrayD<f64> {
        match self {
            StoredArray::F32(a) => a.mapv(f64::from),
            StoredArray::F64(a) => a,
        }
    }

    /// Same data with f64 narrowed to f32
    pub fn downcast(self) -> StoredArray {
        StoredArray::F32(self.into_f32())
    }

    /// Largest element, ignoring NaN
    pub fn max(&self) -> Option<f64> {
        let fold = |acc: Option<f64>, x: f64| match acc {
            _ if x.is_nan() => acc,
            Some(m) if m >= x => Some(m),
            _ => Some(x),
        };
        match self {
            StoredArray::F32(a) => a.iter().map(|&x| f64::from(x)).fold(None, fold),
            StoredArray::F64(a) => a.iter().copied().fold(None, fold),
        }
    }
}

impl From<ArrayD<f32>> for StoredArray {
    fn from(array: ArrayD<f32>) -> Self {
        StoredArray::F32(array)
    }
}

impl From<ArrayD<f64>> for StoredArray {
    fn from(array: ArrayD<f64>) -> Self {
        StoredArray::F64(array)
    }
}

/// Append `new` to `existing` along axis 0, keeping the existing dtype
pub fn append_along_time(existing: StoredArray, new: StoredArray, key: &str) -> Result<StoredArray> {
    if existing.ndim() == 0
        || new.ndim() != existing.ndim()
        || existing.shape()[1..] != new.shape()[1..]
    {
        return Err(Error::shape_mismatch(
            format!("append to '{}'", key),
            existing.shape(),
            new.shape(),
        ));
    }
    let join_err = |e: ndarray::ShapeError| Error::storage(format!("Failed to append '{}': {}", key, e));
    match existing {
        StoredArray::F32(a) => {
            let b = new.into_f32();
            Ok(StoredArray::F32(concatenate(Axis(0), &[a.view(), b.view()]).map_err(join_err)?))
        }
        StoredArray::F64(a) => {
            let b = new.into_f64();
            Ok(StoredArray::F64(concatenate(Axis(0), &[a.view(), b.view()]).map_err(join_err)?))
        }
    }
}

/// One spatial row of a 4D `(t, x, y, z)` dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSelect {
    pub axis: ScanAxis,
    pub index: usize,
}

impl RowSelect {
    pub fn new(axis: ScanAxis, index: usize) -> Self {
        RowSelect { axis, index }
    }

    /// Cut the row out of a fully loaded 4D array
    pub fn apply(&self, array: ArrayD<f32>, key: &str) -> Result<ArrayD<f32>> {
        if array.ndim() != 4 {
            return Err(Error::invalid_input(format!(
                "Row selection on '{}' needs a 4D dataset, got {} dimensions",
                key,
                array.ndim()
            )));
        }
        let axis = Axis(self.axis.index() + 1);
        if self.index >= array.len_of(axis) {
            return Err(Error::invalid_input(format!(
                "Row {} out of range for '{}' along axis {}",
                self.index, key, self.axis
            )));
        }
        Ok(array.index_axis_move(axis, self.index))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Storage backend for named arrays
pub trait ArrayStore: Send + Sync {
    /// Whether anything is stored under `path`
    fn exists(&self, path: &Path) -> bool;

    /// Keys stored under `path`, sorted
    fn keys(&self, path: &Path) -> Result<Vec<String>>;

    /// Load a full array
    fn load(&self, path: &Path, key: &str) -> Result<StoredArray>;

    /// Save an array; appends along axis 0 when `key` already exists
    ///
    /// `compression` is a deflate level for backends that support it.
    fn save(&self, path: &Path, key: &str, array: StoredArray, compression: Option<u8>) -> Result<()>;

    /// Delete keys, skipping missing ones; returns the keys removed
    fn delete(&self, path: &Path, keys: &[String]) -> Result<Vec<String>>;

    /// Shape of a stored array
    fn shape(&self, path: &Path, key: &str) -> Result<Vec<usize>> {
        Ok(self.load(path, key)?.shape().to_vec())
    }

    /// Load one row of a 4D dataset as `(t, a, b)` in single precision
    fn load_row(&self, path: &Path, key: &str, row: RowSelect) -> Result<ArrayD<f32>> {
        row.apply(self.load(path, key)?.into_f32(), key)
    }

    /// Whether `key` is stored under `path`
    fn contains(&self, path: &Path, key: &str) -> Result<bool> {
        Ok(self.exists(path) && self.keys(path)?.iter().any(|k| k == key))
    }

    /// Fail with [`Error::OutputExists`] if `path` is already taken
    fn ensure_absent(&self, path: &Path) -> Result<()> {
        if self.exists(path) {
            return Err(Error::OutputExists(path.to_path_buf()));
        }
        Ok(())
    }

    /// Copy keys of `source` missing from `target`; f64 data is narrowed to f32
    fn merge(&self, target: &Path, source: &Path) -> Result<Vec<String>> {
        merge_stores(self, target, self, source)
    }
}

/// [`ArrayStore::merge`] across two possibly different backends
pub fn merge_stores<T, S>(target_store: &T, target: &Path, source_store: &S, source: &Path) -> Result<Vec<String>>
where
    T: ArrayStore + ?Sized,
    S: ArrayStore + ?Sized,
{
    let present = if target_store.exists(target) {
        target_store.keys(target)?
    } else {
        Vec::new()
    };
    let mut added = Vec::new();
    for key in source_store.keys(source)? {
        if present.contains(&key) {
            continue;
        }
        info!("Adding key {}", key);
        let array = source_store.load(source, &key)?.downcast();
        target_store.save(target, &key, array, None)?;
        added.push(key);
    }
    Ok(added)
}

impl<S: ArrayStore + ?Sized> ArrayStore for Box<S> {
    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn keys(&self, path: &Path) -> Result<Vec<String>> {
        (**self).keys(path)
    }

    fn load(&self, path: &Path, key: &str) -> Result<StoredArray> {
        (**self).load(path, key)
    }

    fn save(&self, path: &Path, key: &str, array: StoredArray, compression: Option<u8>) -> Result<()> {
        (**self).save(path, key, array, compression)
    }

    fn delete(&self, path: &Path, keys: &[String]) -> Result<Vec<String>> {
        (**self).delete(path, keys)
    }

    fn shape(&self, path: &Path, key: &str) -> Result<Vec<usize>> {
        (**self).shape(path, key)
    }

    fn load_row(&self, path: &Path, key: &str, row: RowSelect) -> Result<ArrayD<f32>> {
        (**self).load_row(path, key, row)
    }
}

/// Pick a file backend from the path extension
pub fn open_store(path: &Path) -> Result<Box<dyn ArrayStore>> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => Ok(Box::new(JsonStore::new())),
        #[cfg(feature = "hdf5")]
        "h5" | "hdf5" => Ok(Box::new(Hdf5Store::new())),
        #[cfg(not(feature = "hdf5"))]
        "h5" | "hdf5" => Err(Error::unsupported(
            "HDF5 support requires building with the 'hdf5' feature",
        )),
        other => Err(Error::unsupported(format!("Unknown storage format '.{}'", other))),
    }
}
