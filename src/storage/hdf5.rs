//! HDF5 file store
//!
//! Datasets are written chunked (one chunk per dataset) so they can be
//! deflate-compressed. Appending rewrites the dataset with the joined data.

use super::{append_along_time, ArrayStore, RowSelect, StoredArray};
use crate::error::{Error, Result};
use crate::volume::ScanAxis;
use hdf5::{Dataset, File, H5Type};
use ndarray::{s, ArrayD};
use std::path::Path;
use tracing::debug;

impl From<hdf5::Error> for Error {
    fn from(err: hdf5::Error) -> Self {
        Error::storage(err.to_string())
    }
}

/// Store backed by HDF5 files
#[derive(Debug, Default, Clone, Copy)]
pub struct Hdf5Store;

impl Hdf5Store {
    pub fn new() -> Self {
        Hdf5Store
    }

    fn dataset(file: &File, path: &Path, key: &str) -> Result<Dataset> {
        if !file.link_exists(key) {
            return Err(Error::KeyNotFound {
                path: path.to_path_buf(),
                key: key.to_string(),
            });
        }
        Ok(file.dataset(key)?)
    }
}

fn read_stored(dataset: &Dataset) -> Result<StoredArray> {
    if dataset.dtype()?.size() == 8 {
        Ok(StoredArray::F64(dataset.read_dyn::<f64>()?))
    } else {
        Ok(StoredArray::F32(dataset.read_dyn::<f32>()?))
    }
}

fn write_dataset<T: H5Type>(file: &File, key: &str, array: &ArrayD<T>, compression: Option<u8>) -> Result<()> {
    let chunk: Vec<usize> = array.shape().iter().map(|&d| d.max(1)).collect();
    let mut builder = file.new_dataset::<T>().shape(array.shape().to_vec());
    if array.ndim() > 0 {
        builder = builder.chunk(chunk);
        if let Some(level) = compression {
            builder = builder.deflate(level);
        }
    }
    let dataset = builder.create(key)?;
    dataset.write(array)?;
    Ok(())
}

impl ArrayStore for Hdf5Store {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn keys(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = File::open(path)?.member_names()?;
        names.sort();
        Ok(names)
    }

    fn load(&self, path: &Path, key: &str) -> Result<StoredArray> {
        let file = File::open(path)?;
        read_stored(&Self::dataset(&file, path, key)?)
    }

    fn save(&self, path: &Path, key: &str, array: StoredArray, compression: Option<u8>) -> Result<()> {
        let file = File::append(path)?;
        let value = if file.link_exists(key) {
            let existing = read_stored(&file.dataset(key)?)?;
            file.unlink(key)?;
            append_along_time(existing, array, key)?
        } else {
            array
        };
        debug!("Writing '{}' {:?} to {}", key, value.shape(), path.display());
        match &value {
            StoredArray::F32(a) => write_dataset(&file, key, a, compression),
            StoredArray::F64(a) => write_dataset(&file, key, a, compression),
        }
    }

    fn delete(&self, path: &Path, keys: &[String]) -> Result<Vec<String>> {
        if !self.exists(path) {
            return Ok(Vec::new());
        }
        let file = File::open_rw(path)?;
        let mut removed = Vec::new();
        for key in keys {
            if file.link_exists(key) {
                file.unlink(key)?;
                removed.push(key.clone());
            }
        }
        Ok(removed)
    }

    fn shape(&self, path: &Path, key: &str) -> Result<Vec<usize>> {
        let file = File::open(path)?;
        Ok(Self::dataset(&file, path, key)?.shape())
    }

    fn load_row(&self, path: &Path, key: &str, row: RowSelect) -> Result<ArrayD<f32>> {
        let file = File::open(path)?;
        let dataset = Self::dataset(&file, path, key)?;
        let shape = dataset.shape();
        if shape.len() != 4 {
            return Err(Error::invalid_input(format!(
                "Row selection on '{}' needs a 4D dataset, got {} dimensions",
                key,
                shape.len()
            )));
        }
        if row.index >= shape[row.axis.index() + 1] {
            return Err(Error::invalid_input(format!(
                "Row {} out of range for '{}' along axis {}",
                row.index, key, row.axis
            )));
        }
        let i = row.index;
        let frame = match row.axis {
            ScanAxis::X => dataset.read_slice::<f32, _, ndarray::Ix3>(s![.., i, .., ..])?,
            ScanAxis::Y => dataset.read_slice::<f32, _, ndarray::Ix3>(s![.., .., i, ..])?,
            ScanAxis::Z => dataset.read_slice::<f32, _, ndarray::Ix3>(s![.., .., .., i])?,
        };
        Ok(frame.into_dyn())
    }
}
