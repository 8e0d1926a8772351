//! Flow datasets on top of an [`ArrayStore`]

use super::{ArrayStore, RowSelect, StoredArray};
use crate::error::{Error, Result};
use crate::reconstruct::{velocity_per_px, Ensemble, FrameSource};
use crate::volume::{ensure_3d, FlowFrame, ScanAxis, MAGNITUDE_KEYS, VELOCITY_KEYS};
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-component velocity encoding keys; the largest value wins
pub const VENC_KEYS: [&str; 3] = ["venc_u", "venc_v", "venc_w"];

/// Single velocity encoding key used when the per-component keys are absent
pub const VENC_KEY: &str = "venc";

/// Voxel spacing key
pub const SPACING_KEY: &str = "dx";

/// Keys written by [`save_ensemble`]
pub const COMBINED_KEYS: [&str; 3] = ["u_combined", "v_combined", "w_combined"];

/// Read-only view of a stored 4D flow dataset
pub struct FlowDataset<'a, S: ArrayStore + ?Sized> {
    store: &'a S,
    path: PathBuf,
    shape: (usize, usize, usize, usize),
    venc: f32,
    dx: Option<[f64; 3]>,
}

impl<'a, S: ArrayStore + ?Sized> FlowDataset<'a, S> {
    /// Open the dataset at `path`, reading its shape and metadata
    pub fn open(store: &'a S, path: &Path) -> Result<Self> {
        let keys = store.keys(path)?;
        for key in VELOCITY_KEYS.iter().chain(MAGNITUDE_KEYS.iter()) {
            if !keys.iter().any(|k| k == key) {
                return Err(Error::KeyNotFound {
                    path: path.to_path_buf(),
                    key: key.to_string(),
                });
            }
        }

        let shape = store.shape(path, VELOCITY_KEYS[0])?;
        let shape = match shape.as_slice() {
            &[t, x, y, z] => (t, x, y, z),
            other => {
                return Err(Error::invalid_input(format!(
                    "Velocity data should be 4D, got shape {:?}",
                    other
                )))
            }
        };
        for key in VELOCITY_KEYS.iter().chain(MAGNITUDE_KEYS.iter()).skip(1) {
            let other = store.shape(path, key)?;
            if other != [shape.0, shape.1, shape.2, shape.3] {
                return Err(Error::shape_mismatch(
                    format!("dataset '{}'", key),
                    &[shape.0, shape.1, shape.2, shape.3],
                    &other,
                ));
            }
        }

        let venc = read_venc(store, path, &keys)?;
        let dx = if keys.iter().any(|k| k == SPACING_KEY) {
            Some(read_spacing(store.load(path, SPACING_KEY)?)?)
        } else {
            None
        };

        info!(
            "Opened {} with shape {:?}, venc {}, spacing {:?}",
            path.display(),
            shape,
            venc,
            dx
        );

        Ok(FlowDataset {
            store,
            path: path.to_path_buf(),
            shape,
            venc,
            dx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn venc(&self) -> f32 {
        self.venc
    }
}

fn read_venc<S: ArrayStore + ?Sized>(store: &S, path: &Path, keys: &[String]) -> Result<f32> {
    let present = |key: &str| keys.iter().any(|k| k == key);
    let sources: Vec<&str> = if VENC_KEYS.iter().all(|k| present(k)) {
        VENC_KEYS.to_vec()
    } else if present(VENC_KEY) {
        vec![VENC_KEY]
    } else {
        return Err(Error::KeyNotFound {
            path: path.to_path_buf(),
            key: VENC_KEY.to_string(),
        });
    };

    let mut venc: Option<f64> = None;
    for key in sources {
        if let Some(value) = store.load(path, key)?.max() {
            venc = Some(venc.map_or(value, |v| v.max(value)));
        }
    }
    let venc = venc.ok_or_else(|| Error::invalid_input("venc datasets are empty"))? as f32;
    if !(venc.is_finite() && venc > 0.0) {
        return Err(Error::invalid_input(format!("venc must be positive, got {}", venc)));
    }
    Ok(venc)
}

fn read_spacing(array: StoredArray) -> Result<[f64; 3]> {
    let values: Vec<f64> = array.into_f64().iter().copied().collect();
    match values.as_slice() {
        &[a, b, c, ..] => Ok([a, b, c]),
        _ => Err(Error::invalid_input(format!(
            "Spacing needs 3 values, got {}",
            values.len()
        ))),
    }
}

impl<S: ArrayStore + ?Sized> FrameSource for FlowDataset<'_, S> {
    fn shape(&self) -> Result<(usize, usize, usize, usize)> {
        Ok(self.shape)
    }

    fn load_frame(&self, axis: ScanAxis, row: usize) -> Result<FlowFrame> {
        let select = RowSelect::new(axis, row);
        let load = |key: &str| -> Result<ndarray::Array3<f32>> {
            ensure_3d(self.store.load_row(&self.path, key, select)?)
        };

        let venc = self.venc;
        let velocity = [
            load(VELOCITY_KEYS[0])? / venc,
            load(VELOCITY_KEYS[1])? / venc,
            load(VELOCITY_KEYS[2])? / venc,
        ];
        let magnitude = [
            load(MAGNITUDE_KEYS[0])?,
            load(MAGNITUDE_KEYS[1])?,
            load(MAGNITUDE_KEYS[2])?,
        ];
        Ok(FlowFrame::new(velocity, magnitude, venc, velocity_per_px(venc))?.with_spacing(self.dx))
    }

    fn spacing(&self) -> Result<Option<[f64; 3]>> {
        Ok(self.dx)
    }
}

/// Write an ensemble to a new output file
///
/// Fails with [`Error::OutputExists`] if `path` is already present.
pub fn save_ensemble<S: ArrayStore + ?Sized>(
    store: &S,
    path: &Path,
    ensemble: &Ensemble,
    compression: Option<u8>,
) -> Result<()> {
    store.ensure_absent(path)?;
    for (key, component) in COMBINED_KEYS.iter().zip(ensemble.volume.components()) {
        store.save(path, key, StoredArray::F32(component.clone().into_dyn()), compression)?;
    }
    if let Some(dx) = ensemble.spacing {
        let spacing = ArrayD::from_shape_vec(IxDyn(&[1, 3]), dx.to_vec())
            .map_err(|e| Error::storage(e.to_string()))?;
        store.save(path, SPACING_KEY, StoredArray::F64(spacing), None)?;
    }
    info!("Saved ensemble {:?} to {}", ensemble.volume.shape(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use ndarray::Array4;

    fn store_flow(store: &MemoryStore, path: &Path, shape: (usize, usize, usize, usize)) {
        let u = Array4::from_shape_fn(shape, |(t, x, y, z)| (t + x + y + z) as f32);
        for key in VELOCITY_KEYS.iter().chain(MAGNITUDE_KEYS.iter()) {
            store
                .save(path, key, StoredArray::F32(u.clone().into_dyn()), None)
                .unwrap();
        }
    }

    fn scalar(values: &[f64]) -> StoredArray {
        StoredArray::F64(ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap())
    }

    #[test]
    fn test_venc_is_max_of_components() {
        let store = MemoryStore::new();
        let path = Path::new("flow");
        store_flow(&store, path, (2, 4, 4, 4));
        store.save(path, "venc_u", scalar(&[1.0, 1.2]), None).unwrap();
        store.save(path, "venc_v", scalar(&[1.5]), None).unwrap();
        store.save(path, "venc_w", scalar(&[0.5]), None).unwrap();

        let dataset = FlowDataset::open(&store, path).unwrap();
        assert_eq!(dataset.venc(), 1.5);
        assert_eq!(dataset.spacing().unwrap(), None);
    }

    #[test]
    fn test_single_venc_and_spacing() {
        let store = MemoryStore::new();
        let path = Path::new("flow");
        store_flow(&store, path, (2, 4, 4, 4));
        store.save(path, "venc", scalar(&[2.0]), None).unwrap();
        store.save(path, "dx", scalar(&[1.0, 1.0, 2.0]), None).unwrap();

        let dataset = FlowDataset::open(&store, path).unwrap();
        assert_eq!(dataset.spacing().unwrap(), Some([1.0, 1.0, 2.0]));

        let frame = dataset.load_frame(ScanAxis::X, 3).unwrap();
        assert_eq!(frame.shape(), (2, 4, 4));
        // u[1, 3, 2, 1] = 7 normalised by venc 2
        assert_eq!(frame.velocity()[0][[1, 2, 1]], 3.5);
        assert_eq!(frame.magnitude()[0][[1, 2, 1]], 7.0);
    }

    #[test]
    fn test_missing_venc_is_reported() {
        let store = MemoryStore::new();
        let path = Path::new("flow");
        store_flow(&store, path, (1, 4, 4, 4));
        assert!(matches!(
            FlowDataset::open(&store, path),
            Err(Error::KeyNotFound { .. })
        ));
    }
}
