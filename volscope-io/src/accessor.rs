//! Raw dataset reads and probe slicing of 3D/4D volumes.
//!
//! Slices come from the memmap cache when its entry is `Ready`, otherwise
//! straight from the source file. Both routes yield the same float32 values.

use crate::cache::{resolve_slab_budget, slab_rows, CacheRegistry};
use crate::h5::{open_dataset, read_axis0_slab};
use crate::mapped::{decode, MappedVolume};
use crate::{Error, Result};
use hdf5::{Dataset, File};
use ndarray::{s, Array2, ArrayD, IxDyn};
use rayon::prelude::*;
use std::sync::Arc;
use volscope_core::normalize_path;

/// Reads datasets and probe slices, preferring a ready cache.
pub struct VolumeAccessor {
    file: File,
    cache: Arc<CacheRegistry>,
}

impl VolumeAccessor {
    #[must_use]
    pub fn new(file: File, cache: Arc<CacheRegistry>) -> Self {
        Self { file, cache }
    }

    /// Reads a whole dataset of any rank as `f64`.
    ///
    /// # Errors
    /// Returns `DatasetNotFound` for a bad path, or an HDF5 error if the
    /// values cannot be converted.
    pub fn load_dataset(&self, path: &str) -> Result<ArrayD<f64>> {
        let dataset = open_dataset(&self.file, path)?;
        Ok(dataset.read_dyn::<f64>()?)
    }

    /// Returns the probe data at `(x, y)`.
    ///
    /// 3D volumes yield the 1D vector `[x, y, :]`; 4D volumes the 2D plane
    /// `[x, y, :, :]`. Indices are never clamped.
    ///
    /// # Errors
    /// Returns `DatasetNotFound`, `DatasetShape` for ranks other than 3 or 4,
    /// or `IndexOutOfRange`.
    pub fn get_slice(&self, path: &str, x: usize, y: usize) -> Result<ArrayD<f32>> {
        if let Some(volume) = self.cache.ready_volume(path) {
            check_position(path, volume.shape(), x, y)?;
            return slice_from_cache(&volume, x, y);
        }

        let dataset = open_dataset(&self.file, path)?;
        check_position(path, &dataset.shape(), x, y)?;
        slice_from_source(&dataset, x, y)
    }

    /// Sums every probe vector or plane into a `(shape[0], shape[1])` map.
    ///
    /// # Errors
    /// Returns `DatasetNotFound` or `DatasetShape` for ranks other than 3 or 4.
    pub fn sum_map(&self, path: &str) -> Result<Array2<f64>> {
        if let Some(volume) = self.cache.ready_volume(path) {
            let shape = check_volume(path, volume.shape())?;
            let trailing = volume.trailing_len();
            let mut sums = Vec::with_capacity(shape[0] * shape[1]);
            for row in 0..shape[0] {
                sums.extend(sum_positions(&decode(volume.rows(row, row + 1)), trailing));
            }
            return to_map(&shape, sums);
        }

        let dataset = open_dataset(&self.file, path)?;
        let shape = check_volume(path, &dataset.shape())?;
        let trailing: usize = shape.iter().skip(2).product();
        let budget = resolve_slab_budget(self.cache.config())?;
        let rows = slab_rows(&shape, dataset.chunk().as_deref(), budget);
        log::debug!("sum: {path} read {rows} row(s) per slab");

        let mut sums = Vec::with_capacity(shape[0] * shape[1]);
        let mut start = 0;
        while start < shape[0] {
            let end = (start + rows).min(shape[0]);
            let values: Vec<f32> = read_axis0_slab(&dataset, path, start, end)?;
            sums.extend(sum_positions(&values, trailing));
            start = end;
        }
        to_map(&shape, sums)
    }
}

fn check_volume(path: &str, shape: &[usize]) -> Result<Vec<usize>> {
    if matches!(shape.len(), 3 | 4) {
        Ok(shape.to_vec())
    } else {
        Err(Error::DatasetShape {
            path: normalize_path(path),
            shape: shape.to_vec(),
            expected: "rank 3 or 4".to_string(),
        })
    }
}

fn check_position(path: &str, shape: &[usize], x: usize, y: usize) -> Result<()> {
    let shape = check_volume(path, shape)?;
    if x >= shape[0] || y >= shape[1] {
        return Err(Error::IndexOutOfRange {
            path: normalize_path(path),
            x,
            y,
            shape,
        });
    }
    Ok(())
}

fn slice_from_cache(volume: &MappedVolume, x: usize, y: usize) -> Result<ArrayD<f32>> {
    let values = volume.position(x, y);
    ArrayD::from_shape_vec(IxDyn(&volume.shape()[2..]), values)
        .map_err(|e| Error::MmapError(e.to_string()))
}

fn slice_from_source(dataset: &Dataset, x: usize, y: usize) -> Result<ArrayD<f32>> {
    let slice = if dataset.ndim() == 3 {
        dataset.read_slice_1d::<f32, _>(s![x, y, ..])?.into_dyn()
    } else {
        dataset.read_slice_2d::<f32, _>(s![x, y, .., ..])?.into_dyn()
    };
    Ok(slice)
}

fn sum_positions(values: &[f32], trailing: usize) -> Vec<f64> {
    if trailing == 0 {
        return Vec::new();
    }
    values
        .par_chunks(trailing)
        .map(|probe| probe.iter().map(|&v| f64::from(v)).sum())
        .collect()
}

fn to_map(shape: &[usize], mut sums: Vec<f64>) -> Result<Array2<f64>> {
    // zero-length probe axes sum to zero
    sums.resize(shape[0] * shape[1], 0.0);
    Array2::from_shape_vec((shape[0], shape[1]), sums)
        .map_err(|e| Error::MmapError(e.to_string()))
}
