//! Coordinate array loading.

use crate::h5::open_dataset;
use crate::{Error, Result};
use hdf5::File;
use volscope_core::normalize_path;

pub use volscope_core::{check_axis, nearest_index};

/// Loads 1D coordinate arrays from the source file.
pub struct CoordinateResolver {
    file: File,
}

impl CoordinateResolver {
    #[must_use]
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Returns the 1D array at `path` as `f64`.
    ///
    /// # Errors
    /// Returns `DatasetNotFound` for a bad path and `DatasetShape` if the
    /// dataset is not one-dimensional.
    pub fn load_coordinates(&self, path: &str) -> Result<Vec<f64>> {
        let dataset = open_dataset(&self.file, path)?;
        let shape = dataset.shape();
        if shape.len() != 1 {
            return Err(Error::DatasetShape {
                path: normalize_path(path),
                shape,
                expected: "rank 1".to_string(),
            });
        }
        Ok(dataset.read_raw::<f64>()?)
    }
}
