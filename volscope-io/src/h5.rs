//! HDF5 helpers shared by the catalog, accessor, ratio engine and cache builder.

use crate::{Error, Result};
use hdf5::types::{FloatSize, H5Type, TypeDescriptor};
use hdf5::{Dataset, File};
use ndarray::{s, IxDyn};
use std::path::Path;
use volscope_core::{normalize_path, DatasetDescriptor};

/// Opens the source file read-only.
///
/// # Errors
/// Returns `FileAccess` if the file cannot be opened as HDF5.
pub fn open_source<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::open(path).map_err(|e| Error::FileAccess {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Looks up a dataset by `/`-delimited path.
///
/// # Errors
/// Returns `DatasetNotFound` if nothing (or a group) lives at `path`.
pub fn open_dataset(file: &File, path: &str) -> Result<Dataset> {
    let path = normalize_path(path);
    if path == "/" {
        return Err(Error::DatasetNotFound(path));
    }
    file.dataset(&path).map_err(|_| Error::DatasetNotFound(path))
}

/// Builds the descriptor of an open dataset.
pub fn describe(dataset: &Dataset, path: &str) -> DatasetDescriptor {
    DatasetDescriptor::new(path, dataset.shape())
}

/// Stable text form of the dataset's element type.
///
/// # Errors
/// Returns an error if the HDF5 datatype cannot be inspected.
pub fn dtype_label(dataset: &Dataset) -> Result<String> {
    let descriptor = dataset.dtype()?.to_descriptor()?;
    Ok(format!("{descriptor:?}"))
}

/// Returns true if the dataset is stored as 4-byte floats.
///
/// # Errors
/// Returns an error if the HDF5 datatype cannot be inspected.
pub fn is_native_f32(dataset: &Dataset) -> Result<bool> {
    let descriptor = dataset.dtype()?.to_descriptor()?;
    Ok(matches!(descriptor, TypeDescriptor::Float(FloatSize::U4)))
}

/// Reads rows `start..end` along axis 0 as a flat row-major vector.
///
/// # Errors
/// Returns an error if the rank is unsupported or HDF5 I/O fails.
pub fn read_axis0_slab<T: H5Type>(
    dataset: &Dataset,
    path: &str,
    start: usize,
    end: usize,
) -> Result<Vec<T>> {
    let slab = match dataset.ndim() {
        1 => dataset.read_slice::<T, _, IxDyn>(s![start..end])?,
        2 => dataset.read_slice::<T, _, IxDyn>(s![start..end, ..])?,
        3 => dataset.read_slice::<T, _, IxDyn>(s![start..end, .., ..])?,
        4 => dataset.read_slice::<T, _, IxDyn>(s![start..end, .., .., ..])?,
        _ => {
            return Err(Error::DatasetShape {
                path: normalize_path(path),
                shape: dataset.shape(),
                expected: "rank 1 to 4".to_string(),
            })
        }
    };
    let (values, _) = slab.into_raw_vec_and_offset();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_source_missing() {
        let err = open_source("/nonexistent/volscope/input.h5").unwrap_err();
        assert!(matches!(err, Error::FileAccess { .. }));
    }

    #[test]
    fn test_open_source_not_hdf5() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"plain text").unwrap();
        let err = open_source(file.path()).unwrap_err();
        assert!(matches!(err, Error::FileAccess { .. }));
    }

    #[test]
    fn test_dataset_lookup_and_slab() {
        let tmp = NamedTempFile::new().unwrap();
        let volume = Array3::from_shape_fn((3, 2, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f64);
        {
            let file = File::create(tmp.path()).unwrap();
            let entry = file.create_group("entry").unwrap();
            let ds = entry
                .new_dataset::<f64>()
                .shape((3, 2, 4))
                .create("cube")
                .unwrap();
            ds.write(volume.view()).unwrap();
        }

        let file = open_source(tmp.path()).unwrap();
        assert!(matches!(
            open_dataset(&file, "entry/missing"),
            Err(Error::DatasetNotFound(_))
        ));
        assert!(matches!(
            open_dataset(&file, "/entry"),
            Err(Error::DatasetNotFound(_))
        ));

        let ds = open_dataset(&file, "entry/cube").unwrap();
        assert_eq!(describe(&ds, "entry/cube").shape, vec![3, 2, 4]);
        assert!(!is_native_f32(&ds).unwrap());

        let slab: Vec<f32> = read_axis0_slab(&ds, "entry/cube", 1, 3).unwrap();
        assert_eq!(slab.len(), 16);
        assert_eq!(slab[0], 100.0);
        assert_eq!(slab[15], 213.0);
    }
}
