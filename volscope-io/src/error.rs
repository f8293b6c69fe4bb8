//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Source file cannot be opened.
    #[error("cannot open source file {path}: {reason}")]
    FileAccess { path: PathBuf, reason: String },

    /// No dataset at the requested path.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// Dataset rank is wrong for the requested operation.
    #[error("dataset {path} has shape {shape:?}, expected {expected}")]
    DatasetShape {
        path: String,
        shape: Vec<usize>,
        expected: String,
    },

    /// Slice position outside the volume.
    #[error("index ({x}, {y}) out of range for {path} with shape {shape:?}")]
    IndexOutOfRange {
        path: String,
        x: usize,
        y: usize,
        shape: Vec<usize>,
    },

    /// Background cache build failure.
    #[error("cache build failed for {path}: {reason}")]
    CacheBuild { path: String, reason: String },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HDF5 library error.
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Memory mapping error.
    #[error("memory mapping error: {0}")]
    MmapError(String),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] volscope_core::Error),
}
