//! Error types for volscope-core.

use thiserror::Error;

/// Result type alias for volscope operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for volscope operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Element count does not fit the requested grid shape.
    #[error("cannot reshape {len} elements into shape {shape:?}")]
    ShapeMismatch { shape: Vec<usize>, len: usize },

    /// Nearest-index lookup on an empty coordinate array.
    #[error("coordinate array is empty")]
    EmptyCoordinates,

    /// Rank outside the supported range.
    #[error("unsupported rank {0} (expected 1..=4)")]
    InvalidRank(usize),

    /// Coordinate array cannot label the data axis it was selected for.
    #[error("coordinates for axis {axis} have length {actual}, expected {expected}")]
    CoordinateLength {
        axis: usize,
        expected: usize,
        actual: usize,
    },

    /// Selection is incomplete or inconsistent.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
