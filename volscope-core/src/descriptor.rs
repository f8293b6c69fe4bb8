//! Dataset descriptors and path helpers.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Highest rank the catalog reports.
pub const MAX_RANK: usize = 4;

/// Shape summary of one dataset in the source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DatasetDescriptor {
    /// Absolute `/`-delimited dataset path.
    pub path: String,
    /// Extent of every axis, slowest-varying first.
    pub shape: Vec<usize>,
    /// Number of axes (always `shape.len()`).
    pub rank: usize,
}

impl DatasetDescriptor {
    /// Creates a descriptor, normalizing the path and deriving the rank.
    pub fn new(path: &str, shape: Vec<usize>) -> Self {
        let rank = shape.len();
        Self {
            path: normalize_path(path),
            shape,
            rank,
        }
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        element_count(&self.shape)
    }

    /// Returns true if any axis has zero extent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for 3D and 4D datasets.
    #[must_use]
    pub fn is_volume(&self) -> bool {
        matches!(self.rank, 3 | 4)
    }

    /// Number of elements behind one `(x, y)` position of a volume.
    #[must_use]
    pub fn trailing_len(&self) -> usize {
        self.shape.iter().skip(2).product()
    }

    /// Validates a catalog rank query.
    ///
    /// # Errors
    /// Returns `InvalidRank` if `rank` is outside `1..=4`.
    pub fn check_rank(rank: usize) -> Result<usize> {
        if (1..=MAX_RANK).contains(&rank) {
            Ok(rank)
        } else {
            Err(Error::InvalidRank(rank))
        }
    }
}

/// Product of all axis extents.
#[must_use]
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Normalizes a dataset path to a single leading `/` with no trailing `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}
