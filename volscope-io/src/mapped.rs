//! Read-only memory-mapped float32 volumes.
//!

use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use volscope_core::element_count;

/// Bytes per cached element.
pub const F32_BYTES: usize = std::mem::size_of::<f32>();

/// A flat little-endian float32 file mapped into memory.
///
/// Layout mirrors the source dataset in row-major order, so the values
/// behind `(x, y)` start at `(x * shape[1] + y) * trailing * 4`.
pub struct MappedVolume {
    mmap: Mmap,
    shape: Vec<usize>,
    path: PathBuf,
}

impl MappedVolume {
    /// Maps a finished cache file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or mapped, or if its
    /// size is not exactly `product(shape) * 4` bytes.
    pub fn open<P: AsRef<Path>>(path: P, shape: &[usize]) -> Result<Self> {
        let file = File::open(&path)?;
        let expected = expected_len(shape);
        let actual = file.metadata()?.len();
        if u64::try_from(expected).ok() != Some(actual) {
            return Err(Error::MmapError(format!(
                "{} has {actual} bytes, expected {expected}",
                path.as_ref().display()
            )));
        }

        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // Cache files are only ever renamed into place after being fully written.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            shape: shape.to_vec(),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Dataset shape the file was built from.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Number of values behind one `(x, y)` position.
    #[must_use]
    pub fn trailing_len(&self) -> usize {
        self.shape.iter().skip(2).product()
    }

    /// Decodes the values stored for position `(x, y)`.
    ///
    /// Callers must have bounds-checked `x < shape[0]` and `y < shape[1]`.
    #[must_use]
    pub fn position(&self, x: usize, y: usize) -> Vec<f32> {
        let trailing = self.trailing_len();
        let start = (x * self.shape[1] + y) * trailing * F32_BYTES;
        decode(&self.mmap[start..start + trailing * F32_BYTES])
    }

    /// Raw bytes of axis-0 rows `start..end`.
    #[must_use]
    pub fn rows(&self, start: usize, end: usize) -> &[u8] {
        let row_bytes = self.shape.iter().skip(1).product::<usize>() * F32_BYTES;
        &self.mmap[start * row_bytes..end * row_bytes]
    }
}

/// Exact byte length of a cache file for `shape`.
#[must_use]
pub fn expected_len(shape: &[usize]) -> usize {
    element_count(shape) * F32_BYTES
}

/// Decodes little-endian float32 bytes.
#[must_use]
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(F32_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Encodes float32 values as little-endian bytes.
#[must_use]
pub fn encode(values: &[f32]) -> Vec<u8> {
    let mut bytes = vec![0u8; values.len() * F32_BYTES];
    bytes
        .par_chunks_exact_mut(F32_BYTES)
        .zip(values.par_iter())
        .for_each(|(dst, v)| dst.copy_from_slice(&v.to_le_bytes()));
    bytes
}
