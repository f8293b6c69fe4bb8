//! volscope-io: HDF5 volume access and memory-mapped caching for volscope.
//!
//! This crate reads datasets through the HDF5 library and keeps flat
//! float32 copies of large volumes on disk, mapped via memmap2, so probe
//! slices can be served without decompressing chunks.
//!

mod accessor;
pub mod cache;
mod catalog;
mod coords;
mod error;
pub mod h5;
pub mod mapped;
mod ratio;
pub mod session;
mod status;

pub use accessor::VolumeAccessor;
pub use cache::{CacheHandle, CacheRegistry, CacheState};
pub use catalog::DatasetCatalog;
pub use coords::{check_axis, nearest_index, CoordinateResolver};
pub use error::{Error, Result};
pub use mapped::MappedVolume;
pub use ratio::RatioEngine;
pub use session::{SelectionPreview, Session};
pub use status::StatusReporter;
