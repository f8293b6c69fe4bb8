//! volscope-core: Core types and numeric kernels for volume exploration.
//!
//! This crate provides the dataset descriptors, selections, session
//! configuration, and the preview/coordinate math shared by the I/O layer.
//!

pub mod config;
pub mod coords;
pub mod descriptor;
pub mod error;
pub mod preview;
pub mod selection;

pub use config::{CacheConfig, SessionConfig};
pub use coords::{check_axis, nearest_index};
pub use descriptor::{element_count, normalize_path, DatasetDescriptor, MAX_RANK};
pub use error::{Error, Result};
pub use preview::{
    check_element_count, normalize_min_max, ratio_with_floor, sanitize, InfPolicy,
    ZERO_DENOMINATOR_FLOOR,
};
pub use selection::{DerivedChannel, Selection, SelectionBuilder};
