//! Session configuration.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for the memmap cache builder.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CacheConfig {
    /// Directory that holds cache files.
    pub cache_dir: PathBuf,
    /// Extension appended to every cache file name.
    pub file_extension: String,
    /// Convert non-float32 sources to float32 while building.
    ///
    /// When false, only float32 sources can be cached.
    pub cast_to_f32: bool,
    /// Fraction of available system memory one read slab may use (0.0 < fraction <= 1.0).
    pub memory_fraction: f64,
    /// Explicit slab budget override (bytes). If set, `memory_fraction` is ignored.
    pub slab_budget_bytes: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("volscope-cache"),
            file_extension: "f32".to_string(),
            cast_to_f32: true,
            memory_fraction: 0.1,
            slab_budget_bytes: None,
        }
    }
}

impl CacheConfig {
    /// Set the directory that holds cache files.
    #[must_use]
    pub fn with_cache_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cache_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the cache file extension (without the leading dot).
    #[must_use]
    pub fn with_file_extension(mut self, ext: &str) -> Self {
        self.file_extension = ext.trim_start_matches('.').to_string();
        self
    }

    /// Enable or disable float32 conversion of non-float32 sources.
    #[must_use]
    pub fn with_cast_to_f32(mut self, enabled: bool) -> Self {
        self.cast_to_f32 = enabled;
        self
    }

    /// Set an explicit slab budget in bytes.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_slab_budget_bytes`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_slab_budget_bytes(mut self, bytes: usize) -> Self {
        self.slab_budget_bytes = Some(bytes.max(1));
        self
    }

    /// Fallible variant of [`Self::with_slab_budget_bytes`].
    ///
    /// # Errors
    /// Returns an error if `bytes` is 0.
    pub fn try_with_slab_budget_bytes(mut self, bytes: usize) -> Result<Self> {
        if bytes == 0 {
            return Err(Error::ConfigError(
                "slab budget must be at least 1 byte".to_string(),
            ));
        }
        self.slab_budget_bytes = Some(bytes);
        Ok(self)
    }

    /// Set the fraction of available memory a slab may use.
    ///
    /// # Errors
    /// Returns an error if `fraction` is outside (0.0, 1.0].
    pub fn try_with_memory_fraction(mut self, fraction: f64) -> Result<Self> {
        if !(0.0 < fraction && fraction <= 1.0) {
            return Err(Error::ConfigError(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        self.memory_fraction = fraction;
        Ok(self)
    }
}

/// Everything a session needs, constructed once by the caller.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    /// HDF5 source file.
    pub source_path: PathBuf,
    /// Cache builder settings.
    pub cache: CacheConfig,
}

impl SessionConfig {
    /// Creates a configuration with default cache settings.
    pub fn new<P: AsRef<Path>>(source_path: P) -> Self {
        Self {
            source_path: source_path.as_ref().to_path_buf(),
            cache: CacheConfig::default(),
        }
    }

    /// Replace the cache settings.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}
