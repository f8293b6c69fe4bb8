//! One open source file with its catalog, readers and cache registry.

use crate::accessor::VolumeAccessor;
use crate::cache::{CacheHandle, CacheRegistry, CacheState};
use crate::catalog::DatasetCatalog;
use crate::coords::CoordinateResolver;
use crate::h5::{open_dataset, open_source};
use crate::ratio::RatioEngine;
use crate::status::StatusReporter;
use crate::{Error, Result};
use ndarray::{Array2, ArrayD};
use std::sync::Arc;
use volscope_core::{
    check_axis, normalize_path, DatasetDescriptor, DerivedChannel, Selection, SessionConfig,
};

/// Everything produced by [`Session::load_selection`].
#[derive(Debug)]
pub struct SelectionPreview {
    /// Normalized preview grid of shape `map_shape`.
    pub preview: Array2<f64>,
    pub map_x: Option<Vec<f64>>,
    pub map_y: Option<Vec<f64>>,
    pub probe_x: Option<Vec<f64>>,
    pub probe_y: Option<Vec<f64>>,
    /// Cache entry of the primary volume.
    pub primary: CacheHandle,
    /// Cache entry of the secondary volume, if one was selected.
    pub secondary: Option<CacheHandle>,
}

/// Entry point for a caller exploring one HDF5 file.
///
/// All components share the same file handle; the cache registry lives as
/// long as the session and deduplicates builds across callers.
pub struct Session {
    config: SessionConfig,
    file: hdf5::File,
    catalog: DatasetCatalog,
    coords: CoordinateResolver,
    accessor: VolumeAccessor,
    ratio: RatioEngine,
    cache: Arc<CacheRegistry>,
}

impl Session {
    /// Opens the source named in `config`.
    ///
    /// # Errors
    /// Returns `FileAccess` if the file is missing or not HDF5.
    pub fn open(config: SessionConfig, status: StatusReporter) -> Result<Self> {
        let file = open_source(&config.source_path)?;
        log::debug!("session: opened {}", config.source_path.display());

        let cache = Arc::new(CacheRegistry::new(
            file.clone(),
            &config.source_path,
            config.cache.clone(),
            status,
        ));
        Ok(Self {
            catalog: DatasetCatalog::from_file(file.clone()),
            coords: CoordinateResolver::new(file.clone()),
            accessor: VolumeAccessor::new(file.clone(), Arc::clone(&cache)),
            ratio: RatioEngine::new(file.clone()),
            cache,
            file,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// See [`DatasetCatalog::list_datasets`].
    ///
    /// # Errors
    /// Returns `InvalidRank` for ranks outside 1..=4.
    pub fn list_datasets(&self, rank: usize) -> Result<Arc<[DatasetDescriptor]>> {
        self.catalog.list_datasets(rank)
    }

    /// See [`DatasetCatalog::list_all`].
    ///
    /// # Errors
    /// Returns an HDF5 error if the hierarchy cannot be walked.
    pub fn list_all(&self) -> Result<Arc<[DatasetDescriptor]>> {
        self.catalog.list_all()
    }

    /// See [`DatasetCatalog::describe`].
    ///
    /// # Errors
    /// Returns `DatasetNotFound` for a bad path.
    pub fn describe(&self, path: &str) -> Result<DatasetDescriptor> {
        self.catalog.describe(path)
    }

    /// See [`VolumeAccessor::load_dataset`].
    ///
    /// # Errors
    /// Returns `DatasetNotFound` for a bad path.
    pub fn load_dataset(&self, path: &str) -> Result<ArrayD<f64>> {
        self.accessor.load_dataset(path)
    }

    /// See [`VolumeAccessor::get_slice`].
    ///
    /// # Errors
    /// Returns `DatasetNotFound`, `DatasetShape` or `IndexOutOfRange`.
    pub fn get_slice(&self, path: &str, x: usize, y: usize) -> Result<ArrayD<f32>> {
        self.accessor.get_slice(path, x, y)
    }

    /// See [`VolumeAccessor::sum_map`].
    ///
    /// # Errors
    /// Returns `DatasetNotFound` or `DatasetShape`.
    pub fn sum_map(&self, path: &str) -> Result<Array2<f64>> {
        self.accessor.sum_map(path)
    }

    /// See [`RatioEngine::compute_single`].
    ///
    /// # Errors
    /// Returns `DatasetNotFound` or `ShapeMismatch`.
    pub fn compute_single(&self, path: &str, map_shape: (usize, usize)) -> Result<Array2<f64>> {
        self.ratio.compute_single(path, map_shape)
    }

    /// See [`RatioEngine::compute_ratio`].
    ///
    /// # Errors
    /// Returns `DatasetNotFound` or `ShapeMismatch`.
    pub fn compute_ratio(
        &self,
        numerator_path: &str,
        denominator_path: &str,
        map_shape: (usize, usize),
    ) -> Result<Array2<f64>> {
        self.ratio
            .compute_ratio(numerator_path, denominator_path, map_shape)
    }

    /// See [`CoordinateResolver::load_coordinates`].
    ///
    /// # Errors
    /// Returns `DatasetNotFound` or `DatasetShape`.
    pub fn load_coordinates(&self, path: &str) -> Result<Vec<f64>> {
        self.coords.load_coordinates(path)
    }

    /// Index of the coordinate closest to `value`; ties go to the lower index.
    ///
    /// # Errors
    /// Returns `EmptyCoordinates` for an empty array.
    #[allow(clippy::unused_self)]
    pub fn nearest_index(&self, coords: &[f64], value: f64) -> Result<usize> {
        Ok(volscope_core::nearest_index(coords, value)?)
    }

    /// Loads the coordinates at `path` and looks up `value` in them.
    ///
    /// # Errors
    /// Returns `EmptyCoordinates` for an empty array, plus any load error.
    pub fn nearest_in(&self, path: &str, value: f64) -> Result<usize> {
        let coords = self.load_coordinates(path)?;
        self.nearest_index(&coords, value)
    }

    /// See [`CacheRegistry::trigger_build`].
    pub fn trigger_build(&self, path: &str) -> CacheHandle {
        self.cache.trigger_build(path)
    }

    /// See [`CacheRegistry::state`].
    #[must_use]
    pub fn cache_state(&self, path: &str) -> CacheState {
        self.cache.state(path)
    }

    /// Validates a selection, computes its preview and starts the volume caches.
    ///
    /// Nothing is built unless every check and the preview succeed.
    ///
    /// # Errors
    /// Returns `InvalidSelection` without a primary volume or derived
    /// channel, `DatasetShape` if a volume does not match `map_shape`,
    /// `CoordinateLength` for mislabelled axes, plus any read error.
    pub fn load_selection(
        &self,
        selection: &Selection,
        map_shape: (usize, usize),
    ) -> Result<SelectionPreview> {
        let primary = selection.primary_volume().ok_or_else(|| {
            volscope_core::Error::InvalidSelection("no primary volume selected".to_string())
        })?;
        let derived = selection.derived().ok_or_else(|| {
            volscope_core::Error::InvalidSelection("no derived channel selected".to_string())
        })?;

        let volume_shape = self.check_volume(primary, map_shape)?;
        if let Some(secondary) = selection.secondary_volume() {
            self.check_volume(secondary, map_shape)?;
        }

        let axes = [
            (selection.map_x(), 0),
            (selection.map_y(), 1),
            (selection.probe_x(), 2),
            (selection.probe_y(), 3),
        ];
        let mut coords: Vec<Option<Vec<f64>>> = Vec::with_capacity(axes.len());
        for (path, axis) in axes {
            coords.push(match path {
                Some(path) => Some(self.labelled_axis(path, axis, &volume_shape)?),
                None => None,
            });
        }

        let preview = match derived {
            DerivedChannel::Single(path) => self.compute_single(path, map_shape)?,
            DerivedChannel::Ratio {
                numerator,
                denominator,
            } => self.compute_ratio(numerator, denominator, map_shape)?,
        };

        let primary = self.trigger_build(primary);
        let secondary = selection
            .secondary_volume()
            .map(|path| self.trigger_build(path));

        let mut coords = coords.into_iter();
        Ok(SelectionPreview {
            preview,
            map_x: coords.next().flatten(),
            map_y: coords.next().flatten(),
            probe_x: coords.next().flatten(),
            probe_y: coords.next().flatten(),
            primary,
            secondary,
        })
    }

    fn check_volume(&self, path: &str, (rows, cols): (usize, usize)) -> Result<Vec<usize>> {
        let shape = open_dataset(&self.file, path)?.shape();
        if !matches!(shape.len(), 3 | 4) || shape[0] != rows || shape[1] != cols {
            return Err(Error::DatasetShape {
                path: normalize_path(path),
                shape,
                expected: format!("rank 3 or 4 with leading axes ({rows}, {cols})"),
            });
        }
        Ok(shape)
    }

    fn labelled_axis(&self, path: &str, axis: usize, shape: &[usize]) -> Result<Vec<f64>> {
        let coords = self.load_coordinates(path)?;
        let Some(&expected) = shape.get(axis) else {
            return Err(Error::DatasetShape {
                path: normalize_path(path),
                shape: shape.to_vec(),
                expected: format!("a volume with axis {axis}"),
            });
        };
        check_axis(&coords, axis, expected)?;
        Ok(coords)
    }
}
