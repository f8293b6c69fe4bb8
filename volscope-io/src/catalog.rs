//! Dataset discovery by rank.

use crate::h5::{describe, open_dataset, open_source};
use crate::Result;
use hdf5::{File, Group};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use volscope_core::{DatasetDescriptor, MAX_RANK};

/// Groups nested deeper than this are not descended into.
const MAX_GROUP_DEPTH: usize = 64;

/// Enumerates the datasets of one source file, memoizing every query.
pub struct DatasetCatalog {
    file: File,
    all: Mutex<Option<Arc<[DatasetDescriptor]>>>,
    by_rank: Mutex<HashMap<usize, Arc<[DatasetDescriptor]>>>,
}

impl DatasetCatalog {
    /// Opens a catalog over the file at `path`.
    ///
    /// # Errors
    /// Returns `FileAccess` if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_file(open_source(path)?))
    }

    /// Wraps an already open file handle.
    #[must_use]
    pub fn from_file(file: File) -> Self {
        Self {
            file,
            all: Mutex::new(None),
            by_rank: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the datasets whose rank equals `rank`, in depth-first order.
    ///
    /// An empty result is not an error. Repeated calls return the same
    /// shared list without rescanning.
    ///
    /// # Errors
    /// Returns `InvalidRank` for ranks outside `1..=4`, or an HDF5 error if
    /// the file tree cannot be read.
    pub fn list_datasets(&self, rank: usize) -> Result<Arc<[DatasetDescriptor]>> {
        let rank = DatasetDescriptor::check_rank(rank)?;
        if let Some(hit) = self.lock_by_rank().get(&rank) {
            return Ok(Arc::clone(hit));
        }

        let matching: Arc<[DatasetDescriptor]> = self
            .list_all()?
            .iter()
            .filter(|d| d.rank == rank)
            .cloned()
            .collect();

        log::debug!("catalog: {} dataset(s) of rank {rank}", matching.len());
        let mut by_rank = self.lock_by_rank();
        Ok(Arc::clone(by_rank.entry(rank).or_insert(matching)))
    }

    /// Returns every dataset of rank 1 to 4, in depth-first order.
    ///
    /// # Errors
    /// Returns an HDF5 error if the file tree cannot be read.
    pub fn list_all(&self) -> Result<Arc<[DatasetDescriptor]>> {
        let mut all = self.all.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = all.as_ref() {
            return Ok(Arc::clone(list));
        }

        let mut found = Vec::new();
        walk(&self.file, "", 0, &mut found)?;
        found.retain(|d| (1..=MAX_RANK).contains(&d.rank));
        log::debug!("catalog: scanned {} dataset(s)", found.len());

        let list: Arc<[DatasetDescriptor]> = found.into();
        *all = Some(Arc::clone(&list));
        Ok(list)
    }

    /// Describes the dataset at `path`.
    ///
    /// # Errors
    /// Returns `DatasetNotFound` if no dataset lives at `path`.
    pub fn describe(&self, path: &str) -> Result<DatasetDescriptor> {
        let dataset = open_dataset(&self.file, path)?;
        Ok(describe(&dataset, path))
    }

    fn lock_by_rank(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Arc<[DatasetDescriptor]>>> {
        self.by_rank.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn walk(group: &Group, prefix: &str, depth: usize, out: &mut Vec<DatasetDescriptor>) -> Result<()> {
    if depth > MAX_GROUP_DEPTH {
        log::warn!("catalog: not descending below {prefix} (depth limit)");
        return Ok(());
    }

    for name in group.member_names()? {
        let path = format!("{prefix}/{name}");
        if let Ok(dataset) = group.dataset(&name) {
            out.push(describe(&dataset, &path));
        } else if let Ok(child) = group.group(&name) {
            walk(&child, &path, depth + 1, out)?;
        } else {
            log::debug!("catalog: skipping {path} (not a dataset or group)");
        }
    }
    Ok(())
}
