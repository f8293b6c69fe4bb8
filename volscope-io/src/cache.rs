//! Background memmap cache builder.
//!
//! A cache file is a flat little-endian float32 copy of one source dataset.
//! Builds run on their own thread, at most one per dataset path per
//! registry, and the result is only exposed once the file is complete.

use crate::h5::{dtype_label, is_native_f32, open_dataset, open_source, read_axis0_slab};
use crate::mapped::{encode, expected_len, MappedVolume, F32_BYTES};
use crate::status::StatusReporter;
use crate::{Error, Result};
use hdf5::File;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::System;
use volscope_core::{normalize_path, CacheConfig};

/// Upper bound for one read slab when the budget comes from system memory.
const MAX_SLAB_BYTES: usize = 256 * 1024 * 1024;

/// Observable state of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    NotStarted,
    Building,
    Ready,
    Failed,
}

enum Slot {
    NotStarted,
    Building,
    Ready(Arc<MappedVolume>),
    Failed(String),
}

impl Slot {
    fn state(&self) -> CacheState {
        match self {
            Self::NotStarted => CacheState::NotStarted,
            Self::Building => CacheState::Building,
            Self::Ready(_) => CacheState::Ready,
            Self::Failed(_) => CacheState::Failed,
        }
    }
}

struct CacheEntry {
    path: String,
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl CacheEntry {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            slot: Mutex::new(Slot::NotStarted),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, slot: Slot) {
        *self.lock() = slot;
        self.changed.notify_all();
    }
}

/// Handle to one cache entry, returned by [`CacheRegistry::trigger_build`].
#[derive(Clone)]
pub struct CacheHandle {
    entry: Arc<CacheEntry>,
}

impl CacheHandle {
    /// Normalized dataset path of the entry.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.entry.path
    }

    /// Current state without blocking.
    #[must_use]
    pub fn state(&self) -> CacheState {
        self.entry.lock().state()
    }

    /// Failure description, if the build failed.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        match &*self.entry.lock() {
            Slot::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Blocks until the entry leaves `Building`.
    #[must_use]
    pub fn wait(&self) -> CacheState {
        let mut slot = self.entry.lock();
        while matches!(*slot, Slot::Building) {
            slot = self
                .entry
                .changed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slot.state()
    }

    /// Like [`Self::wait`], giving up after `timeout`.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> CacheState {
        let slot = self.entry.lock();
        let (slot, _) = self
            .entry
            .changed
            .wait_timeout_while(slot, timeout, |s| matches!(s, Slot::Building))
            .unwrap_or_else(PoisonError::into_inner);
        slot.state()
    }
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle")
            .field("path", &self.entry.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Everything a build thread needs, resolved on the caller's thread.
#[derive(Debug, Clone)]
struct BuildPlan {
    dataset_path: String,
    shape: Vec<usize>,
    dtype: String,
    native_f32: bool,
    chunk: Option<Vec<usize>>,
    file_path: PathBuf,
}

/// Marks an entry failed if its build thread exits without a verdict.
struct BuildGuard {
    entry: Arc<CacheEntry>,
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        let mut slot = self.entry.lock();
        if matches!(*slot, Slot::Building) {
            *slot = Slot::Failed("build thread exited unexpectedly".to_string());
            drop(slot);
            self.entry.changed.notify_all();
        }
    }
}

/// Session-wide set of cache entries keyed by dataset path.
pub struct CacheRegistry {
    file: File,
    source_path: PathBuf,
    source_identity: String,
    config: CacheConfig,
    status: StatusReporter,
    entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
}

impl CacheRegistry {
    /// Creates an empty registry for the source opened as `file` from `source_path`.
    pub fn new<P: AsRef<Path>>(
        file: File,
        source_path: P,
        config: CacheConfig,
        status: StatusReporter,
    ) -> Self {
        let source_path = source_path.as_ref().to_path_buf();
        let source_identity = fs::canonicalize(&source_path)
            .unwrap_or_else(|_| source_path.clone())
            .display()
            .to_string();
        Self {
            file,
            source_path,
            source_identity,
            config,
            status,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or joins) the cache build for `path` and returns immediately.
    ///
    /// A valid file from an earlier run is reused without touching the
    /// source. An entry that is already building, ready or failed is
    /// returned as is; failed builds are not retried within a session.
    /// Errors never propagate from here: they mark the entry `Failed` and
    /// go to the status reporter.
    pub fn trigger_build(&self, path: &str) -> CacheHandle {
        let key = normalize_path(path);
        let entry = {
            let mut entries = self.lock_entries();
            Arc::clone(
                entries
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(CacheEntry::new(&key))),
            )
        };
        let handle = CacheHandle {
            entry: Arc::clone(&entry),
        };

        let mut slot = entry.lock();
        if !matches!(*slot, Slot::NotStarted) {
            log::debug!("cache: {key} already {:?}", slot.state());
            return handle;
        }

        let plan = match self.plan(&key) {
            Ok(plan) => plan,
            Err(e) => {
                *slot = Slot::Failed(e.to_string());
                drop(slot);
                entry.changed.notify_all();
                self.report_failure(&key, &e);
                return handle;
            }
        };

        if is_reusable(&plan.file_path, &plan.shape) {
            match MappedVolume::open(&plan.file_path, &plan.shape) {
                Ok(volume) => {
                    *slot = Slot::Ready(Arc::new(volume));
                    drop(slot);
                    entry.changed.notify_all();
                    self.status.report(&format!(
                        "Reusing memmap cache for {key} ({})",
                        plan.file_path.display()
                    ));
                    return handle;
                }
                Err(e) => log::warn!("cache: existing file for {key} unusable, rebuilding: {e}"),
            }
        }

        *slot = Slot::Building;
        drop(slot);

        let budget = match resolve_slab_budget(&self.config) {
            Ok(budget) => budget,
            Err(e) => {
                entry.set(Slot::Failed(e.to_string()));
                self.report_failure(&key, &e);
                return handle;
            }
        };

        #[allow(clippy::cast_precision_loss)]
        let megabytes = expected_len(&plan.shape) as f64 / (1024.0 * 1024.0);
        self.status.report(&format!(
            "Building memmap cache for {key} ({megabytes:.1} MB)"
        ));

        let source_path = self.source_path.clone();
        let cast_to_f32 = self.config.cast_to_f32;
        let status = self.status.clone();
        let build_entry = Arc::clone(&entry);
        let spawned = thread::Builder::new()
            .name(format!("volscope-cache:{key}"))
            .spawn(move || {
                run_build(&source_path, &plan, cast_to_f32, budget, &build_entry, &status);
            });

        if let Err(e) = spawned {
            let e = Error::from(e);
            entry.set(Slot::Failed(e.to_string()));
            self.report_failure(&key, &e);
        }
        handle
    }

    /// State of the entry for `path`; `NotStarted` if never triggered.
    #[must_use]
    pub fn state(&self, path: &str) -> CacheState {
        self.lock_entries()
            .get(&normalize_path(path))
            .map_or(CacheState::NotStarted, |entry| entry.lock().state())
    }

    /// Handle for an already triggered entry.
    #[must_use]
    pub fn handle(&self, path: &str) -> Option<CacheHandle> {
        self.lock_entries()
            .get(&normalize_path(path))
            .map(|entry| CacheHandle {
                entry: Arc::clone(entry),
            })
    }

    /// The mapped file for `path`, if its entry is `Ready`.
    #[must_use]
    pub fn ready_volume(&self, path: &str) -> Option<Arc<MappedVolume>> {
        let entry = self.lock_entries().get(&normalize_path(path)).cloned()?;
        let slot = entry.lock();
        match &*slot {
            Slot::Ready(volume) => Some(Arc::clone(volume)),
            _ => None,
        }
    }

    /// Cache settings this registry was created with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Deterministic cache file location for a dataset.
    #[must_use]
    pub fn cache_file_path(&self, path: &str, shape: &[usize], dtype: &str) -> PathBuf {
        self.config.cache_dir.join(cache_file_name(
            &self.source_identity,
            &normalize_path(path),
            shape,
            dtype,
            &self.config.file_extension,
        ))
    }

    fn plan(&self, key: &str) -> Result<BuildPlan> {
        let dataset = open_dataset(&self.file, key)?;
        let shape = dataset.shape();
        if shape.is_empty() {
            return Err(Error::DatasetShape {
                path: key.to_string(),
                shape,
                expected: "at least rank 1".to_string(),
            });
        }
        let dtype = dtype_label(&dataset)?;
        let file_path = self.cache_file_path(key, &shape, &dtype);
        Ok(BuildPlan {
            dataset_path: key.to_string(),
            native_f32: is_native_f32(&dataset)?,
            chunk: dataset.chunk(),
            shape,
            dtype,
            file_path,
        })
    }

    fn report_failure(&self, key: &str, err: &Error) {
        log::warn!("cache: build for {key} failed: {err}");
        self.status.report(&format!(
            "Memmap cache failed for {key}: {err}; using direct reads"
        ));
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Arc<CacheEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_build(
    source_path: &Path,
    plan: &BuildPlan,
    cast_to_f32: bool,
    budget: usize,
    entry: &Arc<CacheEntry>,
    status: &StatusReporter,
) {
    let _guard = BuildGuard {
        entry: Arc::clone(entry),
    };
    let started = Instant::now();

    let built = build_cache_file(source_path, plan, cast_to_f32, budget)
        .and_then(|()| MappedVolume::open(&plan.file_path, &plan.shape));

    match built {
        Ok(volume) => {
            status.report(&format!(
                "Memmap cache ready for {} in {:.2}s",
                plan.dataset_path,
                started.elapsed().as_secs_f64()
            ));
            entry.set(Slot::Ready(Arc::new(volume)));
        }
        Err(e) => {
            let err = match e {
                Error::CacheBuild { .. } => e,
                other => Error::CacheBuild {
                    path: plan.dataset_path.clone(),
                    reason: other.to_string(),
                },
            };
            log::warn!("cache: {err}");
            status.report(&format!("{err}; using direct reads"));
            entry.set(Slot::Failed(err.to_string()));
        }
    }
}

fn build_cache_file(
    source_path: &Path,
    plan: &BuildPlan,
    cast_to_f32: bool,
    budget: usize,
) -> Result<()> {
    if !plan.native_f32 && !cast_to_f32 {
        return Err(Error::CacheBuild {
            path: plan.dataset_path.clone(),
            reason: format!(
                "source type {} is not float32 and casting is disabled",
                plan.dtype
            ),
        });
    }

    if let Some(dir) = plan.file_path.parent() {
        fs::create_dir_all(dir)?;
    }

    let partial = partial_path(&plan.file_path);
    let written = write_slabs(source_path, plan, budget, &partial);
    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }
    written?;

    fs::rename(&partial, &plan.file_path)?;
    Ok(())
}

fn write_slabs(source_path: &Path, plan: &BuildPlan, budget: usize, partial: &Path) -> Result<()> {
    let file = open_source(source_path)?;
    let dataset = open_dataset(&file, &plan.dataset_path)?;

    let total_rows = plan.shape[0];
    let row_len: usize = plan.shape.iter().skip(1).product();
    let rows = slab_rows(&plan.shape, plan.chunk.as_deref(), budget);

    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(partial)?;
    out.set_len(expected_len(&plan.shape) as u64)?;

    let mut start = 0;
    while start < total_rows {
        let end = (start + rows).min(total_rows);
        let values: Vec<f32> = read_axis0_slab(&dataset, &plan.dataset_path, start, end)?;
        if values.len() != (end - start) * row_len {
            return Err(Error::CacheBuild {
                path: plan.dataset_path.clone(),
                reason: format!(
                    "rows {start}..{end} returned {} values, expected {}",
                    values.len(),
                    (end - start) * row_len
                ),
            });
        }

        out.seek(SeekFrom::Start((start * row_len * F32_BYTES) as u64))?;
        out.write_all(&encode(&values))?;
        log::debug!(
            "cache: {} rows {start}..{end} of {total_rows} written",
            plan.dataset_path
        );
        start = end;
    }

    out.flush()?;
    out.sync_all()?;
    Ok(())
}

fn is_reusable(path: &Path, shape: &[usize]) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && u64::try_from(expected_len(shape)).ok() == Some(meta.len()))
        .unwrap_or(false)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Number of axis-0 rows read per slab.
///
/// Chunked sources read whole chunk rows that fit the budget; otherwise the
/// largest slab that fits is used. Always at least one row.
#[must_use]
pub fn slab_rows(shape: &[usize], chunk: Option<&[usize]>, budget_bytes: usize) -> usize {
    let total_rows = shape.first().copied().unwrap_or(0).max(1);
    let row_bytes = (shape.iter().skip(1).product::<usize>() * F32_BYTES).max(1);
    let fit = (budget_bytes / row_bytes).max(1);

    let rows = match chunk.and_then(|c| c.first().copied()).filter(|&c| c > 0) {
        Some(chunk_rows) if chunk_rows <= fit => fit / chunk_rows * chunk_rows,
        _ => fit,
    };
    rows.min(total_rows)
}

/// Resolve the slab budget in bytes.
///
/// # Errors
/// Returns an error if the memory fraction is invalid.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resolve_slab_budget(config: &CacheConfig) -> Result<usize> {
    if let Some(bytes) = config.slab_budget_bytes {
        return Ok(bytes.max(1));
    }
    if !(0.0 < config.memory_fraction && config.memory_fraction <= 1.0) {
        return Err(volscope_core::Error::ConfigError(
            "memory_fraction must be in (0.0, 1.0]".to_string(),
        )
        .into());
    }
    let mut system = System::new();
    system.refresh_memory();
    let available = system.available_memory();
    if available == 0 {
        log::warn!("cache: available memory reported as 0, using default slab budget");
        return Ok(MAX_SLAB_BYTES);
    }
    let budget = (available as f64 * config.memory_fraction).floor() as u64;
    Ok(usize::try_from(budget)
        .unwrap_or(usize::MAX)
        .clamp(1, MAX_SLAB_BYTES))
}

/// Cache file name for a dataset of a given source.
///
/// `<source stem>_<dataset slug>_<crc32>.<ext>`, with the CRC32 taken over
/// the source identity, dataset path, shape and element type.
#[must_use]
pub fn cache_file_name(
    source_identity: &str,
    dataset_path: &str,
    shape: &[usize],
    dtype: &str,
    extension: &str,
) -> String {
    let shape_text = shape
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("x");

    let mut hasher = crc32fast::Hasher::new();
    for part in [source_identity, dataset_path, shape_text.as_str(), dtype] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    let crc = hasher.finalize();

    let stem = Path::new(source_identity)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "{}_{}_{crc:08x}.{extension}",
        slug(&stem),
        slug(dataset_path.trim_matches('/'))
    )
}

fn slug(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
