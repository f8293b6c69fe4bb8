//! volscope command-line interface.
//!
//! Browses HDF5 files, slices volumes and builds memmap caches.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Args, Parser, Subcommand};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use volscope_core::{CacheConfig, SessionConfig};
use volscope_io::{CacheState, Session, StatusReporter};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    VolscopeIo(#[from] volscope_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] volscope_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache build failed for {}", .0.join(", "))]
    CacheFailed(Vec<String>),
}

/// Explore HDF5 volumes and cache them for fast slicing.
#[derive(Parser)]
#[command(name = "volscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug output when RUST_LOG is unset
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Cache settings shared by every subcommand that opens a session.
#[derive(Args, Debug, Clone)]
struct CacheArgs {
    /// Directory for memmap cache files
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Only cache datasets that are already float32
    #[arg(long)]
    no_cast: bool,

    /// Read slab budget in MiB (default: fraction of available memory)
    #[arg(long)]
    slab_mb: Option<usize>,
}

impl CacheArgs {
    fn session_config(&self, input: &Path) -> Result<SessionConfig> {
        let mut cache = CacheConfig::default().with_cast_to_f32(!self.no_cast);
        if let Some(dir) = &self.cache_dir {
            cache = cache.with_cache_dir(dir);
        }
        if let Some(mb) = self.slab_mb {
            cache = cache.try_with_slab_budget_bytes(mb.saturating_mul(1024 * 1024))?;
        }
        Ok(SessionConfig::new(input).with_cache(cache))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List datasets in a file
    List {
        /// Input HDF5 file
        input: PathBuf,

        /// Only datasets of this rank (1-4)
        #[arg(short, long)]
        rank: Option<usize>,

        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the probe data at one map position
    Slice {
        /// Input HDF5 file
        input: PathBuf,

        /// 3D or 4D volume
        dataset: String,

        x: usize,
        y: usize,

        /// Build the memmap cache first and read from it
        #[arg(long)]
        cached: bool,

        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Compute a normalized preview grid
    Preview {
        /// Input HDF5 file
        input: PathBuf,

        /// Map rows and columns
        #[arg(long, num_args = 2, value_names = ["ROWS", "COLS"], required = true)]
        shape: Vec<usize>,

        /// Normalize a single dataset
        #[arg(long, conflicts_with = "ratio", required_unless_present = "ratio")]
        single: Option<String>,

        /// Normalize NUMERATOR / DENOMINATOR
        #[arg(long, num_args = 2, value_names = ["NUMERATOR", "DENOMINATOR"])]
        ratio: Option<Vec<String>>,
    },

    /// Sum every probe of a volume into a map
    Sum {
        /// Input HDF5 file
        input: PathBuf,

        /// 3D or 4D volume
        dataset: String,

        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Build memmap caches and wait for them
    Cache {
        /// Input HDF5 file
        input: PathBuf,

        /// Datasets to cache
        #[arg(required = true)]
        datasets: Vec<String>,

        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Find the coordinate index closest to a value
    Nearest {
        /// Input HDF5 file
        input: PathBuf,

        /// 1D coordinate dataset
        coords: String,

        value: f64,
    },
}

/// Summary line for a 2D grid.
fn stats_line(grid: &Array2<f64>) -> String {
    let (rows, cols) = grid.dim();
    let min = grid.iter().copied().fold(f64::INFINITY, f64::min);
    let max = grid.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = grid.mean().unwrap_or(0.0);
    format!(
        "shape: {}x{}  min: {:.6}  max: {:.6}  mean: {:.6}",
        rows, cols, min, max, mean
    )
}

fn open_session(config: SessionConfig) -> Result<Session> {
    let status = StatusReporter::new(|msg| eprintln!("{msg}"));
    Ok(Session::open(config, status)?)
}

/// Waits for a build, reporting a non-ready outcome on stderr.
fn await_cache(handle: &volscope_io::CacheHandle) -> CacheState {
    let state = handle.wait();
    if state != CacheState::Ready {
        eprintln!(
            "{}: cache {:?} ({}); reading directly",
            handle.path(),
            state,
            handle.failure().unwrap_or_default()
        );
    }
    state
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::List { input, rank, json } => {
            let session = open_session(SessionConfig::new(&input))?;
            let datasets = match rank {
                Some(rank) => session.list_datasets(rank)?,
                None => session.list_all()?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&*datasets)?);
            } else {
                for descriptor in datasets.iter() {
                    println!("{:<48} {:?}", descriptor.path, descriptor.shape);
                }
                eprintln!("{} dataset(s)", datasets.len());
            }
        }

        Commands::Slice {
            input,
            dataset,
            x,
            y,
            cached,
            cache,
        } => {
            let session = open_session(cache.session_config(&input)?)?;
            if cached {
                await_cache(&session.trigger_build(&dataset));
            }

            let start = Instant::now();
            let slice = session.get_slice(&dataset, x, y)?;
            log::debug!("slice read in {:.2?}", start.elapsed());

            println!("shape: {:?}", slice.shape());
            println!("{}", serde_json::to_string(&slice.iter().collect::<Vec<_>>())?);
        }

        Commands::Preview {
            input,
            shape,
            single,
            ratio,
        } => {
            let session = open_session(SessionConfig::new(&input))?;
            let map_shape = (shape[0], shape[1]);
            let grid = match (single, ratio) {
                (Some(path), _) => session.compute_single(&path, map_shape)?,
                (None, Some(pair)) => session.compute_ratio(&pair[0], &pair[1], map_shape)?,
                (None, None) => {
                    return Err(volscope_core::Error::InvalidSelection(
                        "either --single or --ratio is required".to_string(),
                    )
                    .into())
                }
            };
            println!("{}", stats_line(&grid));
        }

        Commands::Sum {
            input,
            dataset,
            cache,
        } => {
            let session = open_session(cache.session_config(&input)?)?;
            let start = Instant::now();
            let map = session.sum_map(&dataset)?;
            println!("{}", stats_line(&map));
            eprintln!("summed in {:.2}s", start.elapsed().as_secs_f64());
        }

        Commands::Cache {
            input,
            datasets,
            cache,
        } => {
            let session = open_session(cache.session_config(&input)?)?;
            let start = Instant::now();
            let handles: Vec<_> = datasets
                .iter()
                .map(|path| session.trigger_build(path))
                .collect();

            let mut failed = Vec::new();
            for handle in &handles {
                match await_cache(handle) {
                    CacheState::Ready => println!("{}: ready", handle.path()),
                    state => {
                        println!("{}: {:?}", handle.path(), state);
                        failed.push(handle.path().to_string());
                    }
                }
            }
            eprintln!(
                "{} of {} cache(s) ready in {:.2}s",
                handles.len() - failed.len(),
                handles.len(),
                start.elapsed().as_secs_f64()
            );
            if !failed.is_empty() {
                return Err(CliError::CacheFailed(failed));
            }
        }

        Commands::Nearest {
            input,
            coords,
            value,
        } => {
            let session = open_session(SessionConfig::new(&input))?;
            let index = session.nearest_in(&coords, value)?;
            println!("{index}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::{tempdir, NamedTempFile, TempDir};

    fn source() -> NamedTempFile {
        let tmp = NamedTempFile::new().unwrap();
        let file = hdf5::File::create(tmp.path()).unwrap();
        let volume = Array3::from_shape_fn((2, 2, 3), |(a, b, c)| (a * 6 + b * 3 + c) as i32);
        file.new_dataset::<i32>()
            .shape((2, 2, 3))
            .create("counts")
            .unwrap()
            .write(volume.view())
            .unwrap();
        tmp
    }

    fn no_cast(dir: &TempDir) -> CacheArgs {
        CacheArgs {
            cache_dir: Some(dir.path().to_path_buf()),
            no_cast: true,
            slab_mb: None,
        }
    }

    #[test]
    fn test_cached_slice_survives_failed_build() {
        let src = source();
        let dir = tempdir().unwrap();
        let result = run(Commands::Slice {
            input: src.path().to_path_buf(),
            dataset: "counts".to_string(),
            x: 1,
            y: 1,
            cached: true,
            cache: no_cast(&dir),
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_cache_command_reports_failures() {
        let src = source();
        let dir = tempdir().unwrap();
        let result = run(Commands::Cache {
            input: src.path().to_path_buf(),
            datasets: vec!["counts".to_string(), "missing".to_string()],
            cache: no_cast(&dir),
        });
        match result {
            Err(CliError::CacheFailed(paths)) => assert_eq!(paths, ["/counts", "/missing"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_cache_command_succeeds_when_ready() {
        let src = source();
        let dir = tempdir().unwrap();
        let result = run(Commands::Cache {
            input: src.path().to_path_buf(),
            datasets: vec!["counts".to_string()],
            cache: CacheArgs {
                no_cast: false,
                ..no_cast(&dir)
            },
        });
        assert!(result.is_ok());
    }
}
