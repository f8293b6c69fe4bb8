//! End-to-end cache behaviour through the session facade.

use ndarray::{s, Array2, Array4};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::{tempdir, NamedTempFile, TempDir};
use volscope_core::{CacheConfig, Selection, SessionConfig};
use volscope_io::{CacheState, Error, Session, StatusReporter};

type Messages = Arc<Mutex<Vec<String>>>;

fn frames() -> Array4<f32> {
    Array4::from_shape_fn((4, 4, 8, 8), |(a, b, c, d)| {
        ((a * 4 + b) as f32).sqrt() + (c as f32) * 0.1 - (d as f32) / 3.0
    })
}

fn write_source() -> NamedTempFile {
    let source = NamedTempFile::new().unwrap();
    let file = hdf5::File::create(source.path()).unwrap();
    let scan = file.create_group("scan").unwrap();
    scan.new_dataset::<f32>()
        .shape((4, 4, 8, 8))
        .chunk((1, 4, 8, 8))
        .deflate(6)
        .create("frames")
        .unwrap()
        .write(frames().view())
        .unwrap();
    scan.new_dataset::<i16>()
        .shape((4, 4, 8, 8))
        .create("counts")
        .unwrap()
        .write(frames().mapv(|v| (v * 10.0) as i16).view())
        .unwrap();
    scan.new_dataset::<f64>()
        .shape((4, 4))
        .create("intensity")
        .unwrap()
        .write(&Array2::<f64>::from_elem((4, 4), 2.5))
        .unwrap();
    source
}

fn open(source: &Path, cache_dir: &TempDir, cast: bool) -> (Session, Messages) {
    let messages: Messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let config = SessionConfig::new(source).with_cache(
        CacheConfig::default()
            .with_cache_dir(cache_dir.path())
            .with_cast_to_f32(cast)
            .with_slab_budget_bytes(4096),
    );
    let session = Session::open(
        config,
        StatusReporter::new(move |msg| sink.lock().unwrap().push(msg.to_string())),
    )
    .unwrap();
    (session, messages)
}

fn count(messages: &Messages, prefix: &str) -> usize {
    messages
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m.starts_with(prefix))
        .count()
}

#[test]
fn concurrent_triggers_build_once_and_match_direct_reads() {
    let source = write_source();
    let cache_dir = tempdir().unwrap();
    let (session, messages) = open(source.path(), &cache_dir, true);

    let direct: Vec<_> = (0..16)
        .map(|i| session.get_slice("scan/frames", i / 4, i % 4).unwrap())
        .collect();

    let session = Arc::new(session);
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let session = Arc::clone(&session);
            thread::spawn(move || session.trigger_build("/scan/frames/").wait())
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join().unwrap(), CacheState::Ready);
    }
    assert_eq!(count(&messages, "Building memmap cache for /scan/frames"), 1);
    assert_eq!(count(&messages, "Memmap cache ready for /scan/frames"), 1);

    let expected = frames();
    for (i, before) in direct.iter().enumerate() {
        let cached = session.get_slice("scan/frames", i / 4, i % 4).unwrap();
        assert_eq!(cached.shape(), &[8, 8]);
        let bits = |a: &ndarray::ArrayD<f32>| a.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&cached), bits(before));
        assert_eq!(cached, expected.slice(s![i / 4, i % 4, .., ..]).into_dyn());
    }

    let files: Vec<_> = std::fs::read_dir(cache_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with(".f32"));
}

#[test]
fn second_session_reuses_cache_file() {
    let source = write_source();
    let cache_dir = tempdir().unwrap();

    let (first, _) = open(source.path(), &cache_dir, true);
    assert_eq!(first.trigger_build("scan/frames").wait(), CacheState::Ready);
    let summed = first.sum_map("scan/frames").unwrap();
    drop(first);

    let (second, messages) = open(source.path(), &cache_dir, true);
    assert_eq!(second.cache_state("scan/frames"), CacheState::NotStarted);
    let handle = second.trigger_build("scan/frames");
    assert_eq!(handle.state(), CacheState::Ready);
    assert_eq!(count(&messages, "Reusing memmap cache for /scan/frames"), 1);
    assert_eq!(count(&messages, "Building"), 0);
    assert_eq!(second.sum_map("scan/frames").unwrap(), summed);
}

#[test]
fn failed_build_falls_back_to_direct_reads() {
    let source = write_source();
    let cache_dir = tempdir().unwrap();
    let (session, messages) = open(source.path(), &cache_dir, false);

    let handle = session.trigger_build("scan/counts");
    assert_eq!(handle.wait(), CacheState::Failed);
    assert!(handle.failure().unwrap().contains("casting is disabled"));
    assert_eq!(count(&messages, "cache build failed for /scan/counts"), 1);

    // no retry within the session
    assert_eq!(session.trigger_build("scan/counts").state(), CacheState::Failed);
    assert_eq!(count(&messages, "Building memmap cache for /scan/counts"), 1);

    let slice = session.get_slice("scan/counts", 3, 3).unwrap();
    assert_eq!(slice.shape(), &[8, 8]);

    // metadata failures never raise
    let missing = session.trigger_build("scan/nothing");
    assert_eq!(missing.state(), CacheState::Failed);
    assert!(matches!(
        session.get_slice("scan/nothing", 0, 0),
        Err(Error::DatasetNotFound(_))
    ));
}

#[test]
fn selection_triggers_primary_build() {
    let source = write_source();
    let cache_dir = tempdir().unwrap();
    let (session, _) = open(source.path(), &cache_dir, true);

    let selection = Selection::builder()
        .primary_volume("scan/frames")
        .secondary_volume("scan/counts")
        .single("scan/intensity")
        .build()
        .unwrap();
    let loaded = session.load_selection(&selection, (4, 4)).unwrap();

    // constant input normalizes to zeros
    assert!(loaded.preview.iter().all(|&v| v == 0.0));
    assert_eq!(loaded.primary.wait(), CacheState::Ready);
    assert_eq!(
        loaded.secondary.map(|h| h.wait()),
        Some(CacheState::Ready)
    );
}
