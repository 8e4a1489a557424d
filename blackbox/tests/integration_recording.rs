//! Integration tests for the full recording flow.
//!
//! These tests drive the orchestrator the way a producer would: discover
//! volumes, start a session, feed records, then inspect what landed on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blackbox::volume::{SpaceInfo, VolumeEntry};
use blackbox::{
    CompletionFn, LogHub, Orchestrator, ReclaimPolicy, Record, RecorderConfig, SidecarKind,
    StaticVolumes, VolumeSource, WriteOutcome,
};
use tempfile::{TempDir, tempdir};
use tracing_subscriber::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

/// Volume source over temporary directories with a fixed capacity.
struct TempVolumes {
    dirs: Vec<(String, TempDir)>,
    capacity: u64,
}

impl TempVolumes {
    fn new(count: usize, capacity: u64) -> Self {
        let dirs = (0..count)
            .map(|i| (format!("vol{i}"), tempdir().unwrap()))
            .collect();
        Self { dirs, capacity }
    }

    fn path(&self, volume: &str) -> &Path {
        self.dirs
            .iter()
            .find(|(id, _)| id == volume)
            .map(|(_, dir)| dir.path())
            .unwrap()
    }
}

impl VolumeSource for TempVolumes {
    fn fixed_volumes(&self) -> io::Result<Vec<String>> {
        Ok(self.dirs.iter().map(|(id, _)| id.clone()).collect())
    }

    fn label(&self, _volume: &str) -> io::Result<String> {
        Ok("REC".to_string())
    }

    fn mount_point(&self, volume: &str) -> io::Result<PathBuf> {
        self.dirs
            .iter()
            .find(|(id, _)| id == volume)
            .map(|(_, dir)| dir.path().to_path_buf())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn space(&self, _path: &Path) -> io::Result<SpaceInfo> {
        Ok(SpaceInfo {
            capacity: self.capacity,
            available: self.capacity,
        })
    }
}

fn budget(max_data_size: u64) -> RecorderConfig {
    RecorderConfig {
        max_data_size,
        ..RecorderConfig::default()
    }
}

fn labels() -> Vec<String> {
    vec!["REC".to_string()]
}

fn channel() -> (CompletionFn, mpsc::Receiver<(String, WriteOutcome)>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback: CompletionFn = Arc::new(move |volume: &str, outcome: WriteOutcome| {
        let _ = tx.lock().unwrap().send((volume.to_string(), outcome));
    });
    (callback, rx)
}

/// Single session folder under `root`.
fn session_folder(root: &Path) -> PathBuf {
    let mut sessions: Vec<PathBuf> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir() && p.file_name().unwrap().to_string_lossy().starts_with("Session_"))
        .collect();
    sessions.sort();
    sessions.pop().unwrap()
}

/// Frame files of a session folder, in counter order.
fn frames(folder: &Path) -> Vec<PathBuf> {
    let mut frames: Vec<PathBuf> = fs::read_dir(folder)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "dat"))
        .collect();
    frames.sort();
    frames
}

fn orchestrator(
    volumes: &Arc<TempVolumes>,
    config: RecorderConfig,
    callback: CompletionFn,
) -> Orchestrator {
    let source: Arc<dyn VolumeSource> = volumes.clone();
    let mut orchestrator = Orchestrator::new(config, source);
    let accepted = orchestrator.init_disks(&labels(), callback);
    assert_eq!(accepted, volumes.dirs.len());
    orchestrator
}

#[test]
fn test_records_are_dealt_round_robin() {
    let volumes = Arc::new(TempVolumes::new(3, 1_000_000));
    let (callback, rx) = channel();
    let orchestrator = orchestrator(&volumes, budget(10_000), callback);
    orchestrator.start_session().unwrap();

    for i in 0..12u8 {
        orchestrator.handle_data(Record::new(vec![i]), 0).unwrap();
    }
    for _ in 0..12 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, WriteOutcome::Written);
    }
    orchestrator.end_session();

    for (n, volume) in ["vol0", "vol1", "vol2"].iter().enumerate() {
        let payloads: Vec<u8> = frames(&session_folder(volumes.path(volume)))
            .iter()
            .map(|p| fs::read(p).unwrap()[0])
            .collect();
        let expected: Vec<u8> = (0..12u8).filter(|i| usize::from(*i) % 3 == n).collect();
        assert_eq!(payloads, expected, "volume {volume}");
    }
    assert_eq!(orchestrator.file_count(), 12);
}

#[test]
fn test_two_volumes_fill_their_budgets() {
    let volumes = Arc::new(TempVolumes::new(2, 1_000_000));
    let (callback, rx) = channel();
    let orchestrator = orchestrator(&volumes, budget(1000), callback);
    orchestrator.start_session().unwrap();

    for _ in 0..30 {
        orchestrator.handle_data(Record::new(vec![7; 100]), 0).unwrap();
    }

    let mut per_volume: BTreeMap<String, Vec<WriteOutcome>> = BTreeMap::new();
    for _ in 0..30 {
        let (volume, outcome) = rx.recv_timeout(WAIT).unwrap();
        per_volume.entry(volume).or_default().push(outcome);
    }

    for volume in ["vol0", "vol1"] {
        let outcomes = &per_volume[volume];
        assert_eq!(outcomes.len(), 15);
        assert!(outcomes[..10].iter().all(|o| *o == WriteOutcome::Written));
        assert!(outcomes[10..].iter().all(|o| *o == WriteOutcome::CapacityExceeded));

        let written: u64 = frames(&session_folder(volumes.path(volume)))
            .iter()
            .map(|p| fs::metadata(p).unwrap().len())
            .sum();
        assert_eq!(written, 1000);
    }
    assert_eq!(orchestrator.file_count(), 20);
}

#[test]
fn test_reclaim_engages_circular_mode() {
    let volumes = Arc::new(TempVolumes::new(1, 1_000_000));
    let (callback, rx) = channel();
    let orchestrator = orchestrator(&volumes, budget(500), callback);
    orchestrator.start_session().unwrap();

    for _ in 0..5 {
        orchestrator.handle_data(Record::new(vec![1; 100]), 0).unwrap();
    }
    for _ in 0..5 {
        rx.recv_timeout(WAIT).unwrap();
    }

    assert_eq!(orchestrator.reclaim("vol0", 10_000).unwrap(), 0);

    for _ in 0..13 {
        orchestrator.handle_data(Record::new(vec![2; 100]), 0).unwrap();
    }
    for _ in 0..13 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, WriteOutcome::Written);
    }

    let frames = frames(&session_folder(volumes.path("vol0")));
    assert_eq!(frames.len(), 5);
    // Counters 1..=5 were all overwritten by the second batch.
    assert!(frames.iter().all(|p| fs::read(p).unwrap()[0] == 2));
}

#[test]
fn test_automatic_reclaim_frees_old_data() {
    let volumes = Arc::new(TempVolumes::new(1, 1_000_000));
    let root = volumes.path("vol0").to_path_buf();
    fs::create_dir(root.join("misc")).unwrap();
    fs::write(root.join("misc/notes.bin"), vec![0u8; 200]).unwrap();
    fs::create_dir(root.join("Session_2000-01-01_00.00.00")).unwrap();
    fs::write(root.join("Session_2000-01-01_00.00.00/000001.dat"), vec![0u8; 500]).unwrap();

    let (callback, rx) = channel();
    let config = RecorderConfig {
        reclaim: ReclaimPolicy::OnCapacityExceeded,
        ..budget(1000)
    };
    let orchestrator = orchestrator(&volumes, config, callback);
    orchestrator.start_session().unwrap();

    for _ in 0..10 {
        orchestrator.handle_data(Record::new(vec![3; 100]), 0).unwrap();
    }
    for _ in 0..10 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap().1, WriteOutcome::Written);
    }

    assert!(!root.join("misc").exists());
    assert!(!root.join("Session_2000-01-01_00.00.00").exists());
    assert_eq!(frames(&session_folder(&root)).len(), 10);
}

#[test]
fn test_log_lines_reach_every_session_folder() {
    let volumes = Arc::new(TempVolumes::new(2, 1_000_000));
    let (callback, _rx) = channel();
    let hub = LogHub::new();

    let source: Arc<dyn VolumeSource> = volumes.clone();
    let mut orchestrator = Orchestrator::new(budget(1000), source)
        .with_log_sink(Arc::new(hub.clone()));
    orchestrator.init_disks(&labels(), callback);
    orchestrator.start_session().unwrap();

    let subscriber = tracing_subscriber::registry().with(hub.clone());
    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(lap = 3, "lap complete");
    });
    assert_eq!(orchestrator.write_to_file(SidecarKind::Log, "finish line"), 2);
    orchestrator.end_session();
    assert_eq!(hub.subscriber_count(), 0);

    for volume in ["vol0", "vol1"] {
        let folder = session_folder(volumes.path(volume));
        let log = fs::read_dir(&folder)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("log_"))
            .unwrap();
        let text = fs::read_to_string(log).unwrap();
        assert!(text.contains("lap complete"), "{text}");
        assert!(text.contains("lap=3"), "{text}");
        assert!(text.ends_with("finish line\n"), "{text}");
    }
}

#[test]
fn test_static_volumes_exclusion() {
    let accepted = tempdir().unwrap();
    let rejected = tempdir().unwrap();
    let source = StaticVolumes::new(vec![
        VolumeEntry {
            id: "rec".to_string(),
            label: "REC".to_string(),
            mount_point: accepted.path().to_path_buf(),
        },
        VolumeEntry {
            id: "scratch".to_string(),
            label: "SCRATCH".to_string(),
            mount_point: rejected.path().to_path_buf(),
        },
        VolumeEntry {
            id: "gone".to_string(),
            label: "REC".to_string(),
            mount_point: accepted.path().join("unplugged"),
        },
    ]);
    let (callback, _rx) = channel();

    let mut orchestrator = Orchestrator::new(budget(1), Arc::new(source.clone()));
    assert_eq!(orchestrator.init_disks(&labels(), Arc::clone(&callback)), 1);
    assert_eq!(orchestrator.volumes()[0].id, "rec");

    let free = orchestrator.free_space();
    assert_eq!(free.len(), 1);
    assert!(free["rec"] <= orchestrator.volumes()[0].capacity);

    // No real disk is this large.
    let mut orchestrator = Orchestrator::new(budget(u64::MAX), Arc::new(source));
    assert_eq!(orchestrator.init_disks(&labels(), callback), 0);
    assert!(orchestrator.start_session().is_err());
}
