//! Top-level coordination across recording volumes.
//!
//! The [`Orchestrator`] discovers eligible volumes once, starts one
//! [`SessionRecorder`] per volume for each session, and deals incoming
//! records to them in strict round-robin order.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blackbox::{Orchestrator, Record, RecorderConfig, StaticVolumes, WriteOutcome};
//!
//! # fn main() -> blackbox::Result<()> {
//! let config = RecorderConfig::load("blackbox.json")?;
//! let source = Arc::new(StaticVolumes::new(config.volumes.clone()));
//! let labels = config.accepted_labels.clone();
//!
//! let mut orchestrator = Orchestrator::new(config, source);
//! orchestrator.init_disks(&labels, Arc::new(|volume: &str, outcome: WriteOutcome| {
//!     println!("{volume}: {outcome}");
//! }));
//! orchestrator.start_session()?;
//! orchestrator.handle_data(Record::new(vec![1, 2, 3]), 64)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;

use crate::config::RecorderConfig;
use crate::error::{OrchestratorError, RecorderError, Result, VolumeError};
use crate::log_sink::LogSink;
use crate::record::{CompletionFn, Record, WriteOutcome};
use crate::recorder::SessionRecorder;
use crate::sidecar::SidecarKind;
use crate::volume::{Volume, VolumeSource};

/// Active recorders and the round-robin cursor, guarded together.
#[derive(Default)]
struct Pool {
    recorders: Vec<Arc<SessionRecorder>>,
    /// Index of the recorder that receives the next record. Always
    /// `< recorders.len()` unless the pool is empty.
    cursor: usize,
}

/// Counters owned by one orchestrator.
#[derive(Debug, Default)]
struct Stats {
    files: AtomicU64,
    per_volume: Mutex<BTreeMap<String, u64>>,
    sessions: AtomicU64,
}

impl Stats {
    fn written_frame(&self, volume: &str, outcome: WriteOutcome) {
        if outcome.is_written() {
            self.files.fetch_add(1, Ordering::Relaxed);
            *lock(&self.per_volume).entry(volume.to_string()).or_insert(0) += 1;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coordinates session recorders across all accepted volumes.
pub struct Orchestrator {
    config: RecorderConfig,
    source: Arc<dyn VolumeSource>,
    log_sink: Option<Arc<dyn LogSink>>,
    volumes: Vec<Volume>,
    on_frame_written: Option<CompletionFn>,
    pool: Mutex<Pool>,
    stats: Arc<Stats>,
}

impl Orchestrator {
    /// Creates an orchestrator with no volumes.
    pub fn new(config: RecorderConfig, source: Arc<dyn VolumeSource>) -> Self {
        Self {
            config,
            source,
            log_sink: None,
            volumes: Vec::new(),
            on_frame_written: None,
            pool: Mutex::new(Pool::default()),
            stats: Arc::new(Stats::default()),
        }
    }

    /// Mirrors log lines into every session's log sidecar.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Volumes accepted by the last [`init_disks`](Self::init_disks).
    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    /// Discovers volumes eligible for recording.
    ///
    /// A volume is accepted when its label is in `accepted_labels`, its
    /// mount point resolves, and its capacity is at least the per-volume
    /// budget. Its reserve is `capacity - budget`. Volumes that fail any
    /// check are logged and skipped. `on_frame_written` receives every
    /// write outcome of later sessions.
    ///
    /// Ends any running session. Returns the number of accepted volumes.
    pub fn init_disks(&mut self, accepted_labels: &[String], on_frame_written: CompletionFn) -> usize {
        self.end_session();
        self.volumes.clear();
        self.on_frame_written = Some(on_frame_written);

        let ids = match self.source.fixed_volumes() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("volume enumeration failed: {e}");
                return 0;
            }
        };

        for id in ids {
            match self.inspect_volume(&id, accepted_labels) {
                Ok(Some(volume)) => {
                    tracing::info!(
                        volume = %volume.id,
                        label = %volume.label,
                        mount_point = %volume.mount_point.display(),
                        capacity = volume.capacity,
                        reserve = volume.reserve,
                        "volume accepted"
                    );
                    self.volumes.push(volume);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("{e}"),
            }
        }

        self.volumes.sort_by(|a, b| a.id.cmp(&b.id));
        if self.volumes.is_empty() {
            tracing::error!(labels = ?accepted_labels, "no volume qualifies for recording");
        }
        self.volumes.len()
    }

    /// Checks one volume. `Ok(None)` means its label is not accepted.
    fn inspect_volume(&self, id: &str, accepted_labels: &[String]) -> Result<Option<Volume>> {
        let unavailable = |reason: String| VolumeError::Unavailable {
            volume: id.to_string(),
            reason,
        };

        let label = self
            .source
            .label(id)
            .map_err(|e| unavailable(format!("label: {e}")))?;
        if !accepted_labels.contains(&label) {
            tracing::debug!(volume = id, label = %label, "label not accepted");
            return Ok(None);
        }

        let mount_point = self
            .source
            .mount_point(id)
            .map_err(|e| unavailable(format!("mount point: {e}")))?;
        let space = self
            .source
            .space(&mount_point)
            .map_err(|e| unavailable(format!("space query: {e}")))?;

        let budget = self.config.max_data_size;
        if space.capacity < budget {
            return Err(VolumeError::InsufficientCapacity {
                volume: id.to_string(),
                capacity: space.capacity,
                required: budget,
            }
            .into());
        }

        Ok(Some(Volume {
            id: id.to_string(),
            label,
            mount_point,
            capacity: space.capacity,
            reserve: space.capacity - budget,
        }))
    }

    /// Starts a new session on every accepted volume.
    ///
    /// The previous session's recorders are stopped first, finishing their
    /// queued records. All recorders share one session name
    /// (`<folder_name>_<YYYY-MM-DD_HH.MM.SS>`); a recorder that fails to
    /// initialize is left out of the pool. Returns the number of active
    /// recorders.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NoVolumes`] before a successful [`init_disks`](Self::init_disks)
    /// - [`OrchestratorError::NoActiveRecorders`] if every recorder failed
    pub fn start_session(&self) -> Result<usize> {
        if self.volumes.is_empty() {
            return Err(OrchestratorError::NoVolumes.into());
        }
        self.end_session();

        let stamp = Local::now().format("%Y-%m-%d_%H.%M.%S").to_string();
        let prefix = self.config.legal_template();
        let hook = self.completion_hook();

        let mut recorders = Vec::with_capacity(self.volumes.len());
        for volume in &self.volumes {
            let mut recorder =
                SessionRecorder::new(&volume.id, self.config.recording_root(&volume.mount_point))
                    .with_frame_extension(&self.config.frame_extension)
                    .with_reclaim(self.config.reclaim);
            if let Some(sink) = &self.log_sink {
                recorder = recorder.with_log_sink(Arc::clone(sink));
            }

            match recorder.init(&prefix, &stamp, Arc::clone(&hook), self.config.max_data_size) {
                Ok(()) => recorders.push(Arc::new(recorder)),
                Err(e) => tracing::warn!(volume = %volume.id, "volume left out of session: {e}"),
            }
        }

        if recorders.is_empty() {
            return Err(OrchestratorError::NoActiveRecorders {
                attempted: self.volumes.len(),
            }
            .into());
        }

        let active = recorders.len();
        {
            let mut pool = lock(&self.pool);
            pool.recorders = recorders;
            pool.cursor = 0;
        }
        let session = self.stats.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(session, stamp = %stamp, active, "session started");
        Ok(active)
    }

    /// Stops every recorder after it has written its queued records.
    /// No-op when no session is running.
    ///
    /// Blocks until every backlog is on disk. With `max_queue_size = 0` the
    /// backlog is unbounded, so a slow volume can hold this call (and
    /// [`start_session`](Self::start_session)) for a long time.
    pub fn end_session(&self) {
        let recorders = {
            let mut pool = lock(&self.pool);
            pool.cursor = 0;
            std::mem::take(&mut pool.recorders)
        };
        if !recorders.is_empty() {
            let backlog: usize = recorders.iter().map(|r| r.pending()).sum();
            tracing::info!(count = recorders.len(), backlog, "stopping session recorders");
        }
        // Dropping the last handle joins each consumer thread, outside the pool lock.
        drop(recorders);
    }

    fn completion_hook(&self) -> CompletionFn {
        let stats = Arc::clone(&self.stats);
        let external = self.on_frame_written.clone();
        Arc::new(move |volume: &str, outcome: WriteOutcome| {
            stats.written_frame(volume, outcome);
            if let Some(callback) = &external {
                callback(volume, outcome);
            }
        })
    }

    /// Hands `record` to the recorder under the cursor, then advances the
    /// cursor (wrapping). The record is written asynchronously; its outcome
    /// arrives through the completion callback.
    ///
    /// Empty records are refused before the cursor is touched. A record the
    /// recorder's full queue refuses still consumes its slot.
    ///
    /// # Errors
    ///
    /// - [`RecorderError::EmptyPayload`] for an empty record
    /// - [`OrchestratorError::NoSession`] if no session is running
    /// - [`QueueError::Rejected`](crate::error::QueueError::Rejected) when the chosen queue is full
    pub fn handle_data(&self, record: Record, max_queue_size: usize) -> Result<()> {
        if record.is_empty() {
            return Err(RecorderError::EmptyPayload.into());
        }
        let mut pool = lock(&self.pool);
        if pool.recorders.is_empty() {
            return Err(OrchestratorError::NoSession.into());
        }
        let index = pool.cursor;
        pool.cursor = (index + 1) % pool.recorders.len();
        pool.recorders[index].handle_data(record, max_queue_size)
    }

    /// Appends `text` to the `kind` sidecar of every active recorder.
    /// Returns how many recorders wrote it; failures are logged.
    pub fn write_to_file(&self, kind: SidecarKind, text: &str) -> usize {
        let mut written = 0;
        for recorder in self.recorders() {
            match recorder.write_file(kind, text) {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(volume = recorder.volume(), "{e}"),
            }
        }
        written
    }

    /// Free recording space per volume: `max(0, available - reserve)`.
    /// A volume whose space cannot be queried reports 0.
    pub fn free_space(&self) -> BTreeMap<String, u64> {
        self.volumes
            .iter()
            .map(|volume| {
                let free = match self.source.space(&volume.mount_point) {
                    Ok(space) => volume.usable(space.available),
                    Err(e) => {
                        tracing::warn!(volume = %volume.id, "space query failed: {e}");
                        0
                    }
                };
                (volume.id.clone(), free)
            })
            .collect()
    }

    /// Sum of [`free_space`](Self::free_space) over all volumes.
    pub fn free_recorder_size(&self) -> u64 {
        self.free_space()
            .values()
            .fold(0u64, |total, free| total.saturating_add(*free))
    }

    /// Frames written successfully by this orchestrator, across sessions.
    pub fn file_count(&self) -> u64 {
        self.stats.files.load(Ordering::Relaxed)
    }

    /// Frames written successfully, per volume.
    pub fn volume_file_counts(&self) -> BTreeMap<String, u64> {
        lock(&self.stats.per_volume).clone()
    }

    /// Sessions started by this orchestrator.
    pub fn session_count(&self) -> u64 {
        self.stats.sessions.load(Ordering::Relaxed)
    }

    /// Volumes of the active recorders, in round-robin order.
    pub fn active_volumes(&self) -> Vec<String> {
        self.recorders()
            .iter()
            .map(|r| r.volume().to_string())
            .collect()
    }

    /// Asks the recorder on `volume` to free `required` bytes; see
    /// [`SessionRecorder::free_frame_data`]. Returns the bytes reclaimed.
    ///
    /// # Errors
    ///
    /// [`VolumeError::UnknownVolume`] if no active recorder uses `volume`.
    pub fn reclaim(&self, volume: &str, required: u64) -> Result<u64> {
        let recorder = self.recorder(volume)?;
        recorder.free_frame_data(required)
    }

    /// Stops the recorder on `volume` and removes it from the pool. The
    /// cursor keeps pointing at the recorder that was next in line.
    ///
    /// # Errors
    ///
    /// [`VolumeError::UnknownVolume`] if no active recorder uses `volume`.
    pub fn detach(&self, volume: &str) -> Result<()> {
        let removed = {
            let mut pool = lock(&self.pool);
            let index = pool
                .recorders
                .iter()
                .position(|r| r.volume() == volume)
                .ok_or_else(|| VolumeError::UnknownVolume {
                    volume: volume.to_string(),
                })?;
            let removed = pool.recorders.remove(index);
            if index < pool.cursor {
                pool.cursor -= 1;
            }
            if pool.cursor >= pool.recorders.len() {
                pool.cursor = 0;
            }
            removed
        };
        tracing::info!(volume, "recorder detached");
        drop(removed);
        Ok(())
    }

    fn recorders(&self) -> Vec<Arc<SessionRecorder>> {
        lock(&self.pool).recorders.clone()
    }

    fn recorder(&self, volume: &str) -> Result<Arc<SessionRecorder>> {
        lock(&self.pool)
            .recorders
            .iter()
            .find(|r| r.volume() == volume)
            .cloned()
            .ok_or_else(|| {
                VolumeError::UnknownVolume {
                    volume: volume.to_string(),
                }
                .into()
            })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.end_session();
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("volumes", &self.volumes)
            .field("active", &self.active_volumes())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
