//! Per-volume session recorder.
//!
//! A [`SessionRecorder`] persists one session's records on one volume. It
//! owns a [`WorkQueue`] whose consumer thread is the only code touching that
//! volume's frame files, a [`FolderLedger`] for eviction, and the session's
//! sidecar files.
//!
//! # Session layout
//!
//! ```text
//! <recording root>/
//! ├── <prefix><start stamp>/           <- current session (protected)
//! │   ├── log_<start stamp>.txt        <- log sidecar, append mode
//! │   ├── 000001_<record stamp>.<ext>  <- one file per frame
//! │   └── ...
//! ├── <prefix><older stamp>/           <- older sessions, evicted oldest first
//! └── <anything else>/                 <- reclaimed first
//! ```
//!
//! # Budget
//!
//! A record is written only if it keeps the session within `max_data_size`;
//! otherwise it is skipped whole and reported as
//! [`WriteOutcome::CapacityExceeded`].
//!
//! # Circular mode
//!
//! When [`free_frame_data`](SessionRecorder::free_frame_data) cannot free
//! the requested space, the frame counter gets a permanent ceiling `K` (its
//! value at that moment). From then on counters cycle through `1..=K`, and
//! writing counter `c` first deletes the frame previously stored under `c`,
//! so at most `K` frames exist.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::ReclaimPolicy;
use crate::error::{RecorderError, Result};
use crate::ledger::{FolderLedger, remove_folder};
use crate::log_sink::LogSink;
use crate::queue::{OverflowPolicy, WorkHandler, WorkQueue};
use crate::record::{CompletionFn, Record, WriteOutcome};
use crate::sidecar::{Sidecar, SidecarKind};

type SidecarMap = Arc<Mutex<BTreeMap<SidecarKind, Sidecar>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Persists one session's records on one volume.
pub struct SessionRecorder {
    /// Volume identifier reported to the completion callback.
    volume: String,
    /// Recording root on the volume.
    root: PathBuf,
    frame_extension: String,
    reclaim: ReclaimPolicy,
    log_sink: Option<Arc<dyn LogSink>>,
    /// Name under which this recorder is subscribed to the log sink.
    subscription: Option<String>,
    sidecars: SidecarMap,
    session: Option<ActiveSession>,
}

/// Everything that lives exactly as long as one session.
struct ActiveSession {
    folder: PathBuf,
    writer: Arc<FrameWriter>,
    queue: WorkQueue<Record>,
}

impl SessionRecorder {
    /// Creates an idle recorder for `volume`, recording below `root`.
    pub fn new(volume: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            volume: volume.into(),
            root: root.into(),
            frame_extension: crate::config::DEFAULT_FRAME_EXTENSION.to_string(),
            reclaim: ReclaimPolicy::Manual,
            log_sink: None,
            subscription: None,
            sidecars: Arc::new(Mutex::new(BTreeMap::new())),
            session: None,
        }
    }

    /// Sets the frame file extension (without the dot).
    pub fn with_frame_extension(mut self, extension: impl Into<String>) -> Self {
        self.frame_extension = extension.into();
        self
    }

    /// Sets the reclamation policy.
    pub fn with_reclaim(mut self, reclaim: ReclaimPolicy) -> Self {
        self.reclaim = reclaim;
        self
    }

    /// Mirrors log lines from `sink` into the session's log sidecar.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Starts a session.
    ///
    /// Stops any previous session, creates the folder
    /// `<folder_prefix><start_stamp>` through the ledger (folders containing
    /// `folder_prefix` count as legal), opens the log sidecar in append mode,
    /// subscribes to the log sink, and starts the consumer thread. On failure
    /// the recorder is left idle.
    ///
    /// # Errors
    ///
    /// Ledger, sidecar, or thread-spawn errors.
    pub fn init(
        &mut self,
        folder_prefix: &str,
        start_stamp: &str,
        on_written: CompletionFn,
        max_data_size: u64,
    ) -> Result<()> {
        self.shutdown();

        let result = self.start_session(folder_prefix, start_stamp, on_written, max_data_size);
        if let Err(e) = &result {
            tracing::error!(
                volume = %self.volume,
                root = %self.root.display(),
                "session recorder init failed: {e}"
            );
            self.shutdown();
        }
        result
    }

    fn start_session(
        &mut self,
        folder_prefix: &str,
        start_stamp: &str,
        on_written: CompletionFn,
        max_data_size: u64,
    ) -> Result<()> {
        let folder_name = format!("{folder_prefix}{start_stamp}");
        let ledger = FolderLedger::open(&self.root, &folder_name, folder_prefix)?;
        let folder = ledger.current_folder().to_path_buf();

        let log_path = folder.join(SidecarKind::Log.file_name(start_stamp));
        let log = Sidecar::open(&log_path, true)?;
        lock(&self.sidecars).insert(SidecarKind::Log, log);

        if let Some(sink) = &self.log_sink {
            let name = format!("recorder:{}:{start_stamp}", self.volume);
            let sidecars = Arc::clone(&self.sidecars);
            sink.subscribe(
                &name,
                Arc::new(move |line: &str| {
                    if let Some(log) = lock(&sidecars).get_mut(&SidecarKind::Log) {
                        let _ = log.write_line(line);
                    }
                }),
            );
            self.subscription = Some(name);
        }

        let writer = Arc::new(FrameWriter::new(
            folder.clone(),
            self.frame_extension.clone(),
            ledger,
            max_data_size,
            self.reclaim,
        ));

        let mut queue = WorkQueue::new(
            format!("rec-{}", self.volume),
            FrameHandler {
                volume: self.volume.clone(),
                writer: Arc::clone(&writer),
                on_written,
            },
        );
        queue.start()?;

        tracing::info!(
            volume = %self.volume,
            folder = %folder.display(),
            max_data_size,
            "session started"
        );

        self.session = Some(ActiveSession {
            folder,
            writer,
            queue,
        });
        Ok(())
    }

    /// Ends the session: unsubscribes from the log sink, lets the consumer
    /// finish the queued records, then closes the sidecars.
    ///
    /// Blocks until the backlog is on disk; see [`pending`](Self::pending).
    /// Safe to call when idle.
    pub fn shutdown(&mut self) {
        if let (Some(sink), Some(name)) = (&self.log_sink, self.subscription.take()) {
            sink.unsubscribe(&name);
        }
        if let Some(mut session) = self.session.take() {
            let backlog = session.queue.len();
            if backlog > 0 {
                tracing::debug!(
                    queue = %session.queue.name(),
                    backlog,
                    "writing queued records before stop"
                );
            }
            session.queue.stop();
            tracing::debug!(volume = %self.volume, folder = %session.folder.display(), "session stopped");
        }
        lock(&self.sidecars).clear();
    }

    /// Queues a record for writing, refusing it if `max_queue_size` records
    /// are already waiting (0 = unbounded).
    ///
    /// # Errors
    ///
    /// - [`RecorderError::EmptyPayload`] for an empty record
    /// - [`RecorderError::NotInitialized`] without an active session
    /// - [`QueueError::Rejected`](crate::error::QueueError::Rejected) when the queue is full
    pub fn handle_data(&self, record: Record, max_queue_size: usize) -> Result<()> {
        if record.is_empty() {
            return Err(RecorderError::EmptyPayload.into());
        }
        let session = self.active()?;
        session
            .queue
            .push(record, max_queue_size, OverflowPolicy::Reject)?;
        Ok(())
    }

    /// Appends a line to the sidecar of the given kind.
    ///
    /// # Errors
    ///
    /// [`RecorderError::SidecarMissing`] if no such sidecar is open, or the
    /// write error.
    pub fn write_file(&self, kind: SidecarKind, text: &str) -> Result<()> {
        let mut sidecars = lock(&self.sidecars);
        let sidecar = sidecars
            .get_mut(&kind)
            .ok_or(RecorderError::SidecarMissing { kind })?;
        sidecar.write_line(text)
    }

    /// Frees at least `required` bytes if possible, engaging circular mode
    /// when it is not. Returns the bytes reclaimed.
    ///
    /// Order: every non-session folder, then (unless already circular) the
    /// oldest session folders one by one.
    ///
    /// # Errors
    ///
    /// [`RecorderError::NotInitialized`] without an active session.
    pub fn free_frame_data(&self, required: u64) -> Result<u64> {
        let session = self.active()?;
        Ok(session.writer.free_frame_data(required))
    }

    /// Volume identifier.
    pub fn volume(&self) -> &str {
        &self.volume
    }

    /// Recording root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a session is running.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Folder of the running session.
    pub fn session_folder(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.folder.as_path())
    }

    /// Bytes written by this session.
    pub fn current_data_size(&self) -> u64 {
        self.with_state(|_, s| s.current_data_size).unwrap_or(0)
    }

    /// Bytes the session may still write: `max_data_size - current_data_size`.
    pub fn current_free_size(&self) -> u64 {
        self.with_state(|w, s| w.max_data_size.saturating_sub(s.current_data_size))
            .unwrap_or(0)
    }

    /// The frame-counter ceiling, once circular mode is engaged.
    pub fn frame_ceiling(&self) -> Option<u64> {
        self.with_state(|_, s| s.frame_ceiling).flatten()
    }

    /// Number of frame files the session currently owns.
    pub fn frame_count(&self) -> usize {
        self.with_state(|_, s| s.frames.len()).unwrap_or(0)
    }

    /// Records waiting for the consumer thread.
    pub fn pending(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.queue.len())
    }

    fn active(&self) -> Result<&ActiveSession> {
        self.session.as_ref().ok_or_else(|| {
            RecorderError::NotInitialized {
                volume: self.volume.clone(),
            }
            .into()
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&FrameWriter, &FrameState) -> R) -> Option<R> {
        self.session
            .as_ref()
            .map(|s| f(&s.writer, &lock(&s.writer.state)))
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SessionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecorder")
            .field("volume", &self.volume)
            .field("root", &self.root)
            .field("session_folder", &self.session_folder())
            .finish_non_exhaustive()
    }
}

/// Consumer-side adapter: write, then report.
struct FrameHandler {
    volume: String,
    writer: Arc<FrameWriter>,
    on_written: CompletionFn,
}

impl WorkHandler<Record> for FrameHandler {
    fn handle(&mut self, record: Record) -> Result<()> {
        let outcome = self.writer.write(&record);
        (self.on_written)(&self.volume, outcome);
        Ok(())
    }
}

/// A frame file owned by the session.
#[derive(Debug)]
struct Frame {
    path: PathBuf,
    size: u64,
}

/// Frame files, budget accounting and circular-mode state for one session.
///
/// The state mutex only guards bookkeeping. Frame writes, frame removals and
/// folder evictions run with it released, so readers never wait on the disk.
#[derive(Debug)]
struct FrameWriter {
    folder: PathBuf,
    extension: String,
    reclaim: ReclaimPolicy,
    max_data_size: u64,
    state: Mutex<FrameState>,
}

#[derive(Debug)]
struct FrameState {
    ledger: FolderLedger,
    /// Bytes of frames written by this session.
    current_data_size: u64,
    /// Bytes of older data counted against the budget
    /// (only with [`ReclaimPolicy::OnCapacityExceeded`]).
    preexisting: u64,
    /// Counter of the last frame written; 0 before the first.
    frame_counter: u64,
    frame_ceiling: Option<u64>,
    frames: HashMap<u64, Frame>,
}

impl FrameState {
    fn next_counter(&self) -> u64 {
        match self.frame_ceiling {
            Some(ceiling) if self.frame_counter >= ceiling => 1,
            _ => self.frame_counter + 1,
        }
    }

    /// Next counter and the bytes by which writing `len` under it would
    /// exceed `max`, crediting the frame it replaces.
    fn plan(&self, len: u64, max: u64) -> (u64, u64) {
        let counter = self.next_counter();
        let replaced = self.frames.get(&counter).map_or(0, |f| f.size);
        let over = (self.preexisting + self.current_data_size)
            .saturating_sub(replaced)
            .saturating_add(len)
            .saturating_sub(max);
        (counter, over)
    }
}

impl FrameWriter {
    fn new(
        folder: PathBuf,
        extension: String,
        ledger: FolderLedger,
        max_data_size: u64,
        reclaim: ReclaimPolicy,
    ) -> Self {
        let preexisting = match reclaim {
            ReclaimPolicy::Manual => 0,
            ReclaimPolicy::OnCapacityExceeded => ledger.current_data_size(),
        };
        Self {
            folder,
            extension,
            reclaim,
            max_data_size,
            state: Mutex::new(FrameState {
                ledger,
                current_data_size: 0,
                preexisting,
                frame_counter: 0,
                frame_ceiling: None,
                frames: HashMap::new(),
            }),
        }
    }

    fn write(&self, record: &Record) -> WriteOutcome {
        self.write_with(record, write_frame)
    }

    /// Writes `record` through `store`, which persists one frame file.
    fn write_with(
        &self,
        record: &Record,
        store: impl FnOnce(&Path, &[u8]) -> Result<()>,
    ) -> WriteOutcome {
        let len = record.len() as u64;
        let Some((counter, replaced)) = self.reserve(len) else {
            tracing::debug!(
                folder = %self.folder.display(),
                len,
                max = self.max_data_size,
                "frame skipped, budget exhausted"
            );
            return WriteOutcome::CapacityExceeded;
        };

        if let Some(old) = replaced {
            remove_frame(&old.path);
        }

        let path = self.folder.join(format!(
            "{counter:06}_{}.{}",
            record.timestamp().format("%Y-%m-%d_%H-%M-%S%.3f"),
            self.extension
        ));
        match store(&path, record.payload()) {
            Ok(()) => {
                let mut state = lock(&self.state);
                state.current_data_size += len;
                state.frames.insert(counter, Frame { path, size: len });
                WriteOutcome::Written
            }
            Err(e) => {
                tracing::error!("{e}");
                WriteOutcome::WriteFailed
            }
        }
    }

    /// Claims the next counter for a `len`-byte frame, reclaiming space
    /// first when the policy allows. The frame previously stored under that
    /// counter leaves the accounting and is returned for deletion. `None`
    /// when the frame does not fit the budget.
    fn reserve(&self, len: u64) -> Option<(u64, Option<Frame>)> {
        if self.reclaim == ReclaimPolicy::OnCapacityExceeded {
            let (_, over) = lock(&self.state).plan(len, self.max_data_size);
            if over > 0 {
                self.free_frame_data(over);
            }
        }

        let mut state = lock(&self.state);
        // Circular mode may have just been engaged.
        let (counter, over) = state.plan(len, self.max_data_size);
        if over > 0 {
            return None;
        }
        state.frame_counter = counter;
        let replaced = state.frames.remove(&counter);
        if let Some(old) = &replaced {
            state.current_data_size = state.current_data_size.saturating_sub(old.size);
        }
        Some((counter, replaced))
    }

    fn free_frame_data(&self, required: u64) -> u64 {
        let (others, circular) = {
            let mut state = lock(&self.state);
            (state.ledger.take_other_folders(), state.frame_ceiling.is_some())
        };
        let mut freed: u64 = others.iter().map(|folder| remove_folder(folder)).sum();

        if !circular {
            while freed < required {
                let Some(folder) = lock(&self.state).ledger.take_oldest_folder() else {
                    break;
                };
                freed += remove_folder(&folder);
            }
        }

        let exhausted = !circular && freed < required;
        let ceiling = {
            let mut state = lock(&self.state);
            state.preexisting = state.preexisting.saturating_sub(freed);
            if exhausted && state.frame_ceiling.is_none() && state.frame_counter > 0 {
                state.frame_ceiling = Some(state.frame_counter);
            }
            state.frame_ceiling
        };
        if exhausted {
            match ceiling {
                Some(ceiling) => tracing::warn!(
                    folder = %self.folder.display(),
                    ceiling,
                    "storage exhausted, switching to circular overwrite"
                ),
                None => tracing::warn!(
                    folder = %self.folder.display(),
                    "storage exhausted before the first frame, circular mode not engaged"
                ),
            }
        }
        freed
    }
}

fn remove_frame(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(frame = %path.display(), "failed to remove frame: {e}"),
    }
}

fn write_frame(path: &Path, payload: &[u8]) -> Result<()> {
    persist(path, |file| {
        file.write_all(payload)?;
        file.flush()
    })
}

/// Creates `path` and fills it through `fill`. A file whose fill fails is
/// deleted again, so no partial frame stays on disk.
fn persist(path: &Path, fill: impl FnOnce(&mut File) -> io::Result<()>) -> Result<()> {
    let to_error = |source| RecorderError::FrameWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(to_error)?;
    if let Err(e) = fill(&mut file) {
        drop(file);
        remove_frame(path);
        return Err(to_error(e).into());
    }
    Ok(())
}
