//! Error types for the blackbox multi-volume recorder.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all blackbox operations.
///
/// Per-record write results are not errors: they travel as
/// [`WriteOutcome`](crate::record::WriteOutcome) values through the
/// completion callback. This enum covers the failures that a caller of the
/// public API can observe directly.
#[derive(Error, Debug)]
pub enum BlackboxError {
    /// Error in the bounded work queue.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Error managing the folders of a recording root.
    #[error("folder ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Error in a per-volume session recorder.
    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    /// Error discovering or querying a volume.
    #[error("volume error: {0}")]
    Volume(#[from] VolumeError),

    /// Error coordinating the set of volumes.
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by [`WorkQueue`](crate::queue::WorkQueue).
#[derive(Error, Debug)]
pub enum QueueError {
    /// The queue is full and the reject policy refused the item.
    #[error("queue is full ({max_len} items), item rejected")]
    Rejected {
        /// The bound that was reached.
        max_len: usize,
    },

    /// The consumer thread could not be spawned.
    #[error("failed to spawn consumer thread '{name}': {source}")]
    Spawn {
        /// The thread name.
        name: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while initializing a [`FolderLedger`](crate::ledger::FolderLedger).
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The recording root could not be created or listed.
    #[error("failed to access recording root '{}': {source}", path.display())]
    RootAccess {
        /// The recording root.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The session folder could not be created.
    #[error("failed to create session folder '{}': {source}", path.display())]
    FolderCreate {
        /// The folder that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a [`SessionRecorder`](crate::recorder::SessionRecorder).
#[derive(Error, Debug)]
pub enum RecorderError {
    /// The recorder has no active session.
    #[error("recorder for volume '{volume}' has no active session")]
    NotInitialized {
        /// The volume the recorder belongs to.
        volume: String,
    },

    /// The record carries no payload.
    #[error("record payload is empty")]
    EmptyPayload,

    /// A sidecar file could not be opened or written.
    #[error("sidecar '{}' failed: {source}", path.display())]
    Sidecar {
        /// The sidecar file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No sidecar of the requested kind is open.
    #[error("no {kind} sidecar is open")]
    SidecarMissing {
        /// The requested sidecar kind.
        kind: crate::sidecar::SidecarKind,
    },

    /// A frame file could not be written.
    #[error("failed to write frame '{}': {source}", path.display())]
    FrameWrite {
        /// The frame file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while discovering or querying volumes.
#[derive(Error, Debug)]
pub enum VolumeError {
    /// The volume could not be resolved, mounted, or measured.
    #[error("volume '{volume}' is unavailable: {reason}")]
    Unavailable {
        /// The volume identifier.
        volume: String,
        /// Why the volume is unavailable.
        reason: String,
    },

    /// The volume is smaller than the configured budget.
    #[error("volume '{volume}' has {capacity} bytes, {required} required")]
    InsufficientCapacity {
        /// The volume identifier.
        volume: String,
        /// Total capacity reported by the OS.
        capacity: u64,
        /// The configured per-volume budget.
        required: u64,
    },

    /// The identifier is not one of the accepted volumes.
    #[error("unknown volume '{volume}'")]
    UnknownVolume {
        /// The volume identifier.
        volume: String,
    },
}

/// Errors raised by the [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Discovery accepted no volumes, so no session can start.
    #[error("no volumes accepted; run volume discovery first")]
    NoVolumes,

    /// Records arrived while no session is running.
    #[error("no recording session is active")]
    NoSession,

    /// Every recorder failed to initialize.
    #[error("no session recorder could be started on {attempted} volume(s)")]
    NoActiveRecorders {
        /// How many volumes were tried.
        attempted: usize,
    },
}

/// Errors raised while loading a [`RecorderConfig`](crate::config::RecorderConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for this schema.
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A field holds an unacceptable value.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Description of what is invalid.
        reason: String,
    },
}

/// Type alias for `Result<T, BlackboxError>`.
pub type Result<T> = std::result::Result<T, BlackboxError>;
