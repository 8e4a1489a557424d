//! # blackbox
//!
//! Multi-volume, capacity-bounded data recorder.
//!
//! blackbox accepts a stream of time-stamped binary records from a single
//! producer and persists them across several storage volumes. Every volume
//! gets its own byte budget, its own eviction policy, and its own writer
//! thread, so a slow disk never blocks ingestion on the others.
//!
//! ## Key Properties
//!
//! - One dedicated writer thread per volume; `handle_data` never waits on disk I/O
//! - Strict round-robin distribution across active volumes
//! - Hard per-volume budget: writes that would exceed it are skipped whole
//! - Folder-level eviction of foreign data first, then the oldest sessions
//! - Optional circular overwrite once eviction cannot free enough space
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blackbox::{Orchestrator, Record, RecorderConfig, StaticVolumes, WriteOutcome};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RecorderConfig::load("blackbox.json")?;
//! let labels = config.accepted_labels.clone();
//! let source = Arc::new(StaticVolumes::new(config.volumes.clone()));
//!
//! let mut orchestrator = Orchestrator::new(config, source);
//! let accepted = orchestrator.init_disks(
//!     &labels,
//!     Arc::new(|volume: &str, outcome: WriteOutcome| {
//!         if !outcome.is_written() {
//!             eprintln!("{volume}: {outcome}");
//!         }
//!     }),
//! );
//! println!("{accepted} volume(s) accepted");
//!
//! orchestrator.start_session()?;
//! for i in 0..100u8 {
//!     orchestrator.handle_data(Record::new(vec![i; 4096]), 64)?;
//! }
//! orchestrator.end_session();
//! println!("{} frame(s) written", orchestrator.file_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Orchestrator`]: Discovers volumes, starts sessions, deals records round-robin
//! - [`SessionRecorder`]: One session on one volume: frames, budget, sidecars
//! - [`WorkQueue`]: Bounded queue drained by a single consumer thread
//! - [`FolderLedger`]: Classifies and evicts folders under a recording root
//!
//! ## Modules
//!
//! - [`orchestrator`]: Volume discovery and record distribution
//! - [`recorder`]: Per-volume session recorder
//! - [`queue`]: Bounded work queue
//! - [`ledger`]: Folder classification, sizing and eviction
//! - [`sidecar`]: Line-oriented files stored next to the frames
//! - [`log_sink`]: Log fan-out into session sidecars
//! - [`volume`]: Volume descriptors and discovery
//! - [`record`]: Records and write outcomes
//! - [`config`]: Recorder configuration
//! - [`error`]: Error types

pub mod config;
pub mod error;
pub mod ledger;
pub mod log_sink;
pub mod orchestrator;
pub mod queue;
pub mod record;
pub mod recorder;
pub mod sidecar;
pub mod volume;

// Re-export primary API types at crate root for convenience.
pub use config::{ReclaimPolicy, RecorderConfig};
pub use error::{BlackboxError, Result};
pub use ledger::FolderLedger;
pub use log_sink::{LogHub, LogSink};
pub use orchestrator::Orchestrator;
pub use queue::{OverflowPolicy, WorkQueue};
pub use record::{CompletionFn, Record, WriteOutcome};
pub use recorder::SessionRecorder;
pub use sidecar::SidecarKind;
pub use volume::{StaticVolumes, Volume, VolumeSource};
