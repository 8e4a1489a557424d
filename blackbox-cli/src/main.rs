//! CLI for the blackbox multi-volume data recorder.
//!
//! Provides commands for inspecting volumes, recording synthetic sessions,
//! and benchmarking the ingest path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use blackbox::error::QueueError;
use blackbox::volume::VolumeEntry;
use blackbox::{
    BlackboxError, CompletionFn, LogHub, Orchestrator, Record, RecorderConfig, SidecarKind,
    StaticVolumes, WriteOutcome,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// blackbox: multi-volume, capacity-bounded data recorder CLI.
#[derive(Parser)]
#[command(name = "blackbox", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Discover volumes and show which ones qualify for recording.
    Volumes {
        /// Path to the JSON config file.
        config: PathBuf,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Record a session of synthetic records.
    Record {
        /// Path to the JSON config file.
        config: PathBuf,

        /// Number of records to feed.
        #[arg(long, default_value = "1000")]
        count: u64,

        /// Payload size of each record in bytes.
        #[arg(long, default_value = "4096")]
        size: usize,

        /// Pause between records in milliseconds.
        #[arg(long, default_value = "0")]
        interval_ms: u64,

        /// Queue bound per volume (0 = use the config value).
        #[arg(long, default_value = "0")]
        queue: usize,
    },

    /// Measure ingest throughput into temporary volumes.
    Bench {
        /// Number of records to write.
        #[arg(long, default_value = "100000")]
        records: u64,

        /// Payload size of each record in bytes.
        #[arg(long, default_value = "1024")]
        size: usize,

        /// Number of temporary volumes.
        #[arg(long, default_value = "2")]
        volumes: usize,
    },
}

/// Output format for volume listings.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable table.
    Text,
    /// JSON array of objects.
    Json,
}

/// Write outcomes reported by the recorders.
#[derive(Default)]
struct Tally {
    written: AtomicU64,
    failed: AtomicU64,
    exceeded: AtomicU64,
}

impl Tally {
    fn callback(self: &Arc<Self>) -> CompletionFn {
        let tally = Arc::clone(self);
        Arc::new(move |_volume: &str, outcome: WriteOutcome| {
            let counter = match outcome {
                WriteOutcome::Written => &tally.written,
                WriteOutcome::WriteFailed => &tally.failed,
                WriteOutcome::CapacityExceeded => &tally.exceeded,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        })
    }
}

fn main() {
    let cli = Cli::parse();

    let hub = LogHub::new();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(hub.clone())
        .init();

    let result = match cli.command {
        Commands::Volumes { config, format } => cmd_volumes(&config, &format),
        Commands::Record {
            config,
            count,
            size,
            interval_ms,
            queue,
        } => cmd_record(&config, &hub, count, size, interval_ms, queue),
        Commands::Bench {
            records,
            size,
            volumes,
        } => cmd_bench(records, size, volumes),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Builds an orchestrator over the config's static volume table and runs discovery.
fn discover(config: RecorderConfig, callback: CompletionFn) -> Orchestrator {
    let labels = config.accepted_labels.clone();
    let source = Arc::new(StaticVolumes::new(config.volumes.clone()));
    let mut orchestrator = Orchestrator::new(config, source);
    orchestrator.init_disks(&labels, callback);
    orchestrator
}

/// Implements `blackbox volumes <config>`.
fn cmd_volumes(config_path: &Path, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = RecorderConfig::load(config_path)?;
    let candidates = config.volumes.len();
    let budget = config.max_data_size;
    let orchestrator = discover(config, Arc::new(|_: &str, _: WriteOutcome| {}));
    let free = orchestrator.free_space();

    match format {
        OutputFormat::Text => {
            println!("Config: {}", config_path.display());
            println!("Budget per volume: {} ({budget} bytes)", format_bytes(budget));
            println!(
                "Accepted volumes: {} of {candidates}",
                orchestrator.volumes().len()
            );
            println!();

            for volume in orchestrator.volumes() {
                let free = free.get(&volume.id).copied().unwrap_or(0);
                println!("  {} [{}]", volume.id, volume.label);
                println!("    Mount point: {}", volume.mount_point.display());
                println!("    Capacity: {}", format_bytes(volume.capacity));
                println!("    Reserve: {}", format_bytes(volume.reserve));
                println!("    Free for recording: {}", format_bytes(free));
            }

            println!();
            println!(
                "Total free for recording: {}",
                format_bytes(orchestrator.free_recorder_size())
            );
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = orchestrator
                .volumes()
                .iter()
                .map(|volume| {
                    serde_json::json!({
                        "id": volume.id,
                        "label": volume.label,
                        "mount_point": volume.mount_point,
                        "capacity": volume.capacity,
                        "reserve": volume.reserve,
                        "free": free.get(&volume.id).copied().unwrap_or(0),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

/// Implements `blackbox record <config>`.
fn cmd_record(
    config_path: &Path,
    hub: &LogHub,
    count: u64,
    size: usize,
    interval_ms: u64,
    queue: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if size == 0 {
        return Err("record size must be > 0".into());
    }

    let config = RecorderConfig::load(config_path)?;
    let max_queue = if queue > 0 { queue } else { config.max_queue_size };
    let tally = Arc::new(Tally::default());

    let labels = config.accepted_labels.clone();
    let source = Arc::new(StaticVolumes::new(config.volumes.clone()));
    let mut orchestrator = Orchestrator::new(config, source).with_log_sink(Arc::new(hub.clone()));
    if orchestrator.init_disks(&labels, tally.callback()) == 0 {
        return Err("no volume qualifies for recording".into());
    }
    let active = orchestrator.start_session()?;

    println!("Recording {count} records of {size} bytes across {active} volume(s)...");
    orchestrator.write_to_file(
        SidecarKind::Log,
        &format!("synthetic session: {count} records x {size} bytes"),
    );

    let mut rejected = 0u64;
    let start = Instant::now();
    for i in 0..count {
        let payload = vec![(i % 251) as u8; size];
        match orchestrator.handle_data(Record::new(payload), max_queue) {
            Ok(()) => {}
            Err(BlackboxError::Queue(QueueError::Rejected { .. })) => rejected += 1,
            Err(e) => return Err(e.into()),
        }
        if interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(interval_ms));
        }
    }
    orchestrator.end_session();
    let elapsed = start.elapsed();

    println!();
    println!("Results:");
    println!("  Written: {}", tally.written.load(Ordering::Relaxed));
    println!("  Write failures: {}", tally.failed.load(Ordering::Relaxed));
    println!("  Capacity exceeded: {}", tally.exceeded.load(Ordering::Relaxed));
    println!("  Rejected (queue full): {rejected}");
    println!("  Frame files: {}", orchestrator.file_count());
    for (volume, files) in orchestrator.volume_file_counts() {
        println!("    {volume}: {files}");
    }
    println!("  Elapsed: {elapsed:.3?}");

    Ok(())
}

/// Implements `blackbox bench`.
fn cmd_bench(records: u64, size: usize, volume_count: usize) -> Result<(), Box<dyn std::error::Error>> {
    if size == 0 || volume_count == 0 {
        return Err("size and volumes must be > 0".into());
    }

    println!("blackbox ingest benchmark");
    println!("  Records: {records}");
    println!("  Size: {size} bytes");
    println!("  Volumes: {volume_count}");
    println!();

    let dirs = (0..volume_count)
        .map(|_| tempfile::tempdir())
        .collect::<Result<Vec<_>, _>>()?;
    let volumes = dirs
        .iter()
        .enumerate()
        .map(|(i, dir)| VolumeEntry {
            id: format!("bench{i}"),
            label: "BENCH".to_string(),
            mount_point: dir.path().to_path_buf(),
        })
        .collect();

    let per_volume = records.div_ceil(volume_count as u64) * size as u64;
    let config = RecorderConfig {
        accepted_labels: vec!["BENCH".to_string()],
        max_data_size: per_volume.max(1),
        volumes,
        ..RecorderConfig::default()
    };

    let tally = Arc::new(Tally::default());
    let orchestrator = discover(config, tally.callback());
    orchestrator.start_session()?;

    println!("Writing {records} records...");
    let start = Instant::now();
    for _ in 0..records {
        orchestrator.handle_data(Record::new(vec![0xA5; size]), 0)?;
    }
    let enqueued = start.elapsed();
    orchestrator.end_session();
    let elapsed = start.elapsed();

    let written = tally.written.load(Ordering::Relaxed);
    let ns_per_enqueue = enqueued.as_nanos() as f64 / records.max(1) as f64;
    let records_per_sec = written as f64 / elapsed.as_secs_f64();
    let bytes_per_sec = records_per_sec * size as f64;

    println!();
    println!("Results:");
    println!("  Written: {written}");
    println!("  Enqueue latency: {ns_per_enqueue:.1} ns/record");
    println!("  Elapsed (incl. drain): {elapsed:.3?}");
    println!("  Throughput: {records_per_sec:.0} records/sec ({}/s)", format_bytes(bytes_per_sec as u64));
    println!();

    Ok(())
}

/// Formats a byte count with a binary unit.
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
