//! Volume descriptors and the volume discovery seam.
//!
//! Enumerating devices, reading labels, and resolving mount points is
//! platform-specific, so the orchestrator talks to a [`VolumeSource`].
//! [`StaticVolumes`] serves a fixed table (usually from the config file).

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Capacity figures for the filesystem holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceInfo {
    /// Total size in bytes.
    pub capacity: u64,
    /// Bytes available to unprivileged writers.
    pub available: u64,
}

/// Queries the filesystem holding `path` through the OS.
///
/// # Errors
///
/// Returns the OS error if the filesystem cannot be queried.
pub fn os_space(path: &Path) -> io::Result<SpaceInfo> {
    Ok(SpaceInfo {
        capacity: fs2::total_space(path)?,
        available: fs2::available_space(path)?,
    })
}

/// Lists storage volumes and resolves their labels, mount points and space.
pub trait VolumeSource: Send + Sync {
    /// Identifiers of all fixed (non-removable) volumes.
    ///
    /// # Errors
    ///
    /// Returns an error if enumeration fails as a whole.
    fn fixed_volumes(&self) -> io::Result<Vec<String>>;

    /// The volume's label.
    ///
    /// # Errors
    ///
    /// Returns an error if the label cannot be read.
    fn label(&self, volume: &str) -> io::Result<String>;

    /// Where the volume is mounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume is not mounted.
    fn mount_point(&self, volume: &str) -> io::Result<PathBuf>;

    /// Capacity figures for the filesystem at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem cannot be queried.
    fn space(&self, path: &Path) -> io::Result<SpaceInfo> {
        os_space(path)
    }
}

/// A volume accepted for recording. Read-only after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Identifier reported by the [`VolumeSource`].
    pub id: String,
    /// Volume label.
    pub label: String,
    /// Mount point at discovery time.
    pub mount_point: PathBuf,
    /// Total capacity in bytes.
    pub capacity: u64,
    /// Bytes withheld from recording: `capacity - budget`.
    pub reserve: u64,
}

impl Volume {
    /// Free recording space given the OS-reported available bytes:
    /// `max(0, available - reserve)`.
    pub fn usable(&self, available: u64) -> u64 {
        available.saturating_sub(self.reserve)
    }
}

/// One row of a static volume table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeEntry {
    /// Volume identifier (e.g. a device path).
    pub id: String,
    /// Volume label.
    pub label: String,
    /// Mount point.
    pub mount_point: PathBuf,
}

/// A [`VolumeSource`] backed by a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticVolumes {
    entries: Vec<VolumeEntry>,
}

impl StaticVolumes {
    /// Creates a source serving `entries`.
    pub fn new(entries: Vec<VolumeEntry>) -> Self {
        Self { entries }
    }

    fn entry(&self, volume: &str) -> io::Result<&VolumeEntry> {
        self.entries
            .iter()
            .find(|e| e.id == volume)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no volume '{volume}'")))
    }
}

impl VolumeSource for StaticVolumes {
    fn fixed_volumes(&self) -> io::Result<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.id.clone()).collect())
    }

    fn label(&self, volume: &str) -> io::Result<String> {
        Ok(self.entry(volume)?.label.clone())
    }

    fn mount_point(&self, volume: &str) -> io::Result<PathBuf> {
        let mount = &self.entry(volume)?.mount_point;
        if mount.is_dir() {
            Ok(mount.clone())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("mount point '{}' is not a directory", mount.display()),
            ))
        }
    }
}
