//! Recorder configuration.
//!
//! Loaded from a JSON file and validated before use:
//!
//! ```json
//! {
//!   "accepted_labels": ["REC_A", "REC_B"],
//!   "max_data_size": 500000000,
//!   "folder_name": "Session",
//!   "frame_extension": "dat",
//!   "max_queue_size": 64,
//!   "reclaim": "on_capacity_exceeded",
//!   "volumes": [
//!     { "id": "/dev/sdb1", "label": "REC_A", "mount_point": "/mnt/rec_a" }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::volume::VolumeEntry;

/// Default per-volume budget in bytes.
pub const DEFAULT_MAX_DATA_SIZE: u64 = 500_000_000;

/// Default session folder prefix.
pub const DEFAULT_FOLDER_NAME: &str = "Session";

/// Default frame file extension.
pub const DEFAULT_FRAME_EXTENSION: &str = "dat";

/// When a recorder frees space on its volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// Only when [`free_frame_data`](crate::recorder::SessionRecorder::free_frame_data)
    /// is called explicitly.
    #[default]
    Manual,
    /// Automatically, whenever a record would exceed the budget.
    OnCapacityExceeded,
}

/// Settings shared by the orchestrator and every session recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Labels of volumes eligible for recording.
    pub accepted_labels: Vec<String>,
    /// Per-volume byte budget.
    pub max_data_size: u64,
    /// Session folder prefix; also the template that marks legal folders.
    pub folder_name: String,
    /// Extension of frame files, without the dot.
    pub frame_extension: String,
    /// Recording root below each mount point. `None` records at the mount
    /// point itself.
    pub recording_subdir: Option<PathBuf>,
    /// Default queue bound for producers (0 = unbounded).
    pub max_queue_size: usize,
    /// Space reclamation behaviour.
    pub reclaim: ReclaimPolicy,
    /// Volume table for [`StaticVolumes`](crate::volume::StaticVolumes).
    pub volumes: Vec<VolumeEntry>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            accepted_labels: Vec::new(),
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            folder_name: DEFAULT_FOLDER_NAME.to_string(),
            frame_extension: DEFAULT_FRAME_EXTENSION.to_string(),
            recording_subdir: None,
            max_queue_size: 0,
            reclaim: ReclaimPolicy::default(),
            volumes: Vec::new(),
        }
    }
}

impl RecorderConfig {
    /// Reads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read
    /// - [`ConfigError::Parse`] if it is not valid JSON for this type
    /// - [`ConfigError::Invalid`] if validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_data_size == 0 {
            return Err(invalid("max_data_size must be > 0"));
        }

        if self.folder_name.is_empty() {
            return Err(invalid("folder_name must not be empty"));
        }
        if self.folder_name.contains(['/', '\\']) {
            return Err(invalid(format!(
                "folder_name '{}' must not contain path separators",
                self.folder_name
            )));
        }

        if self.frame_extension.is_empty() || self.frame_extension.contains(['.', '/', '\\']) {
            return Err(invalid(format!(
                "frame_extension '{}' must be a bare extension such as \"dat\"",
                self.frame_extension
            )));
        }

        if let Some(subdir) = &self.recording_subdir {
            if subdir.is_absolute() {
                return Err(invalid(format!(
                    "recording_subdir '{}' must be relative to the mount point",
                    subdir.display()
                )));
            }
        }

        let mut ids = HashSet::new();
        for entry in &self.volumes {
            if !ids.insert(entry.id.as_str()) {
                return Err(invalid(format!("duplicate volume id '{}'", entry.id)));
            }
        }

        Ok(())
    }

    /// Template identifying folders created by this recorder.
    pub fn legal_template(&self) -> String {
        format!("{}_", self.folder_name)
    }

    /// Recording root for a volume mounted at `mount_point`.
    pub fn recording_root(&self, mount_point: &Path) -> PathBuf {
        match &self.recording_subdir {
            Some(subdir) => mount_point.join(subdir),
            None => mount_point.to_path_buf(),
        }
    }
}

fn invalid(reason: impl Into<String>) -> crate::error::BlackboxError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlackboxError;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RecorderConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_data_size, DEFAULT_MAX_DATA_SIZE);
        assert_eq!(config.legal_template(), "Session_");
        assert_eq!(config.reclaim, ReclaimPolicy::Manual);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("blackbox.json");
        fs::write(
            &path,
            r#"{ "accepted_labels": ["REC"], "max_data_size": 1000, "reclaim": "on_capacity_exceeded" }"#,
        )
        .unwrap();

        let config = RecorderConfig::load(&path).unwrap();
        assert_eq!(config.accepted_labels, vec!["REC"]);
        assert_eq!(config.max_data_size, 1000);
        assert_eq!(config.reclaim, ReclaimPolicy::OnCapacityExceeded);
        assert_eq!(config.folder_name, DEFAULT_FOLDER_NAME);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            RecorderConfig {
                max_data_size: 0,
                ..RecorderConfig::default()
            },
            RecorderConfig {
                folder_name: "a/b".to_string(),
                ..RecorderConfig::default()
            },
            RecorderConfig {
                frame_extension: ".dat".to_string(),
                ..RecorderConfig::default()
            },
        ];

        for config in cases {
            match config.validate() {
                Err(BlackboxError::Config(ConfigError::Invalid { .. })) => {}
                other => panic!("expected Invalid error, got: {other:?}"),
            }
        }
    }

    #[test]
    fn test_duplicate_volume_ids_are_rejected() {
        let entry = VolumeEntry {
            id: "sdb1".to_string(),
            label: "REC".to_string(),
            mount_point: PathBuf::from("/mnt/rec"),
        };
        let config = RecorderConfig {
            volumes: vec![entry.clone(), entry],
            ..RecorderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_corrupted_file_is_a_parse_error() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("broken.json");
        fs::write(&path, "{ invalid json }").unwrap();

        match RecorderConfig::load(&path) {
            Err(BlackboxError::Config(ConfigError::Parse { .. })) => {}
            other => panic!("expected Parse error, got: {other:?}"),
        }
    }

    #[test]
    fn test_recording_root() {
        let mut config = RecorderConfig::default();
        assert_eq!(config.recording_root(Path::new("/mnt/a")), PathBuf::from("/mnt/a"));

        config.recording_subdir = Some(PathBuf::from("blackbox"));
        assert_eq!(
            config.recording_root(Path::new("/mnt/a")),
            PathBuf::from("/mnt/a/blackbox")
        );
    }
}
