//! Line-oriented sidecar files stored next to a session's frames.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{RecorderError, Result};

/// Kinds of sidecar file a session can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SidecarKind {
    /// Mirror of the log lines emitted while the session runs.
    Log,
}

impl SidecarKind {
    /// File name of this sidecar for a session started at `start_stamp`.
    pub fn file_name(self, start_stamp: &str) -> String {
        match self {
            Self::Log => format!("log_{start_stamp}.txt"),
        }
    }
}

impl fmt::Display for SidecarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => f.write_str("log"),
        }
    }
}

/// An open sidecar file. Every [`write_line`](Self::write_line) is flushed.
#[derive(Debug)]
pub struct Sidecar {
    path: PathBuf,
    file: LineWriter<File>,
}

impl Sidecar {
    /// Opens (creating if needed) a sidecar file.
    ///
    /// # Errors
    ///
    /// [`RecorderError::Sidecar`] if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .map_err(|e| RecorderError::Sidecar {
                path: path.clone(),
                source: e,
            })?;

        Ok(Self {
            path,
            file: LineWriter::new(file),
        })
    }

    /// Appends `text` followed by a newline.
    ///
    /// # Errors
    ///
    /// [`RecorderError::Sidecar`] on I/O failure.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        writeln!(self.file, "{text}").map_err(|e| RecorderError::Sidecar {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(())
    }
}
