//! Folder bookkeeping for one volume's recording root.
//!
//! The ledger splits the subfolders of a recording root into *legal* session
//! folders (whose name contains the session-naming template) and *other*
//! folders (everything else). Other folders are reclaimed first; legal ones
//! are evicted oldest first. The folder of the running session is never
//! evicted.
//!
//! Folder names start with a timestamp, so lexicographic order on the name
//! is chronological order.
//!
//! # Failure policy
//!
//! Only [`FolderLedger::open`] can fail. Errors while measuring or deleting
//! folders are logged and count as zero bytes reclaimed.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{LedgerError, Result};

/// Folder lists for one recording root.
#[derive(Debug)]
pub struct FolderLedger {
    /// Folder of the running session, excluded from eviction.
    current: PathBuf,
    /// Session folders, oldest first; `current` is among them.
    legal: VecDeque<PathBuf>,
    /// Folders not matching the template.
    other: Vec<PathBuf>,
}

impl FolderLedger {
    /// Scans `root`, classifies its subfolders, and creates the folder for a
    /// new session.
    ///
    /// The root is created if missing. When `session_folder` already exists,
    /// `_1`, `_2`, … is appended until the name is free. An empty
    /// `legal_template` classifies every folder as legal.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::RootAccess`] if the root cannot be created or listed
    /// - [`LedgerError::FolderCreate`] if the session folder cannot be created
    pub fn open<P: AsRef<Path>>(
        root: P,
        session_folder: &str,
        legal_template: &str,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut legal = Vec::new();
        let mut other = Vec::new();

        if root.is_dir() {
            let entries = fs::read_dir(&root).map_err(|e| LedgerError::RootAccess {
                path: root.clone(),
                source: e,
            })?;

            for entry in entries {
                let entry = entry.map_err(|e| LedgerError::RootAccess {
                    path: root.clone(),
                    source: e,
                })?;
                if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                    continue;
                }
                let name = entry.file_name();
                if legal_template.is_empty() || name.to_string_lossy().contains(legal_template) {
                    legal.push(entry.path());
                } else {
                    other.push(entry.path());
                }
            }
        } else {
            fs::create_dir_all(&root).map_err(|e| LedgerError::RootAccess {
                path: root.clone(),
                source: e,
            })?;
        }

        legal.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        other.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let current = unique_folder_path(&root.join(session_folder));
        fs::create_dir(&current).map_err(|e| LedgerError::FolderCreate {
            path: current.clone(),
            source: e,
        })?;

        let mut legal = VecDeque::from(legal);
        legal.push_back(current.clone());

        tracing::debug!(
            root = %root.display(),
            session = %current.display(),
            legal = legal.len() - 1,
            other = other.len(),
            "folder ledger initialized"
        );

        Ok(Self {
            current,
            legal,
            other,
        })
    }

    /// The folder of the running session.
    pub fn current_folder(&self) -> &Path {
        &self.current
    }

    /// Session folders known to the ledger, oldest first.
    pub fn legal_folders(&self) -> impl Iterator<Item = &Path> {
        self.legal.iter().map(PathBuf::as_path)
    }

    /// Folders not matching the session template.
    pub fn other_folders(&self) -> &[PathBuf] {
        &self.other
    }

    /// Whether a legal folder other than the current one exists.
    pub fn is_any_old_folder_exists(&self) -> bool {
        self.legal.iter().any(|f| *f != self.current)
    }

    /// Whether any non-session folder exists.
    pub fn is_other_folder_exists(&self) -> bool {
        !self.other.is_empty()
    }

    /// Removes the earliest legal folder that is not the current one.
    ///
    /// The folder leaves the ledger even if deletion fails, so repeated calls
    /// always make progress. Returns the bytes reclaimed, 0 when there is
    /// nothing to evict or deletion failed.
    pub fn remove_oldest_folder(&mut self) -> u64 {
        self.take_oldest_folder()
            .map_or(0, |folder| remove_folder(&folder))
    }

    /// Removes every non-session folder and forgets them.
    ///
    /// Returns the total bytes reclaimed.
    pub fn remove_other_folder(&mut self) -> u64 {
        self.take_other_folders()
            .iter()
            .map(|folder| remove_folder(folder))
            .sum()
    }

    /// Forgets the earliest legal folder that is not the current one and
    /// returns it without touching the disk. Pair with [`remove_folder`].
    pub fn take_oldest_folder(&mut self) -> Option<PathBuf> {
        let index = self.legal.iter().position(|f| *f != self.current)?;
        self.legal.remove(index)
    }

    /// Forgets every non-session folder and returns them without touching
    /// the disk.
    pub fn take_other_folders(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.other)
    }

    /// Bytes held by other folders plus legal folders older than the
    /// current one.
    pub fn current_data_size(&self) -> u64 {
        let others: u64 = self.other.iter().map(|f| measure(f)).sum();
        let older: u64 = self
            .legal
            .iter()
            .take_while(|f| **f != self.current)
            .map(|f| measure(f))
            .sum();
        others + older
    }
}

/// Returns `base` if it does not exist, otherwise the first free
/// `base_1`, `base_2`, ….
pub fn unique_folder_path(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let mut suffix = 1u32;
    loop {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!("_{suffix}"));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

/// Recursively sums the sizes of all files below `path`.
///
/// # Errors
///
/// Returns the first I/O error hit while walking the tree.
pub fn folder_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += folder_size(&entry.path())?;
        } else {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Folder size, logging and treating failures as 0.
fn measure(path: &Path) -> u64 {
    folder_size(path).unwrap_or_else(|e| {
        tracing::warn!(folder = %path.display(), "failed to measure folder: {e}");
        0
    })
}

/// Deletes a folder tree and returns the bytes it held, 0 on failure.
pub fn remove_folder(path: &Path) -> u64 {
    let size = measure(path);
    match fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::info!(folder = %path.display(), bytes = size, "removed folder");
            size
        }
        Err(e) => {
            tracing::warn!(folder = %path.display(), "failed to remove folder: {e}");
            0
        }
    }
}
