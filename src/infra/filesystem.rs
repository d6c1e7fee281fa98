//! Filesystem operations
//!
//! Handles directory management, managed symbolic links, the artifact
//! existence check used for stage sentinels, and the progress log.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a file, symbolic link or directory tree if it exists
///
/// Symbolic links are removed themselves, never followed.
pub fn remove_path(path: &Path) -> Result<bool, FilesystemError> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(FilesystemError::Remove {
                path: path.to_path_buf(),
                error: e.to_string(),
            })
        }
    };

    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    result.map_err(|e| FilesystemError::Remove {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    Ok(true)
}

/// Copy a file, creating the destination's parent directories
pub fn copy_file(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    std::fs::copy(from, to).map_err(|e| FilesystemError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error: e.to_string(),
    })?;
    Ok(())
}

/// Read content from a file
pub fn read_file(path: &Path) -> Result<String, FilesystemError> {
    std::fs::read_to_string(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Write content to a file
pub fn write_file(path: &Path, content: &str) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    std::fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// What occupies a managed link location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing at the path
    Absent,
    /// A symbolic link, with its target
    Link(PathBuf),
    /// A regular file or directory
    NotALink,
}

/// Inspect a managed link location without following it
pub fn link_state(path: &Path) -> Result<LinkState, FilesystemError> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let target = std::fs::read_link(path).map_err(|e| FilesystemError::ReadFile {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
            Ok(LinkState::Link(target))
        }
        Ok(_) => Ok(LinkState::NotALink),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(LinkState::Absent),
        Err(e) => Err(FilesystemError::ReadFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        }),
    }
}

/// Create a symbolic link at `link` pointing to `target`
pub fn symlink(target: &Path, link: &Path) -> Result<(), FilesystemError> {
    std::os::unix::fs::symlink(target, link).map_err(|e| FilesystemError::Symlink {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
        error: e.to_string(),
    })
}

/// Existence predicate for stage sentinels
pub trait ArtifactCheck {
    /// Whether an artifact exists at `path`
    fn exists(&self, path: &Path) -> bool;
}

/// Existence check backed by the real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCheck;

impl ArtifactCheck for FsCheck {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Append-only record of stages as they begin
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    /// Log writing to `path`
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a line for a stage that is about to run
    pub fn record(&self, stage: &str) -> Result<(), FilesystemError> {
        if let Some(parent) = self.path.parent() {
            create_dir_all(parent)?;
        }

        let write_err = |e: std::io::Error| FilesystemError::WriteFile {
            path: self.path.clone(),
            error: e.to_string(),
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_err)?;
        writeln!(file, "{timestamp} {stage}").map_err(write_err)
    }

    /// Stage names recorded so far, oldest first
    pub fn entries(&self) -> Result<Vec<String>, FilesystemError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Ok(read_file(&self.path)?
            .lines()
            .filter_map(|line| line.split_once(' ').map(|(_, stage)| stage.to_string()))
            .collect())
    }
}
