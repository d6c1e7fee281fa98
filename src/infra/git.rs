//! Git operations
//!
//! Shallow, tag-pinned clones of component repositories using the gix crate.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use gix::remote::fetch::Shallow;
use thiserror::Error;

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to clone repository
    #[error("Failed to clone '{url}' at '{tag}': {error}")]
    CloneFailed {
        url: String,
        tag: String,
        error: String,
    },

    /// Tag is not a valid reference name
    #[error("Invalid tag '{tag}': {error}")]
    InvalidTag { tag: String, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// Materializes a repository at a tag into a destination directory
pub trait SourceCloner {
    /// Clone `url` at `tag` into `dest`, which must not exist yet
    fn clone_tag(&self, url: &str, tag: &str, dest: &Path) -> Result<(), GitError>;
}

/// Cloner performing depth-1 clones with gix
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCloner;

impl GitCloner {
    /// Scratch location a clone is written to before being moved into place
    pub fn staging_path(dest: &Path) -> PathBuf {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        dest.with_file_name(format!(".{name}.partial"))
    }

    fn clone_into(url: &str, tag: &str, dest: &Path) -> Result<(), GitError> {
        let clone_err = |error: String| GitError::CloneFailed {
            url: url.to_string(),
            tag: tag.to_string(),
            error,
        };
        let ref_name = format!("refs/tags/{tag}");

        let mut prepare = gix::prepare_clone(url, dest)
            .map_err(|e| clone_err(e.to_string()))?
            .with_shallow(Shallow::DepthAtRemote(NonZeroU32::MIN))
            .with_ref_name(Some(ref_name.as_str()))
            .map_err(|e| GitError::InvalidTag {
                tag: tag.to_string(),
                error: e.to_string(),
            })?;

        let (mut checkout, _outcome) = prepare
            .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
            .map_err(|e| clone_err(e.to_string()))?;

        checkout
            .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
            .map_err(|e| clone_err(e.to_string()))?;

        Ok(())
    }
}

impl SourceCloner for GitCloner {
    fn clone_tag(&self, url: &str, tag: &str, dest: &Path) -> Result<(), GitError> {
        let staging = Self::staging_path(dest);
        let io_err = |path: &Path, e: std::io::Error| GitError::IoError {
            path: path.to_path_buf(),
            error: e.to_string(),
        };

        // Leftover from an interrupted clone
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| io_err(&staging, e))?;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        tracing::info!("Cloning {url} at {tag}");
        if let Err(e) = Self::clone_into(url, tag, &staging) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        std::fs::rename(&staging, dest).map_err(|e| io_err(dest, e))
    }
}
