//! Error types for xnu-build
//!
//! Domain-specific error types using thiserror. [`BuildError`] is the
//! taxonomy every pipeline component reports; the leaf enums belong to
//! the infrastructure operations they describe.

use std::path::PathBuf;
use thiserror::Error;

/// Download errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network error
    #[error("Network error downloading '{url}': {error}")]
    NetworkError { url: String, error: String },

    /// Server rejected the request outright
    #[error("HTTP {status} downloading '{url}'")]
    HttpStatus { url: String, status: u16 },

    /// Server ignored or mangled a byte range request
    #[error("Range request for '{url}' not honored: {error}")]
    RangeError { url: String, error: String },

    /// Downloaded size differs from the advertised size
    #[error("Size mismatch for '{path}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Max retries exceeded
    #[error("Download failed after {retries} attempts: {url}: {error}")]
    MaxRetriesExceeded {
        url: String,
        retries: u32,
        error: String,
    },
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove a file or directory
    #[error("Failed to remove '{path}': {error}")]
    Remove { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to create a symbolic link
    #[error("Failed to link '{link}' -> '{target}': {error}")]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        error: String,
    },

    /// Failed to copy or move a path
    #[error("Failed to copy '{from}' to '{to}': {error}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },
}

/// Patch tool errors
///
/// Only raised for patch files the tool cannot parse at all. A patch that
/// merely fails to apply is routine and never becomes an error.
#[derive(Error, Debug)]
pub enum PatchError {
    /// Patch file is malformed or corrupt
    #[error("Malformed patch '{patch}': {error}")]
    Malformed { patch: PathBuf, error: String },

    /// Substitution rule could not be built
    #[error("Invalid substitution rule for '{file}': {error}")]
    InvalidRule { file: PathBuf, error: String },

    /// Patch tool could not be run
    #[error("Patch tool failed on '{patch}': {error}")]
    ToolFailed { patch: PathBuf, error: String },
}

/// Top-level build error type
#[derive(Error, Debug)]
pub enum BuildError {
    /// Release manifest could not be retrieved or parsed
    #[error("Release manifest for '{release}' unavailable: {error}")]
    ManifestUnavailable { release: String, error: String },

    /// Manifest has no entry for a required component
    #[error("Component '{component}' not found in manifest for release '{release}'")]
    ComponentNotFound { release: String, component: String },

    /// A managed workspace link is not a symbolic link
    #[error("Workspace corruption: '{path}' exists but is not a symbolic link. Run with --clean to reset the workspace")]
    WorkspaceCorruption { path: PathBuf },

    /// Source tree could not be cloned
    #[error("Failed to fetch '{component}' at '{tag}': {error}")]
    SourceFetchFailed {
        component: String,
        tag: String,
        error: String,
    },

    /// Toolkit disk image could not be downloaded
    #[error("Failed to fetch toolkit '{toolkit}': {error}")]
    ToolkitFetchFailed { toolkit: String, error: String },

    /// Toolkit could not be mounted or extracted
    #[error("Failed to install toolkit '{toolkit}': {error}")]
    ToolkitInstallFailed { toolkit: String, error: String },

    /// External build procedure failed
    #[error("Stage '{stage}' failed: {status}")]
    StageFailed { stage: String, status: String },

    /// Required artifact missing before a stage could start
    #[error("Stage '{stage}' requires '{path}', which does not exist")]
    MissingPrecondition { stage: String, path: PathBuf },

    /// Release identifier not in the supported release table
    #[error("Invalid release identifier '{release}'. Supported: {supported}")]
    InvalidReleaseIdentifier { release: String, supported: String },

    /// Configuration value rejected
    #[error("Invalid value '{value}' for {name}: expected {expected}")]
    InvalidConfig {
        name: String,
        value: String,
        expected: String,
    },

    /// Patch tool error
    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),
}

impl BuildError {
    /// Shorthand for a stage failure
    pub fn stage_failed(stage: &str, status: impl ToString) -> Self {
        Self::StageFailed {
            stage: stage.to_string(),
            status: status.to_string(),
        }
    }
}
