//! xnu-build - version-pinned XNU kernel build pipeline
//!
//! This library resolves the component sources of a macOS release, fetches
//! them and the matching Kernel Debug Kit, and builds the kernel through a
//! fixed sequence of idempotent stages sharing one staging root.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Pipeline semantics
//! - [`infra`] - Infrastructure layer (network, filesystem, processes)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
