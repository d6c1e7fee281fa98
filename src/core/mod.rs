//! Core pipeline logic
//!
//! Decides what to fetch, what to skip, what to patch and in what order to
//! build. Side effects go through the traits in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`release`] - Release table and component tag resolution
//! - [`target`] - Kernel configuration, architecture and artifact naming
//! - [`workspace`] - Workspace layout and source tree retrieval
//! - [`toolkit`] - Kernel Debug Kit download, mount and install
//! - [`patch`] - Build-file substitutions and release patch sets
//! - [`stage`] - Build stage definitions
//! - [`pipeline`] - Ordered, idempotent stage execution
//! - [`collection`] - Kernel collection composition
//! - [`clean`] - Workspace cleanup

pub mod clean;
pub mod collection;
pub mod patch;
pub mod pipeline;
pub mod release;
pub mod stage;
pub mod target;
pub mod toolkit;
pub mod workspace;
