//! Infrastructure layer
//!
//! Handles all I/O operations: network, filesystem, disk images and
//! external processes. This module is the only place where side effects occur.

pub mod disk_image;
pub mod download;
pub mod filesystem;
pub mod git;
pub mod process;
