//! Configuration and constants
//!
//! - [`defaults`] - Default values and fixed workspace layout names
//! - [`urls`] - Remote endpoints
//! - [`settings`] - The immutable [`settings::BuildConfig`] built once at startup

pub mod defaults;
pub mod settings;
pub mod urls;

pub use settings::BuildConfig;
