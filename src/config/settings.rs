//! Run configuration
//!
//! [`Settings`] holds the raw option values as they arrive from the command
//! line and environment. [`BuildConfig::from_settings`] validates them once
//! and produces the immutable configuration every component borrows.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::{defaults, urls};
use crate::core::release::{release_info, ReleaseInfo};
use crate::core::target::{Arch, BuildTarget, KernelConfig};
use crate::error::BuildError;

/// Raw option values before validation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Kernel configuration variant name
    pub kernel_config: String,
    /// Architecture name
    pub arch: String,
    /// Machine variant name
    pub machine: String,
    /// Release identifier
    pub release: String,
    /// Harvest a compilation database instead of a normal build
    pub compile_db: bool,
    /// Compose a kernel collection after the build
    pub build_collection: bool,
    /// Leave the source tree free of optional patches
    pub pristine: bool,
    /// Extension identifier exclusion filter
    pub kc_filter: String,
    /// Toolkit installation root
    pub kdk_root: PathBuf,
    /// Workspace root
    pub work_dir: PathBuf,
    /// Toolkit download base URL
    pub kdk_url: String,
    /// Release manifest base URL
    pub manifest_url: String,
    /// Parallel build jobs
    pub jobs: Option<usize>,
}

impl Settings {
    /// Default settings for a release in a workspace
    pub fn new(release: &str, work_dir: &Path) -> Self {
        Self {
            kernel_config: defaults::DEFAULT_KERNEL_CONFIG.to_string(),
            arch: defaults::DEFAULT_ARCH_CONFIG.to_string(),
            machine: defaults::DEFAULT_MACHINE_CONFIG.to_string(),
            release: release.to_string(),
            compile_db: false,
            build_collection: false,
            pristine: false,
            kc_filter: defaults::DEFAULT_KC_FILTER.to_string(),
            kdk_root: PathBuf::from(defaults::SYSTEM_KDK_ROOT),
            work_dir: work_dir.to_path_buf(),
            kdk_url: urls::KDK_DOWNLOAD_BASE.to_string(),
            manifest_url: urls::RELEASE_MANIFEST_BASE.to_string(),
            jobs: None,
        }
    }
}

/// Validated, immutable configuration for one run
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Target shared by every stage
    pub target: BuildTarget,
    /// Release metadata
    pub release: ReleaseInfo,
    /// Workspace root
    pub work_dir: PathBuf,
    /// Toolkit installation root
    pub kdk_root: PathBuf,
    /// Harvest a compilation database instead of a normal build
    pub compile_db: bool,
    /// Compose a kernel collection after the build
    pub build_collection: bool,
    /// Leave the source tree free of optional patches
    pub pristine: bool,
    /// Extension identifier exclusion filter (a regex)
    pub kc_filter: String,
    /// Toolkit download base URL
    pub kdk_url: String,
    /// Release manifest base URL
    pub manifest_url: String,
    /// Parallel build jobs
    pub jobs: usize,
}

impl BuildConfig {
    /// Validate raw settings
    pub fn from_settings(settings: &Settings) -> Result<Self, BuildError> {
        let release = release_info(&settings.release)?;
        let config: KernelConfig = settings.kernel_config.parse()?;
        let arch: Arch = settings.arch.parse()?;

        Regex::new(&settings.kc_filter).map_err(|e| BuildError::InvalidConfig {
            name: "KC_FILTER".to_string(),
            value: settings.kc_filter.clone(),
            expected: format!("a valid regular expression ({e})"),
        })?;

        let jobs = settings.jobs.unwrap_or_else(num_cpus::get).max(1);

        Ok(Self {
            target: BuildTarget::new(config, arch, &settings.machine, release.version),
            release,
            work_dir: settings.work_dir.clone(),
            kdk_root: settings.kdk_root.clone(),
            compile_db: settings.compile_db,
            build_collection: settings.build_collection,
            pristine: settings.pristine,
            kc_filter: settings.kc_filter.clone(),
            kdk_url: settings.kdk_url.clone(),
            manifest_url: settings.manifest_url.clone(),
            jobs,
        })
    }

    /// Installed toolkit bundle for the configured release
    pub fn kdk_path(&self) -> PathBuf {
        self.kdk_root.join(format!("{}.kdk", self.release.kdk_name()))
    }

    /// Download URL of the toolkit disk image
    pub fn kdk_image_url(&self) -> String {
        urls::toolkit_image(&self.kdk_url, &self.release.kdk_image_name())
    }
}
