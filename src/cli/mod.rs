//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no pipeline logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::Parser;

use crate::config::settings::Settings;
use crate::config::{defaults, urls, BuildConfig};
use crate::core::clean::CleanScope;
use crate::core::workspace::Workspace;

/// xnu-build - build the XNU kernel from version-pinned sources
///
/// Fetches the component sources and Kernel Debug Kit for a macOS release
/// and runs the staged build. Every option can also be set through the
/// environment variable shown with it.
#[derive(Parser, Debug)]
#[command(name = "xnu-build")]
#[command(author, version, long_version = long_version(), about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Remove build output, staging root, component links and sources, then exit
    #[arg(long, conflicts_with = "clean_partial")]
    pub clean: bool,

    /// Remove build output and staging root, then exit
    #[arg(long)]
    pub clean_partial: bool,

    /// Do not ask for confirmation before cleaning
    #[arg(short, long)]
    pub yes: bool,

    /// Build a kernel collection after the kernel
    #[arg(long = "kc", env = "BUILDKC", value_parser = FalseyValueParser::new())]
    pub build_collection: bool,

    /// Kernel Debug Kit installation root
    #[arg(long = "kdk-dirs", env = "KDKROOT", default_value = defaults::SYSTEM_KDK_ROOT)]
    pub kdk_root: PathBuf,

    /// Kernel configuration (RELEASE, DEVELOPMENT, DEBUG, KASAN)
    #[arg(long, env = "KERNEL_CONFIG", default_value = defaults::DEFAULT_KERNEL_CONFIG)]
    pub kernel_config: String,

    /// Architecture (ARM64, X86_64)
    #[arg(long, env = "ARCH_CONFIG", default_value = defaults::DEFAULT_ARCH_CONFIG)]
    pub arch_config: String,

    /// Machine variant (ignored for X86_64)
    #[arg(long, env = "MACHINE_CONFIG", default_value = defaults::DEFAULT_MACHINE_CONFIG)]
    pub machine_config: String,

    /// macOS release to build (prompted for when unset)
    #[arg(long, env = "MACOS_VERSION")]
    pub macos_version: Option<String>,

    /// Generate a compilation database instead of a kernel
    #[arg(long, env = "JSONDB", value_parser = FalseyValueParser::new())]
    pub jsondb: bool,

    /// Leave the kernel sources free of optional patches
    #[arg(long, env = "CODEQL", value_parser = FalseyValueParser::new())]
    pub codeql: bool,

    /// Regex of extension identifiers left out of the kernel collection
    #[arg(long, env = "KC_FILTER", default_value = defaults::DEFAULT_KC_FILTER)]
    pub kc_filter: String,

    /// Workspace directory
    #[arg(long, env = "WORK_DIR", default_value = ".")]
    pub work_dir: PathBuf,

    /// Base URL for Kernel Debug Kit images
    #[arg(long, env = "KDK_URL", default_value = urls::KDK_DOWNLOAD_BASE)]
    pub kdk_url: String,

    /// Base URL for release manifests
    #[arg(long, env = "MANIFEST_URL", default_value = urls::RELEASE_MANIFEST_BASE, hide = true)]
    pub manifest_url: String,

    /// Parallel build jobs (defaults to the number of CPUs)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("VERGEN_GIT_SHA"),
        " ",
        env!("VERGEN_BUILD_TIMESTAMP"),
        ")"
    )
}

impl Cli {
    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let work_dir = absolute(&self.work_dir)?;

        if let Some(scope) = self.clean_scope() {
            return commands::clean::execute(&Workspace::new(&work_dir), scope, self.yes);
        }

        let release = match &self.macos_version {
            Some(release) => release.clone(),
            None => output::prompt_release()?,
        };

        let config = BuildConfig::from_settings(&self.settings(&release, &work_dir))?;
        commands::build::execute(&config).await
    }

    /// Requested clean, if any
    pub fn clean_scope(&self) -> Option<CleanScope> {
        if self.clean {
            Some(CleanScope::Full)
        } else if self.clean_partial {
            Some(CleanScope::Partial)
        } else {
            None
        }
    }

    /// Raw settings for a release
    pub fn settings(&self, release: &str, work_dir: &Path) -> Settings {
        Settings {
            kernel_config: self.kernel_config.clone(),
            arch: self.arch_config.clone(),
            machine: self.machine_config.clone(),
            release: release.to_string(),
            compile_db: self.jsondb,
            build_collection: self.build_collection,
            pristine: self.codeql,
            kc_filter: self.kc_filter.clone(),
            kdk_root: self.kdk_root.clone(),
            work_dir: work_dir.to_path_buf(),
            kdk_url: self.kdk_url.clone(),
            manifest_url: self.manifest_url.clone(),
            jobs: self.jobs,
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    Ok(cwd.join(path))
}
