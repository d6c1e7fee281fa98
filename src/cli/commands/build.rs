//! CLI implementation of the default build run

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::output::{self, status};
use crate::config::BuildConfig;
use crate::core::collection::{CollectionComposer, ComposeOutcome};
use crate::core::patch::{GitApply, PatchEngine};
use crate::core::pipeline::{PipelineReport, StagedBuildPipeline};
use crate::core::release::{HttpManifestSource, VersionResolver};
use crate::core::stage::kernel_path;
use crate::core::toolkit::{ImageFetcher, ToolkitProvisioner};
use crate::core::workspace::{ArtifactFetcher, Workspace};
use crate::error::DownloadError;
use crate::infra::disk_image::Hdiutil;
use crate::infra::download::{DownloadManager, ProgressCallback};
use crate::infra::filesystem::{self, FsCheck};
use crate::infra::git::GitCloner;
use crate::infra::process::SystemRunner;

/// Toolkit image download with a progress bar
struct BarFetcher {
    manager: DownloadManager,
}

impl ImageFetcher for BarFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bar = output::create_download_bar(&name);

        let progress_bar = bar.clone();
        let callback: ProgressCallback = Box::new(move |downloaded: u64, total: u64| {
            progress_bar.set_length(total);
            progress_bar.set_position(downloaded);
        });

        let result = self.manager.download(url, dest, Some(callback)).await;
        bar.finish_and_clear();

        let result = result?;
        println!(
            "{} Downloaded {name} ({} bytes, sha256 {})",
            status::SUCCESS,
            result.size,
            result.checksum
        );
        Ok(())
    }
}

/// Execute a build
pub async fn execute(config: &BuildConfig) -> Result<()> {
    let workspace = Workspace::new(&config.work_dir);
    filesystem::create_dir_all(workspace.root())?;
    workspace.verify_links()?;

    println!(
        "{} Building {} for macOS {}",
        status::INFO,
        config.target.kernel_name(),
        config.release
    );

    let runner = SystemRunner;
    let mounter = Hdiutil::new(&runner);
    let fetcher = BarFetcher {
        manager: DownloadManager::new(),
    };
    let kdk = ToolkitProvisioner::new(config, &workspace, &runner, &mounter, &fetcher)
        .ensure()
        .await
        .context("Failed to provision the Kernel Debug Kit")?;
    println!("{} Kernel Debug Kit: {}", status::SUCCESS, kdk.display());

    let resolver = VersionResolver::new(HttpManifestSource::new(&config.manifest_url), config.release);
    let cloner = GitCloner;
    let sources = ArtifactFetcher::new(&workspace, &cloner);
    let git_apply = GitApply::new(&runner);
    let patcher = PatchEngine::new(&git_apply);
    let pipeline = StagedBuildPipeline::new(
        config, &workspace, &resolver, &sources, &runner, &FsCheck, &patcher,
    );

    let report = pipeline.run().await?;
    print_summary(config, &workspace, &report);

    if config.build_collection {
        let composer = CollectionComposer::new(config, &runner, &FsCheck, &workspace.build_dir());
        match composer.compose(&kernel_path(config, &workspace), &config.kc_filter)? {
            ComposeOutcome::Skipped => {
                println!("{} No kernel was built; skipping kernel collection", status::WARNING);
            }
            ComposeOutcome::Composed(paths) => {
                for path in paths {
                    println!("{} Kernel collection: {}", status::SUCCESS, path.display());
                }
            }
        }
    }

    Ok(())
}

fn print_summary(config: &BuildConfig, workspace: &Workspace, report: &PipelineReport) {
    println!(
        "{} {} stages built, {} already up to date",
        status::SUCCESS,
        report.built.len(),
        report.skipped.len()
    );

    if let Some(patches) = &report.patches {
        println!(
            "  {} substitutions, {} patches applied, {} skipped",
            patches.substituted,
            patches.applied.len(),
            patches.skipped.len()
        );
    }

    match &report.compile_db {
        Some(db) => println!("{} Compilation database: {}", status::SUCCESS, db.display()),
        None if !config.compile_db => println!(
            "{} Kernel: {}",
            status::SUCCESS,
            kernel_path(config, workspace).display()
        ),
        None => {}
    }
}
