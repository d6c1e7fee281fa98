//! Staged build pipeline
//!
//! Runs [`StageId::ORDER`] one stage at a time. A stage whose sentinel
//! exists is skipped; otherwise its source is resolved and fetched, the
//! kernel tree is prepared once per run, and the stage's commands run to
//! completion before the next stage starts. Any failure ends the run.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{defaults, BuildConfig};
use crate::core::patch::{kernel_substitutions, PatchEngine, PatchReport, PatchSet};
use crate::core::release::{Component, ManifestSource, VersionResolver};
use crate::core::stage::{StageContext, StageId};
use crate::core::workspace::{ArtifactFetcher, Workspace};
use crate::error::BuildError;
use crate::infra::filesystem::{self, ArtifactCheck, ProgressLog};
use crate::infra::process::CommandRunner;

/// Whether a stage still has work to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Sentinel absent
    Pending,
    /// Sentinel present
    Complete,
}

/// What a pipeline run did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Stages that ran
    pub built: Vec<StageId>,
    /// Stages skipped because their sentinel existed
    pub skipped: Vec<StageId>,
    /// Kernel tree preparation, absent only when no kernel tree exists yet
    pub patches: Option<PatchReport>,
    /// Harvested compilation database
    pub compile_db: Option<PathBuf>,
}

/// Orchestrates the ordered build stages for one configuration
pub struct StagedBuildPipeline<'a, S> {
    config: &'a BuildConfig,
    workspace: &'a Workspace,
    resolver: &'a VersionResolver<S>,
    fetcher: &'a ArtifactFetcher<'a>,
    runner: &'a dyn CommandRunner,
    artifacts: &'a dyn ArtifactCheck,
    patcher: &'a PatchEngine<'a>,
    progress: ProgressLog,
}

impl<'a, S: ManifestSource> StagedBuildPipeline<'a, S> {
    /// Create a pipeline
    pub fn new(
        config: &'a BuildConfig,
        workspace: &'a Workspace,
        resolver: &'a VersionResolver<S>,
        fetcher: &'a ArtifactFetcher<'a>,
        runner: &'a dyn CommandRunner,
        artifacts: &'a dyn ArtifactCheck,
        patcher: &'a PatchEngine<'a>,
    ) -> Self {
        Self {
            config,
            workspace,
            resolver,
            fetcher,
            runner,
            artifacts,
            patcher,
            progress: ProgressLog::new(workspace.progress_log()),
        }
    }

    /// Current state of a stage
    pub fn state(&self, stage: StageId) -> StageState {
        if self.artifacts.exists(&stage.sentinel(self.config, self.workspace)) {
            StageState::Complete
        } else {
            StageState::Pending
        }
    }

    /// State of every stage, in run order
    pub fn plan(&self) -> Vec<(StageId, StageState)> {
        StageId::ORDER
            .iter()
            .map(|stage| (*stage, self.state(*stage)))
            .collect()
    }

    /// Run every pending stage in order
    pub async fn run(&self) -> Result<PipelineReport, BuildError> {
        self.workspace.verify_links()?;
        filesystem::create_dir_all(&self.workspace.build_dir())?;
        filesystem::create_dir_all(&self.workspace.fakeroot_dir())?;

        let mut report = PipelineReport::default();

        for stage in StageId::ORDER {
            if self.state(stage) == StageState::Complete {
                tracing::info!("{stage}: already built, skipping");
                report.skipped.push(stage);
                continue;
            }

            tracing::info!("{stage}: building");
            self.progress.record(stage.name())?;

            if let Some(required) = stage.precondition(self.config) {
                if !self.artifacts.exists(&required) {
                    return Err(BuildError::MissingPrecondition {
                        stage: stage.name().to_string(),
                        path: required,
                    });
                }
            }

            let component = stage.component();
            let tag = self.resolver.resolve(component).await?;
            let source = self.fetcher.ensure(component, &tag)?;

            if component == Component::Xnu && report.patches.is_none() {
                report.patches = Some(self.prepare_kernel_tree(&source)?);
            }

            self.run_stage(stage, &source)?;

            if stage == StageId::Xnu && self.config.compile_db {
                report.compile_db = Some(self.harvest_compile_db(&source)?);
            }

            report.built.push(stage);
        }

        // Substitutions apply every run, even when no kernel-tree stage was pending
        if report.patches.is_none() {
            let tree = self.workspace.component_link(Component::Xnu);
            if tree.is_dir() {
                report.patches = Some(self.prepare_kernel_tree(&tree)?);
            }
        }

        Ok(report)
    }

    fn run_stage(&self, stage: StageId, source: &Path) -> Result<(), BuildError> {
        let ctx = StageContext::new(self.config, self.workspace, source);

        for invocation in stage.invocations(&ctx) {
            tracing::debug!("[{stage}] {invocation}");
            let status = self
                .runner
                .run(&invocation)
                .map_err(|e| BuildError::stage_failed(stage.name(), e))?;

            if status != 0 {
                if stage.tolerates_failure(self.config) {
                    tracing::warn!("{stage}: {} exited with status {status}; continuing", invocation.program);
                } else {
                    return Err(BuildError::stage_failed(
                        stage.name(),
                        format!("{} exited with status {status}", invocation.program),
                    ));
                }
            }
        }

        Ok(())
    }

    fn prepare_kernel_tree(&self, tree: &Path) -> Result<PatchReport, BuildError> {
        let rules = kernel_substitutions(&self.workspace.fakeroot_dir(), self.config.release.layout)?;
        let set = PatchSet::for_release(&self.workspace.patches_dir(), self.config.release.version)?;
        let report = self.patcher.apply(tree, &rules, &set, self.config.pristine)?;

        tracing::info!(
            "Kernel tree prepared: {} substitutions, {} patches applied, {} skipped",
            report.substituted,
            report.applied.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Copy the generated database next to the sources and into the release cache
    fn harvest_compile_db(&self, source: &Path) -> Result<PathBuf, BuildError> {
        let obj_root = self
            .workspace
            .build_dir()
            .join("xnu.obj")
            .join(self.config.target.object_dir_name());
        let found = WalkDir::new(&obj_root)
            .into_iter()
            .filter_map(Result::ok)
            .find(|entry| entry.file_type().is_file() && entry.file_name() == OsStr::new(defaults::COMPILE_DB))
            .map(walkdir::DirEntry::into_path)
            .ok_or_else(|| {
                BuildError::stage_failed(
                    StageId::Xnu.name(),
                    format!("no {} produced under {}", defaults::COMPILE_DB, obj_root.display()),
                )
            })?;

        filesystem::copy_file(&found, &source.join(defaults::COMPILE_DB))?;

        let cached = self
            .workspace
            .cache_dir(self.config.release.version)
            .join(defaults::COMPILE_DB);
        filesystem::copy_file(&found, &cached)?;

        tracing::info!("Compilation database cached at {}", cached.display());
        Ok(cached)
    }
}
