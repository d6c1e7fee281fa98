//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

use xnu_build::config::settings::Settings;
use xnu_build::config::BuildConfig;
use xnu_build::core::patch::{PatchCheck, PatchTool};
use xnu_build::core::release::{Component, ManifestSource, ReleaseInfo, ReleaseManifest};
use xnu_build::core::stage::StageId;
use xnu_build::core::workspace::Workspace;
use xnu_build::error::{BuildError, PatchError};
use xnu_build::infra::git::{GitError, SourceCloner};
use xnu_build::infra::process::{CommandOutput, CommandRunner, Invocation, ProcessError};

/// Test workspace context
///
/// Creates a temporary directory acting as the workspace root and provides
/// utilities for setting up test scenarios.
pub struct TestWorkspace {
    /// Temporary directory for the workspace
    pub dir: TempDir,
}

impl TestWorkspace {
    /// Create a new workspace in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the workspace directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Workspace layout over the temporary directory
    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.dir.path())
    }

    /// Configuration for `release` with a workspace-local toolkit root
    pub fn config(&self, release: &str) -> BuildConfig {
        let mut settings = Settings::new(release, self.dir.path());
        settings.kdk_root = self.dir.path().join("kdks");
        settings.jobs = Some(2);
        BuildConfig::from_settings(&settings).expect("Invalid test settings")
    }

    /// Create a file in the workspace
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the workspace
    pub fn create_dir(&self, name: &str) {
        std::fs::create_dir_all(self.dir.path().join(name)).expect("Failed to create directory");
    }

    /// Point a component link at a source tree inside the workspace
    pub fn link_component(&self, component: Component, tag: &str) {
        let ws = self.workspace();
        let store = ws.source_path(tag);
        std::fs::create_dir_all(&store).expect("Failed to create source tree");
        std::os::unix::fs::symlink(&store, ws.component_link(component))
            .expect("Failed to create link");
    }

    /// Check whether a path exists in the workspace, following links
    pub fn exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Check whether a path exists in the workspace, not following links
    pub fn entry_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).symlink_metadata().is_ok()
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the xnu-build binary against a workspace with stdin closed
pub fn run_cli(workspace: &TestWorkspace, args: &[&str], envs: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_xnu-build"));
    cmd.current_dir(workspace.path())
        .env_remove("MACOS_VERSION")
        .env_remove("KDKROOT")
        .env("WORK_DIR", workspace.path())
        .stdin(Stdio::null())
        .args(args);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().expect("Failed to execute xnu-build")
}

/// Tag a manifest entry gets in tests
pub fn test_tag(component: Component) -> String {
    format!("{}-1.0", component.name())
}

/// Manifest source answering from memory and counting requests
#[derive(Default)]
pub struct StaticManifest {
    pub fetches: RefCell<usize>,
}

impl ManifestSource for StaticManifest {
    async fn fetch(&self, release: &ReleaseInfo) -> Result<ReleaseManifest, BuildError> {
        *self.fetches.borrow_mut() += 1;
        Ok(ReleaseManifest::new(
            release.version,
            Component::ALL
                .iter()
                .map(|c| (c.name().to_string(), test_tag(*c))),
        ))
    }
}

/// Cloner writing a minimal kernel tree
#[derive(Default)]
pub struct TreeCloner {
    pub clones: RefCell<Vec<String>>,
}

impl SourceCloner for TreeCloner {
    fn clone_tag(&self, _url: &str, tag: &str, dest: &Path) -> Result<(), GitError> {
        self.clones.borrow_mut().push(tag.to_string());
        let io = |e: std::io::Error| GitError::IoError {
            path: dest.to_path_buf(),
            error: e.to_string(),
        };
        std::fs::create_dir_all(dest.join("makedefs")).map_err(io)?;
        std::fs::write(
            dest.join("makedefs/MakeInc.cmd"),
            "AVAILABILITY_PL = $(SRCROOT)/availability.pl\n",
        )
        .map_err(io)?;
        std::fs::write(
            dest.join("makedefs/MakeInc.def"),
            "LDFLAGS_KERNEL_SDK = -lfirehose_kernel\nINCFLAGS_SDK = -I$(SDKROOT)/usr/local/include\n",
        )
        .map_err(io)?;
        Ok(())
    }
}

/// Patch tool that treats every patch as already applied
pub struct NoPatches;

impl PatchTool for NoPatches {
    fn check(&self, _tree: &Path, _patch: &Path) -> Result<PatchCheck, PatchError> {
        Ok(PatchCheck::AlreadyApplied)
    }

    fn apply(&self, _tree: &Path, _patch: &Path) -> Result<(), PatchError> {
        Ok(())
    }
}

/// Runner that creates each stage's sentinel on success
///
/// With `compile_db` set, the kernel stage instead writes a compilation
/// database under the kernel object root and exits non-zero, the way an
/// interrupted database build does.
pub struct StagingRunner {
    sentinels: Vec<(String, PathBuf)>,
    obj_root: PathBuf,
    compile_db: bool,
    pub calls: RefCell<Vec<String>>,
}

impl StagingRunner {
    pub fn new(config: &BuildConfig, ws: &Workspace) -> Self {
        Self {
            sentinels: StageId::ORDER
                .iter()
                .map(|s| (s.name().to_string(), s.sentinel(config, ws)))
                .collect(),
            obj_root: ws
                .build_dir()
                .join("xnu.obj")
                .join(config.target.object_dir_name()),
            compile_db: config.compile_db,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl CommandRunner for StagingRunner {
    fn run(&self, invocation: &Invocation) -> Result<i32, ProcessError> {
        self.calls.borrow_mut().push(invocation.label.clone());

        if self.compile_db && invocation.label == StageId::Xnu.name() {
            std::fs::create_dir_all(&self.obj_root).unwrap();
            std::fs::write(self.obj_root.join("compile_commands.json"), "[]\n").unwrap();
            return Ok(2);
        }

        let (_, sentinel) = self
            .sentinels
            .iter()
            .find(|(name, _)| *name == invocation.label)
            .unwrap();
        std::fs::create_dir_all(sentinel.parent().unwrap()).unwrap();
        std::fs::write(sentinel, "").unwrap();
        Ok(0)
    }

    fn capture(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        Ok(CommandOutput {
            status: self.run(invocation)?,
            ..CommandOutput::default()
        })
    }
}
