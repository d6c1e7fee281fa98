//! Kernel collection composition
//!
//! Combines the built kernel with the host's extensions into a bootable
//! collection using `kmutil`. Extensions whose identifiers match the
//! configured filter are left out, along with anything depending on them.

use std::path::{Path, PathBuf};

use semver::Version;

use crate::config::{defaults, BuildConfig};
use crate::core::target::Arch;
use crate::error::BuildError;
use crate::infra::filesystem::ArtifactCheck;
use crate::infra::process::{CommandRunner, Invocation};

const STAGE: &str = "kernel_collection";

/// Extension search roots on the host
const EXTENSION_ROOTS: &[&str] = &["/System/Library/Extensions", "/System/Library/DriverExtensions"];

/// Per-architecture shape of a `kmutil create` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionRecipe {
    /// Single boot collection for arm64e
    Arm64,
    /// Boot and system collections for x86_64
    X86_64,
}

impl CollectionRecipe {
    /// Recipe for a target architecture
    pub fn for_arch(arch: Arch) -> Self {
        match arch {
            Arch::Arm64 => CollectionRecipe::Arm64,
            Arch::X86_64 => CollectionRecipe::X86_64,
        }
    }

    /// Architecture slice passed to `kmutil -a`
    pub fn slice(&self) -> &'static str {
        match self {
            CollectionRecipe::Arm64 => Arch::Arm64.slice_name(),
            CollectionRecipe::X86_64 => Arch::X86_64.slice_name(),
        }
    }

    /// Collection kinds passed to `kmutil -n`
    pub fn kinds(&self) -> &'static [&'static str] {
        match self {
            CollectionRecipe::Arm64 => &["boot"],
            CollectionRecipe::X86_64 => &["boot", "sys"],
        }
    }

    /// Identifiers excluded regardless of the filter
    pub fn fixed_exclusions(&self) -> &'static [&'static str] {
        match self {
            CollectionRecipe::Arm64 => &[],
            CollectionRecipe::X86_64 => &[defaults::X86_ELIDED_IDENTIFIER],
        }
    }

    /// Output paths, boot collection first
    pub fn outputs(&self, out_dir: &Path, collection_name: &str) -> Vec<PathBuf> {
        match self {
            CollectionRecipe::Arm64 => vec![out_dir.join(collection_name)],
            CollectionRecipe::X86_64 => vec![
                out_dir.join(collection_name),
                out_dir.join(format!("{collection_name}.sys")),
            ],
        }
    }

    /// The `kmutil create` invocation
    pub fn invocation(
        &self,
        kernel: &Path,
        outputs: &[PathBuf],
        kdk: Option<&Path>,
        exclusions: &[String],
    ) -> Invocation {
        let mut inv = Invocation::new(STAGE, "kmutil")
            .args(["create", "-z", "-a", self.slice(), "-n"])
            .args(self.kinds().iter().copied());

        for (flag, output) in ["-B", "-S"].iter().zip(outputs) {
            inv = inv.arg(*flag).path_arg(output);
        }

        inv = inv.arg("-k").path_arg(kernel);
        if let Some(kdk) = kdk {
            inv = inv.arg("--kdk").path_arg(kdk);
        }
        for root in EXTENSION_ROOTS {
            inv = inv.args(["-r", *root]);
        }

        let fixed = self.fixed_exclusions().iter().map(|s| (*s).to_string());
        for identifier in fixed.chain(exclusions.iter().cloned()) {
            inv = inv.arg("--elide-identifier").arg(identifier);
        }
        inv
    }
}

/// Result of a composition request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeOutcome {
    /// Kernel not built yet; nothing done
    Skipped,
    /// Collections written
    Composed(Vec<PathBuf>),
}

/// Major version from `sw_vers -productVersion` output
pub fn host_major_version(output: &str) -> Option<u64> {
    let raw = output.trim();
    let padded = match raw.matches('.').count() {
        0 => format!("{raw}.0.0"),
        1 => format!("{raw}.0"),
        _ => raw.to_string(),
    };
    Version::parse(&padded).ok().map(|v| v.major)
}

/// Extension identifiers from `ipsw kernel kmutil inspect -x` output
pub fn parse_exclusions(output: &str) -> Vec<String> {
    output
        .split_whitespace()
        .filter(|token| !token.starts_with('-'))
        .map(str::to_string)
        .collect()
}

/// Builds kernel collections after a successful kernel build
pub struct CollectionComposer<'a> {
    config: &'a BuildConfig,
    runner: &'a dyn CommandRunner,
    artifacts: &'a dyn ArtifactCheck,
    out_dir: PathBuf,
}

impl<'a> CollectionComposer<'a> {
    /// Create a composer writing collections into `out_dir`
    pub fn new(
        config: &'a BuildConfig,
        runner: &'a dyn CommandRunner,
        artifacts: &'a dyn ArtifactCheck,
        out_dir: &Path,
    ) -> Self {
        Self {
            config,
            runner,
            artifacts,
            out_dir: out_dir.to_path_buf(),
        }
    }

    /// Compose collections around `kernel`, excluding identifiers matching `filter`
    pub fn compose(&self, kernel: &Path, filter: &str) -> Result<ComposeOutcome, BuildError> {
        if !self.artifacts.exists(kernel) {
            tracing::info!("No kernel at {}; skipping collection", kernel.display());
            return Ok(ComposeOutcome::Skipped);
        }

        let recipe = CollectionRecipe::for_arch(self.config.target.arch);
        let kdk = self.kdk_flag()?;
        let exclusions = self.exclusions(filter)?;
        tracing::debug!("Excluding {} extensions", exclusions.len());

        let outputs = recipe.outputs(&self.out_dir, &self.config.target.collection_name());
        let inv = recipe.invocation(kernel, &outputs, kdk.as_deref(), &exclusions);

        let status = self
            .runner
            .run(&inv)
            .map_err(|e| BuildError::stage_failed(STAGE, e))?;
        if status != 0 {
            return Err(BuildError::stage_failed(
                STAGE,
                format!("kmutil exited with status {status}"),
            ));
        }

        Ok(ComposeOutcome::Composed(outputs))
    }

    /// Toolkit path for `--kdk` when the host's kmutil accepts it
    fn kdk_flag(&self) -> Result<Option<PathBuf>, BuildError> {
        let inv = Invocation::new(STAGE, "sw_vers").arg("-productVersion");
        let output = self
            .runner
            .capture(&inv)
            .map_err(|e| BuildError::stage_failed(STAGE, e))?;

        let major = host_major_version(&output.stdout);
        tracing::debug!("Host major version: {major:?}");

        Ok(match major {
            Some(major) if major >= defaults::KMUTIL_KDK_FLAG_MIN_MAJOR => {
                Some(self.config.kdk_path())
            }
            _ => None,
        })
    }

    fn exclusions(&self, filter: &str) -> Result<Vec<String>, BuildError> {
        let inv = Invocation::new(STAGE, "ipsw")
            .args(["kernel", "kmutil", "inspect", "-x", "--filter", filter]);
        let output = self
            .runner
            .capture(&inv)
            .map_err(|e| BuildError::stage_failed(STAGE, e))?;

        if !output.success() {
            return Err(BuildError::stage_failed(
                STAGE,
                format!("ipsw exited with status {}: {}", output.status, output.stderr.trim()),
            ));
        }
        Ok(parse_exclusions(&output.stdout))
    }
}
