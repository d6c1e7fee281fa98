//! Source tree patching
//!
//! Two kinds of edits are made to the kernel tree before it is built:
//!
//! - [`Substitution`]s: required rewrites of build-configuration lines so
//!   the kernel build finds the staging root instead of a system SDK. They
//!   run every time and replacing a line with itself is a no-op.
//! - An optional [`PatchSet`] of release-specific patch files. Each patch
//!   is tested first; one that is already applied or does not fit the tree
//!   is skipped. Only a patch file the tool cannot parse is an error.

use std::path::{Path, PathBuf};

use regex::{NoExpand, Regex};

use crate::core::release::SourceLayout;
use crate::error::{BuildError, FilesystemError, PatchError};
use crate::infra::filesystem;
use crate::infra::process::{CommandRunner, Invocation};

/// Replaces every line starting with a prefix by a fixed line
#[derive(Debug, Clone)]
pub struct Substitution {
    /// File relative to the tree root
    pub file: PathBuf,
    pattern: Regex,
    line: String,
}

impl Substitution {
    /// Rule replacing lines that begin with the variable `name` assignment
    ///
    /// `line` must itself start with `name` so the rule is stable.
    pub fn assignment(file: &str, name: &str, line: String) -> Result<Self, PatchError> {
        let pattern = Regex::new(&format!(r"(?m)^{}[ \t]*[:?]?=.*$", regex::escape(name)))
            .map_err(|e| PatchError::InvalidRule {
                file: PathBuf::from(file),
                error: e.to_string(),
            })?;
        Ok(Self {
            file: PathBuf::from(file),
            pattern,
            line,
        })
    }

    /// Rewrite `content`, returning `None` when nothing changes
    pub fn apply_to(&self, content: &str) -> Option<String> {
        let replaced = self.pattern.replace_all(content, NoExpand(&self.line));
        (replaced != content).then(|| replaced.into_owned())
    }
}

/// Rules redirecting the kernel build to the staging root
pub fn kernel_substitutions(
    fakeroot: &Path,
    layout: SourceLayout,
) -> Result<Vec<Substitution>, PatchError> {
    let fakeroot = fakeroot.display();
    let script = match layout {
        SourceLayout::Legacy => "availability.pl",
        SourceLayout::Modern => "availability",
    };

    Ok(vec![
        Substitution::assignment(
            "makedefs/MakeInc.cmd",
            "AVAILABILITY_PL",
            format!("AVAILABILITY_PL = {fakeroot}/usr/local/libexec/{script}"),
        )?,
        Substitution::assignment(
            "makedefs/MakeInc.def",
            "LDFLAGS_KERNEL_SDK",
            format!("LDFLAGS_KERNEL_SDK = -L{fakeroot}/usr/local/lib/kernel -lfirehose_kernel"),
        )?,
        Substitution::assignment(
            "makedefs/MakeInc.def",
            "INCFLAGS_SDK",
            format!("INCFLAGS_SDK = -I{fakeroot}/usr/local/include"),
        )?,
    ])
}

/// Apply substitution rules to a tree, returning how many rules rewrote their file
pub fn apply_substitutions(tree: &Path, rules: &[Substitution]) -> Result<usize, FilesystemError> {
    let mut changed = 0;

    for rule in rules {
        let path = tree.join(&rule.file);
        let content = filesystem::read_file(&path)?;
        if let Some(updated) = rule.apply_to(&content) {
            filesystem::write_file(&path, &updated)?;
            tracing::debug!("Rewrote {}", path.display());
            changed += 1;
        }
    }

    Ok(changed)
}

/// Ordered patch files for one release
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    patches: Vec<PathBuf>,
}

impl PatchSet {
    /// Patch set from explicit files, applied in the given order
    pub fn new(patches: Vec<PathBuf>) -> Self {
        Self { patches }
    }

    /// `*.patch` files under `<patches_dir>/<release>`, sorted by name
    ///
    /// A release without a patch directory has an empty set.
    pub fn for_release(patches_dir: &Path, release: &str) -> Result<Self, FilesystemError> {
        let dir = patches_dir.join(release);
        if !dir.is_dir() {
            return Ok(Self::default());
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| FilesystemError::ReadFile {
            path: dir.clone(),
            error: e.to_string(),
        })?;

        let mut patches: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "patch"))
            .collect();
        patches.sort();

        Ok(Self { patches })
    }

    /// Patch files in application order
    pub fn patches(&self) -> &[PathBuf] {
        &self.patches
    }

    /// Whether there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// Whether a patch fits the current tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchCheck {
    /// Applies cleanly
    Applicable,
    /// Tree already matches the patched state
    AlreadyApplied,
    /// Context does not match
    Conflicting,
}

/// Tests and applies patch files
pub trait PatchTool {
    /// Classify `patch` against `tree` without modifying it
    fn check(&self, tree: &Path, patch: &Path) -> Result<PatchCheck, PatchError>;

    /// Apply `patch` to `tree`
    fn apply(&self, tree: &Path, patch: &Path) -> Result<(), PatchError>;
}

/// Patch tool driving `git apply`
pub struct GitApply<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> GitApply<'a> {
    /// Create a tool running git through `runner`
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn git_apply(&self, tree: &Path, patch: &Path, flags: &[&str]) -> Result<(bool, String), PatchError> {
        let patch = patch.canonicalize().unwrap_or_else(|_| patch.to_path_buf());
        let inv = Invocation::new("patch", "git")
            .arg("apply")
            .args(flags.iter().copied())
            .path_arg(&patch)
            .current_dir(tree);

        let output = self.runner.capture(&inv).map_err(|e| PatchError::ToolFailed {
            patch: patch.clone(),
            error: e.to_string(),
        })?;
        Ok((output.success(), output.stderr))
    }
}

/// Markers in `git apply` output for input that is not a usable patch
const MALFORMED_MARKERS: &[&str] = &[
    "corrupt patch",
    "No valid patches",
    "patch fragment without header",
    "unrecognized input",
];

impl PatchTool for GitApply<'_> {
    fn check(&self, tree: &Path, patch: &Path) -> Result<PatchCheck, PatchError> {
        let (ok, stderr) = self.git_apply(tree, patch, &["--check"])?;
        if ok {
            return Ok(PatchCheck::Applicable);
        }

        if MALFORMED_MARKERS.iter().any(|m| stderr.contains(m)) {
            return Err(PatchError::Malformed {
                patch: patch.to_path_buf(),
                error: stderr.trim().to_string(),
            });
        }

        let (reverse_ok, _) = self.git_apply(tree, patch, &["--reverse", "--check"])?;
        Ok(if reverse_ok {
            PatchCheck::AlreadyApplied
        } else {
            PatchCheck::Conflicting
        })
    }

    fn apply(&self, tree: &Path, patch: &Path) -> Result<(), PatchError> {
        let (ok, stderr) = self.git_apply(tree, patch, &[])?;
        if ok {
            Ok(())
        } else {
            Err(PatchError::ToolFailed {
                patch: patch.to_path_buf(),
                error: stderr.trim().to_string(),
            })
        }
    }
}

/// Outcome of preparing a tree
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatchReport {
    /// Substitution rules that rewrote their file
    pub substituted: usize,
    /// Patches applied this run
    pub applied: Vec<PathBuf>,
    /// Patches skipped (already applied, conflicting, or pristine mode)
    pub skipped: Vec<PathBuf>,
}

/// Prepares a fetched tree for building
pub struct PatchEngine<'a> {
    tool: &'a dyn PatchTool,
}

impl<'a> PatchEngine<'a> {
    /// Create an engine applying patches with `tool`
    pub fn new(tool: &'a dyn PatchTool) -> Self {
        Self { tool }
    }

    /// Run the substitutions, then the patch set unless `pristine`
    pub fn apply(
        &self,
        tree: &Path,
        rules: &[Substitution],
        set: &PatchSet,
        pristine: bool,
    ) -> Result<PatchReport, BuildError> {
        let mut report = PatchReport {
            substituted: apply_substitutions(tree, rules)?,
            ..PatchReport::default()
        };

        if pristine {
            tracing::info!("Pristine tree requested; not applying {} patches", set.patches().len());
            report.skipped = set.patches().to_vec();
            return Ok(report);
        }

        for patch in set.patches() {
            let name = patch.display();
            match self.tool.check(tree, patch)? {
                PatchCheck::Applicable => match self.tool.apply(tree, patch) {
                    Ok(()) => {
                        tracing::info!("Applied {name}");
                        report.applied.push(patch.clone());
                    }
                    Err(e) => {
                        tracing::warn!("Skipping {name}: {e}");
                        report.skipped.push(patch.clone());
                    }
                },
                PatchCheck::AlreadyApplied => {
                    tracing::debug!("{name} already applied");
                    report.skipped.push(patch.clone());
                }
                PatchCheck::Conflicting => {
                    tracing::warn!("Skipping {name}: does not apply to this tree");
                    report.skipped.push(patch.clone());
                }
            }
        }

        Ok(report)
    }
}
