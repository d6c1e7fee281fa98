//! Build stage definitions
//!
//! Each stage installs one component into the staging root. Stages run in
//! [`StageId::ORDER`]; every stage reads what the earlier ones staged.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{defaults, BuildConfig};
use crate::core::release::{Component, SourceLayout};
use crate::core::target::Arch;
use crate::core::workspace::Workspace;
use crate::infra::process::Invocation;

/// One step of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    /// Mach interface generator
    BootstrapCmds,
    /// CTF conversion and merge tools
    Dtrace,
    /// Availability version script
    AvailabilityVersions,
    /// Kernel headers
    XnuHeaders,
    /// System framework headers
    LibsystemHeaders,
    /// System call layer headers
    LibsyscallHeaders,
    /// Platform library headers
    Libplatform,
    /// Firehose kernel logging library
    Libdispatch,
    /// The kernel itself
    Xnu,
}

impl StageId {
    /// Dependency order; each stage consumes the staging output of all before it
    pub const ORDER: [StageId; 9] = [
        StageId::BootstrapCmds,
        StageId::Dtrace,
        StageId::AvailabilityVersions,
        StageId::XnuHeaders,
        StageId::LibsystemHeaders,
        StageId::LibsyscallHeaders,
        StageId::Libplatform,
        StageId::Libdispatch,
        StageId::Xnu,
    ];

    /// Name used in logs and the progress log
    pub fn name(&self) -> &'static str {
        match self {
            StageId::BootstrapCmds => "bootstrap_cmds",
            StageId::Dtrace => "dtrace",
            StageId::AvailabilityVersions => "AvailabilityVersions",
            StageId::XnuHeaders => "xnu_headers",
            StageId::LibsystemHeaders => "Libsystem_headers",
            StageId::LibsyscallHeaders => "libsyscall_headers",
            StageId::Libplatform => "libplatform",
            StageId::Libdispatch => "libdispatch",
            StageId::Xnu => "xnu",
        }
    }

    /// Component whose source tree the stage builds
    pub fn component(&self) -> Component {
        match self {
            StageId::BootstrapCmds => Component::BootstrapCmds,
            StageId::Dtrace => Component::Dtrace,
            StageId::AvailabilityVersions => Component::AvailabilityVersions,
            StageId::XnuHeaders | StageId::LibsyscallHeaders | StageId::Xnu => Component::Xnu,
            StageId::LibsystemHeaders => Component::Libsystem,
            StageId::Libplatform => Component::Libplatform,
            StageId::Libdispatch => Component::Libdispatch,
        }
    }

    /// Artifact whose presence marks the stage complete
    pub fn sentinel(&self, config: &BuildConfig, workspace: &Workspace) -> PathBuf {
        let fakeroot = workspace.fakeroot_dir();
        match self {
            StageId::BootstrapCmds => fakeroot.join("usr/local/bin/mig"),
            StageId::Dtrace => fakeroot.join("usr/local/bin/ctfmerge"),
            StageId::AvailabilityVersions => {
                fakeroot.join("usr/local/libexec").join(availability_script(config.release.layout))
            }
            StageId::XnuHeaders => fakeroot.join("System/Library/Frameworks/Kernel.framework"),
            StageId::LibsystemHeaders => {
                fakeroot.join("System/Library/Frameworks/System.framework")
            }
            StageId::LibsyscallHeaders => fakeroot.join("usr/include/os/proc.h"),
            StageId::Libplatform => fakeroot.join("usr/local/include/_simple.h"),
            StageId::Libdispatch => fakeroot.join("usr/local/lib/kernel/libfirehose_kernel.a"),
            StageId::Xnu if config.compile_db => workspace
                .cache_dir(config.release.version)
                .join(defaults::COMPILE_DB),
            StageId::Xnu => kernel_path(config, workspace),
        }
    }

    /// Artifact that must exist before the stage may start
    pub fn precondition(&self, config: &BuildConfig) -> Option<PathBuf> {
        match self {
            StageId::Xnu => Some(config.kdk_path()),
            _ => None,
        }
    }

    /// Whether a nonzero exit status is accepted
    ///
    /// Harvesting a compilation database only needs the compiler commands
    /// to have been recorded, not a linked kernel.
    pub fn tolerates_failure(&self, config: &BuildConfig) -> bool {
        *self == StageId::Xnu && config.compile_db
    }

    /// Commands that build and stage the artifact
    pub fn invocations(&self, ctx: &StageContext<'_>) -> Vec<Invocation> {
        let name = self.name();
        let fakeroot = ctx.workspace.fakeroot_dir();

        match self {
            StageId::BootstrapCmds => vec![ctx
                .xcodebuild(*self, "install")
                .args(["-project", "bootstrap_cmds.xcodeproj", "-target", "mig"])
                .args(["-configuration", "Release"])],

            StageId::Dtrace => vec![ctx
                .xcodebuild(*self, "install")
                .args(["-target", "ctfconvert", "-target", "ctfdump", "-target", "ctfmerge"])
                .var("ARCHS", generic_slices())],

            StageId::AvailabilityVersions => vec![ctx.make(*self, Some("install"))],

            StageId::XnuHeaders => vec![ctx
                .make(*self, Some("installhdrs"))
                .var("SDKROOT", "macosx")
                .var("ARCH_CONFIGS", generic_arch_configs())
                .var("FAKEROOT_DIR", fakeroot.display())],

            StageId::LibsystemHeaders => vec![ctx
                .xcodebuild(*self, "installhdrs")
                .var("ARCHS", "arm64 arm64e")],

            StageId::LibsyscallHeaders => {
                let srcroot = ctx.source.join("libsyscall");
                vec![Invocation::new(name, "xcodebuild")
                    .args(["installhdrs", "-sdk", "macosx"])
                    .args(["-project", "Libsyscall.xcodeproj", "-target", "Build"])
                    .var("TARGET_CONFIGS", ctx.config.target.target_configs())
                    .var("SRCROOT", srcroot.display())
                    .var("OBJROOT", ctx.obj_root(*self).display())
                    .var("SYMROOT", ctx.sym_root(*self).display())
                    .var("DSTROOT", fakeroot.display())
                    .var("FAKEROOT_DIR", fakeroot.display())
                    .env("PATH", ctx.path_env())
                    .current_dir(&srcroot)]
            }

            StageId::Libplatform => {
                let include = fakeroot.join("usr/local/include");
                ["include", "private"]
                    .iter()
                    .map(|dir| {
                        Invocation::new(name, "ditto")
                            .path_arg(&ctx.source.join(dir))
                            .path_arg(&include)
                    })
                    .collect()
            }

            StageId::Libdispatch => vec![ctx
                .xcodebuild(*self, "install")
                .args(["-target", "libfirehose_kernel"])
                .var("PRODUCT_NAME", "firehose_kernel")
                .var("INSTALL_PATH", "/usr/local/lib/kernel")
                .var("ARCHS", generic_slices())
                .var("VALID_ARCHS", "x86_64 arm64 arm64e")],

            StageId::Xnu => {
                let config = ctx.config;
                let target = if config.compile_db { None } else { Some("install") };
                let mut inv = ctx
                    .make(*self, target)
                    .var("SDKROOT", "macosx")
                    .var("ARCH_CONFIGS", config.target.arch)
                    .var("KERNEL_CONFIGS", config.target.config)
                    .var("MACHINE_CONFIGS", &config.target.machine)
                    .var("KDKROOT", config.kdk_path().display())
                    .var("FAKEROOT_DIR", fakeroot.display())
                    .var("RC_DARWIN_KERNEL_VERSION", config.release.darwin_version)
                    .var("BUILD_WERROR", 0)
                    .var("BUILD_LTO", 0)
                    .var("CONCISE", 0);
                if config.compile_db {
                    inv = inv.var("BUILD_JSON_COMPILATION_DATABASE", 1);
                }
                vec![inv]
            }
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Location of the built kernel binary
pub fn kernel_path(config: &BuildConfig, workspace: &Workspace) -> PathBuf {
    workspace
        .build_dir()
        .join("xnu.obj")
        .join(config.target.object_dir_name())
        .join(config.target.kernel_name())
}

fn availability_script(layout: SourceLayout) -> &'static str {
    match layout {
        SourceLayout::Legacy => "availability.pl",
        SourceLayout::Modern => "availability",
    }
}

/// `ARCH_CONFIGS` value for stages that build every architecture
fn generic_arch_configs() -> String {
    Arch::ALL
        .iter()
        .map(Arch::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Xcode `ARCHS` value for stages that build every architecture
fn generic_slices() -> String {
    Arch::ALL
        .iter()
        .map(Arch::slice_name)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Everything a stage needs to build its invocations
pub struct StageContext<'a> {
    /// Run configuration
    pub config: &'a BuildConfig,
    /// Workspace layout
    pub workspace: &'a Workspace,
    /// Source tree of the stage's component
    pub source: &'a Path,
    /// Inherited `PATH`, prefixed with the staged tools
    pub base_path: String,
}

impl<'a> StageContext<'a> {
    /// Context for building from `source`
    pub fn new(config: &'a BuildConfig, workspace: &'a Workspace, source: &'a Path) -> Self {
        Self {
            config,
            workspace,
            source,
            base_path: std::env::var("PATH").unwrap_or_default(),
        }
    }

    /// Object output directory of a stage
    pub fn obj_root(&self, stage: StageId) -> PathBuf {
        self.workspace
            .build_dir()
            .join(format!("{}.obj", stage.name()))
    }

    /// Symbol output directory of a stage
    pub fn sym_root(&self, stage: StageId) -> PathBuf {
        self.workspace
            .build_dir()
            .join(format!("{}.sym", stage.name()))
    }

    /// `PATH` with the staged tools first
    pub fn path_env(&self) -> String {
        let tools = self.workspace.fakeroot_dir().join("usr/local/bin");
        if self.base_path.is_empty() {
            tools.display().to_string()
        } else {
            format!("{}:{}", tools.display(), self.base_path)
        }
    }

    fn roots(&self, inv: Invocation, stage: StageId) -> Invocation {
        let dstroot = if stage == StageId::Xnu {
            self.workspace.build_dir().join("xnu.dst")
        } else {
            self.workspace.fakeroot_dir()
        };
        inv.var("SRCROOT", self.source.display())
            .var("OBJROOT", self.obj_root(stage).display())
            .var("SYMROOT", self.sym_root(stage).display())
            .var("DSTROOT", dstroot.display())
            .env("PATH", self.path_env())
            .current_dir(self.source)
    }

    fn xcodebuild(&self, stage: StageId, action: &str) -> Invocation {
        let inv = Invocation::new(stage.name(), "xcodebuild").args([action, "-sdk", "macosx"]);
        self.roots(inv, stage)
    }

    fn make(&self, stage: StageId, target: Option<&str>) -> Invocation {
        let mut inv = Invocation::new(stage.name(), "make");
        if let Some(target) = target {
            inv = inv.arg(target);
        }
        inv = inv.arg(format!("-j{}", self.config.jobs));
        self.roots(inv, stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::Settings;

    fn config(release: &str, compile_db: bool) -> BuildConfig {
        let mut settings = Settings::new(release, Path::new("/work"));
        settings.compile_db = compile_db;
        settings.jobs = Some(4);
        BuildConfig::from_settings(&settings).unwrap()
    }

    fn context<'a>(config: &'a BuildConfig, ws: &'a Workspace, source: &'a Path) -> StageContext<'a> {
        StageContext {
            config,
            workspace: ws,
            source,
            base_path: "/usr/bin:/bin".to_string(),
        }
    }

    #[test]
    fn test_order_ends_with_kernel() {
        assert_eq!(StageId::ORDER[0], StageId::BootstrapCmds);
        assert_eq!(StageId::ORDER[8], StageId::Xnu);
        let headers = StageId::ORDER.iter().position(|s| *s == StageId::XnuHeaders).unwrap();
        let syscall = StageId::ORDER.iter().position(|s| *s == StageId::LibsyscallHeaders).unwrap();
        assert!(headers < syscall);
    }

    #[test]
    fn test_availability_sentinel_follows_layout() {
        let ws = Workspace::new(Path::new("/work"));
        assert_eq!(
            StageId::AvailabilityVersions.sentinel(&config("13.5", false), &ws),
            PathBuf::from("/work/fakeroot/usr/local/libexec/availability.pl")
        );
        assert_eq!(
            StageId::AvailabilityVersions.sentinel(&config("14.2", false), &ws),
            PathBuf::from("/work/fakeroot/usr/local/libexec/availability")
        );
    }

    #[test]
    fn test_kernel_sentinel_depends_on_mode() {
        let ws = Workspace::new(Path::new("/work"));
        assert_eq!(
            StageId::Xnu.sentinel(&config("13.5", false), &ws),
            PathBuf::from("/work/build/xnu.obj/RELEASE_ARM64_VMAPPLE/kernel.release.vmapple")
        );
        assert_eq!(
            StageId::Xnu.sentinel(&config("13.5", true), &ws),
            PathBuf::from("/work/.cache/13.5/compile_commands.json")
        );
    }

    #[test]
    fn test_only_kernel_has_precondition() {
        let config = config("13.5", false);
        for stage in StageId::ORDER {
            assert_eq!(stage.precondition(&config).is_some(), stage == StageId::Xnu);
        }
    }

    #[test]
    fn test_failure_tolerated_only_for_compile_db() {
        assert!(StageId::Xnu.tolerates_failure(&config("13.5", true)));
        assert!(!StageId::Xnu.tolerates_failure(&config("13.5", false)));
        assert!(!StageId::XnuHeaders.tolerates_failure(&config("13.5", true)));
    }

    #[test]
    fn test_generic_stage_targets_both_architectures() {
        let config = config("13.5", false);
        let ws = Workspace::new(Path::new("/work"));
        let source = PathBuf::from("/work/xnu");
        let invs = StageId::XnuHeaders.invocations(&context(&config, &ws, &source));

        assert_eq!(invs.len(), 1);
        assert!(invs[0].has_arg("installhdrs"));
        assert!(invs[0].has_arg("ARCH_CONFIGS=X86_64 ARM64"));
        assert!(invs[0].has_arg("DSTROOT=/work/fakeroot"));
        assert!(invs[0].has_arg("OBJROOT=/work/build/xnu_headers.obj"));
        assert_eq!(
            invs[0].env,
            vec![("PATH".to_string(), "/work/fakeroot/usr/local/bin:/usr/bin:/bin".to_string())]
        );
    }

    #[test]
    fn test_kernel_stage_targets_configured_variant() {
        let config = config("13.5", false);
        let ws = Workspace::new(Path::new("/work"));
        let source = PathBuf::from("/work/xnu");
        let inv = &StageId::Xnu.invocations(&context(&config, &ws, &source))[0];

        assert_eq!(inv.program, "make");
        assert!(inv.has_arg("install"));
        assert!(inv.has_arg("-j4"));
        assert!(inv.has_arg("ARCH_CONFIGS=ARM64"));
        assert!(inv.has_arg("KERNEL_CONFIGS=RELEASE"));
        assert!(inv.has_arg("MACHINE_CONFIGS=VMAPPLE"));
        assert!(inv.has_arg("KDKROOT=/Library/Developer/KDKs/KDK_13.5_22G74.kdk"));
        assert!(inv.has_arg("RC_DARWIN_KERNEL_VERSION=22.6.0"));
        assert!(!inv.has_arg("BUILD_JSON_COMPILATION_DATABASE=1"));
    }

    #[test]
    fn test_compile_db_invocation() {
        let config = config("14.0", true);
        let ws = Workspace::new(Path::new("/work"));
        let source = PathBuf::from("/work/xnu");
        let inv = &StageId::Xnu.invocations(&context(&config, &ws, &source))[0];

        assert!(inv.has_arg("BUILD_JSON_COMPILATION_DATABASE=1"));
        assert!(!inv.has_arg("install"));
    }

    #[test]
    fn test_libsyscall_uses_kernel_tree_and_target_configs() {
        let config = config("13.5", false);
        let ws = Workspace::new(Path::new("/work"));
        let source = PathBuf::from("/work/xnu");
        let inv = &StageId::LibsyscallHeaders.invocations(&context(&config, &ws, &source))[0];

        assert!(inv.has_arg("TARGET_CONFIGS=RELEASE ARM64 VMAPPLE"));
        assert!(inv.has_arg("SRCROOT=/work/xnu/libsyscall"));
        assert_eq!(inv.cwd, Some(PathBuf::from("/work/xnu/libsyscall")));
    }

    #[test]
    fn test_libplatform_copies_headers() {
        let config = config("13.5", false);
        let ws = Workspace::new(Path::new("/work"));
        let source = PathBuf::from("/work/libplatform");
        let invs = StageId::Libplatform.invocations(&context(&config, &ws, &source));

        assert_eq!(invs.len(), 2);
        assert_eq!(invs[0].program, "ditto");
        assert_eq!(
            invs[1].args,
            vec!["/work/libplatform/private", "/work/fakeroot/usr/local/include"]
        );
    }
}
