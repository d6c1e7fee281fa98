//! Build target selection
//!
//! A [`BuildTarget`] fixes the configuration variant, architecture, machine
//! variant and release for one invocation. Every stage of a run shares the
//! same target; it names the kernel artifact and the object directory.

use std::fmt;
use std::str::FromStr;

use crate::config::defaults;
use crate::error::BuildError;

/// Kernel configuration variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelConfig {
    /// Optimised production kernel
    Release,
    /// Development kernel with extra assertions
    Development,
    /// Unoptimised debug kernel
    Debug,
    /// Kernel address sanitizer build
    Kasan,
}

impl KernelConfig {
    /// All supported variants
    pub const ALL: [KernelConfig; 4] = [
        KernelConfig::Release,
        KernelConfig::Development,
        KernelConfig::Debug,
        KernelConfig::Kasan,
    ];

    /// Name as understood by the kernel makefiles
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelConfig::Release => "RELEASE",
            KernelConfig::Development => "DEVELOPMENT",
            KernelConfig::Debug => "DEBUG",
            KernelConfig::Kasan => "KASAN",
        }
    }

    /// Lowercase name used in artifact file names
    pub fn file_tag(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for KernelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KernelConfig {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BuildError::InvalidConfig {
                name: "KERNEL_CONFIG".to_string(),
                value: s.to_string(),
                expected: "one of RELEASE, DEVELOPMENT, DEBUG, KASAN".to_string(),
            })
    }
}

/// Target architecture family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// Apple silicon
    Arm64,
    /// Intel
    X86_64,
}

impl Arch {
    /// Both supported architectures, in the order header stages expect them
    pub const ALL: [Arch; 2] = [Arch::X86_64, Arch::Arm64];

    /// Name as understood by the kernel makefiles
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Arm64 => "ARM64",
            Arch::X86_64 => "X86_64",
        }
    }

    /// Architecture name for `kmutil` and Xcode `ARCHS`
    pub fn slice_name(&self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64e",
            Arch::X86_64 => "x86_64",
        }
    }

    /// Whether the architecture has machine variants
    pub fn has_machine_variants(&self) -> bool {
        matches!(self, Arch::Arm64)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ARM64" | "ARM64E" | "AARCH64" => Ok(Arch::Arm64),
            "X86_64" | "X86-64" | "AMD64" => Ok(Arch::X86_64),
            _ => Err(BuildError::InvalidConfig {
                name: "ARCH_CONFIG".to_string(),
                value: s.to_string(),
                expected: "one of ARM64, X86_64".to_string(),
            }),
        }
    }
}

/// Configuration, architecture, machine variant and release for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    /// Kernel configuration variant
    pub config: KernelConfig,
    /// Target architecture
    pub arch: Arch,
    /// Machine variant, `NONE` for architectures without variants
    pub machine: String,
    /// Release identifier (e.g. "13.5")
    pub release: String,
}

impl BuildTarget {
    /// Create a target, normalising the machine variant for the architecture
    pub fn new(config: KernelConfig, arch: Arch, machine: &str, release: &str) -> Self {
        let machine = if arch.has_machine_variants() && !machine.trim().is_empty() {
            machine.trim().to_ascii_uppercase()
        } else {
            defaults::NO_MACHINE_CONFIG.to_string()
        };

        Self {
            config,
            arch,
            machine,
            release: release.to_string(),
        }
    }

    fn has_machine(&self) -> bool {
        self.machine != defaults::NO_MACHINE_CONFIG
    }

    /// Suffix shared by kernel and collection file names
    fn file_suffix(&self) -> String {
        if self.has_machine() {
            format!("{}.{}", self.config.file_tag(), self.machine.to_lowercase())
        } else {
            self.config.file_tag()
        }
    }

    /// File name of the kernel binary (e.g. `kernel.release.vmapple`)
    pub fn kernel_name(&self) -> String {
        format!("kernel.{}", self.file_suffix())
    }

    /// File name of a kernel collection (e.g. `kernelcache.release.vmapple`)
    pub fn collection_name(&self) -> String {
        format!("kernelcache.{}", self.file_suffix())
    }

    /// Per-target object directory name (e.g. `RELEASE_ARM64_VMAPPLE`)
    pub fn object_dir_name(&self) -> String {
        if self.has_machine() {
            format!("{}_{}_{}", self.config, self.arch, self.machine)
        } else {
            format!("{}_{}", self.config, self.arch)
        }
    }

    /// Value for libsyscall's `TARGET_CONFIGS`
    pub fn target_configs(&self) -> String {
        format!("{} {} {}", self.config, self.arch, self.machine)
    }
}
