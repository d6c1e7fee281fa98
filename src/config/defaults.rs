//! Default configuration values

/// Maximum number of download attempts per segment
pub const MAX_DOWNLOAD_RETRIES: u32 = 5;

/// Base delay for download retry backoff (in milliseconds)
pub const DOWNLOAD_BACKOFF_BASE_MS: u64 = 1000;

/// Upper bound on a single backoff delay (in milliseconds)
pub const DOWNLOAD_BACKOFF_MAX_MS: u64 = 30_000;

/// Number of concurrent segments used for a toolkit image download
pub const DOWNLOAD_SEGMENTS: usize = 8;

/// Per-request timeout for segment transfers (in seconds)
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 900;

/// Connect timeout for all HTTP requests (in seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Timeout for fetching a release manifest (in seconds)
pub const MANIFEST_TIMEOUT_SECS: u64 = 30;

/// Default kernel configuration variant
pub const DEFAULT_KERNEL_CONFIG: &str = "RELEASE";

/// Default architecture
pub const DEFAULT_ARCH_CONFIG: &str = "ARM64";

/// Default machine variant (Apple virtualization target)
pub const DEFAULT_MACHINE_CONFIG: &str = "VMAPPLE";

/// Machine variant used when the architecture has none
pub const NO_MACHINE_CONFIG: &str = "NONE";

/// System-managed toolkit installation root
pub const SYSTEM_KDK_ROOT: &str = "/Library/Developer/KDKs";

/// Default kernel collection exclusion filter
pub const DEFAULT_KC_FILTER: &str = "com.apple.driver.SEPHibernation|com.apple.iokit.IOSkywalkFamily";

/// Oldest host major version whose `kmutil` accepts `--kdk`
pub const KMUTIL_KDK_FLAG_MIN_MAJOR: u64 = 13;

/// Identifier always elided from x86_64 collections
pub const X86_ELIDED_IDENTIFIER: &str = "com.apple.driver.AppleIntelTGLGraphicsFramebuffer";

/// Workspace directory holding build objects and symbols
pub const BUILD_DIR: &str = "build";

/// Workspace directory acting as the staging root
pub const FAKEROOT_DIR: &str = "fakeroot";

/// Workspace directory holding tag-addressed source trees
pub const SOURCES_DIR: &str = "sources";

/// Workspace directory for downloads and per-release caches
pub const CACHE_DIR: &str = ".cache";

/// Workspace directory holding per-release patch sets
pub const PATCHES_DIR: &str = "patches";

/// Progress log file name under the build directory
pub const PROGRESS_LOG: &str = "progress.log";

/// Compilation database file name
pub const COMPILE_DB: &str = "compile_commands.json";
