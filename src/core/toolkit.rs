//! Kernel Debug Kit provisioning
//!
//! The toolkit ships as a multi-gigabyte disk image. Provisioning downloads
//! it (resumably) into the workspace cache, mounts it, expands the installer
//! package into the configured root and always unmounts again.

use std::path::{Path, PathBuf};

use crate::config::{defaults, BuildConfig};
use crate::core::workspace::Workspace;
use crate::error::{BuildError, DownloadError};
use crate::infra::disk_image::{DiskImageMounter, MountGuard};
use crate::infra::download::DownloadManager;
use crate::infra::filesystem;
use crate::infra::process::{CommandRunner, Invocation};

/// Installer package inside the toolkit image
const KDK_PACKAGE: &str = "KernelDebugKit.pkg";

/// Where the bundle lands inside an expanded package
const EXPANDED_KDK_DIR: &str = "KDK.pkg/Payload/Library/Developer/KDKs";

/// How the toolkit is installed into its root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Root owned by the system; needs the privileged installer
    SystemManaged,
    /// Root owned by the user; the package is expanded directly
    WorkspaceLocal,
}

impl InstallMode {
    /// Select the mode for a toolkit root
    pub fn for_root(root: &Path) -> Self {
        if root.starts_with(defaults::SYSTEM_KDK_ROOT) {
            InstallMode::SystemManaged
        } else {
            InstallMode::WorkspaceLocal
        }
    }
}

/// Downloads a disk image to a local path
#[allow(async_fn_in_trait)]
pub trait ImageFetcher {
    /// Make `dest` hold the image at `url`
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError>;
}

impl ImageFetcher for DownloadManager {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let result = self.download(url, dest, None).await?;
        tracing::info!("Toolkit image ready ({} bytes, sha256 {})", result.size, result.checksum);
        Ok(())
    }
}

/// Acquires and installs the toolkit for the configured release
pub struct ToolkitProvisioner<'a, F> {
    config: &'a BuildConfig,
    workspace: &'a Workspace,
    runner: &'a dyn CommandRunner,
    mounter: &'a dyn DiskImageMounter,
    fetcher: &'a F,
}

impl<'a, F: ImageFetcher> ToolkitProvisioner<'a, F> {
    /// Create a provisioner
    pub fn new(
        config: &'a BuildConfig,
        workspace: &'a Workspace,
        runner: &'a dyn CommandRunner,
        mounter: &'a dyn DiskImageMounter,
        fetcher: &'a F,
    ) -> Self {
        Self {
            config,
            workspace,
            runner,
            mounter,
            fetcher,
        }
    }

    /// Local path of the downloaded image
    pub fn image_path(&self) -> PathBuf {
        self.workspace
            .cache_root()
            .join(self.config.release.kdk_image_name())
    }

    fn mount_point(&self) -> PathBuf {
        self.workspace
            .cache_root()
            .join("mnt")
            .join(self.config.release.kdk_name())
    }

    /// Ensure the toolkit bundle is installed, returning its path
    pub async fn ensure(&self) -> Result<PathBuf, BuildError> {
        let dest = self.config.kdk_path();
        let kdk = self.config.release.kdk_name();

        if dest.exists() {
            tracing::info!("{kdk} already installed at {}", dest.display());
            return Ok(dest);
        }

        let image = self.image_path();
        tracing::info!("Fetching {kdk}");
        self.fetcher
            .fetch(&self.config.kdk_image_url(), &image)
            .await
            .map_err(|e| BuildError::ToolkitFetchFailed {
                toolkit: kdk.clone(),
                error: e.to_string(),
            })?;

        let install_failed = |error: String| BuildError::ToolkitInstallFailed {
            toolkit: kdk.clone(),
            error,
        };

        let guard = MountGuard::attach(self.mounter, &image, &self.mount_point())
            .map_err(|e| install_failed(e.to_string()))?;

        let extracted = self.extract(guard.path(), &dest);
        let released = guard.release();

        extracted.map_err(install_failed)?;
        if let Err(e) = released {
            tracing::warn!("{e}");
        }

        if !dest.exists() {
            return Err(install_failed(format!(
                "installer finished but '{}' does not exist",
                dest.display()
            )));
        }

        tracing::info!("Installed {kdk} at {}", dest.display());
        Ok(dest)
    }

    fn extract(&self, mount: &Path, dest: &Path) -> Result<(), String> {
        let package = mount.join(KDK_PACKAGE);

        match InstallMode::for_root(&self.config.kdk_root) {
            InstallMode::SystemManaged => {
                let inv = Invocation::new("toolkit", "sudo")
                    .args(["installer", "-pkg"])
                    .path_arg(&package)
                    .args(["-target", "/"]);
                self.run_checked(&inv)
            }
            InstallMode::WorkspaceLocal => self.expand_local(&package, dest),
        }
    }

    fn expand_local(&self, package: &Path, dest: &Path) -> Result<(), String> {
        let scratch = self
            .workspace
            .cache_root()
            .join(format!("{}.expanded", self.config.release.kdk_name()));

        // pkgutil refuses an existing destination
        filesystem::remove_path(&scratch).map_err(|e| e.to_string())?;
        filesystem::create_dir_all(&self.config.kdk_root).map_err(|e| e.to_string())?;

        let inv = Invocation::new("toolkit", "pkgutil")
            .arg("--expand-full")
            .path_arg(package)
            .path_arg(&scratch);
        let expanded = self.run_checked(&inv).and_then(|()| {
            let bundle = scratch.join(EXPANDED_KDK_DIR).join(
                dest.file_name()
                    .ok_or_else(|| format!("invalid toolkit path '{}'", dest.display()))?,
            );
            std::fs::rename(&bundle, dest).map_err(|e| {
                format!(
                    "cannot move '{}' to '{}': {e}",
                    bundle.display(),
                    dest.display()
                )
            })
        });

        if let Err(e) = filesystem::remove_path(&scratch) {
            tracing::warn!("{e}");
        }
        expanded
    }

    fn run_checked(&self, inv: &Invocation) -> Result<(), String> {
        match self.runner.run(inv) {
            Ok(0) => Ok(()),
            Ok(status) => Err(format!("{} exited with status {status}", inv.program)),
            Err(e) => Err(e.to_string()),
        }
    }
}
