//! Disk image mounting
//!
//! [`MountGuard`] ties a mounted image to a scope: the image is detached and
//! the scratch mount point removed when the guard is released or dropped,
//! whichever exit path is taken.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::infra::process::{CommandRunner, Invocation};

/// Disk image errors
#[derive(Error, Debug)]
pub enum DiskImageError {
    /// Attaching the image failed
    #[error("Failed to mount '{image}': {error}")]
    MountFailed { image: PathBuf, error: String },

    /// Detaching the image failed
    #[error("Failed to unmount '{mount_point}': {error}")]
    UnmountFailed { mount_point: PathBuf, error: String },
}

/// Host primitive for attaching and detaching disk images
pub trait DiskImageMounter {
    /// Attach `image` read-only at `mount_point`
    fn mount(&self, image: &Path, mount_point: &Path) -> Result<(), DiskImageError>;

    /// Detach whatever is mounted at `mount_point`
    fn unmount(&self, mount_point: &Path) -> Result<(), DiskImageError>;
}

/// Mounter driving `hdiutil`
pub struct Hdiutil<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Hdiutil<'a> {
    /// Create a mounter running `hdiutil` through `runner`
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }
}

impl DiskImageMounter for Hdiutil<'_> {
    fn mount(&self, image: &Path, mount_point: &Path) -> Result<(), DiskImageError> {
        let inv = Invocation::new("toolkit", "hdiutil")
            .args(["attach", "-nobrowse", "-readonly", "-noverify", "-mountpoint"])
            .path_arg(mount_point)
            .path_arg(image);

        let failed = |error: String| DiskImageError::MountFailed {
            image: image.to_path_buf(),
            error,
        };

        let output = self.runner.capture(&inv).map_err(|e| failed(e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            Err(failed(format!(
                "hdiutil exited with {}: {}",
                output.status,
                output.stderr.trim()
            )))
        }
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), DiskImageError> {
        let inv = Invocation::new("toolkit", "hdiutil")
            .args(["detach", "-force"])
            .path_arg(mount_point);

        let failed = |error: String| DiskImageError::UnmountFailed {
            mount_point: mount_point.to_path_buf(),
            error,
        };

        let output = self.runner.capture(&inv).map_err(|e| failed(e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            Err(failed(format!(
                "hdiutil exited with {}: {}",
                output.status,
                output.stderr.trim()
            )))
        }
    }
}

/// A mounted image, released on every exit path
pub struct MountGuard<'a> {
    mounter: &'a dyn DiskImageMounter,
    mount_point: PathBuf,
    released: bool,
}

impl<'a> MountGuard<'a> {
    /// Create the scratch mount point and attach `image` there
    ///
    /// If attaching fails the scratch directory is removed before returning.
    pub fn attach(
        mounter: &'a dyn DiskImageMounter,
        image: &Path,
        mount_point: &Path,
    ) -> Result<Self, DiskImageError> {
        std::fs::create_dir_all(mount_point).map_err(|e| DiskImageError::MountFailed {
            image: image.to_path_buf(),
            error: format!("cannot create mount point '{}': {e}", mount_point.display()),
        })?;

        if let Err(e) = mounter.mount(image, mount_point) {
            let _ = std::fs::remove_dir(mount_point);
            return Err(e);
        }

        tracing::debug!("Mounted {} at {}", image.display(), mount_point.display());
        Ok(Self {
            mounter,
            mount_point: mount_point.to_path_buf(),
            released: false,
        })
    }

    /// Path the image is mounted at
    pub fn path(&self) -> &Path {
        &self.mount_point
    }

    /// Unmount now and report the outcome
    pub fn release(mut self) -> Result<(), DiskImageError> {
        self.released = true;
        self.detach()
    }

    fn detach(&self) -> Result<(), DiskImageError> {
        let result = self.mounter.unmount(&self.mount_point);
        if let Err(e) = std::fs::remove_dir(&self.mount_point) {
            tracing::debug!(
                "Could not remove mount point {}: {e}",
                self.mount_point.display()
            );
        }
        result
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.detach() {
                tracing::warn!("{e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeMounter {
        fail_mount: bool,
        calls: RefCell<Vec<String>>,
    }

    impl DiskImageMounter for FakeMounter {
        fn mount(&self, image: &Path, _mount_point: &Path) -> Result<(), DiskImageError> {
            self.calls.borrow_mut().push("mount".to_string());
            if self.fail_mount {
                return Err(DiskImageError::MountFailed {
                    image: image.to_path_buf(),
                    error: "corrupt image".to_string(),
                });
            }
            Ok(())
        }

        fn unmount(&self, _mount_point: &Path) -> Result<(), DiskImageError> {
            self.calls.borrow_mut().push("unmount".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_drop_unmounts() {
        let temp = TempDir::new().unwrap();
        let mounter = FakeMounter::default();
        let mount_point = temp.path().join("mnt");

        {
            let guard = MountGuard::attach(&mounter, Path::new("kdk.dmg"), &mount_point).unwrap();
            assert_eq!(guard.path(), mount_point);
        }

        assert_eq!(*mounter.calls.borrow(), vec!["mount", "unmount"]);
        assert!(!mount_point.exists());
    }

    #[test]
    fn test_release_unmounts_once() {
        let temp = TempDir::new().unwrap();
        let mounter = FakeMounter::default();

        let guard = MountGuard::attach(&mounter, Path::new("kdk.dmg"), &temp.path().join("mnt")).unwrap();
        guard.release().unwrap();

        assert_eq!(*mounter.calls.borrow(), vec!["mount", "unmount"]);
    }

    #[test]
    fn test_failed_mount_cleans_mount_point() {
        let temp = TempDir::new().unwrap();
        let mounter = FakeMounter {
            fail_mount: true,
            ..FakeMounter::default()
        };
        let mount_point = temp.path().join("mnt");

        let result = MountGuard::attach(&mounter, Path::new("kdk.dmg"), &mount_point);

        assert!(result.is_err());
        assert!(!mount_point.exists());
        assert_eq!(*mounter.calls.borrow(), vec!["mount"]);
    }
}
