//! Clean logic
//!
//! Removes build output and the staging root, and for a full clean also the
//! component links and the source store. Listing and removal are separate
//! steps so the caller can show the list and ask before anything is deleted.

use std::path::PathBuf;

use crate::core::release::Component;
use crate::core::workspace::Workspace;
use crate::error::FilesystemError;
use crate::infra::filesystem;

/// How much to remove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanScope {
    /// Build output and staging root
    Partial,
    /// Everything fetched or built
    Full,
}

/// Result of clean operation
#[derive(Debug, Default)]
pub struct CleanResult {
    /// Paths that were removed
    pub removed: Vec<PathBuf>,
    /// Paths that were already gone
    pub skipped: Vec<PathBuf>,
}

/// Paths a clean of `scope` would remove, in removal order
pub fn clean_candidates(workspace: &Workspace, scope: CleanScope) -> Vec<PathBuf> {
    let mut paths = vec![workspace.build_dir(), workspace.fakeroot_dir()];

    if scope == CleanScope::Full {
        paths.extend(Component::ALL.iter().map(|c| workspace.component_link(*c)));
        paths.push(workspace.sources_dir());
    }

    paths
}

/// Existing paths a clean of `scope` would remove
///
/// Links are listed even when dangling.
pub fn clean_targets(workspace: &Workspace, scope: CleanScope) -> Vec<PathBuf> {
    clean_candidates(workspace, scope)
        .into_iter()
        .filter(|path| path.symlink_metadata().is_ok())
        .collect()
}

/// Remove exactly `targets`
///
/// Links are removed without touching what they point to.
pub fn clean_workspace(targets: &[PathBuf]) -> Result<CleanResult, FilesystemError> {
    let mut result = CleanResult::default();

    for path in targets {
        if filesystem::remove_path(path)? {
            tracing::debug!("Removed {}", path.display());
            result.removed.push(path.clone());
        } else {
            result.skipped.push(path.clone());
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::filesystem::symlink;
    use tempfile::TempDir;

    fn populated_workspace() -> (TempDir, Workspace) {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let ws = Workspace::new(temp.path());

        std::fs::create_dir_all(ws.build_dir().join("xnu.obj")).unwrap();
        std::fs::create_dir_all(ws.fakeroot_dir().join("usr/local/bin")).unwrap();
        std::fs::create_dir_all(ws.cache_root()).unwrap();
        let store = ws.source_path("xnu-8796.141.3");
        std::fs::create_dir_all(&store).unwrap();
        symlink(&store, &ws.component_link(Component::Xnu)).unwrap();

        (temp, ws)
    }

    #[test]
    fn test_partial_targets() {
        let (_temp, ws) = populated_workspace();

        let targets = clean_targets(&ws, CleanScope::Partial);

        assert_eq!(targets, vec![ws.build_dir(), ws.fakeroot_dir()]);
    }

    #[test]
    fn test_full_targets_include_links_and_store() {
        let (_temp, ws) = populated_workspace();

        let targets = clean_targets(&ws, CleanScope::Full);

        assert!(targets.contains(&ws.component_link(Component::Xnu)));
        assert!(targets.contains(&ws.sources_dir()));
        assert!(!targets.contains(&ws.component_link(Component::Dtrace)));
        assert!(!targets.contains(&ws.cache_root()));
    }

    #[test]
    fn test_clean_removes_exactly_targets() {
        let (_temp, ws) = populated_workspace();

        let targets = clean_targets(&ws, CleanScope::Partial);
        let result = clean_workspace(&targets).unwrap();

        assert_eq!(result.removed.len(), 2);
        assert!(!ws.build_dir().exists());
        assert!(!ws.fakeroot_dir().exists());
        assert!(ws.sources_dir().exists());
        assert!(ws.cache_root().exists());
        assert!(ws.component_link(Component::Xnu).exists());
    }

    #[test]
    fn test_full_clean_keeps_cache() {
        let (_temp, ws) = populated_workspace();

        let targets = clean_targets(&ws, CleanScope::Full);
        clean_workspace(&targets).unwrap();

        assert!(ws.component_link(Component::Xnu).symlink_metadata().is_err());
        assert!(!ws.sources_dir().exists());
        assert!(ws.cache_root().exists());
    }

    #[test]
    fn test_clean_empty_workspace() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());

        assert!(clean_targets(&ws, CleanScope::Full).is_empty());
        let result = clean_workspace(&[ws.build_dir()]).unwrap();
        assert!(result.removed.is_empty());
        assert_eq!(result.skipped, vec![ws.build_dir()]);
    }
}
