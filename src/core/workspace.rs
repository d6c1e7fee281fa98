//! Workspace layout and source retrieval
//!
//! A workspace root holds one symbolic link per component
//! (`<root>/<component>`) pointing into the tag-addressed store
//! (`<root>/sources/<tag>`), plus the build, staging and cache directories.

use std::path::{Path, PathBuf};

use crate::config::{defaults, urls};
use crate::core::release::Component;
use crate::error::BuildError;
use crate::infra::filesystem::{self, link_state, LinkState};
use crate::infra::git::SourceCloner;

/// Paths inside a workspace root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Workspace rooted at `root`
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Tag-addressed source store
    pub fn sources_dir(&self) -> PathBuf {
        self.root.join(defaults::SOURCES_DIR)
    }

    /// Build object and symbol output
    pub fn build_dir(&self) -> PathBuf {
        self.root.join(defaults::BUILD_DIR)
    }

    /// Staging root shared by every stage
    pub fn fakeroot_dir(&self) -> PathBuf {
        self.root.join(defaults::FAKEROOT_DIR)
    }

    /// Download cache
    pub fn cache_root(&self) -> PathBuf {
        self.root.join(defaults::CACHE_DIR)
    }

    /// Release-specific cache directory
    pub fn cache_dir(&self, release: &str) -> PathBuf {
        self.cache_root().join(release)
    }

    /// Append-only progress log
    pub fn progress_log(&self) -> PathBuf {
        self.build_dir().join(defaults::PROGRESS_LOG)
    }

    /// Managed link for a component
    pub fn component_link(&self, component: Component) -> PathBuf {
        self.root.join(component.name())
    }

    /// Store location of a source tag
    pub fn source_path(&self, tag: &str) -> PathBuf {
        self.sources_dir().join(tag)
    }

    /// Per-release patch sets
    pub fn patches_dir(&self) -> PathBuf {
        self.root.join(defaults::PATCHES_DIR)
    }

    /// Fail if any managed component path exists but is not a link
    pub fn verify_links(&self) -> Result<(), BuildError> {
        for component in Component::ALL {
            let link = self.component_link(component);
            if link_state(&link)? == LinkState::NotALink {
                return Err(BuildError::WorkspaceCorruption { path: link });
            }
        }
        Ok(())
    }
}

/// Materializes pinned source trees and links them into the workspace
pub struct ArtifactFetcher<'a> {
    workspace: &'a Workspace,
    cloner: &'a dyn SourceCloner,
}

impl<'a> ArtifactFetcher<'a> {
    /// Create a fetcher cloning through `cloner`
    pub fn new(workspace: &'a Workspace, cloner: &'a dyn SourceCloner) -> Self {
        Self { workspace, cloner }
    }

    /// Ensure `component` at `tag` is in the store and linked, returning the store path
    ///
    /// Safe to call repeatedly: an existing store directory is reused
    /// without network access and the link is re-pointed in place.
    pub fn ensure(&self, component: Component, tag: &str) -> Result<PathBuf, BuildError> {
        let store = self.workspace.source_path(tag);
        let link = self.workspace.component_link(component);

        // Check before cloning so a corrupt workspace never hits the network
        let state = link_state(&link)?;
        if state == LinkState::NotALink {
            return Err(BuildError::WorkspaceCorruption { path: link });
        }

        if store.is_dir() {
            tracing::debug!("{component} {tag} already present");
        } else {
            self.cloner
                .clone_tag(&urls::source_repo(component.name()), tag, &store)
                .map_err(|e| BuildError::SourceFetchFailed {
                    component: component.name().to_string(),
                    tag: tag.to_string(),
                    error: e.to_string(),
                })?;
        }

        match state {
            LinkState::Link(target) if target == store => return Ok(store),
            LinkState::Link(_) => {
                filesystem::remove_path(&link)?;
            }
            _ => {}
        }

        filesystem::symlink(&store, &link)?;
        tracing::debug!("Linked {} -> {}", link.display(), store.display());
        Ok(store)
    }
}
