//! Remote endpoints

/// Release manifest repository base (GitHub raw)
pub const RELEASE_MANIFEST_BASE: &str =
    "https://raw.githubusercontent.com/apple-oss-distributions/distribution-macOS";

/// Component source repository base
pub const SOURCE_BASE: &str = "https://github.com/apple-oss-distributions";

/// Kernel Debug Kit download base
pub const KDK_DOWNLOAD_BASE: &str = "https://download.developer.apple.com/macOS";

/// URL of the release manifest document for a manifest tag
pub fn release_manifest(base: &str, manifest_tag: &str) -> String {
    format!("{}/{manifest_tag}/release.json", base.trim_end_matches('/'))
}

/// Git URL of a component repository
pub fn source_repo(component: &str) -> String {
    format!("{SOURCE_BASE}/{component}.git")
}

/// URL of a toolkit disk image
pub fn toolkit_image(base: &str, image_name: &str) -> String {
    format!("{}/{image_name}", base.trim_end_matches('/'))
}
