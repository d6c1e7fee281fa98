//! Release resolution
//!
//! Maps a target release identifier to the pinned source tag of each
//! component, plus the toolkit and compatibility metadata the build needs.
//!
//! The release manifest is never cached: every [`VersionResolver::resolve`]
//! call fetches it again, so each stage observes the upstream document as it
//! is at the moment the stage starts.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{defaults, urls};
use crate::error::BuildError;

/// Source tree layout generation of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLayout {
    /// AvailabilityVersions installs `availability.pl`
    Legacy,
    /// AvailabilityVersions installs the `availability` script
    Modern,
}

/// Static metadata for one supported release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Release identifier (e.g. "13.5")
    pub version: &'static str,
    /// Build number of the matching Kernel Debug Kit
    pub build: &'static str,
    /// Darwin compatibility version passed to the kernel build
    pub darwin_version: &'static str,
    /// Source layout generation
    pub layout: SourceLayout,
}

const fn release(
    version: &'static str,
    build: &'static str,
    darwin_version: &'static str,
    layout: SourceLayout,
) -> ReleaseInfo {
    ReleaseInfo {
        version,
        build,
        darwin_version,
        layout,
    }
}

/// Supported releases, oldest first
pub const RELEASES: &[ReleaseInfo] = &[
    release("13.0", "22A380", "22.1.0", SourceLayout::Legacy),
    release("13.1", "22C65", "22.2.0", SourceLayout::Legacy),
    release("13.2", "22D49", "22.3.0", SourceLayout::Legacy),
    release("13.2.1", "22D68", "22.3.0", SourceLayout::Legacy),
    release("13.3", "22E252", "22.4.0", SourceLayout::Legacy),
    release("13.3.1", "22E261", "22.4.0", SourceLayout::Legacy),
    release("13.4", "22F66", "22.5.0", SourceLayout::Legacy),
    release("13.4.1", "22F82", "22.5.0", SourceLayout::Legacy),
    release("13.5", "22G74", "22.6.0", SourceLayout::Legacy),
    release("14.0", "23A344", "23.0.0", SourceLayout::Modern),
    release("14.1", "23B74", "23.1.0", SourceLayout::Modern),
    release("14.2", "23C64", "23.2.0", SourceLayout::Modern),
    release("14.3", "23D56", "23.3.0", SourceLayout::Modern),
    release("14.4", "23E214", "23.4.0", SourceLayout::Modern),
    release("14.5", "23F79", "23.5.0", SourceLayout::Modern),
    release("15.0", "24A335", "24.0.0", SourceLayout::Modern),
];

impl ReleaseInfo {
    /// Tag of the distribution repository holding this release's manifest
    pub fn manifest_tag(&self) -> String {
        format!("macos-{}", self.version.replace('.', ""))
    }

    /// Toolkit (Kernel Debug Kit) name, also its bundle stem
    pub fn kdk_name(&self) -> String {
        format!("KDK_{}_{}", self.version, self.build)
    }

    /// File name of the toolkit disk image
    pub fn kdk_image_name(&self) -> String {
        format!("Kernel_Debug_Kit_{}_build_{}.dmg", self.version, self.build)
    }
}

impl fmt::Display for ReleaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.build)
    }
}

/// Comma-separated list of supported release identifiers
pub fn supported_releases() -> String {
    RELEASES
        .iter()
        .map(|r| r.version)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Look up a release identifier in the release table
pub fn release_info(id: &str) -> Result<ReleaseInfo, BuildError> {
    RELEASES
        .iter()
        .find(|r| r.version == id.trim())
        .copied()
        .ok_or_else(|| BuildError::InvalidReleaseIdentifier {
            release: id.to_string(),
            supported: supported_releases(),
        })
}

/// Source component pinned by the release manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    /// The kernel
    Xnu,
    /// Mach interface generator
    BootstrapCmds,
    /// CTF tools
    Dtrace,
    /// Availability macros and version script
    AvailabilityVersions,
    /// System library umbrella headers
    Libsystem,
    /// Low-level platform library
    Libplatform,
    /// Dispatch and firehose logging library
    Libdispatch,
}

impl Component {
    /// Every managed component
    pub const ALL: [Component; 7] = [
        Component::Xnu,
        Component::BootstrapCmds,
        Component::Dtrace,
        Component::AvailabilityVersions,
        Component::Libsystem,
        Component::Libplatform,
        Component::Libdispatch,
    ];

    /// Project name in the manifest and repository name upstream
    pub fn name(&self) -> &'static str {
        match self {
            Component::Xnu => "xnu",
            Component::BootstrapCmds => "bootstrap_cmds",
            Component::Dtrace => "dtrace",
            Component::AvailabilityVersions => "AvailabilityVersions",
            Component::Libsystem => "Libsystem",
            Component::Libplatform => "libplatform",
            Component::Libdispatch => "libdispatch",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    projects: Vec<ProjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    project: String,
    tag: String,
}

/// Component tags pinned for one release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseManifest {
    release: String,
    tags: BTreeMap<String, String>,
}

impl ReleaseManifest {
    /// Build a manifest from explicit entries
    pub fn new(release: &str, tags: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            release: release.to_string(),
            tags: tags.into_iter().collect(),
        }
    }

    /// Parse the release JSON document
    pub fn from_json(release: &str, content: &str) -> Result<Self, BuildError> {
        let doc: ManifestDocument =
            serde_json::from_str(content).map_err(|e| BuildError::ManifestUnavailable {
                release: release.to_string(),
                error: format!("invalid manifest: {e}"),
            })?;

        Ok(Self::new(
            release,
            doc.projects.into_iter().map(|p| (p.project, p.tag)),
        ))
    }

    /// Pinned tag of a component
    pub fn tag(&self, component: Component) -> Result<&str, BuildError> {
        self.tags
            .get(component.name())
            .map(String::as_str)
            .ok_or_else(|| BuildError::ComponentNotFound {
                release: self.release.clone(),
                component: component.name().to_string(),
            })
    }
}

/// Fetch-and-parse dependency of the resolver
#[allow(async_fn_in_trait)]
pub trait ManifestSource {
    /// Retrieve the manifest for a release
    async fn fetch(&self, release: &ReleaseInfo) -> Result<ReleaseManifest, BuildError>;
}

/// Manifest source reading the release JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpManifestSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpManifestSource {
    /// Create a source rooted at a distribution repository base URL
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(defaults::MANIFEST_TIMEOUT_SECS))
                .connect_timeout(Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.to_string(),
        }
    }
}

impl Default for HttpManifestSource {
    fn default() -> Self {
        Self::new(urls::RELEASE_MANIFEST_BASE)
    }
}

impl ManifestSource for HttpManifestSource {
    async fn fetch(&self, release: &ReleaseInfo) -> Result<ReleaseManifest, BuildError> {
        let url = urls::release_manifest(&self.base_url, &release.manifest_tag());
        let unavailable = |error: String| BuildError::ManifestUnavailable {
            release: release.version.to_string(),
            error,
        };

        tracing::debug!("Fetching release manifest {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {} from {url}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        ReleaseManifest::from_json(release.version, &body)
    }
}

/// Resolves component tags for one release
#[derive(Debug, Clone)]
pub struct VersionResolver<S> {
    source: S,
    release: ReleaseInfo,
}

impl<S: ManifestSource> VersionResolver<S> {
    /// Create a resolver for a release
    pub fn new(source: S, release: ReleaseInfo) -> Self {
        Self { source, release }
    }

    /// Manifest source consulted on every resolution
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Tag pinned for `component`, fetched afresh from the manifest source
    pub async fn resolve(&self, component: Component) -> Result<String, BuildError> {
        let manifest = self.source.fetch(&self.release).await?;
        let tag = manifest.tag(component)?.to_string();
        tracing::debug!("Resolved {component} to {tag} for {}", self.release.version);
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MANIFEST: &str = r#"{
        "build": "22G74",
        "projects": [
            {"project": "xnu", "tag": "xnu-8796.141.3"},
            {"project": "dtrace", "tag": "dtrace-397"},
            {"project": "libdispatch", "tag": "libdispatch-1415.120.5"}
        ]
    }"#;

    fn release_13_5() -> ReleaseInfo {
        release_info("13.5").unwrap()
    }

    #[test]
    fn test_release_info_known() {
        let info = release_13_5();
        assert_eq!(info.kdk_name(), "KDK_13.5_22G74");
        assert_eq!(info.manifest_tag(), "macos-135");
        assert_eq!(info.kdk_image_name(), "Kernel_Debug_Kit_13.5_build_22G74.dmg");
        assert_eq!(info.layout, SourceLayout::Legacy);
    }

    #[test]
    fn test_release_info_point_release_tag() {
        assert_eq!(release_info("13.2.1").unwrap().manifest_tag(), "macos-1321");
        assert_eq!(release_info("14.0").unwrap().layout, SourceLayout::Modern);
    }

    #[test]
    fn test_release_info_unknown() {
        let err = release_info("12.6").unwrap_err();
        match err {
            BuildError::InvalidReleaseIdentifier { release, supported } => {
                assert_eq!(release, "12.6");
                assert!(supported.contains("13.0"));
            }
            e => panic!("Expected InvalidReleaseIdentifier, got: {e:?}"),
        }
    }

    #[test]
    fn test_manifest_tag_lookup() {
        let manifest = ReleaseManifest::from_json("13.5", MANIFEST).unwrap();
        assert_eq!(manifest.tag(Component::Xnu).unwrap(), "xnu-8796.141.3");
        assert!(matches!(
            manifest.tag(Component::Libsystem),
            Err(BuildError::ComponentNotFound { .. })
        ));
    }

    #[test]
    fn test_manifest_parse_error() {
        let err = ReleaseManifest::from_json("13.5", "{not json").unwrap_err();
        assert!(matches!(err, BuildError::ManifestUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_http_source_fetches_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/macos-135/release.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MANIFEST))
            .mount(&server)
            .await;

        let source = HttpManifestSource::new(&server.uri());
        let manifest = source.fetch(&release_13_5()).await.unwrap();
        assert_eq!(manifest.tag(Component::Dtrace).unwrap(), "dtrace-397");
    }

    #[tokio::test]
    async fn test_http_source_missing_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpManifestSource::new(&server.uri());
        let err = source.fetch(&release_13_5()).await.unwrap_err();
        assert!(matches!(err, BuildError::ManifestUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_resolver_refetches_every_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/macos-135/release.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MANIFEST))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = VersionResolver::new(HttpManifestSource::new(&server.uri()), release_13_5());
        assert_eq!(resolver.resolve(Component::Xnu).await.unwrap(), "xnu-8796.141.3");
        assert_eq!(
            resolver.resolve(Component::Libdispatch).await.unwrap(),
            "libdispatch-1415.120.5"
        );
    }

    #[tokio::test]
    async fn test_resolver_component_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MANIFEST))
            .mount(&server)
            .await;

        let resolver = VersionResolver::new(HttpManifestSource::new(&server.uri()), release_13_5());
        let err = resolver.resolve(Component::BootstrapCmds).await.unwrap_err();
        match err {
            BuildError::ComponentNotFound { component, .. } => {
                assert_eq!(component, "bootstrap_cmds");
            }
            e => panic!("Expected ComponentNotFound, got: {e:?}"),
        }
    }
}
