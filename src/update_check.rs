//! Update checking for user-installed extensions.
//!
//! Each [`VersionSource`] can report the latest published version of an
//! extension; the checker asks every source and keeps the greatest version
//! that is strictly newer than what is installed. The verdict is written
//! back to the registry as `available_update` and never applied
//! automatically.

use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::manifest::ExtensionManifest;

/// Somewhere a newer extension version might be published.
#[async_trait]
pub trait VersionSource: Send + Sync {
    fn name(&self) -> &str;

    /// The latest published version for this extension, or `None` when the
    /// source doesn't know it.
    async fn latest_version(&self, manifest: &ExtensionManifest) -> Option<String>;
}

pub struct UpdateChecker {
    sources: Vec<Arc<dyn VersionSource>>,
}

impl UpdateChecker {
    pub fn new(sources: Vec<Arc<dyn VersionSource>>) -> Arc<Self> {
        Arc::new(Self { sources })
    }

    /// Ask every source and return the greatest version strictly newer than
    /// the installed one, or `None` when the extension is up to date or no
    /// source knows it. Unparseable versions are skipped.
    pub async fn check(&self, manifest: &ExtensionManifest) -> Option<String> {
        let installed = Version::parse(&manifest.version).ok()?;
        let mut best: Option<Version> = None;

        for source in &self.sources {
            let Some(candidate) = source.latest_version(manifest).await else {
                continue;
            };
            let Ok(candidate) = Version::parse(&candidate) else {
                tracing::debug!(
                    source = source.name(),
                    extension = %manifest.id,
                    version = %candidate,
                    "ignoring unparseable version from update source"
                );
                continue;
            };
            if candidate <= installed {
                continue;
            }
            if best.as_ref().is_none_or(|b| candidate > *b) {
                best = Some(candidate);
            }
        }

        best.map(|v| v.to_string())
    }
}

/// One entry in the remote extension index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    pub name: String,
    pub latest_version: String,
    /// Minimum clusterdeck version required to run the latest release.
    #[serde(default)]
    pub min_app_version: String,
}

/// [`VersionSource`] backed by a hosted `index.json` listing the latest
/// release of every published extension.
pub struct RemoteIndexSource {
    url: String,
}

impl RemoteIndexSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn fetch_index(&self) -> Result<Vec<IndexEntry>, String> {
        let response = reqwest::get(&self.url)
            .await
            .map_err(|e| format!("failed to fetch extension index: {e}"))?;

        if !response.status().is_success() {
            return Err(format!(
                "extension index returned HTTP {}",
                response.status()
            ));
        }

        response
            .json()
            .await
            .map_err(|e| format!("failed to parse extension index JSON: {e}"))
    }
}

#[async_trait]
impl VersionSource for RemoteIndexSource {
    fn name(&self) -> &str {
        "remote-index"
    }

    async fn latest_version(&self, manifest: &ExtensionManifest) -> Option<String> {
        match self.fetch_index().await {
            Ok(entries) => entries
                .into_iter()
                .find(|e| e.id == manifest.id)
                .map(|e| e.latest_version),
            Err(message) => {
                tracing::warn!(extension = %manifest.id, "{message}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, version: &str) -> ExtensionManifest {
        ExtensionManifest {
            id: id.to_string(),
            name: id.to_string(),
            version: version.to_string(),
            min_app_version: String::new(),
            main: None,
            renderer: None,
            description: None,
            author: None,
        }
    }

    struct FixedSource(Option<&'static str>);

    #[async_trait]
    impl VersionSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn latest_version(&self, _manifest: &ExtensionManifest) -> Option<String> {
            self.0.map(String::from)
        }
    }

    #[tokio::test]
    async fn newer_version_is_reported() {
        let checker = UpdateChecker::new(vec![Arc::new(FixedSource(Some("2.0.0")))]);
        let verdict = checker.check(&manifest("ext", "1.0.0")).await;
        assert_eq!(verdict.as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn same_or_older_version_is_not_an_update() {
        let checker = UpdateChecker::new(vec![Arc::new(FixedSource(Some("1.0.0")))]);
        assert!(checker.check(&manifest("ext", "1.0.0")).await.is_none());

        let checker = UpdateChecker::new(vec![Arc::new(FixedSource(Some("0.9.0")))]);
        assert!(checker.check(&manifest("ext", "1.0.0")).await.is_none());
    }

    #[tokio::test]
    async fn greatest_candidate_wins_across_sources() {
        let checker = UpdateChecker::new(vec![
            Arc::new(FixedSource(Some("1.5.0"))),
            Arc::new(FixedSource(Some("2.1.0"))),
            Arc::new(FixedSource(None)),
        ]);
        let verdict = checker.check(&manifest("ext", "1.0.0")).await;
        assert_eq!(verdict.as_deref(), Some("2.1.0"));
    }

    #[tokio::test]
    async fn unparseable_versions_are_skipped() {
        let checker = UpdateChecker::new(vec![
            Arc::new(FixedSource(Some("not-a-version"))),
            Arc::new(FixedSource(Some("1.2.0"))),
        ]);
        let verdict = checker.check(&manifest("ext", "1.0.0")).await;
        assert_eq!(verdict.as_deref(), Some("1.2.0"));
    }

    #[tokio::test]
    async fn remote_index_reports_matching_entry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/index.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"id": "metrics-pack", "name": "Metrics Pack", "latestVersion": "3.0.0"},
                    {"id": "other", "name": "Other", "latestVersion": "9.9.9"}
                ]"#,
            )
            .create_async()
            .await;

        let source = RemoteIndexSource::new(format!("{}/index.json", server.url()));
        let version = source.latest_version(&manifest("metrics-pack", "1.0.0")).await;
        assert_eq!(version.as_deref(), Some("3.0.0"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn remote_index_http_error_yields_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/index.json")
            .with_status(500)
            .create_async()
            .await;

        let source = RemoteIndexSource::new(format!("{}/index.json", server.url()));
        assert!(
            source
                .latest_version(&manifest("metrics-pack", "1.0.0"))
                .await
                .is_none()
        );
    }
}
