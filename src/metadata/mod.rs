//! Metadata fetchers for the npm registry, source hosts and the advisory
//! service, plus the lookup seams the orchestrator drives.

pub mod advisories;
pub mod bitbucket;
pub mod github;
pub mod gitlab;
pub mod registry;

pub use advisories::{summarize_advisories, HttpAuditor};
pub use registry::{fetch_registry_metadata, RegistryMetadata};

use crate::config::NetworkConfig;
use crate::error::{InsightError, Result};
use crate::repository::{normalize_repository_url, parse_repository, RepositoryHost, RepositoryRef};
use crate::types::{AuditSummary, Enrichment};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::debug;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Per-package enrichment source.
///
/// A returned error marks the package as resolved-with-error; it never
/// affects sibling lookups.
pub trait PackageLookup: Send + Sync + 'static {
    fn lookup(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> impl Future<Output = Result<Enrichment>> + Send;
}

/// Batch vulnerability audit over a `name -> version` map
pub trait VulnerabilityAudit: Send + Sync + 'static {
    fn audit(
        &self,
        packages: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<AuditSummary>> + Send;
}

/// Signals from a source host. Anything the host did not provide is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostMetadata {
    pub last_commit: Option<DateTime<Utc>>,
    pub stars: Option<u64>,
    pub archived: Option<bool>,
}

/// Registry + source-host lookup over HTTP
#[derive(Debug, Clone)]
pub struct HttpLookup {
    client: Client,
    config: NetworkConfig,
}

impl HttpLookup {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            config: config.clone(),
        })
    }

    async fn fetch_host_metadata(&self, repo: &RepositoryRef) -> Result<HostMetadata> {
        match repo.host {
            RepositoryHost::GitHub => github::fetch_github_metadata(&self.client, &self.config, repo).await,
            RepositoryHost::GitLab => gitlab::fetch_gitlab_metadata(&self.client, &self.config, repo).await,
            RepositoryHost::Bitbucket => {
                bitbucket::fetch_bitbucket_metadata(&self.client, &self.config, repo).await
            }
            RepositoryHost::Other => Ok(HostMetadata::default()),
        }
    }
}

impl PackageLookup for HttpLookup {
    async fn lookup(&self, name: &str, version: Option<&str>) -> Result<Enrichment> {
        let registry = fetch_registry_metadata(&self.client, &self.config, name, version).await?;

        let repository = registry
            .repository_url
            .as_deref()
            .and_then(normalize_repository_url);

        let host = match repository.as_deref().and_then(parse_repository) {
            Some(repo) => {
                debug!("Fetching {} metadata for {}", repo.host, repo.project_path);
                self.fetch_host_metadata(&repo).await?
            }
            None => HostMetadata::default(),
        };

        Ok(Enrichment {
            latest_version: registry.latest_version,
            license: Some(registry.license),
            homepage: registry.homepage,
            repository,
            last_commit: host.last_commit,
            stars: host.stars,
            archived: host.archived,
            size: registry.size,
        })
    }
}

/// Build HTTP client with proper configuration
pub(crate) fn build_client(config: &NetworkConfig) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.timeout())
        .build()
        .map_err(|e| InsightError::network(format!("Failed to build HTTP client: {}", e)))
}

/// Parse an RFC 3339 timestamp; unparseable dates count as unknown
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn test_parse_datetime() {
        assert!(parse_datetime("2024-03-01T10:00:00Z").is_some());
        assert!(parse_datetime("2024-03-01T10:00:00+02:00").is_some());
        assert!(parse_datetime("last tuesday").is_none());
    }

    #[tokio::test]
    async fn test_lookup_with_github_relay() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/registry/left-pad")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "dist-tags": {"latest": "1.3.0"},
                    "versions": {"1.3.0": {
                        "license": "WTFPL",
                        "homepage": "https://github.com/stevemao/left-pad#readme",
                        "repository": {"type": "git", "url": "git+https://github.com/stevemao/left-pad.git"},
                        "dist": {"unpackedSize": 9000}
                    }}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let relay = server
            .mock("POST", "/relay/github")
            .match_body(Matcher::Json(json!({"owner": "stevemao", "repo": "left-pad"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"lastCommitDate": "2018-04-09T12:00:00Z", "stars": 1200, "archived": true}"#)
            .create_async()
            .await;

        let lookup = HttpLookup::new(&NetworkConfig::with_base_url(&server.url())).unwrap();
        let enrichment = lookup.lookup("left-pad", Some("1.3.0")).await.unwrap();

        relay.assert_async().await;
        assert_eq!(enrichment.latest_version.as_deref(), Some("1.3.0"));
        assert_eq!(enrichment.license.as_deref(), Some("WTFPL"));
        assert_eq!(
            enrichment.repository.as_deref(),
            Some("https://github.com/stevemao/left-pad")
        );
        assert_eq!(enrichment.stars, Some(1200));
        assert_eq!(enrichment.archived, Some(true));
        assert_eq!(enrichment.size, Some(9000));
        assert!(enrichment.last_commit.is_some());
    }

    #[tokio::test]
    async fn test_lookup_without_repository_skips_hosts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/registry/tiny")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"dist-tags": {"latest": "2.0.0"}, "versions": {"2.0.0": {}}}"#)
            .create_async()
            .await;
        let relay = server
            .mock("POST", "/relay/github")
            .expect(0)
            .create_async()
            .await;

        let lookup = HttpLookup::new(&NetworkConfig::with_base_url(&server.url())).unwrap();
        let enrichment = lookup.lookup("tiny", Some("1.0.0")).await.unwrap();

        relay.assert_async().await;
        assert_eq!(enrichment.latest_version.as_deref(), Some("2.0.0"));
        assert_eq!(enrichment.license.as_deref(), Some("unknown"));
        assert_eq!(enrichment.repository, None);
        assert_eq!(enrichment.stars, None);
    }

    #[tokio::test]
    async fn test_lookup_registry_failure_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/registry/broken")
            .with_status(500)
            .create_async()
            .await;

        let lookup = HttpLookup::new(&NetworkConfig::with_base_url(&server.url())).unwrap();
        assert!(lookup.lookup("broken", Some("1.0.0")).await.is_err());
    }
}
