//! Configuration for lookups, staleness heuristics and license policy

use crate::error::{InsightError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Main configuration for ingestion and enrichment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Thresholds for staleness detection
    pub staleness_thresholds: StalenessThresholds,
    /// License policy configuration
    pub license_policy: LicensePolicy,
    /// Network configuration
    pub network: NetworkConfig,
}

/// Month boundaries of the staleness buckets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessThresholds {
    /// Months since last commit before a package is medium risk
    pub medium_months: f64,
    /// Months since last commit before a package is high risk
    pub high_months: f64,
}

/// License policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LicensePolicy {
    /// Allowed license types (empty = allow all)
    pub allowed_licenses: HashSet<String>,
    /// Explicitly forbidden licenses
    pub forbidden_licenses: HashSet<String>,
    /// Warn on copyleft licenses
    pub warn_on_copyleft: bool,
    /// Warn on unknown licenses
    pub warn_on_unknown: bool,
}

/// Endpoints and credentials for registry, source-host and audit calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Package registry base URL
    pub registry_url: String,
    /// Quick-audit relay accepting `{packages: {name: version}}`
    pub audit_url: Option<String>,
    /// Registry bulk advisory endpoint, used when no audit relay is set
    pub advisory_url: String,
    /// Same-origin relay for GitHub lookups (keeps the token server-side)
    pub github_relay_url: Option<String>,
    pub github_api_url: String,
    pub gitlab_api_url: String,
    pub bitbucket_api_url: String,
    /// GitHub API token, used only for direct (relay-less) lookups
    #[serde(skip_serializing)]
    pub github_token: Option<String>,
    /// GitLab API token (optional)
    #[serde(skip_serializing)]
    pub gitlab_token: Option<String>,
}

impl Default for StalenessThresholds {
    fn default() -> Self {
        Self {
            medium_months: 6.0,
            high_months: 18.0,
        }
    }
}

impl StalenessThresholds {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.medium_months < 0.0 || self.high_months < self.medium_months {
            return Err(format!(
                "Staleness thresholds must satisfy 0 <= medium ({}) <= high ({})",
                self.medium_months, self.high_months
            ));
        }
        Ok(())
    }
}

impl Default for LicensePolicy {
    fn default() -> Self {
        Self {
            allowed_licenses: HashSet::new(),
            forbidden_licenses: HashSet::new(),
            warn_on_copyleft: true,
            warn_on_unknown: true,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            registry_url: "https://registry.npmjs.org".to_string(),
            audit_url: None,
            advisory_url: "https://registry.npmjs.org/-/npm/v1/security/advisories/bulk"
                .to_string(),
            github_relay_url: None,
            github_api_url: "https://api.github.com".to_string(),
            gitlab_api_url: "https://gitlab.com/api/v4".to_string(),
            bitbucket_api_url: "https://api.bitbucket.org/2.0".to_string(),
            github_token: std::env::var("GITHUB_TOKEN").ok(),
            gitlab_token: std::env::var("GITLAB_TOKEN").ok(),
        }
    }
}

impl NetworkConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Config with every endpoint pointed at one base URL, for local servers
    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            timeout_secs: 5,
            registry_url: format!("{}/registry", base),
            audit_url: Some(format!("{}/audit", base)),
            advisory_url: format!("{}/advisories/bulk", base),
            github_relay_url: Some(format!("{}/relay/github", base)),
            github_api_url: format!("{}/github", base),
            gitlab_api_url: format!("{}/gitlab", base),
            bitbucket_api_url: format!("{}/bitbucket", base),
            github_token: None,
            gitlab_token: None,
        }
    }
}

impl InsightConfig {
    /// Create a new builder for InsightConfig
    pub fn builder() -> InsightConfigBuilder {
        InsightConfigBuilder::default()
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// anything the file leaves out
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: InsightConfig = toml::from_str(&content)?;
        config
            .staleness_thresholds
            .validate()
            .map_err(InsightError::config)?;
        Ok(config)
    }
}

/// Builder for InsightConfig
#[derive(Default)]
pub struct InsightConfigBuilder {
    staleness_thresholds: Option<StalenessThresholds>,
    license_policy: Option<LicensePolicy>,
    network: Option<NetworkConfig>,
}

impl InsightConfigBuilder {
    pub fn staleness_thresholds(mut self, thresholds: StalenessThresholds) -> Self {
        self.staleness_thresholds = Some(thresholds);
        self
    }

    pub fn license_policy(mut self, policy: LicensePolicy) -> Self {
        self.license_policy = Some(policy);
        self
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn build(self) -> InsightConfig {
        InsightConfig {
            staleness_thresholds: self.staleness_thresholds.unwrap_or_default(),
            license_policy: self.license_policy.unwrap_or_default(),
            network: self.network.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: InsightConfig = toml::from_str(
            r#"
            [network]
            registry_url = "https://npm.example.com"
            github_relay_url = "https://insight.example.com/api/github"

            [staleness_thresholds]
            high_months = 24.0
            "#,
        )
        .unwrap();

        assert_eq!(config.network.registry_url, "https://npm.example.com");
        assert_eq!(config.network.timeout_secs, 30);
        assert_eq!(config.staleness_thresholds.medium_months, 6.0);
        assert_eq!(config.staleness_thresholds.high_months, 24.0);
        assert!(config.license_policy.warn_on_copyleft);
    }

    #[test]
    fn test_from_file_rejects_inverted_thresholds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[staleness_thresholds]\nmedium_months = 12.0\nhigh_months = 3.0"
        )
        .unwrap();

        let err = InsightConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, InsightError::ConfigError(_)));
    }

    #[test]
    fn test_with_base_url_routes_everything_locally() {
        let network = NetworkConfig::with_base_url("http://127.0.0.1:9000/");
        assert_eq!(network.registry_url, "http://127.0.0.1:9000/registry");
        assert_eq!(
            network.github_relay_url.as_deref(),
            Some("http://127.0.0.1:9000/relay/github")
        );
        assert!(network.github_token.is_none());
    }

    #[test]
    fn test_builder() {
        let config = InsightConfig::builder()
            .staleness_thresholds(StalenessThresholds {
                medium_months: 3.0,
                high_months: 12.0,
            })
            .build();
        assert_eq!(config.staleness_thresholds.high_months, 12.0);
        assert_eq!(config.network.registry_url, "https://registry.npmjs.org");
    }
}
