//! Batch vulnerability audit against a quick-audit relay or the registry's
//! bulk advisory endpoint

use super::{build_client, VulnerabilityAudit};
use crate::config::NetworkConfig;
use crate::error::{InsightError, Result};
use crate::types::{Advisory, AuditSummary, PackageVulnerabilities, VulnerabilitySeverity};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct QuickAuditRequest<'a> {
    packages: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct BulkAdvisory {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    vulnerable_versions: Option<String>,
}

/// Vulnerability audit over HTTP
#[derive(Debug, Clone)]
pub struct HttpAuditor {
    client: Client,
    config: NetworkConfig,
}

impl HttpAuditor {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            config: config.clone(),
        })
    }

    async fn quick_audit(&self, url: &str, packages: &BTreeMap<String, String>) -> Result<AuditSummary> {
        let response = self
            .client
            .post(url)
            .json(&QuickAuditRequest { packages })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(InsightError::api("audit", format!("HTTP {}", response.status())));
        }

        let mut summary: AuditSummary = response.json().await?;
        if summary.packages.is_empty() && !summary.advisories.is_empty() {
            summary = summarize_advisories(summary.advisories);
        }
        Ok(summary)
    }

    async fn bulk_advisories(&self, packages: &BTreeMap<String, String>) -> Result<AuditSummary> {
        let body: BTreeMap<&str, [&str; 1]> = packages
            .iter()
            .map(|(name, version)| (name.as_str(), [version.as_str()]))
            .collect();

        let response = self
            .client
            .post(&self.config.advisory_url)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(InsightError::api(
                "advisories",
                format!("HTTP {}", response.status()),
            ));
        }

        let by_package: BTreeMap<String, Vec<BulkAdvisory>> = response.json().await?;
        let advisories = by_package
            .into_iter()
            .flat_map(|(package, entries)| {
                entries.into_iter().map(move |entry| Advisory {
                    id: entry.id,
                    package: package.clone(),
                    title: entry.title,
                    severity: entry
                        .severity
                        .as_deref()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or_default(),
                    url: entry.url,
                    vulnerable_versions: entry.vulnerable_versions,
                })
            })
            .collect();

        Ok(summarize_advisories(advisories))
    }
}

impl VulnerabilityAudit for HttpAuditor {
    async fn audit(&self, packages: &BTreeMap<String, String>) -> Result<AuditSummary> {
        if packages.is_empty() {
            return Ok(AuditSummary::default());
        }

        debug!("Auditing {} packages", packages.len());
        let summary = match &self.config.audit_url {
            Some(url) => self.quick_audit(url, packages).await?,
            None => self.bulk_advisories(packages).await?,
        };

        info!(
            "Audit found {} advisories across {} packages",
            summary.vulnerabilities,
            summary.packages.len()
        );
        Ok(summary)
    }
}

/// Build per-package counts, peak severities and severity buckets from a
/// flat advisory list
pub fn summarize_advisories(advisories: Vec<Advisory>) -> AuditSummary {
    let mut summary = AuditSummary {
        vulnerabilities: advisories.len() as u64,
        ..AuditSummary::default()
    };

    for advisory in &advisories {
        summary.counts.record(advisory.severity);
        let entry = summary
            .packages
            .entry(advisory.package.clone())
            .or_insert(PackageVulnerabilities {
                count: 0,
                severity: VulnerabilitySeverity::Info,
            });
        entry.count += 1;
        entry.severity = entry.severity.max(advisory.severity);
    }

    summary.advisories = advisories;
    summary
}
