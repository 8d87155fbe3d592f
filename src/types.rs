//! Core data types for the package inventory and enrichment reporting

use crate::classify::{outdated_severity, staleness, OutdatedSeverity, StalenessRisk};
use crate::config::{LicensePolicy, StalenessThresholds};
use crate::license::analyze_license;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Which section of the lockfile attested a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The flat `packages` table keyed by installation path
    Packages,
    /// The nested `dependencies` tree of older lockfiles
    Dependencies,
}

impl Origin {
    /// Short tag used when deriving candidate identifiers
    pub fn tag(self) -> &'static str {
        match self {
            Self::Packages => "packages",
            Self::Dependencies => "dependencies",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Enrichment lifecycle of a record. Only moves forward out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnrichmentState {
    /// Lookups not finished yet
    Pending,
    /// No resolved location, never looked up
    LocalOnly,
    /// Registry lookup completed
    Resolved,
    /// Registry or host lookup failed
    ResolvedWithError,
}

impl EnrichmentState {
    pub fn is_settled(self) -> bool {
        self != Self::Pending
    }

    pub fn can_transition_to(self, next: EnrichmentState) -> bool {
        self == Self::Pending && next != Self::Pending
    }
}

impl std::fmt::Display for EnrichmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::LocalOnly => write!(f, "Local"),
            Self::Resolved => write!(f, "Resolved"),
            Self::ResolvedWithError => write!(f, "Error"),
        }
    }
}

/// Fields populated by registry and source-host lookups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Registry `latest` dist-tag
    pub latest_version: Option<String>,
    /// Declared license, "unknown" when the registry has none
    pub license: Option<String>,
    pub homepage: Option<String>,
    /// Normalized web URL of the source repository
    pub repository: Option<String>,
    pub last_commit: Option<DateTime<Utc>>,
    pub stars: Option<u64>,
    pub archived: Option<bool>,
    /// Declared package size in bytes
    pub size: Option<u64>,
}

/// Advisory severity as reported by the audit endpoint
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VulnerabilitySeverity {
    #[default]
    Info,
    Low,
    Moderate,
    High,
    Critical,
}

impl VulnerabilitySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for VulnerabilitySeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "low" => Ok(Self::Low),
            "moderate" | "medium" => Ok(Self::Moderate),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

impl std::fmt::Display for VulnerabilitySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-package advisory breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVulnerabilities {
    pub count: u64,
    pub severity: VulnerabilitySeverity,
}

/// Severity-bucketed advisory counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityCounts {
    #[serde(default)]
    pub info: u64,
    #[serde(default)]
    pub low: u64,
    #[serde(default)]
    pub moderate: u64,
    #[serde(default)]
    pub high: u64,
    #[serde(default)]
    pub critical: u64,
}

impl VulnerabilityCounts {
    pub fn total(&self) -> u64 {
        self.info + self.low + self.moderate + self.high + self.critical
    }

    pub fn record(&mut self, severity: VulnerabilitySeverity) {
        match severity {
            VulnerabilitySeverity::Info => self.info += 1,
            VulnerabilitySeverity::Low => self.low += 1,
            VulnerabilitySeverity::Moderate => self.moderate += 1,
            VulnerabilitySeverity::High => self.high += 1,
            VulnerabilitySeverity::Critical => self.critical += 1,
        }
    }

    /// Count of advisories at or above `threshold`
    pub fn at_or_above(&self, threshold: VulnerabilitySeverity) -> u64 {
        match threshold {
            VulnerabilitySeverity::Info => self.total(),
            VulnerabilitySeverity::Low => self.low + self.moderate + self.high + self.critical,
            VulnerabilitySeverity::Moderate => self.moderate + self.high + self.critical,
            VulnerabilitySeverity::High => self.high + self.critical,
            VulnerabilitySeverity::Critical => self.critical,
        }
    }
}

/// A single advisory from the audit endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, alias = "module_name", alias = "name")]
    pub package: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub severity: VulnerabilitySeverity,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub vulnerable_versions: Option<String>,
}

/// Result of the once-per-generation vulnerability audit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    /// Total advisory count
    #[serde(default)]
    pub vulnerabilities: u64,
    #[serde(default)]
    pub advisories: Vec<Advisory>,
    /// Advisory breakdown keyed by package name
    #[serde(default)]
    pub packages: BTreeMap<String, PackageVulnerabilities>,
    #[serde(default, alias = "summary")]
    pub counts: VulnerabilityCounts,
}

/// The canonical unit of the inventory.
///
/// Identity (`name`, `version`) and the generated `id` are fixed at
/// construction; so is the enrichment state except through
/// [`PackageRecord::transition`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageRecord {
    id: String,
    name: String,
    version: Option<String>,
    pub origins: BTreeSet<Origin>,
    /// Resolved download location
    pub resolved: Option<String>,
    pub integrity: Option<String>,
    /// Installation path key from the flat table
    pub path: Option<String>,
    pub dev: Option<bool>,
    pub optional: Option<bool>,
    pub peer: Option<bool>,
    pub extraneous: Option<bool>,
    pub dependencies: BTreeSet<String>,
    pub requires: BTreeSet<String>,
    pub peer_dependencies: BTreeSet<String>,
    pub bundled_dependencies: BTreeSet<String>,
    /// Named directly by the root manifest
    pub explicit: bool,
    state: EnrichmentState,
    pub enrichment: Enrichment,
    pub vulnerabilities: Option<PackageVulnerabilities>,
    /// Unrecognized upstream fields, kept for display
    pub raw: Map<String, Value>,
}

impl PackageRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: Option<String>,
        origin: Origin,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version,
            origins: BTreeSet::from([origin]),
            resolved: None,
            integrity: None,
            path: None,
            dev: None,
            optional: None,
            peer: None,
            extraneous: None,
            dependencies: BTreeSet::new(),
            requires: BTreeSet::new(),
            peer_dependencies: BTreeSet::new(),
            bundled_dependencies: BTreeSet::new(),
            explicit: false,
            state: EnrichmentState::Pending,
            enrichment: Enrichment::default(),
            vulnerabilities: None,
            raw: Map::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn state(&self) -> EnrichmentState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == EnrichmentState::Pending
    }

    /// Whether the record can ever be looked up over the network
    pub fn is_resolvable(&self) -> bool {
        self.resolved.as_deref().is_some_and(|r| !r.trim().is_empty())
    }

    /// Move to `next`; returns false and leaves the record untouched if the
    /// transition would go backwards.
    pub fn transition(&mut self, next: EnrichmentState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    /// Outdatedness of the declared version against the registry's latest
    pub fn outdated_severity(&self) -> OutdatedSeverity {
        outdated_severity(
            self.version().unwrap_or("unknown"),
            self.enrichment.latest_version.as_deref().unwrap_or("unknown"),
        )
    }

    /// Archived upstream and already resolved
    pub fn is_archived(&self) -> bool {
        self.state == EnrichmentState::Resolved && self.enrichment.archived == Some(true)
    }
}

impl std::fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Complete inventory report for one lockfile generation
#[derive(Debug, Clone, Serialize)]
pub struct InventoryReport {
    pub generation: u64,
    /// Timestamp when the report was produced
    pub generated_at: DateTime<Utc>,
    /// Canonical packages in (name, version) order
    pub packages: Vec<PackageRecord>,
    /// Vulnerability audit, absent if it failed or was cancelled
    pub audit: Option<AuditSummary>,
    pub summary: InventorySummary,
}

/// Summary statistics for an inventory report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub total_packages: usize,
    pub explicit: usize,
    pub pending: usize,
    pub local_only: usize,
    pub resolved: usize,
    pub resolved_with_error: usize,
    pub archived: usize,
    pub vulnerable: usize,
    pub outdated_critical: usize,
    pub outdated_high: usize,
    pub outdated_moderate: usize,
    pub stale_high_risk: usize,
    pub stale_medium_risk: usize,
    pub license_issues: usize,
}

impl InventoryReport {
    /// Create a new report
    pub fn new(generation: u64, packages: Vec<PackageRecord>, audit: Option<AuditSummary>) -> Self {
        Self {
            generation,
            generated_at: Utc::now(),
            packages,
            audit,
            summary: InventorySummary::default(),
        }
    }

    /// Compute summary statistics from packages
    pub fn compute_summary(&mut self, thresholds: &StalenessThresholds, policy: &LicensePolicy) {
        let mut summary = InventorySummary {
            total_packages: self.packages.len(),
            ..InventorySummary::default()
        };

        for pkg in &self.packages {
            match pkg.state() {
                EnrichmentState::Pending => summary.pending += 1,
                EnrichmentState::LocalOnly => summary.local_only += 1,
                EnrichmentState::Resolved => summary.resolved += 1,
                EnrichmentState::ResolvedWithError => summary.resolved_with_error += 1,
            }

            if pkg.explicit {
                summary.explicit += 1;
            }
            if pkg.is_archived() {
                summary.archived += 1;
            }
            if pkg.vulnerabilities.is_some_and(|v| v.count > 0) {
                summary.vulnerable += 1;
            }

            match pkg.outdated_severity() {
                OutdatedSeverity::Critical => summary.outdated_critical += 1,
                OutdatedSeverity::High => summary.outdated_high += 1,
                OutdatedSeverity::Moderate => summary.outdated_moderate += 1,
                OutdatedSeverity::Low => {}
            }

            if let Some(last_commit) = pkg.enrichment.last_commit {
                match staleness(last_commit, self.generated_at, thresholds) {
                    StalenessRisk::High => summary.stale_high_risk += 1,
                    StalenessRisk::Medium => summary.stale_medium_risk += 1,
                    StalenessRisk::Low => {}
                }
            }

            if pkg.state() == EnrichmentState::Resolved {
                let (_, warnings) = analyze_license(pkg.enrichment.license.as_deref(), policy);
                if !warnings.is_empty() {
                    summary.license_issues += 1;
                }
            }
        }

        self.summary = summary;
    }
}
