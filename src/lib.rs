//! # lockfile_insight
//!
//! Turns an npm-style lockfile of any generation into a canonical package
//! inventory and enriches it from the registry and source hosts:
//! - **Extraction**: Walk the flat `packages` table and the nested `dependencies` tree, cycle-safe
//! - **Merge**: Deduplicate candidates by (name, version) with deterministic field merging
//! - **Enrichment**: Concurrent registry and GitHub/GitLab/Bitbucket lookups with cancellation
//! - **Audit**: One batch vulnerability audit per lockfile
//! - **Classification**: Outdatedness, staleness and license risk for display
//!
//! ## Quick Start
//!
//! ```no_run
//! use lockfile_insight::{audit_lockfile, InsightConfig};
//! use std::path::Path;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = InsightConfig::default();
//! let report = audit_lockfile(Path::new("package-lock.json"), &config).await?;
//!
//! for pkg in report.packages {
//!     println!("{}: {} (latest {:?})", pkg, pkg.state(), pkg.enrichment.latest_version);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Incremental use
//!
//! [`Orchestrator::ingest`] returns a [`Generation`] as soon as the lockfile
//! is merged. Poll [`Generation::progress`] or [`Generation::next_event`]
//! while lookups race, and ingest the next lockfile whenever it arrives: the
//! previous generation is cancelled and never written to again.

mod audit;
mod classify;
mod config;
mod decode;
mod error;
mod extract;
mod license;
mod merge;
mod metadata;
mod orchestrator;
mod repository;
mod types;

// Re-export public API
pub use audit::{audit_lockfile, build_inventory, read_inventory};
pub use classify::{
    display_order, outdated_severity, sort_for_display, staleness, CommitAge, OutdatedSeverity,
    StalenessRisk,
};
pub use config::{InsightConfig, InsightConfigBuilder, LicensePolicy, NetworkConfig, StalenessThresholds};
pub use error::{InsightError, Result};
pub use extract::{extract, parse_document, Extraction};
pub use license::{analyze_license, categorize_license, LicenseRisk};
pub use merge::{resolve, MergeResolver};
pub use metadata::{
    fetch_registry_metadata, summarize_advisories, HostMetadata, HttpAuditor, HttpLookup,
    PackageLookup, RegistryMetadata, VulnerabilityAudit,
};
pub use orchestrator::{Generation, Orchestrator, Progress, ProgressEvent};
pub use repository::{normalize_repository_url, parse_repository, RepositoryHost, RepositoryRef};
pub use types::{
    Advisory, AuditSummary, Enrichment, EnrichmentState, InventoryReport, InventorySummary,
    Origin, PackageRecord, PackageVulnerabilities, VulnerabilityCounts, VulnerabilitySeverity,
};
