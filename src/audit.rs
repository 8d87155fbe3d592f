//! Main ingestion and enrichment entry points

use crate::config::InsightConfig;
use crate::error::{InsightError, Result};
use crate::extract::{extract, parse_document};
use crate::merge::resolve;
use crate::orchestrator::Orchestrator;
use crate::types::{InventoryReport, PackageRecord};
use std::path::Path;
use tracing::{debug, info};

/// Parse a lockfile and build its canonical package list without any
/// network activity
pub fn build_inventory(text: &str) -> Result<Vec<PackageRecord>> {
    let document = parse_document(text)?;
    let extraction = extract(&document);
    debug!(
        "Extracted {} candidates, {} explicit names",
        extraction.candidates.len(),
        extraction.explicit_names.len()
    );

    let packages = resolve(extraction);
    if packages.is_empty() {
        return Err(InsightError::EmptyInventory);
    }
    Ok(packages)
}

/// Read a lockfile from disk and build its canonical package list
pub fn read_inventory(lockfile: &Path) -> Result<Vec<PackageRecord>> {
    info!("Reading lockfile at: {}", lockfile.display());
    let text = std::fs::read_to_string(lockfile)?;
    build_inventory(&text)
}

/// Ingest a lockfile and enrich every package, returning the full report
pub async fn audit_lockfile(lockfile: &Path, config: &InsightConfig) -> Result<InventoryReport> {
    let packages = read_inventory(lockfile)?;

    info!(
        "Found {} packages ({} explicit) in {}",
        packages.len(),
        packages.iter().filter(|p| p.explicit).count(),
        lockfile.display()
    );

    let orchestrator = Orchestrator::from_config(config)?;
    let report = orchestrator.start(packages).wait().await;

    info!(
        "Audit complete: {}/{} resolved, {} archived, {} vulnerable, {} critically outdated",
        report.summary.resolved,
        report.summary.total_packages,
        report.summary.archived,
        report.summary.vulnerable,
        report.summary.outdated_critical,
    );

    Ok(report)
}
