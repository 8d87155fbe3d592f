//! Enrich a lockfile with a stricter configuration

use lockfile_insight::{
    audit_lockfile, sort_for_display, InsightConfig, LicensePolicy, StalenessThresholds,
};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = InsightConfig::builder()
        .staleness_thresholds(StalenessThresholds {
            medium_months: 3.0,
            high_months: 12.0,
        })
        .license_policy(LicensePolicy {
            warn_on_copyleft: true,
            warn_on_unknown: true,
            ..Default::default()
        })
        .build();

    let mut report = audit_lockfile(Path::new("package-lock.json"), &config).await?;
    sort_for_display(&mut report.packages);

    for pkg in report.packages.iter().take(10) {
        println!(
            "{}: {} (outdated: {})",
            pkg,
            pkg.state(),
            pkg.outdated_severity()
        );
    }

    Ok(())
}
