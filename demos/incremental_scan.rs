//! Incremental enrichment of a lockfile, printing packages as they settle

use lockfile_insight::{InsightConfig, Orchestrator, ProgressEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "package-lock.json".to_string());
    let text = std::fs::read_to_string(&path)?;

    let orchestrator = Orchestrator::from_config(&InsightConfig::default())?;
    let mut generation = orchestrator.ingest(&text)?;

    let packages = generation.snapshot();
    println!("Ingested {} packages from {}", packages.len(), path);

    while let Some(event) = generation.next_event().await {
        let progress = generation.progress();
        match event {
            ProgressEvent::Settled { index, state } => {
                println!(
                    "[{}/{}] {} is {}",
                    progress.settled, progress.total, packages[index], state
                );
            }
            ProgressEvent::Audited { vulnerable_packages } => {
                println!("Audit finished: {} vulnerable packages", vulnerable_packages);
            }
            ProgressEvent::AuditFailed => println!("Audit unavailable for this run"),
        }
    }

    let report = generation.wait().await;
    println!("\n=== Summary ===");
    println!("Resolved: {}", report.summary.resolved);
    println!("Local only: {}", report.summary.local_only);
    println!("Failed lookups: {}", report.summary.resolved_with_error);
    println!("Critically outdated: {}", report.summary.outdated_critical);

    Ok(())
}
