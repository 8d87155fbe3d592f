//! CLI tool for inspecting and enriching npm lockfiles

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use lockfile_insight::{
    analyze_license, read_inventory, sort_for_display, staleness, CommitAge,
    EnrichmentState, InsightConfig, InventoryReport, LicenseRisk, Orchestrator, OutdatedSeverity,
    PackageRecord, StalenessRisk, VulnerabilitySeverity,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "lock-insight")]
#[command(about = "Inventory npm lockfiles and enrich every package with freshness, popularity, license and vulnerability signals", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the lockfile to inspect
    #[arg(short = 'l', long, default_value = "package-lock.json")]
    lockfile: PathBuf,

    /// Path to custom configuration file (TOML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Override the package registry base URL
    #[arg(long)]
    registry_url: Option<String>,

    /// Override the GitHub relay URL
    #[arg(long)]
    github_relay_url: Option<String>,

    /// Override the quick-audit relay URL
    #[arg(long)]
    audit_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich every package and display a summary
    Scan {
        /// Fail if any package has an advisory at or above this severity
        #[arg(long)]
        fail_on: Option<VulnerabilitySeverity>,

        /// Display every package in display order
        #[arg(long)]
        detailed: bool,
    },

    /// Generate a full enrichment report
    Report {
        /// Output format
        #[arg(short = 'f', long, default_value = "markdown")]
        format: ReportFormat,

        /// Output file (default: stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Check packages against policy (exit code based)
    Check {
        /// Lowest advisory severity that fails the check
        #[arg(long, default_value = "high")]
        fail_on: VulnerabilitySeverity,

        /// Fail on archived upstream repositories
        #[arg(long)]
        fail_on_archived: bool,

        /// Fail on copyleft licenses
        #[arg(long)]
        fail_on_copyleft: bool,

        /// Fail on unknown licenses
        #[arg(long)]
        fail_on_unknown_license: bool,
    },

    /// Print the canonical package list as JSON without any network access
    Inventory {
        /// Output file (default: stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Debug)]
enum ReportFormat {
    Json,
    Markdown,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    if let Commands::Inventory { output } = &cli.command {
        run_inventory(&cli.lockfile, output.as_deref());
        return;
    }

    // Load configuration
    let config = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{} Failed to load config: {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    };

    let report = match enrich(&cli.lockfile, &config).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} Audit failed: {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    };

    // Handle subcommand
    match cli.command {
        Commands::Scan { fail_on, detailed } => {
            display_summary(&report);

            if detailed {
                println!();
                display_detailed(&report, &config);
            }

            if let Some(threshold) = fail_on {
                let failing = vulnerable_at_or_above(&report, threshold);
                if !failing.is_empty() {
                    eprintln!(
                        "\n{} {} packages with {} or worse advisories:",
                        "Failed:".red().bold(),
                        failing.len(),
                        threshold
                    );
                    for pkg in &failing {
                        eprintln!("  - {}", pkg);
                    }
                    process::exit(1);
                }
            }
        }

        Commands::Report { format, output } => {
            let content = match format {
                ReportFormat::Json => generate_json_report(&report),
                ReportFormat::Markdown => generate_markdown_report(&report),
            };
            write_output(output.as_deref(), &content);
        }

        Commands::Check {
            fail_on,
            fail_on_archived,
            fail_on_copyleft,
            fail_on_unknown_license,
        } => {
            let mut failures: Vec<String> = vulnerable_at_or_above(&report, fail_on)
                .into_iter()
                .map(|pkg| format!("  - {}: {} or worse advisories", pkg, fail_on))
                .collect();

            for pkg in &report.packages {
                if fail_on_archived && pkg.is_archived() {
                    failures.push(format!("  - {}: upstream repository is archived", pkg));
                }

                if pkg.state() != EnrichmentState::Resolved {
                    continue;
                }
                let license = pkg.enrichment.license.as_deref();
                let (risk, _) = analyze_license(license, &config.license_policy);

                if fail_on_copyleft && risk == LicenseRisk::Copyleft {
                    failures.push(format!(
                        "  - {}: copyleft license ({})",
                        pkg,
                        license.unwrap_or("unknown")
                    ));
                }

                if fail_on_unknown_license && risk == LicenseRisk::Unknown {
                    failures.push(format!("  - {}: unknown/missing license", pkg));
                }
            }

            if !failures.is_empty() {
                eprintln!("{} {} check failures:", "Failed:".red().bold(), failures.len());
                for failure in failures {
                    eprintln!("{}", failure);
                }
                process::exit(1);
            } else {
                println!("{} All checks passed!", "Success:".green().bold());
            }
        }

        Commands::Inventory { .. } => {}
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<InsightConfig> {
    let mut config = match &cli.config {
        Some(path) => InsightConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => InsightConfig::default(),
    };

    // Command-line flags override the file
    if let Some(url) = &cli.registry_url {
        config.network.registry_url = url.clone();
    }
    if let Some(url) = &cli.github_relay_url {
        config.network.github_relay_url = Some(url.clone());
    }
    if let Some(url) = &cli.audit_url {
        config.network.audit_url = Some(url.clone());
    }
    if let Some(timeout) = cli.timeout {
        config.network.timeout_secs = timeout;
    }

    Ok(config)
}

fn run_inventory(lockfile: &Path, output: Option<&Path>) {
    let packages = match read_inventory(lockfile) {
        Ok(packages) => packages,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    };

    let content = serde_json::to_string_pretty(&packages).unwrap_or_else(|e| {
        eprintln!("Failed to serialize inventory: {}", e);
        process::exit(1);
    });
    write_output(output, &content);
}

/// Ingest the lockfile and drive enrichment with a settled/total progress bar
async fn enrich(lockfile: &Path, config: &InsightConfig) -> lockfile_insight::Result<InventoryReport> {
    let text = std::fs::read_to_string(lockfile)?;
    let orchestrator = Orchestrator::from_config(config)?;
    let mut generation = orchestrator.ingest(&text)?;
    info!("Started generation {}", generation.id());

    let progress = generation.progress();
    let bar = ProgressBar::new(progress.total as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} packages settled")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_position(progress.settled as u64);

    while generation.next_event().await.is_some() {
        bar.set_position(generation.progress().settled as u64);
    }
    bar.finish_and_clear();

    Ok(generation.wait().await)
}

fn vulnerable_at_or_above(report: &InventoryReport, threshold: VulnerabilitySeverity) -> Vec<&PackageRecord> {
    report
        .packages
        .iter()
        .filter(|p| {
            p.vulnerabilities
                .is_some_and(|v| v.count > 0 && v.severity >= threshold)
        })
        .collect()
}

fn write_output(output: Option<&Path>, content: &str) {
    if let Some(output_path) = output {
        match std::fs::write(output_path, content) {
            Ok(_) => println!("Report written to: {}", output_path.display()),
            Err(e) => {
                eprintln!("{} Failed to write report: {}", "Error:".red().bold(), e);
                process::exit(1);
            }
        }
    } else {
        println!("{}", content);
    }
}

fn percent(count: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (count as f32 / total as f32) * 100.0
}

fn display_summary(report: &InventoryReport) {
    let summary = &report.summary;
    let total = summary.total_packages;

    println!("\n{}", "=== Lockfile Summary ===".bold());
    println!("Total packages: {} ({} explicit)", total, summary.explicit);
    println!();

    println!("Enrichment:");
    println!(
        "  {} {} ({:.1}%)",
        "●".green(),
        format!("Resolved: {}", summary.resolved).green(),
        percent(summary.resolved, total)
    );
    println!(
        "  {} {} ({:.1}%)",
        "●".blue(),
        format!("Local only: {}", summary.local_only).blue(),
        percent(summary.local_only, total)
    );
    println!(
        "  {} {} ({:.1}%)",
        "●".red(),
        format!("Errors: {}", summary.resolved_with_error).red(),
        percent(summary.resolved_with_error, total)
    );
    println!();

    println!("Outdated:");
    println!("  {}", format!("Critical: {}", summary.outdated_critical).red());
    println!("  {}", format!("High: {}", summary.outdated_high).truecolor(255, 165, 0));
    println!("  {}", format!("Moderate: {}", summary.outdated_moderate).yellow());
    println!();

    println!(
        "Stale repositories: {} high risk, {} medium risk",
        summary.stale_high_risk, summary.stale_medium_risk
    );
    println!("Archived repositories: {}", summary.archived);
    println!("License issues: {}", summary.license_issues);

    match &report.audit {
        Some(audit) => println!(
            "Vulnerabilities: {} in {} packages (critical {}, high {}, moderate {}, low {}, info {})",
            audit.vulnerabilities,
            summary.vulnerable,
            audit.counts.critical,
            audit.counts.high,
            audit.counts.moderate,
            audit.counts.low,
            audit.counts.info
        ),
        None => println!("Vulnerabilities: {}", "no audit data".dimmed()),
    }
}

fn display_detailed(report: &InventoryReport, config: &InsightConfig) {
    println!("{}", "=== Packages ===".bold());

    let mut packages = report.packages.clone();
    sort_for_display(&mut packages);

    for pkg in &packages {
        let state_str = match pkg.state() {
            EnrichmentState::Resolved => pkg.state().to_string().green(),
            EnrichmentState::LocalOnly => pkg.state().to_string().blue(),
            EnrichmentState::ResolvedWithError => pkg.state().to_string().red(),
            EnrichmentState::Pending => pkg.state().to_string().dimmed(),
        };

        let explicit = if pkg.explicit { " (explicit)" } else { "" };
        println!("\n{} [{}]{}", pkg.to_string().bold(), state_str, explicit);

        if pkg.is_archived() {
            println!("  {}", "Repository is archived".red().bold());
        }

        if let Some(latest) = &pkg.enrichment.latest_version {
            let severity = pkg.outdated_severity();
            let label = match severity {
                OutdatedSeverity::Critical => severity.to_string().red(),
                OutdatedSeverity::High => severity.to_string().truecolor(255, 165, 0),
                OutdatedSeverity::Moderate => severity.to_string().yellow(),
                OutdatedSeverity::Low => severity.to_string().green(),
            };
            println!("  Latest: {} ({})", latest, label);
        }

        if let Some(last_commit) = pkg.enrichment.last_commit {
            let risk = staleness(last_commit, report.generated_at, &config.staleness_thresholds);
            let risk_str = match risk {
                StalenessRisk::High => risk.to_string().red(),
                StalenessRisk::Medium => risk.to_string().yellow(),
                StalenessRisk::Low => risk.to_string().green(),
            };
            println!(
                "  Last commit: {} ({})",
                CommitAge::between(last_commit, report.generated_at).label(),
                risk_str
            );
        }

        if let Some(stars) = pkg.enrichment.stars {
            println!("  Stars: {}", stars);
        }

        if let Some(license) = &pkg.enrichment.license {
            let (risk, warnings) = analyze_license(Some(license), &config.license_policy);
            println!("  License: {} ({})", license, risk);
            for warning in &warnings {
                println!("    - {}", warning.yellow());
            }
        }

        if let Some(vulns) = pkg.vulnerabilities.filter(|v| v.count > 0) {
            println!(
                "  {}",
                format!("Vulnerabilities: {} (peak {})", vulns.count, vulns.severity).red()
            );
        }
    }
}

fn generate_json_report(report: &InventoryReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| {
        eprintln!("Failed to serialize report: {}", e);
        process::exit(1);
    })
}

fn generate_markdown_report(report: &InventoryReport) -> String {
    let mut md = String::new();
    let summary = &report.summary;

    md.push_str(&format!("# Lockfile Report (generation {})\n\n", report.generation));
    md.push_str(&format!("**Generated:** {}\n\n", report.generated_at));

    md.push_str("## Summary\n\n");
    md.push_str(&format!("- Total packages: {}\n", summary.total_packages));
    md.push_str(&format!("- Explicit: {}\n", summary.explicit));
    md.push_str(&format!("- Resolved: {}\n", summary.resolved));
    md.push_str(&format!("- Local only: {}\n", summary.local_only));
    md.push_str(&format!("- Errors: {}\n", summary.resolved_with_error));
    md.push_str(&format!("- Archived: {}\n", summary.archived));
    md.push_str(&format!(
        "- Outdated: {} critical, {} high, {} moderate\n",
        summary.outdated_critical, summary.outdated_high, summary.outdated_moderate
    ));
    md.push_str(&format!(
        "- Stale: {} high risk, {} medium risk\n",
        summary.stale_high_risk, summary.stale_medium_risk
    ));
    md.push_str(&format!("- License issues: {}\n", summary.license_issues));
    match &report.audit {
        Some(audit) => md.push_str(&format!(
            "- Vulnerabilities: {} in {} packages\n\n",
            audit.vulnerabilities, summary.vulnerable
        )),
        None => md.push_str("- Vulnerabilities: no audit data\n\n"),
    }

    md.push_str("## Packages\n\n");
    md.push_str("| Name | Version | Latest | State | Outdated | Last commit | Stars | License | Vulnerabilities |\n");
    md.push_str("|------|---------|--------|-------|----------|-------------|-------|---------|-----------------|\n");

    let mut packages = report.packages.clone();
    sort_for_display(&mut packages);

    for pkg in &packages {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            pkg.name(),
            pkg.version().unwrap_or("-"),
            pkg.enrichment.latest_version.as_deref().unwrap_or("-"),
            pkg.state(),
            pkg.outdated_severity(),
            pkg.enrichment
                .last_commit
                .map(|d| CommitAge::between(d, report.generated_at).label())
                .unwrap_or_else(|| "-".to_string()),
            pkg.enrichment
                .stars
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            pkg.enrichment.license.as_deref().unwrap_or("-"),
            pkg.vulnerabilities
                .filter(|v| v.count > 0)
                .map(|v| format!("{} ({})", v.count, v.severity))
                .unwrap_or_else(|| "-".to_string()),
        ));
    }

    md
}
