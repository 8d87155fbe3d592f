//! Outdatedness, staleness and display-order classification

use crate::config::StalenessThresholds;
use crate::types::PackageRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const DAYS_PER_MONTH: f64 = 30.44;
const DAYS_PER_YEAR: f64 = 365.25;

/// How far a declared version trails the registry's latest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutdatedSeverity {
    Low,
    Moderate,
    High,
    Critical,
}

impl OutdatedSeverity {
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Moderate => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl std::fmt::Display for OutdatedSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Risk bucket derived from the age of the last upstream commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalenessRisk {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for StalenessRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "fresh"),
            Self::Medium => write!(f, "medium risk"),
            Self::High => write!(f, "high risk"),
        }
    }
}

/// Age of a commit in whole units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitAge {
    pub days: i64,
    pub weeks: i64,
    pub months: i64,
    pub years: i64,
}

impl CommitAge {
    /// Age of `then` as seen from `now`. Future timestamps count as zero.
    pub fn between(then: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let days = now.signed_duration_since(then).num_days().max(0);
        let days_f = days as f64;
        Self {
            days,
            weeks: days / 7,
            months: (days_f / DAYS_PER_MONTH).floor() as i64,
            years: (days_f / DAYS_PER_YEAR).floor() as i64,
        }
    }

    /// Largest whole unit, e.g. "3 months ago"
    pub fn label(&self) -> String {
        let (count, unit) = if self.years > 0 {
            (self.years, "year")
        } else if self.months > 0 {
            (self.months, "month")
        } else if self.weeks > 0 {
            (self.weeks, "week")
        } else if self.days > 0 {
            (self.days, "day")
        } else {
            return "today".to_string();
        };

        if count == 1 {
            format!("1 {} ago", unit)
        } else {
            format!("{} {}s ago", count, unit)
        }
    }
}

/// Split a version into its first three dot-separated integer components.
/// Non-numeric components (and pre-release suffixes) coerce to zero.
fn version_components(version: &str) -> [u64; 3] {
    let mut parts = [0u64; 3];
    for (slot, part) in parts.iter_mut().zip(version.trim().split('.')) {
        *slot = part.parse().unwrap_or(0);
    }
    parts
}

/// Compare `current` to `latest` component-wise.
///
/// A newer major is critical. Otherwise the minor gap decides on its own,
/// whatever the majors are: above two is high and any smaller positive gap
/// is moderate. Everything else, including unknown or equal versions, is low.
pub fn outdated_severity(current: &str, latest: &str) -> OutdatedSeverity {
    let [cur_major, cur_minor, _] = version_components(current);
    let [lat_major, lat_minor, _] = version_components(latest);

    if lat_major > cur_major {
        OutdatedSeverity::Critical
    } else if lat_minor > cur_minor.saturating_add(2) {
        OutdatedSeverity::High
    } else if lat_minor > cur_minor {
        OutdatedSeverity::Moderate
    } else {
        OutdatedSeverity::Low
    }
}

/// Bucket the age of `last_commit` against the configured month thresholds
pub fn staleness(
    last_commit: DateTime<Utc>,
    now: DateTime<Utc>,
    thresholds: &StalenessThresholds,
) -> StalenessRisk {
    let days = now.signed_duration_since(last_commit).num_days().max(0) as f64;
    let months = days / DAYS_PER_MONTH;

    if months > thresholds.high_months {
        StalenessRisk::High
    } else if months > thresholds.medium_months {
        StalenessRisk::Medium
    } else {
        StalenessRisk::Low
    }
}

/// Total display order: archived-and-resolved first, then most outdated,
/// then oldest last commit with unknown dates at the end
pub fn display_order(a: &PackageRecord, b: &PackageRecord) -> Ordering {
    b.is_archived()
        .cmp(&a.is_archived())
        .then_with(|| b.outdated_severity().rank().cmp(&a.outdated_severity().rank()))
        .then_with(|| match (a.enrichment.last_commit, b.enrichment.last_commit) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Stable sort by [`display_order`]
pub fn sort_for_display(packages: &mut [PackageRecord]) {
    packages.sort_by(display_order);
}
