//! License analysis and risk categorization

use crate::config::LicensePolicy;
use crate::metadata::registry::UNKNOWN_LICENSE;
use serde::{Deserialize, Serialize};

/// License risk category, ordered from least to most restrictive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseRisk {
    /// MIT, Apache, BSD and friends
    Permissive,
    /// GPL family, MPL, EPL and other share-alike licenses
    Copyleft,
    /// Missing or unrecognized
    Unknown,
    /// Proprietary or explicitly unlicensed
    Proprietary,
}

impl std::fmt::Display for LicenseRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permissive => write!(f, "permissive"),
            Self::Copyleft => write!(f, "copyleft"),
            Self::Unknown => write!(f, "unknown"),
            Self::Proprietary => write!(f, "proprietary"),
        }
    }
}

/// Analyze license and determine risk level
pub fn analyze_license(
    license: Option<&str>,
    policy: &LicensePolicy,
) -> (LicenseRisk, Vec<String>) {
    let mut warnings = Vec::new();

    let Some(license_str) = license
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case(UNKNOWN_LICENSE))
    else {
        if policy.warn_on_unknown {
            warnings.push("No license information found".to_string());
        }
        return (LicenseRisk::Unknown, warnings);
    };

    // Check forbidden licenses
    if policy
        .forbidden_licenses
        .iter()
        .any(|forbidden| license_matches(license_str, forbidden))
    {
        warnings.push(format!("Uses forbidden license: {}", license_str));
        return (LicenseRisk::Proprietary, warnings);
    }

    // Check allowed licenses (if allowlist is configured)
    if !policy.allowed_licenses.is_empty()
        && !policy
            .allowed_licenses
            .iter()
            .any(|allowed| license_matches(license_str, allowed))
    {
        warnings.push(format!("License {} not in allowed list", license_str));
    }

    let risk = categorize_license(license_str);

    match risk {
        LicenseRisk::Copyleft if policy.warn_on_copyleft => {
            warnings.push(format!("Copyleft license detected: {}", license_str));
        }
        LicenseRisk::Unknown if policy.warn_on_unknown => {
            warnings.push(format!("Unknown license: {}", license_str));
        }
        LicenseRisk::Proprietary => {
            warnings.push(format!("Proprietary license detected: {}", license_str));
        }
        _ => {}
    }

    (risk, warnings)
}

/// Categorize a license string or SPDX expression.
///
/// A choice (`OR`) takes its least restrictive alternative, a conjunction
/// (`AND`) its most restrictive term.
pub fn categorize_license(license: &str) -> LicenseRisk {
    let lower = license.to_lowercase();
    if lower.starts_with("see license in") {
        return LicenseRisk::Unknown;
    }

    let terms: Vec<LicenseRisk> = license
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|t| !t.is_empty())
        .filter(|t| !matches!(t.to_ascii_uppercase().as_str(), "OR" | "AND" | "WITH"))
        .map(categorize_term)
        .collect();

    let pick = if lower.contains(" or ") {
        terms.iter().copied().min()
    } else {
        terms.iter().copied().max()
    };
    pick.unwrap_or(LicenseRisk::Unknown)
}

/// Categorize a single license identifier, SPDX list first
fn categorize_term(term: &str) -> LicenseRisk {
    let term = term.trim_end_matches('+');
    let lower = term.to_lowercase();

    // npm's marker for "not licensed for use"
    if lower == "unlicensed" || is_proprietary(&lower) {
        return LicenseRisk::Proprietary;
    }

    let id = spdx::license_id(term);
    if id.is_some_and(|id| id.is_copyleft()) || is_copyleft(&lower) {
        return LicenseRisk::Copyleft;
    }
    if id.is_some_and(|id| id.is_osi_approved() || id.is_fsf_free_libre()) || is_permissive(&lower) {
        return LicenseRisk::Permissive;
    }

    LicenseRisk::Unknown
}

/// Check if license is permissive
fn is_permissive(license: &str) -> bool {
    let permissive = [
        "mit",
        "apache",
        "bsd",
        "isc",
        "0bsd",
        "unlicense",
        "cc0",
        "wtfpl",
        "zlib",
        "boost",
        "python",
        "blueoak",
    ];

    permissive.iter().any(|&p| license.contains(p))
}

/// Check if license is copyleft
fn is_copyleft(license: &str) -> bool {
    let copyleft = [
        "gpl",
        "lgpl",
        "agpl",
        "mpl",
        "eupl",
        "osl",
        "ms-pl",
        "cddl",
        "epl",
        "cc-by-sa",
    ];

    copyleft.iter().any(|&c| license.contains(c))
}

/// Check if license is proprietary/restrictive
fn is_proprietary(license: &str) -> bool {
    let proprietary = [
        "proprietary",
        "commercial",
        "private",
        "all rights reserved",
    ];

    proprietary.iter().any(|&p| license.contains(p))
}

/// Check if a license expression mentions `pattern` in any of its terms
fn license_matches(license: &str, pattern: &str) -> bool {
    let pattern = pattern.to_lowercase();
    license
        .to_lowercase()
        .split(" or ")
        .flat_map(|part| part.split(" and "))
        .any(|part| part.trim_matches(|c: char| c.is_whitespace() || c == '(' || c == ')').contains(&pattern))
}
