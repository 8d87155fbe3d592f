//! Fetch package metadata from the npm registry

use crate::config::NetworkConfig;
use crate::decode::{license_field, object_field, string_field, u64_field};
use crate::error::{InsightError, Result};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;

/// License recorded when the registry declares none
pub const UNKNOWN_LICENSE: &str = "unknown";

/// Registry facts about one package version
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryMetadata {
    /// The `latest` dist-tag
    pub latest_version: Option<String>,
    pub license: String,
    pub homepage: Option<String>,
    /// Raw `git` repository URL, not yet normalized
    pub repository_url: Option<String>,
    /// Unpacked size, or tarball size when that is all the registry has
    pub size: Option<u64>,
}

/// Fetch full registry metadata for `name` and select the payload for
/// `version`, falling back to the `latest` dist-tag.
pub async fn fetch_registry_metadata(
    client: &Client,
    config: &NetworkConfig,
    name: &str,
    version: Option<&str>,
) -> Result<RegistryMetadata> {
    debug!("Fetching registry metadata for {}@{}", name, version.unwrap_or("latest"));

    let url = format!(
        "{}/{}",
        config.registry_url.trim_end_matches('/'),
        encode_package_name(name)
    );

    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        if response.status().as_u16() == 404 {
            return Err(InsightError::PackageNotFound(name.to_string()));
        }
        return Err(InsightError::api(
            "npm registry",
            format!("HTTP {}: {}", response.status(), name),
        ));
    }

    let document: Value = response.json().await?;
    Ok(metadata_from_document(&document, version))
}

/// Scoped names keep their `@` but escape the slash: `@scope%2fname`
pub fn encode_package_name(name: &str) -> String {
    name.replace('/', "%2f")
}

fn metadata_from_document(document: &Value, version: Option<&str>) -> RegistryMetadata {
    let empty = Map::new();
    let root = document.as_object().unwrap_or(&empty);

    let latest_version = object_field(root, "dist-tags").and_then(|tags| string_field(tags, "latest"));

    let payload = object_field(root, "versions")
        .and_then(|versions| {
            version
                .and_then(|v| object_field(versions, v))
                .or_else(|| latest_version.as_deref().and_then(|l| object_field(versions, l)))
        })
        .unwrap_or(&empty);

    let size = object_field(payload, "dist")
        .and_then(|dist| u64_field(dist, "unpackedSize").or_else(|| u64_field(dist, "size")))
        .or_else(|| u64_field(payload, "size"));

    RegistryMetadata {
        latest_version,
        license: license_field(payload).unwrap_or_else(|| UNKNOWN_LICENSE.to_string()),
        homepage: string_field(payload, "homepage"),
        repository_url: git_repository_url(payload),
        size,
    }
}

/// URL of a repository declared with `type: "git"`
fn git_repository_url(payload: &Map<String, Value>) -> Option<String> {
    let repository = object_field(payload, "repository")?;
    match string_field(repository, "type").as_deref() {
        Some("git") => string_field(repository, "url"),
        _ => None,
    }
}
