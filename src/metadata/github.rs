//! Fetch last-commit, star and archive signals for GitHub repositories.
//!
//! Lookups normally go through a same-origin relay that holds the API
//! token and performs both GitHub calls itself. Without a relay the two
//! calls are made directly: repository (default branch, stars, archived)
//! followed by the head commit of that branch.

use super::{parse_datetime, HostMetadata};
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::repository::RepositoryRef;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    owner: &'a str,
    repo: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(default, alias = "lastCommitDate", alias = "last_commit_date")]
    last_commit: Option<String>,
    #[serde(default, alias = "stargazers_count", alias = "starCount")]
    stars: Option<u64>,
    #[serde(default, alias = "isArchived")]
    archived: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    default_branch: Option<String>,
    stargazers_count: Option<u64>,
    archived: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    commit: GitHubCommitDetail,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitDetail {
    committer: Option<GitHubSignature>,
    author: Option<GitHubSignature>,
}

#[derive(Debug, Deserialize)]
struct GitHubSignature {
    date: Option<String>,
}

/// Fetch metadata for a GitHub repository
pub async fn fetch_github_metadata(
    client: &Client,
    config: &NetworkConfig,
    repo: &RepositoryRef,
) -> Result<HostMetadata> {
    debug!("Fetching GitHub metadata for {}/{}", repo.owner, repo.repo);

    match &config.github_relay_url {
        Some(relay) => fetch_via_relay(client, relay, repo).await,
        None => fetch_direct(client, config, repo).await,
    }
}

async fn fetch_via_relay(client: &Client, relay: &str, repo: &RepositoryRef) -> Result<HostMetadata> {
    let response = client
        .post(relay)
        .json(&RelayRequest {
            owner: &repo.owner,
            repo: &repo.repo,
        })
        .send()
        .await?;

    if !response.status().is_success() {
        warn!(
            "GitHub relay returned HTTP {} for {}/{}",
            response.status(),
            repo.owner,
            repo.repo
        );
        return Ok(HostMetadata::default());
    }

    let body: RelayResponse = response.json().await?;
    Ok(HostMetadata {
        last_commit: body.last_commit.as_deref().and_then(parse_datetime),
        stars: body.stars,
        archived: body.archived,
    })
}

fn github_get(client: &Client, config: &NetworkConfig, url: &str) -> reqwest::RequestBuilder {
    let request = client
        .get(url)
        .header(header::ACCEPT, "application/vnd.github.v3+json");
    match &config.github_token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

async fn fetch_direct(
    client: &Client,
    config: &NetworkConfig,
    repo: &RepositoryRef,
) -> Result<HostMetadata> {
    let repo_url = format!(
        "{}/repos/{}/{}",
        config.github_api_url.trim_end_matches('/'),
        repo.owner,
        repo.repo
    );

    let response = github_get(client, config, &repo_url).send().await?;
    if !response.status().is_success() {
        warn!("GitHub returned HTTP {} for {}", response.status(), repo_url);
        return Ok(HostMetadata::default());
    }
    let repo_data: GitHubRepo = response.json().await?;

    let mut metadata = HostMetadata {
        last_commit: None,
        stars: repo_data.stargazers_count,
        archived: repo_data.archived,
    };

    let Some(branch) = repo_data.default_branch else {
        return Ok(metadata);
    };

    let commit_url = format!("{}/commits/{}", repo_url, urlencoding::encode(&branch));
    let response = github_get(client, config, &commit_url).send().await?;
    if !response.status().is_success() {
        warn!("GitHub returned HTTP {} for {}", response.status(), commit_url);
        return Ok(metadata);
    }

    let commit: GitHubCommit = response.json().await?;
    metadata.last_commit = commit
        .commit
        .committer
        .and_then(|c| c.date)
        .or_else(|| commit.commit.author.and_then(|a| a.date))
        .as_deref()
        .and_then(parse_datetime);

    Ok(metadata)
}
