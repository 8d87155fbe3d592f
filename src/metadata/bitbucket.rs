//! Fetch last-commit dates from Bitbucket repositories

use super::{parse_datetime, HostMetadata};
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::repository::RepositoryRef;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct BitbucketRepo {
    mainbranch: Option<BitbucketBranch>,
}

#[derive(Debug, Deserialize)]
struct BitbucketBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BitbucketCommits {
    #[serde(default)]
    values: Vec<BitbucketCommit>,
}

#[derive(Debug, Deserialize)]
struct BitbucketCommit {
    date: Option<String>,
}

/// Fetch the newest commit date on a Bitbucket repository's main branch.
/// Bitbucket exposes no star count.
pub async fn fetch_bitbucket_metadata(
    client: &Client,
    config: &NetworkConfig,
    repo: &RepositoryRef,
) -> Result<HostMetadata> {
    debug!("Fetching Bitbucket metadata for {}/{}", repo.owner, repo.repo);

    let repo_url = format!(
        "{}/repositories/{}/{}",
        config.bitbucket_api_url.trim_end_matches('/'),
        repo.owner,
        repo.repo
    );

    let response = client.get(&repo_url).send().await?;
    if !response.status().is_success() {
        warn!("Bitbucket returned HTTP {} for {}", response.status(), repo_url);
        return Ok(HostMetadata::default());
    }
    let repo_data: BitbucketRepo = response.json().await?;

    let Some(branch) = repo_data.mainbranch else {
        return Ok(HostMetadata::default());
    };

    let commits_url = format!("{}/commits/{}", repo_url, urlencoding::encode(&branch.name));
    let response = client
        .get(&commits_url)
        .query(&[("pagelen", "1")])
        .send()
        .await?;
    if !response.status().is_success() {
        warn!("Bitbucket returned HTTP {} for {}", response.status(), commits_url);
        return Ok(HostMetadata::default());
    }

    let commits: BitbucketCommits = response.json().await?;
    Ok(HostMetadata {
        last_commit: commits
            .values
            .first()
            .and_then(|c| c.date.as_deref())
            .and_then(parse_datetime),
        stars: None,
        archived: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::parse_repository;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_mainbranch_then_commits() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/bitbucket/repositories/atlassian/stash")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"mainbranch": {"name": "develop", "type": "branch"}}"#)
            .create_async()
            .await;
        let commits = server
            .mock("GET", "/bitbucket/repositories/atlassian/stash/commits/develop")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"values": [{"hash": "f00", "date": "2023-11-20T14:03:11+00:00"}]}"#)
            .create_async()
            .await;

        let repo = parse_repository("https://bitbucket.org/atlassian/stash").unwrap();
        let config = NetworkConfig::with_base_url(&server.url());
        let meta = fetch_bitbucket_metadata(&Client::new(), &config, &repo).await.unwrap();

        commits.assert_async().await;
        assert_eq!(
            meta.last_commit.map(|d| d.to_rfc3339()),
            Some("2023-11-20T14:03:11+00:00".to_string())
        );
        assert_eq!(meta.stars, None);
    }

    #[tokio::test]
    async fn test_empty_commit_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/bitbucket/repositories/a/b")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"mainbranch": {"name": "main"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/bitbucket/repositories/a/b/commits/main")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"values": []}"#)
            .create_async()
            .await;

        let repo = parse_repository("https://bitbucket.org/a/b").unwrap();
        let config = NetworkConfig::with_base_url(&server.url());
        let meta = fetch_bitbucket_metadata(&Client::new(), &config, &repo).await.unwrap();
        assert_eq!(meta, HostMetadata::default());
    }
}
