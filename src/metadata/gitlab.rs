//! Fetch metadata from GitLab repositories

use super::{parse_datetime, HostMetadata};
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::repository::RepositoryRef;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct GitLabProject {
    default_branch: Option<String>,
    star_count: Option<u64>,
    #[serde(default)]
    archived: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GitLabCommit {
    committed_date: Option<String>,
}

/// Fetch star count and last commit for a GitLab project.
///
/// Two sequential calls: the project (to learn its default branch), then
/// the newest commit on that branch.
pub async fn fetch_gitlab_metadata(
    client: &Client,
    config: &NetworkConfig,
    repo: &RepositoryRef,
) -> Result<HostMetadata> {
    debug!("Fetching GitLab metadata for {}", repo.project_path);

    // URL-encode the project path
    let project_url = format!(
        "{}/projects/{}",
        config.gitlab_api_url.trim_end_matches('/'),
        urlencoding::encode(&repo.project_path)
    );

    let response = gitlab_get(client, config, &project_url).send().await?;
    if !response.status().is_success() {
        warn!("GitLab returned HTTP {} for {}", response.status(), repo.project_path);
        return Ok(HostMetadata::default());
    }
    let project: GitLabProject = response.json().await?;

    let mut metadata = HostMetadata {
        last_commit: None,
        stars: project.star_count,
        archived: project.archived,
    };

    let Some(branch) = project.default_branch else {
        return Ok(metadata);
    };

    let commits_url = format!("{}/repository/commits", project_url);
    let response = gitlab_get(client, config, &commits_url)
        .query(&[("ref_name", branch.as_str()), ("per_page", "1")])
        .send()
        .await?;
    if !response.status().is_success() {
        warn!(
            "GitLab returned HTTP {} listing commits of {}",
            response.status(),
            repo.project_path
        );
        return Ok(metadata);
    }

    let commits: Vec<GitLabCommit> = response.json().await?;
    metadata.last_commit = commits
        .first()
        .and_then(|c| c.committed_date.as_deref())
        .and_then(parse_datetime);

    Ok(metadata)
}

fn gitlab_get(client: &Client, config: &NetworkConfig, url: &str) -> reqwest::RequestBuilder {
    let request = client.get(url);
    match &config.gitlab_token {
        Some(token) => request.header("PRIVATE-TOKEN", token.as_str()),
        None => request,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::parse_repository;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_project_then_commits() {
        let mut server = mockito::Server::new_async().await;
        let project = server
            .mock("GET", Matcher::Regex(r"^/gitlab/projects/gitlab-org(%2F|%2f|/)gitlab$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"default_branch": "master", "star_count": 4200, "archived": false}"#)
            .create_async()
            .await;
        let commits = server
            .mock(
                "GET",
                Matcher::Regex(r"^/gitlab/projects/gitlab-org(%2F|%2f|/)gitlab/repository/commits".to_string()),
            )
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ref_name".into(), "master".into()),
                Matcher::UrlEncoded("per_page".into(), "1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id": "abc", "committed_date": "2024-06-01T09:30:00.000+02:00"}]"#)
            .create_async()
            .await;

        let repo = parse_repository("https://gitlab.com/gitlab-org/gitlab").unwrap();
        let config = NetworkConfig::with_base_url(&server.url());
        let meta = fetch_gitlab_metadata(&Client::new(), &config, &repo).await.unwrap();

        project.assert_async().await;
        commits.assert_async().await;
        assert_eq!(meta.stars, Some(4200));
        assert_eq!(meta.archived, Some(false));
        assert!(meta.last_commit.is_some());
    }

    #[tokio::test]
    async fn test_missing_project_is_unknown() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/gitlab/projects/".to_string()))
            .with_status(404)
            .create_async()
            .await;

        let repo = parse_repository("https://gitlab.com/nobody/nothing").unwrap();
        let config = NetworkConfig::with_base_url(&server.url());
        let meta = fetch_gitlab_metadata(&Client::new(), &config, &repo).await.unwrap();
        assert_eq!(meta, HostMetadata::default());
    }
}
