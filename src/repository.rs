//! Repository URL normalization and source-host classification

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Source host a repository lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryHost {
    GitHub,
    GitLab,
    Bitbucket,
    Other,
}

impl RepositoryHost {
    fn from_hostname(hostname: &str) -> Self {
        match hostname.trim_start_matches("www.") {
            "github.com" => Self::GitHub,
            "gitlab.com" => Self::GitLab,
            "bitbucket.org" => Self::Bitbucket,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for RepositoryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GitHub => write!(f, "GitHub"),
            Self::GitLab => write!(f, "GitLab"),
            Self::Bitbucket => write!(f, "Bitbucket"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A repository located on a known host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub host: RepositoryHost,
    pub owner: String,
    pub repo: String,
    /// Full project path; differs from `owner/repo` only for GitLab subgroups
    pub project_path: String,
}

/// Normalize a `git`-type repository URL from registry metadata into a
/// browsable https URL.
///
/// Handles the forms npm packages use in practice:
/// - `git+https://github.com/owner/repo.git`
/// - `git://github.com/owner/repo.git`
/// - `git@github.com:owner/repo.git`
/// - `git+ssh://git@github.com/owner/repo.git`
///
/// Returns `None` when the result is not a well-formed http(s) URL.
pub fn normalize_repository_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    let url = url.strip_prefix("git+").unwrap_or(url);

    let mut url = if let Some(rest) = url.strip_prefix("git://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ssh://") {
        let rest = rest.split_once('@').map_or(rest, |(_, host_path)| host_path);
        format!("https://{}", rest)
    } else if let Some(web) = ssh_shorthand_to_web(url) {
        web
    } else {
        url.to_string()
    };

    while url.ends_with('/') {
        url.pop();
    }
    if let Some(stripped) = url.strip_suffix(".git") {
        url = stripped.to_string();
    }

    let parsed = Url::parse(&url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(url)
}

/// `git@host:owner/repo` to `https://host/owner/repo`
fn ssh_shorthand_to_web(url: &str) -> Option<String> {
    if url.contains("://") {
        return None;
    }
    let (user_host, path) = url.split_once(':')?;
    let (_, host) = user_host.split_once('@')?;
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some(format!("https://{}/{}", host, path.trim_start_matches('/')))
}

/// Classify a normalized repository URL by host and extract its path parts
pub fn parse_repository(url: &str) -> Option<RepositoryRef> {
    let parsed = Url::parse(url).ok()?;
    let host = RepositoryHost::from_hostname(parsed.host_str()?);

    let segments: Vec<&str> = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .collect();

    // GitLab puts UI routes after a "-" segment: /group/project/-/tree/main
    let project: Vec<&str> = match host {
        RepositoryHost::GitLab => segments.iter().copied().take_while(|s| *s != "-").collect(),
        _ => segments.iter().copied().take(2).collect(),
    };

    if project.len() < 2 {
        return None;
    }

    let owner = project[0].to_string();
    let repo = project[project.len() - 1].trim_end_matches(".git").to_string();
    if repo.is_empty() {
        return None;
    }

    let mut project_path = project[..project.len() - 1].join("/");
    project_path.push('/');
    project_path.push_str(&repo);

    Some(RepositoryRef {
        host,
        owner,
        repo,
        project_path,
    })
}
