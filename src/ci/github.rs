//! GitHub REST client for the issue and label calls the PR validator needs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{IssueTracker, RepoRef};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

pub struct GitHubClient {
    api_url: String,
    access_token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub state: String,
    /// Present when the "issue" is a pull request
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct AddLabelsRequest<'a> {
    labels: &'a [&'a str],
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, access_token: String) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            access_token,
            client: reqwest::Client::new(),
        }
    }

    /// API url with each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .with_context(|| format!("Invalid GitHub API url: {}", self.api_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("GitHub API url cannot be a base: {}", self.api_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn issue_endpoint(&self, repo: &RepoRef, number: u64, tail: &[&str]) -> Result<Url> {
        let number = number.to_string();
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str(), "issues", number.as_str()];
        segments.extend_from_slice(tail);
        self.endpoint(&segments)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "herald-pr-issue-validator")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Fetch an issue. `None` when it does not exist.
    pub async fn get_issue(&self, repo: &RepoRef, number: u64) -> Result<Option<Issue>> {
        let url = self.issue_endpoint(repo, number, &[])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("Failed to make GitHub API request")?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            status if status.is_success() => response
                .json()
                .await
                .map(Some)
                .context("Failed to parse GitHub API response"),
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("GitHub API error: {} - {}", status, body);
            }
        }
    }

    pub async fn add_labels(&self, repo: &RepoRef, number: u64, labels: &[&str]) -> Result<()> {
        let url = self.issue_endpoint(repo, number, &["labels"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&AddLabelsRequest { labels })
            .send()
            .await
            .context("Failed to make GitHub API request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error: {} - {}", status, body);
        }
        Ok(())
    }

    /// Remove a label. A label that is not set is not an error.
    pub async fn remove_label(&self, repo: &RepoRef, number: u64, label: &str) -> Result<()> {
        let url = self.issue_endpoint(repo, number, &["labels", label])?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .context("Failed to make GitHub API request")?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("GitHub API error: {} - {}", status, body);
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn issue_exists(&self, repo: &RepoRef, number: u64) -> Result<bool> {
        Ok(self
            .get_issue(repo, number)
            .await?
            .is_some_and(|issue| issue.pull_request.is_none()))
    }

    async fn add_label(&self, repo: &RepoRef, pr: u64, label: &str) -> Result<()> {
        self.add_labels(repo, pr, &[label]).await
    }

    async fn remove_label(&self, repo: &RepoRef, pr: u64, label: &str) -> Result<()> {
        GitHubClient::remove_label(self, repo, pr, label).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_is_normalized() {
        let client = GitHubClient::new("https://github.example.com/api/v3/", "t".to_string());
        assert_eq!(client.api_url, "https://github.example.com/api/v3");
    }

    #[test]
    fn test_label_is_encoded_as_one_path_segment() {
        let client = GitHubClient::new(DEFAULT_API_URL, "t".to_string());
        let repo: RepoRef = "acme/herald".parse().unwrap();
        let url = client
            .issue_endpoint(&repo, 42, &["labels", "needs issue #1/a?b"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/herald/issues/42/labels/needs%20issue%20%231%2Fa%3Fb"
        );
    }

    #[test]
    fn test_endpoint_keeps_enterprise_prefix() {
        let client = GitHubClient::new("https://github.example.com/api/v3/", "t".to_string());
        let repo: RepoRef = "acme/herald".parse().unwrap();
        let url = client.issue_endpoint(&repo, 7, &[]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://github.example.com/api/v3/repos/acme/herald/issues/7"
        );
    }

    #[test]
    fn test_pull_request_marker_deserializes() {
        let issue: Issue = serde_json::from_str(
            r#"{"number": 7, "title": "Crash", "state": "open", "pull_request": {"url": "x"}}"#,
        )
        .unwrap();
        assert!(issue.pull_request.is_some());

        let issue: Issue =
            serde_json::from_str(r#"{"number": 8, "title": "Bug", "state": "closed"}"#).unwrap();
        assert!(issue.pull_request.is_none());
    }
}
