//! Pull request checks run from CI.

pub mod github;
pub mod pr_validator;

pub use github::GitHubClient;
pub use pr_validator::{validate_pull_request, Outcome};

use anyhow::Result;
use async_trait::async_trait;

/// `owner/name` of a GitHub repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::str::FromStr for RepoRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name))
            }
            _ => Err(format!("Expected owner/name, got: {}", s)),
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Issue lookups and PR labelling
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Whether `number` is an existing issue (not a pull request) in `repo`
    async fn issue_exists(&self, repo: &RepoRef, number: u64) -> Result<bool>;

    async fn add_label(&self, repo: &RepoRef, pr: u64, label: &str) -> Result<()>;

    async fn remove_label(&self, repo: &RepoRef, pr: u64, label: &str) -> Result<()>;
}
