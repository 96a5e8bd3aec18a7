//! Checks that a pull request links an existing issue and labels it.
//!
//! Recognised references, with keywords fix/fixes/fixed, resolve/resolves/resolved
//! and close/closes/closed (any case, optional colon):
//!
//! - `Fixes #123` (issue in the PR's own repository)
//! - `Resolves https://github.com/owner/repo/issues/123`
//! - `Fixes owner/repo#123`

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use super::{IssueTracker, RepoRef};

pub const READY_LABEL: &str = "PR:Ready-to-Review";
pub const FAILED_LABEL: &str = "PR:Issue-verification-failed";

lazy_static! {
    static ref SKIP_TITLE_REGEX: Regex = Regex::new(r"(?i)^\s*(chore|docs?|ci|release)\b").unwrap();

    static ref ISSUE_URL_REGEX: Regex = Regex::new(
        r"(?i)\b(?:fix(?:e[sd])?|resolve[sd]?|close[sd]?):?\s+https://github\.com/([\w.-]+)/([\w.-]+)/issues/(\d+)"
    ).unwrap();

    static ref CROSS_REPO_REGEX: Regex = Regex::new(
        r"(?i)\b(?:fix(?:e[sd])?|resolve[sd]?|close[sd]?):?\s+([\w.-]+)/([\w.-]+)#(\d+)"
    ).unwrap();

    static ref SAME_REPO_REGEX: Regex = Regex::new(
        r"(?i)\b(?:fix(?:e[sd])?|resolve[sd]?|close[sd]?):?\s+#(\d+)"
    ).unwrap();
}

/// An issue referenced from a PR body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub repo: RepoRef,
    pub number: u64,
}

impl std::fmt::Display for IssueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The title marks a PR that needs no issue
    Skipped,
    Linked(IssueRef),
    NoReference,
    /// References were found but none resolved to an issue
    NotFound(Vec<IssueRef>),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Linked(_))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

pub fn should_skip(title: &str) -> bool {
    SKIP_TITLE_REGEX.is_match(title)
}

/// Issue references in body order, without duplicates
pub fn extract_issue_refs(body: &str, pr_repo: &RepoRef) -> Vec<IssueRef> {
    let mut found: Vec<(usize, IssueRef)> = Vec::new();

    for caps in ISSUE_URL_REGEX.captures_iter(body) {
        if let (Some(m), Ok(number)) = (caps.get(0), caps[3].parse::<u64>()) {
            found.push((m.start(), IssueRef { repo: RepoRef::new(&caps[1], &caps[2]), number }));
        }
    }
    for caps in CROSS_REPO_REGEX.captures_iter(body) {
        if let (Some(m), Ok(number)) = (caps.get(0), caps[3].parse::<u64>()) {
            found.push((m.start(), IssueRef { repo: RepoRef::new(&caps[1], &caps[2]), number }));
        }
    }
    for caps in SAME_REPO_REGEX.captures_iter(body) {
        if let (Some(m), Ok(number)) = (caps.get(0), caps[1].parse::<u64>()) {
            found.push((m.start(), IssueRef { repo: pr_repo.clone(), number }));
        }
    }

    found.sort_by_key(|(start, _)| *start);
    let mut refs: Vec<IssueRef> = Vec::with_capacity(found.len());
    for (_, issue) in found {
        if !refs.contains(&issue) {
            refs.push(issue);
        }
    }
    refs
}

/// Validate a PR and set its labels.
///
/// On success the ready label is added and the failure label removed; on
/// failure the reverse. Skipped PRs are left untouched.
pub async fn validate_pull_request(
    tracker: &dyn IssueTracker,
    repo: &RepoRef,
    pr: u64,
    title: &str,
    body: &str,
) -> Result<Outcome> {
    if should_skip(title) {
        info!(pr, title, "Title prefix needs no linked issue");
        return Ok(Outcome::Skipped);
    }

    let refs = extract_issue_refs(body, repo);
    let mut outcome = if refs.is_empty() {
        Outcome::NoReference
    } else {
        Outcome::NotFound(refs.clone())
    };
    for issue in refs {
        if tracker.issue_exists(&issue.repo, issue.number).await? {
            outcome = Outcome::Linked(issue);
            break;
        }
        warn!(issue = %issue, "Referenced issue does not exist");
    }

    if outcome.is_success() {
        info!(pr, outcome = ?outcome, "Issue verification passed");
        tracker.add_label(repo, pr, READY_LABEL).await?;
        tracker.remove_label(repo, pr, FAILED_LABEL).await?;
    } else {
        warn!(pr, outcome = ?outcome, "Issue verification failed");
        tracker.add_label(repo, pr, FAILED_LABEL).await?;
        tracker.remove_label(repo, pr, READY_LABEL).await?;
    }

    Ok(outcome)
}
