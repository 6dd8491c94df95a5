//! # GitHub connector
//!
//! Downloading raw records from the GitHub REST API and extracting per-user
//! statistics from them.

pub mod client;
pub mod download;
pub mod extract;
pub mod metadata;
pub mod types;

pub use client::{GithubClient, Page, PageLinks, RateLimiter, RetryPolicy};
pub use download::{connect, DownloadReport, Downloader};
pub use extract::extract_repo;
pub use metadata::{DownloadStatus, SourceDataMetadata, SourceDataSummary, StatusTracker};

use crate::error::{Error, Result};

const GITHUB_URL_PREFIX: &str = "https://github.com/";

/// Owner and name of a repository hosted on github.com.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    /// Parses `https://github.com/<owner>/<repo>[/...]`.
    pub fn from_url(url: &str) -> Result<Self> {
        let path = url
            .trim()
            .strip_prefix(GITHUB_URL_PREFIX)
            .ok_or_else(|| Error::InvalidRepoUrl(url.to_string()))?;
        let mut parts = path.split('/').filter(|part| !part.is_empty());
        let owner = parts.next();
        let repo = parts.next().map(|repo| repo.trim_end_matches(".git"));
        match (owner, repo) {
            (Some(owner), Some(repo)) if !repo.is_empty() => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(Error::InvalidRepoUrl(url.to_string())),
        }
    }

    pub fn repo_api_url(&self, api_base: &str) -> String {
        format!("{api_base}/repos/{}/{}", self.owner, self.repo)
    }

    pub fn org_api_url(&self, api_base: &str) -> String {
        format!("{api_base}/orgs/{}", self.owner)
    }

    /// Lowercase `<owner>-<repo>` with every other character collapsed to `-`.
    pub fn slug(&self) -> String {
        let raw = format!("{}-{}", self.owner, self.repo).to_lowercase();
        let mut slug = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c);
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        slug.trim_matches('-').to_string()
    }
}
