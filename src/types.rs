//! # Common Types
//!
//! Repository configuration and the externally visible analysis types. Field names
//! serialize in camelCase, which is the format persisted in caches and returned to
//! callers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::interval::DateInterval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorType {
    Git,
    Github,
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorType::Git => write!(f, "GIT"),
            ConnectorType::Github => write!(f, "GITHUB"),
        }
    }
}

/// How the source data of a repository is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RepoConnector {
    #[serde(rename = "GIT", rename_all = "camelCase")]
    Git { git_url: String },
    #[serde(rename = "GITHUB")]
    Github { token: String },
}

impl RepoConnector {
    pub fn connector_type(&self) -> ConnectorType {
        match self {
            RepoConnector::Git { .. } => ConnectorType::Git,
            RepoConnector::Github { .. } => ConnectorType::Github,
        }
    }
}

/// The persisted configuration of one repository; its file content hash is the
/// revision key of the partial cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub url: String,
    pub connector: RepoConnector,
}

/// An analysis request as received from a caller. Missing fields take defaults during
/// normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_interval: Option<DateInterval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_repo_names: Option<Vec<String>>,
}

/// A request with every default resolved. Its JSON form is the result cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedAnalyzeRequest {
    pub date_interval: DateInterval,
    pub included_repo_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewsSummary {
    pub approvals: u64,
    pub rejections: u64,
}

impl ReviewsSummary {
    pub fn new(approvals: u64, rejections: u64) -> Self {
        Self {
            approvals,
            rejections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub user_id: String,
    pub times_added: u64,
}

/// A review comment or a review body written by a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewComment {
    pub created_at: DateTime<Utc>,
    pub review_comment_url: String,
    pub author_id: String,
    pub comment: String,
    pub review_url: String,
    pub recipient_user_id: Option<String>,
    pub review_title: String,
}

/// A change (pull request) authored by a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub created_at: DateTime<Utc>,
    pub review_url: String,
    pub repo_name: String,
    pub title: String,
    pub time_open_msec: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoredTotals {
    /// Approvals handed out.
    pub approvals: u64,
    /// Rejections (changes requested) handed out.
    pub rejections: u64,
    /// Comments written, including on one's own changes.
    pub comments_written_total: u64,
    /// Comments written on changes of other users.
    pub comments_written_to_others: u64,
    pub changes_created: u64,
    /// Mean time from creation to merge/close; absent without changes.
    pub mean_change_open_time_msec: Option<f64>,
    pub commits: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedTotals {
    pub approvals: u64,
    pub rejections: u64,
    /// Comments on the user's changes, including their own.
    pub comments_total: u64,
    pub comments_by_others: u64,
    pub review_requests: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRepoTotals {
    pub repo_name: String,
    pub authored_totals: AuthoredTotals,
    pub received_totals: ReceivedTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivitySummary {
    pub date: NaiveDate,
    pub comments_authored: u64,
    pub comments_received: u64,
    pub changes_authored: u64,
    pub commits_authored: u64,
    pub reviews_authored: ReviewsSummary,
    pub reviews_received: ReviewsSummary,
}

/// The final, displayable statistics of one contributor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResult {
    /// Remote user id.
    pub id: String,
    /// Handle on the hosting service.
    pub login: String,
    pub display_name: String,
    pub real_name: Option<String>,
    pub email_addresses: Vec<String>,
    pub url: String,
    pub repo_totals: Vec<UserRepoTotals>,
    pub review_requests_authored_by_user_id: BTreeMap<String, ReviewRequest>,
    pub review_requests_received_by_user_id: BTreeMap<String, ReviewRequest>,
    pub comments_written_by_user_id: BTreeMap<String, u64>,
    pub comments_received_by_user_id: BTreeMap<String, u64>,
    pub authored_reviews_by_user_id: BTreeMap<String, ReviewsSummary>,
    pub reviews_received_by_user_id: BTreeMap<String, ReviewsSummary>,
    /// Mean comments per change written to each recipient.
    pub comments_authored_per_change_by_user_id: BTreeMap<String, f64>,
    pub time_series: Vec<UserActivitySummary>,
    pub interval: DateInterval,
    pub active_days_count: usize,
    /// Newest first.
    pub comments_authored: Vec<ReviewComment>,
    /// Newest first.
    pub changes_authored: Vec<Change>,
    pub aggregated_authored_totals: AuthoredTotals,
    pub aggregated_received_totals: ReceivedTotals,
    /// Received comments per authored change; absent when no change was authored.
    pub comments_per_change: Option<f64>,
    /// Comments written to others per received review request; absent without requests.
    pub comments_per_request: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    pub included_repos: Vec<RepoConfig>,
    pub interval: Option<DateInterval>,
    pub user_results: BTreeMap<String, UserResult>,
}

/// An analysis result together with how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeResponse {
    pub result: AnalyzeResult,
    /// Served from the result cache without recomputation.
    pub cached: bool,
    /// Repositories whose partial cache was rebuilt for this response.
    pub rebuilt_repos: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_config_wire_format() {
        let json = r#"{"name":"acme-web","url":"https://github.com/acme/web","connector":{"type":"GITHUB","token":"t0k"}}"#;
        let config: RepoConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.connector,
            RepoConnector::Github {
                token: "t0k".to_string()
            }
        );
        assert_eq!(serde_json::to_string(&config).unwrap(), json);

        let git: RepoConnector =
            serde_json::from_str(r#"{"type":"GIT","gitUrl":"git@example.com:a/b.git"}"#).unwrap();
        assert_eq!(git.connector_type(), ConnectorType::Git);
    }

    #[test]
    fn test_request_defaults() {
        let request: AnalyzeRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, AnalyzeRequest::default());
    }
}
