//! Remote entities as stored in the raw record store.
//!
//! Only the fields the extraction reads are kept. Everything else the API returns
//! (repository counters, permissions, avatars) is dropped during deserialization, so
//! volatile remote fields never change a record's content hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub id: u64,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: u64,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub user: Option<User>,
    pub html_url: String,
    pub url: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub requested_reviewers: Vec<User>,
    #[serde(default)]
    pub requested_teams: Vec<Team>,
}

/// A review comment on a pull request diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub user: Option<User>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub html_url: String,
    pub pull_request_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    Commented,
    ChangesRequested,
    Dismissed,
    Pending,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    pub user: Option<User>,
    #[serde(default)]
    pub body: Option<String>,
    pub state: ReviewState,
    /// Absent for pending reviews.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    pub html_url: String,
    pub pull_request_url: String,
}

impl Review {
    pub fn approvals(&self) -> u64 {
        u64::from(self.state == ReviewState::Approved)
    }

    pub fn rejections(&self) -> u64 {
        u64::from(self.state == ReviewState::ChangesRequested)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitActor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetails {
    pub author: Option<GitActor>,
    pub committer: Option<GitActor>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub commit: Option<CommitDetails>,
    /// The verified hosting account; missing when the e-mail is not linked to one.
    pub author: Option<User>,
    pub committer: Option<User>,
}

const NOREPLY_SUFFIX: &str = "users.noreply.github.com";

impl Commit {
    pub fn author_date(&self) -> Option<DateTime<Utc>> {
        self.git_author().and_then(|author| author.date)
    }

    /// Author e-mail, unless it is a hosting-service placeholder address.
    pub fn author_email(&self) -> Option<&str> {
        self.git_author()
            .and_then(|author| author.email.as_deref())
            .filter(|email| !email.is_empty() && !email.ends_with(NOREPLY_SUFFIX))
    }

    /// Author name, only when author and committer agree on it.
    pub fn consistent_author_name(&self) -> Option<&str> {
        let details = self.commit.as_ref()?;
        let author = details.author.as_ref()?.name.as_deref()?;
        let committer = details.committer.as_ref()?.name.as_deref()?;
        (!author.is_empty() && author == committer).then_some(author)
    }

    fn git_author(&self) -> Option<&GitActor> {
        self.commit.as_ref().and_then(|details| details.author.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimit,
}

/// Body of `GET /rate_limit`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

/// Trailing number of an API url such as `https://api.github.com/repos/o/r/pulls/850`.
pub fn pull_number_from_url(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_drops_volatile_fields() {
        let json = r#"{
            "id": 1, "number": 850, "title": "Fix it",
            "user": {"login": "ann", "id": 7, "html_url": "https://github.com/ann", "avatar_url": "x"},
            "html_url": "https://github.com/acme/web/pull/850",
            "url": "https://api.github.com/repos/acme/web/pulls/850",
            "state": "closed",
            "created_at": "2021-03-01T10:00:00Z",
            "updated_at": "2021-03-02T10:00:00Z",
            "closed_at": "2021-03-02T10:00:00Z",
            "merged_at": null,
            "base": {"repo": {"stargazers_count": 12}}
        }"#;
        let pull: PullRequest = serde_json::from_str(json).unwrap();
        assert_eq!(pull.number, 850);
        assert!(pull.requested_reviewers.is_empty());
        let stored = serde_json::to_string(&pull).unwrap();
        assert!(!stored.contains("stargazers_count"));
        assert!(!stored.contains("avatar_url"));
    }

    #[test]
    fn test_review_state() {
        let review: Review = serde_json::from_str(
            r#"{"id": 3, "user": null, "state": "CHANGES_REQUESTED",
                "html_url": "h", "pull_request_url": "https://api.github.com/repos/a/b/pulls/2"}"#,
        )
        .unwrap();
        assert_eq!(review.rejections(), 1);
        assert_eq!(review.approvals(), 0);
        assert_eq!(review.submitted_at, None);

        let unknown: ReviewState = serde_json::from_str(r#""SOMETHING_NEW""#).unwrap();
        assert_eq!(unknown, ReviewState::Other);
    }

    #[test]
    fn test_commit_identity_fields() {
        let commit: Commit = serde_json::from_str(
            r#"{"sha": "abc",
                "commit": {
                    "author": {"name": "Ann Lee", "email": "7+ann@users.noreply.github.com", "date": "2021-03-01T10:00:00Z"},
                    "committer": {"name": "Ann Lee", "email": "ann@example.com"},
                    "message": "m"
                },
                "author": null, "committer": null}"#,
        )
        .unwrap();
        assert_eq!(commit.author_email(), None);
        assert_eq!(commit.consistent_author_name(), Some("Ann Lee"));
        assert!(commit.author_date().is_some());
    }

    #[test]
    fn test_pull_number_from_url() {
        assert_eq!(
            pull_number_from_url("https://api.github.com/repos/acme/web/pulls/850"),
            Some(850)
        );
        assert_eq!(pull_number_from_url("https://api.github.com/repos/acme/web"), None);
    }
}
