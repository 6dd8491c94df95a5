//! Incremental download of one repository.
//!
//! Collections are requested newest-updated first. A page is followed by the next one
//! only while the current page changed at least one stored record, or while fewer
//! records are stored than the collection holds. The collection size is queried once
//! from the `last` link of the first page.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::github::client::{GithubClient, Page};
use crate::github::metadata::{SourceDataMetadata, StatusTracker};
use crate::github::types::{pull_number_from_url, Comment, Commit, PullRequest, Review, Team, User};
use crate::github::RepoRef;
use crate::store::{RawStore, RecordKind};

/// What a download run fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadReport {
    /// Pull numbers on every fetched page.
    pub seen_pulls: BTreeSet<u64>,
    /// Pull numbers whose stored record was created or changed.
    pub changed_pulls: BTreeSet<u64>,
    pub changed_comments: usize,
    pub teams: usize,
    pub review_pulls: usize,
    pub commit_pulls: usize,
    /// Sub-resource fetches that failed; the next run retries them.
    pub failed_fetches: usize,
}

/// Builds a client whose budget is the quota the API currently reports, falling back
/// to the configured limit when that query fails.
pub async fn connect(
    settings: &Settings,
    token: &str,
    tracker: Option<Arc<StatusTracker>>,
) -> Result<GithubClient> {
    let mut client = GithubClient::new(settings, token)?;
    if let Some(tracker) = tracker {
        client = client.with_status(tracker);
    }
    match client.fetch_rate_limit().await {
        Ok(rate_limit) => {
            info!(
                limit = rate_limit.limit,
                remaining = rate_limit.remaining,
                "rate limit queried"
            );
            Ok(client.with_request_budget(rate_limit.remaining as usize))
        }
        Err(e) => {
            warn!(error = %e, fallback = settings.fallback_rate_limit, "could not query rate limit");
            Ok(client)
        }
    }
}

pub struct Downloader<'a> {
    client: &'a GithubClient,
    store: &'a RawStore,
    repo: RepoRef,
    max_concurrent: usize,
}

impl<'a> Downloader<'a> {
    pub fn new(
        client: &'a GithubClient,
        store: &'a RawStore,
        repo: RepoRef,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            store,
            repo,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Pulls first, then comments, teams, reviews and commits concurrently. Only a
    /// failure while paging pulls aborts the run.
    pub async fn run(&self) -> Result<DownloadReport> {
        let (seen_pulls, changed_pulls) = self.download_pulls().await?;

        let (changed_comments, teams, reviews, commits) = futures::join!(
            self.download_comments(),
            self.download_teams(),
            self.download_reviews(&seen_pulls),
            self.download_commits(&seen_pulls),
        );

        let changed_comments = changed_comments.unwrap_or_else(|e| {
            error!(error = %e, "failed to fetch repository comments, will retry on the next run");
            0
        });
        let (review_pulls, review_failures) = reviews?;
        let (commit_pulls, commit_failures) = commits?;

        Ok(DownloadReport {
            seen_pulls,
            changed_pulls,
            changed_comments,
            teams,
            review_pulls,
            commit_pulls,
            failed_fetches: review_failures + commit_failures,
        })
    }

    fn repo_url(&self) -> String {
        self.repo.repo_api_url(self.client.api_base())
    }

    fn org_url(&self) -> String {
        self.repo.org_api_url(self.client.api_base())
    }

    fn per_page(&self) -> usize {
        self.client.per_page()
    }

    /// Size of a paged collection: `per_page * (pages - 1) + len(last page)`. A server
    /// error while probing the last page counts it as empty; the next run corrects it.
    async fn total_entity_count<T>(&self, first: &Page<T>) -> Result<u64> {
        let Some(last_url) = first.links.last.as_deref() else {
            return Ok(first.items.len() as u64);
        };
        let page_count = first.links.last_page_number().unwrap_or(1).max(1);

        let last_len = match self.client.get_page::<serde_json::Value>(last_url).await {
            Ok(page) => page.items.len() as u64,
            Err(e) if e.is_server_error() => {
                error!(error = %e, "could not determine number of entities");
                0
            }
            Err(e) => return Err(e),
        };
        Ok(self.per_page() as u64 * (page_count - 1) + last_len)
    }

    async fn download_pulls(&self) -> Result<(BTreeSet<u64>, BTreeSet<u64>)> {
        let url = format!(
            "{}/pulls?state=all&sort=updated&direction=desc&per_page={}&page=1",
            self.repo_url(),
            self.per_page()
        );
        let mut pager = self.client.pager::<PullRequest>(url);
        let mut meta = SourceDataMetadata::load(self.store)?;
        let mut total = None;
        let mut seen = BTreeSet::new();
        let mut changed = BTreeSet::new();

        while let Some(page) = pager.next_page().await? {
            if total.is_none() && !page.items.is_empty() {
                total = Some(self.total_entity_count(&page).await?);
            }

            let mut page_changes = 0;
            for pull in &page.items {
                meta.observe_updated_at(pull.updated_at);
                seen.insert(pull.number);
                let outcome =
                    self.store
                        .write(RecordKind::Pulls, None, &pull.number.to_string(), pull)?;
                if outcome.is_changed() {
                    changed.insert(pull.number);
                    page_changes += 1;
                }
            }

            let fetched = self.store.count(RecordKind::Pulls)? as u64;
            let expected = total.unwrap_or(0);
            if page_changes == 0 && fetched >= expected {
                debug!(fetched, expected, "no need to load next page of pulls");
                break;
            }
            if pager.has_next() {
                if page_changes > 0 {
                    info!(changed = page_changes, "fetching next page of pulls: pulls changed");
                } else {
                    info!(fetched, expected, "fetching next page of pulls: has missing data");
                }
            }
        }

        if total.is_some() {
            meta.total_pulls_in_repository = total;
        }
        meta.save(self.store)?;
        info!(seen = seen.len(), changed = changed.len(), "pulls downloaded");
        Ok((seen, changed))
    }

    async fn download_comments(&self) -> Result<usize> {
        let url = format!(
            "{}/pulls/comments?sort=updated&direction=desc&per_page={}&page=1",
            self.repo_url(),
            self.per_page()
        );
        let mut pager = self.client.pager::<Comment>(url);
        let mut total = None;
        let mut changed = 0;

        while let Some(page) = pager.next_page().await? {
            if total.is_none() {
                total = Some(self.total_entity_count(&page).await?);
            }

            let mut page_changes = 0;
            for comment in &page.items {
                let Some(pull_number) = pull_number_from_url(&comment.pull_request_url) else {
                    warn!(comment = comment.id, url = %comment.pull_request_url, "comment without pull number");
                    continue;
                };
                let outcome = self.store.write(
                    RecordKind::Comments,
                    Some(&pull_number.to_string()),
                    &comment.id.to_string(),
                    comment,
                )?;
                if outcome.is_changed() {
                    page_changes += 1;
                }
            }
            changed += page_changes;

            let fetched = self.store.count(RecordKind::Comments)? as u64;
            let expected = total.unwrap_or(0);
            if page_changes == 0 && fetched >= expected {
                debug!(fetched, expected, "no need to load next page of comments");
                break;
            }
            if pager.has_next() {
                info!(changed = page_changes, fetched, expected, "fetching next page of comments");
            }
        }

        SourceDataMetadata::update(self.store, |meta| {
            if total.is_some() {
                meta.total_comment_count = total;
            }
        })?;
        Ok(changed)
    }

    /// Replaces the stored teams and members with a fresh snapshot. The stored snapshot
    /// is only touched once every team and member list was fetched. A missing
    /// organization empties it.
    async fn download_teams(&self) -> usize {
        let snapshot = match self.fetch_teams().await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => {
                debug!("no organization teams available");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "could not fetch teams, keeping the stored snapshot");
                return 0;
            }
        };
        match self.replace_teams(&snapshot) {
            Ok(()) => snapshot.len(),
            Err(e) => {
                error!(error = %e, "could not store team snapshot");
                0
            }
        }
    }

    async fn fetch_teams(&self) -> Result<Vec<(Team, Vec<User>)>> {
        let url = format!("{}/teams?per_page={}&page=1", self.org_url(), self.per_page());
        let teams: Vec<Team> = self.fetch_all(&url).await?;

        let members: Vec<Result<Vec<User>>> = stream::iter(teams.iter())
            .map(|team| self.fetch_team_members(&team.slug))
            .buffered(self.max_concurrent)
            .collect()
            .await;
        teams
            .into_iter()
            .zip(members)
            .map(|(team, members)| members.map(|members| (team, members)))
            .collect()
    }

    async fn fetch_team_members(&self, slug: &str) -> Result<Vec<User>> {
        let url = format!(
            "{}/teams/{slug}/members?per_page={}&page=1",
            self.org_url(),
            self.per_page()
        );
        self.fetch_all(&url).await
    }

    fn replace_teams(&self, snapshot: &[(Team, Vec<User>)]) -> Result<()> {
        self.store.clear(RecordKind::Teams)?;
        self.store.clear(RecordKind::TeamMembers)?;
        for (team, members) in snapshot {
            self.store.write(RecordKind::Teams, None, &team.slug, team)?;
            for member in members {
                self.store
                    .write(RecordKind::TeamMembers, Some(&team.slug), &member.login, member)?;
            }
        }
        Ok(())
    }

    async fn fetch_all<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut pager = self.client.pager::<T>(url);
        let mut items = Vec::new();
        while let Some(page) = pager.next_page().await? {
            items.extend(page.items);
        }
        Ok(items)
    }

    /// Pulls that were fetched but have no stored sub-resource of `kind` yet.
    fn missing_sub_resources(&self, kind: RecordKind) -> Result<BTreeSet<u64>> {
        let parents = self.store.parents(kind)?;
        Ok(self
            .store
            .ids(RecordKind::Pulls)?
            .into_iter()
            .filter(|id| !parents.contains(id))
            .filter_map(|id| id.parse().ok())
            .collect())
    }

    async fn download_reviews(&self, seen_pulls: &BTreeSet<u64>) -> Result<(usize, usize)> {
        let mut pulls = self.missing_sub_resources(RecordKind::Reviews)?;
        pulls.extend(seen_pulls.iter().copied());
        info!(pulls = pulls.len(), "fetching reviews");

        let failures = self
            .for_each_pull(&pulls, move |number| self.fetch_reviews(number))
            .await;
        Ok((pulls.len(), failures))
    }

    async fn fetch_reviews(&self, number: u64) -> Result<()> {
        let url = format!(
            "{}/pulls/{number}/reviews?per_page={}&page=1",
            self.repo_url(),
            self.per_page()
        );
        let parent = number.to_string();
        let mut pager = self.client.pager::<Review>(url);
        while let Some(page) = pager.next_page().await? {
            let mut page_changes = 0;
            for review in &page.items {
                let outcome = self.store.write(
                    RecordKind::Reviews,
                    Some(&parent),
                    &review.id.to_string(),
                    review,
                )?;
                if outcome.is_changed() {
                    page_changes += 1;
                }
            }
            if page_changes == 0 {
                break;
            }
        }
        Ok(())
    }

    async fn download_commits(&self, seen_pulls: &BTreeSet<u64>) -> Result<(usize, usize)> {
        let mut pulls = self.missing_sub_resources(RecordKind::Commits)?;
        pulls.extend(seen_pulls.iter().copied());
        info!(pulls = pulls.len(), "fetching commits");

        let failures = self
            .for_each_pull(&pulls, move |number| self.fetch_commits(number))
            .await;
        Ok((pulls.len(), failures))
    }

    async fn fetch_commits(&self, number: u64) -> Result<()> {
        let url = format!(
            "{}/pulls/{number}/commits?per_page={}&page=1",
            self.repo_url(),
            self.per_page()
        );
        let parent = number.to_string();
        let commits: Vec<Commit> = self.fetch_all(&url).await?;
        for commit in &commits {
            self.store
                .write(RecordKind::Commits, Some(&parent), &commit.sha, commit)?;
        }
        Ok(())
    }

    /// Runs `fetch` for every pull with bounded concurrency. Failures are logged and
    /// counted, never propagated.
    async fn for_each_pull<F, Fut>(&self, pulls: &BTreeSet<u64>, fetch: F) -> usize
    where
        F: Fn(u64) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let results: Vec<(u64, Result<()>)> = stream::iter(pulls.iter().copied())
            .map(|number| {
                let fut = fetch(number);
                async move { (number, fut.await) }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        results
            .into_iter()
            .filter(|(number, result)| match result {
                Ok(()) => false,
                Err(e) => {
                    error!(pull = number, error = %e, "sub-resource fetch failed, will retry on the next run");
                    true
                }
            })
            .count()
    }
}
