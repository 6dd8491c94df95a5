//! Builds per-user accumulators from the raw records of one repository.
//!
//! Pulls, comments, reviews and commits are reduced independently. Each record
//! increments the acting user's authored counters and, where the change owner is
//! known, the owner's received counters, both on the record's own day.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::analysis::intermediate::{Accumulate, IntermediateUserResult};
use crate::error::Result;
use crate::github::types::{pull_number_from_url, Comment, Commit, PullRequest, Review, User};
use crate::store::{RawStore, RecordKind};
use crate::types::{Change, ReviewComment, ReviewsSummary};
use crate::utils::interval::{day_of, DateInterval};

/// One accumulator per user id for every user active in records that overlap `filter`.
pub fn extract_repo(
    store: &RawStore,
    repo_name: &str,
    filter: &DateInterval,
) -> Result<BTreeMap<String, IntermediateUserResult>> {
    let mut extraction = Extraction {
        repo_name,
        filter,
        pulls: load_pulls(store)?,
        users: BTreeMap::new(),
    };

    let team_members = load_team_members(store)?;
    extraction.process_pulls(&team_members);
    for record in store.records::<Comment>(RecordKind::Comments) {
        let (comment, _) = record?;
        extraction.process_comment(&comment);
    }
    for record in store.records::<Review>(RecordKind::Reviews) {
        let (review, _) = record?;
        extraction.process_review(&review);
    }
    for record in store.records::<Commit>(RecordKind::Commits) {
        let (commit, path) = record?;
        extraction.process_commit(&commit, &path);
    }

    let mut users = extraction.users;
    users.retain(|_, user| user.has_activity());
    for user in users.values_mut() {
        user.sort_lists();
    }
    debug!(repo = repo_name, users = users.len(), "extracted user results");
    Ok(users)
}

fn load_pulls(store: &RawStore) -> Result<BTreeMap<u64, PullRequest>> {
    store
        .records::<PullRequest>(RecordKind::Pulls)
        .map(|record| record.map(|(pull, _)| (pull.number, pull)))
        .collect()
}

fn load_team_members(store: &RawStore) -> Result<BTreeMap<String, Vec<User>>> {
    let mut members: BTreeMap<String, Vec<User>> = BTreeMap::new();
    for record in store.records::<User>(RecordKind::TeamMembers) {
        let (user, path) = record?;
        if let Some(slug) = parent_name(&path) {
            members.entry(slug).or_default().push(user);
        }
    }
    Ok(members)
}

fn parent_name(path: &Path) -> Option<String> {
    Some(path.parent()?.file_name()?.to_string_lossy().into_owned())
}

/// Span of a pull request: until merge, else until close, else until the last update.
pub fn pull_interval(pull: &PullRequest) -> DateInterval {
    DateInterval::between(&pull.created_at, &pull_end(pull))
}

fn pull_end(pull: &PullRequest) -> DateTime<Utc> {
    pull.merged_at.or(pull.closed_at).unwrap_or(pull.updated_at)
}

fn to_change(repo_name: &str, pull: &PullRequest) -> Change {
    Change {
        created_at: pull.created_at,
        review_url: pull.html_url.clone(),
        repo_name: repo_name.to_string(),
        title: pull.title.clone(),
        time_open_msec: (pull_end(pull) - pull.created_at).num_milliseconds(),
    }
}

fn non_empty(body: &Option<String>) -> Option<&str> {
    body.as_deref().filter(|body| !body.trim().is_empty())
}

/// Explicitly requested reviewers followed by members of requested teams, each login once.
fn requested_reviewers<'p>(
    pull: &'p PullRequest,
    team_members: &'p BTreeMap<String, Vec<User>>,
) -> Vec<&'p User> {
    let mut seen = BTreeSet::new();
    let from_teams = pull
        .requested_teams
        .iter()
        .filter_map(|team| team_members.get(&team.slug))
        .flatten();
    pull.requested_reviewers
        .iter()
        .chain(from_teams)
        .filter(|user| seen.insert(user.login.as_str()))
        .collect()
}

struct Extraction<'a> {
    repo_name: &'a str,
    filter: &'a DateInterval,
    pulls: BTreeMap<u64, PullRequest>,
    users: BTreeMap<String, IntermediateUserResult>,
}

impl<'a> Extraction<'a> {
    fn user(&mut self, user: &User) -> &mut IntermediateUserResult {
        self.users
            .entry(user.id.to_string())
            .or_insert_with(|| {
                IntermediateUserResult::new(user.id.to_string(), &user.login, &user.html_url)
            })
    }

    fn process_pulls(&mut self, team_members: &BTreeMap<String, Vec<User>>) {
        let pulls = std::mem::take(&mut self.pulls);
        for pull in pulls.values() {
            let Some(owner) = &pull.user else {
                continue;
            };
            if !self.filter.intersects(&pull_interval(pull)) {
                continue;
            }
            let day = day_of(&pull.created_at);
            let repo_name = self.repo_name;

            let author = self.user(owner);
            author.changes_authored.push(to_change(repo_name, pull));
            *author.changes_authored_by_day.entry(day).or_default() += 1;

            for reviewer in requested_reviewers(pull, team_members) {
                let requested = self.user(reviewer);
                requested.repo_totals_mut(day, repo_name).received.review_requests += 1;
                *requested
                    .review_requests_received_by_day_and_user
                    .entry(day)
                    .or_default()
                    .entry(owner.login.clone())
                    .or_default() += 1;

                *self
                    .user(owner)
                    .review_requests_authored_by_day_and_user
                    .entry(day)
                    .or_default()
                    .entry(reviewer.login.clone())
                    .or_default() += 1;
            }
        }
        self.pulls = pulls;
    }

    fn process_comment(&mut self, comment: &Comment) {
        let Some(author) = &comment.user else {
            return;
        };
        let Some(body) = non_empty(&comment.body) else {
            return;
        };
        if !self
            .filter
            .intersects(&DateInterval::between(&comment.created_at, &comment.updated_at))
        {
            return;
        }

        let pull = pull_number_from_url(&comment.pull_request_url)
            .and_then(|number| self.pulls.get(&number));
        let owner = pull.and_then(|pull| pull.user.clone());
        let review_comment = ReviewComment {
            created_at: comment.created_at,
            review_comment_url: comment.html_url.clone(),
            author_id: author.id.to_string(),
            comment: body.to_string(),
            review_url: pull.map_or_else(|| comment.pull_request_url.clone(), |p| p.html_url.clone()),
            recipient_user_id: owner.as_ref().map(|owner| owner.login.clone()),
            review_title: pull.map(|p| p.title.clone()).unwrap_or_default(),
        };
        let to_others = u64::from(owner.as_ref().map_or(false, |owner| owner.id != author.id));
        let day = day_of(&comment.created_at);
        let repo_name = self.repo_name;

        let writer = self.user(author);
        let totals = &mut writer.repo_totals_mut(day, repo_name).authored;
        totals.comments_written_total += 1;
        totals.comments_written_to_others += to_others;
        writer.comments_authored.push(review_comment);
        *writer.comments_authored_by_day.entry(day).or_default() += 1;

        if let Some(owner) = owner {
            *writer
                .comments_written_by_day_and_user
                .entry(day)
                .or_default()
                .entry(owner.login.clone())
                .or_default() += 1;

            let recipient = self.user(&owner);
            let totals = &mut recipient.repo_totals_mut(day, repo_name).received;
            totals.comments_total += 1;
            totals.comments_by_others += to_others;
            *recipient
                .comments_received_by_day_and_user
                .entry(day)
                .or_default()
                .entry(author.login.clone())
                .or_default() += 1;
            *recipient.comments_received_by_day.entry(day).or_default() += 1;
        }
    }

    fn process_review(&mut self, review: &Review) {
        let (Some(author), Some(submitted_at)) = (&review.user, review.submitted_at) else {
            return;
        };
        let day = day_of(&submitted_at);
        if !self.filter.contains(day) {
            return;
        }
        let Some(pull) = pull_number_from_url(&review.pull_request_url)
            .and_then(|number| self.pulls.get(&number))
        else {
            return;
        };

        let owner = pull.user.clone();
        let review_comment = non_empty(&review.body).map(|body| ReviewComment {
            created_at: submitted_at,
            review_comment_url: review.html_url.clone(),
            author_id: author.id.to_string(),
            comment: body.to_string(),
            review_url: pull.html_url.clone(),
            recipient_user_id: owner.as_ref().map(|owner| owner.login.clone()),
            review_title: pull.title.clone(),
        });
        let summary = ReviewsSummary::new(review.approvals(), review.rejections());
        let comments = u64::from(review_comment.is_some());
        let to_others =
            comments * u64::from(owner.as_ref().map_or(false, |owner| owner.id != author.id));
        let repo_name = self.repo_name;

        let reviewer = self.user(author);
        let totals = &mut reviewer.repo_totals_mut(day, repo_name).authored;
        totals.approvals += summary.approvals;
        totals.rejections += summary.rejections;
        totals.comments_written_total += comments;
        totals.comments_written_to_others += to_others;
        reviewer
            .reviews_authored_by_day
            .entry(day)
            .or_default()
            .accumulate(summary);
        if let Some(review_comment) = review_comment {
            reviewer.comments_authored.push(review_comment);
            *reviewer.comments_authored_by_day.entry(day).or_default() += 1;
        }

        let Some(owner) = owner else {
            return;
        };
        reviewer
            .authored_reviews_by_day_and_user
            .entry(day)
            .or_default()
            .entry(owner.login.clone())
            .or_default()
            .accumulate(summary);
        if comments > 0 {
            *reviewer
                .comments_written_by_day_and_user
                .entry(day)
                .or_default()
                .entry(owner.login.clone())
                .or_default() += 1;
        }

        let recipient = self.user(&owner);
        let totals = &mut recipient.repo_totals_mut(day, repo_name).received;
        totals.approvals += summary.approvals;
        totals.rejections += summary.rejections;
        totals.comments_total += comments;
        totals.comments_by_others += to_others;
        recipient
            .reviews_received_by_day_and_user
            .entry(day)
            .or_default()
            .entry(author.login.clone())
            .or_default()
            .accumulate(summary);
        recipient
            .reviews_received_by_day
            .entry(day)
            .or_default()
            .accumulate(summary);
        if comments > 0 {
            *recipient
                .comments_received_by_day_and_user
                .entry(day)
                .or_default()
                .entry(author.login.clone())
                .or_default() += 1;
            *recipient.comments_received_by_day.entry(day).or_default() += 1;
        }
    }

    /// Commits count on their author date and are filtered by the creation day of
    /// their pull. Without a linked account the pull owner is credited.
    fn process_commit(&mut self, commit: &Commit, path: &Path) {
        let Some(pull) = parent_name(path)
            .and_then(|name| name.parse::<u64>().ok())
            .and_then(|number| self.pulls.get(&number))
        else {
            return;
        };
        let pull_day = day_of(&pull.created_at);
        if !self.filter.contains(pull_day) {
            return;
        }
        let Some(author) = commit.author.clone().or_else(|| pull.user.clone()) else {
            return;
        };

        let day = commit.author_date().map_or(pull_day, |date| day_of(&date));
        let email = commit.author_email().map(str::to_string);
        let name = commit.consistent_author_name().map(str::to_string);
        let repo_name = self.repo_name;

        let user = self.user(&author);
        user.repo_totals_mut(day, repo_name).authored.commits += 1;
        *user.commits_authored_by_day.entry(day).or_default() += 1;
        if let Some(email) = email {
            user.email_addresses.insert(email);
        }
        if let Some(name) = name {
            *user
                .possible_real_name_counts
                .entry(day)
                .or_default()
                .entry(name)
                .or_default() += 1;
        }
    }
}
