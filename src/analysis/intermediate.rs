//! The per-contributor accumulator built by extraction and persisted by the partial
//! cache.
//!
//! Every counter is keyed by calendar day, relational counters additionally by the
//! counterpart's login. Absent keys mean zero. All maps are ordered so the JSON form is
//! deterministic. There is exactly one merge, [`IntermediateUserResult::merge_from`],
//! and it is commutative and associative on every field.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Change, ReviewComment, ReviewsSummary};
use crate::utils::interval::day_of;

pub type ByDay<T> = BTreeMap<NaiveDate, T>;
pub type ByUser<T> = BTreeMap<String, T>;

/// Additive combination of two values of the same shape.
pub trait Accumulate {
    fn accumulate(&mut self, other: Self);
}

impl Accumulate for u64 {
    fn accumulate(&mut self, other: Self) {
        *self += other;
    }
}

impl Accumulate for ReviewsSummary {
    fn accumulate(&mut self, other: Self) {
        self.approvals += other.approvals;
        self.rejections += other.rejections;
    }
}

impl<K: Ord, V: Accumulate> Accumulate for BTreeMap<K, V> {
    fn accumulate(&mut self, other: Self) {
        for (key, value) in other {
            match self.entry(key) {
                Entry::Vacant(entry) => {
                    entry.insert(value);
                }
                Entry::Occupied(mut entry) => entry.get_mut().accumulate(value),
            }
        }
    }
}

impl<T: Ord> Accumulate for BTreeSet<T> {
    fn accumulate(&mut self, other: Self) {
        self.extend(other);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoredCounters {
    pub approvals: u64,
    pub rejections: u64,
    pub comments_written_total: u64,
    pub comments_written_to_others: u64,
    pub commits: u64,
}

impl Accumulate for AuthoredCounters {
    fn accumulate(&mut self, other: Self) {
        self.approvals += other.approvals;
        self.rejections += other.rejections;
        self.comments_written_total += other.comments_written_total;
        self.comments_written_to_others += other.comments_written_to_others;
        self.commits += other.commits;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedCounters {
    pub approvals: u64,
    pub rejections: u64,
    pub comments_total: u64,
    pub comments_by_others: u64,
    pub review_requests: u64,
}

impl Accumulate for ReceivedCounters {
    fn accumulate(&mut self, other: Self) {
        self.approvals += other.approvals;
        self.rejections += other.rejections;
        self.comments_total += other.comments_total;
        self.comments_by_others += other.comments_by_others;
        self.review_requests += other.review_requests;
    }
}

/// Totals of one user in one repository on one day. Changes created are not counted
/// here; they are derived from the authored change list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCounters {
    pub authored: AuthoredCounters,
    pub received: ReceivedCounters,
}

impl Accumulate for RepoCounters {
    fn accumulate(&mut self, other: Self) {
        self.authored.accumulate(other.authored);
        self.received.accumulate(other.received);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntermediateUserResult {
    /// Remote user id.
    pub id: String,
    pub login: String,
    pub url: String,
    /// Names seen on commits, counted per day.
    #[serde(default)]
    pub possible_real_name_counts: ByDay<ByUser<u64>>,
    #[serde(default)]
    pub email_addresses: BTreeSet<String>,
    #[serde(default)]
    pub repo_totals_by_day: ByDay<BTreeMap<String, RepoCounters>>,
    /// Review requests this user made, by requested reviewer.
    #[serde(default)]
    pub review_requests_authored_by_day_and_user: ByDay<ByUser<u64>>,
    /// Review requests this user received, by pull owner.
    #[serde(default)]
    pub review_requests_received_by_day_and_user: ByDay<ByUser<u64>>,
    /// Comments written, by recipient.
    #[serde(default)]
    pub comments_written_by_day_and_user: ByDay<ByUser<u64>>,
    /// Comments received, by author.
    #[serde(default)]
    pub comments_received_by_day_and_user: ByDay<ByUser<u64>>,
    /// Reviews written, by owner of the reviewed change.
    #[serde(default)]
    pub authored_reviews_by_day_and_user: ByDay<ByUser<ReviewsSummary>>,
    /// Reviews received, by reviewer.
    #[serde(default)]
    pub reviews_received_by_day_and_user: ByDay<ByUser<ReviewsSummary>>,
    #[serde(default)]
    pub comments_authored_by_day: ByDay<u64>,
    #[serde(default)]
    pub comments_received_by_day: ByDay<u64>,
    #[serde(default)]
    pub changes_authored_by_day: ByDay<u64>,
    #[serde(default)]
    pub commits_authored_by_day: ByDay<u64>,
    #[serde(default)]
    pub reviews_authored_by_day: ByDay<ReviewsSummary>,
    #[serde(default)]
    pub reviews_received_by_day: ByDay<ReviewsSummary>,
    /// Sorted ascending.
    #[serde(default)]
    pub comments_authored: Vec<ReviewComment>,
    /// Sorted ascending.
    #[serde(default)]
    pub changes_authored: Vec<Change>,
}

impl IntermediateUserResult {
    pub fn new(id: impl Into<String>, login: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            login: login.into(),
            url: url.into(),
            possible_real_name_counts: BTreeMap::new(),
            email_addresses: BTreeSet::new(),
            repo_totals_by_day: BTreeMap::new(),
            review_requests_authored_by_day_and_user: BTreeMap::new(),
            review_requests_received_by_day_and_user: BTreeMap::new(),
            comments_written_by_day_and_user: BTreeMap::new(),
            comments_received_by_day_and_user: BTreeMap::new(),
            authored_reviews_by_day_and_user: BTreeMap::new(),
            reviews_received_by_day_and_user: BTreeMap::new(),
            comments_authored_by_day: BTreeMap::new(),
            comments_received_by_day: BTreeMap::new(),
            changes_authored_by_day: BTreeMap::new(),
            commits_authored_by_day: BTreeMap::new(),
            reviews_authored_by_day: BTreeMap::new(),
            reviews_received_by_day: BTreeMap::new(),
            comments_authored: Vec::new(),
            changes_authored: Vec::new(),
        }
    }

    /// An accumulator with the same identity and no data.
    pub fn empty_like(&self) -> Self {
        Self::new(self.id.clone(), self.login.clone(), self.url.clone())
    }

    /// Totals of `repo_name` on `day`, created on first use.
    pub fn repo_totals_mut(&mut self, day: NaiveDate, repo_name: &str) -> &mut RepoCounters {
        self.repo_totals_by_day
            .entry(day)
            .or_default()
            .entry(repo_name.to_string())
            .or_default()
    }

    /// Adds `other` into `self`. Both must describe the same remote user.
    pub fn merge_from(&mut self, other: Self) -> Result<()> {
        if self.id != other.id {
            return Err(Error::IdentityMismatch {
                field: "ids",
                left: self.id.clone(),
                right: other.id,
            });
        }
        if self.url != other.url {
            return Err(Error::IdentityMismatch {
                field: "urls",
                left: self.url.clone(),
                right: other.url,
            });
        }

        self.possible_real_name_counts
            .accumulate(other.possible_real_name_counts);
        self.email_addresses.accumulate(other.email_addresses);
        self.repo_totals_by_day.accumulate(other.repo_totals_by_day);
        self.review_requests_authored_by_day_and_user
            .accumulate(other.review_requests_authored_by_day_and_user);
        self.review_requests_received_by_day_and_user
            .accumulate(other.review_requests_received_by_day_and_user);
        self.comments_written_by_day_and_user
            .accumulate(other.comments_written_by_day_and_user);
        self.comments_received_by_day_and_user
            .accumulate(other.comments_received_by_day_and_user);
        self.authored_reviews_by_day_and_user
            .accumulate(other.authored_reviews_by_day_and_user);
        self.reviews_received_by_day_and_user
            .accumulate(other.reviews_received_by_day_and_user);
        self.comments_authored_by_day
            .accumulate(other.comments_authored_by_day);
        self.comments_received_by_day
            .accumulate(other.comments_received_by_day);
        self.changes_authored_by_day
            .accumulate(other.changes_authored_by_day);
        self.commits_authored_by_day
            .accumulate(other.commits_authored_by_day);
        self.reviews_authored_by_day
            .accumulate(other.reviews_authored_by_day);
        self.reviews_received_by_day
            .accumulate(other.reviews_received_by_day);

        self.comments_authored.extend(other.comments_authored);
        self.changes_authored.extend(other.changes_authored);
        self.sort_lists();
        Ok(())
    }

    pub fn sort_lists(&mut self) {
        self.comments_authored.sort();
        self.changes_authored.sort();
    }

    /// Every day that carries data in any field.
    pub fn days(&self) -> BTreeSet<NaiveDate> {
        let mut days = BTreeSet::new();
        days.extend(self.possible_real_name_counts.keys());
        days.extend(self.repo_totals_by_day.keys());
        days.extend(self.review_requests_authored_by_day_and_user.keys());
        days.extend(self.review_requests_received_by_day_and_user.keys());
        days.extend(self.comments_written_by_day_and_user.keys());
        days.extend(self.comments_received_by_day_and_user.keys());
        days.extend(self.authored_reviews_by_day_and_user.keys());
        days.extend(self.reviews_received_by_day_and_user.keys());
        days.extend(self.comments_authored_by_day.keys());
        days.extend(self.comments_received_by_day.keys());
        days.extend(self.changes_authored_by_day.keys());
        days.extend(self.commits_authored_by_day.keys());
        days.extend(self.reviews_authored_by_day.keys());
        days.extend(self.reviews_received_by_day.keys());
        days.extend(self.comments_authored.iter().map(|c| day_of(&c.created_at)));
        days.extend(self.changes_authored.iter().map(|c| day_of(&c.created_at)));
        days
    }

    pub fn has_activity(&self) -> bool {
        !self.days().is_empty()
    }

    /// Splits into one accumulator per day. Merging the parts gives back `self`.
    /// E-mail addresses are undated and go to every part.
    pub fn split_by_day(self) -> BTreeMap<NaiveDate, IntermediateUserResult> {
        let template = self.empty_like();
        let mut parts: BTreeMap<NaiveDate, IntermediateUserResult> = self
            .days()
            .into_iter()
            .map(|day| {
                let mut part = template.clone();
                part.email_addresses = self.email_addresses.clone();
                (day, part)
            })
            .collect();

        macro_rules! distribute {
            ($($field:ident),* $(,)?) => {
                $(
                    for (day, value) in self.$field {
                        if let Some(part) = parts.get_mut(&day) {
                            part.$field.insert(day, value);
                        }
                    }
                )*
            };
        }
        distribute!(
            possible_real_name_counts,
            repo_totals_by_day,
            review_requests_authored_by_day_and_user,
            review_requests_received_by_day_and_user,
            comments_written_by_day_and_user,
            comments_received_by_day_and_user,
            authored_reviews_by_day_and_user,
            reviews_received_by_day_and_user,
            comments_authored_by_day,
            comments_received_by_day,
            changes_authored_by_day,
            commits_authored_by_day,
            reviews_authored_by_day,
            reviews_received_by_day,
        );

        for comment in self.comments_authored {
            if let Some(part) = parts.get_mut(&day_of(&comment.created_at)) {
                part.comments_authored.push(comment);
            }
        }
        for change in self.changes_authored {
            if let Some(part) = parts.get_mut(&day_of(&change.created_at)) {
                part.changes_authored.push(change);
            }
        }
        parts
    }
}

/// Merges two optional accumulators; `None` is the identity.
pub fn merge_user_results(
    left: Option<IntermediateUserResult>,
    right: Option<IntermediateUserResult>,
) -> Result<Option<IntermediateUserResult>> {
    match (left, right) {
        (None, None) => Ok(None),
        (Some(only), None) | (None, Some(only)) => Ok(Some(only)),
        (Some(mut left), Some(right)) => {
            left.merge_from(right)?;
            Ok(Some(left))
        }
    }
}

/// Merges `result` into the entry of its user in `results`.
pub fn merge_into(
    results: &mut BTreeMap<String, IntermediateUserResult>,
    result: IntermediateUserResult,
) -> Result<()> {
    match results.entry(result.id.clone()) {
        Entry::Vacant(entry) => {
            entry.insert(result);
            Ok(())
        }
        Entry::Occupied(mut entry) => entry.get_mut().merge_from(result),
    }
}
