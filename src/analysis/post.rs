//! Turns merged accumulators into displayable results.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::analysis::intermediate::{
    Accumulate, ByDay, ByUser, IntermediateUserResult, RepoCounters,
};
use crate::types::{
    AnalyzeResult, AuthoredTotals, Change, ReceivedTotals, RepoConfig, ReviewRequest,
    ReviewsSummary, UserActivitySummary, UserRepoTotals, UserResult,
};
use crate::utils::aggregation::{aggregate_authored_totals, aggregate_received_totals, ratio};
use crate::utils::interval::{union_all, DateInterval};

pub fn create_analyze_result(
    included_repos: Vec<RepoConfig>,
    merged: BTreeMap<String, IntermediateUserResult>,
) -> AnalyzeResult {
    let user_results: BTreeMap<String, UserResult> = merged
        .into_iter()
        .map(|(id, result)| (id, post_process(result)))
        .collect();
    let interval = union_all(user_results.values().map(|result| &result.interval));

    AnalyzeResult {
        included_repos,
        interval,
        user_results,
    }
}

pub fn post_process(merged: IntermediateUserResult) -> UserResult {
    let time_series = time_series(&merged);
    let repo_totals = repo_totals(&merged);
    let aggregated_authored_totals = aggregate_authored_totals(&repo_totals);
    let aggregated_received_totals = aggregate_received_totals(&repo_totals);

    let real_name = best_real_name(
        &merged.possible_real_name_counts,
        &[merged.id.as_str(), merged.login.as_str()],
    );
    let interval =
        DateInterval::from_days(time_series.iter().map(|summary| summary.date)).unwrap_or_default();

    let mut comments_authored = merged.comments_authored.clone();
    comments_authored.sort_by(|a, b| b.cmp(a));
    let mut changes_authored = merged.changes_authored.clone();
    changes_authored.sort_by(|a, b| b.cmp(a));

    UserResult {
        display_name: real_name.clone().unwrap_or_else(|| merged.login.clone()),
        real_name,
        email_addresses: merged.email_addresses.iter().cloned().collect(),
        repo_totals,
        review_requests_authored_by_user_id: review_requests(
            &merged.review_requests_authored_by_day_and_user,
        ),
        review_requests_received_by_user_id: review_requests(
            &merged.review_requests_received_by_day_and_user,
        ),
        comments_written_by_user_id: flatten_days(&merged.comments_written_by_day_and_user),
        comments_received_by_user_id: flatten_days(&merged.comments_received_by_day_and_user),
        authored_reviews_by_user_id: flatten_days(&merged.authored_reviews_by_day_and_user),
        reviews_received_by_user_id: flatten_days(&merged.reviews_received_by_day_and_user),
        comments_authored_per_change_by_user_id: comments_per_change_by_recipient(&merged),
        active_days_count: time_series.len(),
        time_series,
        interval,
        comments_per_change: ratio(
            aggregated_received_totals.comments_total as f64,
            aggregated_authored_totals.changes_created,
        ),
        comments_per_request: ratio(
            aggregated_authored_totals.comments_written_to_others as f64,
            aggregated_received_totals.review_requests,
        ),
        aggregated_authored_totals,
        aggregated_received_totals,
        comments_authored,
        changes_authored,
        id: merged.id,
        login: merged.login,
        url: merged.url,
    }
}

/// Sums a day-and-user keyed map over all days.
fn flatten_days<V: Accumulate + Clone>(by_day: &ByDay<ByUser<V>>) -> ByUser<V> {
    let mut flattened = ByUser::new();
    for by_user in by_day.values() {
        flattened.accumulate(by_user.clone());
    }
    flattened
}

fn review_requests(by_day: &ByDay<ByUser<u64>>) -> BTreeMap<String, ReviewRequest> {
    flatten_days(by_day)
        .into_iter()
        .map(|(user_id, times_added)| {
            let request = ReviewRequest {
                user_id: user_id.clone(),
                times_added,
            };
            (user_id, request)
        })
        .collect()
}

/// The most frequent name, ignoring `excluded` handles. Ties go to the name observed
/// on the earliest day, then to the lexicographically smallest.
pub fn best_real_name(counts: &ByDay<ByUser<u64>>, excluded: &[&str]) -> Option<String> {
    let mut totals: BTreeMap<&str, (u64, NaiveDate)> = BTreeMap::new();
    for (day, names) in counts {
        for (name, count) in names {
            if excluded.contains(&name.as_str()) || name.trim().is_empty() {
                continue;
            }
            let entry = totals.entry(name.as_str()).or_insert((0, *day));
            entry.0 += count;
        }
    }

    totals
        .into_iter()
        .max_by(|(name_a, (count_a, day_a)), (name_b, (count_b, day_b))| {
            count_a
                .cmp(count_b)
                .then_with(|| Reverse(day_a).cmp(&Reverse(day_b)))
                .then_with(|| Reverse(name_a).cmp(&Reverse(name_b)))
        })
        .map(|(name, _)| name.to_string())
}

/// One summary per active day, ascending.
fn time_series(merged: &IntermediateUserResult) -> Vec<UserActivitySummary> {
    let mut dates = BTreeSet::new();
    dates.extend(merged.comments_authored_by_day.keys());
    dates.extend(merged.comments_received_by_day.keys());
    dates.extend(merged.changes_authored_by_day.keys());
    dates.extend(merged.commits_authored_by_day.keys());
    dates.extend(merged.reviews_authored_by_day.keys());
    dates.extend(merged.reviews_received_by_day.keys());

    let count = |map: &ByDay<u64>, date: &NaiveDate| map.get(date).copied().unwrap_or(0);
    let summary = |map: &ByDay<ReviewsSummary>, date: &NaiveDate| {
        map.get(date).copied().unwrap_or_default()
    };

    dates
        .into_iter()
        .map(|date| UserActivitySummary {
            date,
            comments_authored: count(&merged.comments_authored_by_day, &date),
            comments_received: count(&merged.comments_received_by_day, &date),
            changes_authored: count(&merged.changes_authored_by_day, &date),
            commits_authored: count(&merged.commits_authored_by_day, &date),
            reviews_authored: summary(&merged.reviews_authored_by_day, &date),
            reviews_received: summary(&merged.reviews_received_by_day, &date),
        })
        .collect()
}

/// Per-repository totals, sorted by repository name. Changes created and the mean
/// open time come from the authored change list.
fn repo_totals(merged: &IntermediateUserResult) -> Vec<UserRepoTotals> {
    let mut counters: BTreeMap<&str, RepoCounters> = BTreeMap::new();
    for by_repo in merged.repo_totals_by_day.values() {
        for (repo_name, day_counters) in by_repo {
            counters
                .entry(repo_name.as_str())
                .or_default()
                .accumulate(*day_counters);
        }
    }
    for change in &merged.changes_authored {
        counters.entry(change.repo_name.as_str()).or_default();
    }

    counters
        .into_iter()
        .map(|(repo_name, counters)| {
            let changes: Vec<&Change> = merged
                .changes_authored
                .iter()
                .filter(|change| change.repo_name == repo_name)
                .collect();
            let open_time: f64 = changes.iter().map(|c| c.time_open_msec as f64).sum();
            let changes_created = changes.len() as u64;

            UserRepoTotals {
                repo_name: repo_name.to_string(),
                authored_totals: AuthoredTotals {
                    approvals: counters.authored.approvals,
                    rejections: counters.authored.rejections,
                    comments_written_total: counters.authored.comments_written_total,
                    comments_written_to_others: counters.authored.comments_written_to_others,
                    changes_created,
                    mean_change_open_time_msec: ratio(open_time, changes_created),
                    commits: counters.authored.commits,
                },
                received_totals: ReceivedTotals {
                    approvals: counters.received.approvals,
                    rejections: counters.received.rejections,
                    comments_total: counters.received.comments_total,
                    comments_by_others: counters.received.comments_by_others,
                    review_requests: counters.received.review_requests,
                },
            }
        })
        .collect()
}

/// For every recipient: comments written to them divided by the distinct changes
/// those comments were on.
fn comments_per_change_by_recipient(merged: &IntermediateUserResult) -> BTreeMap<String, f64> {
    let mut by_recipient: BTreeMap<&str, (u64, BTreeSet<&str>)> = BTreeMap::new();
    for comment in &merged.comments_authored {
        let Some(recipient) = comment.recipient_user_id.as_deref() else {
            continue;
        };
        let entry = by_recipient.entry(recipient).or_default();
        entry.0 += 1;
        entry.1.insert(comment.review_url.as_str());
    }

    by_recipient
        .into_iter()
        .filter_map(|(recipient, (comments, changes))| {
            ratio(comments as f64, changes.len() as u64).map(|mean| (recipient.to_string(), mean))
        })
        .collect()
}
