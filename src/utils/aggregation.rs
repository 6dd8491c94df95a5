use crate::types::{AuthoredTotals, ReceivedTotals, UserRepoTotals};

/// Sum authored totals over repositories. The mean open time is weighted by the
/// number of changes in each repository.
pub fn aggregate_authored_totals(repo_totals: &[UserRepoTotals]) -> AuthoredTotals {
    let mut aggregated = AuthoredTotals::default();
    let mut weighted_open_time = 0.0;

    for totals in repo_totals.iter().map(|t| &t.authored_totals) {
        aggregated.approvals += totals.approvals;
        aggregated.rejections += totals.rejections;
        aggregated.comments_written_total += totals.comments_written_total;
        aggregated.comments_written_to_others += totals.comments_written_to_others;
        aggregated.changes_created += totals.changes_created;
        aggregated.commits += totals.commits;
        if let Some(mean) = totals.mean_change_open_time_msec {
            weighted_open_time += mean * totals.changes_created as f64;
        }
    }

    aggregated.mean_change_open_time_msec = ratio(weighted_open_time, aggregated.changes_created);
    aggregated
}

pub fn aggregate_received_totals(repo_totals: &[UserRepoTotals]) -> ReceivedTotals {
    repo_totals
        .iter()
        .map(|t| &t.received_totals)
        .fold(ReceivedTotals::default(), |acc, item| ReceivedTotals {
            approvals: acc.approvals + item.approvals,
            rejections: acc.rejections + item.rejections,
            comments_total: acc.comments_total + item.comments_total,
            comments_by_others: acc.comments_by_others + item.comments_by_others,
            review_requests: acc.review_requests + item.review_requests,
        })
}

/// `numerator / denominator`, or `None` when the denominator is zero.
pub fn ratio(numerator: f64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator / denominator as f64)
}
