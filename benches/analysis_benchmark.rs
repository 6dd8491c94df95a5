/// Benchmarks for extraction, day partitioning and merging of review statistics.
use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use repostats::analysis::{merge_into, merge_user_results, IntermediateUserResult};
use repostats::github::extract_repo;
use repostats::github::types::{Comment, PullRequest, User};
use repostats::store::{RawStore, RecordKind};
use repostats::DateInterval;
use std::collections::BTreeMap;
use tempfile::TempDir;

const PULLS: u64 = 200;
const COMMENTS_PER_PULL: u64 = 5;
const AUTHORS: u64 = 8;

fn user(id: u64) -> User {
    let login = format!("dev{id}");
    User {
        html_url: format!("https://github.com/{login}"),
        login,
        id,
    }
}

fn at(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 1, 1, 9, 0, 0).unwrap() + Duration::hours(hours)
}

/// Set up a store with pulls spread over several months and comments from rotating reviewers
fn setup_store() -> (TempDir, RawStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = RawStore::new(temp_dir.path());

    for number in 1..=PULLS {
        let created = at(number as i64 * 11);
        let closed = created + Duration::hours(30);
        let pull = PullRequest {
            id: 10_000 + number,
            number,
            title: format!("Change {number}"),
            user: Some(user(number % AUTHORS + 1)),
            html_url: format!("https://github.com/acme/web/pull/{number}"),
            url: format!("https://api.github.com/repos/acme/web/pulls/{number}"),
            state: "closed".to_string(),
            created_at: created,
            updated_at: closed,
            closed_at: Some(closed),
            merged_at: Some(closed),
            requested_reviewers: vec![user((number + 1) % AUTHORS + 1)],
            requested_teams: Vec::new(),
        };
        store
            .write(RecordKind::Pulls, None, &number.to_string(), &pull)
            .unwrap();

        for n in 0..COMMENTS_PER_PULL {
            let id = number * 100 + n;
            let written = created + Duration::hours(n as i64 * 5);
            let comment = Comment {
                id,
                user: Some(user((number + n) % AUTHORS + 1)),
                body: Some("nit".to_string()),
                created_at: written,
                updated_at: written,
                html_url: format!("https://github.com/acme/web/pull/{number}#discussion_r{id}"),
                pull_request_url: pull.url.clone(),
            };
            store
                .write(
                    RecordKind::Comments,
                    Some(&number.to_string()),
                    &id.to_string(),
                    &comment,
                )
                .unwrap();
        }
    }
    (temp_dir, store)
}

/// Benchmark extraction of the whole store
fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");
    let (_temp_dir, store) = setup_store();

    group.bench_function("extract_all_time", |b| {
        b.iter(|| extract_repo(&store, "acme-web", &DateInterval::all_time()).unwrap());
    });

    group.finish();
}

/// Benchmark splitting into day partitions and merging them back
fn bench_merging(c: &mut Criterion) {
    let mut group = c.benchmark_group("merging");
    let (_temp_dir, store) = setup_store();
    let extracted = extract_repo(&store, "acme-web", &DateInterval::all_time()).unwrap();

    group.bench_function("split_by_day", |b| {
        b.iter(|| {
            extracted
                .values()
                .map(|user| user.clone().split_by_day().len())
                .sum::<usize>()
        });
    });

    let partitions: Vec<IntermediateUserResult> = extracted
        .values()
        .flat_map(|user| user.clone().split_by_day().into_values())
        .collect();

    group.bench_function("merge_partitions", |b| {
        b.iter(|| {
            let mut merged = BTreeMap::new();
            for partition in partitions.iter().cloned() {
                merge_into(&mut merged, partition).unwrap();
            }
            merged
        });
    });

    let single_user: Vec<IntermediateUserResult> = extracted
        .values()
        .max_by_key(|user| user.days().len())
        .map(|user| user.clone().split_by_day().into_values().collect())
        .unwrap_or_default();

    group.bench_function("fold_single_user", |b| {
        b.iter(|| {
            single_user.iter().cloned().try_fold(None, |merged, part| {
                merge_user_results(merged, Some(part))
            })
        });
    });

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench_extraction, bench_merging
);
criterion_main!(benches);
