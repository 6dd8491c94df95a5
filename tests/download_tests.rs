use mockito::{Matcher, Mock, Server, ServerGuard};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

use repostats::store::{RawStore, RecordKind};
use repostats::{App, Settings};

fn pull_json(number: u64, updated_at: &str) -> Value {
    json!({
        "id": 9000 + number,
        "number": number,
        "title": format!("Change {number}"),
        "user": {"login": "ann", "id": 1, "html_url": "https://github.com/ann", "avatar_url": "x"},
        "html_url": format!("https://github.com/acme/web/pull/{number}"),
        "url": format!("https://api.github.com/repos/acme/web/pulls/{number}"),
        "state": "open",
        "created_at": "2022-03-01T10:00:00Z",
        "updated_at": updated_at,
        "closed_at": null,
        "merged_at": null,
        "requested_reviewers": [],
        "requested_teams": []
    })
}

fn commit_json() -> Value {
    json!({
        "sha": "c0ffee",
        "commit": {
            "author": {"name": "Ann", "email": "ann@acme.com", "date": "2022-03-01T09:00:00Z"},
            "committer": {"name": "Ann", "email": "ann@acme.com", "date": "2022-03-01T09:00:00Z"},
            "message": "Work"
        },
        "author": {"login": "ann", "id": 1, "html_url": "https://github.com/ann"},
        "committer": null
    })
}

fn settings(root: &TempDir, server: &ServerGuard) -> Settings {
    let mut settings = Settings::with_root(root.path());
    settings.github_api_url = server.url();
    settings.per_page = 2;
    settings.max_retries = 0;
    settings.retry_base_delay_ms = 1;
    settings.max_concurrent_requests = 2;
    settings
}

fn pulls_url(server: &ServerGuard, page: u32) -> String {
    format!(
        "{}/repos/acme/web/pulls?state=all&sort=updated&direction=desc&per_page=2&page={page}",
        server.url()
    )
}

async fn mock_rate_limit(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/rate_limit")
        .with_header("content-type", "application/json")
        .with_body(r#"{"resources":{"core":{"limit":5000,"remaining":4990,"reset":0}}}"#)
        .create_async()
        .await
}

async fn mock_pulls_page(
    server: &mut ServerGuard,
    page: &str,
    body: Value,
    link: Option<String>,
) -> Mock {
    mock_pulls_page_hits(server, page, body, link, None).await
}

async fn mock_pulls_page_hits(
    server: &mut ServerGuard,
    page: &str,
    body: Value,
    link: Option<String>,
    hits: Option<usize>,
) -> Mock {
    let mut mock = server
        .mock("GET", "/repos/acme/web/pulls")
        .match_query(Matcher::UrlEncoded("page".into(), page.into()))
        .with_header("content-type", "application/json")
        .with_header("x-ratelimit-limit", "5000")
        .with_header("x-ratelimit-remaining", "4989")
        .with_body(body.to_string());
    if let Some(link) = link {
        mock = mock.with_header("link", link.as_str());
    }
    if let Some(hits) = hits {
        mock = mock.expect(hits);
    }
    mock.create_async().await
}

async fn mock_json(server: &mut ServerGuard, path: Matcher, body: Value) -> Mock {
    server
        .mock("GET", path)
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

fn comments_path() -> Matcher {
    Matcher::Exact("/repos/acme/web/pulls/comments".into())
}

fn reviews_path() -> Matcher {
    Matcher::Regex(r"^/repos/acme/web/pulls/\d+/reviews$".into())
}

fn commits_path() -> Matcher {
    Matcher::Regex(r"^/repos/acme/web/pulls/\d+/commits$".into())
}

/// Empty comments and reviews, one commit per pull.
async fn mock_sub_resources(server: &mut ServerGuard) -> Vec<Mock> {
    vec![
        mock_json(server, comments_path(), json!([])).await,
        mock_json(server, reviews_path(), json!([])).await,
        mock_json(server, commits_path(), json!([commit_json()])).await,
    ]
}

async fn mock_teams_not_found(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/orgs/acme/teams")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(r#"{"message":"Not Found"}"#)
        .create_async()
        .await
}

fn setup_app(root: &TempDir, server: &ServerGuard) -> App {
    let app = App::new(settings(root, server)).unwrap();
    app.add_github_repo("https://github.com/acme/web", "t0k")
        .unwrap();
    app
}

#[tokio::test]
async fn test_incremental_paging_and_gap_filling() {
    let mut server = Server::new_async().await;
    let root = TempDir::new().unwrap();
    let link = format!(
        r#"<{}>; rel="next", <{}>; rel="last""#,
        pulls_url(&server, 2),
        pulls_url(&server, 2)
    );

    let _rate_limit = mock_rate_limit(&mut server).await;
    let first_page = mock_pulls_page_hits(
        &mut server,
        "1",
        json!([pull_json(3, "2022-03-05T10:00:00Z"), pull_json(2, "2022-03-04T10:00:00Z")]),
        Some(link),
        Some(2),
    )
    .await;
    // Fetched as the size query and as the next page on the first run, only as the
    // size query on the second.
    let last_page = mock_pulls_page_hits(
        &mut server,
        "2",
        json!([pull_json(1, "2022-03-03T10:00:00Z")]),
        None,
        Some(3),
    )
    .await;
    let _sub_resources = mock_sub_resources(&mut server).await;
    let _teams = mock_teams_not_found(&mut server).await;

    let app = setup_app(&root, &server);
    let first = app.download("acme-web", "run-1").await.unwrap();
    assert_eq!(first.seen_pulls, [1, 2, 3].into());
    assert_eq!(first.changed_pulls, [1, 2, 3].into());
    assert_eq!(first.teams, 0);
    assert_eq!(first.failed_fetches, 0);

    let second = app.download("acme-web", "run-2").await.unwrap();
    assert_eq!(second.seen_pulls, [2, 3].into());
    assert!(second.changed_pulls.is_empty());
    // Reviews are still missing everywhere, commits only for pulls seen again.
    assert_eq!(second.review_pulls, 3);
    assert_eq!(second.commit_pulls, 2);

    first_page.assert_async().await;
    last_page.assert_async().await;

    let meta = app.source_metadata("acme-web").unwrap();
    assert_eq!(meta.meta.total_pulls_in_repository, Some(3));
    assert_eq!(meta.fetched_pull_count, 3);
    assert_eq!(
        meta.meta.updated_at,
        Some("2022-03-05T10:00:00Z".parse().unwrap())
    );

    let store = RawStore::new(app.layout().source_data_dir("acme-web"));
    assert_eq!(store.count(RecordKind::Commits).unwrap(), 3);
}

#[tokio::test]
async fn test_download_status_is_tracked() {
    let mut server = Server::new_async().await;
    let root = TempDir::new().unwrap();
    let _rate_limit = mock_rate_limit(&mut server).await;
    let _first_page = mock_pulls_page(
        &mut server,
        "1",
        json!([pull_json(1, "2022-03-03T10:00:00Z")]),
        None,
    )
    .await;
    let _sub_resources = mock_sub_resources(&mut server).await;
    let _teams = mock_teams_not_found(&mut server).await;

    let app = setup_app(&root, &server);
    app.download("acme-web", "status-run").await.unwrap();

    let status = app.download_status("status-run").unwrap().unwrap();
    assert_eq!(status.rate_limit, Some(5000));
    assert!(status.fetched_resources >= 4);
    assert_eq!(app.download_status("other-run").unwrap(), None);
}

#[tokio::test]
async fn test_team_snapshot_is_replaced() {
    let mut server = Server::new_async().await;
    let root = TempDir::new().unwrap();
    let _rate_limit = mock_rate_limit(&mut server).await;
    let _first_page = mock_pulls_page(
        &mut server,
        "1",
        json!([pull_json(1, "2022-03-03T10:00:00Z")]),
        None,
    )
    .await;
    let _sub_resources = mock_sub_resources(&mut server).await;
    let _teams = mock_json(
        &mut server,
        Matcher::Exact("/orgs/acme/teams".into()),
        json!([{"id": 1, "slug": "core", "name": "Core", "members_count": 4}]),
    )
    .await;
    let _members = mock_json(
        &mut server,
        Matcher::Exact("/orgs/acme/teams/core/members".into()),
        json!([
            {"login": "bob", "id": 2, "html_url": "https://github.com/bob"},
            {"login": "cid", "id": 3, "html_url": "https://github.com/cid"}
        ]),
    )
    .await;

    let app = setup_app(&root, &server);
    let store = RawStore::new(app.layout().source_data_dir("acme-web"));
    // A member left over from an earlier snapshot.
    store
        .write(
            RecordKind::TeamMembers,
            Some("core"),
            "dan",
            &json!({"login": "dan", "id": 4, "html_url": "https://github.com/dan"}),
        )
        .unwrap();

    let report = app.download("acme-web", "teams").await.unwrap();
    assert_eq!(report.teams, 1);
    assert_eq!(
        store.ids(RecordKind::TeamMembers).unwrap(),
        ["bob".to_string(), "cid".to_string()].into()
    );
}

#[tokio::test]
async fn test_server_error_while_probing_counts_as_empty() {
    let mut server = Server::new_async().await;
    let root = TempDir::new().unwrap();
    let link = format!(
        r#"<{}>; rel="next", <{}>; rel="last""#,
        pulls_url(&server, 2),
        pulls_url(&server, 3)
    );
    let _rate_limit = mock_rate_limit(&mut server).await;
    let _first_page = mock_pulls_page(
        &mut server,
        "1",
        json!([pull_json(4, "2022-03-06T10:00:00Z"), pull_json(3, "2022-03-05T10:00:00Z")]),
        Some(link),
    )
    .await;
    let _second_page = mock_pulls_page(
        &mut server,
        "2",
        json!([pull_json(2, "2022-03-04T10:00:00Z"), pull_json(1, "2022-03-03T10:00:00Z")]),
        None,
    )
    .await;
    let _broken_last_page = server
        .mock("GET", "/repos/acme/web/pulls")
        .match_query(Matcher::UrlEncoded("page".into(), "3".into()))
        .with_status(502)
        .create_async()
        .await;
    let _sub_resources = mock_sub_resources(&mut server).await;
    let _teams = mock_teams_not_found(&mut server).await;

    let app = setup_app(&root, &server);
    let report = app.download("acme-web", "size-check").await.unwrap();
    assert_eq!(report.seen_pulls.len(), 4);

    let meta = app.source_metadata("acme-web").unwrap();
    assert_eq!(meta.meta.total_pulls_in_repository, Some(4));
}

#[tokio::test]
async fn test_failed_sub_resource_does_not_abort() {
    let mut server = Server::new_async().await;
    let root = TempDir::new().unwrap();
    let _rate_limit = mock_rate_limit(&mut server).await;
    let _first_page = mock_pulls_page(
        &mut server,
        "1",
        json!([pull_json(1, "2022-03-03T10:00:00Z")]),
        None,
    )
    .await;
    let _comments = mock_json(&mut server, comments_path(), json!([])).await;
    let _reviews = mock_json(&mut server, reviews_path(), json!([])).await;
    let _commits = server
        .mock("GET", commits_path())
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;
    let _teams = mock_teams_not_found(&mut server).await;

    let app = setup_app(&root, &server);
    let report = app.download("acme-web", "partial").await.unwrap();
    assert_eq!(report.failed_fetches, 1);
    assert_eq!(report.changed_pulls, [1].into());
}

#[tokio::test]
async fn test_failed_team_fetch_keeps_stored_snapshot() {
    let mut server = Server::new_async().await;
    let root = TempDir::new().unwrap();
    let _rate_limit = mock_rate_limit(&mut server).await;
    let _first_page = mock_pulls_page(
        &mut server,
        "1",
        json!([pull_json(1, "2022-03-03T10:00:00Z")]),
        None,
    )
    .await;
    let _sub_resources = mock_sub_resources(&mut server).await;
    let _teams = server
        .mock("GET", "/orgs/acme/teams")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let app = setup_app(&root, &server);
    let store = RawStore::new(app.layout().source_data_dir("acme-web"));
    store
        .write(
            RecordKind::Teams,
            None,
            "core",
            &json!({"id": 1, "slug": "core", "name": "Core"}),
        )
        .unwrap();
    store
        .write(
            RecordKind::TeamMembers,
            Some("core"),
            "dan",
            &json!({"login": "dan", "id": 4, "html_url": "https://github.com/dan"}),
        )
        .unwrap();

    let report = app.download("acme-web", "teams-down").await.unwrap();
    assert_eq!(report.teams, 0);
    assert_eq!(store.ids(RecordKind::Teams).unwrap(), ["core".to_string()].into());
    assert_eq!(
        store.ids(RecordKind::TeamMembers).unwrap(),
        ["dan".to_string()].into()
    );
}
