use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::analysis::{Analyzer, CacheControl};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::github::metadata::{read_download_status, source_data_summary, validate_request_id};
use crate::github::{connect, DownloadReport, DownloadStatus, Downloader, RepoRef, SourceDataSummary, StatusTracker};
use crate::paths::Layout;
use crate::repos::{github_config, RepoRegistry};
use crate::store::RawStore;
use crate::types::{AnalyzeRequest, AnalyzeResponse, RepoConfig, RepoConnector};

/// Entry point for callers: repository management, downloads and analysis over one
/// root directory.
pub struct App {
    settings: Settings,
    layout: Layout,
    analyzer: Analyzer,
}

impl App {
    pub fn new(settings: Settings) -> Result<Self> {
        let layout = Layout::new(&settings.root_dir);
        layout.ensure_base_dirs()?;
        let analyzer = Analyzer::new(layout.clone(), settings.memory_cache_entries);
        Ok(Self {
            settings,
            layout,
            analyzer,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn repos(&self) -> &RepoRegistry {
        self.analyzer.registry()
    }

    pub fn list_repos(&self) -> Result<Vec<RepoConfig>> {
        self.repos().list()
    }

    /// Saves a GitHub repository named after its url. Saving an existing repository
    /// with different settings changes its revision.
    pub fn add_github_repo(&self, url: &str, token: &str) -> Result<RepoConfig> {
        let config = github_config(url, token)?;
        self.repos().save(&config)?;
        Ok(config)
    }

    pub async fn remove_repo(&self, name: &str) -> Result<()> {
        self.repos().delete(name)?;
        self.analyzer.invalidate(name).await
    }

    pub fn source_metadata(&self, name: &str) -> Result<SourceDataSummary> {
        self.repos().get(name)?;
        source_data_summary(&RawStore::new(self.layout.source_data_dir(name)))
    }

    /// Incrementally downloads `name`, tracking progress under `request_id`, then drops
    /// the cached analysis of the repository.
    pub async fn download(&self, name: &str, request_id: &str) -> Result<DownloadReport> {
        validate_request_id(request_id)?;
        let config = self.repos().get(name)?;
        let RepoConnector::Github { token } = &config.connector else {
            return Err(Error::UnsupportedConnector(config.connector.connector_type()));
        };
        let repo = RepoRef::from_url(&config.url)?;

        let start_time = Instant::now();
        let tracker = Arc::new(StatusTracker::new(
            self.layout.download_status_path(request_id),
        ));
        let client = connect(&self.settings, token, Some(tracker)).await?;
        let store = RawStore::new(self.layout.source_data_dir(name));
        let report = Downloader::new(&client, &store, repo, self.settings.max_concurrent_requests)
            .run()
            .await?;

        self.analyzer.invalidate(name).await?;
        info!(
            repo = name,
            request_id,
            changed_pulls = report.changed_pulls.len(),
            changed_comments = report.changed_comments,
            failed_fetches = report.failed_fetches,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "download finished"
        );
        Ok(report)
    }

    pub fn download_status(&self, request_id: &str) -> Result<Option<DownloadStatus>> {
        validate_request_id(request_id)?;
        read_download_status(&self.layout.download_status_path(request_id))
    }

    pub async fn analyze(
        &self,
        request: AnalyzeRequest,
        control: CacheControl,
    ) -> Result<AnalyzeResponse> {
        self.analyzer.analyze(request, control).await
    }

    pub fn clear_result_cache(&self) -> Result<()> {
        self.analyzer.clear_results()
    }
}
