//! Bookkeeping around downloads: `gh/meta.json` and per-run download status.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::store::{read_json_opt, write_json, RawStore, RecordKind};

/// Request ids name status files, so they must be non-empty `[A-Za-z0-9_-]`.
pub fn validate_request_id(request_id: &str) -> Result<()> {
    let valid = !request_id.is_empty()
        && request_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRequestId(request_id.to_string()))
    }
}

/// Persisted facts about the source data of one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceDataMetadata {
    /// Latest `updated_at` seen on any pull request.
    pub updated_at: Option<DateTime<Utc>>,
    pub total_pulls_in_repository: Option<u64>,
    pub total_comment_count: Option<u64>,
}

impl SourceDataMetadata {
    pub fn load(store: &RawStore) -> Result<Self> {
        Ok(read_json_opt(&store.metadata_path())?.unwrap_or_default())
    }

    pub fn save(&self, store: &RawStore) -> Result<()> {
        write_json(&store.metadata_path(), self)
    }

    /// Loads, applies `update` and writes back.
    pub fn update(store: &RawStore, update: impl FnOnce(&mut Self)) -> Result<Self> {
        let mut meta = Self::load(store)?;
        update(&mut meta);
        meta.save(store)?;
        Ok(meta)
    }

    pub fn observe_updated_at(&mut self, updated_at: DateTime<Utc>) {
        if self.updated_at.map_or(true, |current| updated_at > current) {
            self.updated_at = Some(updated_at);
        }
    }
}

/// Metadata together with counts derived from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDataSummary {
    #[serde(flatten)]
    pub meta: SourceDataMetadata,
    pub downloads_path: PathBuf,
    pub fetched_pull_count: usize,
    pub fetched_comment_count: usize,
}

pub fn source_data_summary(store: &RawStore) -> Result<SourceDataSummary> {
    Ok(SourceDataSummary {
        meta: SourceDataMetadata::load(store)?,
        downloads_path: store.base_dir().to_path_buf(),
        fetched_pull_count: store.count(RecordKind::Pulls)?,
        fetched_comment_count: store.count(RecordKind::Comments)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    pub rate_limit: Option<u64>,
    pub rate_limit_left: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub fetched_resources: u64,
}

impl DownloadStatus {
    pub fn started_now() -> Self {
        Self {
            rate_limit: None,
            rate_limit_left: None,
            started_at: Utc::now(),
            fetched_resources: 0,
        }
    }
}

pub fn read_download_status(path: &Path) -> Result<Option<DownloadStatus>> {
    read_json_opt(path)
}

/// Keeps the status file of one download run current.
#[derive(Debug)]
pub struct StatusTracker {
    path: PathBuf,
    status: Mutex<DownloadStatus>,
}

impl StatusTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status: Mutex::new(DownloadStatus::started_now()),
        }
    }

    pub fn snapshot(&self) -> Option<DownloadStatus> {
        self.status.lock().ok().map(|status| status.clone())
    }

    /// Counts one fetched response. Header values replace the previous ones when present.
    pub fn record_response(&self, rate_limit: Option<u64>, rate_limit_left: Option<u64>) {
        let Ok(mut status) = self.status.lock() else {
            return;
        };
        status.fetched_resources += 1;
        if rate_limit.is_some() {
            status.rate_limit = rate_limit;
        }
        if rate_limit_left.is_some() {
            status.rate_limit_left = rate_limit_left;
        }
        if let Err(e) = write_json(&self.path, &*status) {
            warn!(error = %e, "could not persist download status");
        }
    }
}
