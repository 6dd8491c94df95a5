//! On-disk layout below the root directory.
//!
//! ```text
//! <root>/repos/<repo>/config.json
//! <root>/repos/<repo>/source-data/gh/<kind>/[<parent>/]<id>.json
//! <root>/cache/analysis-partial/<repo>/revision.json
//! <root>/cache/analysis-partial/<repo>/daily/<date>/<userId>.json
//! <root>/cache/analysis/responses/<hash>.json
//! <root>/cache/download/<requestId>.json
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn repo_dir(&self, repo_name: &str) -> PathBuf {
        self.repos_dir().join(repo_name)
    }

    pub fn config_path(&self, repo_name: &str) -> PathBuf {
        self.repo_dir(repo_name).join("config.json")
    }

    pub fn source_data_dir(&self, repo_name: &str) -> PathBuf {
        self.repo_dir(repo_name).join("source-data")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn partial_cache_dir(&self, repo_name: &str) -> PathBuf {
        self.cache_dir().join("analysis-partial").join(repo_name)
    }

    pub fn revision_path(&self, repo_name: &str) -> PathBuf {
        self.partial_cache_dir(repo_name).join("revision.json")
    }

    pub fn daily_dir(&self, repo_name: &str) -> PathBuf {
        self.partial_cache_dir(repo_name).join("daily")
    }

    pub fn day_dir(&self, repo_name: &str, day: NaiveDate) -> PathBuf {
        self.daily_dir(repo_name).join(day.to_string())
    }

    pub fn partition_path(&self, repo_name: &str, day: NaiveDate, user_id: &str) -> PathBuf {
        self.day_dir(repo_name, day).join(format!("{user_id}.json"))
    }

    pub fn responses_dir(&self) -> PathBuf {
        self.cache_dir().join("analysis").join("responses")
    }

    pub fn response_path(&self, key: &str) -> PathBuf {
        self.responses_dir().join(format!("{key}.json"))
    }

    pub fn download_status_path(&self, request_id: &str) -> PathBuf {
        self.cache_dir()
            .join("download")
            .join(format!("{request_id}.json"))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        ensure_dir(&self.repos_dir())?;
        ensure_dir(&self.cache_dir())
    }
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))
}

/// Removes a directory tree; a missing directory is not an error.
pub fn remove_dir(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}
