//! Day-partitioned materialization of the extracted user results.
//!
//! A rebuild runs the extraction once over the whole history and writes one file per
//! (day, user). Queries only read the partitions of the requested days. The partitions
//! are tagged with the revision of the repository configuration they were built from.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::intermediate::{merge_into, IntermediateUserResult};
use crate::error::{Error, Result};
use crate::github::extract_repo;
use crate::paths::{remove_dir, Layout};
use crate::store::{read_json, write_json, RawStore};
use crate::types::{RepoConfig, RepoConnector};
use crate::utils::interval::DateInterval;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    pub revision: String,
}

#[derive(Debug, Clone)]
pub struct PartialCache {
    layout: Layout,
}

impl PartialCache {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// The revision the partitions were built from. A missing or unreadable file reads as none.
    pub fn stored_revision(&self, repo_name: &str) -> Option<String> {
        let path = self.layout.revision_path(repo_name);
        if !path.is_file() {
            return None;
        }
        match read_json::<RevisionMetadata>(&path) {
            Ok(meta) => Some(meta.revision),
            Err(e) => {
                warn!(repo = repo_name, error = %e, "unreadable revision metadata");
                None
            }
        }
    }

    pub fn is_fresh(&self, repo_name: &str, revision: &str) -> bool {
        self.stored_revision(repo_name).as_deref() == Some(revision)
    }

    /// Rebuilds the partitions when `revision` differs from the stored one or when
    /// `force` is set. Returns whether a rebuild happened.
    pub fn ensure_fresh(&self, config: &RepoConfig, revision: &str, force: bool) -> Result<bool> {
        if let RepoConnector::Git { .. } = config.connector {
            return Err(Error::UnsupportedConnector(config.connector.connector_type()));
        }
        if !force && self.is_fresh(&config.name, revision) {
            debug!(repo = %config.name, "partial cache is fresh");
            return Ok(false);
        }

        let start_time = Instant::now();
        info!(repo = %config.name, force, "rebuilding partial cache");
        self.clear(&config.name)?;

        let store = RawStore::new(self.layout.source_data_dir(&config.name));
        let users = extract_repo(&store, &config.name, &DateInterval::all_time())?;
        let mut partitions = 0usize;
        for (user_id, result) in users {
            for (day, part) in result.split_by_day() {
                write_json(&self.layout.partition_path(&config.name, day, &user_id), &part)?;
                partitions += 1;
            }
        }

        // Written last so that an interrupted rebuild is retried.
        write_json(
            &self.layout.revision_path(&config.name),
            &RevisionMetadata {
                revision: revision.to_string(),
            },
        )?;
        info!(
            repo = %config.name,
            partitions,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "partial cache rebuilt"
        );
        Ok(true)
    }

    /// Merged user results of every materialized day inside `interval`.
    pub fn query(
        &self,
        repo_name: &str,
        interval: &DateInterval,
    ) -> Result<BTreeMap<String, IntermediateUserResult>> {
        let mut results = BTreeMap::new();
        let days: Vec<NaiveDate> = self
            .materialized_days(repo_name)?
            .into_iter()
            .filter(|day| interval.contains(*day))
            .collect();

        for day in &days {
            let day_dir = self.layout.day_dir(repo_name, *day);
            for path in sorted_files(&day_dir)? {
                let part: IntermediateUserResult = read_json(&path)?;
                merge_into(&mut results, part)?;
            }
        }
        debug!(
            repo = repo_name,
            days = days.len(),
            users = results.len(),
            "queried partial cache"
        );
        Ok(results)
    }

    /// Days with a partition directory, ascending.
    pub fn materialized_days(&self, repo_name: &str) -> Result<Vec<NaiveDate>> {
        let daily_dir = self.layout.daily_dir(repo_name);
        if !daily_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut days = Vec::new();
        for entry in fs::read_dir(&daily_dir).map_err(|e| Error::io(&daily_dir, e))? {
            let entry = entry.map_err(|e| Error::io(&daily_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match NaiveDate::parse_from_str(&name, "%Y-%m-%d") {
                Ok(day) => days.push(day),
                Err(_) => warn!(repo = repo_name, entry = %name, "ignoring stray entry in partial cache"),
            }
        }
        days.sort();
        Ok(days)
    }

    /// Drops the partitions and the revision of one repository.
    pub fn clear(&self, repo_name: &str) -> Result<()> {
        remove_dir(&self.layout.partial_cache_dir(repo_name))
    }
}

fn sorted_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
