//! Repository configurations stored under `repos/<name>/config.json`.

use std::fs;

use tracing::info;

use crate::error::{Error, Result};
use crate::github::RepoRef;
use crate::paths::{ensure_dir, remove_dir, Layout};
use crate::store::{content_hash, read_json, write_json};
use crate::types::{RepoConfig, RepoConnector};

/// Names must be non-empty and consist of `[a-z0-9-]`.
pub fn validate_repo_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRepoName(name.to_string()))
    }
}

/// A GitHub configuration named after the `<owner>-<repo>` slug of its url.
pub fn github_config(url: &str, token: &str) -> Result<RepoConfig> {
    let repo = RepoRef::from_url(url)?;
    Ok(RepoConfig {
        name: repo.slug(),
        url: url.trim().to_string(),
        connector: RepoConnector::Github {
            token: token.to_string(),
        },
    })
}

#[derive(Debug, Clone)]
pub struct RepoRegistry {
    layout: Layout,
}

impl RepoRegistry {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Names of every repository with a config file, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        let dir = self.layout.repos_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.layout.config_path(&name).is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn list(&self) -> Result<Vec<RepoConfig>> {
        self.names()?.iter().map(|name| self.get(name)).collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout.config_path(name).is_file()
    }

    pub fn get(&self, name: &str) -> Result<RepoConfig> {
        validate_repo_name(name)?;
        let path = self.layout.config_path(name);
        if !path.is_file() {
            return Err(Error::MissingConfig(name.to_string()));
        }
        read_json(&path)
    }

    /// Writes the configuration and creates the repository's data directories.
    pub fn save(&self, config: &RepoConfig) -> Result<()> {
        validate_repo_name(&config.name)?;
        ensure_dir(&self.layout.source_data_dir(&config.name))?;
        write_json(&self.layout.config_path(&config.name), config)?;
        info!(repo = %config.name, "saved repository configuration");
        Ok(())
    }

    /// Removes the repository with all its source data. Caches are left to the caller.
    pub fn delete(&self, name: &str) -> Result<()> {
        validate_repo_name(name)?;
        if !self.exists(name) {
            return Err(Error::MissingConfig(name.to_string()));
        }
        remove_dir(&self.layout.repo_dir(name))?;
        info!(repo = name, "deleted repository");
        Ok(())
    }

    /// Content hash of the config file bytes; changes whenever the file changes.
    pub fn revision(&self, name: &str) -> Result<String> {
        validate_repo_name(name)?;
        let path = self.layout.config_path(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(content_hash(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::MissingConfig(name.to_string()))
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }
}
