//! Runtime settings, read from an optional TOML file and the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ROOT_DIR_ENV: &str = "REPOSTATS_ROOT";
pub const GITHUB_API_URL_ENV: &str = "REPOSTATS_GITHUB_API_URL";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
/// Largest page size the GitHub API honors; larger values are silently capped by it.
pub const MAX_PER_PAGE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: if cfg!(feature = "dev") { "debug" } else { "info" }.to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the repository configurations and all caches.
    pub root_dir: PathBuf,
    pub github_api_url: String,
    pub per_page: usize,
    /// Extra attempts after a transient failure.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub rate_limit_window_secs: u64,
    /// Request budget used when the remote quota cannot be queried.
    pub fallback_rate_limit: usize,
    /// Upper bound of in-flight sub-resource fetches.
    pub max_concurrent_requests: usize,
    pub memory_cache_entries: usize,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            per_page: MAX_PER_PAGE,
            max_retries: 3,
            retry_base_delay_ms: 500,
            rate_limit_window_secs: 60 * 60,
            fallback_rate_limit: 5000,
            max_concurrent_requests: (num_cpus::get() * 2).clamp(2, 16),
            memory_cache_entries: 32,
            log: LogSettings::default(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if cfg!(target_os = "macos") {
        home.join("Documents").join("repostats")
    } else {
        home.join("repostats")
    }
}

impl Settings {
    /// Settings with everything stored below `root_dir`.
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Loads `path` if given and present, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
                toml::from_str(&content).map_err(|source| Error::Settings {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            _ => Settings::default(),
        };

        settings.per_page = settings.per_page.clamp(1, MAX_PER_PAGE);

        if let Some(root) = std::env::var_os(ROOT_DIR_ENV).filter(|v| !v.is_empty()) {
            settings.root_dir = PathBuf::from(root);
        }
        if let Ok(url) = std::env::var(GITHUB_API_URL_ENV) {
            if !url.trim().is_empty() {
                settings.github_api_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        Ok(settings)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}
