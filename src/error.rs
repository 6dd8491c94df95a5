//! # Errors
//!
//! A single error type for the whole crate. Variants follow the failure classes the
//! engine distinguishes: transient remote failures, tolerated absence, data-integrity
//! violations and configuration mistakes.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ConnectorType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse json at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("tried to merge incompatible records; {field} were '{left}' and '{right}'")]
    IdentityMismatch {
        field: &'static str,
        left: String,
        right: String,
    },

    #[error("config file for repository '{0}' does not exist")]
    MissingConfig(String),

    #[error("the repository name must be alphanumeric and all lowercase, was '{0}'")]
    InvalidRepoName(String),

    #[error("invalid GitHub url: {0}")]
    InvalidRepoUrl(String),

    #[error("unsupported connector type {0}")]
    UnsupportedConnector(ConnectorType),

    #[error("invalid date interval: {0}")]
    InvalidInterval(String),

    #[error("download request ids may only contain letters, digits, '-' and '_', was '{0}'")]
    InvalidRequestId(String),

    #[error("failed to parse settings at {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("analysis worker pool closed: {0}")]
    WorkerPool(#[from] tokio::sync::AcquireError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Error::Json {
            path: path.into(),
            source,
        }
    }

    /// HTTP status of a remote failure, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Network failures, throttling and server-side errors; worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.is_request()
                    || err.status().map_or(false, |s| s.is_server_error())
            }
            Error::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_server_error(&self) -> bool {
        self.status().map_or(false, |status| status >= 500)
    }

    /// Errors caused by the caller's input rather than by the engine or the remote.
    pub fn is_client_facing(&self) -> bool {
        matches!(
            self,
            Error::MissingConfig(_)
                | Error::InvalidRepoName(_)
                | Error::InvalidRepoUrl(_)
                | Error::UnsupportedConnector(_)
                | Error::InvalidInterval(_)
                | Error::InvalidRequestId(_)
        )
    }
}
