//! # Review Statistics Library
//!
//! `repostats` downloads pull request activity from GitHub into a local record store
//! and turns it into per-contributor review statistics. It keeps a day-partitioned
//! cache of the extracted data so that queries over a date range only touch the days
//! they ask for.
//!
//! ## Features
//!
//! - Incremental, rate-limited downloads of pulls, comments, reviews, commits and teams
//! - Per-user authored and received review statistics per repository
//! - Day-partitioned partial cache invalidated by configuration changes
//! - Whole-response cache keyed by the normalized request
//! - Merging of results across several repositories
//!
//! ## Example
//!
//! ```no_run
//! use repostats::{App, AnalyzeRequest, CacheControl, Settings};
//!
//! # async fn run() -> repostats::Result<()> {
//! let app = App::new(Settings::load(None)?)?;
//! app.add_github_repo("https://github.com/acme/web", "<token>")?;
//! app.download("acme-web", "first-run").await?;
//!
//! let response = app
//!     .analyze(AnalyzeRequest::default(), CacheControl::default())
//!     .await?;
//! for user in response.result.user_results.values() {
//!     println!("{}: {:?}", user.display_name, user.comments_per_change);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod app;
pub mod config;
pub mod error;
pub mod github;
pub mod logging;
pub mod paths;
pub mod repos;
pub mod store;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use analysis::{Analyzer, CacheControl};
pub use app::App;
pub use config::Settings;
pub use error::{Error, Result};
pub use types::{AnalyzeRequest, AnalyzeResponse, AnalyzeResult, RepoConfig, UserResult};
pub use utils::interval::DateInterval;
