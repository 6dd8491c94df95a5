//! Review Statistics Tool
//!
//! Command line front end: manage repositories, download their review activity and
//! print analysis results as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::info;

use repostats::logging::init_logging;
use repostats::utils::interval::parse_day;
use repostats::{AnalyzeRequest, App, CacheControl, DateInterval, Settings};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file in TOML format
    #[arg(long, global = true, default_value = "repostats.toml")]
    config: PathBuf,

    /// Root directory for repositories and caches; overrides the settings file
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage configured repositories
    #[command(subcommand)]
    Repos(ReposCommand),
    /// Show what has been downloaded for a repository
    Meta { name: String },
    /// Incrementally download a repository
    Download {
        name: String,
        /// Id under which download progress is tracked
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Show the progress of a download
    Status { request_id: String },
    /// Compute review statistics and print them as JSON
    Analyze {
        /// First day to include (YYYY-MM-DD)
        #[arg(long, value_parser = parse_day)]
        from: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD)
        #[arg(long, value_parser = parse_day)]
        to: Option<NaiveDate>,
        /// Repositories to include; all when omitted
        #[arg(long = "repo")]
        repos: Vec<String>,
        /// Do not store the result in the result cache
        #[arg(long)]
        no_store: bool,
        /// Ignore cached results and rebuild the partial caches
        #[arg(long)]
        no_cache: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ReposCommand {
    /// List configured repositories
    List,
    /// Add or update a GitHub repository
    Add {
        #[arg(long)]
        url: String,
        #[arg(long)]
        token: String,
    },
    /// Remove a repository with its downloaded data
    Remove { name: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn date_interval(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Option<DateInterval>> {
    if from.is_none() && to.is_none() {
        return Ok(None);
    }
    let all_time = DateInterval::all_time();
    let interval = DateInterval::new(
        from.unwrap_or_else(|| all_time.start_date()),
        to.unwrap_or_else(|| all_time.end_date()),
    )?;
    Ok(Some(interval))
}

async fn run(app: App, command: Command) -> Result<()> {
    match command {
        Command::Repos(ReposCommand::List) => print_json(&app.list_repos()?),
        Command::Repos(ReposCommand::Add { url, token }) => {
            print_json(&app.add_github_repo(&url, &token)?)
        }
        Command::Repos(ReposCommand::Remove { name }) => {
            app.remove_repo(&name).await?;
            info!(repo = %name, "repository removed");
            Ok(())
        }
        Command::Meta { name } => print_json(&app.source_metadata(&name)?),
        Command::Download { name, request_id } => {
            let request_id = request_id
                .unwrap_or_else(|| format!("download-{}", Utc::now().format("%Y%m%d%H%M%S")));
            let report = app
                .download(&name, &request_id)
                .await
                .with_context(|| format!("download of '{name}' failed"))?;
            print_json(&report)
        }
        Command::Status { request_id } => match app.download_status(&request_id)? {
            Some(status) => print_json(&status),
            None => anyhow::bail!("no download with id '{request_id}'"),
        },
        Command::Analyze {
            from,
            to,
            repos,
            no_store,
            no_cache,
        } => {
            let request = AnalyzeRequest {
                date_interval: date_interval(from, to)?,
                included_repo_names: (!repos.is_empty()).then_some(repos),
            };
            let control = CacheControl {
                no_store,
                skip_read: no_cache,
            };
            let response = app.analyze(request, control).await?;
            info!(
                cached = response.cached,
                rebuilt = ?response.rebuilt_repos,
                "analysis ready"
            );
            print_json(&response.result)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(Some(&cli.config))?;
    if let Some(root) = cli.root {
        settings.root_dir = root;
    }
    if let Err(e) = init_logging(&settings.log) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let app = App::new(settings)?;
    let rt = Runtime::new()?;
    rt.block_on(run(app, cli.command))
}
