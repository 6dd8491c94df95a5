//! Request handling: normalization, result caching and per-repository partial
//! cache queries merged across repositories.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::analysis::cache::{request_key, CacheControl, ResultCache};
use crate::analysis::intermediate::{merge_into, IntermediateUserResult};
use crate::analysis::partial::PartialCache;
use crate::analysis::post::create_analyze_result;
use crate::error::{Error, Result};
use crate::paths::Layout;
use crate::repos::{validate_repo_name, RepoRegistry};
use crate::types::{
    AnalyzeRequest, AnalyzeResponse, AnalyzeResult, NormalizedAnalyzeRequest, RepoConfig,
};
use crate::utils::interval::DateInterval;

/// Use 75% of the available CPUs for blocking extraction work.
fn worker_count() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

type RepoResults = BTreeMap<String, IntermediateUserResult>;

pub struct Analyzer {
    registry: RepoRegistry,
    partial: PartialCache,
    results: ResultCache,
    repo_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    workers: Arc<Semaphore>,
}

impl Analyzer {
    pub fn new(layout: Layout, memory_cache_entries: usize) -> Self {
        Self {
            registry: RepoRegistry::new(layout.clone()),
            partial: PartialCache::new(layout.clone()),
            results: ResultCache::new(layout, memory_cache_entries),
            repo_locks: Mutex::new(HashMap::new()),
            workers: Arc::new(Semaphore::new(worker_count())),
        }
    }

    pub fn registry(&self) -> &RepoRegistry {
        &self.registry
    }

    /// Resolves defaults: all time and every configured repository. Names are
    /// validated, sorted and deduplicated so equivalent requests share a cache key.
    pub fn normalize(&self, request: AnalyzeRequest) -> Result<NormalizedAnalyzeRequest> {
        let date_interval = request.date_interval.unwrap_or_else(DateInterval::all_time);
        let mut names = match request.included_repo_names {
            Some(names) => {
                for name in &names {
                    validate_repo_name(name)?;
                    if !self.registry.exists(name) {
                        return Err(Error::MissingConfig(name.clone()));
                    }
                }
                names
            }
            None => self.registry.names()?,
        };
        names.sort();
        names.dedup();
        Ok(NormalizedAnalyzeRequest {
            date_interval,
            included_repo_names: names,
        })
    }

    pub async fn analyze(
        &self,
        request: AnalyzeRequest,
        control: CacheControl,
    ) -> Result<AnalyzeResponse> {
        let start_time = Instant::now();
        let request = self.normalize(request)?;
        let key = request_key(&request)?;

        let mut repos = Vec::with_capacity(request.included_repo_names.len());
        for name in &request.included_repo_names {
            let config = self.registry.get(name)?;
            let revision = self.registry.revision(name)?;
            repos.push((config, revision));
        }

        let all_fresh = repos
            .iter()
            .all(|(config, revision)| self.partial.is_fresh(&config.name, revision));
        if !control.skip_read && all_fresh {
            let cached = self.results.get(&key);
            if let Some(result) = cached.filter(|_| self.revisions_current(&repos)) {
                info!(key = %key, "serving analysis from result cache");
                return Ok(AnalyzeResponse {
                    result,
                    cached: true,
                    rebuilt_repos: Vec::new(),
                });
            }
        }

        let per_repo = try_join_all(repos.iter().map(|(config, revision)| {
            self.repo_results(config, revision, request.date_interval, control.skip_read)
        }))
        .await?;

        let mut merged = BTreeMap::new();
        let mut rebuilt_repos = Vec::new();
        for ((config, _), (rebuilt, results)) in repos.iter().zip(per_repo) {
            if rebuilt {
                rebuilt_repos.push(config.name.clone());
            }
            for result in results.into_values() {
                merge_into(&mut merged, result)?;
            }
        }

        let configs = repos.iter().map(|(config, _)| config.clone()).collect();
        let result = create_analyze_result(configs, merged);
        if !control.no_store {
            self.store_if_current(&key, &result, &repos);
        }
        info!(
            key = %key,
            users = result.user_results.len(),
            rebuilt = rebuilt_repos.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "analysis computed"
        );
        Ok(AnalyzeResponse {
            result,
            cached: false,
            rebuilt_repos,
        })
    }

    /// True when no configuration changed since `repos` was read.
    fn revisions_current(&self, repos: &[(RepoConfig, String)]) -> bool {
        repos.iter().all(|(config, revision)| {
            self.registry
                .revision(&config.name)
                .map_or(false, |current| current == *revision)
        })
    }

    /// Caches `result` unless a configuration changed while it was computed.
    fn store_if_current(
        &self,
        key: &str,
        result: &AnalyzeResult,
        repos: &[(RepoConfig, String)],
    ) -> bool {
        if !self.revisions_current(repos) {
            debug!(key = %key, "configuration changed during analysis, result not cached");
            return false;
        }
        self.results.put(key, result);
        true
    }

    fn repo_lock(&self, repo_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .repo_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(repo_name.to_string()).or_default().clone()
    }

    /// Refreshes and queries one repository. Requests for the same repository wait for
    /// each other so a query never sees a half-written rebuild.
    async fn repo_results(
        &self,
        config: &RepoConfig,
        revision: &str,
        interval: DateInterval,
        force: bool,
    ) -> Result<(bool, RepoResults)> {
        let lock = self.repo_lock(&config.name);
        let _guard = lock.lock().await;
        let _permit = self.workers.clone().acquire_owned().await?;

        let partial = self.partial.clone();
        let config = config.clone();
        let revision = revision.to_string();
        let (rebuilt, results) = spawn_blocking(move || {
            let rebuilt = partial.ensure_fresh(&config, &revision, force)?;
            let results = partial.query(&config.name, &interval)?;
            Ok::<_, Error>((rebuilt, results))
        })
        .await??;
        debug!(users = results.len(), rebuilt, "repository results ready");
        Ok((rebuilt, results))
    }

    /// Drops every cached result and the partitions of `repo_name`.
    pub async fn invalidate(&self, repo_name: &str) -> Result<()> {
        let lock = self.repo_lock(repo_name);
        let _guard = lock.lock().await;
        self.results.clear()?;
        self.partial.clear(repo_name)
    }

    pub fn clear_results(&self) -> Result<()> {
        self.results.clear()
    }
}
