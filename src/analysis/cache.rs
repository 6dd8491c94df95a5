use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::{debug, warn};

use crate::error::Result;
use crate::paths::{remove_dir, Layout};
use crate::store::{content_hash, read_json_opt, to_json_bytes, write_json};
use crate::types::{AnalyzeResult, NormalizedAnalyzeRequest};

/// Caller directives for the result cache, in `Cache-Control` header syntax.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// Do not store the computed result.
    pub no_store: bool,
    /// Do not serve a stored result; recompute everything.
    pub skip_read: bool,
}

impl CacheControl {
    /// Understands `no-store`, `no-cache` and `max-age=0`; other directives are ignored.
    pub fn parse(header: &str) -> Self {
        let mut control = Self::default();
        for directive in header.split(',').map(|d| d.trim().to_ascii_lowercase()) {
            match directive.as_str() {
                "no-store" => control.no_store = true,
                "no-cache" | "max-age=0" => control.skip_read = true,
                _ => {}
            }
        }
        control
    }
}

/// Hash of the JSON form of a normalized request.
pub fn request_key(request: &NormalizedAnalyzeRequest) -> Result<String> {
    Ok(content_hash(&to_json_bytes(request, "analyze request")?))
}

/// Whole analysis results on disk under `responses/<key>.json`, fronted by a small
/// in-memory LRU.
pub struct ResultCache {
    layout: Layout,
    memory: Mutex<LruCache<String, AnalyzeResult>>,
}

impl ResultCache {
    pub fn new(layout: Layout, memory_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(memory_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            layout,
            memory: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn memory(&self) -> std::sync::MutexGuard<'_, LruCache<String, AnalyzeResult>> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A stored result. Unreadable entries count as a miss.
    pub fn get(&self, key: &str) -> Option<AnalyzeResult> {
        if let Some(result) = self.memory().get(key) {
            debug!(key, "result cache hit in memory");
            return Some(result.clone());
        }

        let path = self.layout.response_path(key);
        match read_json_opt::<AnalyzeResult>(&path) {
            Ok(Some(result)) => {
                debug!(key, "result cache hit on disk");
                self.memory().put(key.to_string(), result.clone());
                Some(result)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "unreadable result cache entry, treating as miss");
                None
            }
        }
    }

    /// Stores `result`. A failed disk write is logged and leaves the memory entry in place.
    pub fn put(&self, key: &str, result: &AnalyzeResult) {
        if let Err(e) = write_json(&self.layout.response_path(key), result) {
            warn!(key, error = %e, "failed to persist analysis result");
        }
        self.memory().put(key.to_string(), result.clone());
    }

    pub fn clear(&self) -> Result<()> {
        self.memory().clear();
        remove_dir(&self.layout.responses_dir())
    }
}
