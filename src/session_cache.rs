//! Process-wide cache of loaded segmentation sessions
//!
//! Loading a model and building its session takes seconds, so sessions are
//! created once per model key and shared for the lifetime of the process.
//! Entries are never evicted. Creation is serialized by the cache lock and
//! each session carries its own mutex, so inference on one session runs one
//! request at a time.

use crate::error::{IdPhotoError, Result};
use crate::inference::InferenceBackend;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// A loaded session shared between requests
pub type SharedSession = Arc<Mutex<Box<dyn InferenceBackend>>>;

/// Lock a shared session for inference
///
/// # Errors
/// - A previous holder panicked while running inference
pub fn lock_session(session: &SharedSession) -> Result<MutexGuard<'_, Box<dyn InferenceBackend>>> {
    session
        .lock()
        .map_err(|_| IdPhotoError::internal("Segmentation session lock poisoned"))
}

/// Result of a cache lookup
#[derive(Clone)]
pub struct AcquiredSession {
    pub session: SharedSession,
    /// `true` when the session already existed
    pub from_cache: bool,
}

impl std::fmt::Debug for AcquiredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquiredSession")
            .field("from_cache", &self.from_cache)
            .finish_non_exhaustive()
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl SessionCacheStats {
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Memo table of model key → session
#[derive(Default)]
pub struct SessionCache {
    sessions: tokio::sync::Mutex<HashMap<String, SharedSession>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SessionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every studio in this process
    pub fn global() -> Arc<SessionCache> {
        static GLOBAL: OnceLock<Arc<SessionCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SessionCache::new())))
    }

    /// Return the session for `key`, creating it with `init` on first use
    ///
    /// Concurrent callers for a missing key wait for the first creation
    /// instead of loading the model twice. If `init` fails nothing is stored,
    /// so the next call tries again.
    ///
    /// # Errors
    /// - Whatever `init` returns
    pub async fn get_or_try_init<F, Fut>(&self, key: &str, init: F) -> Result<AcquiredSession>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Box<dyn InferenceBackend>>>,
    {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("♻️ Reusing cached session for {key}");
            return Ok(AcquiredSession {
                session: Arc::clone(session),
                from_cache: true,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        log::info!("📦 Creating session for {key}");
        let backend = init().await?;
        let session: SharedSession = Arc::new(Mutex::new(backend));
        sessions.insert(key.to_string(), Arc::clone(&session));

        Ok(AcquiredSession {
            session,
            from_cache: false,
        })
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.sessions.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keys of the cached sessions, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn stats(&self) -> SessionCacheStats {
        SessionCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
