/// Sticky session bindings between session identifiers and backends
use fnv::FnvHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

/// A session pinned to a backend until `expires_at`
#[derive(Debug, Clone)]
pub struct StickySessionBinding {
    pub session_id: String,
    pub backend_id: String,
    pub created_at: Instant,
    pub ttl: Duration,
    pub expires_at: Instant,
}

impl StickySessionBinding {
    fn new(session_id: String, backend_id: String, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            backend_id,
            created_at: now,
            ttl,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before the binding stops being honored
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Session manager for tracking session-backend affinity
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<FnvHashMap<String, StickySessionBinding>>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(FnvHashMap::default())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create or refresh a binding, restarting its TTL
    pub async fn bind(&self, session_id: &str, backend_id: &str) -> StickySessionBinding {
        let binding =
            StickySessionBinding::new(session_id.to_string(), backend_id.to_string(), self.ttl);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), binding.clone());
        binding
    }

    /// Get the live binding for a session.
    ///
    /// An expired binding is removed on the spot and never returned.
    pub async fn lookup(&self, session_id: &str) -> Option<StickySessionBinding> {
        let now = Instant::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(session_id) {
                Some(binding) if !binding.is_expired(now) => return Some(binding.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut sessions = self.sessions.write().await;
        if sessions
            .get(session_id)
            .is_some_and(|binding| binding.is_expired(now))
        {
            sessions.remove(session_id);
            tracing::debug!("Dropped expired sticky session {}", session_id);
        }
        None
    }

    /// Remove a binding
    pub async fn remove(&self, session_id: &str) -> Option<StickySessionBinding> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id)
    }

    /// Remove every binding pointing at a backend
    pub async fn remove_backend(&self, backend_id: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, binding| binding.backend_id != backend_id);
        before - sessions.len()
    }

    /// Clean up expired sessions
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, binding| !binding.is_expired(now));
        before - sessions.len()
    }

    /// Get total session count, expired entries included until swept
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Sweep expired bindings every `interval` until `shutdown` fires
    pub async fn run_cleanup(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cleaned = self.cleanup_expired_sessions().await;
                    if cleaned > 0 {
                        tracing::debug!("Cleaned up {} expired sessions", cleaned);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
