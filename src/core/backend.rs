/// Backend registry shared by selection, connection accounting and health checks
use crate::core::{Backend, HealthState};
use crate::error::{LoadScaleError, LoadScaleResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

/// Backend pool guarded by a single coarse lock.
///
/// Every mutation of a backend's counters or health fields goes through the
/// write lock, so selection, release and probe results never interleave on
/// the same backend.
#[derive(Clone, Default)]
pub struct BackendPool {
    backends: Arc<RwLock<HashMap<String, Backend>>>,
}

/// A health transition produced by a probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub previous: HealthState,
    pub current: HealthState,
}

impl HealthTransition {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend to the pool
    pub async fn insert(&self, backend: Backend) {
        let mut backends = self.backends.write().await;
        backends.insert(backend.id.clone(), backend);
    }

    /// Remove a backend from the pool
    pub async fn remove(&self, backend_id: &str) -> Option<Backend> {
        let mut backends = self.backends.write().await;
        backends.remove(backend_id)
    }

    /// Get a backend by ID
    pub async fn get(&self, backend_id: &str) -> Option<Backend> {
        let backends = self.backends.read().await;
        backends.get(backend_id).cloned()
    }

    pub async fn contains(&self, backend_id: &str) -> bool {
        self.backends.read().await.contains_key(backend_id)
    }

    /// Snapshot of every backend, sorted by ID
    pub async fn list(&self) -> Vec<Backend> {
        let backends = self.backends.read().await;
        let mut list: Vec<Backend> = backends.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub async fn len(&self) -> usize {
        self.backends.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.backends.read().await.is_empty()
    }

    /// Pick a backend and account for the new connection atomically.
    ///
    /// If `preferred` names a backend that is currently available it is used
    /// without calling `choose`. Otherwise `choose` receives the candidate set
    /// (healthy and under capacity, sorted by ID) and returns an index into
    /// it. The returned flag reports whether `preferred` was honored.
    pub async fn acquire<F>(
        &self,
        preferred: Option<&str>,
        choose: F,
    ) -> LoadScaleResult<(Backend, bool)>
    where
        F: FnOnce(&[&Backend]) -> Option<usize>,
    {
        let mut backends = self.backends.write().await;

        if let Some(backend) = preferred
            .and_then(|id| backends.get_mut(id))
            .filter(|b| b.is_available())
        {
            backend.current_connections += 1;
            backend.updated_at = SystemTime::now();
            return Ok((backend.clone(), true));
        }

        let chosen_id = {
            let mut candidates: Vec<&Backend> =
                backends.values().filter(|b| b.is_available()).collect();
            if candidates.is_empty() {
                return Err(LoadScaleError::NoHealthyBackends);
            }
            candidates.sort_by(|a, b| a.id.cmp(&b.id));

            let index = choose(&candidates)
                .filter(|i| *i < candidates.len())
                .ok_or(LoadScaleError::NoHealthyBackends)?;
            candidates[index].id.clone()
        };

        let backend = backends
            .get_mut(&chosen_id)
            .ok_or_else(|| LoadScaleError::internal("selected backend vanished from pool"))?;
        backend.current_connections += 1;
        backend.updated_at = SystemTime::now();
        Ok((backend.clone(), false))
    }

    /// Adjust the connection count by `delta`, clamping at zero
    pub async fn adjust_connections(&self, backend_id: &str, delta: i64) -> LoadScaleResult<u32> {
        let mut backends = self.backends.write().await;
        let backend = backends
            .get_mut(backend_id)
            .ok_or_else(|| LoadScaleError::not_found("backend", backend_id))?;

        let adjusted = (backend.current_connections as i64 + delta).clamp(0, u32::MAX as i64);
        backend.current_connections = adjusted as u32;
        backend.updated_at = SystemTime::now();
        Ok(backend.current_connections)
    }

    pub async fn set_weight(&self, backend_id: &str, weight: u32) -> LoadScaleResult<Backend> {
        if weight == 0 {
            return Err(LoadScaleError::invalid_backend("weight must be at least 1"));
        }

        let mut backends = self.backends.write().await;
        let backend = backends
            .get_mut(backend_id)
            .ok_or_else(|| LoadScaleError::not_found("backend", backend_id))?;
        backend.weight = weight;
        backend.updated_at = SystemTime::now();
        Ok(backend.clone())
    }

    /// Apply a probe result.
    ///
    /// Returns `None` when the backend is no longer registered, in which case
    /// nothing is recorded.
    pub async fn record_health(
        &self,
        backend_id: &str,
        healthy: bool,
        latency: Option<Duration>,
    ) -> Option<HealthTransition> {
        let mut backends = self.backends.write().await;
        let backend = backends.get_mut(backend_id)?;

        let previous = backend.health;
        let now = SystemTime::now();
        backend.last_health_check = Some(now);
        backend.updated_at = now;

        if healthy {
            backend.health = HealthState::Healthy;
            backend.success_count += 1;
            if latency.is_some() {
                backend.last_response_time = latency;
            }
        } else {
            backend.health = HealthState::Unhealthy;
            backend.error_count += 1;
        }

        Some(HealthTransition {
            previous,
            current: backend.health,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_backend(id: &str, max_connections: u32) -> Backend {
        Backend::new(
            id.to_string(),
            "127.0.0.1".to_string(),
            8080,
            1,
            max_connections,
        )
    }

    async fn healthy_pool(ids: &[&str]) -> BackendPool {
        let pool = BackendPool::new();
        for id in ids {
            pool.insert(create_test_backend(id, 10)).await;
            pool.record_health(id, true, Some(Duration::from_millis(5)))
                .await;
        }
        pool
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let pool = BackendPool::new();
        pool.insert(create_test_backend("b1", 10)).await;

        assert!(pool.contains("b1").await);
        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.get("b1").await.unwrap().port, 8080);

        assert!(pool.remove("b1").await.is_some());
        assert!(pool.is_empty().await);
        assert!(pool.remove("b1").await.is_none());
    }

    #[tokio::test]
    async fn test_acquire_only_offers_available_candidates() {
        let pool = healthy_pool(&["b2", "b1"]).await;
        pool.insert(create_test_backend("b3", 10)).await; // unknown health

        let (backend, sticky) = pool
            .acquire(None, |candidates| {
                let ids: Vec<&str> = candidates.iter().map(|b| b.id.as_str()).collect();
                assert_eq!(ids, vec!["b1", "b2"]);
                Some(1)
            })
            .await
            .unwrap();

        assert_eq!(backend.id, "b2");
        assert_eq!(backend.current_connections, 1);
        assert!(!sticky);
    }

    #[tokio::test]
    async fn test_acquire_prefers_available_backend() {
        let pool = healthy_pool(&["b1", "b2"]).await;

        let (backend, sticky) = pool
            .acquire(Some("b2"), |_| panic!("strategy must not run"))
            .await
            .unwrap();
        assert_eq!(backend.id, "b2");
        assert!(sticky);

        pool.record_health("b2", false, None).await;
        let (backend, sticky) = pool.acquire(Some("b2"), |_| Some(0)).await.unwrap();
        assert_eq!(backend.id, "b1");
        assert!(!sticky);
    }

    #[tokio::test]
    async fn test_acquire_without_candidates() {
        let pool = BackendPool::new();
        pool.insert(create_test_backend("b1", 10)).await;

        let result = pool.acquire(None, |_| Some(0)).await;
        assert!(matches!(result, Err(LoadScaleError::NoHealthyBackends)));
    }

    #[tokio::test]
    async fn test_adjust_connections_clamps_at_zero() {
        let pool = healthy_pool(&["b1"]).await;

        assert_eq!(pool.adjust_connections("b1", 3).await.unwrap(), 3);
        assert_eq!(pool.adjust_connections("b1", -1).await.unwrap(), 2);
        assert_eq!(pool.adjust_connections("b1", -10).await.unwrap(), 0);

        let missing = pool.adjust_connections("nope", -1).await;
        assert!(matches!(missing, Err(LoadScaleError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_record_health_transitions() {
        let pool = BackendPool::new();
        pool.insert(create_test_backend("b1", 10)).await;

        let transition = pool
            .record_health("b1", true, Some(Duration::from_millis(12)))
            .await
            .unwrap();
        assert_eq!(transition.previous, HealthState::Unknown);
        assert_eq!(transition.current, HealthState::Healthy);
        assert!(transition.changed());

        let transition = pool.record_health("b1", false, None).await.unwrap();
        assert_eq!(transition.current, HealthState::Unhealthy);

        let backend = pool.get("b1").await.unwrap();
        assert_eq!(backend.success_count, 1);
        assert_eq!(backend.error_count, 1);
        assert_eq!(backend.last_response_time, Some(Duration::from_millis(12)));
        assert!(backend.last_health_check.is_some());

        assert!(pool.record_health("gone", true, None).await.is_none());
    }

    #[tokio::test]
    async fn test_set_weight() {
        let pool = healthy_pool(&["b1"]).await;
        assert_eq!(pool.set_weight("b1", 5).await.unwrap().weight, 5);
        assert!(pool.set_weight("b1", 0).await.is_err());
        assert!(pool.set_weight("b9", 2).await.is_err());
    }
}
