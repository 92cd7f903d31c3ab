//! Cache-backed rolling context.

use std::sync::Arc;

use storyloom_core::capability::Cache;
use tracing::{debug, warn};

use crate::domain::state::{ContextKey, ContextSnapshot, RollingContextConfig, RollingState};

/// Loads, compacts, and stores rolling context entries.
///
/// Every cache failure degrades to an empty context: losing the digest only
/// affects prompt quality.
#[derive(Clone)]
pub struct RollingContextManager {
    cache: Arc<dyn Cache>,
    config: RollingContextConfig,
}

impl RollingContextManager {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, config: RollingContextConfig) -> Self {
        Self { cache, config }
    }

    #[must_use]
    pub fn config(&self) -> &RollingContextConfig {
        &self.config
    }

    /// Returns the context as it was before `prompt`, then appends `prompt`
    /// and writes the recompacted state back.
    pub async fn snapshot_and_append(&self, key: &ContextKey, prompt: &str) -> ContextSnapshot {
        let cache_key = key.to_string();
        let mut state = self.load(&cache_key).await;
        let snapshot = state.snapshot();

        state.append(prompt, &self.config);
        self.store(&cache_key, &state).await;

        snapshot
    }

    /// Current context without appending.
    pub async fn snapshot(&self, key: &ContextKey) -> ContextSnapshot {
        self.load(&key.to_string()).await.snapshot()
    }

    async fn load(&self, cache_key: &str) -> RollingState {
        let bytes = match self.cache.get(cache_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = cache_key, "rolling context miss");
                return RollingState::default();
            }
            Err(e) => {
                warn!(key = cache_key, error = %e, "rolling context read failed");
                return RollingState::default();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(key = cache_key, error = %e, "discarding undecodable rolling context");
            RollingState::default()
        })
    }

    async fn store(&self, cache_key: &str, state: &RollingState) {
        let bytes = match serde_json::to_vec(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = cache_key, error = %e, "rolling context encode failed");
                return;
            }
        };
        if let Err(e) = self.cache.set(cache_key, &bytes, self.config.ttl).await {
            warn!(key = cache_key, error = %e, "rolling context write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use storyloom_core::capability::Cache;
    use storyloom_core::model::ArtifactType;
    use storyloom_test_support::{FailingCache, MemoryCache};
    use uuid::Uuid;

    use super::RollingContextManager;
    use crate::domain::state::{ContextKey, RollingContextConfig, RollingState};

    fn key() -> ContextKey {
        ContextKey {
            tenant_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            task: ArtifactType::Worldview,
        }
    }

    #[tokio::test]
    async fn test_snapshot_excludes_the_new_prompt() {
        // Arrange
        let cache = Arc::new(MemoryCache::new());
        let manager = RollingContextManager::new(cache.clone(), RollingContextConfig::default());
        let key = key();

        // Act
        let first = manager.snapshot_and_append(&key, "a city of bells").await;
        let second = manager.snapshot_and_append(&key, "the bells stop").await;

        // Assert
        assert!(first.recent_turns_text.is_empty());
        assert_eq!(second.recent_turns_text, "a city of bells");
    }

    #[tokio::test]
    async fn test_state_is_written_with_ttl() {
        // Arrange
        let cache = Arc::new(MemoryCache::new());
        let config = RollingContextConfig::default();
        let manager = RollingContextManager::new(cache.clone(), config);
        let key = key();

        // Act
        manager.snapshot_and_append(&key, "hello").await;

        // Assert
        let cache_key = key.to_string();
        assert_eq!(cache.ttl_of(&cache_key), Some(config.ttl));
        let bytes = cache.get(&cache_key).await.unwrap().unwrap();
        let state: RollingState = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(state.turn_count, 1);
        assert_eq!(state.recent_user_turns, vec!["hello".to_owned()]);
    }

    #[tokio::test]
    async fn test_contexts_are_isolated_per_task() {
        // Arrange
        let cache = Arc::new(MemoryCache::new());
        let manager = RollingContextManager::new(cache.clone(), RollingContextConfig::default());
        let worldview = key();
        let outline = ContextKey {
            task: ArtifactType::Outline,
            ..worldview
        };
        manager.snapshot_and_append(&worldview, "seas").await;

        // Act
        let snapshot = manager.snapshot(&outline).await;

        // Assert
        assert!(snapshot.recent_turns_text.is_empty());
        assert_eq!(cache.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_treated_as_empty() {
        // Arrange
        let cache = Arc::new(MemoryCache::new());
        let key = key();
        cache
            .set(&key.to_string(), b"not json", RollingContextConfig::default().ttl)
            .await
            .unwrap();
        let manager = RollingContextManager::new(cache.clone(), RollingContextConfig::default());

        // Act
        let snapshot = manager.snapshot_and_append(&key, "fresh start").await;

        // Assert
        assert!(snapshot.recent_turns_text.is_empty());
        assert_eq!(manager.snapshot(&key).await.recent_turns_text, "fresh start");
    }

    #[tokio::test]
    async fn test_unreachable_cache_yields_empty_context() {
        // Arrange
        let manager =
            RollingContextManager::new(Arc::new(FailingCache), RollingContextConfig::default());

        // Act
        let snapshot = manager.snapshot_and_append(&key(), "anything").await;

        // Assert
        assert!(snapshot.summary.is_empty());
        assert!(snapshot.recent_turns_text.is_empty());
    }
}
