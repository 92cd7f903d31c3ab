//! Redis implementation of the `Cache` port, plus a no-op stand-in for
//! deployments without Redis.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::Pool;
use bb8_redis::redis::AsyncCommands;
use tracing::info;

use storyloom_core::capability::{Cache, CapabilityError};

/// Redis-backed cache over a `bb8` connection pool.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool<RedisConnectionManager>,
}

impl RedisCache {
    /// Creates a new `RedisCache` from an existing pool.
    #[must_use]
    pub fn new(pool: Pool<RedisConnectionManager>) -> Self {
        Self { pool }
    }

    /// Builds a pool for `url`.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityError::Unavailable` if the URL is invalid or no
    /// connection can be established.
    pub async fn connect(url: &str) -> Result<Self, CapabilityError> {
        let manager = RedisConnectionManager::new(url)
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;
        let pool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;
        info!("connected to redis");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CapabilityError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| CapabilityError::Failed(e.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CapabilityError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| CapabilityError::Failed(e.to_string()))
    }
}

/// Cache that stores nothing. Every read misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CapabilityError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CapabilityError> {
        Ok(())
    }
}
