//! Redis-backed token store, shared between processes.

use super::TokenStore;
use async_trait::async_trait;
use ctp_common::PlatformError;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// [`TokenStore`] on a Redis connection manager.
///
/// Values carry a Redis TTL (`SET EX`), so expired tokens disappear on
/// their own. Wrap in [`super::EncryptedTokenStore`] to keep tokens sealed
/// at rest.
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: ConnectionManager,
    namespace: String,
}

impl std::fmt::Debug for RedisTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTokenStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RedisTokenStore {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Unavailable`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(redis_url: &str) -> Result<Self, PlatformError> {
        let client = redis::Client::open(redis_url).map_err(redis_error)?;
        let conn = ConnectionManager::new(client).await.map_err(redis_error)?;
        Ok(Self {
            conn,
            namespace: String::new(),
        })
    }

    /// Prefix every key with `namespace:`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.namespace)
        }
    }
}

fn redis_error(err: redis::RedisError) -> PlatformError {
    PlatformError::unavailable(format!("redis: {err}"))
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlatformError> {
        let mut conn = self.conn.clone();
        conn.get(self.key(key)).await.map_err(redis_error)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PlatformError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        match ttl.map(|t| t.as_secs().max(1)) {
            Some(secs) => conn.set_ex::<_, _, ()>(key, value, secs).await,
            None => conn.set::<_, _, ()>(key, value).await,
        }
        .map_err(redis_error)
    }

    async fn delete(&self, key: &str) -> Result<(), PlatformError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key)).await.map_err(redis_error)
    }
}
