//! Token cache over a [`TokenStore`].
//!
//! Store failures never fail a call: reads degrade to a miss and writes are
//! dropped, both with a warning.

use super::{ScopeKey, Token, TokenStore};
use chrono::{DateTime, Utc};
use ctp_common::CacheMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default window before expiry in which a token is already refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Stored form of a token.
#[derive(Debug, Serialize, Deserialize)]
struct TokenCacheEntry {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
    scope: String,
}

impl From<&Token> for TokenCacheEntry {
    fn from(token: &Token) -> Self {
        Self {
            access_token: token.access_token().to_string(),
            expires_at: token.expires_at(),
            scope: token.scope().to_string(),
        }
    }
}

impl From<TokenCacheEntry> for Token {
    fn from(entry: TokenCacheEntry) -> Self {
        Self::new(entry.access_token, entry.expires_at, entry.scope)
    }
}

/// One live token per [`ScopeKey`].
pub struct TokenCache {
    store: Arc<dyn TokenStore>,
    refresh_margin: Duration,
    metrics: CacheMetrics,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    /// Create a cache over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            metrics: CacheMetrics::new("ctp_token"),
        }
    }

    /// Treat tokens expiring within `margin` as expired.
    #[must_use]
    pub const fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Hit/miss/invalidation counters.
    #[must_use]
    pub const fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Live token for `key`, if any.
    pub async fn get(&self, key: &ScopeKey) -> Option<Token> {
        let cache_key = key.cache_key();
        let bytes = match self.store.get(&cache_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.metrics.record_miss();
                return None;
            }
            Err(e) => {
                warn!(scope = %key.fragment(), error = %e, "Token store read failed, treating as miss");
                self.metrics.record_miss();
                return None;
            }
        };

        let token: Token = match serde_json::from_slice::<TokenCacheEntry>(&bytes) {
            Ok(entry) => entry.into(),
            Err(e) => {
                warn!(scope = %key.fragment(), error = %e, "Discarding undecodable cached token");
                self.delete(&cache_key, key).await;
                self.metrics.record_miss();
                return None;
            }
        };

        if token.expires_within(Utc::now(), self.refresh_margin) {
            debug!(scope = %key.fragment(), "Cached token expired or about to expire");
            self.metrics.record_miss();
            return None;
        }

        self.metrics.record_hit();
        Some(token)
    }

    /// Store `token` under `key`, replacing any previous entry.
    pub async fn put(&self, key: &ScopeKey, token: &Token) {
        let bytes = match serde_json::to_vec(&TokenCacheEntry::from(token)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(scope = %key.fragment(), error = %e, "Token could not be serialized");
                return;
            }
        };

        let ttl = token
            .expires_at()
            .and_then(|at| (at - Utc::now()).to_std().ok());

        if let Err(e) = self.store.set(&key.cache_key(), &bytes, ttl).await {
            warn!(scope = %key.fragment(), error = %e, "Token store write failed");
        }
    }

    /// Remove the entry for `key`. Removing a missing entry is a no-op.
    pub async fn invalidate(&self, key: &ScopeKey) {
        self.metrics.record_invalidation();
        self.delete(&key.cache_key(), key).await;
    }

    async fn delete(&self, cache_key: &str, key: &ScopeKey) {
        if let Err(e) = self.store.delete(cache_key).await {
            warn!(scope = %key.fragment(), error = %e, "Token store delete failed");
        }
    }
}
