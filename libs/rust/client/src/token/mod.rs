//! Access tokens: acquisition, caching and invalidation.
//!
//! - [`ClientCredentialsProvider`] exchanges client credentials for tokens
//! - [`TokenCache`] keeps one live token per [`ScopeKey`] in a [`TokenStore`]
//! - stores: [`InMemoryTokenStore`], [`EncryptedTokenStore`] and, with the
//!   `redis` feature, `RedisTokenStore`

mod cache;
mod provider;
mod store;

#[cfg(feature = "redis")]
mod redis_store;

pub use cache::TokenCache;
pub use provider::ClientCredentialsProvider;
pub use store::{EncryptedTokenStore, InMemoryTokenStore, TokenStore};

#[cfg(feature = "redis")]
pub use redis_store::RedisTokenStore;

use crate::error::ApiResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;

/// Identifies which token serves a call: client, project and scopes.
///
/// Scopes are normalised (`manage_project` becomes
/// `manage_project:{project_key}`), sorted and de-duplicated, so equivalent
/// scope lists share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    client_id: String,
    project_key: String,
    scopes: Vec<String>,
}

impl ScopeKey {
    /// Create a key.
    #[must_use]
    pub fn new<I, S>(client_id: impl Into<String>, project_key: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let project_key = project_key.into();
        let mut scopes: Vec<String> = scopes
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.contains(':') {
                    s
                } else {
                    format!("{s}:{project_key}")
                }
            })
            .collect();
        scopes.sort();
        scopes.dedup();

        Self {
            client_id: client_id.into(),
            project_key,
            scopes,
        }
    }

    /// Key for a call requiring `scope`; `None` keeps this key.
    #[must_use]
    pub fn with_override(&self, scope: Option<&str>) -> Self {
        scope.map_or_else(
            || self.clone(),
            |s| Self::new(&self.client_id, &self.project_key, [s]),
        )
    }

    /// Client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Project key; the identifying fragment used in logs and correlation ids.
    #[must_use]
    pub fn fragment(&self) -> &str {
        &self.project_key
    }

    /// Normalised scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Space-separated scopes, as sent to the token endpoint.
    #[must_use]
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Key under which the token is stored.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "ctp-token:{}:{}:{}",
            self.client_id,
            self.project_key,
            self.scope_param()
        )
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.project_key, self.scope_param())
    }
}

/// Bearer token.
#[derive(Debug, Clone)]
pub struct Token {
    access_token: SecretString,
    expires_at: Option<DateTime<Utc>>,
    scope: String,
}

impl Token {
    /// Create a token.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            expires_at,
            scope: scope.into(),
        }
    }

    /// Raw access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// Expiry, if the issuer reported one.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Scope granted by the issuer.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Check whether the token expires within `margin` of `now`.
    ///
    /// Tokens without an expiry never expire by time.
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(margin)
            .is_none_or(|deadline| deadline >= expires_at)
    }

    /// `Authorization` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

/// Supplies tokens for a scope and forgets rejected ones.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a live token, acquiring one if none is cached.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ApiError::Unauthorized`] when no token can be obtained.
    async fn get_token(&self, scope: &ScopeKey) -> ApiResult<Token>;

    /// Drop the cached token for `scope`. Safe when none is cached.
    async fn invalidate(&self, scope: &ScopeKey);
}
