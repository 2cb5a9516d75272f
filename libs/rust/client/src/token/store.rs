//! Byte-level token storage backends.

use async_trait::async_trait;
use ctp_common::{PayloadCipher, PlatformError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Key-value store holding serialized tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read a value. Expired values read as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlatformError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PlatformError>;

    /// Delete a value. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn delete(&self, key: &str) -> Result<(), PlatformError>;
}

#[async_trait]
impl<S: TokenStore + ?Sized> TokenStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlatformError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PlatformError> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), PlatformError> {
        (**self).delete(key).await
    }
}

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryTokenStore {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl std::fmt::Debug for InMemoryTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTokenStore").finish_non_exhaustive()
    }
}

impl InMemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|v| v.is_live(now))
            .count()
    }

    /// Check for no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlatformError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.bytes.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PlatformError> {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries.write().await.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PlatformError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Store wrapper that seals values with AES-256-GCM before writing them.
#[derive(Debug)]
pub struct EncryptedTokenStore<S> {
    inner: S,
    cipher: PayloadCipher,
}

impl<S: TokenStore> EncryptedTokenStore<S> {
    /// Wrap `inner`.
    #[must_use]
    pub const fn new(inner: S, cipher: PayloadCipher) -> Self {
        Self { inner, cipher }
    }

    /// Wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: TokenStore> TokenStore for EncryptedTokenStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlatformError> {
        match self.inner.get(key).await? {
            Some(sealed) => self.cipher.open(&sealed).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PlatformError> {
        let sealed = self.cipher.seal(value)?;
        self.inner.set(key, &sealed, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), PlatformError> {
        self.inner.delete(key).await
    }
}
