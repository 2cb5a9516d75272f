//! OAuth2 client-credentials token provider.

use super::{ScopeKey, Token, TokenCache, TokenProvider};
use crate::error::{ApiError, ApiResult, ErrorResponse};
use crate::metrics::ClientMetrics;
use crate::transport::{HttpRequest, Transport};
use async_trait::async_trait;
use base64::Engine;
use chrono::{TimeDelta, Utc};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Exchanges client credentials at the token endpoint and caches the result.
///
/// Concurrent misses for the same scope wait on a per-scope lock and re-check
/// the cache once they hold it, so a burst of callers shares one exchange.
pub struct ClientCredentialsProvider {
    transport: Arc<dyn Transport>,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    user_agent: Option<String>,
    cache: TokenCache,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    metrics: Arc<ClientMetrics>,
}

impl std::fmt::Debug for ClientCredentialsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsProvider {
    /// Create a provider for one client.
    #[must_use]
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        transport: Arc<dyn Transport>,
        cache: TokenCache,
    ) -> Self {
        Self {
            transport,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
            user_agent: None,
            cache,
            refresh_locks: Mutex::new(HashMap::new()),
            metrics: Arc::new(ClientMetrics::new()),
        }
    }

    /// Send `user_agent` with token requests.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Count exchanges in shared client metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Number of exchanges performed so far.
    #[must_use]
    pub fn exchange_count(&self) -> u64 {
        self.metrics.token_exchanges.get()
    }

    async fn refresh_lock(&self, scope: &ScopeKey) -> Arc<Mutex<()>> {
        self.refresh_locks
            .lock()
            .await
            .entry(scope.cache_key())
            .or_default()
            .clone()
    }

    fn basic_auth(&self) -> ApiResult<HeaderValue> {
        let credentials = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.client_id,
            self.client_secret.expose_secret()
        ));
        let mut value = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|_| ApiError::unauthorized("client credentials cannot be encoded"))?;
        value.set_sensitive(true);
        Ok(value)
    }

    #[instrument(skip_all, fields(scope = %scope.fragment()))]
    async fn exchange(&self, scope: &ScopeKey) -> ApiResult<Token> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("scope", &scope.scope_param())
            .finish();

        let mut request = HttpRequest::new(Method::POST, &self.token_url);
        request.headers.insert(AUTHORIZATION, self.basic_auth()?);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        if let Some(agent) = self
            .user_agent
            .as_deref()
            .and_then(|a| HeaderValue::from_str(a).ok())
        {
            request.headers.insert(USER_AGENT, agent);
        }
        request.body = Some(body.into_bytes());

        self.metrics.token_exchanges.inc();
        info!(client_id = %self.client_id, "Requesting access token");

        let response = self.transport.send(request).await.map_err(|e| {
            warn!(error = %e, "Token endpoint unreachable");
            ApiError::Unauthorized {
                message: "token endpoint unreachable".to_string(),
                response: None,
                source: Some(Box::new(e)),
            }
        })?;

        if !response.is_success() {
            warn!(status = response.status, "Token exchange rejected");
            return Err(ApiError::Unauthorized {
                message: format!("token exchange rejected with status {}", response.status),
                response: Some(Box::new(ErrorResponse::from_response(&response))),
                source: None,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_slice(&response.body).map_err(|e| ApiError::Unauthorized {
                message: "token response could not be decoded".to_string(),
                response: Some(Box::new(ErrorResponse::from_response(&response))),
                source: Some(Box::new(e)),
            })?;

        let expires_at = parsed
            .expires_in
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));

        debug!(expires_at = ?expires_at, "Access token acquired");
        Ok(Token::new(
            parsed.access_token,
            expires_at,
            parsed.scope.unwrap_or_else(|| scope.scope_param()),
        ))
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn get_token(&self, scope: &ScopeKey) -> ApiResult<Token> {
        if let Some(token) = self.cache.get(scope).await {
            return Ok(token);
        }

        let lock = self.refresh_lock(scope).await;
        let _guard = lock.lock().await;

        if let Some(token) = self.cache.get(scope).await {
            debug!(scope = %scope.fragment(), "Token refreshed by a concurrent caller");
            return Ok(token);
        }

        let token = self.exchange(scope).await?;
        self.cache.put(scope, &token).await;
        Ok(token)
    }

    async fn invalidate(&self, scope: &ScopeKey) {
        debug!(scope = %scope.fragment(), "Invalidating cached token");
        self.cache.invalidate(scope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::token::InMemoryTokenStore;
    use crate::transport::{HttpResponse, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TokenEndpoint {
        status: u16,
        body: String,
        delay: Duration,
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<HttpRequest>>,
    }

    const OK_BODY: &str = r#"{"access_token":"tok-1","token_type":"Bearer","expires_in":172800,"scope":"manage_project:proj"}"#;

    impl TokenEndpoint {
        fn new(status: u16, body: &str) -> Self {
            Self {
                status,
                body: body.to_string(),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn ok() -> Arc<Self> {
            Arc::new(Self::new(200, OK_BODY))
        }

        fn replying(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self::new(status, body))
        }
    }

    #[async_trait]
    impl Transport for TokenEndpoint {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            tokio::time::sleep(self.delay).await;
            Ok(HttpResponse::new(self.status, self.body.clone()))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn send(&self, _: HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::connect("connection refused"))
        }
    }

    fn provider(transport: Arc<dyn Transport>) -> ClientCredentialsProvider {
        ClientCredentialsProvider::new(
            "https://auth.example.com/oauth/token",
            "client",
            SecretString::from("secret"),
            transport,
            TokenCache::new(Arc::new(InMemoryTokenStore::new())),
        )
    }

    fn scope() -> ScopeKey {
        ScopeKey::new("client", "proj", ["manage_project"])
    }

    #[tokio::test]
    async fn test_exchange_request_shape() {
        let endpoint = TokenEndpoint::ok();
        let provider = provider(endpoint.clone()).with_user_agent("ctp-test/1.0");

        let token = provider.get_token(&scope()).await.unwrap();
        assert_eq!(token.access_token(), "tok-1");
        assert!(token.expires_at().is_some());

        let seen = endpoint.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "https://auth.example.com/oauth/token");
        assert_eq!(request.header("authorization"), Some("Basic Y2xpZW50OnNlY3JldA=="));
        assert_eq!(request.header("content-type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(request.header("user-agent"), Some("ctp-test/1.0"));
        assert_eq!(
            request.body_text(),
            "grant_type=client_credentials&scope=manage_project%3Aproj"
        );
    }

    #[tokio::test]
    async fn test_cached_token_skips_network() {
        let endpoint = TokenEndpoint::ok();
        let provider = provider(endpoint.clone());

        provider.get_token(&scope()).await.unwrap();
        provider.get_token(&scope()).await.unwrap();

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_exchange() {
        let endpoint = TokenEndpoint::ok();
        let provider = provider(endpoint.clone());

        provider.get_token(&scope()).await.unwrap();
        provider.invalidate(&scope()).await;
        provider.invalidate(&scope()).await;
        provider.get_token(&scope()).await.unwrap();

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_exchange() {
        let endpoint = Arc::new(TokenEndpoint {
            delay: Duration::from_millis(50),
            ..TokenEndpoint::new(200, OK_BODY)
        });
        let provider = Arc::new(provider(endpoint.clone()));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.get_token(&scope()).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().access_token(), "tok-1");
        }

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_exchange_is_unauthorized() {
        let endpoint = TokenEndpoint::replying(
            401,
            r#"{"statusCode":401,"message":"Please provide valid client credentials.","errors":[{"code":"invalid_client","message":"bad"}]}"#,
        );
        let err = provider(endpoint).get_token(&scope()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.status(), Some(401));
        assert!(err.body().unwrap().contains("invalid_client"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unauthorized_with_source() {
        let err = provider(Arc::new(Unreachable))
            .get_token(&scope())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_undecodable_token_response() {
        let endpoint = TokenEndpoint::replying(200, "{}");
        let err = provider(endpoint).get_token(&scope()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
