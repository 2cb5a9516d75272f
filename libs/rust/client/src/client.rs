//! API client: single, asynchronous and batch calls.

use crate::config::{ClientConfig, ErrorMode};
use crate::correlation::{CorrelationIdProvider, UuidCorrelationIds};
use crate::dispatch::{ApiHandle, BatchResult};
use crate::error::{ApiError, ApiResult};
use crate::executor::{CancellationFlag, RequestExecutor};
use crate::metrics::ClientMetrics;
use crate::request::{ApiRequest, NotFoundPolicy};
use crate::token::{
    ClientCredentialsProvider, EncryptedTokenStore, InMemoryTokenStore, TokenCache,
    TokenProvider, TokenStore,
};
use crate::transport::{ReqwestTransport, Transport};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Assembles a [`Client`], optionally replacing its collaborators.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    token_store: Option<Arc<dyn TokenStore>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    correlation: Option<Arc<dyn CorrelationIdProvider>>,
}

impl ClientBuilder {
    /// Send requests through `transport` instead of `reqwest`.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Keep tokens in `store` instead of process memory.
    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Obtain tokens from `provider` instead of the client-credentials flow.
    #[must_use]
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Generate correlation ids with `provider`.
    #[must_use]
    pub fn correlation_ids(mut self, provider: Arc<dyn CorrelationIdProvider>) -> Self {
        self.correlation = Some(provider);
        self
    }

    /// Validate the configuration and build the client.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] if the configuration is invalid or
    /// the HTTP client cannot be built.
    pub fn build(self) -> ApiResult<Client> {
        let config = self.config;
        config.validate()?;

        let metrics = Arc::new(ClientMetrics::new());

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(&config.http)
                    .map_err(|e| ApiError::InvalidConfig(format!("HTTP client: {e}")))?,
            ),
        };

        let tokens: Arc<dyn TokenProvider> = match self.token_provider {
            Some(provider) => provider,
            None => {
                let store: Arc<dyn TokenStore> = match self.token_store {
                    Some(store) => store,
                    None => Arc::new(InMemoryTokenStore::new()),
                };
                let store: Arc<dyn TokenStore> = match config.token_cipher()? {
                    Some(cipher) => Arc::new(EncryptedTokenStore::new(store, cipher)),
                    None => store,
                };
                let cache = TokenCache::new(store).with_refresh_margin(config.token_refresh_margin);
                Arc::new(
                    ClientCredentialsProvider::new(
                        config.token_url(),
                        &config.client_id,
                        config.client_secret.clone(),
                        transport.clone(),
                        cache,
                    )
                    .with_user_agent(&config.http.user_agent)
                    .with_metrics(metrics.clone()),
                )
            }
        };

        let correlation: Arc<dyn CorrelationIdProvider> = match self.correlation {
            Some(correlation) => correlation,
            None => Arc::new(UuidCorrelationIds),
        };

        let executor = RequestExecutor::new(
            &config.api_url,
            config.default_scope(),
            transport,
            tokens,
            correlation,
        )?
        .with_user_agent(&config.http.user_agent)
        .with_metrics(metrics);

        info!(
            project = %config.project_key,
            api_url = %config.api_url,
            error_mode = ?config.error_mode,
            "Client initialised"
        );

        Ok(Client {
            inner: Arc::new(ClientInner { config, executor }),
        })
    }
}

struct ClientInner {
    config: ClientConfig,
    executor: RequestExecutor,
}

/// Client for one project.
///
/// Cheap to clone; clones share the token cache, transport and metrics.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("project_key", &self.inner.config.project_key)
            .field("error_mode", &self.inner.config.error_mode)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client with the default transport, token store and ids.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        Self::builder(config).build()
    }

    /// Start building a client.
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            token_store: None,
            token_provider: None,
            correlation: None,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Request and token counters.
    #[must_use]
    pub fn metrics(&self) -> &ClientMetrics {
        self.inner.executor.metrics()
    }

    fn not_found_policy<R: ApiRequest>(&self, request: &R) -> NotFoundPolicy {
        match self.inner.config.error_mode {
            ErrorMode::Value => request.not_found_policy(),
            ErrorMode::Raise => NotFoundPolicy::Fail,
        }
    }

    /// Run a call and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] describing why the call failed.
    pub async fn execute<R: ApiRequest>(&self, request: &R) -> ApiResult<R::Output> {
        self.run(request, None).await
    }

    async fn run<R: ApiRequest>(
        &self,
        request: &R,
        cancel: Option<&CancellationFlag>,
    ) -> ApiResult<R::Output> {
        let descriptor = request.descriptor()?;
        let response = match cancel {
            Some(flag) => {
                self.inner
                    .executor
                    .execute_cancellable(&descriptor, flag)
                    .await?
            }
            None => self.inner.executor.execute(&descriptor).await?,
        };

        let result = request.map_response(&response, self.not_found_policy(request));
        if let Err(e) = &result {
            debug!(
                status = response.status,
                kind = ?e.kind(),
                path = %descriptor.path(),
                "Call failed"
            );
        }
        result
    }

    /// Start a call on the current Tokio runtime and return a handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] when called outside a Tokio
    /// runtime.
    pub fn execute_async<R>(&self, request: R) -> ApiResult<ApiHandle<R::Output>>
    where
        R: ApiRequest + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ApiError::InvalidConfig(format!("execute_async needs a Tokio runtime: {e}"))
        })?;
        let client = self.clone();
        let cancel = CancellationFlag::new();
        let flag = cancel.clone();
        let task = runtime.spawn(async move { client.run(&request, Some(&flag)).await });
        Ok(ApiHandle::new(task, cancel))
    }

    /// Run several calls concurrently, at most `batch_concurrency` at a time.
    ///
    /// Each request gets its own result, in request order; one failure does
    /// not affect the others.
    pub async fn execute_batch<R, I>(&self, requests: I) -> BatchResult<R::Output>
    where
        R: ApiRequest,
        I: IntoIterator<Item = R>,
    {
        let limit = self.inner.config.batch_concurrency.max(1);
        let results: Vec<_> = futures::stream::iter(requests)
            .map(|request| async move { self.execute(&request).await })
            .buffered(limit)
            .collect()
            .await;

        let batch = BatchResult::new(results);
        info!(
            requests = batch.len(),
            succeeded = batch.success_count(),
            "Batch completed"
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::request::RequestDescriptor;
    use crate::token::{ScopeKey, Token};
    use crate::transport::{HttpRequest, HttpResponse, TransportError};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies by path: `categories/missing` is 404, everything else echoes
    /// the path, optionally after a delay.
    #[derive(Default)]
    struct Echo {
        delay: Duration,
        seen: Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.url.clone());
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if request.url.ends_with("/missing") {
                return Ok(HttpResponse::new(404, r#"{"statusCode":404,"message":"missing"}"#));
            }
            Ok(HttpResponse::new(
                200,
                serde_json::json!({ "url": request.url }).to_string(),
            ))
        }
    }

    struct StaticTokens;

    #[async_trait]
    impl TokenProvider for StaticTokens {
        async fn get_token(&self, _: &ScopeKey) -> ApiResult<Token> {
            Ok(Token::new("tok", None, "manage_project:proj"))
        }

        async fn invalidate(&self, _: &ScopeKey) {}
    }

    fn client(config: ClientConfig, transport: Arc<Echo>) -> Client {
        Client::builder(config)
            .transport(transport)
            .token_provider(Arc::new(StaticTokens))
            .build()
            .unwrap()
    }

    fn config() -> ClientConfig {
        ClientConfig::new("proj", "client", "secret").with_api_url("https://api.example.com")
    }

    fn get(path: &str) -> crate::request::ExpectOptional<Value> {
        RequestDescriptor::get(path).build().expect_optional()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Client::new(ClientConfig::new("", "c", "s")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_default_client_builds() {
        assert!(Client::new(config()).is_ok());
    }

    #[tokio::test]
    async fn test_value_mode_tolerates_404() {
        let client = client(config(), Arc::new(Echo::default()));
        assert_eq!(client.execute(&get("categories/missing")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_raise_mode_surfaces_404() {
        let client = client(
            config().with_error_mode(ErrorMode::Raise),
            Arc::new(Echo::default()),
        );
        let err = client.execute(&get("categories/missing")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_isolates_failures() {
        let transport = Arc::new(Echo::default());
        let client = client(config().with_error_mode(ErrorMode::Raise), transport);

        let batch = client
            .execute_batch(vec![
                get("categories/a"),
                get("categories/missing"),
                get("categories/c"),
            ])
            .await;

        assert_eq!(batch.len(), 3);
        let first = batch.get(0).unwrap().as_ref().unwrap().as_ref().unwrap();
        assert!(first["url"].as_str().unwrap().ends_with("/categories/a"));
        assert_eq!(batch.get(1).unwrap().as_ref().unwrap_err().kind(), ErrorKind::NotFound);
        let third = batch.get(2).unwrap().as_ref().unwrap().as_ref().unwrap();
        assert!(third["url"].as_str().unwrap().ends_with("/categories/c"));
    }

    #[tokio::test]
    async fn test_batch_respects_concurrency_limit() {
        let transport = Arc::new(Echo {
            delay: Duration::from_millis(20),
            ..Echo::default()
        });
        let client = client(config().with_batch_concurrency(3), transport.clone());

        let batch = client
            .execute_batch((0..12).map(|i| get(&format!("categories/{i}"))))
            .await;

        assert_eq!(batch.success_count(), 12);
        assert!(transport.peak.load(Ordering::SeqCst) <= 3);
        assert!(transport.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let client = client(config(), Arc::new(Echo::default()));
        let batch = client.execute_batch(Vec::<crate::request::ExpectOptional<Value>>::new()).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_execute_async_resolves() {
        let client = client(config(), Arc::new(Echo::default()));
        let value = client
            .execute_async(get("categories/a"))
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert!(value["url"].as_str().unwrap().ends_with("/proj/categories/a"));
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch_skips_network() {
        let transport = Arc::new(Echo::default());
        let client = client(config(), transport.clone());

        // The spawned task cannot run before this test yields on a
        // current-thread runtime.
        client.execute_async(get("categories/a")).unwrap().cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_execute_async_outside_runtime_is_an_error() {
        let transport = Arc::new(Echo::default());
        let client = client(config(), transport.clone());

        let err = client.execute_async(get("categories/a")).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(transport.seen.lock().unwrap().is_empty());
    }
}
