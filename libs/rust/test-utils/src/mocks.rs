//! Test doubles for the client's collaborators.

use async_trait::async_trait;
use ctp_client::{
    ApiResult, CorrelationIdProvider, HttpRequest, HttpResponse, ScopeKey, Token, TokenProvider,
    Transport, TransportError,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

type Reply = Result<HttpResponse, TransportError>;
type Responder = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Transport that replays scripted replies in order and records requests.
///
/// Once the script is exhausted every call gets the responder's reply, or
/// the fallback (`200 {}` unless set).
pub struct MockTransport {
    script: Arc<RwLock<VecDeque<Reply>>>,
    fallback: Arc<RwLock<HttpResponse>>,
    responder: Option<Responder>,
    requests: Arc<RwLock<Vec<HttpRequest>>>,
    delay: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            script: Arc::default(),
            fallback: Arc::new(RwLock::new(HttpResponse::new(200, "{}"))),
            responder: None,
            requests: Arc::default(),
            delay: Duration::ZERO,
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("delay", &self.delay)
            .field("responder", &self.responder.is_some())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    /// Create a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer unscripted requests by calling `responder`.
    #[must_use]
    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(responder)),
            ..Self::default()
        }
    }

    /// Sleep for `delay` before each reply.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a response.
    pub async fn push_response(&self, response: HttpResponse) {
        self.script.write().await.push_back(Ok(response));
    }

    /// Queue a JSON response.
    pub async fn push_json(&self, status: u16, body: &serde_json::Value) {
        self.push_response(HttpResponse::new(status, body.to_string())).await;
    }

    /// Queue a transport failure.
    pub async fn push_error(&self, error: TransportError) {
        self.script.write().await.push_back(Err(error));
    }

    /// Reply used once the script runs out.
    pub async fn set_fallback(&self, response: HttpResponse) {
        *self.fallback.write().await = response;
    }

    /// Requests received so far, in order.
    pub async fn requests(&self) -> Vec<HttpRequest> {
        self.requests.read().await.clone()
    }

    /// Number of requests received.
    pub async fn request_count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Requests whose URL ends with `suffix`.
    pub async fn requests_to(&self, suffix: &str) -> Vec<HttpRequest> {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let unscripted = self.responder.as_ref().map(|respond| respond(&request));
        self.requests.write().await.push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.write().await.pop_front();
        match (next, unscripted) {
            (Some(reply), _) => reply,
            (None, Some(response)) => Ok(response),
            (None, None) => Ok(self.fallback.read().await.clone()),
        }
    }
}

/// Token provider that mints `token-1`, `token-2`, ... and counts calls.
///
/// A new token is only minted after [`TokenProvider::invalidate`].
#[derive(Debug, Default)]
pub struct CountingTokenProvider {
    generation: AtomicU64,
    requests: AtomicU64,
    invalidations: AtomicU64,
}

impl CountingTokenProvider {
    /// Create a provider whose first token is `token-1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_token` calls.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of `invalidate` calls.
    #[must_use]
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingTokenProvider {
    async fn get_token(&self, scope: &ScopeKey) -> ApiResult<Token> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst) + 1;
        Ok(Token::new(
            format!("token-{generation}"),
            None,
            scope.scope_param(),
        ))
    }

    async fn invalidate(&self, _scope: &ScopeKey) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Correlation ids `{scope}/req-1`, `{scope}/req-2`, ...
#[derive(Debug, Default)]
pub struct FixedCorrelationIds {
    next: AtomicU64,
}

impl FixedCorrelationIds {
    /// Create a sequence starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CorrelationIdProvider for FixedCorrelationIds {
    fn next_id(&self, scope_identifier: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{scope_identifier}/req-{n}")
    }
}
