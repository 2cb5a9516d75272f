//! Authenticated request execution.
//!
//! One logical call runs the state machine below. A 401 on the first
//! dispatch invalidates the token and dispatches once more; a second 401 is
//! final.
//!
//! ```text
//! Idle -> TokenResolved -> Dispatched -> Succeeded
//!                              |    \--> Failed
//!                              \-> Retrying -> TokenResolved
//! ```

use crate::config::parse_base_url;
use crate::correlation::{CORRELATION_ID_HEADER, CorrelationIdProvider};
use crate::error::{ApiError, ApiResult, ErrorResponse};
use crate::metrics::ClientMetrics;
use crate::request::RequestDescriptor;
use crate::token::{ScopeKey, TokenProvider};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

/// Dispatches per logical call: the original plus one retry after a 401.
pub const MAX_DISPATCHES: u32 = 2;

/// Stage of one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Descriptor received
    Idle,
    /// Token and headers attached
    TokenResolved,
    /// Request handed to the transport
    Dispatched,
    /// Final response received
    Succeeded,
    /// Token invalidated after a 401
    Retrying,
    /// Call ended with an error
    Failed,
}

impl ExecutionState {
    /// Check whether `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Retrying, Self::TokenResolved)
                | (Self::TokenResolved, Self::Dispatched)
                | (Self::Dispatched, Self::Succeeded | Self::Retrying)
                | (Self::Idle | Self::TokenResolved | Self::Dispatched | Self::Retrying, Self::Failed)
        )
    }

    /// Check for a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

struct Execution {
    state: ExecutionState,
}

impl Execution {
    const fn new() -> Self {
        Self {
            state: ExecutionState::Idle,
        }
    }

    fn advance(&mut self, next: ExecutionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        trace!(from = ?self.state, to = ?next, "Execution state");
        self.state = next;
    }

    fn fail(&mut self, error: ApiError) -> ApiError {
        self.advance(ExecutionState::Failed);
        error
    }
}

/// Shared cancellation signal checked before each dispatch.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs descriptors against the API with token handling and retry.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    correlation: Arc<dyn CorrelationIdProvider>,
    api_url: Url,
    project_key: String,
    default_scope: ScopeKey,
    user_agent: Option<HeaderValue>,
    metrics: Arc<ClientMetrics>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("api_url", &self.api_url.as_str())
            .field("project_key", &self.project_key)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Create an executor for one project.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] if `api_url` is not an http(s) URL.
    pub fn new(
        api_url: &str,
        default_scope: ScopeKey,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        correlation: Arc<dyn CorrelationIdProvider>,
    ) -> ApiResult<Self> {
        Ok(Self {
            transport,
            tokens,
            correlation,
            api_url: parse_base_url("api_url", api_url)?,
            project_key: default_scope.fragment().to_string(),
            default_scope,
            user_agent: None,
            metrics: Arc::new(ClientMetrics::new()),
        })
    }

    /// Send `user_agent` with every call. Invalid header values are ignored.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = HeaderValue::from_str(user_agent).ok();
        self
    }

    /// Record into shared metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics recorded by this executor.
    #[must_use]
    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    /// Run one logical call.
    ///
    /// Returns the final response for every status except a second 401.
    ///
    /// # Errors
    ///
    /// - [`ApiError::InvalidInput`] for an undispatchable descriptor
    /// - [`ApiError::Unauthorized`] if no token can be obtained or the retried
    ///   dispatch is rejected again
    /// - [`ApiError::Transport`] if no response was received
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> ApiResult<HttpResponse> {
        self.run(descriptor, None).await
    }

    /// Run one logical call, stopping before dispatch once `cancel` is set.
    ///
    /// # Errors
    ///
    /// As [`RequestExecutor::execute`], plus a cancelled [`ApiError::Transport`].
    pub async fn execute_cancellable(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationFlag,
    ) -> ApiResult<HttpResponse> {
        self.run(descriptor, Some(cancel)).await
    }

    #[instrument(
        name = "execute",
        skip_all,
        fields(method = %descriptor.method(), path = %descriptor.path())
    )]
    async fn run(
        &self,
        descriptor: &RequestDescriptor,
        cancel: Option<&CancellationFlag>,
    ) -> ApiResult<HttpResponse> {
        let mut execution = Execution::new();

        if let Err(e) = descriptor.validate() {
            return Err(execution.fail(e));
        }
        let url = match self.url_for(descriptor) {
            Ok(url) => url,
            Err(e) => return Err(execution.fail(e)),
        };
        let scope = self.default_scope.with_override(descriptor.scope());

        for attempt in 1..=MAX_DISPATCHES {
            let token = match self.tokens.get_token(&scope).await {
                Ok(token) => token,
                Err(e) => return Err(execution.fail(e)),
            };
            execution.advance(ExecutionState::TokenResolved);

            let correlation_id = self.correlation.next_id(scope.fragment());
            let request = self.build_request(descriptor, &url, &token.bearer(), &correlation_id);

            if cancel.is_some_and(CancellationFlag::is_cancelled) {
                debug!(correlation_id = %correlation_id, "Call cancelled before dispatch");
                return Err(execution.fail(TransportError::cancelled().into()));
            }

            info!(
                correlation_id = %correlation_id,
                method = %descriptor.method(),
                path = %descriptor.relative_url(),
                scope = %scope.fragment(),
                attempt,
                "Dispatching request"
            );
            execution.advance(ExecutionState::Dispatched);
            let response = self.dispatch(request).await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(correlation_id = %correlation_id, error = %e, "No response received");
                    return Err(execution.fail(e.into()));
                }
            };

            if response.status == 401 {
                if attempt < MAX_DISPATCHES {
                    warn!(correlation_id = %correlation_id, "Access token rejected, refreshing");
                    execution.advance(ExecutionState::Retrying);
                    self.tokens.invalidate(&scope).await;
                    self.metrics.auth_retries.inc();
                    continue;
                }
                warn!(correlation_id = %correlation_id, "Access token rejected after refresh");
                let details = ErrorResponse::from_response(&response);
                return Err(execution.fail(ApiError::Unauthorized {
                    message: details
                        .message
                        .clone()
                        .unwrap_or_else(|| "access token rejected after refresh".to_string()),
                    response: Some(Box::new(details)),
                    source: None,
                }));
            }

            debug!(correlation_id = %correlation_id, status = response.status, "Response received");
            execution.advance(ExecutionState::Succeeded);
            return Ok(response);
        }

        Err(execution.fail(ApiError::unauthorized("access token rejected")))
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.metrics.requests.inc();
        let in_flight = self.metrics.track_in_flight();
        let result = self.transport.send(request).await;
        drop(in_flight);
        if result.is_err() {
            self.metrics.transport_failures.inc();
        }
        result
    }

    fn url_for(&self, descriptor: &RequestDescriptor) -> ApiResult<String> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidConfig("api_url cannot carry a path".to_string()))?
            .pop_if_empty()
            .push(&self.project_key)
            .extend(descriptor.segments());
        if !descriptor.query().is_empty() {
            url.query_pairs_mut().extend_pairs(descriptor.query());
        }
        Ok(url.into())
    }

    fn build_request(
        &self,
        descriptor: &RequestDescriptor,
        url: &str,
        bearer: &str,
        correlation_id: &str,
    ) -> HttpRequest {
        let mut headers = HeaderMap::new();
        if let Ok(mut value) = HeaderValue::from_str(bearer) {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(CORRELATION_ID_HEADER.as_bytes()),
            HeaderValue::from_str(correlation_id),
        ) {
            headers.insert(name, value);
        }
        if let Some(agent) = &self.user_agent {
            headers.insert(USER_AGENT, agent.clone());
        }
        if let Some(content_type) = descriptor
            .body()
            .and_then(|b| HeaderValue::from_str(b.content_type()).ok())
        {
            headers.insert(CONTENT_TYPE, content_type);
        }

        HttpRequest {
            method: descriptor.method().clone(),
            url: url.to_string(),
            headers,
            body: descriptor.body().map(|b| b.bytes().to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::UuidCorrelationIds;
    use crate::error::ErrorKind;
    use crate::token::Token;
    use async_trait::async_trait;
    use reqwest::Method;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Script {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Script {
        fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::default(),
            })
        }

        fn seen(&self) -> Vec<HttpRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Script {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "{}")))
        }
    }

    #[derive(Default)]
    struct CountingTokens {
        issued: AtomicUsize,
        invalidated: AtomicUsize,
    }

    #[async_trait]
    impl TokenProvider for CountingTokens {
        async fn get_token(&self, _: &ScopeKey) -> ApiResult<Token> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Token::new(format!("tok-{n}"), None, "manage_project:proj"))
        }

        async fn invalidate(&self, _: &ScopeKey) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NoTokens;

    #[async_trait]
    impl TokenProvider for NoTokens {
        async fn get_token(&self, _: &ScopeKey) -> ApiResult<Token> {
            Err(ApiError::unauthorized("invalid client"))
        }

        async fn invalidate(&self, _: &ScopeKey) {}
    }

    fn executor(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenProvider>) -> RequestExecutor {
        RequestExecutor::new(
            "https://api.example.com",
            ScopeKey::new("client", "proj", ["manage_project"]),
            transport,
            tokens,
            Arc::new(UuidCorrelationIds),
        )
        .unwrap()
        .with_user_agent("ctp-test/1.0")
    }

    #[test]
    fn test_state_transitions() {
        use ExecutionState::{Dispatched, Failed, Idle, Retrying, Succeeded, TokenResolved};
        assert!(Idle.can_transition_to(TokenResolved));
        assert!(Dispatched.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(TokenResolved));
        assert!(!Idle.can_transition_to(Dispatched));
        assert!(!Succeeded.can_transition_to(Retrying));
        assert!(!Failed.can_transition_to(TokenResolved));
        assert!(Succeeded.is_terminal() && Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_request_carries_auth_and_correlation() {
        let transport = Script::new(vec![]);
        let executor = executor(transport.clone(), Arc::new(CountingTokens::default()));

        let descriptor = RequestDescriptor::get("categories")
            .query("where", "key = \"a b\"")
            .build();
        executor.execute(&descriptor).await.unwrap();

        let sent = &transport.seen()[0];
        assert_eq!(sent.method, Method::GET);
        assert_eq!(
            sent.url,
            "https://api.example.com/proj/categories?where=key+%3D+%22a+b%22"
        );
        assert_eq!(sent.header("authorization"), Some("Bearer tok-1"));
        assert_eq!(sent.header("user-agent"), Some("ctp-test/1.0"));
        assert!(sent.header(CORRELATION_ID_HEADER).unwrap().starts_with("proj/"));
    }

    #[tokio::test]
    async fn test_path_segments_are_encoded() {
        let transport = Script::new(vec![]);
        let executor = RequestExecutor::new(
            "https://api.example.com/",
            ScopeKey::new("client", "proj", ["manage_project"]),
            transport.clone(),
            Arc::new(CountingTokens::default()),
            Arc::new(UuidCorrelationIds),
        )
        .unwrap();

        executor
            .execute(&RequestDescriptor::get("/categories/key=a b/").build())
            .await
            .unwrap();
        assert_eq!(
            transport.seen()[0].url,
            "https://api.example.com/proj/categories/key=a%20b"
        );

        executor
            .execute(&RequestDescriptor::delete("categories").segment("x/y").build())
            .await
            .unwrap();
        assert_eq!(
            transport.seen()[1].url,
            "https://api.example.com/proj/categories/x%2Fy"
        );
    }

    struct Hang;

    #[async_trait]
    impl Transport for Hang {
        async fn send(&self, _: HttpRequest) -> Result<HttpResponse, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_dropped_dispatch_releases_in_flight() {
        let executor = executor(Arc::new(Hang), Arc::new(CountingTokens::default()));
        let descriptor = RequestDescriptor::get("categories").build();

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            executor.execute(&descriptor),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(executor.metrics().requests.get(), 1);
        assert_eq!(executor.metrics().in_flight.get(), 0);
    }

    #[tokio::test]
    async fn test_body_and_content_type() {
        let transport = Script::new(vec![]);
        let executor = executor(transport.clone(), Arc::new(CountingTokens::default()));

        let descriptor = RequestDescriptor::post("categories")
            .json(&serde_json::json!({"key": "k"}))
            .unwrap()
            .build();
        executor.execute(&descriptor).await.unwrap();

        let sent = &transport.seen()[0];
        assert_eq!(sent.header("content-type"), Some("application/json"));
        assert_eq!(sent.body_text(), r#"{"key":"k"}"#);
    }

    #[tokio::test]
    async fn test_single_retry_after_401() {
        let transport = Script::new(vec![
            Ok(HttpResponse::new(401, "{}")),
            Ok(HttpResponse::new(200, r#"{"id":"c1"}"#)),
        ]);
        let tokens = Arc::new(CountingTokens::default());
        let executor = executor(transport.clone(), tokens.clone());

        let response = executor
            .execute(&RequestDescriptor::get("categories/c1").build())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(tokens.invalidated.load(Ordering::SeqCst), 1);
        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].header("authorization"), Some("Bearer tok-2"));
        assert_ne!(
            seen[0].header(CORRELATION_ID_HEADER),
            seen[1].header(CORRELATION_ID_HEADER)
        );
        assert_eq!(executor.metrics().auth_retries.get(), 1);
        assert_eq!(executor.metrics().requests.get(), 2);
    }

    #[tokio::test]
    async fn test_second_401_is_final() {
        let transport = Script::new(vec![
            Ok(HttpResponse::new(401, "{}")),
            Ok(HttpResponse::new(401, r#"{"message":"invalid_token"}"#)),
            Ok(HttpResponse::new(200, "{}")),
        ]);
        let tokens = Arc::new(CountingTokens::default());
        let executor = executor(transport.clone(), tokens.clone());

        let err = executor
            .execute(&RequestDescriptor::get("categories").build())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.status(), Some(401));
        assert_eq!(transport.seen().len(), 2);
        assert_eq!(tokens.invalidated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_not_retried() {
        let transport = Script::new(vec![Err(TransportError::timeout("30s elapsed"))]);
        let executor = executor(transport.clone(), Arc::new(CountingTokens::default()));

        let err = executor
            .execute(&RequestDescriptor::get("categories").build())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(transport.seen().len(), 1);
        assert_eq!(executor.metrics().transport_failures.get(), 1);
        assert_eq!(executor.metrics().in_flight.get(), 0);
    }

    #[tokio::test]
    async fn test_error_statuses_pass_through() {
        let transport = Script::new(vec![Ok(HttpResponse::new(409, "{}"))]);
        let executor = executor(transport, Arc::new(CountingTokens::default()));

        let response = executor
            .execute(&RequestDescriptor::post("categories/c1").build())
            .await
            .unwrap();
        assert_eq!(response.status, 409);
    }

    #[tokio::test]
    async fn test_invalid_descriptor_never_dispatches() {
        let transport = Script::new(vec![]);
        let executor = executor(transport.clone(), Arc::new(CountingTokens::default()));

        let err = executor
            .execute(&RequestDescriptor::get("").build())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_token_failure_never_dispatches() {
        let transport = Script::new(vec![]);
        let executor = executor(transport.clone(), Arc::new(NoTokens));

        let err = executor
            .execute(&RequestDescriptor::get("categories").build())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let transport = Script::new(vec![]);
        let executor = executor(transport.clone(), Arc::new(CountingTokens::default()));
        let flag = CancellationFlag::new();
        flag.cancel();

        let err = executor
            .execute_cancellable(&RequestDescriptor::get("categories").build(), &flag)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(transport.seen().is_empty());
    }
}
