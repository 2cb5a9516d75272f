//! End-to-end scenarios over real HTTP against a mock platform.

use ctp_client::resource::{ByIdGetRequest, QueryRequest, UpdateByIdRequest};
use ctp_client::{ApiError, Client, ErrorKind, ErrorMode, RequestDescriptor};
use ctp_common::HttpConfig;
use ctp_integration_tests::{MockPlatform, PROJECT_KEY};
use ctp_test_utils::LogCapture;
use ctp_test_utils::fixtures::{
    Categories, CategoryUpdate, category_json, category_page, concurrent_modification_body, en,
    not_found_body,
};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_query_with_cold_token_cache() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok-1", None).await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories")))
        .and(query_param("limit", "2"))
        .and(header("authorization", "Bearer tok-1"))
        .and(header_exists("x-correlation-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(category_page(&["a", "b"])))
        .expect(2)
        .mount(platform.server())
        .await;

    let client = assert_ok!(Client::new(platform.config()));
    let page = assert_ok!(client.execute(&QueryRequest::<Categories>::new().limit(2)).await);
    assert_eq!(page.count, 2);
    assert_eq!(page.results[0].name["en"], "Category a");

    assert_ok!(client.execute(&QueryRequest::<Categories>::new().limit(2)).await);
    assert_eq!(platform.token_requests().await, 1);
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_once() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok-stale", Some(1)).await;
    platform.issue_token("tok-fresh", None).await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories/a")))
        .and(header("authorization", "Bearer tok-stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(platform.server())
        .await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories/a")))
        .and(header("authorization", "Bearer tok-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(category_json("a", 2)))
        .expect(1)
        .mount(platform.server())
        .await;

    let client = assert_ok!(Client::new(platform.config()));
    let category = assert_ok!(client.execute(&ByIdGetRequest::<Categories>::new("a")).await);

    assert_eq!(category.map(|c| c.version), Some(2));
    assert_eq!(platform.token_requests().await, 2);
    assert_eq!(client.metrics().auth_retries.get(), 1);
}

#[tokio::test]
async fn test_second_rejection_is_final() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok", None).await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories")))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "statusCode": 401,
            "message": "invalid_token",
        })))
        .expect(2)
        .mount(platform.server())
        .await;

    let client = assert_ok!(Client::new(platform.config()));
    let err = assert_err!(client.execute(&QueryRequest::<Categories>::new()).await);

    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn test_conflict_carries_current_version() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok", None).await;
    Mock::given(method("POST"))
        .and(path(MockPlatform::api_path("categories/a")))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(409).set_body_json(concurrent_modification_body(9)))
        .mount(platform.server())
        .await;

    let client = assert_ok!(Client::new(platform.config()));
    let request = UpdateByIdRequest::<Categories>::new("a", 3).action(CategoryUpdate::ChangeName {
        name: en("Renamed"),
    });
    let err = assert_err!(client.execute(&request).await);

    assert!(matches!(
        err,
        ApiError::Conflict {
            current_version: Some(9),
            ..
        }
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_rate_limit_is_not_retried() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok", None).await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories")))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .expect(1)
        .mount(platform.server())
        .await;

    let client = assert_ok!(Client::new(platform.config()));
    let err = assert_err!(client.execute(&QueryRequest::<Categories>::new()).await);

    match &err {
        ApiError::RateLimited { retry_after, .. } => assert_eq!(retry_after.as_deref(), Some("30")),
        other => panic!("expected rate limit, got {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_not_found_per_error_mode() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok", None).await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories/missing")))
        .respond_with(ResponseTemplate::new(404).set_body_json(not_found_body("missing")))
        .mount(platform.server())
        .await;

    let request = ByIdGetRequest::<Categories>::new("missing");

    let tolerant = assert_ok!(Client::new(platform.config()));
    assert_eq!(assert_ok!(tolerant.execute(&request).await), None);

    let strict = assert_ok!(Client::new(
        platform.config().with_error_mode(ErrorMode::Raise)
    ));
    let err = assert_err!(strict.execute(&request).await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.body().unwrap_or_default().contains("missing"));
}

#[tokio::test]
async fn test_batch_isolates_failures_in_order() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok", None).await;
    for id in ["a", "c"] {
        Mock::given(method("GET"))
            .and(path(MockPlatform::api_path(&format!("categories/{id}"))))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(category_json(id, 1))
                    .set_delay(Duration::from_millis(if id == "a" { 150 } else { 0 })),
            )
            .mount(platform.server())
            .await;
    }
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories/b")))
        .respond_with(ResponseTemplate::new(500))
        .mount(platform.server())
        .await;

    let client = assert_ok!(Client::new(platform.config().with_batch_concurrency(3)));
    let requests = ["a", "b", "c"]
        .into_iter()
        .map(|id| RequestDescriptor::get(format!("categories/{id}")).build().expect::<serde_json::Value>());
    let batch = client.execute_batch(requests).await;

    assert_eq!(batch.len(), 3);
    assert_eq!(batch.success_count(), 2);
    let ids: Vec<Option<String>> = batch
        .iter()
        .map(|r| r.as_ref().ok().map(|v| v["id"].as_str().unwrap_or_default().to_string()))
        .collect();
    assert_eq!(ids, vec![Some("a".to_string()), None, Some("c".to_string())]);
    let (index, err) = batch.failures().next().unwrap();
    assert_eq!(index, 1);
    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(platform.token_requests().await, 1);
}

#[tokio::test]
async fn test_async_handle_and_cancellation() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok", None).await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories/a")))
        .respond_with(ResponseTemplate::new(200).set_body_json(category_json("a", 1)))
        .expect(1)
        .mount(platform.server())
        .await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories/never")))
        .respond_with(ResponseTemplate::new(200).set_body_json(category_json("never", 1)))
        .expect(0)
        .mount(platform.server())
        .await;

    let client = assert_ok!(Client::new(platform.config()));

    let pending = assert_ok!(client.execute_async(ByIdGetRequest::<Categories>::new("a")));
    let cancelled = assert_ok!(client.execute_async(ByIdGetRequest::<Categories>::new("never")));
    cancelled.cancel();

    let category = assert_ok!(pending.await);
    assert_eq!(category.map(|c| c.id), Some("a".to_string()));
}

#[tokio::test]
async fn test_timeout_is_transport_error() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok", None).await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories")))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(platform.server())
        .await;

    let config = platform
        .config()
        .with_http(HttpConfig::default().with_timeout(Duration::from_millis(200)));
    let client = assert_ok!(Client::new(config));
    let err = assert_err!(client.execute(&QueryRequest::<Categories>::new()).await);

    match &err {
        ApiError::Transport(e) => assert!(e.is_timeout()),
        other => panic!("expected transport error, got {other:?}"),
    }
    assert_eq!(client.metrics().transport_failures.get(), 1);
}

#[tokio::test]
async fn test_dispatch_logs_carry_correlation_id() {
    let platform = MockPlatform::start().await;
    platform.issue_token("tok", None).await;
    Mock::given(method("GET"))
        .and(path(MockPlatform::api_path("categories")))
        .respond_with(ResponseTemplate::new(200).set_body_json(category_page(&[])))
        .mount(platform.server())
        .await;

    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let client = assert_ok!(Client::new(platform.config()));
    assert_ok!(client.execute(&QueryRequest::<Categories>::new()).await);

    let dispatched = capture.events_with_message("Dispatching request");
    assert_eq!(dispatched.len(), 1);
    let fields = &dispatched[0]["fields"];
    let correlation_id = fields["correlation_id"].as_str().unwrap_or_default();
    assert!(correlation_id.starts_with(&format!("{PROJECT_KEY}/")));
    assert_eq!(fields["method"], "GET");
    assert_eq!(fields["attempt"], 1);

    let requests = platform.server().received_requests().await.unwrap_or_default();
    let sent = requests
        .iter()
        .find(|r| r.url.path() == MockPlatform::api_path("categories"))
        .and_then(|r| r.headers.get("x-correlation-id"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    assert_eq!(sent.as_deref(), Some(correlation_id));

    assert!(!capture.contents().contains("e2e-secret"));
}
