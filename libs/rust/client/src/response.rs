//! Mapping of HTTP responses into typed values or [`ApiError`]s.

use crate::error::{ApiError, ApiResult, ErrorResponse};
use crate::request::NotFoundPolicy;
use crate::transport::HttpResponse;
use serde::de::DeserializeOwned;

/// Header carrying the rate-limit back-off hint.
pub const RETRY_AFTER: &str = "retry-after";

/// Decode a successful response body as `T`.
///
/// An empty 2xx body decodes as JSON `null`, so `Option<T>` and `()` shapes
/// accept it while object shapes report [`ApiError::MalformedPayload`].
///
/// # Errors
///
/// Returns the status-mapped error for non-2xx responses and
/// [`ApiError::MalformedPayload`] when the body does not match `T`.
pub fn map_json<T: DeserializeOwned>(response: &HttpResponse) -> ApiResult<T> {
    check_status(response)?;

    let decoded = if response.body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(serde_json::Value::Null)
    } else {
        serde_json::from_slice(&response.body)
    };

    decoded.map_err(|source| ApiError::MalformedPayload {
        response: Box::new(ErrorResponse::from_response(response)),
        source,
    })
}

/// Decode as `T`, turning a 404 into `None` under [`NotFoundPolicy::Absent`].
///
/// # Errors
///
/// See [`map_json`].
pub fn map_optional<T: DeserializeOwned>(
    response: &HttpResponse,
    not_found: NotFoundPolicy,
) -> ApiResult<Option<T>> {
    if response.status == 404 && not_found == NotFoundPolicy::Absent {
        return Ok(None);
    }
    map_json(response).map(Some)
}

/// Accept any 2xx response, ignoring the body.
///
/// # Errors
///
/// Returns the status-mapped error for non-2xx responses.
pub fn map_empty(response: &HttpResponse) -> ApiResult<()> {
    check_status(response)
}

/// Succeed for 2xx, otherwise return the mapped error.
///
/// # Errors
///
/// Returns the [`ApiError`] from [`error_for_status`].
pub fn check_status(response: &HttpResponse) -> ApiResult<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(error_for_status(response))
    }
}

/// Classify a non-2xx response.
#[must_use]
pub fn error_for_status(response: &HttpResponse) -> ApiError {
    let details = Box::new(ErrorResponse::from_response(response));

    match response.status {
        400 => ApiError::InvalidInput {
            errors: details.errors.clone(),
            response: Some(details),
        },
        401 => ApiError::Unauthorized {
            message: details
                .message
                .clone()
                .unwrap_or_else(|| "access token rejected".to_string()),
            response: Some(details),
            source: None,
        },
        404 => ApiError::NotFound(details),
        409 => ApiError::Conflict {
            current_version: details.current_version(),
            response: details,
        },
        429 => ApiError::RateLimited {
            retry_after: response.header(RETRY_AFTER).map(str::to_string),
            response: details,
        },
        500..=599 => ApiError::ServerError(details),
        _ => ApiError::Unknown(details),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Category {
        id: String,
        version: u64,
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse::new(status, body)
    }

    #[test]
    fn test_success_decodes_body() {
        let value: Category = map_json(&response(200, r#"{"id":"c1","version":3}"#)).unwrap();
        assert_eq!(
            value,
            Category {
                id: "c1".into(),
                version: 3
            }
        );
    }

    #[test]
    fn test_created_is_success() {
        let value: Category = map_json(&response(201, r#"{"id":"c2","version":1}"#)).unwrap();
        assert_eq!(value.version, 1);
    }

    #[test]
    fn test_shape_mismatch_is_malformed() {
        let err = map_json::<Category>(&response(200, r#"{"id":1}"#)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        assert_eq!(err.status(), Some(200));
        assert_eq!(err.body(), Some(r#"{"id":1}"#));
    }

    #[test]
    fn test_empty_body_is_not_coerced() {
        let err = map_json::<Category>(&response(200, "")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);

        assert!(map_json::<()>(&response(204, "")).is_ok());
        assert_eq!(map_json::<Option<Category>>(&response(204, "")).unwrap(), None);
    }

    #[test]
    fn test_bad_request_keeps_all_errors() {
        let body = r#"{"statusCode":400,"message":"x","errors":[
            {"code":"InvalidField","message":"a","field":"name"},
            {"code":"InvalidField","message":"b","field":"slug"},
            {"code":"DuplicateField","message":"c","field":"key"}
        ]}"#;
        match map_json::<Category>(&response(400, body)).unwrap_err() {
            ApiError::InvalidInput { errors, response } => {
                assert_eq!(errors.len(), 3);
                assert_eq!(errors[2].code, "DuplicateField");
                assert_eq!(response.unwrap().status, 400);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_error_body_keeps_kind() {
        let err = map_json::<Category>(&response(400, "<html/>")).unwrap_err();
        match err {
            ApiError::InvalidInput { ref errors, .. } => assert!(errors.is_empty()),
            ref other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.body(), Some("<html/>"));
    }

    #[test]
    fn test_conflict_carries_current_version() {
        let body = r#"{"statusCode":409,"message":"Version mismatch. Concurrent modification.",
            "errors":[{"code":"ConcurrentModification","message":"m","currentVersion":7}]}"#;
        match map_empty(&response(409, body)).unwrap_err() {
            ApiError::Conflict {
                current_version,
                response,
            } => {
                assert_eq!(current_version, Some(7));
                assert_eq!(response.status, 409);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rate_limited_carries_retry_after_verbatim() {
        let resp = response(429, "").with_header("Retry-After", "Wed, 21 Oct 2026 07:28:00 GMT");
        match map_empty(&resp).unwrap_err() {
            ApiError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after.as_deref(), Some("Wed, 21 Oct 2026 07:28:00 GMT"));
            }
            other => panic!("unexpected {other:?}"),
        }

        match map_empty(&response(429, "")).unwrap_err() {
            ApiError::RateLimited { retry_after, .. } => assert!(retry_after.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_status_table() {
        let cases = [
            (401, ErrorKind::Unauthorized),
            (403, ErrorKind::Unknown),
            (404, ErrorKind::NotFound),
            (418, ErrorKind::Unknown),
            (500, ErrorKind::ServerError),
            (503, ErrorKind::ServerError),
            (599, ErrorKind::ServerError),
            (302, ErrorKind::Unknown),
        ];
        for (status, kind) in cases {
            let err = error_for_status(&response(status, "{}"));
            assert_eq!(err.kind(), kind, "status {status}");
            assert_eq!(err.status(), Some(status));
        }
    }

    #[test]
    fn test_not_found_policy() {
        let resp = response(404, r#"{"statusCode":404,"message":"missing"}"#);
        assert_eq!(
            map_optional::<Category>(&resp, NotFoundPolicy::Absent).unwrap(),
            None
        );
        let err = map_optional::<Category>(&resp, NotFoundPolicy::Fail).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
