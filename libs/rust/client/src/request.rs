//! Request descriptors and the [`ApiRequest`] contract.

use crate::error::{ApiError, ApiResult};
use crate::response;
use crate::transport::HttpResponse;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Content type used for JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Serialized request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    bytes: Vec<u8>,
    content_type: String,
}

impl RequestBody {
    /// Create a body with an explicit content type.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    /// Serialize a value as JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the value cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(value)?, JSON_CONTENT_TYPE))
    }

    /// Raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content type.
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

/// Immutable description of one API call.
///
/// The path is relative to the project, e.g. `categories` or
/// `categories/key=shoes`. Segments appended with
/// [`DescriptorBuilder::segment`] are kept whole and percent-encoded on
/// dispatch. Query pairs keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    segments: Vec<String>,
    parsed: usize,
    query: Vec<(String, String)>,
    body: Option<RequestBody>,
    scope: Option<String>,
}

impl RequestDescriptor {
    /// Start building a descriptor.
    #[must_use]
    pub fn builder(method: Method, path: impl Into<String>) -> DescriptorBuilder {
        let path = path.into();
        let segments: Vec<String> = path.trim_matches('/').split('/').map(String::from).collect();
        DescriptorBuilder {
            inner: Self {
                method,
                path,
                parsed: segments.len(),
                segments,
                query: Vec::new(),
                body: None,
                scope: None,
            },
        }
    }

    /// Start a GET descriptor.
    #[must_use]
    pub fn get(path: impl Into<String>) -> DescriptorBuilder {
        Self::builder(Method::GET, path)
    }

    /// Start a POST descriptor.
    #[must_use]
    pub fn post(path: impl Into<String>) -> DescriptorBuilder {
        Self::builder(Method::POST, path)
    }

    /// Start a DELETE descriptor.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> DescriptorBuilder {
        Self::builder(Method::DELETE, path)
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the project.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query pairs in insertion order.
    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Request body, if any.
    #[must_use]
    pub const fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Scope required by this call; `None` uses the client's scopes.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Copy of this descriptor requiring a different scope.
    #[must_use]
    pub fn with_scope(self, scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ..self
        }
    }

    /// Path segments, unencoded.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// Path and encoded query, for logs.
    #[must_use]
    pub fn relative_url(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.query)
            .finish();
        format!("{}?{query}", self.path)
    }

    /// Reject descriptors that cannot be dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidInput`] for an empty path, a path with
    /// blank segments, or a path carrying its own query string.
    pub fn validate(&self) -> ApiResult<()> {
        if self.segments.iter().all(|s| s.trim().is_empty()) {
            return Err(ApiError::invalid_request("path", "path must not be empty"));
        }
        if self.segments.iter().any(|s| s.trim().is_empty()) {
            return Err(ApiError::invalid_request(
                "path",
                format!("path '{}' contains an empty segment", self.path),
            ));
        }
        if self.segments[..self.parsed].iter().any(|s| s.contains('?')) {
            return Err(ApiError::invalid_request(
                "path",
                "query parameters must be passed as query pairs",
            ));
        }
        Ok(())
    }

    /// Decode a successful response as `T`.
    #[must_use]
    pub fn expect<T>(self) -> Expect<T> {
        Expect {
            descriptor: self,
            _shape: PhantomData,
        }
    }

    /// Decode as `T`, with 404 yielding `None`.
    #[must_use]
    pub fn expect_optional<T>(self) -> ExpectOptional<T> {
        ExpectOptional {
            descriptor: self,
            _shape: PhantomData,
        }
    }

    /// Accept any successful response and ignore the body.
    #[must_use]
    pub fn expect_empty(self) -> ExpectEmpty {
        ExpectEmpty { descriptor: self }
    }
}

/// Builder for [`RequestDescriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    inner: RequestDescriptor,
}

impl DescriptorBuilder {
    /// Append one path segment taken literally; `/` inside it is encoded.
    #[must_use]
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        let segment = segment.into();
        self.inner.path = format!("{}/{segment}", self.inner.path.trim_end_matches('/'));
        self.inner.segments.push(segment);
        self
    }

    /// Append a query pair.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.query.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: RequestBody) -> Self {
        self.inner.body = Some(body);
        self
    }

    /// Set a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidInput`] if the value cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> ApiResult<Self> {
        let body = RequestBody::json(value)
            .map_err(|e| ApiError::invalid_request("body", e.to_string()))?;
        Ok(self.body(body))
    }

    /// Require a specific scope.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.inner.scope = Some(scope.into());
        self
    }

    /// Finish the descriptor.
    #[must_use]
    pub fn build(self) -> RequestDescriptor {
        self.inner
    }
}

/// How a 404 response is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundPolicy {
    /// 404 is [`ApiError::NotFound`]
    #[default]
    Fail,
    /// 404 is an absent value
    Absent,
}

/// A typed API call: produces a descriptor and maps the response.
pub trait ApiRequest: Send + Sync {
    /// Value produced by a successful call.
    type Output: Send + 'static;

    /// Describe the HTTP call.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidInput`] if the request cannot be encoded.
    fn descriptor(&self) -> ApiResult<RequestDescriptor>;

    /// Policy this request declares for 404 responses.
    fn not_found_policy(&self) -> NotFoundPolicy {
        NotFoundPolicy::Fail
    }

    /// Map a final response into the output.
    ///
    /// `not_found` is the effective policy, which the client may tighten.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] matching the response status.
    fn map_response(
        &self,
        response: &HttpResponse,
        not_found: NotFoundPolicy,
    ) -> ApiResult<Self::Output>;
}

/// Ad-hoc request decoding a successful body as `T`.
#[derive(Debug, Clone)]
pub struct Expect<T> {
    descriptor: RequestDescriptor,
    _shape: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + Send + 'static> ApiRequest for Expect<T> {
    type Output = T;

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        Ok(self.descriptor.clone())
    }

    fn map_response(&self, response: &HttpResponse, _: NotFoundPolicy) -> ApiResult<T> {
        response::map_json(response)
    }
}

/// Ad-hoc request decoding as `T` with a tolerant 404.
#[derive(Debug, Clone)]
pub struct ExpectOptional<T> {
    descriptor: RequestDescriptor,
    _shape: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + Send + 'static> ApiRequest for ExpectOptional<T> {
    type Output = Option<T>;

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        Ok(self.descriptor.clone())
    }

    fn not_found_policy(&self) -> NotFoundPolicy {
        NotFoundPolicy::Absent
    }

    fn map_response(
        &self,
        response: &HttpResponse,
        not_found: NotFoundPolicy,
    ) -> ApiResult<Option<T>> {
        response::map_optional(response, not_found)
    }
}

/// Ad-hoc request with no meaningful response body.
#[derive(Debug, Clone)]
pub struct ExpectEmpty {
    descriptor: RequestDescriptor,
}

impl ApiRequest for ExpectEmpty {
    type Output = ();

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        Ok(self.descriptor.clone())
    }

    fn map_response(&self, response: &HttpResponse, _: NotFoundPolicy) -> ApiResult<()> {
        response::map_empty(response)
    }
}

/// Request wrapper that overrides the required scope.
#[derive(Debug, Clone)]
pub struct Scoped<R> {
    inner: R,
    scope: String,
}

impl<R: ApiRequest> ApiRequest for Scoped<R> {
    type Output = R::Output;

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        Ok(self.inner.descriptor()?.with_scope(self.scope.clone()))
    }

    fn not_found_policy(&self) -> NotFoundPolicy {
        self.inner.not_found_policy()
    }

    fn map_response(
        &self,
        response: &HttpResponse,
        not_found: NotFoundPolicy,
    ) -> ApiResult<Self::Output> {
        self.inner.map_response(response, not_found)
    }
}

/// Extension methods for any [`ApiRequest`].
pub trait ApiRequestExt: ApiRequest + Sized {
    /// Require `scope` for this call instead of the client's scopes.
    fn with_scope(self, scope: impl Into<String>) -> Scoped<Self> {
        Scoped {
            inner: self,
            scope: scope.into(),
        }
    }
}

impl<R: ApiRequest> ApiRequestExt for R {}
