//! Declarative resource endpoints and the generic request kinds built on them.
//!
//! A resource registers its endpoint and payload types once through
//! [`Resource`]; the request kinds below turn that into descriptors and
//! typed responses.

use crate::error::{ApiError, ApiResult};
use crate::request::{ApiRequest, DescriptorBuilder, NotFoundPolicy, RequestDescriptor};
use crate::response;
use crate::transport::HttpResponse;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// A REST resource collection.
pub trait Resource: Send + Sync + 'static {
    /// Endpoint relative to the project, e.g. `categories`.
    const ENDPOINT: &'static str;
    /// Representation returned by the API.
    type Model: DeserializeOwned + Send + 'static;
    /// Payload used to create a resource.
    type Draft: Serialize + Send + Sync;
    /// One update action.
    type UpdateAction: Serialize + Send + Sync;
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedQueryResponse<T> {
    /// Page size requested
    #[serde(default)]
    pub limit: Option<u64>,
    /// Offset of the first result
    #[serde(default)]
    pub offset: Option<u64>,
    /// Number of results on this page
    pub count: u64,
    /// Total number of matches, when the API reports it
    #[serde(default)]
    pub total: Option<u64>,
    /// Results
    pub results: Vec<T>,
}

impl<T> PagedQueryResponse<T> {
    /// Check for more pages after this one.
    #[must_use]
    pub fn has_more(&self) -> bool {
        match (self.total, self.offset) {
            (Some(total), offset) => offset.unwrap_or(0) + self.count < total,
            (None, _) => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Expansions(Vec<String>);

impl Expansions {
    fn push(&mut self, path: impl Into<String>) {
        self.0.push(path.into());
    }

    fn apply(&self, mut builder: DescriptorBuilder) -> DescriptorBuilder {
        for path in &self.0 {
            builder = builder.query("expand", path.clone());
        }
        builder
    }
}

fn identifier<'a>(field: &str, value: &'a str) -> ApiResult<&'a str> {
    if value.trim().is_empty() {
        return Err(ApiError::invalid_request(field, format!("{field} must not be blank")));
    }
    Ok(value)
}

/// Query a resource collection.
pub struct QueryRequest<R> {
    predicates: Vec<String>,
    sort: Vec<String>,
    limit: Option<u32>,
    offset: Option<u32>,
    expand: Expansions,
    _resource: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for QueryRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRequest")
            .field("where", &self.predicates)
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl<R: Resource> Default for QueryRequest<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> QueryRequest<R> {
    /// Query without predicates.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            predicates: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: None,
            expand: Expansions(Vec::new()),
            _resource: PhantomData,
        }
    }

    /// Add a `where` predicate.
    #[must_use]
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    /// Add a sort expression, e.g. `createdAt desc`.
    #[must_use]
    pub fn sort(mut self, expression: impl Into<String>) -> Self {
        self.sort.push(expression.into());
        self
    }

    /// Set the page size.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the page offset.
    #[must_use]
    pub const fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Expand a reference path.
    #[must_use]
    pub fn expand(mut self, path: impl Into<String>) -> Self {
        self.expand.push(path);
        self
    }
}

impl<R: Resource> ApiRequest for QueryRequest<R> {
    type Output = PagedQueryResponse<R::Model>;

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        let mut builder = RequestDescriptor::get(R::ENDPOINT);
        for predicate in &self.predicates {
            builder = builder.query("where", predicate.clone());
        }
        for expression in &self.sort {
            builder = builder.query("sort", expression.clone());
        }
        if let Some(limit) = self.limit {
            builder = builder.query("limit", limit.to_string());
        }
        if let Some(offset) = self.offset {
            builder = builder.query("offset", offset.to_string());
        }
        Ok(self.expand.apply(builder).build())
    }

    fn map_response(
        &self,
        response: &HttpResponse,
        _: NotFoundPolicy,
    ) -> ApiResult<Self::Output> {
        response::map_json(response)
    }
}

/// Fetch one resource by id; a missing resource is `None`.
pub struct ByIdGetRequest<R> {
    id: String,
    expand: Expansions,
    _resource: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for ByIdGetRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByIdGetRequest")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<R: Resource> ByIdGetRequest<R> {
    /// Fetch by id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            expand: Expansions::default(),
            _resource: PhantomData,
        }
    }

    /// Expand a reference path.
    #[must_use]
    pub fn expand(mut self, path: impl Into<String>) -> Self {
        self.expand.push(path);
        self
    }
}

impl<R: Resource> ApiRequest for ByIdGetRequest<R> {
    type Output = Option<R::Model>;

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        let builder = RequestDescriptor::get(R::ENDPOINT).segment(identifier("id", &self.id)?);
        Ok(self.expand.apply(builder).build())
    }

    fn not_found_policy(&self) -> NotFoundPolicy {
        NotFoundPolicy::Absent
    }

    fn map_response(
        &self,
        response: &HttpResponse,
        not_found: NotFoundPolicy,
    ) -> ApiResult<Self::Output> {
        response::map_optional(response, not_found)
    }
}

/// Fetch one resource by user-defined key; a missing resource is `None`.
pub struct ByKeyGetRequest<R> {
    key: String,
    expand: Expansions,
    _resource: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for ByKeyGetRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByKeyGetRequest")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<R: Resource> ByKeyGetRequest<R> {
    /// Fetch by key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expand: Expansions::default(),
            _resource: PhantomData,
        }
    }

    /// Expand a reference path.
    #[must_use]
    pub fn expand(mut self, path: impl Into<String>) -> Self {
        self.expand.push(path);
        self
    }
}

impl<R: Resource> ApiRequest for ByKeyGetRequest<R> {
    type Output = Option<R::Model>;

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        let builder = RequestDescriptor::get(R::ENDPOINT)
            .segment(format!("key={}", identifier("key", &self.key)?));
        Ok(self.expand.apply(builder).build())
    }

    fn not_found_policy(&self) -> NotFoundPolicy {
        NotFoundPolicy::Absent
    }

    fn map_response(
        &self,
        response: &HttpResponse,
        not_found: NotFoundPolicy,
    ) -> ApiResult<Self::Output> {
        response::map_optional(response, not_found)
    }
}

/// Create a resource from a draft.
pub struct CreateRequest<R: Resource> {
    draft: R::Draft,
    expand: Expansions,
}

impl<R: Resource> fmt::Debug for CreateRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateRequest")
            .field("endpoint", &R::ENDPOINT)
            .finish_non_exhaustive()
    }
}

impl<R: Resource> CreateRequest<R> {
    /// Create from a draft.
    #[must_use]
    pub fn new(draft: R::Draft) -> Self {
        Self {
            draft,
            expand: Expansions::default(),
        }
    }

    /// Expand a reference path in the response.
    #[must_use]
    pub fn expand(mut self, path: impl Into<String>) -> Self {
        self.expand.push(path);
        self
    }
}

impl<R: Resource> ApiRequest for CreateRequest<R> {
    type Output = R::Model;

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        let builder = RequestDescriptor::post(R::ENDPOINT).json(&self.draft)?;
        Ok(self.expand.apply(builder).build())
    }

    fn map_response(
        &self,
        response: &HttpResponse,
        _: NotFoundPolicy,
    ) -> ApiResult<Self::Output> {
        response::map_json(response)
    }
}

#[derive(Serialize)]
struct UpdateBody<'a, A> {
    version: u64,
    actions: &'a [A],
}

/// Apply update actions to a resource at a known version.
pub struct UpdateByIdRequest<R: Resource> {
    id: String,
    version: u64,
    actions: Vec<R::UpdateAction>,
    expand: Expansions,
}

impl<R: Resource> fmt::Debug for UpdateByIdRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateByIdRequest")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("actions", &self.actions.len())
            .finish_non_exhaustive()
    }
}

impl<R: Resource> UpdateByIdRequest<R> {
    /// Update the resource `id` expected to be at `version`.
    #[must_use]
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
            actions: Vec::new(),
            expand: Expansions::default(),
        }
    }

    /// Append an action.
    #[must_use]
    pub fn action(mut self, action: R::UpdateAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Append several actions.
    #[must_use]
    pub fn actions(mut self, actions: impl IntoIterator<Item = R::UpdateAction>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Expand a reference path in the response.
    #[must_use]
    pub fn expand(mut self, path: impl Into<String>) -> Self {
        self.expand.push(path);
        self
    }
}

impl<R: Resource> ApiRequest for UpdateByIdRequest<R> {
    type Output = R::Model;

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        let body = UpdateBody {
            version: self.version,
            actions: &self.actions,
        };
        let builder = RequestDescriptor::post(R::ENDPOINT)
            .segment(identifier("id", &self.id)?)
            .json(&body)?;
        Ok(self.expand.apply(builder).build())
    }

    fn map_response(
        &self,
        response: &HttpResponse,
        _: NotFoundPolicy,
    ) -> ApiResult<Self::Output> {
        response::map_json(response)
    }
}

/// Delete a resource at a known version.
pub struct DeleteByIdRequest<R> {
    id: String,
    version: u64,
    expand: Expansions,
    _resource: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for DeleteByIdRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteByIdRequest")
            .field("id", &self.id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl<R: Resource> DeleteByIdRequest<R> {
    /// Delete the resource `id` expected to be at `version`.
    #[must_use]
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
            expand: Expansions::default(),
            _resource: PhantomData,
        }
    }

    /// Expand a reference path in the response.
    #[must_use]
    pub fn expand(mut self, path: impl Into<String>) -> Self {
        self.expand.push(path);
        self
    }
}

impl<R: Resource> ApiRequest for DeleteByIdRequest<R> {
    type Output = R::Model;

    fn descriptor(&self) -> ApiResult<RequestDescriptor> {
        let builder = RequestDescriptor::delete(R::ENDPOINT)
            .segment(identifier("id", &self.id)?)
            .query("version", self.version.to_string());
        Ok(self.expand.apply(builder).build())
    }

    fn map_response(
        &self,
        response: &HttpResponse,
        _: NotFoundPolicy,
    ) -> ApiResult<Self::Output> {
        response::map_json(response)
    }
}
