//! Handles for asynchronous calls and ordered batch results.

use crate::error::{ApiError, ApiResult};
use crate::executor::CancellationFlag;
use crate::transport::{TransportError, TransportErrorKind};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// A call running on the Tokio runtime.
///
/// Await the handle for the result. [`ApiHandle::cancel`] gives up on it:
/// a call that has not been dispatched yet never reaches the network, one
/// already in flight completes and its result is dropped.
#[derive(Debug)]
#[must_use = "a handle does nothing unless awaited or cancelled"]
pub struct ApiHandle<T> {
    task: JoinHandle<ApiResult<T>>,
    cancel: CancellationFlag,
}

impl<T> ApiHandle<T> {
    pub(crate) const fn new(task: JoinHandle<ApiResult<T>>, cancel: CancellationFlag) -> Self {
        Self { task, cancel }
    }

    /// Give up on the call.
    pub fn cancel(self) {
        self.cancel.cancel();
    }

    /// Check whether the call has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for ApiHandle<T> {
    type Output = ApiResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                Err(TransportError::new(TransportErrorKind::Aborted, e.to_string()).into())
            })
        })
    }
}

/// Results of a batch, one per request, in request order.
#[derive(Debug)]
pub struct BatchResult<T> {
    results: Vec<ApiResult<T>>,
}

impl<T> BatchResult<T> {
    pub(crate) const fn new(results: Vec<ApiResult<T>>) -> Self {
        Self { results }
    }

    /// Number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check for an empty batch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Result of the request at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ApiResult<T>> {
        self.results.get(index)
    }

    /// Results in request order.
    pub fn iter(&self) -> std::slice::Iter<'_, ApiResult<T>> {
        self.results.iter()
    }

    /// Number of successful requests.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Failed requests with their positions.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &ApiError)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
    }

    /// Take the results.
    #[must_use]
    pub fn into_inner(self) -> Vec<ApiResult<T>> {
        self.results
    }
}

impl<T> IntoIterator for BatchResult<T> {
    type Item = ApiResult<T>;
    type IntoIter = std::vec::IntoIter<ApiResult<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a BatchResult<T> {
    type Item = &'a ApiResult<T>;
    type IntoIter = std::slice::Iter<'a, ApiResult<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
