//! Synchronous wrapper over [`Client`].

use crate::client::Client;
use crate::config::ClientConfig;
use crate::dispatch::BatchResult;
use crate::error::{ApiError, ApiResult};
use crate::request::ApiRequest;
use tokio::runtime::{Builder, Runtime};

/// Blocking client that owns its own Tokio runtime.
///
/// Must not be used from inside an async context.
#[derive(Debug)]
pub struct BlockingClient {
    runtime: Runtime,
    inner: Client,
}

impl BlockingClient {
    /// Build a client and a runtime to drive it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] if the configuration is invalid or
    /// the runtime cannot be started.
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        let runtime = Self::runtime()?;
        // reqwest needs a runtime context when the connection pool is created
        let inner = {
            let _guard = runtime.enter();
            Client::new(config)?
        };
        Ok(Self { runtime, inner })
    }

    /// Drive an existing client synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidConfig`] if the runtime cannot be started.
    pub fn from_client(client: Client) -> ApiResult<Self> {
        Ok(Self {
            runtime: Self::runtime()?,
            inner: client,
        })
    }

    fn runtime() -> ApiResult<Runtime> {
        Builder::new_multi_thread()
            .enable_all()
            .thread_name("ctp-client")
            .build()
            .map_err(|e| ApiError::InvalidConfig(format!("runtime: {e}")))
    }

    /// Underlying async client.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.inner
    }

    /// Run a call and block until it completes.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] describing why the call failed.
    pub fn execute<R: ApiRequest>(&self, request: &R) -> ApiResult<R::Output> {
        self.runtime.block_on(self.inner.execute(request))
    }

    /// Run a batch and block until every call completes.
    pub fn execute_batch<R, I>(&self, requests: I) -> BatchResult<R::Output>
    where
        R: ApiRequest,
        I: IntoIterator<Item = R>,
    {
        self.runtime.block_on(self.inner.execute_batch(requests))
    }
}
