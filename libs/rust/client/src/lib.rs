//! Authenticated request execution for the ctp REST API.
//!
//! A [`Client`] turns typed requests into HTTP calls:
//! - OAuth2 client-credentials tokens, cached per scope and refreshed once
//!   on a 401
//! - A correlation id on every dispatched request
//! - Status codes mapped to typed [`ApiError`] variants
//! - Synchronous, asynchronous and bounded-concurrency batch execution
//!
//! # Example
//!
//! ```no_run
//! use ctp_client::{Client, ClientConfig, RequestDescriptor};
//! use serde_json::Value;
//!
//! # async fn run() -> ctp_client::ApiResult<()> {
//! let client = Client::new(ClientConfig::from_env()?)?;
//! let request = RequestDescriptor::get("categories")
//!     .query("limit", "5")
//!     .build()
//!     .expect::<Value>();
//! let page = client.execute(&request).await?;
//! println!("{page}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blocking;
pub mod client;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod request;
pub mod resource;
pub mod response;
pub mod token;
pub mod transport;

pub use blocking::BlockingClient;
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ErrorMode};
pub use correlation::{CORRELATION_ID_HEADER, CorrelationIdProvider, UuidCorrelationIds};
pub use dispatch::{ApiHandle, BatchResult};
pub use error::{ApiError, ApiResult, ErrorDetail, ErrorKind, ErrorResponse};
pub use executor::{CancellationFlag, RequestExecutor};
pub use metrics::ClientMetrics;
pub use request::{
    ApiRequest, ApiRequestExt, DescriptorBuilder, NotFoundPolicy, RequestBody, RequestDescriptor,
};
pub use reqwest::Method;
pub use resource::{PagedQueryResponse, Resource};
pub use token::{
    ClientCredentialsProvider, InMemoryTokenStore, ScopeKey, Token, TokenCache, TokenProvider,
    TokenStore,
};
pub use transport::{HttpRequest, HttpResponse, Transport, TransportError, TransportErrorKind};
