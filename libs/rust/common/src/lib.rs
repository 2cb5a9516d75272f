//! Shared library for cross-cutting concerns in the ctp Rust SDK.
//!
//! This crate provides centralized implementations for:
//! - Platform error type with retryability classification
//! - HTTP client configuration and building
//! - Tracing subscriber initialisation
//! - Prometheus text metrics
//! - AES-GCM sealing for payloads kept in external stores

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod error;
pub mod http;
pub mod metrics;
pub mod tracing_config;

pub use cipher::PayloadCipher;
pub use error::PlatformError;
pub use http::{HttpConfig, build_http_client};
pub use metrics::{CacheMetrics, Counter, Gauge};
pub use tracing_config::{TracingConfig, init_tracing, try_init_tracing};
