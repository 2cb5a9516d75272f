//! Shared test utilities for the ctp Rust SDK.
//!
//! This crate provides:
//! - Proptest generators for scopes, statuses and paths
//! - Scripted transport, token and correlation doubles
//! - Response fixtures and a log capture writer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logs;
pub mod mocks;

pub use generators::*;
pub use logs::LogCapture;
pub use mocks::{CountingTokenProvider, FixedCorrelationIds, MockTransport};
