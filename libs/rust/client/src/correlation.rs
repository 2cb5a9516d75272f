//! Correlation ids for outbound calls.

use uuid::Uuid;

/// Header carrying the correlation id.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Source of correlation ids.
///
/// Called once per dispatch, so a retried call gets a second id.
pub trait CorrelationIdProvider: Send + Sync {
    /// Produce a new id for a call within `scope_identifier` (the project key).
    fn next_id(&self, scope_identifier: &str) -> String;
}

/// Default provider: `{project_key}/{uuid v4}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCorrelationIds;

impl CorrelationIdProvider for UuidCorrelationIds {
    fn next_id(&self, scope_identifier: &str) -> String {
        format!("{scope_identifier}/{}", Uuid::new_v4())
    }
}
