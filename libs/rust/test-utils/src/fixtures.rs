//! Test fixtures with sample data.
//!
//! Bodies follow the shapes the platform returns: paged query results,
//! OAuth token responses and `{statusCode, message, errors}` error bodies.

use chrono::{DateTime, Utc};
use ctp_client::Resource;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Localised text keyed by locale.
pub type LocalizedString = BTreeMap<String, String>;

/// Category as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Resource id
    pub id: String,
    /// Optimistic concurrency version
    pub version: u64,
    /// User-defined key
    #[serde(default)]
    pub key: Option<String>,
    /// Display name
    pub name: LocalizedString,
    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Payload for creating a category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDraft {
    /// Display name
    pub name: LocalizedString,
    /// URL slug
    pub slug: LocalizedString,
    /// User-defined key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Category update actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum CategoryUpdate {
    /// Replace the name
    ChangeName {
        /// New name
        name: LocalizedString,
    },
    /// Set or clear the key
    SetKey {
        /// New key
        key: Option<String>,
    },
}

/// The `categories` endpoint.
#[derive(Debug)]
pub struct Categories;

impl Resource for Categories {
    const ENDPOINT: &'static str = "categories";
    type Model = Category;
    type Draft = CategoryDraft;
    type UpdateAction = CategoryUpdate;
}

/// English-only localised string.
#[must_use]
pub fn en(text: &str) -> LocalizedString {
    BTreeMap::from([("en".to_string(), text.to_string())])
}

impl CategoryDraft {
    /// Draft with an English name and slug.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: en(name),
            slug: en(&name.to_lowercase().replace(' ', "-")),
            key: None,
        }
    }
}

/// Category body with `id` and `version`.
#[must_use]
pub fn category_json(id: &str, version: u64) -> Value {
    json!({
        "id": id,
        "version": version,
        "key": format!("key-{id}"),
        "name": { "en": format!("Category {id}") },
        "createdAt": "2024-01-15T10:00:00.000Z",
    })
}

/// Paged query body containing one category per id.
#[must_use]
pub fn category_page(ids: &[&str]) -> Value {
    let results: Vec<Value> = ids.iter().map(|id| category_json(id, 1)).collect();
    json!({
        "limit": 20,
        "offset": 0,
        "count": results.len(),
        "total": results.len(),
        "results": results,
    })
}

/// Successful client-credentials token response.
#[must_use]
pub fn token_response(access_token: &str, expires_in: u64, scope: &str) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": scope,
    })
}

/// Error body for a rejected client.
#[must_use]
pub fn invalid_client_body() -> Value {
    json!({
        "statusCode": 401,
        "message": "Please provide valid client credentials using HTTP Basic Authentication.",
        "errors": [{
            "code": "invalid_client",
            "message": "Please provide valid client credentials using HTTP Basic Authentication."
        }],
        "error": "invalid_client",
    })
}

/// 400 body with one field error.
#[must_use]
pub fn validation_error_body(field: &str, message: &str) -> Value {
    json!({
        "statusCode": 400,
        "message": message,
        "errors": [{
            "code": "InvalidField",
            "message": message,
            "field": field,
        }],
    })
}

/// 409 body reporting the version currently stored.
#[must_use]
pub fn concurrent_modification_body(current_version: u64) -> Value {
    let message = format!(
        "Object has a different version than expected. Current version: {current_version}."
    );
    json!({
        "statusCode": 409,
        "message": message,
        "errors": [{
            "code": "ConcurrentModification",
            "message": message,
            "currentVersion": current_version,
        }],
    })
}

/// 404 body.
#[must_use]
pub fn not_found_body(message: &str) -> Value {
    json!({
        "statusCode": 404,
        "message": message,
        "errors": [{ "code": "ResourceNotFound", "message": message }],
    })
}
