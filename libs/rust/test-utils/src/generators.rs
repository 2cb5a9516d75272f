//! Shared proptest generators.

use proptest::prelude::*;

/// Project keys: lowercase, digits and dashes.
pub fn project_key_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,20}"
}

/// Bare scope names such as `view_products`.
pub fn scope_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("manage_project".to_string()),
        Just("view_products".to_string()),
        Just("manage_orders".to_string()),
        Just("view_customers".to_string()),
        "(view|manage)_[a-z]{3,12}",
    ]
}

/// Scope lists mixing bare and project-qualified entries, with duplicates.
pub fn scope_list_strategy(project_key: String) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec((scope_name_strategy(), any::<bool>()), 1..6).prop_map(move |entries| {
        entries
            .into_iter()
            .map(|(name, qualified)| {
                if qualified {
                    format!("{name}:{project_key}")
                } else {
                    name
                }
            })
            .collect()
    })
}

/// Any status code a server might send.
pub fn status_strategy() -> impl Strategy<Value = u16> {
    100u16..600
}

/// Statuses that carry an error.
pub fn error_status_strategy() -> impl Strategy<Value = u16> {
    prop_oneof![400u16..500, 500u16..600]
}

/// Relative resource paths of one to four non-empty segments.
pub fn resource_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9-]{0,12}", 1..5).prop_map(|segments| segments.join("/"))
}

/// Query parameters with printable values.
pub fn query_params_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-z]{1,10}", "[ -~]{0,20}"), 0..4)
}

/// Resource versions.
pub fn version_strategy() -> impl Strategy<Value = u64> {
    1u64..100_000
}
