//! # Downstream URL Builder Module
//!
//! Builds the final downstream URI for a matched route: substitutes each
//! `{name}` occurrence in the downstream template with the raw captured
//! value, resolves the scheme and selected host, and carries the query
//! string across. Substitution is plain text replacement so upstream path
//! bytes such as `(` survive the rewrite untouched.

use url::Url;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::ResolvedHost;
use crate::routing::table::Route;
use crate::routing::template::PlaceholderValues;

/// Build the downstream URI for one dispatch
///
/// If the expanded downstream template carries its own query string it wins;
/// otherwise the original request query string is appended unchanged.
pub fn build(
    route: &Route,
    host: &ResolvedHost,
    values: &PlaceholderValues,
    original_query: Option<&str>,
) -> GatewayResult<Url> {
    let path_and_query = expand(&route.downstream_template, values);

    let mut target = format!(
        "{}://{}:{}{}",
        route.downstream_scheme.as_str(),
        host.host,
        host.port,
        path_and_query
    );

    if !path_and_query.contains('?') {
        if let Some(query) = original_query {
            target.push('?');
            target.push_str(query);
        }
    }

    Url::parse(&target).map_err(|e| {
        GatewayError::config(format!(
            "route '{}' produced invalid downstream URI '{}': {}",
            route.key, target, e
        ))
    })
}

/// Substitute every `{name}` occurrence with its raw captured value
fn expand(template: &str, values: &PlaceholderValues) -> String {
    let mut expanded = template.to_string();
    for (name, value) in values {
        expanded = expanded.replace(&format!("{{{}}}", name), value);
    }
    expanded
}
