//! # Template Matcher Module
//!
//! Matches an incoming (method, path, host) against the active route table.
//! Routes and aggregate routes are ranked together: candidates are filtered
//! by method and host, then ordered by template specificity (literal segments
//! outrank placeholders position by position, then fewest placeholders), with
//! declaration order breaking any remaining tie. Exact-collision ties are
//! rejected earlier, at validation time.

use std::sync::Arc;

use axum::http::Method;

use crate::routing::table::{AggregateRoute, Route, RouteTable};
use crate::routing::template::{compare_specificity, PathTemplate, PlaceholderValues};

/// Result of matching a request against the route table
#[derive(Debug)]
pub enum RouteMatch {
    /// A plain route, dispatched through the downstream pipeline
    Route {
        route: Arc<Route>,
        values: PlaceholderValues,
    },
    /// An aggregate route, dispatched through the aggregation engine
    Aggregate {
        aggregate: Arc<AggregateRoute>,
        values: PlaceholderValues,
    },
}

struct Candidate<'a> {
    template: &'a PathTemplate,
    declaration_index: usize,
    matched: RouteMatch,
}

/// Match a request against the table, returning the best-ranked candidate
pub fn match_request(
    table: &RouteTable,
    method: &Method,
    path: &str,
    query: Option<&str>,
    host: Option<&str>,
) -> Option<RouteMatch> {
    let mut candidates: Vec<Candidate<'_>> = Vec::new();

    for route in &table.routes {
        if !route.matches_method(method) || !route.matches_host(host) {
            continue;
        }
        let Some(mut values) = route.upstream_template.matches(path) else {
            continue;
        };
        if let Some(query_template) = &route.upstream_query {
            match query_template.matches(query, route.upstream_query_mandatory) {
                Some(query_values) => values.extend(query_values),
                None => continue,
            }
        }
        candidates.push(Candidate {
            template: &route.upstream_template,
            declaration_index: route.declaration_index,
            matched: RouteMatch::Route {
                route: Arc::clone(route),
                values,
            },
        });
    }

    for aggregate in &table.aggregates {
        if !aggregate.matches_method(method) {
            continue;
        }
        let Some(values) = aggregate.upstream_template.matches(path) else {
            continue;
        };
        candidates.push(Candidate {
            template: &aggregate.upstream_template,
            declaration_index: aggregate.declaration_index,
            matched: RouteMatch::Aggregate {
                aggregate: Arc::clone(aggregate),
                values,
            },
        });
    }

    candidates
        .into_iter()
        .min_by(|a, b| {
            compare_specificity(a.template, b.template)
                .then(a.declaration_index.cmp(&b.declaration_index))
        })
        .map(|candidate| candidate.matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file_model::FileConfiguration;
    use serde_json::json;

    fn table(value: serde_json::Value) -> RouteTable {
        let file: FileConfiguration = serde_json::from_value(value).unwrap();
        RouteTable::from_file(&file).unwrap()
    }

    fn route_json(key: &str, template: &str, methods: &[&str]) -> serde_json::Value {
        json!({
            "key": key,
            "upstreamPathTemplate": template,
            "upstreamHttpMethod": methods,
            "downstreamPathTemplate": "/routed",
            "downstreamHostAndPorts": [{"host": "backend", "port": 80}]
        })
    }

    fn matched_key(m: Option<RouteMatch>) -> String {
        match m {
            Some(RouteMatch::Route { route, .. }) => route.key.clone(),
            Some(RouteMatch::Aggregate { .. }) => "<aggregate>".to_string(),
            None => "<none>".to_string(),
        }
    }

    #[test]
    fn test_literal_segment_outranks_placeholder() {
        let table = table(json!({
            "routes": [
                route_json("templated", "/api/orders/{id}", &["GET"]),
                route_json("literal", "/api/orders/latest", &["GET"]),
            ]
        }));

        let m = match_request(&table, &Method::GET, "/api/orders/latest", None, None);
        assert_eq!(matched_key(m), "literal");

        let m = match_request(&table, &Method::GET, "/api/orders/42", None, None);
        assert_eq!(matched_key(m), "templated");
    }

    #[test]
    fn test_fewest_placeholders_wins() {
        let table = table(json!({
            "routes": [
                route_json("two", "/{a}/{b}", &["GET"]),
                route_json("one", "/{a}/items", &["GET"]),
            ]
        }));

        let m = match_request(&table, &Method::GET, "/x/items", None, None);
        assert_eq!(matched_key(m), "one");
    }

    #[test]
    fn test_method_filtering() {
        let table = table(json!({
            "routes": [
                route_json("reads", "/api/things", &["GET"]),
                route_json("writes", "/api/things", &["POST"]),
            ]
        }));

        let m = match_request(&table, &Method::POST, "/api/things", None, None);
        assert_eq!(matched_key(m), "writes");

        let m = match_request(&table, &Method::DELETE, "/api/things", None, None);
        assert!(m.is_none());
    }

    #[test]
    fn test_host_filtering() {
        let mut writes = route_json("tenant-a", "/api", &["GET"]);
        writes["upstreamHost"] = json!("a.example.com");
        let table = table(json!({
            "routes": [
                writes,
                route_json("any-host", "/api", &["POST"]),
            ]
        }));

        let m = match_request(&table, &Method::GET, "/api", None, Some("a.example.com"));
        assert_eq!(matched_key(m), "tenant-a");

        let m = match_request(&table, &Method::GET, "/api", None, Some("b.example.com"));
        assert!(m.is_none());
    }

    #[test]
    fn test_query_captures_merge_into_values() {
        let table = table(json!({
            "routes": [{
                "key": "units",
                "upstreamPathTemplate": "/api/units/{unitId}/updates?since={since}",
                "upstreamHttpMethod": ["GET"],
                "downstreamPathTemplate": "/units/{unitId}?since={since}",
                "downstreamHostAndPorts": [{"host": "backend", "port": 80}]
            }]
        }));

        let m = match_request(
            &table,
            &Method::GET,
            "/api/units/7/updates",
            Some("since=2024-01-01"),
            None,
        );
        match m {
            Some(RouteMatch::Route { values, .. }) => {
                assert_eq!(values.get("unitId").map(String::as_str), Some("7"));
                assert_eq!(values.get("since").map(String::as_str), Some("2024-01-01"));
            }
            other => panic!("expected route match, got {:?}", other),
        }
    }

    #[test]
    fn test_mandatory_query_disqualifies() {
        let table = table(json!({
            "routes": [{
                "key": "units",
                "upstreamPathTemplate": "/api/units?unitId={unitId}",
                "upstreamHttpMethod": ["GET"],
                "upstreamQueryMandatory": true,
                "downstreamPathTemplate": "/units/{unitId}",
                "downstreamHostAndPorts": [{"host": "backend", "port": 80}]
            }]
        }));

        assert!(match_request(&table, &Method::GET, "/api/units", None, None).is_none());
        assert!(match_request(
            &table,
            &Method::GET,
            "/api/units",
            Some("unitId=3"),
            None
        )
        .is_some());
    }

    #[test]
    fn test_aggregate_routes_ranked_with_routes() {
        let table = table(json!({
            "routes": [
                route_json("orders", "/api/orders", &["GET"]),
            ],
            "aggregates": [{
                "upstreamPathTemplate": "/api/summary",
                "upstreamHttpMethod": ["GET"],
                "routeKeys": ["orders"]
            }]
        }));

        let m = match_request(&table, &Method::GET, "/api/summary", None, None);
        assert!(matches!(m, Some(RouteMatch::Aggregate { .. })));
    }

    #[test]
    fn test_declaration_order_breaks_residual_ties() {
        // Same shape with different host filters is valid configuration, yet
        // a request carrying the filtered host matches both; declaration
        // order decides.
        let mut filtered = route_json("second", "/api/{id}", &["GET"]);
        filtered["upstreamHost"] = json!("a.example.com");
        let table = table(json!({
            "routes": [
                route_json("first", "/api/{id}", &["GET"]),
                filtered,
            ]
        }));

        let m = match_request(&table, &Method::GET, "/api/1", None, Some("a.example.com"));
        assert_eq!(matched_key(m), "first");
    }

    #[test]
    fn test_idempotent_matching() {
        let table = table(json!({
            "routes": [route_json("orders", "/api/orders/{id}", &["GET"])]
        }));

        for _ in 0..2 {
            let m = match_request(&table, &Method::GET, "/api/orders/5", None, None);
            match m {
                Some(RouteMatch::Route { route, values }) => {
                    assert_eq!(route.key, "orders");
                    assert_eq!(values.get("id").map(String::as_str), Some("5"));
                }
                other => panic!("expected route match, got {:?}", other),
            }
        }
    }
}
