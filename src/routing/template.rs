//! # Path Template Module
//!
//! Segment-based path templates with `{name}` placeholders, plus the optional
//! query-string templates a route may carry. A placeholder captures exactly
//! one path segment's raw, undecoded text: whatever bytes the client sent in
//! that segment are what gets substituted into the downstream template, with
//! no re-encoding and no character stripping. Literal segments compare
//! case-insensitively.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::core::error::{GatewayError, GatewayResult};

/// Captured placeholder name/value pairs from a template match
pub type PlaceholderValues = HashMap<String, String>;

/// One segment of a parsed path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
    /// Matches the exact literal text (case-insensitive)
    Literal(String),
    /// Matches any single segment, capturing its raw text under the name
    Placeholder(String),
}

impl TemplateSegment {
    fn is_placeholder(&self) -> bool {
        matches!(self, TemplateSegment::Placeholder(_))
    }
}

/// A parsed upstream path template
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<TemplateSegment>,
    placeholder_count: usize,
}

impl PathTemplate {
    /// Parse a template such as `/api/orders/{id}`
    ///
    /// A placeholder must span a whole segment; `a{b}` style partial
    /// placeholders are rejected as a configuration error.
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        if !raw.starts_with('/') {
            return Err(GatewayError::config(format!(
                "path template '{}' must start with '/'",
                raw
            )));
        }

        let mut segments = Vec::new();
        let mut placeholder_count = 0;
        let mut seen_names: Vec<String> = Vec::new();

        for part in split_segments(raw) {
            if part.starts_with('{') && part.ends_with('}') && part.len() > 2 {
                let name = &part[1..part.len() - 1];
                if name.contains('{') || name.contains('}') {
                    return Err(GatewayError::config(format!(
                        "invalid placeholder '{}' in template '{}'",
                        part, raw
                    )));
                }
                if seen_names.iter().any(|n| n == name) {
                    return Err(GatewayError::config(format!(
                        "duplicate placeholder '{{{}}}' in template '{}'",
                        name, raw
                    )));
                }
                seen_names.push(name.to_string());
                segments.push(TemplateSegment::Placeholder(name.to_string()));
                placeholder_count += 1;
            } else if part.contains('{') || part.contains('}') {
                return Err(GatewayError::config(format!(
                    "placeholder must span a whole segment in template '{}'",
                    raw
                )));
            } else if part.is_empty() {
                return Err(GatewayError::config(format!(
                    "empty segment in template '{}'",
                    raw
                )));
            } else {
                segments.push(TemplateSegment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
            placeholder_count,
        })
    }

    /// The template text as configured
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[TemplateSegment] {
        &self.segments
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholder_count
    }

    /// Names of all placeholders, in template order
    pub fn placeholder_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                TemplateSegment::Placeholder(name) => Some(name.as_str()),
                TemplateSegment::Literal(_) => None,
            })
            .collect()
    }

    /// Match a concrete request path against this template
    ///
    /// Returns the captured placeholder values on a match. Captures are the
    /// raw segment bytes as received; a trailing slash on the request path is
    /// tolerated.
    pub fn matches(&self, path: &str) -> Option<PlaceholderValues> {
        let parts = split_segments(path);
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut values = PlaceholderValues::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                TemplateSegment::Literal(literal) => {
                    if !literal.eq_ignore_ascii_case(part) {
                        return None;
                    }
                }
                TemplateSegment::Placeholder(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    values.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(values)
    }

    /// Whether two templates match exactly the same set of paths
    ///
    /// Used at validation time: same-shape templates on overlapping methods
    /// are an ambiguous collision.
    pub fn same_shape(&self, other: &PathTemplate) -> bool {
        if self.segments.len() != other.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| match (a, b) {
                (TemplateSegment::Literal(x), TemplateSegment::Literal(y)) => {
                    x.eq_ignore_ascii_case(y)
                }
                (TemplateSegment::Placeholder(_), TemplateSegment::Placeholder(_)) => true,
                _ => false,
            })
    }
}

/// Rank two templates that both matched the same path
///
/// `Ordering::Less` means `a` is the more specific template. Literal segments
/// outrank placeholders position by position; among remaining ties the
/// template with fewer placeholders wins. Equal ordering is resolved by
/// declaration order at the call site (and flagged at validation time).
pub fn compare_specificity(a: &PathTemplate, b: &PathTemplate) -> Ordering {
    for (sa, sb) in a.segments.iter().zip(b.segments.iter()) {
        match (sa.is_placeholder(), sb.is_placeholder()) {
            (false, true) => return Ordering::Less,
            (true, false) => return Ordering::Greater,
            _ => {}
        }
    }
    a.placeholder_count.cmp(&b.placeholder_count)
}

/// One key/value pair of a query-string template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Literal(String),
    Placeholder(String),
}

/// A parsed query-string template, e.g. `unitId={unitId}&mode=fast`
///
/// Matched independently of the path: an unmatched query template does not
/// disqualify a route unless the route declares it mandatory.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    raw: String,
    pairs: Vec<(String, QueryValue)>,
}

impl QueryTemplate {
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let mut pairs = Vec::new();
        for pair in raw.split('&') {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                GatewayError::config(format!("query template pair '{}' must be key=value", pair))
            })?;
            if key.is_empty() {
                return Err(GatewayError::config(format!(
                    "empty key in query template '{}'",
                    raw
                )));
            }
            let value = if value.starts_with('{') && value.ends_with('}') && value.len() > 2 {
                QueryValue::Placeholder(value[1..value.len() - 1].to_string())
            } else {
                QueryValue::Literal(value.to_string())
            };
            pairs.push((key.to_string(), value));
        }
        Ok(Self {
            raw: raw.to_string(),
            pairs,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Names of all placeholders in this query template
    pub fn placeholder_names(&self) -> Vec<&str> {
        self.pairs
            .iter()
            .filter_map(|(_, value)| match value {
                QueryValue::Placeholder(name) => Some(name.as_str()),
                QueryValue::Literal(_) => None,
            })
            .collect()
    }

    /// Match a raw query string, capturing placeholder values
    ///
    /// Returns `None` only when `mandatory` is set and a template pair is
    /// missing or a literal value differs; otherwise absent pairs simply
    /// capture nothing. Values are compared and captured raw, undecoded.
    pub fn matches(&self, query: Option<&str>, mandatory: bool) -> Option<PlaceholderValues> {
        let request_pairs: Vec<(&str, &str)> = query
            .map(|q| {
                q.split('&')
                    .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
                    .collect()
            })
            .unwrap_or_default();

        let mut values = PlaceholderValues::new();
        for (key, expected) in &self.pairs {
            let found = request_pairs
                .iter()
                .find(|(k, _)| *k == key.as_str())
                .map(|(_, v)| *v);
            match (found, expected) {
                (Some(actual), QueryValue::Placeholder(name)) => {
                    values.insert(name.clone(), actual.to_string());
                }
                (Some(actual), QueryValue::Literal(literal)) => {
                    if actual != literal.as_str() && mandatory {
                        return None;
                    }
                }
                (None, _) => {
                    if mandatory {
                        return None;
                    }
                }
            }
        }
        Some(values)
    }
}

/// Split a path into its segments, ignoring a single trailing slash
fn split_segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut parts: Vec<&str> = trimmed.split('/').collect();
    if parts.last() == Some(&"") {
        parts.pop();
    }
    parts
}
