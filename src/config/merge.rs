//! # Configuration Merge Module
//!
//! Merges raw JSON configuration fragments (a primary file plus environment
//! or override files) into one document before validation. Merge rules,
//! applied pairwise left to right:
//!
//! - top-level and nested scalars: last fragment wins
//! - objects: merged key by key, recursively
//! - arrays: the later fragment's array replaces the earlier one wholesale
//! - `routes` / `aggregates` lists: concatenated across fragments, except
//!   route entries sharing the same `key`, which are deep-merged

use serde_json::{Map, Value};

use crate::core::error::{GatewayError, GatewayResult};

/// Merge configuration fragments in order into a single JSON document
pub fn merge_fragments(fragments: &[Value]) -> GatewayResult<Value> {
    let mut merged = Map::new();

    for fragment in fragments {
        let object = fragment.as_object().ok_or_else(|| {
            GatewayError::config("configuration fragment must be a JSON object")
        })?;

        for (key, value) in object {
            match key.as_str() {
                "routes" => append_keyed_list(&mut merged, "routes", value, true)?,
                "aggregates" => append_keyed_list(&mut merged, "aggregates", value, false)?,
                _ => match merged.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        merged.insert(key.clone(), value.clone());
                    }
                },
            }
        }
    }

    Ok(Value::Object(merged))
}

/// Deep-merge `overlay` into `target`
///
/// Objects merge key-wise; anything else (scalars, arrays) is replaced by the
/// overlay.
fn merge_value(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, overlay) => *target = overlay.clone(),
    }
}

/// Concatenate a fragment's route/aggregate list onto the merged document
///
/// When `merge_by_key` is set, an incoming entry whose `key` matches an
/// existing entry is deep-merged into it instead of appended.
fn append_keyed_list(
    merged: &mut Map<String, Value>,
    list_name: &str,
    incoming: &Value,
    merge_by_key: bool,
) -> GatewayResult<()> {
    let incoming = incoming.as_array().ok_or_else(|| {
        GatewayError::config(format!("'{}' must be a JSON array", list_name))
    })?;

    let target = merged
        .entry(list_name.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    let target = target
        .as_array_mut()
        .ok_or_else(|| GatewayError::config(format!("'{}' must be a JSON array", list_name)))?;

    for entry in incoming {
        if merge_by_key {
            let entry_key = entry.get("key").and_then(Value::as_str);
            if let Some(entry_key) = entry_key {
                if let Some(existing) = target
                    .iter_mut()
                    .find(|e| e.get("key").and_then(Value::as_str) == Some(entry_key))
                {
                    merge_value(existing, entry);
                    continue;
                }
            }
        }
        target.push(entry.clone());
    }

    Ok(())
}
