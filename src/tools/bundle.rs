//! Helpers for reading FHIR Bundles and Parameters

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Entries of a Bundle, empty when absent
pub fn entries(bundle: &Value) -> &[Value] {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// URL of the `next` paging link, if the Bundle has one
pub fn next_link(bundle: &Value) -> Option<&str> {
    bundle
        .get("link")?
        .as_array()?
        .iter()
        .find(|link| link.get("relation").and_then(Value::as_str) == Some("next"))?
        .get("url")?
        .as_str()
}

/// Count Bundle entries per resource type across one or more pages.
///
/// Entries without a resource are counted under `Unknown`.
pub fn count_by_resource_type<'a, I>(bundles: I) -> BTreeMap<String, u64>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut counts = BTreeMap::new();
    for bundle in bundles {
        for entry in entries(bundle) {
            let resource_type = entry
                .get("resource")
                .and_then(|r| r.get("resourceType"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown");
            *counts.entry(resource_type.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Per-type counts from a `$totals` answer.
///
/// Blaze answers with a Parameters resource (`name` + `valueUnsignedInt`);
/// a Bundle is aggregated entry by entry instead.
pub fn totals(body: &Value) -> BTreeMap<String, u64> {
    match body.get("resourceType").and_then(Value::as_str) {
        Some("Bundle") => count_by_resource_type([body]),
        _ => body
            .get("parameter")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|param| {
                let name = param.get("name")?.as_str()?;
                let value = ["valueUnsignedInt", "valueInteger", "valueInteger64"]
                    .iter()
                    .find_map(|key| param.get(*key))
                    .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
                    .unwrap_or(0);
                Some((name.to_string(), value))
            })
            .collect(),
    }
}

/// Render counts as a JSON object
pub fn counts_to_json(counts: &BTreeMap<String, u64>) -> Value {
    Value::Object(
        counts
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect::<Map<String, Value>>(),
    )
}
