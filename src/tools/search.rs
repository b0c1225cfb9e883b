//! FHIR search tools
//!
//! Search parameters arrive as a JSON object. Keys are passed through as
//! parameter names, so `:modifier` suffixes (`name:exact`) and chained names
//! work as-is. An array value repeats the parameter once per element, which
//! FHIR reads as AND; a comma inside a single string value is OR.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::args::{self, PageLimits, Validate};
use super::{ToolContext, ToolOutput, bundle, expect_success};
use crate::client::BackendRequest;
use crate::error::{Error, Result};

const COUNT: &str = "_count";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// FHIR resource type to search, e.g. Observation
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_type: String,
    /// Search parameters, e.g. {"code": "8867-4", "date": ["ge2024-01-01", "lt2025-01-01"]}
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    /// Page size; clamped to the server's maximum
    #[serde(default, deserialize_with = "args::lenient_integer")]
    pub count: Option<i64>,
}

impl Validate for SearchArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_resource_type(operation, "resource_type", &self.resource_type)?;
        encode_params(operation, self.params.as_ref()).map(drop)
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SystemSearchArgs {
    /// Search parameters valid across all types, e.g. {"_type": "Patient,Practitioner", "_lastUpdated": "gt2024-01-01"}
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    /// Page size; clamped to the server's maximum
    #[serde(default, deserialize_with = "args::lenient_integer")]
    pub count: Option<i64>,
}

impl Validate for SystemSearchArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        encode_params(operation, self.params.as_ref()).map(drop)
    }
}

/// Flatten a parameter object into ordered query pairs
pub fn encode_params(
    operation: &str,
    params: Option<&Map<String, Value>>,
) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for (name, value) in params.into_iter().flatten() {
        if name.is_empty() || name.ends_with(':') || name.starts_with(':') {
            return Err(Error::invalid_arguments(
                operation,
                format!("invalid search parameter name \"{name}\""),
            ));
        }
        match value {
            Value::Array(values) => {
                for value in values {
                    if let Some(text) = scalar(operation, name, value)? {
                        pairs.push((name.clone(), text));
                    }
                }
            }
            value => {
                if let Some(text) = scalar(operation, name, value)? {
                    pairs.push((name.clone(), text));
                }
            }
        }
    }
    Ok(pairs)
}

fn scalar(operation: &str, name: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(Error::invalid_arguments(
            operation,
            format!(
                "search parameter \"{name}\" must be a string, number, boolean or an array of those, got {}",
                args::json_type(other)
            ),
        )),
    }
}

/// Resolve the page size: explicit `count` first, then a `_count` inside
/// the parameters, then the configured default. Always clamped.
fn page_size(
    operation: &str,
    limits: &PageLimits,
    count: Option<i64>,
    pairs: &mut Vec<(String, String)>,
) -> Result<u32> {
    let mut from_params = None;
    for (_, value) in pairs.iter().filter(|(name, _)| name == COUNT) {
        let parsed = value.trim().parse::<i64>().map_err(|_| {
            Error::invalid_arguments(operation, format!("_count must be an integer, got \"{value}\""))
        })?;
        from_params = Some(parsed);
    }
    pairs.retain(|(name, _)| name != COUNT);
    Ok(limits.clamp_or_default(count.or(from_params)))
}

async fn run_search(
    ctx: &ToolContext,
    operation: &str,
    segments: Vec<String>,
    params: Option<&Map<String, Value>>,
    count: Option<i64>,
) -> Result<ToolOutput> {
    let mut pairs = encode_params(operation, params)?;
    let page_size = page_size(operation, &ctx.limits, count, &mut pairs)?;

    let mut request = BackendRequest::get(segments);
    request.query = pairs;
    let request = request.query(COUNT, page_size);

    let result = expect_success(ctx.client.call(request).await?)?;
    Ok(ToolOutput::with_summary(search_summary(&result), result))
}

fn search_summary(result: &Value) -> String {
    let returned = bundle::entries(result).len();
    match result.get("total").and_then(Value::as_u64) {
        Some(total) => format!("Found {total} total results, returning {returned} entries."),
        None => format!("Returning {returned} entries."),
    }
}

pub async fn search_resources(ctx: &ToolContext, args: SearchArgs) -> Result<ToolOutput> {
    run_search(
        ctx,
        "search_resources",
        vec![args.resource_type],
        args.params.as_ref(),
        args.count,
    )
    .await
}

pub async fn search_system(ctx: &ToolContext, args: SystemSearchArgs) -> Result<ToolOutput> {
    run_search(ctx, "search_system", Vec::new(), args.params.as_ref(), args.count).await
}
