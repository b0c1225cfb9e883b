//! Terminology operations on CodeSystem and ValueSet

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::args::{self, Validate};
use super::{ToolContext, ToolOutput, expect_success};
use crate::client::BackendRequest;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidateCodeArgs {
    /// Code system URL, e.g. http://loinc.org
    #[serde(deserialize_with = "args::lenient_string")]
    pub system: String,
    /// The code to validate
    #[serde(deserialize_with = "args::lenient_string")]
    pub code: String,
    /// Display text to check along with the code
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub display: Option<String>,
}

impl Validate for ValidateCodeArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_not_blank(operation, "system", &self.system)?;
        args::check_not_blank(operation, "code", &self.code)
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ExpandValueSetArgs {
    /// Id of a ValueSet stored on the server
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub valueset_id: Option<String>,
    /// Canonical URL of the ValueSet
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub url: Option<String>,
    /// Text filter applied to the expansion
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub filter: Option<String>,
    /// Maximum number of codes to return
    #[serde(default, deserialize_with = "args::lenient_integer")]
    pub count: Option<i64>,
}

impl Validate for ExpandValueSetArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        if self.valueset_id.is_none() && self.url.is_none() {
            return Err(Error::invalid_arguments(
                operation,
                "either 'valueset_id' or 'url' is required",
            ));
        }
        if let Some(id) = &self.valueset_id {
            args::check_logical_id(operation, "valueset_id", id)?;
        }
        if let Some(url) = &self.url {
            args::check_not_blank(operation, "url", url)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LookupCodeArgs {
    /// Code system URL, e.g. http://snomed.info/sct
    #[serde(deserialize_with = "args::lenient_string")]
    pub system: String,
    /// The code to look up
    #[serde(deserialize_with = "args::lenient_string")]
    pub code: String,
}

impl Validate for LookupCodeArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_not_blank(operation, "system", &self.system)?;
        args::check_not_blank(operation, "code", &self.code)
    }
}

/// First `Parameters.parameter` with this name
fn parameter<'a>(parameters: &'a Value, name: &str) -> Option<&'a Value> {
    parameters
        .get("parameter")?
        .as_array()?
        .iter()
        .find(|p| p.get("name").and_then(Value::as_str) == Some(name))
}

pub async fn validate_code(ctx: &ToolContext, args: ValidateCodeArgs) -> Result<ToolOutput> {
    let request = BackendRequest::get(["CodeSystem", "$validate-code"])
        .query("system", &args.system)
        .query("code", &args.code)
        .query_opt("display", args.display.as_deref());
    let result = expect_success(ctx.client.call(request).await?)?;

    let valid = parameter(&result, "result").and_then(|p| p.get("valueBoolean")).and_then(Value::as_bool);
    let message = parameter(&result, "message")
        .and_then(|p| p.get("valueString"))
        .and_then(Value::as_str);
    let mut summary = match valid {
        Some(true) => format!("Code {} is valid in {}", args.code, args.system),
        Some(false) => format!("Code {} is NOT valid in {}", args.code, args.system),
        None => format!("Validation result for {} in {}", args.code, args.system),
    };
    if let Some(message) = message {
        summary.push_str(": ");
        summary.push_str(message);
    }
    Ok(ToolOutput::with_summary(summary, result))
}

pub async fn expand_valueset(ctx: &ToolContext, args: ExpandValueSetArgs) -> Result<ToolOutput> {
    // `url` is forwarded even with an id; the server checks that they agree
    let request = match &args.valueset_id {
        Some(id) => BackendRequest::get(["ValueSet", id.as_str(), "$expand"]),
        None => BackendRequest::get(["ValueSet", "$expand"]),
    }
    .query_opt("url", args.url.as_deref())
    .query_opt("filter", args.filter.as_deref())
    .query_opt("count", args.count.map(|c| ctx.limits.clamp(c)));
    let expansion = expect_success(ctx.client.call(request).await?)?;

    let contains = expansion
        .pointer("/expansion/contains")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    let summary = match expansion.pointer("/expansion/total").and_then(Value::as_u64) {
        Some(total) => format!("Expansion has {total} codes, returning {contains}."),
        None => format!("Expansion returned {contains} codes."),
    };
    Ok(ToolOutput::with_summary(summary, expansion))
}

pub async fn lookup_code(ctx: &ToolContext, args: LookupCodeArgs) -> Result<ToolOutput> {
    let request = BackendRequest::get(["CodeSystem", "$lookup"])
        .query("system", &args.system)
        .query("code", &args.code);
    let result = expect_success(ctx.client.call(request).await?)?;

    let display = parameter(&result, "display")
        .and_then(|p| p.get("valueString"))
        .and_then(Value::as_str);
    let summary = match display {
        Some(display) => format!("{}|{}: {display}", args.system, args.code),
        None => format!("Lookup result for {}|{}", args.system, args.code),
    };
    Ok(ToolOutput::with_summary(summary, result))
}
