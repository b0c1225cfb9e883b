//! Connection tools: inspect, probe and switch the Blaze target

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use super::args::{self, Validate};
use super::{ToolContext, ToolOutput, expect_success};
use crate::client::BackendRequest;
use crate::error::{Error, Result};
use crate::session::Target;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetBlazeUrlArgs {
    /// Base URL of the Blaze FHIR endpoint, e.g. http://localhost:8080/fhir
    #[serde(deserialize_with = "args::lenient_string")]
    pub url: String,
    /// Request timeout in seconds; the current timeout is kept when omitted
    #[serde(default, deserialize_with = "args::lenient_integer")]
    pub timeout_seconds: Option<i64>,
}

impl Validate for SetBlazeUrlArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_not_blank(operation, "url", &self.url)?;
        if let Some(timeout) = self.timeout_seconds {
            if timeout <= 0 {
                return Err(Error::invalid_arguments(
                    operation,
                    format!("'timeout_seconds' must be a positive number of seconds, got {timeout}"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct TestConnectionArgs {
    /// URL to probe instead of the current target; the session is not changed
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub url: Option<String>,
}

impl Validate for TestConnectionArgs {}

fn describe_target(target: &Target) -> Value {
    json!({
        "url": target.display_url(),
        "timeout_secs": target.timeout().as_secs_f64(),
    })
}

pub async fn set_blaze_url(ctx: &ToolContext, args: SetBlazeUrlArgs) -> Result<ToolOutput> {
    let session = ctx.client.session();
    let timeout = args.timeout_seconds.map(|secs| Duration::from_secs(secs as u64));
    let previous = session.set_target(&args.url, timeout).await?;
    let current = session.get_target().await;

    let mut data = describe_target(&current);
    data["previous_url"] = Value::String(previous.display_url());
    Ok(ToolOutput::with_summary(
        format!("Blaze URL set to: {}", current.display_url()),
        data,
    ))
}

pub async fn get_blaze_url(ctx: &ToolContext) -> Result<ToolOutput> {
    let target = ctx.client.session().get_target().await;
    Ok(ToolOutput::with_summary(
        format!("Current Blaze URL: {}", target.display_url()),
        describe_target(&target),
    ))
}

/// Fetch `/metadata` from the current or a candidate target
pub async fn test_connection(ctx: &ToolContext, args: TestConnectionArgs) -> Result<ToolOutput> {
    let current = ctx.client.session().get_target().await;
    let target = match args.url.as_deref() {
        Some(url) => Target::new(url, current.timeout())?,
        None => (*current).clone(),
    };

    let response = ctx
        .client
        .call_with_target(&target, BackendRequest::get(["metadata"]))
        .await?;
    let status = response.status;
    let capabilities = expect_success(response)?;

    let software = capabilities.get("software");
    let name = software
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("FHIR server");
    let version = software.and_then(|s| s.get("version")).and_then(Value::as_str);
    let fhir_version = capabilities.get("fhirVersion").and_then(Value::as_str);

    let summary = format!(
        "Connected to {name}{} at {} (FHIR {})",
        version.map(|v| format!(" {v}")).unwrap_or_default(),
        target.display_url(),
        fhir_version.unwrap_or("unknown"),
    );
    Ok(ToolOutput::with_summary(
        summary,
        json!({
            "connected": true,
            "url": target.display_url(),
            "status": status,
            "software": {"name": name, "version": version},
            "fhir_version": fhir_version,
        }),
    ))
}
