//! Instance and type level interactions: read, vread, create, update,
//! delete, history and transaction/batch bundles.

use reqwest::Method;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use super::args::{self, Validate};
use super::{ToolContext, ToolOutput, bundle, expect_found, expect_success};
use crate::client::BackendRequest;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResourceKeyArgs {
    /// FHIR resource type, e.g. Patient
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_type: String,
    /// Logical id of the resource
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_id: String,
}

impl Validate for ResourceKeyArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_resource_type(operation, "resource_type", &self.resource_type)?;
        args::check_logical_id(operation, "resource_id", &self.resource_id)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VreadArgs {
    /// FHIR resource type, e.g. Patient
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_type: String,
    /// Logical id of the resource
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_id: String,
    /// Version id to read
    #[serde(deserialize_with = "args::lenient_string")]
    pub version_id: String,
}

impl Validate for VreadArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_resource_type(operation, "resource_type", &self.resource_type)?;
        args::check_logical_id(operation, "resource_id", &self.resource_id)?;
        args::check_logical_id(operation, "version_id", &self.version_id)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateArgs {
    /// FHIR resource type, e.g. Patient
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_type: String,
    /// The resource as a JSON object
    pub resource: Value,
}

impl Validate for CreateArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_resource_type(operation, "resource_type", &self.resource_type)?;
        check_resource_body(operation, &self.resource, &self.resource_type, None)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateArgs {
    /// FHIR resource type, e.g. Patient
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_type: String,
    /// Logical id of the resource
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_id: String,
    /// The complete updated resource as a JSON object
    pub resource: Value,
}

impl Validate for UpdateArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_resource_type(operation, "resource_type", &self.resource_type)?;
        args::check_logical_id(operation, "resource_id", &self.resource_id)?;
        check_resource_body(
            operation,
            &self.resource,
            &self.resource_type,
            Some(&self.resource_id),
        )
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HistoryArgs {
    /// FHIR resource type, e.g. Patient
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_type: String,
    /// Logical id of the resource
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_id: String,
    /// Maximum number of versions to return
    #[serde(default, deserialize_with = "args::lenient_integer")]
    pub count: Option<i64>,
}

impl Validate for HistoryArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_resource_type(operation, "resource_type", &self.resource_type)?;
        args::check_logical_id(operation, "resource_id", &self.resource_id)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TypeHistoryArgs {
    /// FHIR resource type, e.g. Observation
    #[serde(deserialize_with = "args::lenient_string")]
    pub resource_type: String,
    /// Maximum number of history entries to return
    #[serde(default, deserialize_with = "args::lenient_integer")]
    pub count: Option<i64>,
    /// Only changes after this instant (FHIR instant, e.g. 2024-01-01T00:00:00Z)
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub since: Option<String>,
}

impl Validate for TypeHistoryArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_resource_type(operation, "resource_type", &self.resource_type)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransactionArgs {
    /// A Bundle of type transaction or batch
    pub bundle: Value,
}

impl Validate for TransactionArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        let Some(object) = self.bundle.as_object() else {
            return Err(Error::invalid_arguments(
                operation,
                format!("'bundle' must be an object, got {}", args::json_type(&self.bundle)),
            ));
        };
        if object.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
            return Err(Error::invalid_arguments(
                operation,
                "'bundle' must have resourceType Bundle",
            ));
        }
        match object.get("type").and_then(Value::as_str) {
            Some("transaction" | "batch") => Ok(()),
            other => Err(Error::invalid_arguments(
                operation,
                format!(
                    "bundle type must be 'transaction' or 'batch', got {}",
                    other.map(|t| format!("'{t}'")).unwrap_or_else(|| "none".to_string())
                ),
            )),
        }
    }
}

/// The resource must be an object whose `resourceType` (and `id`, for
/// updates) agree with the addressed type and id when present.
fn check_resource_body(
    operation: &str,
    resource: &Value,
    resource_type: &str,
    resource_id: Option<&str>,
) -> Result<()> {
    let Some(object) = resource.as_object() else {
        return Err(Error::invalid_arguments(
            operation,
            format!("'resource' must be an object, got {}", args::json_type(resource)),
        ));
    };
    if let Some(declared) = object.get("resourceType") {
        if declared.as_str() != Some(resource_type) {
            return Err(Error::invalid_arguments(
                operation,
                format!("resource.resourceType {declared} does not match '{resource_type}'"),
            ));
        }
    }
    if let (Some(expected), Some(declared)) = (resource_id, object.get("id")) {
        if declared.as_str() != Some(expected) {
            return Err(Error::invalid_arguments(
                operation,
                format!("resource.id {declared} does not match '{expected}'"),
            ));
        }
    }
    Ok(())
}

/// Fill `resourceType` and, for updates, `id` when the caller left them out
fn complete_resource(mut resource: Value, resource_type: &str, resource_id: Option<&str>) -> Value {
    if let Some(object) = resource.as_object_mut() {
        object
            .entry("resourceType")
            .or_insert_with(|| Value::String(resource_type.to_string()));
        if let Some(id) = resource_id {
            object
                .entry("id")
                .or_insert_with(|| Value::String(id.to_string()));
        }
    }
    resource
}

fn not_found(resource_type: &str, resource_id: &str, version_id: Option<&str>) -> ToolOutput {
    let mut data = json!({
        "found": false,
        "resourceType": resource_type,
        "id": resource_id,
    });
    let label = match version_id {
        Some(version) => {
            data["versionId"] = Value::String(version.to_string());
            format!("{resource_type}/{resource_id}/_history/{version}")
        }
        None => format!("{resource_type}/{resource_id}"),
    };
    ToolOutput::with_summary(format!("{label} not found"), data)
}

pub async fn read_resource(ctx: &ToolContext, args: ResourceKeyArgs) -> Result<ToolOutput> {
    let response = ctx
        .client
        .call(BackendRequest::get([&args.resource_type, &args.resource_id]))
        .await?;
    Ok(match expect_found(response)? {
        Some(resource) => ToolOutput::data(resource),
        None => not_found(&args.resource_type, &args.resource_id, None),
    })
}

pub async fn vread_resource(ctx: &ToolContext, args: VreadArgs) -> Result<ToolOutput> {
    let request = BackendRequest::get([
        args.resource_type.as_str(),
        args.resource_id.as_str(),
        "_history",
        args.version_id.as_str(),
    ]);
    let response = ctx.client.call(request).await?;
    Ok(match expect_found(response)? {
        Some(resource) => ToolOutput::data(resource),
        None => not_found(&args.resource_type, &args.resource_id, Some(&args.version_id)),
    })
}

pub async fn create_resource(ctx: &ToolContext, args: CreateArgs) -> Result<ToolOutput> {
    let resource = complete_resource(args.resource, &args.resource_type, None);
    let request = BackendRequest::post([&args.resource_type]).body(resource);
    let created = expect_success(ctx.client.call(request).await?)?;

    let summary = match created.get("id").and_then(Value::as_str) {
        Some(id) => format!("Created {}/{id}", args.resource_type),
        None => format!("Created {}", args.resource_type),
    };
    Ok(ToolOutput::with_summary(summary, created))
}

pub async fn update_resource(ctx: &ToolContext, args: UpdateArgs) -> Result<ToolOutput> {
    let resource = complete_resource(args.resource, &args.resource_type, Some(&args.resource_id));
    let request = BackendRequest::new(Method::PUT, [&args.resource_type, &args.resource_id])
        .body(resource);
    let updated = expect_success(ctx.client.call(request).await?)?;
    Ok(ToolOutput::with_summary(
        format!("Updated {}/{}", args.resource_type, args.resource_id),
        updated,
    ))
}

pub async fn delete_resource(ctx: &ToolContext, args: ResourceKeyArgs) -> Result<ToolOutput> {
    let request = BackendRequest::new(Method::DELETE, [&args.resource_type, &args.resource_id]);
    let response = ctx.client.call(request).await?;
    let status = response.status;
    let body = expect_success(response)?;

    let mut data = json!({
        "deleted": true,
        "resourceType": args.resource_type,
        "id": args.resource_id,
        "status": status,
    });
    if !body.is_null() {
        data["response"] = body;
    }
    Ok(ToolOutput::with_summary(
        format!("Deleted {}/{}", args.resource_type, args.resource_id),
        data,
    ))
}

pub async fn get_history(ctx: &ToolContext, args: HistoryArgs) -> Result<ToolOutput> {
    let request = BackendRequest::get([
        args.resource_type.as_str(),
        args.resource_id.as_str(),
        "_history",
    ])
    .query_opt("_count", args.count.map(|c| ctx.limits.clamp(c)));
    let history = expect_success(ctx.client.call(request).await?)?;
    Ok(history_output(
        format!("{}/{}", args.resource_type, args.resource_id),
        history,
    ))
}

pub async fn get_type_history(ctx: &ToolContext, args: TypeHistoryArgs) -> Result<ToolOutput> {
    let request = BackendRequest::get([args.resource_type.as_str(), "_history"])
        .query_opt("_count", args.count.map(|c| ctx.limits.clamp(c)))
        .query_opt("_since", args.since);
    let history = expect_success(ctx.client.call(request).await?)?;
    Ok(history_output(args.resource_type, history))
}

fn history_output(subject: String, history: Value) -> ToolOutput {
    let returned = bundle::entries(&history).len();
    let summary = match history.get("total").and_then(Value::as_u64) {
        Some(total) => format!("History of {subject}: {total} versions, returning {returned} entries."),
        None => format!("History of {subject}: returning {returned} entries."),
    };
    ToolOutput::with_summary(summary, history)
}

pub async fn transaction(ctx: &ToolContext, args: TransactionArgs) -> Result<ToolOutput> {
    let kind = args
        .bundle
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("transaction")
        .to_string();
    let entries = bundle::entries(&args.bundle).len();

    let request = BackendRequest::post(Vec::<String>::new()).body(args.bundle);
    let response = expect_success(ctx.client.call(request).await?)?;
    Ok(ToolOutput::with_summary(
        format!("Executed {kind} with {entries} entries"),
        response,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(json!({"resource_type": "Patient", "resource_id": 123}), true)]
    #[case(json!({"resource_type": "Patient", "resource_id": "abc-1.2"}), true)]
    #[case(json!({"resource_type": "patient", "resource_id": "1"}), false)]
    #[case(json!({"resource_type": "Patient", "resource_id": "../metadata"}), false)]
    #[case(json!({"resource_type": "Patient"}), false)]
    fn test_resource_key_validation(#[case] arguments: Value, #[case] ok: bool) {
        let parsed = args::parse::<ResourceKeyArgs>("read_resource", arguments);
        assert_eq!(parsed.is_ok(), ok, "{parsed:?}");
    }

    #[test]
    fn test_numeric_id_is_coerced() {
        let parsed: ResourceKeyArgs =
            args::parse("read_resource", json!({"resource_type": "Patient", "resource_id": 42})).unwrap();
        assert_eq!(parsed.resource_id, "42");
    }

    #[test]
    fn test_create_rejects_mismatched_resource_type() {
        let err = args::parse::<CreateArgs>(
            "create_resource",
            json!({"resource_type": "Patient", "resource": {"resourceType": "Observation"}}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
    }

    #[test]
    fn test_create_rejects_non_object_resource() {
        let err = args::parse::<CreateArgs>(
            "create_resource",
            json!({"resource_type": "Patient", "resource": "{\"resourceType\":\"Patient\"}"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be an object"));
    }

    #[test]
    fn test_update_rejects_mismatched_id() {
        let err = args::parse::<UpdateArgs>(
            "update_resource",
            json!({"resource_type": "Patient", "resource_id": "a", "resource": {"id": "b"}}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
    }

    #[test]
    fn test_complete_resource_fills_missing_fields() {
        let completed = complete_resource(json!({"active": true}), "Patient", Some("p1"));
        assert_eq!(completed, json!({"active": true, "resourceType": "Patient", "id": "p1"}));
    }

    #[rstest]
    #[case(json!({"resourceType": "Bundle", "type": "transaction"}), true)]
    #[case(json!({"resourceType": "Bundle", "type": "batch", "entry": []}), true)]
    #[case(json!({"resourceType": "Bundle", "type": "searchset"}), false)]
    #[case(json!({"resourceType": "Bundle"}), false)]
    #[case(json!({"resourceType": "Patient", "type": "transaction"}), false)]
    #[case(json!([]), false)]
    fn test_transaction_bundle_type(#[case] bundle: Value, #[case] ok: bool) {
        let parsed = args::parse::<TransactionArgs>("transaction", json!({"bundle": bundle}));
        assert_eq!(parsed.is_ok(), ok);
    }

    #[test]
    fn test_not_found_output() {
        let output = not_found("Patient", "missing", Some("3"));
        assert_eq!(output.data["found"], false);
        assert_eq!(output.data["versionId"], "3");
        assert_eq!(output.summary.as_deref(), Some("Patient/missing/_history/3 not found"));
    }
}
