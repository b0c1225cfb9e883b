//! Compartment, measure and GraphQL operations

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::args::{self, Validate};
use super::{ToolContext, ToolOutput, bundle, expect_success, follow_pages};
use crate::client::{Accept, BackendRequest};
use crate::error::Result;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PatientEverythingArgs {
    /// Logical id of the Patient
    #[serde(deserialize_with = "args::lenient_string")]
    pub patient_id: String,
    /// Only resources dated on or after this date (YYYY-MM-DD)
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub start: Option<String>,
    /// Only resources dated on or before this date (YYYY-MM-DD)
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub end: Option<String>,
    /// Page size; clamped to the server's maximum
    #[serde(default, deserialize_with = "args::lenient_integer")]
    pub count: Option<i64>,
    /// Follow `next` links and merge every page into one result
    #[serde(default, deserialize_with = "args::lenient_bool")]
    pub all_pages: Option<bool>,
}

impl Validate for PatientEverythingArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_logical_id(operation, "patient_id", &self.patient_id)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EvaluateMeasureArgs {
    /// Logical id of the Measure
    #[serde(deserialize_with = "args::lenient_string")]
    pub measure_id: String,
    /// Start of the measurement period (YYYY-MM-DD)
    #[serde(deserialize_with = "args::lenient_string")]
    pub period_start: String,
    /// End of the measurement period (YYYY-MM-DD)
    #[serde(deserialize_with = "args::lenient_string")]
    pub period_end: String,
    /// Restrict evaluation to one subject, e.g. Patient/123
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub subject: Option<String>,
    /// Report type: population, subject or subject-list
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub report_type: Option<String>,
}

impl Validate for EvaluateMeasureArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_logical_id(operation, "measure_id", &self.measure_id)?;
        args::check_not_blank(operation, "period_start", &self.period_start)?;
        args::check_not_blank(operation, "period_end", &self.period_end)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GraphqlArgs {
    /// GraphQL query text
    #[serde(deserialize_with = "args::lenient_string")]
    pub query: String,
    /// Variables referenced by the query
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
}

impl Validate for GraphqlArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        args::check_not_blank(operation, "query", &self.query)
    }
}

pub async fn patient_everything(ctx: &ToolContext, args: PatientEverythingArgs) -> Result<ToolOutput> {
    let request = BackendRequest::get(["Patient", args.patient_id.as_str(), "$everything"])
        .query_opt("start", args.start.as_deref())
        .query_opt("end", args.end.as_deref())
        .query_opt("_count", args.count.map(|c| ctx.limits.clamp(c)));
    let first = expect_success(ctx.client.call(request).await?)?;

    let pages = if args.all_pages.unwrap_or(false) {
        follow_pages(&ctx.client, first).await?
    } else {
        vec![first]
    };

    let counts = bundle::count_by_resource_type(&pages);
    let total_entries: u64 = counts.values().sum();

    let mut summary = format!("Patient {} has {total_entries} resources:", args.patient_id);
    for (resource_type, count) in &counts {
        summary.push_str(&format!("\n  - {resource_type}: {count}"));
    }

    let page_count = pages.len();
    let merged = merge_pages(pages);
    Ok(ToolOutput::with_summary(
        summary,
        json!({
            "patient_id": args.patient_id,
            "total_entries": total_entries,
            "resource_counts": bundle::counts_to_json(&counts),
            "pages": page_count,
            "bundle": merged,
        }),
    ))
}

/// Fold later pages' entries into the first page
fn merge_pages(pages: Vec<Value>) -> Value {
    let mut pages = pages.into_iter();
    let Some(mut merged) = pages.next() else {
        return Value::Null;
    };
    let extra: Vec<Value> = pages
        .flat_map(|page| bundle::entries(&page).to_vec())
        .collect();
    if extra.is_empty() {
        return merged;
    }
    if let Some(object) = merged.as_object_mut() {
        let entry = object.entry("entry").or_insert_with(|| Value::Array(Vec::new()));
        if let Some(entries) = entry.as_array_mut() {
            entries.extend(extra);
        }
        object.remove("link");
    }
    merged
}

pub async fn evaluate_measure(ctx: &ToolContext, args: EvaluateMeasureArgs) -> Result<ToolOutput> {
    let request = BackendRequest::get(["Measure", args.measure_id.as_str(), "$evaluate-measure"])
        .query("periodStart", &args.period_start)
        .query("periodEnd", &args.period_end)
        .query_opt("subject", args.subject.as_deref())
        .query_opt("reportType", args.report_type.as_deref());
    let report = expect_success(ctx.client.call(request).await?)?;

    let mut summary = format!(
        "MeasureReport for Measure/{} ({} to {})",
        args.measure_id, args.period_start, args.period_end
    );
    for (index, group) in report
        .get("group")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
    {
        let populations = group
            .get("population")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|p| {
                let code = p.pointer("/code/coding/0/code").and_then(Value::as_str)?;
                let count = p.get("count").and_then(Value::as_i64)?;
                Some(format!("{code}={count}"))
            })
            .collect::<Vec<_>>();
        if !populations.is_empty() {
            summary.push_str(&format!("\n  group {}: {}", index + 1, populations.join(", ")));
        }
    }
    Ok(ToolOutput::with_summary(summary, report))
}

pub async fn graphql_query(ctx: &ToolContext, args: GraphqlArgs) -> Result<ToolOutput> {
    let mut body = json!({"query": args.query});
    if let Some(variables) = args.variables {
        body["variables"] = Value::Object(variables);
    }
    let request = BackendRequest::post(["$graphql"]).body(body).accept(Accept::Json);
    let result = expect_success(ctx.client.call(request).await?)?;

    let errors = result.get("errors").and_then(Value::as_array).map_or(0, Vec::len);
    Ok(if errors > 0 {
        ToolOutput::with_summary(format!("GraphQL query returned {errors} error(s)"), result)
    } else {
        ToolOutput::data(result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(types: &[&str], next: Option<&str>) -> Value {
        let mut page = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": types.iter().map(|t| json!({"resource": {"resourceType": t}})).collect::<Vec<_>>()
        });
        if let Some(next) = next {
            page["link"] = json!([{"relation": "next", "url": next}]);
        }
        page
    }

    #[test]
    fn test_merge_pages_appends_entries_and_drops_links() {
        let merged = merge_pages(vec![
            page(&["Patient", "Observation"], Some("http://blaze/fhir/__page/2")),
            page(&["Condition"], None),
        ]);
        assert_eq!(bundle::entries(&merged).len(), 3);
        assert!(merged.get("link").is_none());
    }

    #[test]
    fn test_merge_single_page_is_untouched() {
        let single = page(&["Patient"], Some("http://blaze/fhir/__page/2"));
        assert_eq!(merge_pages(vec![single.clone()]), single);
    }

    #[test]
    fn test_everything_arguments() {
        let parsed: PatientEverythingArgs = args::parse(
            "patient_everything",
            json!({"patient_id": 17, "all_pages": "true", "count": "500"}),
        )
        .unwrap();
        assert_eq!(parsed.patient_id, "17");
        assert_eq!(parsed.all_pages, Some(true));
        assert_eq!(parsed.count, Some(500));
    }

    #[test]
    fn test_measure_requires_period() {
        assert!(args::parse::<EvaluateMeasureArgs>(
            "evaluate_measure",
            json!({"measure_id": "m1", "period_start": "2024-01-01"})
        )
        .is_err());
    }
}
