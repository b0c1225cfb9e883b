//! MCP tools implementation
//!
//! Every tool is one variant of [`ToolRequest`] with a typed argument struct.
//! The argument structs double as the source of the JSON schemas advertised
//! through `tools/list`.
//!
//! Categories:
//! - connection: inspect, test and switch the Blaze target
//! - crud: read, version-read, create, update, delete, history, transaction
//! - search: type-level and system-level search
//! - terminology: `$validate-code`, `$expand`, `$lookup`
//! - advanced: `$everything`, `$evaluate-measure`, GraphQL
//! - admin: `$totals`, `$compact`, `$re-index`

pub mod admin;
pub mod advanced;
pub mod args;
pub mod bundle;
pub mod connection;
pub mod crud;
pub mod search;
pub mod terminology;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::client::{BackendResponse, FhirClient};
use crate::error::{Error, Result};

pub use args::PageLimits;

/// Tool grouping, used for listing and for the admin gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Connection,
    Crud,
    Search,
    Terminology,
    Advanced,
    Admin,
}

/// Static description of one tool
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    /// Subject to the `admin_tools_enabled` switch
    pub gated: bool,
    schema: fn() -> Value,
}

impl ToolSpec {
    pub fn input_schema(&self) -> Value {
        (self.schema)()
    }
}

/// Tool with no arguments
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct NoArgs {}

impl args::Validate for NoArgs {}

fn schema<T: JsonSchema>() -> Value {
    let mut value = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| json!({"type": "object"}));
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
        object.entry("properties").or_insert_with(|| json!({}));
    }
    value
}

macro_rules! tool {
    ($name:literal, $category:ident, $gated:literal, $args:ty, $description:literal) => {
        ToolSpec {
            name: $name,
            description: $description,
            category: ToolCategory::$category,
            gated: $gated,
            schema: schema::<$args>,
        }
    };
}

/// Every tool this server knows, in listing order
pub const TOOLS: &[ToolSpec] = &[
    tool!("set_blaze_url", Connection, false, connection::SetBlazeUrlArgs,
        "Set the Blaze FHIR server URL for subsequent operations. Use this when connecting to a different Blaze instance."),
    tool!("get_blaze_url", Connection, false, NoArgs,
        "Get the currently configured Blaze FHIR server URL and request timeout"),
    tool!("test_connection", Connection, false, connection::TestConnectionArgs,
        "Test the connection to the Blaze server by fetching its CapabilityStatement"),
    tool!("read_resource", Crud, false, crud::ResourceKeyArgs,
        "Read a FHIR resource by type and ID"),
    tool!("vread_resource", Crud, false, crud::VreadArgs,
        "Read a specific version of a FHIR resource"),
    tool!("create_resource", Crud, false, crud::CreateArgs,
        "Create a new FHIR resource"),
    tool!("update_resource", Crud, false, crud::UpdateArgs,
        "Update an existing FHIR resource"),
    tool!("delete_resource", Crud, false, crud::ResourceKeyArgs,
        "Delete a FHIR resource"),
    tool!("get_history", Crud, false, crud::HistoryArgs,
        "Get the version history of a FHIR resource"),
    tool!("get_type_history", Crud, false, crud::TypeHistoryArgs,
        "Get the change history of all resources of one type"),
    tool!("transaction", Crud, false, crud::TransactionArgs,
        "Execute a FHIR transaction or batch bundle"),
    tool!("search_resources", Search, false, search::SearchArgs,
        "Search for FHIR resources of a given type with query parameters"),
    tool!("search_system", Search, false, search::SystemSearchArgs,
        "Search across all FHIR resource types"),
    tool!("validate_code", Terminology, false, terminology::ValidateCodeArgs,
        "Validate a code against a code system"),
    tool!("expand_valueset", Terminology, false, terminology::ExpandValueSetArgs,
        "Expand a value set to list all contained codes"),
    tool!("lookup_code", Terminology, false, terminology::LookupCodeArgs,
        "Look up detailed information about a code"),
    tool!("patient_everything", Advanced, false, advanced::PatientEverythingArgs,
        "Get all resources in a patient's compartment ($everything) with a per-type summary"),
    tool!("evaluate_measure", Advanced, false, advanced::EvaluateMeasureArgs,
        "Evaluate a quality measure against patient data"),
    tool!("graphql_query", Advanced, false, advanced::GraphqlArgs,
        "Execute a GraphQL query against the FHIR server"),
    tool!("get_totals", Admin, false, NoArgs,
        "Get resource counts by type"),
    tool!("run_compaction", Admin, true, admin::CompactionArgs,
        "Trigger database compaction"),
    tool!("run_reindex", Admin, true, admin::ReindexArgs,
        "Trigger re-indexing of search parameters"),
];

/// Look up a tool by name
pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|spec| spec.name == name)
}

/// A validated tool invocation
#[derive(Debug)]
pub enum ToolRequest {
    SetBlazeUrl(connection::SetBlazeUrlArgs),
    GetBlazeUrl,
    TestConnection(connection::TestConnectionArgs),
    ReadResource(crud::ResourceKeyArgs),
    VreadResource(crud::VreadArgs),
    CreateResource(crud::CreateArgs),
    UpdateResource(crud::UpdateArgs),
    DeleteResource(crud::ResourceKeyArgs),
    GetHistory(crud::HistoryArgs),
    GetTypeHistory(crud::TypeHistoryArgs),
    Transaction(crud::TransactionArgs),
    SearchResources(search::SearchArgs),
    SearchSystem(search::SystemSearchArgs),
    ValidateCode(terminology::ValidateCodeArgs),
    ExpandValueSet(terminology::ExpandValueSetArgs),
    LookupCode(terminology::LookupCodeArgs),
    PatientEverything(advanced::PatientEverythingArgs),
    EvaluateMeasure(advanced::EvaluateMeasureArgs),
    GraphqlQuery(advanced::GraphqlArgs),
    GetTotals,
    RunCompaction(admin::CompactionArgs),
    RunReindex(admin::ReindexArgs),
}

impl ToolRequest {
    /// Validate a named invocation into its typed form
    pub fn parse(name: &str, arguments: Value) -> Result<Self> {
        use args::parse;

        let request = match name {
            "set_blaze_url" => Self::SetBlazeUrl(parse(name, arguments)?),
            "get_blaze_url" => {
                parse::<NoArgs>(name, arguments)?;
                Self::GetBlazeUrl
            }
            "test_connection" => Self::TestConnection(parse(name, arguments)?),
            "read_resource" => Self::ReadResource(parse(name, arguments)?),
            "vread_resource" => Self::VreadResource(parse(name, arguments)?),
            "create_resource" => Self::CreateResource(parse(name, arguments)?),
            "update_resource" => Self::UpdateResource(parse(name, arguments)?),
            "delete_resource" => Self::DeleteResource(parse(name, arguments)?),
            "get_history" => Self::GetHistory(parse(name, arguments)?),
            "get_type_history" => Self::GetTypeHistory(parse(name, arguments)?),
            "transaction" => Self::Transaction(parse(name, arguments)?),
            "search_resources" => Self::SearchResources(parse(name, arguments)?),
            "search_system" => Self::SearchSystem(parse(name, arguments)?),
            "validate_code" => Self::ValidateCode(parse(name, arguments)?),
            "expand_valueset" => Self::ExpandValueSet(parse(name, arguments)?),
            "lookup_code" => Self::LookupCode(parse(name, arguments)?),
            "patient_everything" => Self::PatientEverything(parse(name, arguments)?),
            "evaluate_measure" => Self::EvaluateMeasure(parse(name, arguments)?),
            "graphql_query" => Self::GraphqlQuery(parse(name, arguments)?),
            "get_totals" => {
                parse::<NoArgs>(name, arguments)?;
                Self::GetTotals
            }
            "run_compaction" => Self::RunCompaction(parse(name, arguments)?),
            "run_reindex" => Self::RunReindex(parse(name, arguments)?),
            _ => return Err(Error::UnknownOperation(name.to_string())),
        };
        Ok(request)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetBlazeUrl(_) => "set_blaze_url",
            Self::GetBlazeUrl => "get_blaze_url",
            Self::TestConnection(_) => "test_connection",
            Self::ReadResource(_) => "read_resource",
            Self::VreadResource(_) => "vread_resource",
            Self::CreateResource(_) => "create_resource",
            Self::UpdateResource(_) => "update_resource",
            Self::DeleteResource(_) => "delete_resource",
            Self::GetHistory(_) => "get_history",
            Self::GetTypeHistory(_) => "get_type_history",
            Self::Transaction(_) => "transaction",
            Self::SearchResources(_) => "search_resources",
            Self::SearchSystem(_) => "search_system",
            Self::ValidateCode(_) => "validate_code",
            Self::ExpandValueSet(_) => "expand_valueset",
            Self::LookupCode(_) => "lookup_code",
            Self::PatientEverything(_) => "patient_everything",
            Self::EvaluateMeasure(_) => "evaluate_measure",
            Self::GraphqlQuery(_) => "graphql_query",
            Self::GetTotals => "get_totals",
            Self::RunCompaction(_) => "run_compaction",
            Self::RunReindex(_) => "run_reindex",
        }
    }

    /// Whether the admin switch applies to this request
    pub fn is_gated(&self) -> bool {
        find(self.name()).is_some_and(|spec| spec.gated)
    }
}

/// What a completed tool hands back: an optional human summary plus data
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub summary: Option<String>,
    pub data: Value,
}

impl ToolOutput {
    pub fn data(data: Value) -> Self {
        Self { summary: None, data }
    }

    pub fn with_summary(summary: impl Into<String>, data: Value) -> Self {
        Self {
            summary: Some(summary.into()),
            data,
        }
    }

    /// Text rendering: the summary, then the pretty-printed data
    pub fn text(&self) -> String {
        let body = serde_json::to_string_pretty(&self.data).unwrap_or_else(|_| self.data.to_string());
        match &self.summary {
            Some(summary) if self.data.is_null() => summary.clone(),
            Some(summary) => format!("{summary}\n\n{body}"),
            None => body,
        }
    }
}

/// Shared dependencies handed to every tool handler
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub client: FhirClient,
    pub limits: PageLimits,
}

/// Require a 2xx answer and take its body
pub fn expect_success(response: BackendResponse) -> Result<Value> {
    if response.is_success() {
        Ok(response.into_json())
    } else {
        Err(rejection(&response))
    }
}

/// Upper bound on Bundle pages gathered for one answer
pub const MAX_PAGES: usize = 50;

/// Gather `first` and the pages behind its `next` links, at most [`MAX_PAGES`] in all
pub async fn follow_pages(client: &FhirClient, first: Value) -> Result<Vec<Value>> {
    let mut pages = vec![first];
    while let Some(next) = pages.last().and_then(bundle::next_link).map(str::to_string) {
        if pages.len() >= MAX_PAGES {
            warn!(pages = pages.len(), "Stopped following next links");
            break;
        }
        debug!(%next, "Following next link");
        pages.push(expect_success(client.get_absolute(&next).await?)?);
    }
    Ok(pages)
}

/// Lookup-style interpretation: 404 is a normal "not found", not a failure
pub fn expect_found(response: BackendResponse) -> Result<Option<Value>> {
    if response.status == 404 {
        Ok(None)
    } else {
        expect_success(response).map(Some)
    }
}

/// Build the `BackendRejected` error for a non-success answer.
///
/// An `OperationOutcome` body is carried verbatim; any other body is quoted as text.
pub fn rejection(response: &BackendResponse) -> Error {
    let outcome = response.operation_outcome().cloned();
    let text = response.text();
    let diagnostics = if text.trim().is_empty() {
        format!("HTTP {} with an empty body", response.status)
    } else {
        text
    };
    Error::BackendRejected {
        status: response.status,
        diagnostics,
        outcome,
    }
}
