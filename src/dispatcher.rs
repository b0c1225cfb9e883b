//! Tool dispatch
//!
//! Every invocation walks `Received -> Validated -> Dispatched` and ends in
//! exactly one of `Completed` or `Failed`. Failures never escape as panics or
//! protocol errors: [`ToolDispatcher::call`] always yields a [`ToolCallResult`].

use serde_json::{Value, json};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::client::FhirClient;
use crate::error::{Error, ErrorRecord, Result};
use crate::tools::{
    self, PageLimits, ToolContext, ToolOutput, ToolRequest, ToolSpec, admin, advanced, connection,
    crud, search, terminology,
};

/// Lifecycle of one tool invocation, as reported in debug logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Received,
    Validated,
    Dispatched,
    Completed,
    Failed,
}

/// Terminal result of a tool call in MCP shape
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub is_error: bool,
    pub text: String,
    pub structured: Value,
}

impl ToolCallResult {
    pub fn success(output: &ToolOutput) -> Self {
        let structured = match &output.data {
            Value::Object(_) => output.data.clone(),
            other => json!({ "result": other }),
        };
        Self {
            is_error: false,
            text: output.text(),
            structured,
        }
    }

    pub fn failure(error: &Error) -> Self {
        let record = ErrorRecord::from(error);
        Self {
            is_error: true,
            text: format!("Error: {}", record.message),
            structured: serde_json::to_value(&record).unwrap_or_else(|_| json!({"message": record.message})),
        }
    }

    /// `tools/call` result body
    pub fn to_json(&self) -> Value {
        json!({
            "content": [{"type": "text", "text": self.text}],
            "structuredContent": self.structured,
            "isError": self.is_error,
        })
    }

    /// The error record, when this is a failure
    pub fn error_record(&self) -> Option<ErrorRecord> {
        if self.is_error {
            serde_json::from_value(self.structured.clone()).ok()
        } else {
            None
        }
    }
}

/// Validates tool invocations and routes them to the backend
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    ctx: ToolContext,
    admin_tools_enabled: bool,
}

impl ToolDispatcher {
    pub fn new(client: FhirClient, limits: PageLimits, admin_tools_enabled: bool) -> Self {
        Self {
            ctx: ToolContext { client, limits },
            admin_tools_enabled,
        }
    }

    pub fn client(&self) -> &FhirClient {
        &self.ctx.client
    }

    pub fn admin_tools_enabled(&self) -> bool {
        self.admin_tools_enabled
    }

    /// Tools advertised in `tools/list`; gated tools are hidden while disabled
    pub fn tools(&self) -> impl Iterator<Item = &'static ToolSpec> + '_ {
        tools::TOOLS
            .iter()
            .filter(|spec| self.admin_tools_enabled || !spec.gated)
    }

    /// Run a named tool and shape the outcome for the protocol layer
    pub async fn call(&self, name: &str, arguments: Value) -> ToolCallResult {
        match self.dispatch(name, arguments).await {
            Ok(output) => ToolCallResult::success(&output),
            Err(error) => ToolCallResult::failure(&error),
        }
    }

    /// Validate and execute a named tool
    #[instrument(skip(self, arguments), fields(tool = %name))]
    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let started = Instant::now();
        debug!(state = ?InvocationState::Received);

        let result = self.validate_and_execute(name, arguments).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(state = ?InvocationState::Completed, elapsed_ms),
            Err(error) => warn!(
                state = ?InvocationState::Failed,
                kind = ?error.kind(),
                elapsed_ms,
                "Tool call failed: {error}"
            ),
        }
        result
    }

    async fn validate_and_execute(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        if !self.admin_tools_enabled && tools::find(name).is_some_and(|spec| spec.gated) {
            return Err(Error::Disabled(name.to_string()));
        }

        let request = ToolRequest::parse(name, arguments)?;
        debug!(state = ?InvocationState::Validated);

        self.execute(request).await
    }

    /// Execute an already validated request
    pub async fn execute(&self, request: ToolRequest) -> Result<ToolOutput> {
        if request.is_gated() && !self.admin_tools_enabled {
            return Err(Error::Disabled(request.name().to_string()));
        }
        debug!(state = ?InvocationState::Dispatched, tool = request.name());

        let ctx = &self.ctx;
        match request {
            ToolRequest::SetBlazeUrl(args) => {
                let output = connection::set_blaze_url(ctx, args).await?;
                info!("{}", output.summary.as_deref().unwrap_or("Blaze URL updated"));
                Ok(output)
            }
            ToolRequest::GetBlazeUrl => connection::get_blaze_url(ctx).await,
            ToolRequest::TestConnection(args) => connection::test_connection(ctx, args).await,
            ToolRequest::ReadResource(args) => crud::read_resource(ctx, args).await,
            ToolRequest::VreadResource(args) => crud::vread_resource(ctx, args).await,
            ToolRequest::CreateResource(args) => crud::create_resource(ctx, args).await,
            ToolRequest::UpdateResource(args) => crud::update_resource(ctx, args).await,
            ToolRequest::DeleteResource(args) => crud::delete_resource(ctx, args).await,
            ToolRequest::GetHistory(args) => crud::get_history(ctx, args).await,
            ToolRequest::GetTypeHistory(args) => crud::get_type_history(ctx, args).await,
            ToolRequest::Transaction(args) => crud::transaction(ctx, args).await,
            ToolRequest::SearchResources(args) => search::search_resources(ctx, args).await,
            ToolRequest::SearchSystem(args) => search::search_system(ctx, args).await,
            ToolRequest::ValidateCode(args) => terminology::validate_code(ctx, args).await,
            ToolRequest::ExpandValueSet(args) => terminology::expand_valueset(ctx, args).await,
            ToolRequest::LookupCode(args) => terminology::lookup_code(ctx, args).await,
            ToolRequest::PatientEverything(args) => advanced::patient_everything(ctx, args).await,
            ToolRequest::EvaluateMeasure(args) => advanced::evaluate_measure(ctx, args).await,
            ToolRequest::GraphqlQuery(args) => advanced::graphql_query(ctx, args).await,
            ToolRequest::GetTotals => admin::get_totals(ctx).await,
            ToolRequest::RunCompaction(args) => admin::run_compaction(ctx, args).await,
            ToolRequest::RunReindex(args) => admin::run_reindex(ctx, args).await,
        }
    }
}
