//! Typed tool surface callable by agents.
//!
//! Tools live in a table keyed by name; dispatch is a map lookup, serde
//! parameter validation, then the handler. Every successful call refreshes
//! the caller's heartbeat and emits a token-estimation event for metering.

pub mod handlers;
pub mod types;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::models::{Event, EventPriority, EventType};
use crate::domain::ports::{
    AgentLedger, AssignmentRepository, MemoryRepository, ReviewRepository, TaskRepository,
};
use crate::services::approval::ApprovalEngine;
use crate::services::captain::CaptainBridge;
use crate::services::event_bus::EventBus;
use crate::services::lifecycle::LifecycleCoordinator;
use crate::services::review_board::ReviewBoardService;
use crate::services::state_store::StateStore;

pub use types::{Notification, ToolCall, ToolError, ToolResult};

/// Flat token estimate charged per successful tool call until a
/// model-reported usage hook exists.
pub const TOKENS_PER_CALL: u64 = 500;

/// Target label for metering events so they do not wake agent waiters.
pub const TARGET_METRICS: &str = "metrics";

/// Everything a tool handler can reach.
pub struct ToolDeps {
    pub store: Arc<StateStore>,
    pub lifecycle: Arc<LifecycleCoordinator>,
    pub approval: Arc<ApprovalEngine>,
    pub captain: Arc<CaptainBridge>,
    pub review_board: Arc<ReviewBoardService>,
    pub bus: EventBus,
    pub ledger: Arc<dyn AgentLedger>,
    pub tasks: Arc<dyn TaskRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub reviews: Arc<dyn ReviewRepository>,
    pub memory: Arc<dyn MemoryRepository>,
    /// Default wait for `wait_for_events`
    pub approval_timeout: Duration,
    /// Rework rounds before forced escalation
    pub max_review_cycles: u32,
}

/// Per-call context: the transport-inferred caller plus shared handles.
#[derive(Clone)]
pub struct ToolContext {
    pub caller_agent_id: String,
    pub deps: Arc<ToolDeps>,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;
type Handler = Arc<dyn Fn(ToolContext, Value) -> HandlerFuture + Send + Sync>;

pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    handler: Handler,
}

pub struct ToolRegistry {
    deps: Arc<ToolDeps>,
    tools: HashMap<&'static str, ToolDef>,
}

impl ToolRegistry {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        let mut registry = Self { deps, tools: HashMap::new() };
        handlers::register_all(&mut registry);
        registry
    }

    /// Add a tool. Later registrations with the same name replace earlier
    /// ones; handler modules rely on unique names.
    pub fn register<F, Fut>(
        &mut self,
        name: &'static str,
        description: &'static str,
        input_schema: Value,
        handler: F,
    ) where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx, args| Box::pin(handler(ctx, args)));
        self.tools.insert(name, ToolDef { name, description, input_schema, handler });
    }

    /// Tool descriptors for the transport's `tools/list`.
    pub fn list(&self) -> Vec<Value> {
        let mut tools: Vec<&ToolDef> = self.tools.values().collect();
        tools.sort_by_key(|t| t.name);
        tools
            .into_iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Dispatch by name for an inferred caller.
    pub async fn dispatch(
        &self,
        caller_agent_id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<Value, ToolError> {
        let Some(def) = self.tools.get(name) else {
            return Err(ToolError::unknown_tool(name));
        };

        debug!(caller = caller_agent_id, tool = name, "tool call");

        // Any tool call is proof of life.
        self.deps.lifecycle.mark_connected(caller_agent_id).await;

        let ctx = ToolContext {
            caller_agent_id: caller_agent_id.to_string(),
            deps: Arc::clone(&self.deps),
        };
        let result = (def.handler)(ctx, arguments).await;

        if result.is_ok() {
            self.meter(caller_agent_id, name).await;
        }
        result
    }

    /// Full wire round-trip: `tool_call` in, `tool_result` out.
    pub async fn handle_call(&self, caller_agent_id: &str, call: ToolCall) -> ToolResult {
        match self.dispatch(caller_agent_id, &call.name, call.arguments).await {
            Ok(content) => ToolResult::ok(call.id, content),
            Err(error) => ToolResult::err(call.id, error),
        }
    }

    async fn meter(&self, caller_agent_id: &str, tool: &str) {
        if let Err(e) = self.deps.memory.record_tool_call(caller_agent_id, TOKENS_PER_CALL).await {
            warn!(caller = caller_agent_id, error = %e, "metering write failed");
        }
        self.deps
            .bus
            .publish(
                Event::new(EventType::TokenUsage, caller_agent_id, TARGET_METRICS)
                    .with_priority(EventPriority::Low)
                    .with_payload(json!({
                        "tool": tool,
                        "tokens_estimated": TOKENS_PER_CALL,
                    })),
            )
            .await;
    }
}

/// Deserialize tool arguments, mapping failures to a validation error.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::invalid_params(format!("Invalid parameters: {e}")))
}
