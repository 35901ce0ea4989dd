//! Event envelope delivered through the event bus.
//!
//! Events are immutable once published. Targets are either a specific
//! agent id, the reserved `Captain` recipient, or the `all` broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved target for the singleton coordinator agent.
pub const TARGET_CAPTAIN: &str = "Captain";
/// Reserved target delivered to every live subscription.
pub const TARGET_ALL: &str = "all";

/// Kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Free-form message between agents
    Message,
    /// Agent lifecycle signal routed to the Captain
    AgentSignal,
    /// Supervisor decision on a stop request
    StopApproval,
    /// Dashboard alert raised
    Alert,
    /// Human command persisted for the Captain
    #[serde(rename = "captain/message")]
    CaptainMessage,
    /// Agent asked for human guidance
    GuidanceRequest,
    /// Human answered a guidance request
    GuidanceResponse,
    /// Dashboard state changed
    StateUpdate,
    /// Task handed to a worker
    TaskAssignment,
    /// Tool-call token metering
    TokenUsage,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::AgentSignal => "agent_signal",
            Self::StopApproval => "stop_approval",
            Self::Alert => "alert",
            Self::CaptainMessage => "captain/message",
            Self::GuidanceRequest => "guidance_request",
            Self::GuidanceResponse => "guidance_response",
            Self::StateUpdate => "state_update",
            Self::TaskAssignment => "task_assignment",
            Self::TokenUsage => "token_usage",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "message" => Some(Self::Message),
            "agent_signal" => Some(Self::AgentSignal),
            "stop_approval" => Some(Self::StopApproval),
            "alert" => Some(Self::Alert),
            "captain/message" => Some(Self::CaptainMessage),
            "guidance_request" => Some(Self::GuidanceRequest),
            "guidance_response" => Some(Self::GuidanceResponse),
            "state_update" => Some(Self::StateUpdate),
            "task_assignment" => Some(Self::TaskAssignment),
            "token_usage" => Some(Self::TokenUsage),
            _ => None,
        }
    }
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl EventPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Immutable event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub target: String,
    pub priority: EventPriority,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            source: source.into(),
            target: target.into(),
            priority: EventPriority::Normal,
            payload: Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Whether this event reaches a subscription registered for `target`.
    pub fn matches_target(&self, subscriber_target: &str) -> bool {
        self.target == TARGET_ALL
            || subscriber_target == TARGET_ALL
            || self.target == subscriber_target
    }
}
