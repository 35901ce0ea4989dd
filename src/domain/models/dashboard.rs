//! Dashboard state entities owned by the in-memory state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use super::agent::AgentRecord;
use super::approval::{EscalationRequest, StopApprovalRequest};

/// Alert severity shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A dashboard alert requiring operator attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub agent_id: String,
    pub message: String,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(alert_type: impl Into<String>, agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            alert_type: alert_type.into(),
            severity: AlertSeverity::Warning,
            agent_id: agent_id.into(),
            message: message.into(),
            acknowledged: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// A line in the activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub agent_id: String,
    pub action: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(agent_id: impl Into<String>, action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            action: action.into(),
            details: details.into(),
            created_at: Utc::now(),
        }
    }
}

/// A human command queued for the Captain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptainMessage {
    pub id: String,
    pub text: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl CaptainMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            read: false,
            created_at: Utc::now(),
        }
    }
}

/// Alerting thresholds configurable from the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Agents idle longer than this raise a warning (seconds)
    pub idle_warning_secs: u64,
    /// Unacknowledged critical alerts above this count page the operator
    pub max_open_criticals: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self { idle_warning_secs: 900, max_open_criticals: 3 }
    }
}

/// Retained captain messages; older entries fall off the ring.
pub const CAPTAIN_MESSAGE_RING: usize = 100;

/// The complete dashboard state, snapshotted to `state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardState {
    pub agents: HashMap<String, AgentRecord>,
    pub alerts: HashMap<String, Alert>,
    pub activities: HashMap<String, Activity>,
    pub stop_requests: HashMap<String, StopApprovalRequest>,
    pub escalations: HashMap<String, EscalationRequest>,
    pub captain_status: String,
    pub captain_pane_id: Option<String>,
    pub captain_connected: bool,
    pub last_human_checkin: Option<DateTime<Utc>>,
    #[serde(default)]
    pub alert_thresholds: AlertThresholds,
    pub captain_messages: VecDeque<CaptainMessage>,
}

impl DashboardState {
    /// Append a captain message, evicting the oldest past the ring bound.
    pub fn push_captain_message(&mut self, message: CaptainMessage) {
        self.captain_messages.push_back(message);
        while self.captain_messages.len() > CAPTAIN_MESSAGE_RING {
            self.captain_messages.pop_front();
        }
    }

    /// Pending (unreviewed) stop requests, oldest first.
    pub fn pending_stop_requests(&self) -> Vec<StopApprovalRequest> {
        let mut pending: Vec<_> =
            self.stop_requests.values().filter(|r| !r.reviewed).cloned().collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ring_bounded() {
        let mut state = DashboardState::default();
        for i in 0..150 {
            state.push_captain_message(CaptainMessage::new(format!("msg {i}")));
        }
        assert_eq!(state.captain_messages.len(), CAPTAIN_MESSAGE_RING);
        assert_eq!(state.captain_messages.front().unwrap().text, "msg 50");
        assert_eq!(state.captain_messages.back().unwrap().text, "msg 149");
    }

    #[test]
    fn test_pending_stop_requests_sorted() {
        let mut state = DashboardState::default();
        let mut first = StopApprovalRequest::new("alpha001", "done");
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        let second = StopApprovalRequest::new("beta002", "blocked");
        let mut reviewed = StopApprovalRequest::new("gamma003", "done");
        reviewed.review(true, "ok", "human");

        state.stop_requests.insert(second.id.clone(), second.clone());
        state.stop_requests.insert(first.id.clone(), first.clone());
        state.stop_requests.insert(reviewed.id.clone(), reviewed);

        let pending = state.pending_stop_requests();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);
    }
}
