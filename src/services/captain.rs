//! Captain bridge: the singleton coordinator's view of the system.
//!
//! Receives agent signals, persists human commands, and forwards messages.
//! The Captain is itself an agent with the reserved `Captain` id and gets
//! the same presence tracking as everyone else.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::domain::models::{
    Activity, AgentStatus, CaptainMessage, Event, EventPriority, EventType, TARGET_ALL,
    TARGET_CAPTAIN,
};
use crate::services::event_bus::EventBus;
use crate::services::lifecycle::LifecycleCoordinator;
use crate::services::state_store::StateStore;

/// Lifecycle signals agents may raise toward the Captain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSignal {
    Working,
    Completed,
    Blocked,
    Idle,
    Error,
}

impl AgentSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Idle => "idle",
            Self::Error => "error",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "working" => Some(Self::Working),
            "completed" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            "idle" => Some(Self::Idle),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Status the signal drives the agent into.
    pub const fn target_status(&self) -> AgentStatus {
        match self {
            Self::Working => AgentStatus::Working,
            Self::Completed | Self::Idle => AgentStatus::Idle,
            Self::Blocked => AgentStatus::Blocked,
            Self::Error => AgentStatus::Error,
        }
    }

    /// Blocked and error signals interrupt the Captain at high priority.
    pub const fn is_urgent(&self) -> bool {
        matches!(self, Self::Blocked | Self::Error)
    }
}

pub struct CaptainBridge {
    store: Arc<StateStore>,
    lifecycle: Arc<LifecycleCoordinator>,
    bus: EventBus,
}

impl CaptainBridge {
    pub fn new(store: Arc<StateStore>, lifecycle: Arc<LifecycleCoordinator>, bus: EventBus) -> Self {
        Self { store, lifecycle, bus }
    }

    /// Process an agent's lifecycle signal: status transition, activity
    /// feed entry, and a republish targeted at the Captain.
    pub async fn handle_signal(
        &self,
        agent_id: &str,
        signal: AgentSignal,
        context: &str,
        work_completed: bool,
    ) {
        self.lifecycle.set_status(agent_id, signal.target_status()).await;
        if signal == AgentSignal::Working && !context.is_empty() {
            self.lifecycle.set_current_task(agent_id, context).await;
        }

        let activity = Activity::new(agent_id, format!("signal_{}", signal.as_str()), context);
        self.store.update(|state| {
            state.activities.insert(activity.id.clone(), activity);
        });

        let priority = if signal.is_urgent() { EventPriority::High } else { EventPriority::Normal };
        self.bus
            .publish(
                Event::new(EventType::AgentSignal, agent_id, TARGET_CAPTAIN)
                    .with_priority(priority)
                    .with_payload(json!({
                        "agent_id": agent_id,
                        "signal": signal.as_str(),
                        "context": context,
                        "work_completed": work_completed,
                    })),
            )
            .await;

        info!(agent_id, signal = signal.as_str(), "agent signal handled");
    }

    /// A human command: persisted in the message ring, pushed on the bus,
    /// and available to `get_messages` polling.
    pub async fn push_human_message(&self, text: &str) -> CaptainMessage {
        let message = CaptainMessage::new(text);
        self.store.update(|state| {
            state.last_human_checkin = Some(Utc::now());
            state.push_captain_message(message.clone());
        });

        self.bus
            .publish(
                Event::new(EventType::CaptainMessage, "human", TARGET_CAPTAIN)
                    .with_priority(EventPriority::High)
                    .with_payload(json!({ "message_id": &message.id, "text": text })),
            )
            .await;

        message
    }

    /// Messages for the Captain, optionally unread only.
    pub fn get_messages(&self, unread_only: bool) -> Vec<CaptainMessage> {
        self.store.read(|state| {
            state
                .captain_messages
                .iter()
                .filter(|m| !unread_only || !m.read)
                .cloned()
                .collect()
        })
    }

    /// Mark ring messages read; unknown ids are ignored.
    pub fn mark_messages_read(&self, ids: &[String]) -> usize {
        self.store.update(|state| {
            let mut marked = 0;
            for message in state.captain_messages.iter_mut() {
                if !message.read && ids.contains(&message.id) {
                    message.read = true;
                    marked += 1;
                }
            }
            marked
        })
    }

    /// The Captain's reply toward the human dashboard.
    pub async fn send_response(&self, text: &str) {
        let activity = Activity::new(TARGET_CAPTAIN, "captain_response", text);
        self.store.update(|state| {
            state.activities.insert(activity.id.clone(), activity);
        });

        self.bus
            .publish(
                Event::new(EventType::CaptainMessage, TARGET_CAPTAIN, TARGET_ALL)
                    .with_priority(EventPriority::Normal)
                    .with_payload(json!({ "text": text, "direction": "response" })),
            )
            .await;
    }

    /// Generic agent-to-agent forward used by `send_to_agent`.
    pub async fn forward(
        &self,
        source: &str,
        target: &str,
        event_type: EventType,
        payload: Value,
        priority: EventPriority,
    ) {
        self.bus
            .publish(
                Event::new(event_type, source, target)
                    .with_priority(priority)
                    .with_payload(payload),
            )
            .await;
    }

    /// Track the Captain's own connection state on the dashboard.
    pub fn set_captain_presence(&self, connected: bool, status: &str, pane_id: Option<String>) {
        self.store.update(|state| {
            state.captain_connected = connected;
            state.captain_status = status.to_string();
            if pane_id.is_some() {
                state.captain_pane_id = pane_id.clone();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentLedger};
    use crate::domain::models::AgentRecord;
    use crate::domain::ports::AgentLedger as _;
    use tempfile::TempDir;

    async fn setup() -> (CaptainBridge, Arc<StateStore>, EventBus, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.json"));
        let pool = create_migrated_test_pool().await.unwrap();
        let ledger = Arc::new(SqliteAgentLedger::new(pool));

        let mut record = AgentRecord::new("alpha001", "alpha");
        record.status = AgentStatus::Connected;
        ledger.register(&record).await.unwrap();
        ledger.update_status("alpha001", AgentStatus::Starting).await.unwrap();
        ledger.update_status("alpha001", AgentStatus::Connected).await.unwrap();
        store.update(|state| {
            let mut stored = AgentRecord::new("alpha001", "alpha");
            stored.status = AgentStatus::Connected;
            state.agents.insert("alpha001".into(), stored);
        });

        let bus = EventBus::new(16);
        let lifecycle = Arc::new(LifecycleCoordinator::new(store.clone(), ledger, bus.clone()));
        let bridge = CaptainBridge::new(store.clone(), lifecycle, bus.clone());
        (bridge, store, bus, dir)
    }

    #[tokio::test]
    async fn test_signal_parse_round_trip() {
        for signal in [
            AgentSignal::Working,
            AgentSignal::Completed,
            AgentSignal::Blocked,
            AgentSignal::Idle,
            AgentSignal::Error,
        ] {
            assert_eq!(AgentSignal::parse_str(signal.as_str()), Some(signal));
        }
        assert_eq!(AgentSignal::parse_str("sleeping"), None);
    }

    #[tokio::test]
    async fn test_working_signal_sets_status_and_task() {
        let (bridge, store, bus, _dir) = setup().await;
        let captain = bus.subscribe(TARGET_CAPTAIN, None);

        bridge.handle_signal("alpha001", AgentSignal::Working, "porting the codec", false).await;

        assert_eq!(store.read(|s| s.agents["alpha001"].status), AgentStatus::Working);
        assert_eq!(store.read(|s| s.agents["alpha001"].current_task.clone()), "porting the codec");

        let event = captain.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::AgentSignal);
        assert_eq!(event.priority, EventPriority::Normal);
    }

    #[tokio::test]
    async fn test_blocked_signal_is_high_priority() {
        let (bridge, _, bus, _dir) = setup().await;
        let captain = bus.subscribe(TARGET_CAPTAIN, None);

        bridge.handle_signal("alpha001", AgentSignal::Blocked, "waiting on review", false).await;

        let event = captain.recv().await.unwrap();
        assert_eq!(event.priority, EventPriority::High);
        assert_eq!(event.payload["signal"], "blocked");
    }

    #[tokio::test]
    async fn test_human_message_flow() {
        let (bridge, store, bus, _dir) = setup().await;
        let captain = bus.subscribe(TARGET_CAPTAIN, Some(vec![EventType::CaptainMessage]));

        let message = bridge.push_human_message("spawn two more reviewers").await;
        assert!(store.read(|s| s.last_human_checkin.is_some()));

        let event = captain.recv().await.unwrap();
        assert_eq!(event.payload["text"], "spawn two more reviewers");

        // Poll path sees it unread, then read.
        let unread = bridge.get_messages(true);
        assert_eq!(unread.len(), 1);
        assert_eq!(bridge.mark_messages_read(&[message.id.clone()]), 1);
        assert!(bridge.get_messages(true).is_empty());
        assert_eq!(bridge.get_messages(false).len(), 1);

        // Marking twice is a no-op.
        assert_eq!(bridge.mark_messages_read(&[message.id]), 0);
    }

    #[tokio::test]
    async fn test_forward_reaches_target() {
        let (bridge, _, bus, _dir) = setup().await;
        let beta = bus.subscribe("beta002", None);

        bridge
            .forward(
                TARGET_CAPTAIN,
                "beta002",
                EventType::TaskAssignment,
                json!({"task_id": "t1"}),
                EventPriority::Normal,
            )
            .await;

        let event = beta.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::TaskAssignment);
        assert_eq!(event.source, TARGET_CAPTAIN);
    }

    #[tokio::test]
    async fn test_captain_presence() {
        let (bridge, store, _, _dir) = setup().await;
        bridge.set_captain_presence(true, "orchestrating", Some("%12".into()));
        assert!(store.read(|s| s.captain_connected));
        assert_eq!(store.read(|s| s.captain_status.clone()), "orchestrating");
        assert_eq!(store.read(|s| s.captain_pane_id.clone()), Some("%12".into()));
    }
}
