//! Cross-plane lifecycle coordination.
//!
//! Every agent lifecycle mutation flows through this one helper so the
//! state store, the durable ledger, and the event bus stay coherent. A
//! failure in one plane is logged and the remaining planes still run; the
//! presence subsystem reconciles whatever residue is left.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AgentRecord, AgentStatus, Event, EventPriority, EventType, TARGET_ALL,
};
use crate::domain::ports::AgentLedger;
use crate::infrastructure::retry::with_retry;
use crate::services::event_bus::EventBus;
use crate::services::state_store::StateStore;

pub struct LifecycleCoordinator {
    store: Arc<StateStore>,
    ledger: Arc<dyn AgentLedger>,
    bus: EventBus,
    /// Status an agent held before it went disconnected, restored when a
    /// heartbeat returns within the grace window.
    suspended: Mutex<HashMap<String, AgentStatus>>,
}

impl LifecycleCoordinator {
    pub fn new(store: Arc<StateStore>, ledger: Arc<dyn AgentLedger>, bus: EventBus) -> Self {
        Self { store, ledger, bus, suspended: Mutex::new(HashMap::new()) }
    }

    /// Register a new agent in both planes and announce it.
    pub async fn register(&self, record: AgentRecord) -> DomainResult<()> {
        // The ledger is authoritative for the uniqueness invariant; if it
        // rejects the id, nothing else happens. Busy-database errors are
        // retried before surfacing.
        with_retry("agent_register", || self.ledger.register(&record)).await?;

        self.store.update(|state| {
            state.agents.insert(record.agent_id.clone(), record.clone());
        });

        self.broadcast_state_change("agent_registered", &record.agent_id).await;
        Ok(())
    }

    /// Apply a status transition across planes.
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) {
        let applied = self.store.update(|state| {
            if let Some(agent) = state.agents.get_mut(agent_id) {
                if agent.status.can_transition_to(status) || agent.status == status {
                    let previous = agent.status;
                    agent.status = status;
                    agent.last_seen_at = Utc::now();
                    return Some(previous);
                }
                warn!(
                    agent_id,
                    from = agent.status.as_str(),
                    to = status.as_str(),
                    "rejected status transition"
                );
            }
            None
        });

        if let Some(previous) = applied {
            if status == AgentStatus::Disconnected {
                self.suspended
                    .lock()
                    .expect("suspension map poisoned")
                    .insert(agent_id.to_string(), previous);
            }
            if let Err(e) = self.ledger.update_status(agent_id, status).await {
                warn!(agent_id, error = %e, "ledger status update failed");
            }
            self.broadcast_state_change("status_changed", agent_id).await;
        }
    }

    /// Record a heartbeat. A disconnected agent returning within the grace
    /// window is restored to its previous status.
    pub async fn heartbeat(&self, agent_id: &str) {
        let now = Utc::now();
        let restored = {
            let mut suspended = self.suspended.lock().expect("suspension map poisoned");
            let previous = suspended.remove(agent_id);
            self.store.update(|state| {
                state.agents.get_mut(agent_id).map(|agent| {
                    agent.touch();
                    if agent.status == AgentStatus::Disconnected {
                        let restored = previous.unwrap_or(AgentStatus::Connected);
                        agent.status = restored;
                        return Some(restored);
                    }
                    None
                })
            })
        };

        if let Err(e) = self.ledger.heartbeat(agent_id, now).await {
            warn!(agent_id, error = %e, "ledger heartbeat failed");
        }

        if let Some(Some(status)) = restored {
            info!(agent_id, status = status.as_str(), "agent reconnected");
            if let Err(e) = self.ledger.update_status(agent_id, status).await {
                warn!(agent_id, error = %e, "ledger status restore failed");
            }
            self.broadcast_state_change("agent_reconnected", agent_id).await;
        }
    }

    /// First contact from a launching agent promotes it to connected.
    pub async fn mark_connected(&self, agent_id: &str) {
        let current = self.store.read(|state| state.agents.get(agent_id).map(|a| a.status));
        match current {
            Some(AgentStatus::Pending) => {
                // A tool call before the exec notification still counts as
                // a successful launch.
                self.set_status(agent_id, AgentStatus::Starting).await;
                self.set_status(agent_id, AgentStatus::Connected).await;
            }
            Some(AgentStatus::Starting) => {
                self.set_status(agent_id, AgentStatus::Connected).await;
            }
            _ => {}
        }
        self.heartbeat(agent_id).await;
    }

    /// Update the free-form display task in both planes.
    pub async fn set_current_task(&self, agent_id: &str, task: &str) {
        self.store.update(|state| {
            if let Some(agent) = state.agents.get_mut(agent_id) {
                agent.current_task = task.to_string();
            }
        });
        if let Err(e) = self.ledger.set_current_task(agent_id, task).await {
            warn!(agent_id, error = %e, "ledger current_task update failed");
        }
    }

    /// Remove the agent from the dashboard; the ledger row is marked dead
    /// but retained as history.
    pub async fn remove(&self, agent_id: &str) {
        self.store.update(|state| {
            state.agents.remove(agent_id);
        });
        self.suspended.lock().expect("suspension map poisoned").remove(agent_id);
        if let Err(e) = self.ledger.mark_dead(agent_id).await {
            // Dashboard removal already happened; the ledger will be
            // reconciled by a later cleanup pass.
            warn!(agent_id, error = %e, "ledger mark_dead failed");
        }
        self.broadcast_state_change("agent_removed", agent_id).await;
    }

    /// Mark stopped after an approved, graceful exit.
    pub async fn mark_stopped(&self, agent_id: &str) {
        self.store.update(|state| {
            if let Some(agent) = state.agents.get_mut(agent_id) {
                agent.status = AgentStatus::Stopped;
            }
        });
        if let Err(e) = self.ledger.mark_stopped(agent_id).await {
            warn!(agent_id, error = %e, "ledger mark_stopped failed");
        }
        self.broadcast_state_change("agent_stopped", agent_id).await;
    }

    async fn broadcast_state_change(&self, reason: &str, agent_id: &str) {
        self.bus
            .publish(
                Event::new(EventType::StateUpdate, "server", TARGET_ALL)
                    .with_priority(EventPriority::Low)
                    .with_payload(json!({ "reason": reason, "agent_id": agent_id })),
            )
            .await;
    }
}
