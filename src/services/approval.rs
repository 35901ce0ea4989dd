//! Approval engine: supervisor-gated stop requests and guidance escalations.
//!
//! Requests are records in the state store; decisions re-enter as tool or
//! admin calls and wake the waiting agent through a targeted event.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Activity, Alert, AlertSeverity, EscalationRequest, Event, EventPriority, EventType,
    StopApprovalRequest, TARGET_CAPTAIN,
};
use crate::domain::ports::AgentLedger;
use crate::services::event_bus::EventBus;
use crate::services::state_store::StateStore;

pub struct ApprovalEngine {
    store: Arc<StateStore>,
    ledger: Arc<dyn AgentLedger>,
    bus: EventBus,
}

impl ApprovalEngine {
    pub fn new(store: Arc<StateStore>, ledger: Arc<dyn AgentLedger>, bus: EventBus) -> Self {
        Self { store, ledger, bus }
    }

    /// File a stop request. One unreviewed request per agent; a duplicate
    /// returns the existing record.
    pub async fn request_stop(
        &self,
        agent_id: &str,
        reason: &str,
        context: &str,
        work_completed: bool,
    ) -> StopApprovalRequest {
        let existing = self.store.read(|state| {
            state
                .stop_requests
                .values()
                .find(|r| r.agent_id == agent_id && !r.reviewed)
                .cloned()
        });
        if let Some(request) = existing {
            return request;
        }

        let request = StopApprovalRequest::new(agent_id, reason)
            .with_context(context)
            .with_work_completed(work_completed);
        let alert = Alert::new("stop_approval_needed", agent_id, format!("{agent_id} requests stop: {reason}"))
            .with_severity(AlertSeverity::Warning);

        self.store.update(|state| {
            state.stop_requests.insert(request.id.clone(), request.clone());
            state.alerts.insert(alert.id.clone(), alert.clone());
        });

        self.bus
            .publish(
                Event::new(EventType::Alert, agent_id, TARGET_CAPTAIN)
                    .with_priority(EventPriority::High)
                    .with_payload(json!({
                        "alert_type": "stop_approval_needed",
                        "request_id": &request.id,
                        "agent_id": agent_id,
                        "reason": reason,
                    })),
            )
            .await;

        info!(agent_id, request_id = %request.id, "stop approval requested");
        request
    }

    /// Record the supervisor decision and wake the waiting agent.
    /// Responding to an already-reviewed request is a no-op.
    pub async fn respond_stop(
        &self,
        request_id: &str,
        approved: bool,
        response: &str,
        reviewed_by: &str,
    ) -> DomainResult<StopApprovalRequest> {
        let outcome = self.store.update(|state| {
            let request = state.stop_requests.get_mut(request_id)?;
            let newly_reviewed = request.review(approved, response, reviewed_by);
            Some((request.clone(), newly_reviewed))
        });

        let (request, newly_reviewed) = outcome
            .ok_or_else(|| DomainError::StopRequestNotFound(request_id.to_string()))?;

        if !newly_reviewed {
            return Ok(request);
        }

        if request.approved {
            if let Err(e) = self.ledger.set_shutdown_requested(&request.agent_id, true).await {
                warn!(agent_id = %request.agent_id, error = %e, "ledger shutdown flag failed");
            }
            self.store.update(|state| {
                if let Some(agent) = state.agents.get_mut(&request.agent_id) {
                    agent.shutdown_requested = true;
                }
            });
        }

        self.bus
            .publish(
                Event::new(EventType::StopApproval, reviewed_by, &request.agent_id)
                    .with_priority(EventPriority::High)
                    .with_payload(json!({
                        "request_id": &request.id,
                        "approved": request.approved,
                        "response": &request.response,
                    })),
            )
            .await;

        info!(
            request_id,
            agent_id = %request.agent_id,
            approved = request.approved,
            "stop request reviewed"
        );
        Ok(request)
    }

    /// Pending stop requests, oldest first.
    pub fn pending_stop_requests(&self) -> Vec<StopApprovalRequest> {
        self.store.read(|state| state.pending_stop_requests())
    }

    /// File a guidance escalation: activity plus alert, routed to the Captain.
    pub async fn request_guidance(
        &self,
        agent_id: &str,
        question: &str,
        context: &str,
    ) -> EscalationRequest {
        let escalation = EscalationRequest::new(agent_id, question).with_context(context);
        let activity = Activity::new(agent_id, "guidance_requested", question);
        let alert = Alert::new("guidance_requested", agent_id, format!("{agent_id} needs guidance"))
            .with_severity(AlertSeverity::Warning);

        self.store.update(|state| {
            state.escalations.insert(escalation.id.clone(), escalation.clone());
            state.activities.insert(activity.id.clone(), activity);
            state.alerts.insert(alert.id.clone(), alert);
        });

        self.bus
            .publish(
                Event::new(EventType::GuidanceRequest, agent_id, TARGET_CAPTAIN)
                    .with_priority(EventPriority::High)
                    .with_payload(json!({
                        "escalation_id": &escalation.id,
                        "agent_id": agent_id,
                        "question": question,
                    })),
            )
            .await;

        escalation
    }

    /// The Captain attaches its framing before the human sees the request.
    pub fn annotate_escalation(
        &self,
        escalation_id: &str,
        captain_context: &str,
        recommendation: &str,
    ) -> DomainResult<()> {
        let found = self.store.update(|state| {
            state.escalations.get_mut(escalation_id).map(|esc| {
                esc.annotate(captain_context, recommendation);
            })
        });
        found.ok_or_else(|| DomainError::StopRequestNotFound(escalation_id.to_string()))
    }

    /// Human answer; republished to the originating agent. Idempotent.
    pub async fn respond_escalation(
        &self,
        escalation_id: &str,
        response: &str,
    ) -> DomainResult<EscalationRequest> {
        let outcome = self.store.update(|state| {
            state.escalations.get_mut(escalation_id).map(|esc| {
                let newly = esc.resolve(response);
                (esc.clone(), newly)
            })
        });

        let (escalation, newly_resolved) = outcome
            .ok_or_else(|| DomainError::StopRequestNotFound(escalation_id.to_string()))?;

        if newly_resolved {
            self.bus
                .publish(
                    Event::new(EventType::GuidanceResponse, "human", &escalation.agent_id)
                        .with_priority(EventPriority::High)
                        .with_payload(json!({
                            "escalation_id": &escalation.id,
                            "response": &escalation.response,
                        })),
                )
                .await;
        }

        Ok(escalation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentLedger};
    use crate::domain::models::AgentRecord;
    use tempfile::TempDir;

    async fn setup() -> (ApprovalEngine, Arc<StateStore>, EventBus, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.json"));
        let pool = create_migrated_test_pool().await.unwrap();
        let ledger = Arc::new(SqliteAgentLedger::new(pool));
        ledger.register(&AgentRecord::new("alpha001", "alpha")).await.unwrap();
        store.update(|state| {
            state.agents.insert("alpha001".into(), AgentRecord::new("alpha001", "alpha"));
        });
        let bus = EventBus::new(16);
        let engine = ApprovalEngine::new(store.clone(), ledger, bus.clone());
        (engine, store, bus, dir)
    }

    #[tokio::test]
    async fn test_stop_request_raises_alert() {
        let (engine, store, _, _dir) = setup().await;
        let request = engine.request_stop("alpha001", "task_complete", "all done", true).await;

        assert!(!request.reviewed);
        assert_eq!(engine.pending_stop_requests().len(), 1);
        let alert_types: Vec<String> =
            store.read(|s| s.alerts.values().map(|a| a.alert_type.clone()).collect());
        assert!(alert_types.contains(&"stop_approval_needed".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_stop_request_returns_existing() {
        let (engine, _, _, _dir) = setup().await;
        let first = engine.request_stop("alpha001", "task_complete", "", true).await;
        let second = engine.request_stop("alpha001", "changed reason", "", false).await;
        assert_eq!(first.id, second.id);
        assert_eq!(second.reason, "task_complete");
    }

    #[tokio::test]
    async fn test_approval_wakes_waiting_agent() {
        let (engine, store, bus, _dir) = setup().await;
        let request = engine.request_stop("alpha001", "task_complete", "", true).await;

        let sub = bus.subscribe("alpha001", Some(vec![EventType::StopApproval]));
        let reviewed = engine.respond_stop(&request.id, true, "ok", "human").await.unwrap();
        assert!(reviewed.reviewed);
        assert!(reviewed.approved);

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::StopApproval);
        assert_eq!(event.payload["approved"], true);
        assert_eq!(event.payload["response"], "ok");

        assert!(store.read(|s| s.agents["alpha001"].shutdown_requested));
    }

    #[tokio::test]
    async fn test_response_is_idempotent() {
        let (engine, _, bus, _dir) = setup().await;
        let request = engine.request_stop("alpha001", "task_complete", "", true).await;

        engine.respond_stop(&request.id, false, "keep going", "human").await.unwrap();

        let sub = bus.subscribe("alpha001", None);
        let again = engine.respond_stop(&request.id, true, "flip", "human2").await.unwrap();

        // Original decision stands and no second event fires.
        assert!(!again.approved);
        assert_eq!(again.response, "keep going");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_found() {
        let (engine, _, _, _dir) = setup().await;
        let err = engine.respond_stop("missing", true, "", "human").await.unwrap_err();
        assert!(matches!(err, DomainError::StopRequestNotFound(_)));
    }

    #[tokio::test]
    async fn test_guidance_round_trip() {
        let (engine, _, bus, _dir) = setup().await;
        let captain = bus.subscribe(TARGET_CAPTAIN, None);

        let escalation = engine.request_guidance("alpha001", "which db?", "two candidates").await;
        let event = captain.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::GuidanceRequest);

        engine.annotate_escalation(&escalation.id, "agent mid-migration", "use sqlite").unwrap();

        let agent_sub = bus.subscribe("alpha001", Some(vec![EventType::GuidanceResponse]));
        let resolved = engine.respond_escalation(&escalation.id, "sqlite").await.unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.captain_recommendation.as_deref(), Some("use sqlite"));

        let answer = agent_sub.recv().await.unwrap();
        assert_eq!(answer.payload["response"], "sqlite");

        // Second answer does not republish.
        engine.respond_escalation(&escalation.id, "postgres").await.unwrap();
        assert!(agent_sub.try_recv().is_none());
    }
}
