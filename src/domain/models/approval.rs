//! Supervisor approval records: stop approvals and guidance escalations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An agent's explicit request to exit, blocked until a supervisor decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopApprovalRequest {
    pub id: String,
    pub agent_id: String,
    pub reason: String,
    /// Free-form summary supplied with the request
    pub context: String,
    pub work_completed: bool,
    pub created_at: DateTime<Utc>,
    /// Once true, never reverts
    pub reviewed: bool,
    /// Meaningful iff `reviewed`
    pub approved: bool,
    pub response: String,
    pub reviewed_by: String,
}

impl StopApprovalRequest {
    pub fn new(agent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            reason: reason.into(),
            context: String::new(),
            work_completed: false,
            created_at: Utc::now(),
            reviewed: false,
            approved: false,
            response: String::new(),
            reviewed_by: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_work_completed(mut self, done: bool) -> Self {
        self.work_completed = done;
        self
    }

    /// Record the supervisor decision. Idempotent: a reviewed request is
    /// never modified again.
    pub fn review(&mut self, approved: bool, response: impl Into<String>, reviewed_by: impl Into<String>) -> bool {
        if self.reviewed {
            return false;
        }
        self.reviewed = true;
        self.approved = approved;
        self.response = response.into();
        self.reviewed_by = reviewed_by.into();
        true
    }
}

/// An agent's request for human guidance, optionally annotated by the Captain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub id: String,
    pub agent_id: String,
    pub question: String,
    pub context: String,
    pub captain_context: Option<String>,
    pub captain_recommendation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub response: String,
}

impl EscalationRequest {
    pub fn new(agent_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            question: question.into(),
            context: String::new(),
            captain_context: None,
            captain_recommendation: None,
            created_at: Utc::now(),
            resolved: false,
            response: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Attach the Captain's framing before forwarding to a human.
    pub fn annotate(&mut self, context: impl Into<String>, recommendation: impl Into<String>) {
        self.captain_context = Some(context.into());
        self.captain_recommendation = Some(recommendation.into());
    }

    pub fn resolve(&mut self, response: impl Into<String>) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.response = response.into();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_is_idempotent() {
        let mut request = StopApprovalRequest::new("alpha001", "task_complete");
        assert!(request.review(true, "ok", "human"));
        assert!(request.reviewed);
        assert!(request.approved);

        // A second decision must not overwrite the first.
        assert!(!request.review(false, "changed my mind", "human2"));
        assert!(request.approved);
        assert_eq!(request.response, "ok");
        assert_eq!(request.reviewed_by, "human");
    }

    #[test]
    fn test_new_request_is_unreviewed() {
        let request = StopApprovalRequest::new("alpha001", "blocked")
            .with_context("nothing to do")
            .with_work_completed(false);
        assert!(!request.reviewed);
        assert!(!request.approved);
    }

    #[test]
    fn test_escalation_annotation_and_resolution() {
        let mut esc = EscalationRequest::new("beta002", "which branch?");
        esc.annotate("agent is mid-refactor", "use main");
        assert_eq!(esc.captain_recommendation.as_deref(), Some("use main"));

        assert!(esc.resolve("use main, rebase first"));
        assert!(!esc.resolve("second answer"));
        assert_eq!(esc.response, "use main, rebase first");
    }
}
