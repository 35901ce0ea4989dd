//! Server composition root and the typed administrative facade.
//!
//! Wires the storage planes, services, and tool registry together, owns
//! the background tasks, and exposes methods mirroring the administrative
//! HTTP routes so an external transport can bind them without reaching
//! into services. The state snapshot must only be served behind an
//! authenticated route.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapters::sqlite::{
    initialize_database, SqliteAgentLedger, SqliteAssignmentRepository, SqliteEventStore,
    SqliteMemoryRepository, SqliteReviewRepository, SqliteTaskRepository,
};
use crate::application::spawner::{AgentSpawner, SpawnError};
use crate::domain::models::{
    AgentRecord, BoardStatus, Config, DashboardState, EscalationRequest, ReviewBoard,
    StopApprovalRequest, TeamsFile,
};
use crate::domain::ports::{
    AgentLedger, AssignmentRepository, EventStore, LeaderboardEntry, MemoryRepository,
    ReviewRepository, TaskRepository,
};
use crate::services::approval::ApprovalEngine;
use crate::services::captain::CaptainBridge;
use crate::services::event_bus::EventBus;
use crate::services::lifecycle::LifecycleCoordinator;
use crate::services::presence::{CleanupReport, PresenceMonitor};
use crate::services::review_board::ReviewBoardService;
use crate::services::state_store::StateStore;
use crate::tools::{ToolDeps, ToolRegistry};

/// How often the durable event journal is pruned.
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Server {
    pub config: Config,
    pub store: Arc<StateStore>,
    pub bus: EventBus,
    pub registry: Arc<ToolRegistry>,
    pub spawner: Arc<AgentSpawner>,
    pub approval: Arc<ApprovalEngine>,
    pub captain: Arc<CaptainBridge>,
    pub presence: Arc<PresenceMonitor>,
    ledger: Arc<dyn AgentLedger>,
    reviews: Arc<dyn ReviewRepository>,
    event_store: Arc<dyn EventStore>,
    started_at: Instant,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Assemble every component over a data directory. The instance guard
    /// must already be held by the caller.
    pub async fn build(config: Config, teams: TeamsFile) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);
        std::fs::create_dir_all(&base_path)
            .with_context(|| format!("creating data directory {}", base_path.display()))?;
        restrict_to_owner(&base_path);

        let store = StateStore::open(base_path.join("state.json"));

        let database_path = base_path.join(&config.database.path);
        let pool = initialize_database(&database_path, config.database.max_connections)
            .await
            .context("initializing memory database")?;

        let ledger: Arc<dyn AgentLedger> = Arc::new(SqliteAgentLedger::new(pool.clone()));
        let tasks: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let assignments: Arc<dyn AssignmentRepository> =
            Arc::new(SqliteAssignmentRepository::new(pool.clone()));
        let reviews: Arc<dyn ReviewRepository> = Arc::new(SqliteReviewRepository::new(pool.clone()));
        let memory: Arc<dyn MemoryRepository> = Arc::new(SqliteMemoryRepository::new(pool.clone()));
        let event_store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool));

        let bus = EventBus::with_store(config.event_bus_buffer, Arc::clone(&event_store));

        let lifecycle = Arc::new(LifecycleCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            bus.clone(),
        ));
        let approval = Arc::new(ApprovalEngine::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            bus.clone(),
        ));
        let captain = Arc::new(CaptainBridge::new(
            Arc::clone(&store),
            Arc::clone(&lifecycle),
            bus.clone(),
        ));
        let review_board = Arc::new(ReviewBoardService::new(
            Arc::clone(&reviews),
            Arc::clone(&assignments),
            Arc::clone(&memory),
            bus.clone(),
            config.max_review_cycles,
        ));
        let presence = Arc::new(PresenceMonitor::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&lifecycle),
            bus.clone(),
            config.presence.clone(),
        ));
        let spawner = Arc::new(AgentSpawner::new(
            Arc::clone(&lifecycle),
            Arc::clone(&ledger),
            base_path.clone(),
            teams.teams.agents.clone(),
        ));

        seed_memory(&memory, &teams, &base_path).await;

        let registry = Arc::new(ToolRegistry::new(Arc::new(ToolDeps {
            store: Arc::clone(&store),
            lifecycle,
            approval: Arc::clone(&approval),
            captain: Arc::clone(&captain),
            review_board,
            bus: bus.clone(),
            ledger: Arc::clone(&ledger),
            tasks,
            assignments,
            reviews: Arc::clone(&reviews),
            memory,
            approval_timeout: Duration::from_secs(config.approval_timeout),
            max_review_cycles: config.max_review_cycles,
        })));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            bus,
            registry,
            spawner,
            approval,
            captain,
            presence,
            ledger,
            reviews,
            event_store,
            started_at: Instant::now(),
            shutdown_tx,
        })
    }

    /// Start the snapshot writer, the presence ticker, and the journal
    /// pruner.
    pub fn spawn_background_tasks(&self) {
        let _ = self.store.spawn_snapshot_writer();
        let _ = Arc::clone(&self.presence).spawn(self.shutdown_tx.subscribe());

        let event_store = Arc::clone(&self.event_store);
        let retention = chrono::Duration::hours(
            i64::try_from(self.config.event_retention_hours).unwrap_or(168),
        );
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match event_store.prune_older_than(Utc::now() - retention).await {
                            Ok(0) => {}
                            Ok(pruned) => info!(pruned, "pruned journaled events"),
                            Err(e) => warn!(error = %e, "event journal prune failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Flip the shutdown signal and flush state.
    pub fn shutdown(&self) {
        info!("server shutting down");
        let _ = self.shutdown_tx.send(true);
        self.store.flush();
    }

    // ------------------------------------------------------------------
    // Administrative facade (§ external interfaces)
    // ------------------------------------------------------------------

    /// GET /api/health
    pub fn health(&self) -> Value {
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_s": self.started_at.elapsed().as_secs(),
        })
    }

    /// GET /api/state — serve only behind authentication.
    pub fn state_snapshot(&self) -> DashboardState {
        self.store.snapshot()
    }

    /// POST /api/agents/spawn
    pub async fn spawn_agent(
        &self,
        config_name: &str,
        project_path: &str,
        task: Option<&str>,
    ) -> Result<AgentRecord, SpawnError> {
        self.spawner.spawn(config_name, project_path, task).await
    }

    /// POST /api/agents/{id}/stop
    pub async fn stop_agent(&self, agent_id: &str) -> bool {
        self.spawner.force_stop(agent_id).await
    }

    /// POST /api/agents/{id}/graceful-stop — the approval path: file a
    /// stop request on the agent's behalf and approve it, so the agent's
    /// `wait_for_events` wakes and it exits cleanly.
    pub async fn graceful_stop_agent(&self, agent_id: &str) -> Result<StopApprovalRequest> {
        let request = self
            .approval
            .request_stop(agent_id, "operator_requested", "graceful stop from the dashboard", false)
            .await;
        let reviewed = self
            .approval
            .respond_stop(&request.id, true, "operator requested stop", "operator")
            .await?;
        Ok(reviewed)
    }

    /// POST /api/agents/cleanup
    pub async fn run_cleanup(&self) -> CleanupReport {
        self.presence.cleanup_once().await
    }

    /// GET /api/stop-requests
    pub fn list_stop_requests(&self) -> Vec<StopApprovalRequest> {
        self.approval.pending_stop_requests()
    }

    /// POST /api/stop-requests/{id}/respond
    pub async fn respond_stop_request(
        &self,
        request_id: &str,
        approved: bool,
        response: &str,
    ) -> Result<StopApprovalRequest> {
        Ok(self.approval.respond_stop(request_id, approved, response, "human").await?)
    }

    /// GET /api/leaderboard
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>> {
        Ok(self.reviews.leaderboard(limit).await?)
    }

    /// GET /api/review-boards
    pub async fn review_boards(&self, status: Option<BoardStatus>) -> Result<Vec<ReviewBoard>> {
        Ok(self.reviews.list_boards(status).await?)
    }

    /// POST /api/escalation/{id}/respond
    pub async fn respond_escalation(
        &self,
        escalation_id: &str,
        response: &str,
    ) -> Result<EscalationRequest> {
        Ok(self.approval.respond_escalation(escalation_id, response).await?)
    }

    /// Agents known to the durable ledger; used by the status command.
    pub async fn ledger_agents(&self) -> Result<Vec<AgentRecord>> {
        Ok(self.ledger.list_all().await?)
    }
}

/// Data under the directory is readable only by the owning user.
#[cfg(unix)]
fn restrict_to_owner(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)) {
        warn!(path = %path.display(), error = %e, "failed to restrict data directory permissions");
    }
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &std::path::Path) {}

/// Seed named configs and the default Captain prompt on first start.
async fn seed_memory(
    memory: &Arc<dyn MemoryRepository>,
    teams: &TeamsFile,
    base_path: &std::path::Path,
) {
    for agent in &teams.teams.agents {
        match serde_yaml::to_string(agent) {
            Ok(content) => {
                match memory.seed_named_config(&agent.name, &content).await {
                    Ok(true) => info!(config = %agent.name, "seeded agent config"),
                    Ok(false) => {}
                    Err(e) => warn!(config = %agent.name, error = %e, "config seeding failed"),
                }
            }
            Err(e) => warn!(config = %agent.name, error = %e, "config serialization failed"),
        }
    }

    let prompt_path = base_path.join("prompts").join("captain.md");
    let prompt = std::fs::read_to_string(&prompt_path).unwrap_or_else(|_| {
        "You are the Captain: the singleton coordinator. Route work, watch signals, escalate to the human when blocked.\n".to_string()
    });
    match memory.seed_prompt("captain", &prompt).await {
        Ok(true) => info!("seeded captain prompt"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "prompt seeding failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentConfig, Teams};
    use crate::tools::ToolCall;
    use tempfile::TempDir;

    fn test_teams() -> TeamsFile {
        TeamsFile {
            teams: Teams {
                agents: vec![AgentConfig {
                    name: "coder".to_string(),
                    role: "implementation".to_string(),
                    model: "sonnet".to_string(),
                    prompt_template: "prompts/coder.md".to_string(),
                    env: std::collections::HashMap::new(),
                }],
            },
        }
    }

    async fn build_server(dir: &TempDir) -> Server {
        let config = Config {
            base_path: dir.path().display().to_string(),
            ..Default::default()
        };
        Server::build(config, test_teams()).await.unwrap()
    }

    #[tokio::test]
    async fn test_build_and_health() {
        let dir = TempDir::new().unwrap();
        let server = build_server(&dir).await;

        let health = server.health();
        assert_eq!(health["status"], "ok");
        assert!(health["version"].is_string());
    }

    #[tokio::test]
    async fn test_tool_surface_is_complete() {
        let dir = TempDir::new().unwrap();
        let server = build_server(&dir).await;

        for tool in [
            "register_agent",
            "signal_captain",
            "request_stop_approval",
            "log_activity",
            "dispatch_task",
            "accept_assignment",
            "get_my_assignment",
            "submit_for_review",
            "submit_review_result",
            "complete_worker",
            "log_worker",
            "create_review_board",
            "submit_defect",
            "record_reviewer_vote",
            "finalize_board",
            "get_agent_leaderboard",
            "get_defect_categories",
            "store_knowledge",
            "search_knowledge",
            "record_episode",
            "get_recent_episodes",
            "search_episodes",
            "save_context",
            "get_context",
            "get_all_context",
            "log_session",
            "get_captain_messages",
            "mark_messages_read",
            "send_captain_response",
            "wait_for_events",
            "send_to_agent",
            "save_document",
            "get_document",
            "search_documents",
            "list_my_documents",
            "submit_recon_report",
            "report_progress",
            "request_guidance",
        ] {
            assert!(server.registry.contains(tool), "missing tool {tool}");
        }
    }

    #[tokio::test]
    async fn test_end_to_end_stop_approval() {
        let dir = TempDir::new().unwrap();
        let server = build_server(&dir).await;

        // The agent registers itself and asks to stop.
        let result = server
            .registry
            .handle_call(
                "alpha001",
                ToolCall {
                    id: json!(1),
                    name: "register_agent".to_string(),
                    arguments: json!({"role": "worker"}),
                },
            )
            .await;
        assert!(result.error.is_none(), "{:?}", result.error);

        let result = server
            .registry
            .handle_call(
                "alpha001",
                ToolCall {
                    id: json!(2),
                    name: "request_stop_approval".to_string(),
                    arguments: json!({"reason": "task_complete", "work_completed": true}),
                },
            )
            .await;
        let request_id = result.content.unwrap()["request_id"].as_str().unwrap().to_string();

        assert_eq!(server.list_stop_requests().len(), 1);

        // The human approves while the agent waits.
        let registry = Arc::clone(&server.registry);
        let waiter = tokio::spawn(async move {
            registry
                .dispatch(
                    "alpha001",
                    "wait_for_events",
                    json!({"types": ["stop_approval"], "timeout_s": 5}),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let reviewed = server.respond_stop_request(&request_id, true, "ok").await.unwrap();
        assert!(reviewed.approved);

        let waited = waiter.await.unwrap().unwrap();
        assert_eq!(waited["timed_out"], false);
        let events = waited["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "stop_approval");
        assert_eq!(events[0]["payload"]["approved"], true);
    }

    #[tokio::test]
    async fn test_end_to_end_review_cycle() {
        let dir = TempDir::new().unwrap();
        let server = build_server(&dir).await;

        for (agent, role) in [("sgt001", "sergeant"), ("coder001", "worker"), ("rev001", "reviewer")] {
            server
                .registry
                .dispatch(agent, "register_agent", json!({"role": role}))
                .await
                .unwrap();
        }

        let dispatched = server
            .registry
            .dispatch(
                "sgt001",
                "dispatch_task",
                json!({"description": "implement the parser", "assigned_to": "coder001", "branch_name": "feat/parser"}),
            )
            .await
            .unwrap();
        let assignment_id = dispatched["assignment_id"].as_str().unwrap().to_string();

        server
            .registry
            .dispatch("coder001", "accept_assignment", json!({"assignment_id": assignment_id}))
            .await
            .unwrap();
        server
            .registry
            .dispatch(
                "coder001",
                "submit_for_review",
                json!({"assignment_id": assignment_id, "summary": "done"}),
            )
            .await
            .unwrap();

        let board = server
            .registry
            .dispatch(
                "sgt001",
                "create_review_board",
                json!({"assignment_id": assignment_id, "reviewer_count": 1, "risk_level": "low"}),
            )
            .await
            .unwrap();
        let board_id = board["board_id"].as_str().unwrap().to_string();

        server
            .registry
            .dispatch(
                "rev001",
                "record_reviewer_vote",
                json!({"board_id": board_id, "approved": true, "confidence_score": 90, "notes": "solid"}),
            )
            .await
            .unwrap();

        let outcome = server
            .registry
            .dispatch("sgt001", "finalize_board", json!({"board_id": board_id}))
            .await
            .unwrap();
        assert_eq!(outcome["verdict"], "approved");
        assert_eq!(outcome["assignment_status"], "approved");

        let boards = server.review_boards(None).await.unwrap();
        assert_eq!(boards.len(), 1);
        let leaderboard = server.leaderboard(10).await.unwrap();
        assert_eq!(leaderboard[0].reviewer_id, "rev001");
    }

    #[tokio::test]
    async fn test_memory_round_trip_laws() {
        let dir = TempDir::new().unwrap();
        let server = build_server(&dir).await;
        server.registry.dispatch("alpha001", "register_agent", json!({"role": "worker"})).await.unwrap();

        // save_context -> get_context
        server
            .registry
            .dispatch("alpha001", "save_context", json!({"key": "focus", "value": "the scheduler"}))
            .await
            .unwrap();
        let got = server
            .registry
            .dispatch("alpha001", "get_context", json!({"key": "focus"}))
            .await
            .unwrap();
        assert_eq!(got["item"]["value"], "the scheduler");

        // store_knowledge -> search_knowledge(title)
        server
            .registry
            .dispatch(
                "alpha001",
                "store_knowledge",
                json!({"title": "WAL checkpoints", "content": "run them off-peak"}),
            )
            .await
            .unwrap();
        let found = server
            .registry
            .dispatch("alpha001", "search_knowledge", json!({"query": "WAL checkpoints"}))
            .await
            .unwrap();
        assert_eq!(found["count"], 1);

        // record_episode -> get_recent_episodes(session)
        server
            .registry
            .dispatch(
                "alpha001",
                "record_episode",
                json!({"session_id": "s1", "content": "spawned the review fleet"}),
            )
            .await
            .unwrap();
        let episodes = server
            .registry
            .dispatch("alpha001", "get_recent_episodes", json!({"session_id": "s1", "limit": 5}))
            .await
            .unwrap();
        assert_eq!(episodes["count"], 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_distinct_error() {
        let dir = TempDir::new().unwrap();
        let server = build_server(&dir).await;

        let result = server
            .registry
            .handle_call(
                "alpha001",
                ToolCall { id: json!(1), name: "frobnicate".to_string(), arguments: json!({}) },
            )
            .await;
        assert_eq!(result.error.unwrap().code, crate::tools::types::CODE_UNKNOWN_TOOL);
    }

    #[tokio::test]
    async fn test_metering_emits_token_event() {
        use crate::tools::{TARGET_METRICS, TOKENS_PER_CALL};

        let dir = TempDir::new().unwrap();
        let server = build_server(&dir).await;

        let metrics = server.bus.subscribe(TARGET_METRICS, None);
        server
            .registry
            .dispatch("alpha001", "register_agent", json!({"role": "worker"}))
            .await
            .unwrap();

        let event = metrics.recv().await.unwrap();
        assert_eq!(event.source, "alpha001");
        assert_eq!(event.payload["tool"], "register_agent");
        assert_eq!(event.payload["tokens_estimated"], TOKENS_PER_CALL);
    }

    #[tokio::test]
    async fn test_graceful_stop_uses_approval_path() {
        let dir = TempDir::new().unwrap();
        let server = build_server(&dir).await;
        server.registry.dispatch("alpha001", "register_agent", json!({"role": "worker"})).await.unwrap();

        let sub = server.bus.subscribe("alpha001", None);
        let reviewed = server.graceful_stop_agent("alpha001").await.unwrap();
        assert!(reviewed.reviewed);
        assert!(reviewed.approved);

        // The agent's wait wakes with an approved stop event.
        let mut saw_approval = false;
        while let Some(event) = sub.try_recv() {
            if event.event_type == crate::domain::models::EventType::StopApproval {
                assert_eq!(event.payload["approved"], true);
                saw_approval = true;
            }
        }
        assert!(saw_approval);
    }
}
