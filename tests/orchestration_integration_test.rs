//! End-to-end orchestration scenarios driven through the public API.
//!
//! ## Test Coverage
//! 1. Single-instance guard: second starter stands down, winner untouched
//! 2. Stop approval: request -> supervisor decision -> waiting agent wakes
//! 3. Review rework: three rejections walk the assignment to escalation
//! 4. Presence protection: working agents survive arbitrary staleness
//! 5. Event delivery and overflow accounting

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use cliaimonitor::application::Server;
use cliaimonitor::domain::models::{
    AgentConfig, AgentStatus, Config, EventType, OnConflict, Teams, TeamsFile,
};
use cliaimonitor::infrastructure::guard::{Acquired, GuardError, InstanceGuard};

fn teams_with(names: &[&str]) -> TeamsFile {
    TeamsFile {
        teams: Teams {
            agents: names
                .iter()
                .map(|name| AgentConfig {
                    name: (*name).to_string(),
                    role: "worker".to_string(),
                    model: "sonnet".to_string(),
                    prompt_template: format!("prompts/{name}.md"),
                    env: std::collections::HashMap::new(),
                })
                .collect(),
        },
    }
}

async fn server_in(dir: &TempDir) -> Server {
    let config = Config {
        base_path: dir.path().display().to_string(),
        ..Default::default()
    };
    Server::build(config, teams_with(&["coder", "reviewer"])).await.unwrap()
}

// ============================================================================
// Scenario: single-instance guard
// ============================================================================

#[tokio::test]
async fn second_instance_stands_down_and_winner_is_untouched() {
    let dir = TempDir::new().unwrap();

    let Acquired::Owned(guard_a, port_a) =
        InstanceGuard::acquire(dir.path(), 9000, OnConflict::Exit, false).await.unwrap()
    else {
        panic!("first instance must own the directory");
    };
    assert_eq!(port_a, 9000);
    let pid_file_before = std::fs::read(dir.path().join("pid.json")).unwrap();

    let err = InstanceGuard::acquire(dir.path(), 9000, OnConflict::Exit, false)
        .await
        .unwrap_err();
    assert!(matches!(err, GuardError::AlreadyRunning { .. }));
    assert_eq!(err.exit_code(), 1);

    // The winner's PID file is byte-for-byte intact.
    let pid_file_after = std::fs::read(dir.path().join("pid.json")).unwrap();
    assert_eq!(pid_file_before, pid_file_after);

    drop(guard_a);
    assert!(!dir.path().join("pid.json").exists());
}

#[tokio::test]
async fn port_policy_coexists_beside_the_winner() {
    let dir = TempDir::new().unwrap();

    let Acquired::Owned(_guard_a, _) =
        InstanceGuard::acquire(dir.path(), 57000, OnConflict::Exit, false).await.unwrap()
    else {
        panic!("first instance must own the directory");
    };

    let Acquired::Owned(_guard_b, port_b) =
        InstanceGuard::acquire(dir.path(), 57000, OnConflict::Port, false).await.unwrap()
    else {
        panic!("port policy must proceed");
    };
    assert!(port_b >= 57001);
    assert!(dir.path().join(format!("pid.{port_b}.json")).exists());
}

// ============================================================================
// Scenario: stop approval round trip
// ============================================================================

#[tokio::test]
async fn stop_approval_wakes_the_waiting_agent() {
    let dir = TempDir::new().unwrap();
    let server = server_in(&dir).await;

    server
        .registry
        .dispatch("alpha001", "register_agent", json!({"role": "worker"}))
        .await
        .unwrap();

    let response = server
        .registry
        .dispatch(
            "alpha001",
            "request_stop_approval",
            json!({"reason": "task_complete", "context": "all tests green", "work_completed": true}),
        )
        .await
        .unwrap();
    let request_id = response["request_id"].as_str().unwrap().to_string();

    // The agent parks on wait_for_events while the human decides.
    let registry = Arc::clone(&server.registry);
    let waiter = tokio::spawn(async move {
        registry
            .dispatch(
                "alpha001",
                "wait_for_events",
                json!({"types": ["stop_approval"], "timeout_s": 10}),
            )
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reviewed = server.respond_stop_request(&request_id, true, "ok").await.unwrap();
    assert!(reviewed.reviewed && reviewed.approved);

    let woken = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("agent must wake within two seconds")
        .unwrap()
        .unwrap();
    assert_eq!(woken["timed_out"], false);
    assert_eq!(woken["events"][0]["type"], "stop_approval");
    assert_eq!(woken["events"][0]["payload"]["approved"], true);

    // Responding again is a no-op: the first decision stands.
    let again = server.respond_stop_request(&request_id, false, "flip").await.unwrap();
    assert!(again.approved);
}

// ============================================================================
// Scenario: review rework cycles ending in escalation
// ============================================================================

#[tokio::test]
async fn third_rejection_escalates_the_assignment() {
    let dir = TempDir::new().unwrap();
    let server = server_in(&dir).await;

    for agent in ["sgt001", "coder001", "rev001", "rev002", "rev003"] {
        server
            .registry
            .dispatch(agent, "register_agent", json!({"role": "worker"}))
            .await
            .unwrap();
    }

    let dispatched = server
        .registry
        .dispatch(
            "sgt001",
            "dispatch_task",
            json!({"description": "assignment #7", "assigned_to": "coder001"}),
        )
        .await
        .unwrap();
    let assignment_id = dispatched["assignment_id"].as_str().unwrap().to_string();

    for round in 1..=3u64 {
        let board = server
            .registry
            .dispatch(
                "sgt001",
                "create_review_board",
                json!({"assignment_id": assignment_id, "reviewer_count": 3, "risk_level": "medium"}),
            )
            .await
            .unwrap();
        let board_id = board["board_id"].as_str().unwrap().to_string();

        server
            .registry
            .dispatch(
                "rev001",
                "record_reviewer_vote",
                json!({"board_id": board_id, "approved": true, "notes": "fine"}),
            )
            .await
            .unwrap();
        for reviewer in ["rev002", "rev003"] {
            server
                .registry
                .dispatch(
                    reviewer,
                    "record_reviewer_vote",
                    json!({"board_id": board_id, "approved": false, "notes": "defects remain"}),
                )
                .await
                .unwrap();
        }
        if round == 1 {
            server
                .registry
                .dispatch(
                    "rev002",
                    "submit_defect",
                    json!({"board_id": board_id, "severity": "critical", "title": "loses data", "category": "correctness"}),
                )
                .await
                .unwrap();
        }

        let outcome = server
            .registry
            .dispatch("sgt001", "finalize_board", json!({"board_id": board_id}))
            .await
            .unwrap();
        assert_eq!(outcome["verdict"], "rejected");

        if round < 3 {
            assert_eq!(outcome["assignment_status"], "rework");
            assert_eq!(outcome["review_attempt"], round + 1);
        } else {
            assert_eq!(outcome["assignment_status"], "escalated");
        }

        // Duplicate votes on a completed board are rejected outright.
        let duplicate = server
            .registry
            .dispatch(
                "rev001",
                "record_reviewer_vote",
                json!({"board_id": board_id, "approved": true}),
            )
            .await;
        assert!(duplicate.is_err());
    }

    let boards = server.review_boards(None).await.unwrap();
    assert_eq!(boards.len(), 3);
    assert!(boards.iter().all(|b| b.final_verdict.is_some()));
}

// ============================================================================
// Scenario: presence protection
// ============================================================================

#[tokio::test]
async fn working_agent_survives_staleness_while_idle_agent_is_reaped() {
    let dir = TempDir::new().unwrap();
    let mut config = Config {
        base_path: dir.path().display().to_string(),
        ..Default::default()
    };
    // A one-second threshold lets heartbeats age for real in the test.
    config.presence.stale_threshold = 1;
    config.presence.pending_threshold = 600;
    let server = Server::build(config, teams_with(&["coder"])).await.unwrap();

    for (agent, signal) in [("beta002", "working"), ("idle003", "idle")] {
        server
            .registry
            .dispatch(agent, "register_agent", json!({"role": "worker"}))
            .await
            .unwrap();
        server
            .registry
            .dispatch(agent, "signal_captain", json!({"signal": signal, "context": "x"}))
            .await
            .unwrap();
    }
    assert_eq!(server.state_snapshot().agents["beta002"].status, AgentStatus::Working);

    // Both heartbeats age far past the threshold.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let report = server.run_cleanup().await;
    assert_eq!(report.reaped, vec!["idle003".to_string()]);
    assert_eq!(report.protected, vec!["beta002".to_string()]);

    let snapshot = server.state_snapshot();
    assert!(snapshot.agents.contains_key("beta002"));
    assert!(!snapshot.agents.contains_key("idle003"));

    // A second pass right away finds nothing: the protected agent's
    // presence was refreshed.
    let report = server.run_cleanup().await;
    assert!(report.reaped.is_empty());
    assert!(report.protected.is_empty());
}

// ============================================================================
// Scenario: targeted delivery with overflow accounting
// ============================================================================

#[tokio::test]
async fn subscriber_overflow_keeps_newest_events() {
    let dir = TempDir::new().unwrap();
    let server = server_in(&dir).await;

    let sub = server.bus.subscribe_with_capacity("gamma003", None, 4);

    for i in 0..2 {
        server
            .registry
            .dispatch(
                "sender01",
                "send_to_agent",
                json!({"target": "gamma003", "type": "message", "payload": {"n": i}}),
            )
            .await
            .unwrap();
    }
    assert_eq!(sub.recv().await.unwrap().payload["n"], 0);
    assert_eq!(sub.recv().await.unwrap().payload["n"], 1);

    for i in 2..10 {
        server
            .registry
            .dispatch(
                "sender01",
                "send_to_agent",
                json!({"target": "gamma003", "type": "message", "payload": {"n": i}}),
            )
            .await
            .unwrap();
    }

    let mut delivered = Vec::new();
    while let Some(event) = sub.try_recv() {
        assert_eq!(event.event_type, EventType::Message);
        delivered.push(event.payload["n"].as_i64().unwrap());
    }
    assert_eq!(delivered, vec![6, 7, 8, 9]);
    assert_eq!(sub.dropped(), 4);
}
