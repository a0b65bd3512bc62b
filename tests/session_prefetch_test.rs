//! Session-driven project warm-up through the search path.

mod helpers;

use context_orchestrator::config::ProjectConfig;
use context_orchestrator::memory::session::SessionManager;
use context_orchestrator::memory::types::Conversation;
use helpers::{build_services, TestConfig, VALID_SUMMARY};

fn scripted_outputs() -> Vec<&'static str> {
    let mut outputs = Vec::new();
    for _ in 0..4 {
        outputs.push("Process");
        outputs.push(VALID_SUMMARY);
    }
    outputs.push("0.7");
    outputs
}

#[tokio::test]
async fn warmup_populates_semantic_cache_and_runs_prefetch_queries() {
    let services = build_services(TestConfig {
        reasoner_outputs: scripted_outputs(),
        cross_encoder_enabled: true,
        ..Default::default()
    });

    for i in 0..4 {
        services
            .ingest
            .ingest(Conversation {
                user: format!("gamma service incident report {i}"),
                assistant: format!("gamma service mitigation {i}"),
                project_id: Some("gamma".into()),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let sessions = SessionManager::new(&ProjectConfig::default());
    sessions.start_session("s1");
    let warmup = sessions
        .add_command("s1", "git push", None, Some("gamma"))
        .unwrap()
        .expect("explicit project hint must trigger warm-up");
    assert_eq!(warmup.project_id, "gamma");

    let stats = services
        .search
        .prefetch_project(&warmup.project_id, &["gamma service incident".to_string()])
        .await;
    assert_eq!(stats["queries_executed"], 1);
    assert_eq!(stats["pool"]["memories_loaded"], 4);
    assert_eq!(stats["pool"]["cache_entries_added"], 4);

    let metrics = services.reranker.metrics_snapshot();
    assert_eq!(metrics["warm_entries_added"], 4);
    assert!(metrics["prefetch_requests"].as_u64().unwrap() > 0);
    // the four warm pool entries, plus whatever the prefetch query scored
    assert!(metrics["l3_entries"].as_u64().unwrap() >= 4);
}

#[tokio::test]
async fn cwd_hint_alone_does_not_warm() {
    let sessions = SessionManager::new(&ProjectConfig::default());
    sessions.start_session("s1");
    let warmup = sessions
        .add_command("s1", "make build", Some("/home/dev/gamma"), None)
        .unwrap();
    assert!(warmup.is_none());
}
