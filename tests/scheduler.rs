use std::time::Duration;
use taskgraph::core::store::Store;
use taskgraph::engine::mutation::{self, PlanNodeInput};
use taskgraph::engine::scheduler::{self, NextRequest};
use tempfile::tempdir;

fn fresh_store() -> Store {
    let dir = tempdir().unwrap();
    let store = Store::open(&dir.path().join("graph.db")).unwrap();
    std::mem::forget(dir);
    store
}

fn plain(node_ref: &str, parent_ref: Option<&str>, priority: Option<f64>) -> PlanNodeInput {
    PlanNodeInput {
        node_ref: node_ref.into(),
        parent_ref: parent_ref.map(String::from),
        summary: node_ref.into(),
        depends_on: vec![],
        context_links: vec![],
        properties: priority.map(|p| serde_json::json!({"priority": p})),
    }
}

#[test]
fn next_ranks_by_priority_then_depth() {
    let store = fresh_store();
    let result = mutation::plan(
        &store,
        "demo",
        vec![
            plain("root", None, None),
            plain("low", Some("root"), Some(1.0)),
            plain("high", Some("root"), Some(10.0)),
        ],
        "agent-a",
    )
    .unwrap();

    let next = scheduler::next(
        &store,
        NextRequest { project: "demo", scope: None, filter: None, count: 2, claim: false, agent: "agent-a", claim_ttl: Duration::from_secs(60) },
    )
    .unwrap();
    assert_eq!(next.tasks.len(), 2);
    assert_eq!(next.tasks[0].node.id, result.ref_to_id["high"]);
}

#[test]
fn filter_narrows_candidates() {
    let store = fresh_store();
    let result = mutation::plan(
        &store,
        "demo",
        vec![
            plain("root", None, None),
            PlanNodeInput { node_ref: "tagged".into(), parent_ref: Some("root".into()), summary: "tagged".into(), depends_on: vec![], context_links: vec![], properties: Some(serde_json::json!({"kind": "bug"})) },
            plain("other", Some("root"), None),
        ],
        "agent-a",
    )
    .unwrap();

    let filter = serde_json::json!({"kind": "bug"});
    let next = scheduler::next(
        &store,
        NextRequest { project: "demo", scope: None, filter: Some(&filter), count: 10, claim: false, agent: "agent-a", claim_ttl: Duration::from_secs(60) },
    )
    .unwrap();
    assert_eq!(next.tasks.len(), 1);
    assert_eq!(next.tasks[0].node.id, result.ref_to_id["tagged"]);
}

#[test]
fn claim_blocks_other_agents_until_ttl_expires() {
    let store = fresh_store();
    mutation::plan(&store, "demo", vec![plain("root", None, None)], "agent-a").unwrap();

    scheduler::next(
        &store,
        NextRequest { project: "demo", scope: None, filter: None, count: 1, claim: true, agent: "agent-a", claim_ttl: Duration::from_secs(60) },
    )
    .unwrap();

    let blocked = scheduler::next(
        &store,
        NextRequest { project: "demo", scope: None, filter: None, count: 1, claim: false, agent: "agent-b", claim_ttl: Duration::from_secs(60) },
    )
    .unwrap();
    assert!(blocked.tasks.is_empty());

    let reclaimed = scheduler::next(
        &store,
        NextRequest { project: "demo", scope: None, filter: None, count: 1, claim: true, agent: "agent-b", claim_ttl: Duration::from_secs(0) },
    )
    .unwrap();
    assert_eq!(reclaimed.tasks.len(), 1);
}
