use taskgraph::core::store::Store;
use taskgraph::graph::node::{self, NewNode};
use tempfile::tempdir;

fn fresh_store() -> Store {
    let dir = tempdir().unwrap();
    let store = Store::open(&dir.path().join("graph.db")).unwrap();
    std::mem::forget(dir);
    store
}

#[test]
fn tree_walks_cover_ancestors_and_descendants() {
    let store = fresh_store();
    store
        .with_transaction(|conn| {
            let root = node::create(
                conn,
                NewNode { project: "demo".into(), summary: "root".into(), discovery_override: Some("done".into()), ..Default::default() },
                "agent-a",
            )?;
            let mid = node::create(
                conn,
                NewNode { project: "demo".into(), parent: Some(root.id.clone()), summary: "mid".into(), discovery_override: Some("done".into()), ..Default::default() },
                "agent-a",
            )?;
            let leaf = node::create(
                conn,
                NewNode { project: "demo".into(), parent: Some(mid.id.clone()), summary: "leaf".into(), ..Default::default() },
                "agent-a",
            )?;

            let ancestors = node::ancestors_of(conn, &leaf.id)?;
            assert_eq!(ancestors.len(), 2);
            assert_eq!(ancestors[0].id, mid.id);
            assert_eq!(ancestors[1].id, root.id);

            let descendants = node::descendants_of(conn, &root.id)?;
            assert_eq!(descendants.len(), 2);

            assert_eq!(leaf.depth, 2);
            Ok(())
        })
        .unwrap();
}

#[test]
fn project_summary_counts_resolved_and_blocked() {
    let store = fresh_store();
    store
        .with_transaction(|conn| {
            let root = node::create(
                conn,
                NewNode { project: "demo".into(), summary: "root".into(), discovery_override: Some("done".into()), ..Default::default() },
                "agent-a",
            )?;
            node::create(
                conn,
                NewNode { project: "demo".into(), parent: Some(root.id.clone()), summary: "a".into(), ..Default::default() },
                "agent-a",
            )?;
            let summary = node::project_summary(conn, "demo")?;
            assert_eq!(summary.total, 2);
            assert_eq!(summary.resolved, 0);
            assert_eq!(summary.blocked, 0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn merge_properties_deletes_on_null() {
    let existing = serde_json::json!({"priority": 5, "owner": "a"});
    let patch = serde_json::json!({"owner": null, "priority": 9});
    let merged = node::merge_properties(&existing, &patch);
    assert_eq!(merged["priority"], 9);
    assert!(merged.get("owner").is_none());
}

#[test]
fn cross_project_parent_rejected() {
    let store = fresh_store();
    store
        .with_transaction(|conn| {
            let root_a = node::create(
                conn,
                NewNode { project: "a".into(), summary: "root".into(), discovery_override: Some("done".into()), ..Default::default() },
                "agent-a",
            )?;
            let err = node::create(
                conn,
                NewNode { project: "b".into(), parent: Some(root_a.id.clone()), summary: "child".into(), ..Default::default() },
                "agent-a",
            )
            .unwrap_err();
            assert_eq!(err.code(), "cross_project_edge");
            Ok(())
        })
        .unwrap();
}
