use taskgraph::core::store::Store;
use taskgraph::graph::edge;
use taskgraph::graph::node::{self, NewNode};
use tempfile::tempdir;

fn fresh_store() -> Store {
    let dir = tempdir().unwrap();
    let store = Store::open(&dir.path().join("graph.db")).unwrap();
    std::mem::forget(dir);
    store
}

#[test]
fn add_remove_and_rediscover_edge() {
    let store = fresh_store();
    store
        .with_transaction(|conn| {
            let a = node::create(conn, NewNode { project: "demo".into(), summary: "a".into(), discovery_override: Some("done".into()), ..Default::default() }, "agent-a")?;
            let b = node::create(conn, NewNode { project: "demo".into(), summary: "b".into(), discovery_override: Some("done".into()), ..Default::default() }, "agent-a")?;

            edge::add_edge(conn, &a.id, &b.id, "depends_on", "agent-a")?;
            assert_eq!(edge::edges_from(conn, &a.id)?.len(), 1);
            assert_eq!(edge::edges_to(conn, &b.id)?.len(), 1);

            edge::remove_edge(conn, &a.id, &b.id, "depends_on", "agent-a")?;
            assert!(edge::edges_from(conn, &a.id)?.is_empty());

            let err = edge::remove_edge(conn, &a.id, &b.id, "depends_on", "agent-a").unwrap_err();
            assert_eq!(err.code(), "not_found");
            Ok(())
        })
        .unwrap();
}

#[test]
fn parent_typed_edges_are_rejected() {
    let store = fresh_store();
    store
        .with_transaction(|conn| {
            let a = node::create(conn, NewNode { project: "demo".into(), summary: "a".into(), discovery_override: Some("done".into()), ..Default::default() }, "agent-a")?;
            let b = node::create(conn, NewNode { project: "demo".into(), summary: "b".into(), discovery_override: Some("done".into()), ..Default::default() }, "agent-a")?;
            let err = edge::add_edge(conn, &a.id, &b.id, "parent", "agent-a").unwrap_err();
            assert_eq!(err.code(), "validation_error");
            Ok(())
        })
        .unwrap();
}

#[test]
fn is_actionable_requires_resolved_children_and_dependencies() {
    let store = fresh_store();
    store
        .with_transaction(|conn| {
            let root = node::create(conn, NewNode { project: "demo".into(), summary: "root".into(), discovery_override: Some("done".into()), ..Default::default() }, "agent-a")?;
            let child = node::create(conn, NewNode { project: "demo".into(), parent: Some(root.id.clone()), summary: "child".into(), discovery_override: Some("done".into()), ..Default::default() }, "agent-a")?;
            // root has an unresolved child, so it's not actionable yet.
            assert!(!edge::is_actionable(conn, &root.id)?);
            assert!(edge::is_actionable(conn, &child.id)?);
            Ok(())
        })
        .unwrap();
}
