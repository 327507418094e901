use taskgraph::core::store::Store;
use taskgraph::engine::mutation::{self, PlanNodeInput};
use taskgraph::engine::query::{self, QueryFilter, SortMode};
use tempfile::tempdir;

fn fresh_store() -> Store {
    let dir = tempdir().unwrap();
    let store = Store::open(&dir.path().join("graph.db")).unwrap();
    std::mem::forget(dir);
    store
}

fn item(node_ref: &str, parent_ref: Option<&str>, summary: &str) -> PlanNodeInput {
    PlanNodeInput {
        node_ref: node_ref.into(),
        parent_ref: parent_ref.map(String::from),
        summary: summary.into(),
        depends_on: vec![],
        context_links: vec![],
        properties: None,
    }
}

#[test]
fn ancestor_filter_scopes_to_subtree() {
    let store = fresh_store();
    let result = mutation::plan(
        &store,
        "demo",
        vec![
            item("root", None, "root"),
            item("branch", Some("root"), "branch"),
            item("leaf", Some("branch"), "leaf"),
            item("other", Some("root"), "other"),
        ],
        "agent-a",
    )
    .unwrap();
    let branch_id = result.ref_to_id["branch"].clone();

    let page = query::query(
        &store,
        "demo",
        QueryFilter { ancestor: Some(branch_id), ..Default::default() },
        SortMode::Depth,
        None,
        10,
    )
    .unwrap();
    let summaries: Vec<_> = page.nodes.iter().map(|n| n.summary.as_str()).collect();
    assert_eq!(summaries, vec!["leaf"]);
}

#[test]
fn is_actionable_filter_excludes_nodes_with_unresolved_children() {
    let store = fresh_store();
    mutation::plan(&store, "demo", vec![item("root", None, "root"), item("a", Some("root"), "a")], "agent-a").unwrap();

    let page = query::query(&store, "demo", QueryFilter { is_actionable: Some(true), ..Default::default() }, SortMode::Readiness, None, 10).unwrap();
    let summaries: Vec<_> = page.nodes.iter().map(|n| n.summary.as_str()).collect();
    assert_eq!(summaries, vec!["a"]);
}
