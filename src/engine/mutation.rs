//! The batched, atomic mutation protocol: `plan`, `update`, `connect`,
//! `restructure`. Each runs inside exactly one transaction; a failure
//! anywhere in the batch rolls the whole call back.

use crate::core::error::GraphError;
use crate::core::store::Store;
use crate::graph::edge::{self, Edge};
use crate::graph::node::{self, NewNode, Node, UpdatePatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Deserialize)]
pub struct PlanNodeInput {
    #[serde(rename = "ref")]
    pub node_ref: String,
    pub parent_ref: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub context_links: Vec<String>,
    pub properties: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub nodes: Vec<Node>,
    pub ref_to_id: HashMap<String, String>,
}

fn topo_order(items: &[PlanNodeInput]) -> Result<Vec<usize>, GraphError> {
    let ref_index: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, it)| (it.node_ref.as_str(), i))
        .collect();

    let mut indegree = vec![0i32; items.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for (i, it) in items.iter().enumerate() {
        if let Some(p) = &it.parent_ref {
            if let Some(&pi) = ref_index.get(p.as_str()) {
                children[pi].push(i);
                indegree[i] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..items.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(items.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &c in &children[i] {
            indegree[c] -= 1;
            if indegree[c] == 0 {
                queue.push_back(c);
            }
        }
    }

    if order.len() != items.len() {
        return Err(GraphError::Validation(
            "plan batch contains a parent_ref cycle".to_string(),
        ));
    }
    Ok(order)
}

/// `plan(nodes[])` — §4.4.1. Creates a cross-referential batch of nodes in
/// one transaction, then resolves `depends_on` refs into real edges.
pub fn plan(
    store: &Store,
    project: &str,
    items: Vec<PlanNodeInput>,
    agent: &str,
) -> Result<PlanResult, GraphError> {
    if items.is_empty() {
        return Err(GraphError::Validation("nodes[] must not be empty".to_string()));
    }
    let order = topo_order(&items)?;
    let ref_index: HashSet<&str> = items.iter().map(|it| it.node_ref.as_str()).collect();
    let parent_refs_used: HashSet<&str> = items
        .iter()
        .filter_map(|it| it.parent_ref.as_deref())
        .filter(|p| ref_index.contains(p))
        .collect();

    store.with_transaction(|conn| {
        let mut ref_to_id: HashMap<String, String> = HashMap::new();
        let mut created = Vec::new();

        for idx in &order {
            let item = &items[*idx];
            let parent = match &item.parent_ref {
                None => None,
                Some(p) => Some(ref_to_id.get(p).cloned().unwrap_or_else(|| p.clone())),
            };
            let discovery_override = if parent_refs_used.contains(item.node_ref.as_str()) {
                Some("done".to_string())
            } else {
                None
            };
            let created_node = node::create(
                conn,
                NewNode {
                    project: project.to_string(),
                    parent,
                    summary: item.summary.clone(),
                    properties: item.properties.clone(),
                    context_links: Some(item.context_links.clone()),
                    discovery_override,
                },
                agent,
            )?;
            ref_to_id.insert(item.node_ref.clone(), created_node.id.clone());
            created.push(created_node);
        }

        for idx in &order {
            let item = &items[*idx];
            let from_id = &ref_to_id[&item.node_ref];
            for dep in &item.depends_on {
                let to_id = ref_to_id.get(dep).cloned().unwrap_or_else(|| dep.clone());
                edge::add_edge(conn, from_id, &to_id, "depends_on", agent)?;
            }
        }

        Ok(PlanResult {
            nodes: created,
            ref_to_id,
        })
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateInput {
    pub node_id: String,
    pub summary: Option<String>,
    pub properties: Option<Value>,
    #[serde(default)]
    pub add_context_links: Vec<String>,
    #[serde(default)]
    pub add_evidence: Vec<node::Evidence>,
    pub plan: Option<Vec<String>>,
    pub resolved: Option<bool>,
    pub resolved_reason: Option<String>,
    pub blocked: Option<bool>,
    pub blocked_reason: Option<String>,
    pub expected_rev: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub updated: Vec<Node>,
    pub auto_resolved: Vec<Node>,
    pub newly_actionable: Vec<String>,
}

/// `update(updates[])` — §4.4.2.
pub fn update(store: &Store, updates: Vec<UpdateInput>, agent: &str) -> Result<UpdateResult, GraphError> {
    if updates.is_empty() {
        return Err(GraphError::Validation("updates[] must not be empty".to_string()));
    }

    store.with_transaction(|conn| {
        let mut updated = Vec::new();
        let mut auto_resolved = Vec::new();
        let mut resolved_ids = Vec::new();
        let mut projects: HashSet<String> = HashSet::new();

        for input in &updates {
            let patch = UpdatePatch {
                summary: input.summary.clone(),
                properties: input.properties.clone(),
                add_context_links: Some(input.add_context_links.clone()),
                add_evidence: Some(input.add_evidence.clone()),
                plan: input.plan.clone(),
                resolved: input.resolved,
                resolved_reason: input.resolved_reason.clone(),
                blocked: input.blocked,
                blocked_reason: input.blocked_reason.clone(),
                expected_rev: input.expected_rev,
            };
            let (node, cascaded) = node::apply_update(conn, &input.node_id, patch, agent)?;
            projects.insert(node.project.clone());
            if node.resolved {
                resolved_ids.push(node.id.clone());
            }
            for c in &cascaded {
                resolved_ids.push(c.id.clone());
            }
            updated.push(node);
            auto_resolved.extend(cascaded);
        }

        let newly_actionable = edge::find_newly_actionable(conn, &resolved_ids)?;

        Ok(UpdateResult {
            updated,
            auto_resolved,
            newly_actionable,
        })
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeOp {
    pub op: String, // "add" | "remove"
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeOutcome {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub accepted: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectResult {
    pub results: Vec<EdgeOutcome>,
    pub newly_actionable: Vec<String>,
}

/// `connect(edges[])` — §4.4.3. Per-edge acceptance is reported; only a
/// store/schema error aborts the whole batch.
pub fn connect(store: &Store, ops: Vec<EdgeOp>, agent: &str) -> Result<ConnectResult, GraphError> {
    if ops.is_empty() {
        return Err(GraphError::Validation("edges[] must not be empty".to_string()));
    }

    store.with_transaction(|conn| {
        let mut results = Vec::new();
        let mut touched_ids = Vec::new();

        for op in &ops {
            let outcome = match op.op.as_str() {
                "add" => match edge::add_edge(conn, &op.from, &op.to, &op.kind, agent) {
                    Ok(_) => EdgeOutcome {
                        from: op.from.clone(),
                        to: op.to.clone(),
                        kind: op.kind.clone(),
                        accepted: true,
                        reason: None,
                    },
                    Err(e) if is_rejectable(&e) => EdgeOutcome {
                        from: op.from.clone(),
                        to: op.to.clone(),
                        kind: op.kind.clone(),
                        accepted: false,
                        reason: Some(e.to_string()),
                    },
                    Err(e) => return Err(e),
                },
                "remove" => match edge::remove_edge(conn, &op.from, &op.to, &op.kind, agent) {
                    Ok(()) => EdgeOutcome {
                        from: op.from.clone(),
                        to: op.to.clone(),
                        kind: op.kind.clone(),
                        accepted: true,
                        reason: None,
                    },
                    Err(e) if is_rejectable(&e) => EdgeOutcome {
                        from: op.from.clone(),
                        to: op.to.clone(),
                        kind: op.kind.clone(),
                        accepted: false,
                        reason: Some(e.to_string()),
                    },
                    Err(e) => return Err(e),
                },
                other => {
                    return Err(GraphError::Validation(format!(
                        "unknown connect op '{other}', expected 'add' or 'remove'"
                    )))
                }
            };
            touched_ids.push(op.to.clone());
            touched_ids.push(op.from.clone());
            results.push(outcome);
        }

        let newly_actionable = edge::find_newly_actionable(conn, &touched_ids)?;
        Ok(ConnectResult {
            results,
            newly_actionable,
        })
    })
}

/// Rejection reasons that `connect` reports per-edge rather than aborting
/// the transaction on: everything except a store/schema error.
fn is_rejectable(e: &GraphError) -> bool {
    !matches!(e, GraphError::Store(_) | GraphError::Io(_) | GraphError::Engine(_))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RestructureOp {
    Move { node: String, new_parent: String },
    Merge { source: String, target: String },
    Drop { node: String, reason: String },
    Delete { node: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RestructureResult {
    pub newly_actionable: Vec<String>,
}

/// `restructure(operations[])` — §4.4.4.
pub fn restructure(
    store: &Store,
    ops: Vec<RestructureOp>,
    agent: &str,
) -> Result<RestructureResult, GraphError> {
    if ops.is_empty() {
        return Err(GraphError::Validation(
            "operations[] must not be empty".to_string(),
        ));
    }

    store.with_transaction(|conn| {
        let mut touched = Vec::new();
        for op in &ops {
            match op {
                RestructureOp::Move { node: node_id, new_parent } => {
                    restructure_move(conn, node_id, new_parent, agent)?;
                    touched.push(node_id.clone());
                }
                RestructureOp::Merge { source, target } => {
                    restructure_merge(conn, source, target, agent)?;
                    touched.push(target.clone());
                }
                RestructureOp::Drop { node: node_id, reason } => {
                    restructure_drop(conn, node_id, reason, agent)?;
                    touched.push(node_id.clone());
                }
                RestructureOp::Delete { node: node_id } => {
                    restructure_delete(conn, node_id)?;
                }
            }
        }
        let newly_actionable = edge::find_newly_actionable(conn, &touched)?;
        Ok(RestructureResult { newly_actionable })
    })
}

fn restructure_move(
    conn: &rusqlite::Connection,
    node_id: &str,
    new_parent_id: &str,
    agent: &str,
) -> Result<(), GraphError> {
    let moved = node::get_or_throw(conn, node_id)?;
    let new_parent = node::get_or_throw(conn, new_parent_id)?;
    if moved.project != new_parent.project {
        return Err(GraphError::CrossProjectEdge(format!(
            "cannot move {node_id} into a different project"
        )));
    }
    let descendants = node::descendants_of(conn, node_id)?;
    if descendants.iter().any(|d| d.id == new_parent_id) {
        return Err(GraphError::Validation(format!(
            "cannot move {node_id} under its own descendant {new_parent_id}"
        )));
    }

    let depth_delta = (new_parent.depth + 1) - moved.depth;
    conn.execute(
        "UPDATE nodes SET parent = ?1, depth = depth + ?2 WHERE id = ?3",
        rusqlite::params![new_parent_id, depth_delta, node_id],
    )?;
    for d in &descendants {
        conn.execute(
            "UPDATE nodes SET depth = depth + ?1 WHERE id = ?2",
            rusqlite::params![depth_delta, d.id],
        )?;
    }

    crate::graph::event::append(
        conn,
        Some(node_id),
        agent,
        "moved",
        serde_json::json!({"new_parent": new_parent_id}),
    )?;
    Ok(())
}

fn restructure_merge(
    conn: &rusqlite::Connection,
    source_id: &str,
    target_id: &str,
    agent: &str,
) -> Result<(), GraphError> {
    let source = node::get_or_throw(conn, source_id)?;
    let target = node::get_or_throw(conn, target_id)?;
    if source.project != target.project {
        return Err(GraphError::CrossProjectEdge(format!(
            "cannot merge across projects ({source_id} -> {target_id})"
        )));
    }

    for child in node::children_of(conn, source_id)? {
        let depth_delta = (target.depth + 1) - child.depth;
        let descendants = node::descendants_of(conn, &child.id)?;
        conn.execute(
            "UPDATE nodes SET parent = ?1, depth = depth + ?2 WHERE id = ?3",
            rusqlite::params![target_id, depth_delta, child.id],
        )?;
        for d in &descendants {
            conn.execute(
                "UPDATE nodes SET depth = depth + ?1 WHERE id = ?2",
                rusqlite::params![depth_delta, d.id],
            )?;
        }
    }

    for e in edge::edges_from(conn, source_id)? {
        let _ = edge::remove_edge(conn, source_id, &e.to, &e.kind, agent);
        let _ = edge::add_edge(conn, target_id, &e.to, &e.kind, agent);
    }
    for e in edge::edges_to(conn, source_id)? {
        let _ = edge::remove_edge(conn, &e.from, source_id, &e.kind, agent);
        let _ = edge::add_edge(conn, &e.from, target_id, &e.kind, agent);
    }

    let mut context_links = target.context_links.clone();
    for l in &source.context_links {
        if !context_links.contains(l) {
            context_links.push(l.clone());
        }
    }
    let mut evidence = target.evidence.clone();
    for e in &source.evidence {
        if !evidence.contains(e) {
            evidence.push(e.clone());
        }
    }
    conn.execute(
        "UPDATE nodes SET context_links = ?1, evidence = ?2, rev = rev + 1, updated_at = ?3 WHERE id = ?4",
        rusqlite::params![
            serde_json::to_string(&context_links).unwrap(),
            serde_json::to_string(&evidence).unwrap(),
            crate::core::time::now_iso(),
            target_id,
        ],
    )?;

    conn.execute("DELETE FROM nodes WHERE id = ?1", [source_id])?;

    crate::graph::event::append(
        conn,
        Some(target_id),
        agent,
        "merged",
        serde_json::json!({"source": source_id}),
    )?;
    Ok(())
}

fn restructure_drop(
    conn: &rusqlite::Connection,
    node_id: &str,
    reason: &str,
    agent: &str,
) -> Result<(), GraphError> {
    let mut subtree = vec![node::get_or_throw(conn, node_id)?];
    subtree.extend(node::descendants_of(conn, node_id)?);

    let now = crate::core::time::now_iso();
    for n in &subtree {
        if n.resolved {
            continue;
        }
        let mut evidence = n.evidence.clone();
        evidence.push(node::Evidence {
            kind: "note".to_string(),
            reference: format!("dropped: {reason}"),
            agent: agent.to_string(),
            timestamp: now.clone(),
        });
        conn.execute(
            "UPDATE nodes SET resolved = 1, evidence = ?1, rev = rev + 1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![serde_json::to_string(&evidence).unwrap(), now, n.id],
        )?;
    }

    crate::graph::event::append(
        conn,
        Some(node_id),
        agent,
        "dropped",
        serde_json::json!({"reason": reason}),
    )?;
    Ok(())
}

fn restructure_delete(conn: &rusqlite::Connection, node_id: &str) -> Result<(), GraphError> {
    let target = node::get_or_throw(conn, node_id)?;
    let mut subtree = vec![target.clone()];
    subtree.extend(node::descendants_of(conn, node_id)?);

    if target.parent.is_none() && subtree.iter().any(|n| !n.evidence.is_empty()) {
        return Err(GraphError::Validation(format!(
            "cannot delete project root {node_id}: descendants carry recorded evidence"
        )));
    }

    for n in &subtree {
        conn.execute(
            "DELETE FROM edges WHERE from_node = ?1 OR to_node = ?1",
            [&n.id],
        )?;
    }
    // children before parents so the foreign key on `parent` never dangles.
    let mut by_depth = subtree.clone();
    by_depth.sort_by(|a, b| b.depth.cmp(&a.depth));
    for n in &by_depth {
        conn.execute("DELETE FROM nodes WHERE id = ?1", [&n.id])?;
    }
    Ok(())
}
