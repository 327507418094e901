//! `next` — §4.5. Ranks actionable nodes, grants soft-claim leases, and
//! tracks auto-scope / retro-nudge state.

use crate::core::error::GraphError;
use crate::core::store::Store;
use crate::core::time::{now_iso, seconds_since};
use crate::graph::edge;
use crate::graph::node::{self, Node};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

pub struct NextRequest<'a> {
    pub project: &'a str,
    pub scope: Option<&'a str>,
    pub filter: Option<&'a Value>,
    pub count: i64,
    pub claim: bool,
    pub agent: &'a str,
    pub claim_ttl: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedTask {
    pub node: Node,
    pub ancestors: Vec<Node>,
    pub depends_on: Vec<DependencyStatus>,
    pub dependents: Vec<DependencyStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub node_id: String,
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextResult {
    pub tasks: Vec<RankedTask>,
    pub auto_scoped: Option<String>,
    pub your_claims: Vec<String>,
    pub retro_nudge: Option<String>,
}

fn is_claim_active(node: &Node, ttl: Duration) -> bool {
    match node.claimed_at() {
        Some(ts) => seconds_since(ts)
            .map(|secs| secs >= 0 && (secs as u64) < ttl.as_secs())
            .unwrap_or(false),
        None => false,
    }
}

fn most_recently_claimed_unresolved(
    conn: &rusqlite::Connection,
    project: &str,
    agent: &str,
) -> Result<Option<Node>, GraphError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM nodes WHERE project = ?1 AND resolved = 0 \
         AND json_extract(properties, '$._claimed_by') = ?2 \
         ORDER BY json_extract(properties, '$._claimed_at') DESC LIMIT 1",
    )?;
    let id: Option<String> = stmt
        .query_row(rusqlite::params![project, agent], |r| r.get(0))
        .optional_or_none()?;
    match id {
        Some(id) => node::get(conn, &id),
        None => Ok(None),
    }
}

trait OptionalOrNone<T> {
    fn optional_or_none(self) -> Result<Option<T>, GraphError>;
}
impl<T> OptionalOrNone<T> for rusqlite::Result<T> {
    fn optional_or_none(self) -> Result<Option<T>, GraphError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(GraphError::from(e)),
        }
    }
}

fn properties_match(filter: &Value, properties: &Value) -> bool {
    let Some(filter_obj) = filter.as_object() else {
        return true;
    };
    let Some(props_obj) = properties.as_object() else {
        return false;
    };
    filter_obj
        .iter()
        .all(|(k, v)| props_obj.get(k) == Some(v))
}

fn candidate_ids(
    conn: &rusqlite::Connection,
    project: &str,
    scope: Option<&str>,
) -> Result<Vec<String>, GraphError> {
    let in_scope: Vec<String> = match scope {
        Some(scope_id) => {
            let mut ids: Vec<String> = node::descendants_of(conn, scope_id)?
                .into_iter()
                .map(|n| n.id)
                .collect();
            ids.push(scope_id.to_string());
            ids
        }
        None => {
            let mut stmt = conn.prepare("SELECT id FROM nodes WHERE project = ?1")?;
            stmt.query_map([project], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let mut actionable = Vec::new();
    for id in in_scope {
        if edge::is_actionable(conn, &id)? {
            actionable.push(id);
        }
    }
    Ok(actionable)
}

fn sort_key(node: &Node) -> (std::cmp::Reverse<i64>, std::cmp::Reverse<i64>, String, String) {
    let priority = node.priority().map(|p| (p * 1000.0) as i64).unwrap_or(i64::MIN);
    (
        std::cmp::Reverse(priority),
        std::cmp::Reverse(node.depth),
        node.updated_at.clone(),
        node.id.clone(),
    )
}

pub fn next(store: &Store, req: NextRequest) -> Result<NextResult, GraphError> {
    store.with_transaction(|conn| {
        let mut auto_scoped = None;
        let scope = if req.scope.is_none() {
            let recent = most_recently_claimed_unresolved(conn, req.project, req.agent)?;
            match recent.and_then(|n| n.parent) {
                Some(parent_id) => {
                    auto_scoped = Some(parent_id.clone());
                    Some(parent_id)
                }
                None => None,
            }
        } else {
            req.scope.map(|s| s.to_string())
        };

        let mut ids = candidate_ids(conn, req.project, scope.as_deref())?;

        // Skip nodes claimed by someone else with an active lease.
        let mut nodes: Vec<Node> = Vec::new();
        for id in ids.drain(..) {
            let n = node::get_or_throw(conn, &id)?;
            if let Some(owner) = n.claimed_by() {
                if owner != req.agent && is_claim_active(&n, req.claim_ttl) {
                    continue;
                }
            }
            if let Some(filter) = req.filter {
                if !properties_match(filter, &n.properties) {
                    continue;
                }
            }
            nodes.push(n);
        }
        nodes.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        nodes.truncate(req.count.max(1) as usize);

        let mut tasks = Vec::new();
        for mut n in nodes {
            if req.claim {
                let mut props = n.properties.as_object().cloned().unwrap_or_default();
                props.insert("_claimed_by".to_string(), json!(req.agent));
                props.insert("_claimed_at".to_string(), json!(now_iso()));
                let new_rev = n.rev + 1;
                conn.execute(
                    "UPDATE nodes SET properties = ?1, rev = ?2, updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![
                        Value::Object(props).to_string(),
                        new_rev,
                        now_iso(),
                        n.id
                    ],
                )?;
                crate::graph::event::append(
                    conn,
                    Some(&n.id),
                    req.agent,
                    "claimed",
                    json!({"ttl_secs": req.claim_ttl.as_secs()}),
                )?;
                n = node::get_or_throw(conn, &n.id)?;
            }

            let ancestors = node::ancestors_of(conn, &n.id)?;
            let depends_on = edge::edges_from(conn, &n.id)?
                .into_iter()
                .filter(|e| e.kind == "depends_on")
                .map(|e| {
                    let resolved = node::get(conn, &e.to)
                        .ok()
                        .flatten()
                        .map(|t| t.resolved)
                        .unwrap_or(false);
                    DependencyStatus { node_id: e.to, resolved }
                })
                .collect();
            let dependents = edge::edges_to(conn, &n.id)?
                .into_iter()
                .filter(|e| e.kind == "depends_on")
                .map(|e| {
                    let resolved = node::get(conn, &e.from)
                        .ok()
                        .flatten()
                        .map(|s| s.resolved)
                        .unwrap_or(false);
                    DependencyStatus { node_id: e.from, resolved }
                })
                .collect();

            tasks.push(RankedTask {
                node: n,
                ancestors,
                depends_on,
                dependents,
            });
        }

        let your_claims: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id, properties FROM nodes WHERE project = ?1 AND resolved = 0",
            )?;
            let rows: Vec<(String, String)> = stmt
                .query_map([req.project], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .filter_map(|(id, props_raw)| {
                    let props: Value = serde_json::from_str(&props_raw).ok()?;
                    let owner = props.get("_claimed_by")?.as_str()?;
                    let claimed_at = props.get("_claimed_at")?.as_str()?;
                    let active = seconds_since(claimed_at)
                        .map(|secs| secs >= 0 && (secs as u64) < req.claim_ttl.as_secs())
                        .unwrap_or(false);
                    if owner == req.agent && active {
                        Some(id)
                    } else {
                        None
                    }
                })
                .collect()
        };

        let retro_nudge = retro_nudge_message(conn, req.project)?;

        Ok(NextResult {
            tasks,
            auto_scoped,
            your_claims,
            retro_nudge,
        })
    })
}

/// Count resolves since the last `retro-<ts>` knowledge entry in this
/// project; surfaced once the count reaches 5.
fn retro_nudge_message(conn: &rusqlite::Connection, project: &str) -> Result<Option<String>, GraphError> {
    let last_retro_ts: Option<String> = conn
        .query_row(
            "SELECT MAX(updated_at) FROM knowledge WHERE project = ?1 AND key LIKE 'retro-%'",
            [project],
            |r| r.get(0),
        )
        .unwrap_or(None);

    let resolved_since: i64 = match &last_retro_ts {
        Some(ts) => conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE project = ?1 AND resolved = 1 AND updated_at > ?2",
            rusqlite::params![project, ts],
            |r| r.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE project = ?1 AND resolved = 1",
            [project],
            |r| r.get(0),
        )?,
    };

    if resolved_since >= 5 {
        Ok(Some(format!(
            "{resolved_since} tasks resolved since the last retro — consider graph_retro"
        )))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mutation::{self, PlanNodeInput};
    use tempfile::tempdir;

    fn fresh_store() -> Store {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let store = Store::open(&path).unwrap();
        std::mem::forget(dir);
        store
    }

    #[test]
    fn claim_then_reclaim_by_same_agent_lists_your_claims() {
        let store = fresh_store();
        let items = vec![PlanNodeInput {
            node_ref: "root".into(),
            parent_ref: None,
            summary: "root".into(),
            depends_on: vec![],
            context_links: vec![],
            properties: None,
        }];
        mutation::plan(&store, "demo", items, "agent-a").unwrap();

        let first = next(
            &store,
            NextRequest {
                project: "demo",
                scope: None,
                filter: None,
                count: 1,
                claim: true,
                agent: "agent-a",
                claim_ttl: Duration::from_secs(60),
            },
        )
        .unwrap();
        assert_eq!(first.tasks.len(), 1);

        let second = next(
            &store,
            NextRequest {
                project: "demo",
                scope: None,
                filter: None,
                count: 1,
                claim: true,
                agent: "agent-a",
                claim_ttl: Duration::from_secs(60),
            },
        )
        .unwrap();
        assert_eq!(second.your_claims.len(), 1);
    }

    #[test]
    fn expired_claim_is_reclaimable_by_other_agent() {
        let store = fresh_store();
        let items = vec![PlanNodeInput {
            node_ref: "root".into(),
            parent_ref: None,
            summary: "root".into(),
            depends_on: vec![],
            context_links: vec![],
            properties: None,
        }];
        mutation::plan(&store, "demo", items, "agent-a").unwrap();

        next(
            &store,
            NextRequest {
                project: "demo",
                scope: None,
                filter: None,
                count: 1,
                claim: true,
                agent: "agent-a",
                claim_ttl: Duration::from_secs(0),
            },
        )
        .unwrap();

        let other = next(
            &store,
            NextRequest {
                project: "demo",
                scope: None,
                filter: None,
                count: 1,
                claim: true,
                agent: "agent-b",
                claim_ttl: Duration::from_secs(60),
            },
        )
        .unwrap();
        assert_eq!(other.tasks.len(), 1);
    }
}
