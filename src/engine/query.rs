//! Filtered search with sort modes and cursor pagination — §4.6.

use crate::core::error::GraphError;
use crate::core::store::Store;
use crate::graph::edge;
use crate::graph::node::{self, Node};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryFilter {
    pub resolved: Option<bool>,
    pub properties: Option<Value>,
    pub text: Option<String>,
    pub ancestor: Option<String>,
    pub has_evidence_type: Option<String>,
    pub is_leaf: Option<bool>,
    pub is_actionable: Option<bool>,
    pub is_blocked: Option<bool>,
    pub claimed_by: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    Readiness,
    Depth,
    Recent,
    Created,
}

impl Default for SortMode {
    fn default() -> Self {
        SortMode::Readiness
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub nodes: Vec<Node>,
    pub next_cursor: Option<String>,
}

fn properties_subset(filter: &Value, properties: &Value) -> bool {
    let Some(filter_obj) = filter.as_object() else {
        return true;
    };
    let Some(props_obj) = properties.as_object() else {
        return false;
    };
    filter_obj.iter().all(|(k, v)| props_obj.get(k) == Some(v))
}

fn matches(conn: &rusqlite::Connection, n: &Node, filter: &QueryFilter) -> Result<bool, GraphError> {
    if let Some(resolved) = filter.resolved {
        if n.resolved != resolved {
            return Ok(false);
        }
    }
    if let Some(props) = &filter.properties {
        if !properties_subset(props, &n.properties) {
            return Ok(false);
        }
    }
    if let Some(text) = &filter.text {
        if !n.summary.to_lowercase().contains(&text.to_lowercase()) {
            return Ok(false);
        }
    }
    if let Some(ancestor) = &filter.ancestor {
        let descendant_ids: Vec<String> = node::descendants_of(conn, ancestor)?
            .into_iter()
            .map(|d| d.id)
            .collect();
        if !descendant_ids.contains(&n.id) {
            return Ok(false);
        }
    }
    if let Some(evidence_type) = &filter.has_evidence_type {
        if !n.evidence.iter().any(|e| &e.kind == evidence_type) {
            return Ok(false);
        }
    }
    if let Some(is_leaf) = filter.is_leaf {
        let has_children = !node::children_of(conn, &n.id)?.is_empty();
        if (!has_children) != is_leaf {
            return Ok(false);
        }
    }
    if let Some(is_actionable) = filter.is_actionable {
        if edge::is_actionable(conn, &n.id)? != is_actionable {
            return Ok(false);
        }
    }
    if let Some(is_blocked) = filter.is_blocked {
        if n.blocked != is_blocked {
            return Ok(false);
        }
    }
    if let Some(claimed_by) = &filter.claimed_by {
        match claimed_by {
            Some(agent) => {
                if n.claimed_by() != Some(agent.as_str()) {
                    return Ok(false);
                }
            }
            None => {
                if n.claimed_by().is_some() {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn sort_key(n: &Node, actionable: bool, mode: SortMode) -> (i64, i64, String, String) {
    match mode {
        SortMode::Readiness => (
            if actionable { 0 } else { 1 },
            -n.depth,
            n.updated_at.clone(),
            n.id.clone(),
        ),
        SortMode::Depth => (n.depth, 0, n.id.clone(), String::new()),
        SortMode::Recent => (0, 0, reverse_ts(&n.updated_at), n.id.clone()),
        SortMode::Created => (0, 0, n.created_at.clone(), n.id.clone()),
    }
}

/// Lexical reverse of an ISO-8601 timestamp so ascending tuple order yields
/// descending chronological order without a second comparator branch.
fn reverse_ts(ts: &str) -> String {
    ts.chars().map(|c| (255 - c as u8) as char).collect()
}

/// Opaque cursor: the sort key's trailing fields joined by a separator that
/// cannot appear in an id or ISO-8601 timestamp.
fn encode_cursor(key: &(i64, i64, String, String)) -> String {
    format!("{}\u{1f}{}\u{1f}{}\u{1f}{}", key.0, key.1, key.2, key.3)
}

fn decode_cursor(cursor: &str) -> Option<(i64, i64, String, String)> {
    let mut parts = cursor.splitn(4, '\u{1f}');
    Some((
        parts.next()?.parse().ok()?,
        parts.next()?.parse().ok()?,
        parts.next()?.to_string(),
        parts.next()?.to_string(),
    ))
}

pub fn query(
    store: &Store,
    project: &str,
    filter: QueryFilter,
    sort: SortMode,
    cursor: Option<&str>,
    limit: i64,
) -> Result<QueryResult, GraphError> {
    store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, project, parent, summary, resolved, blocked, blocked_reason, \
             discovery, properties, context_links, evidence, plan, depth, rev, created_at, updated_at \
             FROM nodes WHERE project = ?1",
        )?;
        let all: Vec<Node> = stmt
            .query_map([project], node::row_to_node)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut keyed = Vec::new();
        for n in all {
            if !matches(conn, &n, &filter)? {
                continue;
            }
            let actionable = edge::is_actionable(conn, &n.id)?;
            let key = sort_key(&n, actionable, sort);
            keyed.push((key, n));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let start = match cursor.and_then(decode_cursor) {
            Some(after) => keyed.partition_point(|(k, _)| k <= &after),
            None => 0,
        };

        let page: Vec<Node> = keyed[start..]
            .iter()
            .take(limit.max(1) as usize)
            .map(|(_, n)| n.clone())
            .collect();
        let next_cursor = if start + page.len() < keyed.len() {
            keyed
                .get(start + page.len() - 1)
                .map(|(k, _)| encode_cursor(k))
        } else {
            None
        };

        Ok(QueryResult {
            nodes: page,
            next_cursor,
        })
    })
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
    fn text_filter_matches_substring() {
        let store = fresh_store();
        let items = vec![
            PlanNodeInput { node_ref: "root".into(), parent_ref: None, summary: "root".into(), depends_on: vec![], context_links: vec![], properties: None },
            PlanNodeInput { node_ref: "a".into(), parent_ref: Some("root".into()), summary: "fix the parser".into(), depends_on: vec![], context_links: vec![], properties: None },
            PlanNodeInput { node_ref: "b".into(), parent_ref: Some("root".into()), summary: "write docs".into(), depends_on: vec![], context_links: vec![], properties: None },
        ];
        mutation::plan(&store, "demo", items, "agent-a").unwrap();

        let result = query(
            &store,
            "demo",
            QueryFilter { text: Some("parser".into()), ..Default::default() },
            SortMode::Readiness,
            None,
            10,
        )
        .unwrap();
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].summary, "fix the parser");
    }

    #[test]
    fn pagination_returns_cursor_for_more_pages() {
        let store = fresh_store();
        let mut items = vec![PlanNodeInput { node_ref: "root".into(), parent_ref: None, summary: "root".into(), depends_on: vec![], context_links: vec![], properties: None }];
        for i in 0..5 {
            items.push(PlanNodeInput {
                node_ref: format!("n{i}"),
                parent_ref: Some("root".into()),
                summary: format!("task {i}"),
                depends_on: vec![],
                context_links: vec![],
                properties: None,
            });
        }
        mutation::plan(&store, "demo", items, "agent-a").unwrap();

        let page1 = query(&store, "demo", QueryFilter::default(), SortMode::Created, None, 3).unwrap();
        assert_eq!(page1.nodes.len(), 3);
        assert!(page1.next_cursor.is_some());

        let page2 = query(
            &store,
            "demo",
            QueryFilter::default(),
            SortMode::Created,
            page1.next_cursor.as_deref(),
            3,
        )
        .unwrap();
        assert!(page2.nodes.len() >= 1);
        assert_ne!(page1.nodes[0].id, page2.nodes[0].id);
    }
}
