//! Knowledge store and retro — §4.8. Project-scoped documents with
//! similarity detection on write, plus structured retrospectives stored as
//! knowledge entries.

use crate::core::error::GraphError;
use crate::core::store::Store;
use crate::core::time::{new_knowledge_id, now_iso};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

const CATEGORIES: &[&str] = &[
    "general",
    "architecture",
    "convention",
    "decision",
    "environment",
    "api-contract",
    "discovery",
];

const SIMILARITY_THRESHOLD: f64 = 0.6;
const CONTENT_WARN_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub project: String,
    pub key: String,
    pub content: String,
    pub category: String,
    pub source_node: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<KnowledgeEntry> {
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        project: row.get(1)?,
        key: row.get(2)?,
        content: row.get(3)?,
        category: row.get(4)?,
        source_node: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const SELECT_ENTRY: &str =
    "SELECT id, project, key, content, category, source_node, created_by, created_at, updated_at FROM knowledge";

fn validate_category(category: &str) -> Result<(), GraphError> {
    if CATEGORIES.contains(&category) {
        Ok(())
    } else {
        Err(GraphError::InvalidCategory(format!(
            "'{category}' is not one of {CATEGORIES:?}"
        )))
    }
}

/// Trigram Jaccard similarity, in [0, 1]. A cheap, dependency-free stand-in
/// for full Jaro-Winkler, adequate for flagging near-duplicate notes.
fn similarity(a: &str, b: &str) -> f64 {
    fn trigrams(s: &str) -> rustc_hash::FxHashSet<String> {
        let chars: Vec<char> = s.to_lowercase().chars().collect();
        if chars.len() < 3 {
            return [s.to_lowercase()].into_iter().collect();
        }
        chars
            .windows(3)
            .map(|w| w.iter().collect::<String>())
            .collect()
    }
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

fn log(conn: &Connection, project: &str, key: &str, action: &str, agent: &str) -> Result<(), GraphError> {
    conn.execute(
        "INSERT INTO knowledge_log (id, project, key, action, agent, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![new_knowledge_id(), project, key, action, agent, now_iso()],
    )?;
    Ok(())
}

fn active_claim(conn: &Connection, project: &str, agent: &str) -> Result<Option<String>, GraphError> {
    conn.query_row(
        "SELECT id FROM nodes WHERE project = ?1 AND resolved = 0 \
         AND json_extract(properties, '$._claimed_by') = ?2 \
         ORDER BY json_extract(properties, '$._claimed_at') DESC LIMIT 1",
        rusqlite::params![project, agent],
        |r| r.get(0),
    )
    .optional()
    .map_err(GraphError::from)
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteResult {
    pub entry: KnowledgeEntry,
    pub similar_keys: Vec<String>,
    pub warning: Option<String>,
}

pub fn write(
    store: &Store,
    project: &str,
    key: &str,
    content: &str,
    category: &str,
    source_node: Option<String>,
    agent: &str,
) -> Result<WriteResult, GraphError> {
    validate_category(category)?;
    if key.trim().is_empty() {
        return Err(GraphError::Validation("key is required".to_string()));
    }

    store.with_transaction(|conn| {
        let existing: Option<KnowledgeEntry> = {
            let sql = format!("{SELECT_ENTRY} WHERE project = ?1 AND key = ?2");
            conn.query_row(&sql, rusqlite::params![project, key], row_to_entry)
                .optional()?
        };

        let now = now_iso();
        let created_by = existing
            .as_ref()
            .map(|e| e.created_by.clone())
            .unwrap_or_else(|| agent.to_string());
        let source = source_node.or_else(|| active_claim(conn, project, agent).ok().flatten());

        let entry = if let Some(existing) = &existing {
            conn.execute(
                "UPDATE knowledge SET content = ?1, category = ?2, source_node = ?3, updated_at = ?4 \
                 WHERE project = ?5 AND key = ?6",
                rusqlite::params![content, category, source, now, project, key],
            )?;
            KnowledgeEntry {
                updated_at: now,
                content: content.to_string(),
                category: category.to_string(),
                source_node: source,
                ..existing.clone()
            }
        } else {
            let id = new_knowledge_id();
            conn.execute(
                "INSERT INTO knowledge (id, project, key, content, category, source_node, created_by, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![id, project, key, content, category, source, created_by, now],
            )?;
            KnowledgeEntry {
                id,
                project: project.to_string(),
                key: key.to_string(),
                content: content.to_string(),
                category: category.to_string(),
                source_node: source,
                created_by,
                created_at: now.clone(),
                updated_at: now,
            }
        };

        log(conn, project, key, "write", agent)?;

        let mut similar_keys = Vec::new();
        let sql = format!("{SELECT_ENTRY} WHERE project = ?1 AND key != ?2");
        let mut stmt = conn.prepare(&sql)?;
        let others: Vec<KnowledgeEntry> = stmt
            .query_map(rusqlite::params![project, key], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        for other in &others {
            let mut score = similarity(content, &other.content);
            if other.category == category {
                score += 0.05;
            }
            if score >= SIMILARITY_THRESHOLD {
                similar_keys.push(other.key.clone());
            }
        }

        let warning = if content.len() > CONTENT_WARN_BYTES {
            Some(format!(
                "content is {} bytes, above the ~{}KB guideline",
                content.len(),
                CONTENT_WARN_BYTES / 1024
            ))
        } else {
            None
        };

        Ok(WriteResult {
            entry,
            similar_keys,
            warning,
        })
    })
}

pub fn read(store: &Store, project: &str, key: &str) -> Result<Option<KnowledgeEntry>, GraphError> {
    store.with_conn(|conn| {
        let sql = format!("{SELECT_ENTRY} WHERE project = ?1 AND key = ?2");
        conn.query_row(&sql, rusqlite::params![project, key], row_to_entry)
            .optional()
            .map_err(GraphError::from)
    })
}

pub fn delete(store: &Store, project: &str, key: &str, agent: &str) -> Result<(), GraphError> {
    store.with_transaction(|conn| {
        let changed = conn.execute(
            "DELETE FROM knowledge WHERE project = ?1 AND key = ?2",
            rusqlite::params![project, key],
        )?;
        if changed == 0 {
            return Err(GraphError::NotFound(format!(
                "knowledge entry '{key}' not found in project {project}"
            )));
        }
        log(conn, project, key, "delete", agent)?;
        Ok(())
    })
}

pub fn search(
    store: &Store,
    project: &str,
    text: &str,
    category: Option<&str>,
) -> Result<Vec<KnowledgeEntry>, GraphError> {
    store.with_conn(|conn| {
        let sql = format!("{SELECT_ENTRY} WHERE project = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let all: Vec<KnowledgeEntry> = stmt
            .query_map(rusqlite::params![project], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        let text_lower = text.to_lowercase();
        Ok(all
            .into_iter()
            .filter(|e| category.map(|c| c == e.category).unwrap_or(true))
            .filter(|e| {
                text.is_empty()
                    || e.key.to_lowercase().contains(&text_lower)
                    || e.content.to_lowercase().contains(&text_lower)
            })
            .collect())
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: String,
    pub project: String,
    pub key: String,
    pub action: String,
    pub agent: String,
    pub timestamp: String,
}

pub fn audit(store: &Store, project: &str, limit: i64) -> Result<Vec<LogEntry>, GraphError> {
    store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, project, key, action, agent, timestamp FROM knowledge_log \
             WHERE project = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![project, limit], |r| {
            Ok(LogEntry {
                id: r.get(0)?,
                project: r.get(1)?,
                key: r.get(2)?,
                action: r.get(3)?,
                agent: r.get(4)?,
                timestamp: r.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(GraphError::from)
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetroFinding {
    pub category: String,
    pub detail: String,
}

const FINDING_CATEGORIES: &[&str] = &[
    "claude_md_candidate",
    "knowledge_gap",
    "workflow_improvement",
    "bug_or_debt",
    "knowledge_drift",
];

#[derive(Debug, Clone, Serialize)]
pub struct RetroContext {
    pub resolved_since_last: Vec<crate::graph::node::Node>,
    pub knowledge_entries: Vec<KnowledgeEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetroRecorded {
    pub entry: KnowledgeEntry,
    pub claude_md_candidates: Vec<String>,
}

pub enum RetroOutcome {
    Context(RetroContext),
    Recorded(RetroRecorded),
}

fn last_retro_timestamp(conn: &Connection, project: &str) -> Result<Option<String>, GraphError> {
    conn.query_row(
        "SELECT MAX(updated_at) FROM knowledge WHERE project = ?1 AND key LIKE 'retro-%'",
        [project],
        |r| r.get(0),
    )
    .map_err(GraphError::from)
}

pub fn retro(
    store: &Store,
    project: &str,
    scope: Option<&str>,
    findings: Option<Vec<RetroFinding>>,
    agent: &str,
) -> Result<RetroOutcome, GraphError> {
    for f in findings.iter().flatten() {
        if !FINDING_CATEGORIES.contains(&f.category.as_str()) {
            return Err(GraphError::InvalidCategory(format!(
                "'{}' is not one of {FINDING_CATEGORIES:?}",
                f.category
            )));
        }
    }

    match findings {
        None => store.with_conn(|conn| {
            let last_ts = last_retro_timestamp(conn, project)?;
            let scope_root = match scope {
                Some(s) => s.to_string(),
                None => crate::graph::node::project_root(conn, project)?
                    .ok_or_else(|| GraphError::ProjectNotFound(project.to_string()))?
                    .id,
            };
            let mut candidates = vec![crate::graph::node::get_or_throw(conn, &scope_root)?];
            candidates.extend(crate::graph::node::descendants_of(conn, &scope_root)?);
            let resolved_since_last: Vec<_> = candidates
                .into_iter()
                .filter(|n| n.resolved)
                .filter(|n| match &last_ts {
                    Some(ts) => &n.updated_at > ts,
                    None => true,
                })
                .collect();

            let sql = format!("{SELECT_ENTRY} WHERE project = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let knowledge_entries: Vec<KnowledgeEntry> = stmt
                .query_map(rusqlite::params![project], row_to_entry)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(RetroOutcome::Context(RetroContext {
                resolved_since_last,
                knowledge_entries,
            }))
        }),
        Some(findings) => store.with_transaction(|conn| {
            let now = now_iso();
            let key = format!("retro-{now}");
            let mut summary = String::new();
            let mut candidates = Vec::new();
            for f in &findings {
                summary.push_str(&format!("[{}] {}\n", f.category, f.detail));
                if f.category == "claude_md_candidate" {
                    candidates.push(f.detail.clone());
                }
            }

            let id = new_knowledge_id();
            conn.execute(
                "INSERT INTO knowledge (id, project, key, content, category, source_node, created_by, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 'discovery', NULL, ?5, ?6, ?6)",
                rusqlite::params![id, project, key, summary, agent, now],
            )?;
            log(conn, project, &key, "write", agent)?;

            let entry = KnowledgeEntry {
                id,
                project: project.to_string(),
                key,
                content: summary,
                category: "discovery".to_string(),
                source_node: None,
                created_by: agent.to_string(),
                created_at: now.clone(),
                updated_at: now,
            };

            Ok(RetroOutcome::Recorded(RetroRecorded {
                entry,
                claude_md_candidates: candidates,
            }))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fresh_store() -> Store {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let store = Store::open(&path).unwrap();
        std::mem::forget(dir);
        store
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = fresh_store();
        let result = write(
            &store,
            "demo",
            "convention-naming",
            "use snake_case for module names",
            "convention",
            None,
            "agent-a",
        )
        .unwrap();
        assert_eq!(result.entry.created_by, "agent-a");

        let read_back = read(&store, "demo", "convention-naming").unwrap().unwrap();
        assert_eq!(read_back.content, "use snake_case for module names");
    }

    #[test]
    fn invalid_category_rejected() {
        let store = fresh_store();
        let err = write(&store, "demo", "k", "c", "nonsense", None, "agent-a").unwrap_err();
        assert_eq!(err.code(), "invalid_category");
    }

    #[test]
    fn update_preserves_original_author() {
        let store = fresh_store();
        write(&store, "demo", "k", "v1", "general", None, "agent-a").unwrap();
        let updated = write(&store, "demo", "k", "v2", "general", None, "agent-b").unwrap();
        assert_eq!(updated.entry.created_by, "agent-a");
        assert_eq!(updated.entry.content, "v2");
    }

    #[test]
    fn similar_entries_are_surfaced() {
        let store = fresh_store();
        write(
            &store,
            "demo",
            "a",
            "the scheduler ranks actionable nodes by priority",
            "architecture",
            None,
            "agent-a",
        )
        .unwrap();
        let result = write(
            &store,
            "demo",
            "b",
            "the scheduler ranks actionable nodes by priority score",
            "architecture",
            None,
            "agent-a",
        )
        .unwrap();
        assert!(result.similar_keys.contains(&"a".to_string()));
    }

    #[test]
    fn retro_without_findings_returns_context() {
        let store = fresh_store();
        crate::engine::mutation::plan(
            &store,
            "demo",
            vec![crate::engine::mutation::PlanNodeInput {
                node_ref: "root".into(),
                parent_ref: None,
                summary: "root".into(),
                depends_on: vec![],
                context_links: vec![],
                properties: None,
            }],
            "agent-a",
        )
        .unwrap();
        let outcome = retro(&store, "demo", None, None, "agent-a").unwrap();
        assert!(matches!(outcome, RetroOutcome::Context(_)));
    }

    #[test]
    fn retro_with_findings_persists_entry() {
        let store = fresh_store();
        crate::engine::mutation::plan(
            &store,
            "demo",
            vec![crate::engine::mutation::PlanNodeInput {
                node_ref: "root".into(),
                parent_ref: None,
                summary: "root".into(),
                depends_on: vec![],
                context_links: vec![],
                properties: None,
            }],
            "agent-a",
        )
        .unwrap();
        let outcome = retro(
            &store,
            "demo",
            None,
            Some(vec![RetroFinding {
                category: "workflow_improvement".into(),
                detail: "batch more updates".into(),
            }]),
            "agent-a",
        )
        .unwrap();
        match outcome {
            RetroOutcome::Recorded(r) => assert!(r.entry.key.starts_with("retro-")),
            _ => panic!("expected Recorded"),
        }
    }
}
