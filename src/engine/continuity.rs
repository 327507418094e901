//! Continuity confidence and integrity audit — §4.7.

use crate::core::error::GraphError;
use crate::core::store::Store;
use crate::core::time::seconds_since;
use crate::graph::node::{self, Node};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContinuityReport {
    pub score: i64,
    pub confidence: Confidence,
}

fn has_strong_evidence(n: &Node) -> bool {
    n.evidence.iter().any(|e| e.kind == "git" || e.kind == "test")
}

pub fn continuity(store: &Store, project: &str) -> Result<ContinuityReport, GraphError> {
    store.with_conn(|conn| {
        let mut score: i64 = 100;

        let root = node::project_root(conn, project)?
            .ok_or_else(|| GraphError::ProjectNotFound(project.to_string()))?;

        let resolved_non_root: Vec<Node> = node::descendants_of(conn, &root.id)?
            .into_iter()
            .filter(|n| n.resolved)
            .collect();
        if !resolved_non_root.is_empty() {
            let with_evidence = resolved_non_root
                .iter()
                .filter(|n| !n.evidence.is_empty())
                .count();
            let coverage = with_evidence as f64 / resolved_non_root.len() as f64;
            if coverage < 0.5 {
                score -= 40;
            } else if coverage < 0.8 {
                score -= 20;
            }
        }

        let all: Vec<Node> = {
            let mut v = vec![root.clone()];
            v.extend(node::descendants_of(conn, &root.id)?);
            v
        };
        let most_recent_update = all.iter().map(|n| n.updated_at.clone()).max();
        if let Some(ts) = most_recent_update {
            if let Some(secs) = seconds_since(&ts) {
                let days = secs / 86_400;
                if days >= 14 {
                    score -= 25;
                } else if days >= 7 {
                    score -= 15;
                }
            }
        }

        let resolved_count = resolved_non_root.len();
        let knowledge_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM knowledge WHERE project = ?1",
            [project],
            |r| r.get(0),
        )?;
        if resolved_count >= 5 && knowledge_count == 0 {
            score -= 15;
        }

        let stale_blocked = all
            .iter()
            .filter(|n| n.blocked)
            .filter(|n| seconds_since(&n.updated_at).map(|s| s / 86_400 > 7).unwrap_or(false))
            .count();
        if stale_blocked > 0 {
            score -= 10;
        }

        score = score.max(0);
        let confidence = if score >= 80 {
            Confidence::High
        } else if score >= 50 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Ok(ContinuityReport { score, confidence })
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum Issue {
    WeakEvidence { node_id: String, hint: String },
    StaleClaim { node_id: String, hint: String },
    Orphan { node_id: String, hint: String },
    StaleTask { node_id: String, hint: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub issues: Vec<Issue>,
    pub quality_kpi: f64,
}

pub fn integrity(store: &Store, project: &str) -> Result<IntegrityReport, GraphError> {
    store.with_conn(|conn| {
        let root = node::project_root(conn, project)?
            .ok_or_else(|| GraphError::ProjectNotFound(project.to_string()))?;
        let all: Vec<Node> = {
            let mut v = vec![root.clone()];
            v.extend(node::descendants_of(conn, &root.id)?);
            v
        };

        let mut issues = Vec::new();
        let mut resolved_non_root = 0usize;
        let mut quality_hits = 0usize;

        for n in &all {
            let is_root = n.id == root.id;

            if n.resolved && !is_root {
                resolved_non_root += 1;
                let auto_resolved = n
                    .evidence
                    .iter()
                    .any(|e| e.reference.starts_with("auto-resolved"));
                let strong = has_strong_evidence(n);
                if !auto_resolved {
                    if strong && !n.context_links.is_empty() {
                        quality_hits += 1;
                    }
                    let only_note = n.evidence.iter().all(|e| e.kind == "note");
                    if only_note && n.context_links.is_empty() {
                        issues.push(Issue::WeakEvidence {
                            node_id: n.id.clone(),
                            hint: "attach a git/test evidence record or a context link".to_string(),
                        });
                    }
                }
            }

            if !n.resolved {
                if let Some(claimed_at) = n.claimed_at() {
                    if seconds_since(claimed_at).map(|s| s / 3600 > 24).unwrap_or(false) {
                        issues.push(Issue::StaleClaim {
                            node_id: n.id.clone(),
                            hint: "release or renew the claim".to_string(),
                        });
                    }
                }

                if n.claimed_by().is_none()
                    && seconds_since(&n.updated_at).map(|s| s / 86_400 > 7).unwrap_or(false)
                {
                    issues.push(Issue::StaleTask {
                        node_id: n.id.clone(),
                        hint: "re-prioritise or drop this task".to_string(),
                    });
                }

                if let Some(parent_id) = &n.parent {
                    if let Some(parent) = node::get(conn, parent_id)? {
                        if parent.resolved {
                            issues.push(Issue::Orphan {
                                node_id: n.id.clone(),
                                hint: "reopen the parent or resolve this child".to_string(),
                            });
                        }
                    }
                }
            }
        }

        let quality_kpi = if resolved_non_root == 0 {
            0.0
        } else {
            quality_hits as f64 / resolved_non_root as f64 * 100.0
        };

        Ok(IntegrityReport { issues, quality_kpi })
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
    fn empty_project_is_high_confidence() {
        let store = fresh_store();
        mutation::plan(
            &store,
            "demo",
            vec![PlanNodeInput {
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
        let report = continuity(&store, "demo").unwrap();
        assert_eq!(report.confidence, Confidence::High);
    }

    #[test]
    fn weak_evidence_flagged() {
        let store = fresh_store();
        let result = mutation::plan(
            &store,
            "demo",
            vec![
                PlanNodeInput { node_ref: "root".into(), parent_ref: None, summary: "root".into(), depends_on: vec![], context_links: vec![], properties: None },
                PlanNodeInput { node_ref: "a".into(), parent_ref: Some("root".into()), summary: "a".into(), depends_on: vec![], context_links: vec![], properties: None },
            ],
            "agent-a",
        )
        .unwrap();
        let a_id = result.ref_to_id["a"].clone();
        mutation::update(
            &store,
            vec![mutation::UpdateInput {
                node_id: a_id,
                summary: None,
                properties: None,
                add_context_links: vec![],
                add_evidence: vec![],
                plan: None,
                resolved: Some(true),
                resolved_reason: Some("eyeballed it".into()),
                blocked: None,
                blocked_reason: None,
                expected_rev: None,
            }],
            "agent-a",
        )
        .unwrap();

        let report = integrity(&store, "demo").unwrap();
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, Issue::WeakEvidence { .. })));
    }
}
