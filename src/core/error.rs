//! Error types for graph engine operations.
//!
//! All subsystems return `Result<T, GraphError>`. Each variant maps 1:1 onto
//! one of the RPC error codes in the external interface.

use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("duplicate edge: {0}")]
    DuplicateEdge(String),

    #[error("cross-project edge: {0}")]
    CrossProjectEdge(String),

    #[error("discovery pending: {0}")]
    DiscoveryPending(String),

    #[error("resolve requires evidence: {0}")]
    ResolveRequiresEvidence(String),

    #[error("blocked requires reason: {0}")]
    BlockedRequiresReason(String),

    #[error("rev mismatch: {0}")]
    RevMismatch(String),

    #[error("free tier limit: {0}")]
    FreeTierLimit(String),

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("engine error: {0}")]
    Engine(String),
}

impl GraphError {
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::Store(_) => "engine_error",
            GraphError::Io(_) => "engine_error",
            GraphError::Validation(_) => "validation_error",
            GraphError::NotFound(_) => "not_found",
            GraphError::ProjectNotFound(_) => "project_not_found",
            GraphError::CycleDetected(_) => "cycle_detected",
            GraphError::DuplicateEdge(_) => "duplicate_edge",
            GraphError::CrossProjectEdge(_) => "cross_project_edge",
            GraphError::DiscoveryPending(_) => "discovery_pending",
            GraphError::ResolveRequiresEvidence(_) => "resolve_requires_evidence",
            GraphError::BlockedRequiresReason(_) => "blocked_requires_reason",
            GraphError::RevMismatch(_) => "rev_mismatch",
            GraphError::FreeTierLimit(_) => "free_tier_limit",
            GraphError::InvalidCategory(_) => "invalid_category",
            GraphError::Engine(_) => "engine_error",
        }
    }
}
