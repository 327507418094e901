//! taskgraph: a persistent task graph for coordinating AI coding agents.
//!
//! Agents talk to one process over line-delimited JSON-RPC on stdio. The
//! process holds one SQLite database and serializes every mutation through
//! a single connection (`core::store::Store`).
//!
//! # Crate structure
//!
//! - [`core`]: connection, schema, migration, config, error, time primitives
//! - [`graph`]: the node/edge/event repository
//! - [`engine`]: the batched mutation protocol, scheduler, query, continuity,
//!   knowledge store
//! - [`rpc`]: the JSON-RPC envelope, tool catalog, and dispatch

pub mod cli;
pub mod core;
pub mod engine;
pub mod graph;
pub mod rpc;
