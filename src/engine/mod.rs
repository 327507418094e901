//! Higher-level engine: batched mutation, scheduling, querying, continuity
//! analytics, and the knowledge store. Everything here is stateless — state
//! lives in `core::store::Store` and the `graph` repositories.

pub mod continuity;
pub mod knowledge;
pub mod mutation;
pub mod query;
pub mod scheduler;
