//! `store` crate — Postgres persistence layer.
//!
//! Implements the engine's `WorkflowStore` trait over a connection pool.
//! No business logic lives here; the engine crate owns all semantics.

pub mod pool;
pub mod postgres;

pub use pool::DbPool;
pub use postgres::PgStore;
