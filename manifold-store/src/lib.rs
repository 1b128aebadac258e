//! # manifold-store — typed persistence for the Manifold engine
//!
//! The [`StorageGateway`] trait is the single seam between the engine and
//! its durable state. Two backends ship in-tree:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MemoryStore`] | DashMap-backed, for tests and single-process runs |
//! | [`PgStore`] | PostgreSQL via an `sqlx` pool, JSON-typed columns |
//!
//! Conditional writes (join transitions, token CAS) are atomic per key in
//! both backends: the memory store serializes through per-key entry locks,
//! the Postgres store through guarded `UPDATE ... WHERE` statements.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod pg;

pub use error::StoreError;
pub use gateway::StorageGateway;
pub use memory::MemoryStore;
pub use pg::PgStore;

/// Shorthand for gateway results.
pub type StoreResult<T> = Result<T, StoreError>;
