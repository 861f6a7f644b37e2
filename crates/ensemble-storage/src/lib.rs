// Postgres storage layer with sqlx
//
// This crate provides database implementations for core traits:
// - DbContextStore: sessions + ordered message history
// - DbMemoryStore: per-agent, per-user memory blobs
// - DbVectorMemoryStore: embedded entries with (agent_name, content_hash) dedup
// - DbInterruptStore: interrupt records with a race-safe pending guard
// - DbEventSink: append-only trace event rows

pub mod context_store;
pub mod event_sink;
pub mod interrupt_store;
pub mod memory_store;
pub mod models;
pub mod repositories;
pub mod vector_store;

pub use context_store::DbContextStore;
pub use event_sink::DbEventSink;
pub use interrupt_store::DbInterruptStore;
pub use memory_store::DbMemoryStore;
pub use models::*;
pub use repositories::Database;
pub use vector_store::DbVectorMemoryStore;
