//! In-memory TTL cache for API responses and other derived values.

pub mod entry;
pub mod eviction;
pub mod store;
