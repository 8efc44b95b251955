/// Database model definitions.
pub mod models;
/// Deterministic mapping from tournament identifiers to storage partitions.
pub mod shard;
/// Storage abstraction layer for database operations.
pub mod storage;
/// Store backends for queues, tournaments, results and bots.
pub mod tournament_store;
/// Optimistic read-verify-write transactions.
pub mod transaction;
