pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{QueueEntryEntity, ResultEntity, TournamentEntity, TournamentStatus},
    shard::ShardId,
    storage::StorageResult,
    transaction::{Changeset, Versioned, WriteOp},
};

pub use memory::MemoryTournamentStore;

/// Abstraction over the document store holding queues, tournaments, results and bots.
///
/// Reads are snapshot reads returning the document revision; [`TournamentStore::commit`]
/// is the only place where mutual exclusion happens.
pub trait TournamentStore: Send + Sync {
    /// `waiting` entries for `game_type`, oldest first, at most `limit` of them.
    fn waiting_entries(
        &self,
        game_type: &str,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<QueueEntryEntity>>>>;
    fn find_tournament(
        &self,
        shard: ShardId,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<TournamentEntity>>>>;
    /// First `waiting` or `active` tournament of `shard` whose roster lists `user_id`.
    fn find_user_tournament(
        &self,
        shard: ShardId,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<TournamentEntity>>>>;
    fn list_tournaments(
        &self,
        shard: ShardId,
        status: TournamentStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<TournamentEntity>>>;
    /// Every result of a tournament, ordered by user id.
    fn list_results(
        &self,
        shard: ShardId,
        tournament_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ResultEntity>>>;
    /// Verify every guard and apply every write atomically, or fail with a conflict.
    fn commit(&self, changeset: Changeset) -> BoxFuture<'static, StorageResult<()>>;
    /// Apply writes without any read verification.
    fn batch_write(&self, writes: Vec<WriteOp>) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
