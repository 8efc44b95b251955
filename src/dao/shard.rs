//! Deterministic partitioning of tournament documents across storage shards.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Index of one tournament storage partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps tournament identifiers onto a fixed number of shards.
#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    shard_count: u32,
}

impl ShardRouter {
    /// Build a router over `shard_count` partitions (at least one).
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count: shard_count.max(1),
        }
    }

    /// Number of partitions handled by this router.
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Shard for `key`, or a uniformly random shard when no (or an empty) key is given.
    pub fn shard_for(&self, key: Option<&str>) -> ShardId {
        match key {
            Some(key) if !key.is_empty() => {
                ShardId(hash_code(key).unsigned_abs() % self.shard_count)
            }
            _ => ShardId(rand::rng().random_range(0..self.shard_count)),
        }
    }

    /// Shard holding the tournament with the given identifier.
    pub fn shard_for_tournament(&self, id: Uuid) -> ShardId {
        self.shard_for(Some(&id.to_string()))
    }

    /// Iterate every shard in ascending order.
    pub fn shards(&self) -> impl Iterator<Item = ShardId> + use<> {
        (0..self.shard_count).map(ShardId)
    }
}

/// Signed 32-bit rolling hash (`hash * 31 + code unit`) over the UTF-16 code units of `key`.
///
/// Kept bit-compatible with the hash used by existing clients so shard indexes can be
/// recomputed anywhere from the tournament id alone.
pub fn hash_code(key: &str) -> i32 {
    key.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_mul(31).wrapping_add(i32::from(unit))
    })
}
