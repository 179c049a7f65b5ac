//! The key-value store the data store is written against.
//!
//! Only the primitives the adapter needs are modelled. Anything else is
//! reached through the concrete backend, e.g. [`RedisStore::pool`].
//!
//! [`RedisStore::pool`]: crate::RedisStore::pool

use async_trait::async_trait;

use crate::error::Result;

mod batch;
pub mod memory;

pub use batch::{Batch, Command};

/// Remote store with string, list and set values plus atomic batches.
///
/// Every call is a blocking round trip. Implementations do not retry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// One entry per requested key, `None` where the key is missing.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Returns the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64>;

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64>;

    /// Appends to the tail and returns the new length.
    async fn rpush(&self, key: &str, value: &[u8]) -> Result<u64>;

    async fn lpop(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn llen(&self, key: &str) -> Result<u64>;

    /// Negative indices count from the tail.
    async fn lindex(&self, key: &str, index: i64) -> Result<Option<Vec<u8>>>;

    /// Inclusive range, negative indices count from the tail.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>>;

    /// `count > 0` removes from the head, `count < 0` from the tail and
    /// `count == 0` removes every match.
    async fn lrem(&self, key: &str, count: i64, value: &[u8]) -> Result<u64>;

    /// Returns `true` when the member was not already present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    /// Returns `true` when the member was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    /// Every key in the keyspace, without any connection namespace.
    ///
    /// This walks the whole keyspace and is meant for administration only.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Runs the batch without interleaving commands from other clients.
    async fn exec(&self, batch: Batch) -> Result<()>;

    /// Human readable description of the connection, for diagnostics.
    fn identifier(&self) -> String;

    /// Drops the current connection(s) and connects again.
    async fn reconnect(&self) -> Result<()>;
}
