//! Persistence layer for a Redis-backed job queue.
//!
//! [`DataStore`] maps named queues, worker bookkeeping and failure records
//! onto a [`KeyValueStore`]. Two backends are provided: [`RedisStore`] for
//! real deployments and [`MemoryStore`] for tests and embedding.

pub mod data_store;
pub mod error;
pub mod keys;
pub mod redis;
pub mod store;

pub use data_store::{DataStore, Peek, START_TIME_FORMAT};
pub use error::{Result, StoreError};
pub use redis::{RedisStore, RedisStoreConfig};
pub use store::memory::MemoryStore;
pub use store::{Batch, Command, KeyValueStore};
