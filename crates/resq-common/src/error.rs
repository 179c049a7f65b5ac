use deadpool_redis::{CreatePoolError, PoolError, redis::RedisError};
use thiserror::Error;

/// Failures surfaced by a [`KeyValueStore`](crate::KeyValueStore).
///
/// Backend errors are passed through untouched. Missing keys, empty queues
/// and unknown workers are never errors; they come back as `None` or empty
/// collections.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Redis(#[from] RedisError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    CreatePool(#[from] CreatePoolError),

    #[error("WRONGTYPE Operation against key '{key}' holding the wrong kind of value")]
    WrongType { key: String },

    #[error("ERR value at key '{key}' is not an integer or out of range")]
    NotAnInteger { key: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
