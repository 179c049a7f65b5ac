mod client;

pub use client::{RedisStore, RedisStoreConfig};
