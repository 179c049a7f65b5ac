use async_trait::async_trait;
use deadpool_redis::{
    Config, Connection, Pool, Runtime,
    redis::{self, ConnectionAddr, IntoConnectionInfo},
};
use std::sync::{PoisonError, RwLock};
use tracing::warn;

use crate::error::Result;
use crate::store::{Batch, Command, KeyValueStore};

#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub url: String,
    /// Prefix applied to every key as `<namespace>:<key>`.
    pub namespace: Option<String>,
}

impl RedisStoreConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            namespace: None,
        }
    }

    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }
}

/// [`KeyValueStore`] backed by a pooled Redis connection.
pub struct RedisStore {
    config: RedisStoreConfig,
    address: String,
    redis_pool: RwLock<Pool>,
}

impl RedisStore {
    /// Builds the pool. No connection is opened until the first command.
    pub fn new(config: RedisStoreConfig) -> Result<Self> {
        let address = describe_address(&config.url)?;
        let redis_pool = create_pool(&config.url)?;

        Ok(Self {
            config,
            address,
            redis_pool: RwLock::new(redis_pool),
        })
    }

    /// The raw pool, for commands this crate does not model.
    ///
    /// Keys used through the pool are not namespaced.
    pub fn pool(&self) -> Pool {
        self.redis_pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn connection(&self) -> Result<Connection> {
        Ok(self.pool().get().await?)
    }

    fn key(&self, key: &str) -> String {
        match &self.config.namespace {
            Some(namespace) => format!("{}:{}", namespace, key),
            None => key.to_string(),
        }
    }

    /// `KEYS` pattern matching every key in the namespace.
    fn keys_pattern(&self) -> String {
        match &self.config.namespace {
            Some(namespace) => format!("{}:*", escape_glob(namespace)),
            None => "*".to_string(),
        }
    }

    fn strip_namespace(&self, key: String) -> String {
        match &self.config.namespace {
            Some(namespace) => key
                .strip_prefix(namespace.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .map(str::to_string)
                .unwrap_or(key),
            None => key,
        }
    }

    pub(crate) fn to_pipeline(&self, batch: Batch) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for command in batch.into_commands() {
            match command {
                Command::Set { key, value } => pipe.cmd("SET").arg(self.key(&key)).arg(value),
                Command::Del { key } => pipe.cmd("DEL").arg(self.key(&key)),
                Command::IncrBy { key, by } => pipe.cmd("INCRBY").arg(self.key(&key)).arg(by),
                Command::RPush { key, value } => pipe.cmd("RPUSH").arg(self.key(&key)).arg(value),
                Command::LRem { key, count, value } => pipe
                    .cmd("LREM")
                    .arg(self.key(&key))
                    .arg(count)
                    .arg(value),
                Command::SAdd { key, member } => pipe.cmd("SADD").arg(self.key(&key)).arg(member),
                Command::SRem { key, member } => pipe.cmd("SREM").arg(self.key(&key)).arg(member),
            }
            .ignore();
        }

        pipe
    }
}

fn create_pool(redis_url: &str) -> Result<Pool> {
    let redis_config = Config::from_url(redis_url);
    Ok(redis_config.create_pool(Some(Runtime::Tokio1))?)
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn describe_address(redis_url: &str) -> Result<String> {
    let info = redis_url.into_connection_info()?;
    let address = match &info.addr {
        ConnectionAddr::Tcp(..) | ConnectionAddr::TcpTls { .. } => {
            format!("redis://{}", info.addr)
        }
        socket => format!("unix://{}", socket),
    };
    Ok(format!("{}/{}", address, info.redis.db))
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;

        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(self.key(key));
        }
        let values: Vec<Option<Vec<u8>>> = cmd.query_async(&mut conn).await?;

        Ok(values)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.connection().await?;

        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection().await?;

        let removed: u64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;

        Ok(removed)
    }

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64> {
        let mut conn = self.connection().await?;

        let value: i64 = redis::cmd("INCRBY")
            .arg(self.key(key))
            .arg(by)
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    async fn rpush(&self, key: &str, value: &[u8]) -> Result<u64> {
        let mut conn = self.connection().await?;

        let len: u64 = redis::cmd("RPUSH")
            .arg(self.key(key))
            .arg(value)
            .query_async(&mut conn)
            .await?;

        Ok(len)
    }

    async fn lpop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;

        let value: Option<Vec<u8>> = redis::cmd("LPOP")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection().await?;

        let len: u64 = redis::cmd("LLEN")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;

        Ok(len)
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;

        let value: Option<Vec<u8>> = redis::cmd("LINDEX")
            .arg(self.key(key))
            .arg(index)
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.connection().await?;

        let values: Vec<Vec<u8>> = redis::cmd("LRANGE")
            .arg(self.key(key))
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;

        Ok(values)
    }

    async fn lrem(&self, key: &str, count: i64, value: &[u8]) -> Result<u64> {
        let mut conn = self.connection().await?;

        let removed: u64 = redis::cmd("LREM")
            .arg(self.key(key))
            .arg(count)
            .arg(value)
            .query_async(&mut conn)
            .await?;

        Ok(removed)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection().await?;

        let added: bool = redis::cmd("SADD")
            .arg(self.key(key))
            .arg(member)
            .query_async(&mut conn)
            .await?;

        Ok(added)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection().await?;

        let removed: bool = redis::cmd("SREM")
            .arg(self.key(key))
            .arg(member)
            .query_async(&mut conn)
            .await?;

        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;

        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;

        Ok(members)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection().await?;

        let exists: bool = redis::cmd("SISMEMBER")
            .arg(self.key(key))
            .arg(member)
            .query_async(&mut conn)
            .await?;

        Ok(exists)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(self.keys_pattern())
            .query_async(&mut conn)
            .await?;

        Ok(keys
            .into_iter()
            .map(|key| self.strip_namespace(key))
            .collect())
    }

    async fn exec(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        let _: () = self.to_pipeline(batch).query_async(&mut conn).await?;

        Ok(())
    }

    fn identifier(&self) -> String {
        match &self.config.namespace {
            Some(namespace) => format!("{} ({})", self.address, namespace),
            None => self.address.clone(),
        }
    }

    async fn reconnect(&self) -> Result<()> {
        warn!("Reconnecting to {}", self.address);

        let fresh_pool = create_pool(&self.config.url)?;
        let stale_pool = {
            let mut current = self
                .redis_pool
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, fresh_pool)
        };
        stale_pool.close();

        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(())
    }
}
