//! Translation of queues, workers and failures onto key-value primitives.
//!
//! Every multi-step mutation is submitted as a single [`Batch`], so other
//! clients never observe half of it. Reads are not linked to later writes:
//! a caller that needs check-then-act has to build its own batch.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::keys;
use crate::store::{Batch, KeyValueStore};

/// Format of `worker:<id>:started`.
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Result of [`DataStore::peek_in_queue`].
///
/// A count of exactly one yields a single element, any other count a list.
/// Prefer [`DataStore::peek_one`] and [`DataStore::peek_range`] in new code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peek {
    One(Option<Vec<u8>>),
    Many(Vec<Vec<u8>>),
}

#[derive(Debug, Clone)]
pub struct DataStore<S> {
    store: S,
}

impl<S: KeyValueStore> DataStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store, for commands not modelled here.
    pub fn raw(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn identifier(&self) -> String {
        self.store.identifier()
    }

    /// Lists every key in the store. Walks the whole keyspace, so keep it out
    /// of request paths.
    pub async fn all_known_keys(&self) -> Result<Vec<String>> {
        self.store.keys().await
    }

    pub async fn reconnect(&self) -> Result<()> {
        self.store.reconnect().await
    }

    // Queues

    /// Registers the queue and appends the item in one batch.
    pub async fn push_to_queue(&self, queue: &str, encoded_item: impl Into<Vec<u8>>) -> Result<()> {
        let mut batch = Batch::new();
        batch
            .sadd(keys::QUEUES, queue)
            .rpush(keys::get_queue_key(queue), encoded_item);
        self.store.exec(batch).await
    }

    pub async fn pop_from_queue(&self, queue: &str) -> Result<Option<Vec<u8>>> {
        self.store.lpop(&keys::get_queue_key(queue)).await
    }

    pub async fn queue_size(&self, queue: &str) -> Result<u64> {
        self.store.llen(&keys::get_queue_key(queue)).await
    }

    pub async fn peek_in_queue(&self, queue: &str, start: i64, count: usize) -> Result<Peek> {
        if count == 1 {
            Ok(Peek::One(self.peek_one(queue, start).await?))
        } else {
            Ok(Peek::Many(self.peek_range(queue, start, count).await?))
        }
    }

    pub async fn peek_one(&self, queue: &str, index: i64) -> Result<Option<Vec<u8>>> {
        self.store.lindex(&keys::get_queue_key(queue), index).await
    }

    /// Up to `count` items starting at `start`. A zero count reads nothing.
    pub async fn peek_range(&self, queue: &str, start: i64, count: usize) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let span = i64::try_from(count).unwrap_or(i64::MAX);
        let stop = start.saturating_add(span - 1);
        self.store.lrange(&keys::get_queue_key(queue), start, stop).await
    }

    pub async fn everything_in_queue(&self, queue: &str) -> Result<Vec<Vec<u8>>> {
        self.store.lrange(&keys::get_queue_key(queue), 0, -1).await
    }

    /// Removes every occurrence of `value`, returning how many were removed.
    pub async fn remove_from_queue(&self, queue: &str, value: &[u8]) -> Result<u64> {
        self.store.lrem(&keys::get_queue_key(queue), 0, value).await
    }

    /// Registry order is whatever the store returns.
    pub async fn queue_names(&self) -> Result<Vec<String>> {
        self.store.smembers(keys::QUEUES).await
    }

    pub async fn remove_queue(&self, queue: &str) -> Result<()> {
        debug!("Removing queue '{}'", queue);

        let mut batch = Batch::new();
        batch
            .srem(keys::QUEUES, queue)
            .del(keys::get_queue_key(queue));
        self.store.exec(batch).await
    }

    // Failures

    pub async fn add_failed_queue(&self, failed_queue: &str) -> Result<()> {
        self.store.sadd(keys::FAILED_QUEUES, failed_queue).await?;
        Ok(())
    }

    pub async fn remove_failed_queue(&self, failed_queue: &str) -> Result<()> {
        self.store.srem(keys::FAILED_QUEUES, failed_queue).await?;
        Ok(())
    }

    pub async fn failed_queue_names(&self) -> Result<Vec<String>> {
        self.store.smembers(keys::FAILED_QUEUES).await
    }

    /// Length of the `failed` list. Unrelated to the failed-queue registry.
    pub async fn num_failed(&self) -> Result<u64> {
        self.store.llen(keys::FAILED).await
    }

    pub async fn push_to_failed(&self, encoded_failure: &[u8]) -> Result<()> {
        self.store.rpush(keys::FAILED, encoded_failure).await?;
        Ok(())
    }

    pub async fn clear_failed(&self) -> Result<()> {
        self.store.del(keys::FAILED).await?;
        Ok(())
    }

    // Workers

    pub async fn register_worker(&self, worker_id: &str) -> Result<()> {
        self.register_worker_with_start_time(worker_id, Utc::now())
            .await
    }

    pub async fn register_worker_with_start_time(
        &self,
        worker_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<()> {
        debug!("Registering worker '{}'", worker_id);

        let started = start_time.format(START_TIME_FORMAT).to_string();
        let mut batch = Batch::new();
        batch
            .sadd(keys::WORKERS, worker_id)
            .set(keys::get_worker_started_key(worker_id), started);
        self.store.exec(batch).await
    }

    pub async fn worker_exists(&self, worker_id: &str) -> Result<bool> {
        self.store.sismember(keys::WORKERS, worker_id).await
    }

    pub async fn worker_ids(&self) -> Result<Vec<String>> {
        self.store.smembers(keys::WORKERS).await
    }

    /// Current payload of each requested worker. Idle and unknown workers are
    /// present in the map with `None`.
    pub async fn workers_payload_map<I: AsRef<str>>(
        &self,
        worker_ids: &[I],
    ) -> Result<HashMap<String, Option<Vec<u8>>>> {
        let payload_keys: Vec<String> = worker_ids
            .iter()
            .map(|id| keys::get_worker_key(id.as_ref()))
            .collect();
        let payloads = self.store.mget(&payload_keys).await?;

        let mut map: HashMap<String, Option<Vec<u8>>> = worker_ids
            .iter()
            .map(|id| (id.as_ref().to_string(), None))
            .collect();
        for (id, payload) in worker_ids.iter().zip(payloads) {
            map.insert(id.as_ref().to_string(), payload);
        }

        Ok(map)
    }

    pub async fn get_worker_payload(&self, worker_id: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(&keys::get_worker_key(worker_id)).await
    }

    /// Marks the worker as processing `data`.
    pub async fn set_worker_payload(&self, worker_id: &str, data: &[u8]) -> Result<()> {
        self.store.set(&keys::get_worker_key(worker_id), data).await
    }

    pub async fn worker_start_time(&self, worker_id: &str) -> Result<Option<String>> {
        let started = self
            .store
            .get(&keys::get_worker_started_key(worker_id))
            .await?;
        Ok(started.map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Clears the worker's payload, committing `side_effect` in the same batch.
    pub async fn worker_done_working<F>(&self, worker_id: &str, side_effect: F) -> Result<()>
    where
        F: FnOnce(&mut Batch),
    {
        let mut batch = Batch::new();
        batch.del(keys::get_worker_key(worker_id));
        side_effect(&mut batch);
        self.store.exec(batch).await
    }

    /// Drops the worker's registration, payload and start time, committing
    /// `side_effect` in the same batch.
    pub async fn unregister_worker<F>(&self, worker_id: &str, side_effect: F) -> Result<()>
    where
        F: FnOnce(&mut Batch),
    {
        debug!("Unregistering worker '{}'", worker_id);

        let mut batch = Batch::new();
        batch
            .srem(keys::WORKERS, worker_id)
            .del(keys::get_worker_key(worker_id))
            .del(keys::get_worker_started_key(worker_id));
        side_effect(&mut batch);
        self.store.exec(batch).await
    }

    // Stats

    /// Zero when the counter was never set.
    pub async fn stat(&self, stat: &str) -> Result<i64> {
        let key = keys::get_stat_key(stat);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(0);
        };
        std::str::from_utf8(&raw)
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or(StoreError::NotAnInteger { key })
    }

    pub async fn increment_stat(&self, stat: &str, by: i64) -> Result<i64> {
        self.store.incr_by(&keys::get_stat_key(stat), by).await
    }

    pub async fn decrement_stat(&self, stat: &str, by: i64) -> Result<i64> {
        self.store.incr_by(&keys::get_stat_key(stat), -by).await
    }

    pub async fn clear_stat(&self, stat: &str) -> Result<()> {
        self.store.del(&keys::get_stat_key(stat)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    fn data_store() -> DataStore<MemoryStore> {
        DataStore::new(MemoryStore::with_label("tests"))
    }

    fn items(values: &[&str]) -> Vec<Vec<u8>> {
        values.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn test_push_registers_queue_and_keeps_fifo_order() -> Result<()> {
        let ds = data_store();

        ds.push_to_queue("jobs", "first").await?;
        ds.push_to_queue("jobs", "second").await?;

        assert!(ds.queue_names().await?.contains(&"jobs".to_string()));
        assert_eq!(ds.queue_size("jobs").await?, 2);
        assert_eq!(ds.pop_from_queue("jobs").await?, Some(b"first".to_vec()));
        assert_eq!(ds.pop_from_queue("jobs").await?, Some(b"second".to_vec()));

        Ok(())
    }

    #[tokio::test]
    async fn test_pop_from_empty_queue() -> Result<()> {
        let ds = data_store();

        assert_eq!(ds.pop_from_queue("nothing").await?, None);
        assert_eq!(ds.queue_size("nothing").await?, 0);

        // Still registered after draining.
        ds.push_to_queue("drained", "x").await?;
        ds.pop_from_queue("drained").await?;
        assert_eq!(ds.queue_names().await?, vec!["drained".to_string()]);
        assert_eq!(ds.pop_from_queue("drained").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_peek_in_queue_shapes() -> Result<()> {
        let ds = data_store();
        ds.push_to_queue("single", "only").await?;

        assert_eq!(
            ds.peek_in_queue("single", 0, 1).await?,
            Peek::One(Some(b"only".to_vec()))
        );
        assert_eq!(
            ds.peek_in_queue("single", 0, 2).await?,
            Peek::Many(items(&["only"]))
        );
        assert_eq!(ds.peek_in_queue("single", 5, 1).await?, Peek::One(None));
        assert_eq!(ds.peek_in_queue("missing", 0, 3).await?, Peek::Many(vec![]));

        Ok(())
    }

    #[tokio::test]
    async fn test_peek_range_is_read_only() -> Result<()> {
        let ds = data_store();
        for item in ["a", "b", "c", "d"] {
            ds.push_to_queue("jobs", item).await?;
        }

        assert_eq!(ds.peek_range("jobs", 1, 2).await?, items(&["b", "c"]));
        assert_eq!(ds.peek_range("jobs", 2, 10).await?, items(&["c", "d"]));
        assert!(ds.peek_range("jobs", 0, 0).await?.is_empty());
        assert_eq!(ds.peek_one("jobs", -1).await?, Some(b"d".to_vec()));
        assert_eq!(ds.queue_size("jobs").await?, 4);

        Ok(())
    }

    #[tokio::test]
    async fn test_remove_queue() -> Result<()> {
        let ds = data_store();
        ds.push_to_queue("jobs", "a").await?;
        ds.push_to_queue("other", "b").await?;

        ds.remove_queue("jobs").await?;

        assert_eq!(ds.queue_names().await?, vec!["other".to_string()]);
        assert_eq!(ds.queue_size("jobs").await?, 0);
        assert_eq!(ds.queue_size("other").await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_everything_and_remove_from_queue() -> Result<()> {
        let ds = data_store();
        for item in ["a", "dup", "b", "dup", "c"] {
            ds.push_to_queue("jobs", item).await?;
        }

        assert_eq!(
            ds.everything_in_queue("jobs").await?,
            items(&["a", "dup", "b", "dup", "c"])
        );
        assert_eq!(ds.remove_from_queue("jobs", b"dup").await?, 2);
        assert_eq!(ds.everything_in_queue("jobs").await?, items(&["a", "b", "c"]));
        assert_eq!(ds.remove_from_queue("jobs", b"dup").await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_registry_and_counter_are_independent() -> Result<()> {
        let ds = data_store();

        ds.add_failed_queue("jobs_failed").await?;
        assert_eq!(ds.failed_queue_names().await?, vec!["jobs_failed".to_string()]);
        assert_eq!(ds.num_failed().await?, 0);
        assert!(ds.queue_names().await?.is_empty());

        ds.push_to_failed(b"{\"error\":\"boom\"}").await?;
        ds.push_to_failed(b"{\"error\":\"bang\"}").await?;
        assert_eq!(ds.num_failed().await?, 2);
        assert_eq!(ds.failed_queue_names().await?.len(), 1);

        ds.clear_failed().await?;
        ds.remove_failed_queue("jobs_failed").await?;
        assert_eq!(ds.num_failed().await?, 0);
        assert!(ds.failed_queue_names().await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_register_worker() -> Result<()> {
        let ds = data_store();
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

        assert!(!ds.worker_exists("host:1:jobs").await?);
        assert_eq!(ds.worker_start_time("host:1:jobs").await?, None);

        ds.register_worker_with_start_time("host:1:jobs", started)
            .await?;

        assert!(ds.worker_exists("host:1:jobs").await?);
        assert_eq!(ds.worker_ids().await?, vec!["host:1:jobs".to_string()]);
        assert_eq!(
            ds.worker_start_time("host:1:jobs").await?.as_deref(),
            Some("2024-05-01 12:30:00 +0000")
        );
        assert_eq!(ds.get_worker_payload("host:1:jobs").await?, None);

        ds.register_worker("host:2:jobs").await?;
        assert!(ds.worker_start_time("host:2:jobs").await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_worker_lifecycle() -> Result<()> {
        let ds = data_store();
        ds.register_worker("w1").await?;

        ds.set_worker_payload("w1", b"job-1").await?;
        assert_eq!(ds.get_worker_payload("w1").await?, Some(b"job-1".to_vec()));

        ds.worker_done_working("w1", |batch| {
            batch.incr_by(keys::get_stat_key("processed"), 1);
        })
        .await?;
        assert_eq!(ds.get_worker_payload("w1").await?, None);
        assert!(ds.worker_exists("w1").await?);
        assert_eq!(ds.stat("processed").await?, 1);

        ds.set_worker_payload("w1", b"job-2").await?;
        ds.unregister_worker("w1", |batch| {
            batch.rpush(keys::FAILED, "worker w1 died");
        })
        .await?;

        assert!(!ds.worker_exists("w1").await?);
        assert_eq!(ds.get_worker_payload("w1").await?, None);
        assert_eq!(ds.worker_start_time("w1").await?, None);
        assert_eq!(ds.num_failed().await?, 1);
        assert!(ds.all_known_keys().await?.iter().all(|k| !k.starts_with("worker")));

        Ok(())
    }

    #[tokio::test]
    async fn test_workers_payload_map() -> Result<()> {
        let ds = data_store();
        ds.register_worker("idle").await?;
        ds.register_worker("busy").await?;
        ds.set_worker_payload("busy", b"payload").await?;

        let map = ds.workers_payload_map(&["idle", "never-registered"]).await?;
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("idle"), Some(&None));
        assert_eq!(map.get("never-registered"), Some(&None));

        let map = ds.workers_payload_map(&["busy".to_string()]).await?;
        assert_eq!(map.get("busy"), Some(&Some(b"payload".to_vec())));

        let empty: [&str; 0] = [];
        assert!(ds.workers_payload_map(&empty).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_stats() -> Result<()> {
        let ds = data_store();

        assert_eq!(ds.stat("processed").await?, 0);
        assert_eq!(ds.increment_stat("processed", 3).await?, 3);
        assert_eq!(ds.decrement_stat("processed", 1).await?, 2);
        assert_eq!(ds.stat("processed").await?, 2);

        ds.clear_stat("processed").await?;
        assert_eq!(ds.stat("processed").await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_stat_is_an_error() -> Result<()> {
        let ds = data_store();
        ds.raw().set("stat:processed", b"garbage").await?;

        let err = ds.stat("processed").await.unwrap_err();
        assert!(matches!(err, StoreError::NotAnInteger { ref key } if key == "stat:processed"));
        assert!(matches!(
            ds.increment_stat("processed", 1).await,
            Err(StoreError::NotAnInteger { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_store_errors_reach_the_caller() -> Result<()> {
        let ds = data_store();
        ds.raw().set("queue:jobs", b"not a list").await?;

        let err = ds.push_to_queue("jobs", "payload").await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { ref key } if key == "queue:jobs"));
        assert!(matches!(
            ds.pop_from_queue("jobs").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            ds.queue_size("jobs").await,
            Err(StoreError::WrongType { .. })
        ));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pops_hand_out_each_item_once() -> Result<()> {
        let ds = Arc::new(data_store());
        let expected: Vec<String> = (0..200).map(|i| format!("job-{}", i)).collect();
        for item in &expected {
            ds.push_to_queue("jobs", item.as_str()).await?;
        }

        let mut poppers = JoinSet::new();
        for _ in 0..8 {
            let ds = Arc::clone(&ds);
            poppers.spawn(async move {
                let mut popped = Vec::new();
                while let Some(item) = ds.pop_from_queue("jobs").await? {
                    popped.push(String::from_utf8_lossy(&item).into_owned());
                    tokio::task::yield_now().await;
                }
                Ok::<_, StoreError>(popped)
            });
        }

        let mut popped = Vec::new();
        while let Some(res) = poppers.join_next().await {
            popped.extend(res.expect("popper panicked")?);
        }
        popped.sort();
        let mut expected = expected;
        expected.sort();

        assert_eq!(popped, expected);
        assert_eq!(ds.queue_size("jobs").await?, 0);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_remove_queue_races_with_pushes() -> Result<()> {
        let ds = Arc::new(data_store());

        let mut tasks = JoinSet::new();
        for pusher in 0..4 {
            let ds = Arc::clone(&ds);
            tasks.spawn(async move {
                for i in 0..50 {
                    ds.push_to_queue("jobs", format!("{}-{}", pusher, i)).await?;
                    tokio::task::yield_now().await;
                }
                Ok::<_, StoreError>(())
            });
        }
        let remover = Arc::clone(&ds);
        tasks.spawn(async move {
            for _ in 0..50 {
                remover.remove_queue("jobs").await?;
                tokio::task::yield_now().await;
            }
            Ok::<_, StoreError>(())
        });

        while let Some(res) = tasks.join_next().await {
            res.expect("task panicked")?;
        }

        let registered = ds.queue_names().await?.contains(&"jobs".to_string());
        let size = ds.queue_size("jobs").await?;
        assert_eq!(registered, size > 0);

        ds.remove_queue("jobs").await?;
        assert!(ds.queue_names().await?.is_empty());
        assert_eq!(ds.queue_size("jobs").await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_admin_helpers() -> Result<()> {
        let ds = data_store();
        ds.push_to_queue("jobs", "a").await?;
        ds.register_worker("w1").await?;

        let mut keys = ds.all_known_keys().await?;
        keys.sort();
        assert_eq!(
            keys,
            vec!["queue:jobs", "queues", "worker:w1:started", "workers"]
        );
        assert_eq!(ds.identifier(), "memory://tests");
        ds.reconnect().await?;
        assert_eq!(ds.raw().llen("queue:jobs").await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_end_to_end_queue_scenario() -> Result<()> {
        let ds = data_store();
        for item in ["a", "b", "c"] {
            ds.push_to_queue("jobs", item).await?;
        }

        assert_eq!(ds.queue_size("jobs").await?, 3);
        assert_eq!(ds.pop_from_queue("jobs").await?, Some(b"a".to_vec()));
        assert_eq!(
            ds.peek_in_queue("jobs", 0, 2).await?,
            Peek::Many(items(&["b", "c"]))
        );

        ds.remove_queue("jobs").await?;
        assert!(!ds.queue_names().await?.contains(&"jobs".to_string()));

        Ok(())
    }
}
