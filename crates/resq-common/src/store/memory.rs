use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Batch, Command, KeyValueStore};
use crate::error::{Result, StoreError};

enum Entry {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Set(BTreeSet<String>),
}

/// In-process store with the same semantics as the Redis backend.
///
/// A batch is applied under a single lock, so no other caller can observe
/// it half done. Empty lists and sets are dropped from the keyspace, as
/// Redis does.
pub struct MemoryStore {
    label: String,
    keyspace: Mutex<Keyspace>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_label("default")
    }

    pub fn with_label<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            keyspace: Mutex::new(Keyspace::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn string(&self, key: &str) -> Result<Option<&Vec<u8>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Str(value)) => Ok(Some(value)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list(&self, key: &str) -> Result<Option<&VecDeque<Vec<u8>>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::List(list)) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set(&self, key: &str) -> Result<Option<&BTreeSet<String>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Set(set)) => Ok(Some(set)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<&mut VecDeque<Vec<u8>>> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()))
        {
            Entry::List(list) => Ok(list),
            _ => Err(wrong_type(key)),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut BTreeSet<String>> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(BTreeSet::new()))
        {
            Entry::Set(set) => Ok(set),
            _ => Err(wrong_type(key)),
        }
    }

    /// Drops a list or set that has become empty.
    fn prune(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Entry::List(list)) => list.is_empty(),
            Some(Entry::Set(set)) => set.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_string(), Entry::Str(value));
    }

    fn del(&mut self, key: &str) -> u64 {
        self.entries.remove(key).map_or(0, |_| 1)
    }

    fn incr_by(&mut self, key: &str, by: i64) -> Result<i64> {
        let current = match self.string(key)? {
            None => 0,
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| not_an_integer(key))?,
        };
        let next = current.checked_add(by).ok_or_else(|| not_an_integer(key))?;
        self.put(key, next.to_string().into_bytes());
        Ok(next)
    }

    fn rpush(&mut self, key: &str, value: Vec<u8>) -> Result<u64> {
        let list = self.list_mut(key)?;
        list.push_back(value);
        Ok(list.len() as u64)
    }

    fn lpop(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.list(key)?.is_none() {
            return Ok(None);
        }
        let popped = self.list_mut(key)?.pop_front();
        self.prune(key);
        Ok(popped)
    }

    fn lrem(&mut self, key: &str, count: i64, value: &[u8]) -> Result<u64> {
        if self.list(key)?.is_none() {
            return Ok(0);
        }
        let list = self.list_mut(key)?;
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };

        let mut removed = 0;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }

        self.prune(key);
        Ok(removed as u64)
    }

    fn sadd(&mut self, key: &str, member: String) -> Result<bool> {
        Ok(self.set_mut(key)?.insert(member))
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<bool> {
        if self.set(key)?.is_none() {
            return Ok(false);
        }
        let removed = self.set_mut(key)?.remove(member);
        self.prune(key);
        Ok(removed)
    }

    fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Set { key, value } => self.put(&key, value),
            Command::Del { key } => {
                self.del(&key);
            }
            Command::IncrBy { key, by } => {
                self.incr_by(&key, by)?;
            }
            Command::RPush { key, value } => {
                self.rpush(&key, value)?;
            }
            Command::LRem { key, count, value } => {
                self.lrem(&key, count, &value)?;
            }
            Command::SAdd { key, member } => {
                self.sadd(&key, member)?;
            }
            Command::SRem { key, member } => {
                self.srem(&key, &member)?;
            }
        }
        Ok(())
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

fn not_an_integer(key: &str) -> StoreError {
    StoreError::NotAnInteger {
        key: key.to_string(),
    }
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start >= len || start > stop {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().string(key)?.cloned())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let keyspace = self.lock();
        // MGET reports non-string keys as missing instead of failing.
        Ok(keys
            .iter()
            .map(|key| keyspace.string(key).ok().flatten().cloned())
            .collect())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock().put(key, value.to_vec());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        Ok(self.lock().del(key))
    }

    async fn incr_by(&self, key: &str, by: i64) -> Result<i64> {
        self.lock().incr_by(key, by)
    }

    async fn rpush(&self, key: &str, value: &[u8]) -> Result<u64> {
        self.lock().rpush(key, value.to_vec())
    }

    async fn lpop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.lock().lpop(key)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        Ok(self.lock().list(key)?.map_or(0, |list| list.len() as u64))
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<Vec<u8>>> {
        let keyspace = self.lock();
        let Some(list) = keyspace.list(key)? else {
            return Ok(None);
        };
        Ok(resolve_index(list.len(), index).map(|i| list[i].clone()))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let keyspace = self.lock();
        let Some(list) = keyspace.list(key)? else {
            return Ok(Vec::new());
        };
        let Some((start, stop)) = resolve_range(list.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(list.range(start..=stop).cloned().collect())
    }

    async fn lrem(&self, key: &str, count: i64, value: &[u8]) -> Result<u64> {
        self.lock().lrem(key, count, value)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.lock().sadd(key, member.to_string())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        self.lock().srem(key, member)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .set(key)?
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self.lock().set(key)?.is_some_and(|set| set.contains(member)))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock().entries.keys().cloned().collect())
    }

    async fn exec(&self, batch: Batch) -> Result<()> {
        let mut keyspace = self.lock();
        // Like MULTI/EXEC, a failing command does not undo earlier ones.
        let mut first_error = None;
        for command in batch.into_commands() {
            if let Err(e) = keyspace.apply(command) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn identifier(&self) -> String {
        format!("memory://{}", self.label)
    }

    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }
}
