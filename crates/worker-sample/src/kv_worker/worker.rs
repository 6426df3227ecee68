use super::error::KvError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use worker_framework::{ActionTable, Worker};

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Str(String),
    Hash(BTreeMap<String, String>),
}

/// In-memory key-value store served over the bus.
pub struct KeyValueWorker {
    namespace: String,
    capacity: usize,
    store: Mutex<HashMap<String, Entry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelArgs {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrArgs {
    pub key: String,
    #[serde(default = "one")]
    pub by: i64,
}

fn one() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashFieldArgs {
    pub key: String,
    pub field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashSetArgs {
    pub key: String,
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashMultiSetArgs {
    pub key: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashMultiGetArgs {
    pub key: String,
    pub fields: Vec<String>,
}

impl KeyValueWorker {
    pub fn new(namespace: impl Into<String>, capacity: usize) -> Self {
        Self {
            namespace: namespace.into(),
            capacity,
            store: Mutex::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn store(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scoped(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    fn ensure_room(&self, store: &HashMap<String, Entry>, key: &str) -> Result<(), KvError> {
        if !store.contains_key(key) && store.len() >= self.capacity {
            return Err(KvError::Full {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match self.store().get(&self.scoped(key)) {
            None => Ok(None),
            Some(Entry::Str(value)) => Ok(Some(value.clone())),
            Some(Entry::Hash(_)) => Err(KvError::WrongType(key.to_string())),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let scoped = self.scoped(key);
        let mut store = self.store();
        self.ensure_room(&store, &scoped)?;
        store.insert(scoped, Entry::Str(value.to_string()));
        Ok(())
    }

    /// Removes the given keys, returning how many existed.
    pub fn del(&self, keys: &[String]) -> usize {
        let mut store = self.store();
        keys.iter()
            .filter(|key| store.remove(&self.scoped(key)).is_some())
            .count()
    }

    /// Adds `by` to the integer at `key`, starting from zero when absent.
    pub fn incr(&self, key: &str, by: i64) -> Result<i64, KvError> {
        let scoped = self.scoped(key);
        let mut store = self.store();
        let current = match store.get(&scoped) {
            None => {
                self.ensure_room(&store, &scoped)?;
                0
            }
            Some(Entry::Str(value)) => value
                .parse::<i64>()
                .map_err(|_| KvError::NotInteger(key.to_string()))?,
            Some(Entry::Hash(_)) => return Err(KvError::WrongType(key.to_string())),
        };
        let next = current
            .checked_add(by)
            .ok_or_else(|| KvError::Overflow(key.to_string()))?;
        store.insert(scoped, Entry::Str(next.to_string()));
        Ok(next)
    }

    fn with_hash<T>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> Result<Option<T>, KvError> {
        let scoped = self.scoped(key);
        let mut store = self.store();
        if !store.contains_key(&scoped) {
            if !create {
                return Ok(None);
            }
            self.ensure_room(&store, &scoped)?;
            store.insert(scoped.clone(), Entry::Hash(BTreeMap::new()));
        }
        match store.get_mut(&scoped) {
            Some(Entry::Hash(hash)) => Ok(Some(f(hash))),
            _ => Err(KvError::WrongType(key.to_string())),
        }
    }

    /// Returns `true` when `field` is new.
    pub fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, KvError> {
        self.with_hash(key, true, |hash| {
            hash.insert(field.to_string(), value.to_string()).is_none()
        })
        .map(|added| added.unwrap_or(false))
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        self.with_hash(key, false, |hash| hash.get(field).cloned())
            .map(Option::flatten)
    }

    pub fn hkeys(&self, key: &str) -> Result<Vec<String>, KvError> {
        self.with_hash(key, false, |hash| hash.keys().cloned().collect::<Vec<_>>())
            .map(Option::unwrap_or_default)
    }

    pub fn hmset(&self, key: &str, fields: BTreeMap<String, String>) -> Result<(), KvError> {
        self.with_hash(key, true, |hash| hash.extend(fields))
            .map(|_| ())
    }

    pub fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, KvError> {
        let found = self.with_hash(key, false, |hash| {
            fields.iter().map(|f| hash.get(f).cloned()).collect::<Vec<_>>()
        })?;
        Ok(found.unwrap_or_else(|| vec![None; fields.len()]))
    }

    /// Clears the store, returning how many keys were dropped.
    pub fn flush(&self) -> usize {
        let mut store = self.store();
        let dropped = store.len();
        store.clear();
        dropped
    }

    pub fn size(&self) -> usize {
        self.store().len()
    }
}

#[async_trait]
impl Worker for KeyValueWorker {
    fn actions(table: &mut ActionTable<Self>) {
        table
            .unary("get", |kv: Arc<Self>, args: KeyArgs| async move {
                kv.get(&args.key)
            })
            .unary("set", |kv: Arc<Self>, args: SetArgs| async move {
                kv.set(&args.key, &args.value)
            })
            .unary("del", |kv: Arc<Self>, args: DelArgs| async move {
                Ok::<_, KvError>(kv.del(&args.keys))
            })
            .unary("incr", |kv: Arc<Self>, args: IncrArgs| async move {
                kv.incr(&args.key, args.by)
            })
            .unary("hset", |kv: Arc<Self>, args: HashSetArgs| async move {
                kv.hset(&args.key, &args.field, &args.value)
            })
            .unary("hget", |kv: Arc<Self>, args: HashFieldArgs| async move {
                kv.hget(&args.key, &args.field)
            })
            .unary("hkeys", |kv: Arc<Self>, args: KeyArgs| async move {
                kv.hkeys(&args.key)
            })
            .unary("hmset", |kv: Arc<Self>, args: HashMultiSetArgs| async move {
                kv.hmset(&args.key, args.fields)
            })
            .unary("hmget", |kv: Arc<Self>, args: HashMultiGetArgs| async move {
                kv.hmget(&args.key, &args.fields)
            })
            .nullary("flush", |kv: Arc<Self>| async move {
                Ok::<_, KvError>(kv.flush())
            })
            .nullary("size", |kv: Arc<Self>| async move {
                Ok::<_, KvError>(kv.size())
            });
    }

    async fn on_start(&self) -> Result<(), worker_framework::BuildError> {
        debug!(
            namespace = %self.namespace,
            capacity = self.capacity,
            "key-value store starting"
        );
        Ok(())
    }

    async fn on_stop(&self) {
        let dropped = self.flush();
        info!(namespace = %self.namespace, dropped, "key-value store released");
    }
}
