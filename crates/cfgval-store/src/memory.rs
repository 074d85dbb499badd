use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use cfgval_core::{FieldMap, key_match};

use crate::notify::{ChangeEvent, ChangeKind, Subscription};
use crate::pipeline::{Command, Pipeline, Reply};
use crate::search::{Record, Search};
use crate::store::{Store, StoreError, StoreResult};

/// Operation counters, used to observe round trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub exists: u64,
    pub keys: u64,
    pub hget: u64,
    pub hgetall: u64,
    pub pipelines: u64,
    pub lookups: u64,
    pub counts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    exists: AtomicU64,
    keys: AtomicU64,
    hget: AtomicU64,
    hgetall: AtomicU64,
    pipelines: AtomicU64,
    lookups: AtomicU64,
    counts: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug)]
struct Subscriber {
    patterns: Vec<String>,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

/// In-process store holding `TABLE|key` hashes, with change notifications.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, FieldMap>>,
    subscribers: Mutex<Vec<Subscriber>>,
    counters: Counters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: BTreeMap<String, FieldMap>) -> Self {
        Self {
            data: RwLock::new(snapshot),
            ..Self::default()
        }
    }

    /// Load a snapshot file of the form `{"TABLE|key": {"field": "value"}}`.
    pub fn load_json(path: &Path) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot: BTreeMap<String, FieldMap> = serde_json::from_str(&contents)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn snapshot(&self) -> StoreResult<BTreeMap<String, FieldMap>> {
        Ok(self.read()?.clone())
    }

    /// Set fields on a key, creating it when absent.
    pub fn hset(&self, key: &str, fields: FieldMap) -> StoreResult<()> {
        {
            let mut data = self.write()?;
            data.entry(key.to_string()).or_default().extend(fields);
        }
        self.notify(key, ChangeKind::FieldSet)
    }

    /// Remove fields from a key; the key disappears with its last field.
    pub fn hdel(&self, key: &str, fields: &[&str]) -> StoreResult<()> {
        let emptied = {
            let mut data = self.write()?;
            match data.get_mut(key) {
                Some(hash) => {
                    for field in fields {
                        hash.remove(*field);
                    }
                    if hash.is_empty() {
                        data.remove(key);
                        true
                    } else {
                        false
                    }
                }
                None => return Ok(()),
            }
        };
        self.notify(key, ChangeKind::FieldDel)?;
        if emptied {
            self.notify(key, ChangeKind::KeyDel)?;
        }
        Ok(())
    }

    /// Delete a key. Returns whether it existed.
    pub fn del(&self, key: &str) -> StoreResult<bool> {
        let removed = self.write()?.remove(key).is_some();
        if removed {
            self.notify(key, ChangeKind::KeyDel)?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> StoreStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StoreStats {
            exists: load(&self.counters.exists),
            keys: load(&self.counters.keys),
            hget: load(&self.counters.hget),
            hgetall: load(&self.counters.hgetall),
            pipelines: load(&self.counters.pipelines),
            lookups: load(&self.counters.lookups),
            counts: load(&self.counters.counts),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<String, FieldMap>>> {
        self.data
            .read()
            .map_err(|_| StoreError::Unavailable("failed to lock store data".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<String, FieldMap>>> {
        self.data
            .write()
            .map_err(|_| StoreError::Unavailable("failed to lock store data".to_string()))
    }

    fn notify(&self, key: &str, kind: ChangeKind) -> StoreResult<()> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| StoreError::Unavailable("failed to lock subscribers".to_string()))?;

        subscribers.retain(|subscriber| {
            if !subscriber
                .patterns
                .iter()
                .any(|pattern| key_match(key, pattern))
            {
                return !subscriber.sender.is_closed();
            }
            subscriber
                .sender
                .send(ChangeEvent {
                    key: key.to_string(),
                    kind,
                })
                .is_ok()
        });

        Ok(())
    }

    fn matching(&self, search: &Search) -> StoreResult<Vec<Record>> {
        let data = self.read()?;
        let mut records = Vec::new();
        for (key, hash) in data.iter() {
            if !key_match(key, &search.pattern) || !search.accepts(key, hash) {
                continue;
            }
            records.push(Record {
                key: key.clone(),
                fields: hash.clone(),
            });
            if search.limit.is_some_and(|limit| records.len() >= limit) {
                break;
            }
        }
        Ok(records)
    }

    fn run(&self, data: &BTreeMap<String, FieldMap>, command: Command) -> Reply {
        match command {
            Command::Exists(key) => Reply::Exists(data.contains_key(&key)),
            Command::Keys(pattern) => Reply::Keys(
                data.keys()
                    .filter(|key| key_match(key, &pattern))
                    .cloned()
                    .collect(),
            ),
            Command::HGet(key, field) => {
                Reply::Value(data.get(&key).and_then(|hash| hash.get(&field)).cloned())
            }
            Command::HMGet(key, fields) => {
                let hash = data.get(&key);
                Reply::Values(
                    fields
                        .iter()
                        .map(|field| hash.and_then(|hash| hash.get(field)).cloned())
                        .collect(),
                )
            }
            Command::HGetAll(key) => Reply::Hash(data.get(&key).cloned().unwrap_or_default()),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn engine(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        bump(&self.counters.exists);
        Ok(self.read()?.contains_key(key))
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        bump(&self.counters.keys);
        let data = self.read()?;
        Ok(self.run(&data, Command::Keys(pattern.to_string())).into_keys()?)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        bump(&self.counters.hget);
        Ok(self
            .read()?
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>> {
        bump(&self.counters.hget);
        let data = self.read()?;
        let hash = data.get(key);
        Ok(fields
            .iter()
            .map(|field| hash.and_then(|hash| hash.get(field)).cloned())
            .collect())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<FieldMap> {
        bump(&self.counters.hgetall);
        Ok(self.read()?.get(key).cloned().unwrap_or_default())
    }

    async fn exec(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>> {
        bump(&self.counters.pipelines);
        let data = self.read()?;
        Ok(pipeline
            .into_commands()
            .into_iter()
            .map(|command| self.run(&data, command))
            .collect())
    }

    async fn lookup(&self, search: &Search) -> StoreResult<Vec<Record>> {
        bump(&self.counters.lookups);
        self.matching(search)
    }

    async fn count(&self, search: &Search) -> StoreResult<usize> {
        bump(&self.counters.counts);
        Ok(self.matching(search)?.len())
    }

    async fn subscribe(&self, patterns: &[String]) -> StoreResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| StoreError::Unavailable("failed to lock subscribers".to_string()))?
            .push(Subscriber {
                patterns: patterns.to_vec(),
                sender,
            });
        tracing::debug!(event = "store_subscribed", patterns = ?patterns);
        Ok(Subscription::new(patterns.to_vec(), receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Predicate;
    use cfgval_core::fields;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .hset("PORT|Ethernet0", fields([("mtu", "9100"), ("admin_status", "up")]))
            .expect("hset");
        store
            .hset("PORT|Ethernet4", fields([("mtu", "1500")]))
            .expect("hset");
        store
            .hset("VLAN|Vlan10", fields([("vlanid", "10")]))
            .expect("hset");
        store
    }

    #[tokio::test]
    async fn keys_and_hashes() {
        let store = store();
        let keys = store.keys("PORT|*").await.expect("keys");
        assert_eq!(keys, vec!["PORT|Ethernet0", "PORT|Ethernet4"]);
        assert!(store.exists("VLAN|Vlan10").await.expect("exists"));
        assert_eq!(
            store.hget("PORT|Ethernet4", "mtu").await.expect("hget"),
            Some("1500".to_string())
        );
        assert!(store.hgetall("PORT|Ethernet8").await.expect("hgetall").is_empty());
    }

    #[tokio::test]
    async fn pipeline_replies_in_order() {
        let store = store();
        let mut pipeline = Pipeline::new();
        pipeline
            .hgetall("PORT|Ethernet0")
            .exists("PORT|Ethernet8")
            .keys("VLAN|*");
        let replies = store.exec(pipeline).await.expect("exec");
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[1], Reply::Exists(false));
        assert_eq!(store.stats().pipelines, 1);
    }

    #[tokio::test]
    async fn lookup_applies_predicate_and_limit() {
        let store = store();
        let search = Search::new("PORT|*").with_predicate(Predicate::FieldEquals {
            field: "mtu".to_string(),
            value: "9100".to_string(),
        });
        let records = store.lookup(&search).await.expect("lookup");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "PORT|Ethernet0");

        let limited = Search::new("PORT|*").with_limit(1);
        assert_eq!(store.count(&limited).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn subscribers_see_matching_writes() {
        let store = store();
        let mut sub = store
            .subscribe(&["PORT|*".to_string()])
            .await
            .expect("subscribe");

        store
            .hset("VLAN|Vlan20", fields([("vlanid", "20")]))
            .expect("hset");
        store
            .hset("PORT|Ethernet0", fields([("mtu", "1500")]))
            .expect("hset");
        store.del("PORT|Ethernet4").expect("del");

        assert_eq!(
            sub.recv().await,
            Some(ChangeEvent {
                key: "PORT|Ethernet0".to_string(),
                kind: ChangeKind::FieldSet,
            })
        );
        assert_eq!(
            sub.recv().await,
            Some(ChangeEvent {
                key: "PORT|Ethernet4".to_string(),
                kind: ChangeKind::KeyDel,
            })
        );
    }

    #[tokio::test]
    async fn hdel_of_last_field_removes_key() {
        let store = store();
        store.hdel("VLAN|Vlan10", &["vlanid"]).expect("hdel");
        assert!(!store.exists("VLAN|Vlan10").await.expect("exists"));
    }
}
