use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use cfgval_core::{FieldMap, SchemaModel};
use cfgval_store::{ChangeEvent, ChangeKind, Store, Subscription};

use crate::errors::{EngineError, EngineResult};
use crate::fetch::fetch_entries;

/// Whole-table snapshot: key (without table prefix) -> fields.
pub type TableData = BTreeMap<String, FieldMap>;

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Arc<TableData>,
    created: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        !self.ttl.is_zero() && now.duration_since(self.created) >= self.ttl
    }
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalCacheStats {
    pub full_scans: u64,
    pub key_refreshes: u64,
    pub evictions: u64,
    pub listener_restarts: u64,
}

#[derive(Default)]
struct CacheState {
    tables: BTreeMap<String, CacheEntry>,
    stats: GlobalCacheStats,
}

struct Listener {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Shared {
    state: Mutex<CacheState>,
    listener: Mutex<Option<Listener>>,
    store: Arc<dyn Store>,
    schema: Arc<SchemaModel>,
    batch: usize,
    ttl: Duration,
}

/// Process-wide, table-granular cache of store data read by must-expressions.
///
/// A single background listener keeps cached tables coherent with store
/// writes. When the cached table set changes, the replacement subscription
/// is opened before the old listener is stopped, and a stopping listener
/// applies whatever it already received. Loads are serialized on the
/// listener slot. Lock order is `listener` before `state`.
#[derive(Clone)]
pub struct GlobalCache {
    shared: Arc<Shared>,
}

impl GlobalCache {
    pub fn new(
        store: Arc<dyn Store>,
        schema: Arc<SchemaModel>,
        ttl: Duration,
        batch: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState::default()),
                listener: Mutex::new(None),
                store,
                schema,
                batch: batch.max(1),
                ttl,
            }),
        }
    }

    /// Cached table data, sliding its TTL. Expired entries are evicted.
    pub async fn get(&self, table: &str) -> EngineResult<Option<Arc<TableData>>> {
        {
            let mut state = self.shared.state.lock().await;
            let now = Instant::now();
            match state.tables.get_mut(table) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => {
                    entry.created = now;
                    return Ok(Some(Arc::clone(&entry.data)));
                }
                Some(_) => {}
            }
            state.tables.remove(table);
            state.stats.evictions += 1;
        }

        tracing::debug!(event = "global_cache_evicted", table = %table);
        let mut slot = self.shared.listener.lock().await;
        let tables = self.cached_tables().await;
        let subscription = self.subscribe(&tables).await?;
        self.swap_listener(&mut slot, subscription).await;
        Ok(None)
    }

    /// Full scan of `table` into the cache, under the cache mutex.
    pub async fn set(&self, table: &str, ttl: Duration) -> EngineResult<Arc<TableData>> {
        self.load(table, ttl, true).await
    }

    /// Cached data, loading the table with the default TTL on a miss.
    pub async fn get_or_set(&self, table: &str) -> EngineResult<Arc<TableData>> {
        match self.get(table).await? {
            Some(data) => Ok(data),
            None => self.load(table, self.shared.ttl, false).await,
        }
    }

    pub async fn stats(&self) -> GlobalCacheStats {
        self.shared.state.lock().await.stats
    }

    pub async fn cached_tables(&self) -> Vec<String> {
        self.shared.state.lock().await.tables.keys().cloned().collect()
    }

    /// Drop every cached table and stop the listener.
    pub async fn clear(&self) {
        self.shared.state.lock().await.tables.clear();
        self.stop_listener().await;
    }

    pub async fn shutdown(&self) {
        self.stop_listener().await;
    }

    async fn stop_listener(&self) {
        let mut slot = self.shared.listener.lock().await;
        if let Some(listener) = slot.take() {
            stop(listener).await;
        }
    }

    /// Scan `table` into the cache. Without `force`, a live entry loaded by
    /// a concurrent caller is returned as is.
    async fn load(&self, table: &str, ttl: Duration, force: bool) -> EngineResult<Arc<TableData>> {
        let info = self
            .shared
            .schema
            .table(table)
            .ok_or_else(|| EngineError::Core(cfgval_core::Error::UnknownTable(table.to_string())))?;
        let prefix_len = info.name.len() + info.key_delim().len();

        let mut slot = self.shared.listener.lock().await;
        let mut tables = {
            let state = self.shared.state.lock().await;
            if !force {
                if let Some(entry) = state.tables.get(table) {
                    if !entry.is_expired(Instant::now()) {
                        return Ok(Arc::clone(&entry.data));
                    }
                }
            }
            state.tables.keys().cloned().collect::<Vec<_>>()
        };

        // Writes landing during the scan reach the new subscription.
        let subscription = if tables.iter().any(|name| name == table) {
            None
        } else {
            tables.push(table.to_string());
            let subscription = self.subscribe(&tables).await?;
            if let Some(listener) = slot.take() {
                stop(listener).await;
            }
            subscription
        };

        let data = {
            let mut state = self.shared.state.lock().await;
            let store = self.shared.store.as_ref();
            let keys = store.keys(&info.key_pattern.table_glob()).await?;
            let entries = fetch_entries(store, &keys, self.shared.batch).await?;
            let data: TableData = entries
                .into_iter()
                .filter_map(|(full_key, fields)| {
                    full_key.get(prefix_len..).map(|key| (key.to_string(), fields))
                })
                .collect();
            let data = Arc::new(data);

            state.stats.full_scans += 1;
            state.tables.insert(
                table.to_string(),
                CacheEntry {
                    data: Arc::clone(&data),
                    created: Instant::now(),
                    ttl,
                },
            );
            data
        };

        tracing::info!(
            event = "global_cache_loaded",
            table = %table,
            entries = data.len(),
            ttl_secs = ttl.as_secs()
        );

        if subscription.is_some() {
            self.swap_listener(&mut slot, subscription).await;
        }
        Ok(data)
    }

    /// Subscription covering `tables`, or `None` when there is nothing to watch.
    async fn subscribe(&self, tables: &[String]) -> EngineResult<Option<Subscription>> {
        if tables.is_empty() {
            return Ok(None);
        }
        let patterns: Vec<String> = tables
            .iter()
            .filter_map(|table| self.shared.schema.table(table))
            .map(|info| info.key_pattern.table_glob())
            .collect();
        Ok(Some(self.shared.store.subscribe(&patterns).await?))
    }

    /// Stop the running listener and start one on `subscription`.
    async fn swap_listener(
        &self,
        slot: &mut MutexGuard<'_, Option<Listener>>,
        subscription: Option<Subscription>,
    ) {
        if let Some(listener) = slot.take() {
            stop(listener).await;
        }
        let Some(subscription) = subscription else {
            return;
        };

        let patterns = subscription.patterns().len();
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(listen(Arc::downgrade(&self.shared), subscription, stop_rx));
        **slot = Some(Listener {
            stop: stop_tx,
            handle,
        });

        self.shared.state.lock().await.stats.listener_restarts += 1;
        tracing::debug!(event = "global_cache_listener_started", patterns = patterns);
    }
}

async fn stop(listener: Listener) {
    let _ = listener.stop.send(());
    if let Err(err) = listener.handle.await {
        tracing::warn!(event = "global_cache_listener_join_failed", error = %err);
    }
}

async fn listen(
    shared: Weak<Shared>,
    mut subscription: Subscription,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = subscription.recv() => {
                let Some(event) = event else {
                    return;
                };
                if !refresh(&shared, &event).await {
                    return;
                }
            }
            _ = &mut stop => break,
        }
    }

    while let Some(event) = subscription.try_recv() {
        if !refresh(&shared, &event).await {
            return;
        }
    }
}

/// Apply one event; `false` once the cache itself is gone.
async fn refresh(shared: &Weak<Shared>, event: &ChangeEvent) -> bool {
    let Some(shared) = shared.upgrade() else {
        return false;
    };
    if let Err(err) = apply(&shared, event).await {
        tracing::warn!(
            event = "global_cache_refresh_failed",
            key = %event.key,
            error = %err
        );
    }
    true
}

/// Merge one key change into the cached table it belongs to.
async fn apply(shared: &Shared, event: &ChangeEvent) -> EngineResult<()> {
    let Some((info, key)) = shared.schema.try_split_key(&event.key) else {
        return Ok(());
    };

    let fields = match event.kind {
        ChangeKind::KeyDel => None,
        ChangeKind::FieldSet | ChangeKind::FieldDel => {
            let hash = shared.store.hgetall(&event.key).await?;
            (!hash.is_empty()).then_some(hash)
        }
    };

    let mut guard = shared.state.lock().await;
    let state = &mut *guard;
    let Some(entry) = state.tables.get_mut(&info.name) else {
        return Ok(());
    };
    let data = Arc::make_mut(&mut entry.data);
    match fields {
        Some(fields) => {
            data.insert(key.to_string(), fields);
        }
        None => {
            data.remove(key);
        }
    }
    state.stats.key_refreshes += 1;
    Ok(())
}
