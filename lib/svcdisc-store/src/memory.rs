/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

use super::{
    BoxedStoreClient, KeepAliveStream, KvPair, LeaseId, LeaseRenewal, StoreClient, StoreConnector,
    StoreError, WatchEvent, WatchEventKind, WatchStream,
};

/// An in-process store implementing the full client contract, for tests and
/// single-process deployments.
///
/// Clones share the same underlying state, so one clone per component gives
/// each component its own connection to a common store, the same way separate
/// network clients would.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreShared>>,
}

#[derive(Default)]
struct StoreShared {
    kv: BTreeMap<String, KvEntry>,
    leases: HashMap<LeaseId, LeaseEntry>,
    watchers: Vec<Watcher>,
    next_lease: i64,
    unavailable: bool,
}

struct KvEntry {
    value: String,
    lease: Option<LeaseId>,
}

struct LeaseEntry {
    ttl: u64,
    keep_alive: Vec<mpsc::UnboundedSender<LeaseRenewal>>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<Vec<WatchEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Make every store call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Expire a lease immediately: its keys are removed with delete events
    /// and its keepalive streams terminate.
    pub fn expire_lease(&self, lease: LeaseId) {
        let mut shared = self.inner.lock().unwrap();
        if shared.leases.contains_key(&lease) {
            Self::expire_locked(&mut shared, lease);
        }
    }

    /// Terminate every open watch subscription without touching the data.
    pub fn drop_watchers(&self) {
        self.inner.lock().unwrap().watchers.clear();
    }

    pub fn lease_ids(&self) -> Vec<LeaseId> {
        self.inner.lock().unwrap().leases.keys().copied().collect()
    }

    fn check_available(shared: &StoreShared) -> Result<(), StoreError> {
        if shared.unavailable {
            Err(StoreError::Unavailable("injected fault".to_string()))
        } else {
            Ok(())
        }
    }

    fn expire_locked(shared: &mut StoreShared, lease: LeaseId) {
        shared.leases.remove(&lease);
        let keys: Vec<String> = shared
            .kv
            .iter()
            .filter(|(_, entry)| entry.lease == Some(lease))
            .map(|(key, _)| key.clone())
            .collect();
        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = shared.kv.remove(&key) {
                events.push(WatchEvent {
                    kind: WatchEventKind::Delete,
                    key,
                    value: entry.value,
                });
            }
        }
        Self::notify_locked(shared, events);
        debug!("lease {lease} expired");
    }

    fn notify_locked(shared: &mut StoreShared, events: Vec<WatchEvent>) {
        if events.is_empty() {
            return;
        }
        shared.watchers.retain(|watcher| {
            let batch: Vec<WatchEvent> = events
                .iter()
                .filter(|ev| ev.key.starts_with(&watcher.prefix))
                .cloned()
                .collect();
            if batch.is_empty() {
                true
            } else {
                watcher.tx.send(batch).is_ok()
            }
        });
    }

    /// Send one renewal on every open keepalive stream of this lease. Returns
    /// false once the lease is gone, either expired here for lack of a
    /// listener or removed elsewhere.
    fn drive_lease(&self, lease: LeaseId) -> bool {
        let mut shared = self.inner.lock().unwrap();
        let Some(entry) = shared.leases.get_mut(&lease) else {
            return false;
        };
        let ttl = entry.ttl;
        entry
            .keep_alive
            .retain(|tx| tx.send(LeaseRenewal { id: lease, ttl }).is_ok());
        if entry.keep_alive.is_empty() {
            Self::expire_locked(&mut shared, lease);
            false
        } else {
            true
        }
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn grant(&self, ttl_seconds: u64) -> Result<LeaseId, StoreError> {
        let lease = {
            let mut shared = self.inner.lock().unwrap();
            Self::check_available(&shared)?;
            shared.next_lease += 1;
            let lease = LeaseId::new(shared.next_lease);
            shared.leases.insert(
                lease,
                LeaseEntry {
                    ttl: ttl_seconds,
                    keep_alive: Vec::new(),
                },
            );
            lease
        };

        // a lease with no open keepalive stream expires one ttl after the
        // last renewal cycle
        let store = self.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(ttl_seconds.max(1));
            loop {
                tokio::time::sleep(period).await;
                if !store.drive_lease(lease) {
                    return;
                }
            }
        });

        Ok(lease)
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut shared = self.inner.lock().unwrap();
        Self::check_available(&shared)?;
        if !shared.leases.contains_key(&lease) {
            return Err(StoreError::LeaseNotFound(lease));
        }
        Self::expire_locked(&mut shared, lease);
        Ok(())
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream, StoreError> {
        let mut shared = self.inner.lock().unwrap();
        Self::check_available(&shared)?;
        let Some(entry) = shared.leases.get_mut(&lease) else {
            return Err(StoreError::LeaseNotFound(lease));
        };
        let (tx, rx) = mpsc::unbounded_channel();
        entry.keep_alive.push(tx);
        Ok(KeepAliveStream::new(rx))
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError> {
        let mut shared = self.inner.lock().unwrap();
        Self::check_available(&shared)?;
        if let Some(lease) = lease {
            if !shared.leases.contains_key(&lease) {
                return Err(StoreError::LeaseNotFound(lease));
            }
        }
        shared.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                lease,
            },
        );
        Self::notify_locked(
            &mut shared,
            vec![WatchEvent {
                kind: WatchEventKind::Upsert,
                key: key.to_string(),
                value: value.to_string(),
            }],
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut shared = self.inner.lock().unwrap();
        Self::check_available(&shared)?;
        if let Some(entry) = shared.kv.remove(key) {
            Self::notify_locked(
                &mut shared,
                vec![WatchEvent {
                    kind: WatchEventKind::Delete,
                    key: key.to_string(),
                    value: entry.value,
                }],
            );
        }
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        let shared = self.inner.lock().unwrap();
        Self::check_available(&shared)?;
        Ok(shared
            .kv
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KvPair {
                key: key.clone(),
                value: entry.value.clone(),
            })
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream, StoreError> {
        let mut shared = self.inner.lock().unwrap();
        Self::check_available(&shared)?;
        let (tx, rx) = mpsc::unbounded_channel();
        shared.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(WatchStream::new(rx))
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(&self) -> Result<BoxedStoreClient, StoreError> {
        let shared = self.inner.lock().unwrap();
        Self::check_available(&shared)?;
        drop(shared);
        Ok(Box::new(self.clone()))
    }
}

/// Explicit connector wrapper for when the store handle itself should not be
/// exposed as a connector.
pub struct MemoryStoreConnector {
    store: MemoryStore,
}

impl MemoryStoreConnector {
    pub fn new(store: MemoryStore) -> Self {
        MemoryStoreConnector { store }
    }
}

#[async_trait]
impl StoreConnector for MemoryStoreConnector {
    async fn connect(&self) -> Result<BoxedStoreClient, StoreError> {
        self.store.connect().await
    }
}
