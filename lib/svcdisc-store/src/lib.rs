/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

mod memory;
pub use memory::{MemoryStore, MemoryStoreConnector};

/// A TTL bound token granted by the store. Keys attached to it are removed
/// when it expires or is revoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeaseId(i64);

impl LeaseId {
    pub(crate) fn new(id: i64) -> Self {
        LeaseId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out")]
    RequestTimeout,
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventKind {
    Upsert,
    Delete,
}

/// A single change event for a watched key.
///
/// For `Delete` events the `value` field carries the previous value of the
/// key, so consumers can identify what was removed.
#[derive(Clone, Debug)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
    pub value: String,
}

/// One renewal response on a keepalive stream. A `ttl` of zero means the
/// lease is already gone.
#[derive(Clone, Copy, Debug)]
pub struct LeaseRenewal {
    pub id: LeaseId,
    pub ttl: u64,
}

pub enum RenewalPoll {
    /// No renewal pending, the lease is assumed healthy.
    Pending,
    Renewal(LeaseRenewal),
    /// The stream has terminated, the lease is no longer kept alive.
    Terminated,
}

pub struct KeepAliveStream {
    rx: mpsc::UnboundedReceiver<LeaseRenewal>,
}

impl KeepAliveStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<LeaseRenewal>) -> Self {
        KeepAliveStream { rx }
    }

    /// Drain at most one pending renewal without blocking.
    pub fn try_recv(&mut self) -> RenewalPoll {
        use mpsc::error::TryRecvError;

        match self.rx.try_recv() {
            Ok(renewal) => RenewalPoll::Renewal(renewal),
            Err(TryRecvError::Empty) => RenewalPoll::Pending,
            Err(TryRecvError::Disconnected) => RenewalPoll::Terminated,
        }
    }

    pub async fn recv(&mut self) -> Option<LeaseRenewal> {
        self.rx.recv().await
    }
}

pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<Vec<WatchEvent>>,
}

impl WatchStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Vec<WatchEvent>>) -> Self {
        WatchStream { rx }
    }

    /// Receive the next batch of events. `None` means the subscription has
    /// terminated and a new one is needed.
    pub async fn recv(&mut self) -> Option<Vec<WatchEvent>> {
        self.rx.recv().await
    }
}

/// The operations the discovery layer needs from the backing store.
///
/// Watch subscriptions always carry previous-value information on delete
/// events. Event batches on one stream are delivered in store order.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn grant(&self, ttl_seconds: u64) -> Result<LeaseId, StoreError>;

    /// Revoke a lease and remove all keys attached to it.
    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError>;

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream, StoreError>;

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError>;

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream, StoreError>;
}

pub type BoxedStoreClient = Box<dyn StoreClient>;

/// Hands out store clients. Each component connects its own client and never
/// shares it with another component.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<BoxedStoreClient, StoreError>;
}

pub type ArcStoreConnector = Arc<dyn StoreConnector>;
