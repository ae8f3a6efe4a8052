/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use svcdisc_store::StoreError;

mod set;
pub(crate) use set::AddressSet;

mod resolve;
pub use resolve::Resolver;

mod registry;
pub use registry::{ResolverFactory, ResolverRegistry, Target};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// A resolved service instance address with its pass-through metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub address: String,
    pub weight: String,
}

/// Where a resolver publishes every change of its address set. Implemented
/// by the RPC layer that balances connections over the addresses.
pub trait AddressSink: Send + Sync {
    fn update_state(&self, addresses: Vec<ResolvedAddress>);
}

pub type ArcAddressSink = Arc<dyn AddressSink>;

/// Address sink backed by a watch channel, for consumers that poll the
/// latest state instead of receiving callbacks.
pub struct WatchStateSink {
    tx: watch::Sender<Vec<ResolvedAddress>>,
}

impl WatchStateSink {
    pub fn new() -> (Arc<Self>, watch::Receiver<Vec<ResolvedAddress>>) {
        let (tx, rx) = watch::channel(Vec::new());
        (Arc::new(WatchStateSink { tx }), rx)
    }
}

impl AddressSink for WatchStateSink {
    fn update_state(&self, addresses: Vec<ResolvedAddress>) {
        self.tx.send_replace(addresses);
    }
}
