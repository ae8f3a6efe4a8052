/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use log::{debug, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use svcdisc_store::{BoxedStoreClient, WatchEvent, WatchEventKind, WatchStream};

use super::{AddressSet, ArcAddressSink, ResolveError, ResolvedAddress};
use crate::config::ResolverConfig;
use crate::record::ServiceRecord;

/// Maintains a live address set for one discovery key prefix.
///
/// Construction performs the initial full scan and publishes it; afterwards a
/// background task applies watch events incrementally and rebuilds the set
/// from a full scan on a fixed interval, publishing every change to the sink.
pub struct Resolver {
    quit_tx: watch::Sender<bool>,
    refresh_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Resolver {
    pub async fn build(
        store: BoxedStoreClient,
        prefix: &str,
        sink: ArcAddressSink,
        config: ResolverConfig,
    ) -> Result<Resolver, ResolveError> {
        let watch_stream = store.watch_prefix(prefix).await?;
        let mut task = ResolverTask {
            store,
            prefix: prefix.to_string(),
            watch: watch_stream,
            addresses: AddressSet::default(),
            sink,
            config,
        };
        task.sync().await?;

        let (quit_tx, quit_rx) = watch::channel(false);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let handle = tokio::spawn(task.run(quit_rx, refresh_rx));
        Ok(Resolver {
            quit_tx,
            refresh_tx,
            handle,
        })
    }

    /// Request an out-of-band full resync. Non-blocking; collapses into an
    /// already pending request.
    pub fn resolve_now(&self) {
        let _ = self.refresh_tx.try_send(());
    }

    /// Stop the background task and wait for it to exit. No publish to the
    /// sink happens after this returns.
    pub async fn close(self) {
        let _ = self.quit_tx.send(true);
        let _ = self.handle.await;
    }
}

enum Action {
    Quit,
    Sync,
    Batch(Option<Vec<WatchEvent>>),
}

struct ResolverTask {
    store: BoxedStoreClient,
    prefix: String,
    watch: WatchStream,
    addresses: AddressSet,
    sink: ArcAddressSink,
    config: ResolverConfig,
}

impl ResolverTask {
    async fn run(mut self, mut quit_rx: watch::Receiver<bool>, mut refresh_rx: mpsc::Receiver<()>) {
        debug!("resolver of {} started", self.prefix);
        let period = self.config.resync_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let action = tokio::select! {
                biased;
                _ = quit_rx.changed() => Action::Quit,
                r = refresh_rx.recv() => match r {
                    Some(_) => Action::Sync,
                    None => Action::Quit,
                },
                batch = self.watch.recv() => Action::Batch(batch),
                _ = ticker.tick() => Action::Sync,
            };

            match action {
                Action::Quit => break,
                Action::Sync => {
                    if let Err(e) = self.sync().await {
                        warn!("resolver of {} failed to resync: {e}", self.prefix);
                    }
                }
                Action::Batch(Some(events)) => self.apply(events),
                Action::Batch(None) => self.rewatch().await,
            }
        }
        debug!("resolver of {} stopped", self.prefix);
    }

    fn apply(&mut self, events: Vec<WatchEvent>) {
        for event in events {
            match event.kind {
                WatchEventKind::Upsert => {
                    let record = match ServiceRecord::decode(&event.value) {
                        Ok(record) => record,
                        Err(e) => {
                            debug!(
                                "resolver of {} dropped malformed value at {}: {e}",
                                self.prefix, event.key
                            );
                            continue;
                        }
                    };
                    if self.addresses.insert(ResolvedAddress {
                        address: record.address,
                        weight: record.weight,
                    }) {
                        self.publish();
                    }
                }
                WatchEventKind::Delete => {
                    // the event value is the previous value of the key
                    let record = match ServiceRecord::decode(&event.value) {
                        Ok(record) => record,
                        Err(e) => {
                            debug!(
                                "resolver of {} dropped malformed value at {}: {e}",
                                self.prefix, event.key
                            );
                            continue;
                        }
                    };
                    self.addresses.remove(&record.address);
                    self.publish();
                }
            }
        }
    }

    /// Rebuild the address set from a full prefix scan and publish it,
    /// overriding whatever incremental state was accumulated.
    async fn sync(&mut self) -> Result<(), ResolveError> {
        let kvs = self.store.get_prefix(&self.prefix).await?;
        let mut addresses = AddressSet::default();
        for kv in kvs {
            match ServiceRecord::decode(&kv.value) {
                Ok(record) => {
                    addresses.insert(ResolvedAddress {
                        address: record.address,
                        weight: record.weight,
                    });
                }
                Err(e) => debug!(
                    "resolver of {} skipped malformed value at {}: {e}",
                    self.prefix, kv.key
                ),
            }
        }
        self.addresses = addresses;
        self.publish();
        Ok(())
    }

    async fn rewatch(&mut self) {
        warn!("resolver of {}: watch stream terminated", self.prefix);
        match self.store.watch_prefix(&self.prefix).await {
            Ok(stream) => {
                self.watch = stream;
                // heal whatever was missed while unsubscribed
                if let Err(e) = self.sync().await {
                    warn!("resolver of {} failed to resync: {e}", self.prefix);
                }
            }
            Err(e) => {
                warn!("resolver of {} failed to re-subscribe: {e}", self.prefix);
                tokio::time::sleep(self.config.retry_interval()).await;
            }
        }
    }

    fn publish(&self) {
        self.sink.update_state(self.addresses.snapshot());
    }
}
