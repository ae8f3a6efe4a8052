/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use log::{debug, warn};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use svcdisc_store::{BoxedStoreClient, KeepAliveStream, LeaseId, RenewalPoll, StoreError};

use crate::config::RegistrarConfig;
use crate::record::{RecordError, ServiceRecord};

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("invalid record encoding: {0}")]
    Encoding(#[from] RecordError),
    #[error("registrar already stopped")]
    Stopped,
}

enum Command {
    Register(ServiceRecord, oneshot::Sender<Result<(), RegisterError>>),
    Unregister(ServiceRecord, oneshot::Sender<Result<(), RegisterError>>),
}

/// Publishes service records under leases and keeps them alive.
///
/// The managed record set and all lease bindings are owned by a single
/// background task; this handle only passes messages to it. A record whose
/// registration failed, or whose lease later dies, is re-registered by the
/// task's reconciliation loop.
pub struct Registrar {
    cmd_tx: mpsc::UnboundedSender<Command>,
    quit_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Registrar {
    pub fn spawn(store: BoxedStoreClient, config: RegistrarConfig) -> Registrar {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (quit_tx, quit_rx) = watch::channel(false);
        let task = RegistrarTask {
            store,
            config,
            records: Vec::new(),
            leases: FxHashMap::default(),
            keep_alive: FxHashMap::default(),
        };
        let handle = tokio::spawn(task.run(quit_rx, cmd_rx));
        Registrar {
            cmd_tx,
            quit_tx,
            handle,
        }
    }

    /// Add the record to the managed set and publish it under a fresh lease.
    ///
    /// On partial failure the lease, if already granted, is left to expire on
    /// its own; calling `register` again repairs the state.
    pub async fn register(&self, record: ServiceRecord) -> Result<(), RegisterError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register(record, done_tx))
            .map_err(|_| RegisterError::Stopped)?;
        done_rx.await.map_err(|_| RegisterError::Stopped)?
    }

    /// Drop the record from the managed set and remove it from the store,
    /// preferring lease revocation over a direct key delete.
    pub async fn unregister(&self, record: ServiceRecord) -> Result<(), RegisterError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Unregister(record, done_tx))
            .map_err(|_| RegisterError::Stopped)?;
        done_rx.await.map_err(|_| RegisterError::Stopped)?
    }

    /// Signal the background task to unregister every managed record and
    /// wait for it to exit.
    pub async fn stop(self) {
        let _ = self.quit_tx.send(true);
        let _ = self.handle.await;
    }
}

struct RegistrarTask {
    store: BoxedStoreClient,
    config: RegistrarConfig,
    records: Vec<ServiceRecord>,
    leases: FxHashMap<String, LeaseId>,
    keep_alive: FxHashMap<String, KeepAliveStream>,
}

impl RegistrarTask {
    async fn run(
        mut self,
        mut quit_rx: watch::Receiver<bool>,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        debug!("registrar started");
        let period = self.config.reconcile_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = quit_rx.changed() => break,
                r = cmd_rx.recv() => match r {
                    Some(Command::Register(record, done)) => {
                        let _ = done.send(self.handle_register(record).await);
                    }
                    Some(Command::Unregister(record, done)) => {
                        let _ = done.send(self.handle_unregister(&record).await);
                    }
                    None => break,
                },
                _ = ticker.tick() => self.reconcile().await,
            }
        }

        self.shutdown().await;
        debug!("registrar stopped");
    }

    async fn handle_register(&mut self, record: ServiceRecord) -> Result<(), RegisterError> {
        // join the managed set first, so a failed attempt below is retried
        // by the next reconcile tick
        let key = record.store_key();
        match self.records.iter_mut().find(|r| r.store_key() == key) {
            Some(managed) => *managed = record.clone(),
            None => self.records.push(record.clone()),
        }
        self.register_record(&record).await
    }

    async fn register_record(&mut self, record: &ServiceRecord) -> Result<(), RegisterError> {
        let key = record.store_key();
        let value = record.encode()?;

        let lease = tokio::time::timeout(self.config.request_timeout(), self.store.grant(record.ttl))
            .await
            .map_err(|_| StoreError::RequestTimeout)??;
        self.leases.insert(key.clone(), lease);

        let stream = self.store.keep_alive(lease).await?;
        self.keep_alive.insert(key.clone(), stream);

        self.store.put(&key, &value, Some(lease)).await?;
        debug!("registered {key} under lease {lease}");
        Ok(())
    }

    async fn handle_unregister(&mut self, record: &ServiceRecord) -> Result<(), RegisterError> {
        let key = record.store_key();
        self.records.retain(|r| r.store_key() != key);
        self.unregister_record(record).await
    }

    async fn unregister_record(&mut self, record: &ServiceRecord) -> Result<(), RegisterError> {
        let key = record.store_key();
        self.keep_alive.remove(&key);
        if let Some(lease) = self.leases.remove(&key) {
            match self.store.revoke(lease).await {
                Ok(_) => {
                    debug!("revoked lease {lease} of {key}");
                    return Ok(());
                }
                Err(e) => warn!("failed to revoke lease {lease} of {key}: {e}"),
            }
        }
        self.store.delete(&key).await?;
        debug!("deleted {key}");
        Ok(())
    }

    async fn reconcile(&mut self) {
        for i in 0..self.records.len() {
            let record = self.records[i].clone();
            let key = record.store_key();
            let rebind = match self.keep_alive.get_mut(&key) {
                None => true,
                Some(stream) => match stream.try_recv() {
                    RenewalPoll::Pending => false,
                    RenewalPoll::Renewal(renewal) => renewal.ttl == 0,
                    RenewalPoll::Terminated => true,
                },
            };
            if !rebind {
                continue;
            }

            self.keep_alive.remove(&key);
            self.leases.remove(&key);
            if let Err(e) = self.register_record(&record).await {
                warn!("failed to re-register {key}: {e}");
            }
        }
    }

    async fn shutdown(&mut self) {
        for record in std::mem::take(&mut self.records) {
            let key = record.store_key();
            match self.unregister_record(&record).await {
                Ok(_) => debug!("unregistered {key}"),
                Err(e) => warn!("failed to unregister {key}: {e}"),
            }
        }
    }
}
