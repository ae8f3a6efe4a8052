/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

use svcdisc::config::{RegistrarConfig, ResolverConfig};
use svcdisc::discover::{
    AddressSink, ResolvedAddress, Resolver, ResolverFactory, ResolverRegistry, WatchStateSink,
};
use svcdisc::record::ServiceRecord;
use svcdisc::register::{RegisterError, Registrar};
use svcdisc_store::{MemoryStore, StoreClient, StoreError};

fn calc_record(address: &str) -> ServiceRecord {
    ServiceRecord::new("calc", "v1", address, "1", 5)
}

async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

/// Records every publish it receives.
#[derive(Default)]
struct CountingSink {
    states: Mutex<Vec<Vec<ResolvedAddress>>>,
}

impl CountingSink {
    fn publishes(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    fn last_state(&self) -> Vec<ResolvedAddress> {
        self.states.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl AddressSink for CountingSink {
    fn update_state(&self, addresses: Vec<ResolvedAddress>) {
        self.states.lock().unwrap().push(addresses);
    }
}

#[tokio::test]
async fn register_then_unregister_leaves_no_key() {
    let store = MemoryStore::new();
    let registrar = Registrar::spawn(Box::new(store.clone()), RegistrarConfig::default());

    let record = calc_record("10.0.0.1:15626");
    registrar.register(record.clone()).await.unwrap();

    let kvs = store.get_prefix("/calc/v1").await.unwrap();
    assert_eq!(kvs.len(), 1);
    assert_eq!(ServiceRecord::decode(&kvs[0].value).unwrap(), record);

    registrar.unregister(record).await.unwrap();
    assert!(store.get_prefix("/calc/v1").await.unwrap().is_empty());
    assert!(store.lease_ids().is_empty());

    registrar.stop().await;
}

#[tokio::test]
async fn two_instances_share_the_prefix() {
    let store = MemoryStore::new();
    let registrar = Registrar::spawn(Box::new(store.clone()), RegistrarConfig::default());

    registrar.register(calc_record("10.0.0.1:15626")).await.unwrap();
    registrar.register(calc_record("10.0.0.2:15626")).await.unwrap();

    let kvs = store.get_prefix("/calc/v1").await.unwrap();
    assert_eq!(kvs.len(), 2);

    registrar.stop().await;
}

#[tokio::test]
async fn stop_unregisters_every_record() {
    let store = MemoryStore::new();
    let registrar = Registrar::spawn(Box::new(store.clone()), RegistrarConfig::default());

    registrar.register(calc_record("10.0.0.1:15626")).await.unwrap();
    registrar.register(calc_record("10.0.0.2:15626")).await.unwrap();
    assert_eq!(store.get_prefix("/calc/v1").await.unwrap().len(), 2);

    registrar.stop().await;
    assert!(store.get_prefix("/calc/v1").await.unwrap().is_empty());
    assert!(store.lease_ids().is_empty());
}

#[tokio::test]
async fn dead_lease_is_rebound() {
    let store = MemoryStore::new();
    let mut config = RegistrarConfig::default();
    config.set_reconcile_interval(Duration::from_millis(20));
    let registrar = Registrar::spawn(Box::new(store.clone()), config);

    registrar.register(calc_record("10.0.0.1:15626")).await.unwrap();
    let old_leases = store.lease_ids();
    assert_eq!(old_leases.len(), 1);

    store.expire_lease(old_leases[0]);
    assert!(store.get_prefix("/calc/v1").await.unwrap().is_empty());

    sleep(Duration::from_millis(300)).await;
    assert_eq!(store.get_prefix("/calc/v1").await.unwrap().len(), 1);
    let new_leases = store.lease_ids();
    assert_eq!(new_leases.len(), 1);
    assert_ne!(new_leases[0], old_leases[0]);

    registrar.stop().await;
}

#[tokio::test]
async fn failed_registration_is_retried() {
    let store = MemoryStore::new();
    let mut config = RegistrarConfig::default();
    config.set_reconcile_interval(Duration::from_millis(20));
    let registrar = Registrar::spawn(Box::new(store.clone()), config);

    store.set_unavailable(true);
    let err = registrar
        .register(calc_record("10.0.0.1:15626"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::Store(StoreError::Unavailable(_))));

    store.set_unavailable(false);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(store.get_prefix("/calc/v1").await.unwrap().len(), 1);

    registrar.stop().await;
}

#[tokio::test]
async fn resolver_tracks_watch_events() {
    let store = MemoryStore::new();
    let r1 = ServiceRecord::new("calc", "v1", "10.0.0.1:15626", "7", 5);
    store
        .put(&r1.store_key(), &r1.encode().unwrap(), None)
        .await
        .unwrap();

    let (sink, state_rx) = WatchStateSink::new();
    let resolver = Resolver::build(
        Box::new(store.clone()),
        "/calc/v1",
        sink,
        ResolverConfig::default(),
    )
    .await
    .unwrap();

    // the initial scan was published before build returned
    {
        let state = state_rx.borrow();
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].address, "10.0.0.1:15626");
        assert_eq!(state[0].weight, "7");
    }

    let r2 = calc_record("10.0.0.2:15626");
    store
        .put(&r2.store_key(), &r2.encode().unwrap(), None)
        .await
        .unwrap();
    settle().await;
    assert_eq!(state_rx.borrow().len(), 2);

    store.delete(&r2.store_key()).await.unwrap();
    settle().await;
    {
        let state = state_rx.borrow();
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].address, "10.0.0.1:15626");
    }

    resolver.close().await;
}

#[tokio::test]
async fn upsert_then_delete_publishes_twice() {
    let store = MemoryStore::new();
    let sink = Arc::new(CountingSink::default());
    let resolver = Resolver::build(
        Box::new(store.clone()),
        "/calc/v1",
        sink.clone(),
        ResolverConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(sink.publishes(), 1);
    assert!(sink.last_state().is_empty());

    let record = calc_record("10.0.0.2:15626");
    let value = record.encode().unwrap();
    store.put(&record.store_key(), &value, None).await.unwrap();
    settle().await;
    assert_eq!(sink.publishes(), 2);

    // a duplicate upsert for a present address does not publish
    store.put(&record.store_key(), &value, None).await.unwrap();
    settle().await;
    assert_eq!(sink.publishes(), 2);

    store.delete(&record.store_key()).await.unwrap();
    settle().await;
    assert_eq!(sink.publishes(), 3);
    assert!(sink.last_state().is_empty());

    resolver.close().await;
}

#[tokio::test]
async fn malformed_values_are_dropped() {
    let store = MemoryStore::new();
    store.put("/calc/v1/bad", "not json", None).await.unwrap();

    let sink = Arc::new(CountingSink::default());
    let resolver = Resolver::build(
        Box::new(store.clone()),
        "/calc/v1",
        sink.clone(),
        ResolverConfig::default(),
    )
    .await
    .unwrap();
    assert!(sink.last_state().is_empty());

    store.put("/calc/v1/worse", "{}", None).await.unwrap();
    let good = calc_record("10.0.0.1:15626");
    store
        .put(&good.store_key(), &good.encode().unwrap(), None)
        .await
        .unwrap();
    settle().await;

    let state = sink.last_state();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].address, "10.0.0.1:15626");

    resolver.close().await;
}

#[tokio::test]
async fn resync_heals_lost_watch() {
    let store = MemoryStore::new();
    let (sink, state_rx) = WatchStateSink::new();
    let resolver = Resolver::build(
        Box::new(store.clone()),
        "/calc/v1",
        sink,
        ResolverConfig::default(),
    )
    .await
    .unwrap();

    store.drop_watchers();
    let record = calc_record("10.0.0.3:15626");
    store
        .put(&record.store_key(), &record.encode().unwrap(), None)
        .await
        .unwrap();

    // the resolver re-subscribes and rebuilds from a full scan
    sleep(Duration::from_millis(300)).await;
    let state = state_rx.borrow();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].address, "10.0.0.3:15626");
    drop(state);

    resolver.close().await;
}

#[tokio::test]
async fn resolve_now_forces_a_publish() {
    let store = MemoryStore::new();
    let sink = Arc::new(CountingSink::default());
    let resolver = Resolver::build(
        Box::new(store.clone()),
        "/calc/v1",
        sink.clone(),
        ResolverConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(sink.publishes(), 1);

    resolver.resolve_now();
    settle().await;
    assert_eq!(sink.publishes(), 2);

    resolver.close().await;
}

#[tokio::test]
async fn no_publish_after_close() {
    let store = MemoryStore::new();
    let sink = Arc::new(CountingSink::default());
    let resolver = Resolver::build(
        Box::new(store.clone()),
        "/calc/v1",
        sink.clone(),
        ResolverConfig::default(),
    )
    .await
    .unwrap();

    resolver.close().await;
    let publishes = sink.publishes();

    let record = calc_record("10.0.0.1:15626");
    store
        .put(&record.store_key(), &record.encode().unwrap(), None)
        .await
        .unwrap();
    settle().await;
    assert_eq!(sink.publishes(), publishes);
}

#[tokio::test]
async fn registry_routes_by_scheme() {
    let store = MemoryStore::new();
    let record = calc_record("10.0.0.1:15626");
    store
        .put(&record.store_key(), &record.encode().unwrap(), None)
        .await
        .unwrap();

    let registry = ResolverRegistry::new();
    registry.register(ResolverFactory::new(
        "etcd",
        "/calc/v1",
        Arc::new(store.clone()),
        ResolverConfig::default(),
    ));
    assert!(registry.get("etcd").is_some());
    assert!(registry.get("dns").is_none());

    let (sink, state_rx) = WatchStateSink::new();
    let resolver = registry.build("etcd:///internal-app", sink).await.unwrap();
    assert_eq!(state_rx.borrow().len(), 1);

    let (other_sink, _other_rx) = WatchStateSink::new();
    assert!(registry.build("dns:///internal-app", other_sink).await.is_err());

    resolver.close().await;
}

#[tokio::test]
async fn unavailable_store_fails_construction() {
    let store = MemoryStore::new();
    store.set_unavailable(true);

    let (sink, _state_rx) = WatchStateSink::new();
    assert!(
        Resolver::build(
            Box::new(store.clone()),
            "/calc/v1",
            sink,
            ResolverConfig::default(),
        )
        .await
        .is_err()
    );
}

#[tokio::test]
async fn end_to_end_discovery() {
    let store = MemoryStore::new();
    let registrar = Registrar::spawn(Box::new(store.clone()), RegistrarConfig::default());

    let (sink, state_rx) = WatchStateSink::new();
    let resolver = Resolver::build(
        Box::new(store.clone()),
        "/calc/v1",
        sink,
        ResolverConfig::default(),
    )
    .await
    .unwrap();
    assert!(state_rx.borrow().is_empty());

    let r1 = calc_record("10.0.0.1:15626");
    let r2 = calc_record("10.0.0.2:15626");
    registrar.register(r1.clone()).await.unwrap();
    registrar.register(r2.clone()).await.unwrap();
    settle().await;
    assert_eq!(state_rx.borrow().len(), 2);

    registrar.unregister(r1).await.unwrap();
    settle().await;
    {
        let state = state_rx.borrow();
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].address, "10.0.0.2:15626");
    }

    // a crashed server disappears within its lease window
    registrar.stop().await;
    settle().await;
    assert!(state_rx.borrow().is_empty());

    resolver.close().await;
}
