/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use svcdisc_store::ArcStoreConnector;

use super::{ArcAddressSink, Resolver};
use crate::config::ResolverConfig;

/// A parsed target descriptor of the form `scheme://authority/endpoint`,
/// e.g. `etcd:///internal-app`. The authority part is ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub endpoint: String,
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| anyhow!("no scheme delimiter in target {s}"))?;
        if scheme.is_empty() {
            return Err(anyhow!("empty scheme in target {s}"));
        }
        let endpoint = match rest.split_once('/') {
            Some((_authority, endpoint)) => endpoint,
            None => rest,
        };
        if endpoint.is_empty() {
            return Err(anyhow!("empty endpoint in target {s}"));
        }
        Ok(Target {
            scheme: scheme.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

/// Builds one resolver per logical target, each bound to this factory's
/// discovery key prefix and store.
pub struct ResolverFactory {
    scheme: String,
    prefix: String,
    connector: ArcStoreConnector,
    config: ResolverConfig,
}

impl ResolverFactory {
    pub fn new<S: Into<String>>(
        scheme: S,
        prefix: S,
        connector: ArcStoreConnector,
        config: ResolverConfig,
    ) -> Self {
        ResolverFactory {
            scheme: scheme.into(),
            prefix: prefix.into(),
            connector,
            config,
        }
    }

    #[inline]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub async fn build(&self, target: &Target, sink: ArcAddressSink) -> anyhow::Result<Resolver> {
        if target.scheme != self.scheme {
            return Err(anyhow!(
                "target scheme {} does not match factory scheme {}",
                target.scheme,
                self.scheme
            ));
        }
        let store = self.connector.connect().await?;
        let resolver = Resolver::build(store, &self.prefix, sink, self.config.clone()).await?;
        Ok(resolver)
    }
}

/// Routes target descriptors to resolver factories by scheme. An explicit
/// object handed to the RPC client, not process-global state.
#[derive(Default)]
pub struct ResolverRegistry {
    inner: Mutex<HashMap<String, Arc<ResolverFactory>>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        ResolverRegistry::default()
    }

    /// Register a factory under its scheme, replacing any previous one.
    pub fn register(&self, factory: ResolverFactory) {
        let mut ht = self.inner.lock().unwrap();
        ht.insert(factory.scheme().to_string(), Arc::new(factory));
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<ResolverFactory>> {
        let ht = self.inner.lock().unwrap();
        ht.get(scheme).cloned()
    }

    pub async fn build(&self, target: &str, sink: ArcAddressSink) -> anyhow::Result<Resolver> {
        let target = Target::from_str(target)?;
        let factory = self
            .get(&target.scheme)
            .ok_or_else(|| anyhow!("no resolver factory for scheme {}", target.scheme))?;
        factory.build(&target, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target() {
        let target = Target::from_str("etcd:///internal-app").unwrap();
        assert_eq!(target.scheme, "etcd");
        assert_eq!(target.endpoint, "internal-app");

        let target = Target::from_str("etcd://127.0.0.1:2379/internal-app").unwrap();
        assert_eq!(target.scheme, "etcd");
        assert_eq!(target.endpoint, "internal-app");

        let target = Target::from_str("dns://calc").unwrap();
        assert_eq!(target.scheme, "dns");
        assert_eq!(target.endpoint, "calc");
    }

    #[test]
    fn parse_invalid_target() {
        assert!(Target::from_str("internal-app").is_err());
        assert!(Target::from_str("://internal-app").is_err());
        assert!(Target::from_str("etcd:///").is_err());
    }
}
