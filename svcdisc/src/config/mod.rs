/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

#[cfg(feature = "yaml")]
mod yaml;

const REGISTRAR_DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const REGISTRAR_DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

const RESOLVER_DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);
const RESOLVER_DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrarConfig {
    request_timeout: Duration,
    reconcile_interval: Duration,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        RegistrarConfig {
            request_timeout: REGISTRAR_DEFAULT_REQUEST_TIMEOUT,
            reconcile_interval: REGISTRAR_DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

impl RegistrarConfig {
    /// Upper bound on a single lease grant request.
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// How often the background loop checks every managed record for a lost
    /// or dead lease.
    pub fn set_reconcile_interval(&mut self, interval: Duration) {
        self.reconcile_interval = interval;
    }

    pub fn reconcile_interval(&self) -> Duration {
        self.reconcile_interval
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    resync_interval: Duration,
    retry_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            resync_interval: RESOLVER_DEFAULT_RESYNC_INTERVAL,
            retry_interval: RESOLVER_DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl ResolverConfig {
    /// How often the resolver rebuilds its address set from a full prefix
    /// scan, healing any missed events.
    pub fn set_resync_interval(&mut self, interval: Duration) {
        self.resync_interval = interval;
    }

    pub fn resync_interval(&self) -> Duration {
        self.resync_interval
    }

    /// Pause before retrying a failed watch re-subscription.
    pub fn set_retry_interval(&mut self, interval: Duration) {
        self.retry_interval = interval;
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}
