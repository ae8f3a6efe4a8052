/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, yaml};

use super::{RegistrarConfig, ResolverConfig};
use crate::record::ServiceRecord;

const RECORD_DEFAULT_WEIGHT: &str = "1";
const RECORD_DEFAULT_TTL: u64 = 5;

impl RegistrarConfig {
    pub fn parse_yaml_conf(map: &yaml::Hash) -> anyhow::Result<Self> {
        let mut config = RegistrarConfig::default();
        foreach_kv(map, |k, v| config.set_yaml(k, v))?;
        Ok(config)
    }

    fn set_yaml(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "request_timeout" => {
                self.request_timeout = as_seconds(v)?;
                Ok(())
            }
            "reconcile_interval" => {
                self.reconcile_interval = as_seconds(v)?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }
}

impl ResolverConfig {
    pub fn parse_yaml_conf(map: &yaml::Hash) -> anyhow::Result<Self> {
        let mut config = ResolverConfig::default();
        foreach_kv(map, |k, v| config.set_yaml(k, v))?;
        Ok(config)
    }

    fn set_yaml(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "resync_interval" => {
                self.resync_interval = as_seconds(v)?;
                Ok(())
            }
            "retry_interval" => {
                self.retry_interval = as_seconds(v)?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }
}

impl ServiceRecord {
    pub fn parse_yaml_conf(map: &yaml::Hash) -> anyhow::Result<Self> {
        let mut record = ServiceRecord::new("", "", "", RECORD_DEFAULT_WEIGHT, RECORD_DEFAULT_TTL);
        foreach_kv(map, |k, v| record.set_yaml(k, v))?;
        record.check_yaml()?;
        Ok(record)
    }

    fn set_yaml(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "name" => {
                self.name = as_string(v)?;
                Ok(())
            }
            "version" => {
                self.version = as_string(v)?;
                Ok(())
            }
            "address" | "addr" => {
                self.address = as_string(v)?;
                Ok(())
            }
            "weight" => {
                self.weight = as_string(v)?;
                Ok(())
            }
            "ttl" => {
                self.ttl = as_u64(v)?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }

    fn check_yaml(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow!("name is not set"));
        }
        if self.version.is_empty() {
            return Err(anyhow!("version is not set"));
        }
        if self.address.is_empty() {
            return Err(anyhow!("address is not set"));
        }
        if self.ttl == 0 {
            return Err(anyhow!("ttl should not be zero"));
        }
        Ok(())
    }
}

fn foreach_kv<F>(map: &yaml::Hash, mut f: F) -> anyhow::Result<()>
where
    F: FnMut(&str, &Yaml) -> anyhow::Result<()>,
{
    for (k, v) in map.iter() {
        let Yaml::String(key) = k else {
            return Err(anyhow!("the config key should be a string"));
        };
        f(key, v).context(format!("invalid value for key {key}"))?;
    }
    Ok(())
}

fn as_string(v: &Yaml) -> anyhow::Result<String> {
    match v {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Integer(i) => Ok(i.to_string()),
        _ => Err(anyhow!("yaml value type for string should be string")),
    }
}

fn as_u64(v: &Yaml) -> anyhow::Result<u64> {
    match v {
        Yaml::Integer(i) => {
            u64::try_from(*i).map_err(|_| anyhow!("the value should not be negative"))
        }
        Yaml::String(s) => s
            .parse::<u64>()
            .map_err(|e| anyhow!("invalid u64 string: {e}")),
        _ => Err(anyhow!("yaml value type for u64 should be integer")),
    }
}

fn as_seconds(v: &Yaml) -> anyhow::Result<Duration> {
    as_u64(v).map(Duration::from_secs)
}
