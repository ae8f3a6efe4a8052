/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("record value is not a json object")]
    InvalidFormat,
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid value for field {0}")]
    InvalidField(&'static str),
}

/// The durable description of one service instance, stored as the value of
/// its discovery key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub version: String,
    pub address: String,
    /// Opaque metadata passed through to the address consumer.
    pub weight: String,
    /// Requested lease duration in seconds.
    pub ttl: u64,
}

impl ServiceRecord {
    pub fn new<S: Into<String>>(name: S, version: S, address: S, weight: S, ttl: u64) -> Self {
        ServiceRecord {
            name: name.into(),
            version: version.into(),
            address: address.into(),
            weight: weight.into(),
            ttl,
        }
    }

    /// The prefix scanned and watched to enumerate all instances of this
    /// service.
    pub fn discovery_key(&self) -> String {
        format!("/{}/{}", self.name, self.version)
    }

    /// The per-instance store key. The address is part of the key so that two
    /// instances of the same service and version do not overwrite each other.
    pub fn store_key(&self) -> String {
        format!("/{}/{}/{}", self.name, self.version, self.address)
    }

    pub fn encode(&self) -> Result<String, RecordError> {
        let mut map = Map::new();
        map.insert("Name".to_string(), Value::String(self.name.clone()));
        map.insert("addr".to_string(), Value::String(self.address.clone()));
        map.insert("weight".to_string(), Value::String(self.weight.clone()));
        map.insert("version".to_string(), Value::String(self.version.clone()));
        map.insert("ttl".to_string(), Value::from(self.ttl));
        serde_json::to_string(&Value::Object(map)).map_err(RecordError::InvalidJson)
    }

    /// Decode a store value. Unknown fields are ignored, missing or ill-typed
    /// required fields are an error.
    pub fn decode(value: &str) -> Result<Self, RecordError> {
        let parsed: Value = serde_json::from_str(value)?;
        let Value::Object(map) = parsed else {
            return Err(RecordError::InvalidFormat);
        };
        Ok(ServiceRecord {
            name: get_str(&map, "Name")?,
            version: get_str(&map, "version")?,
            address: get_str(&map, "addr")?,
            weight: get_str(&map, "weight")?,
            ttl: get_u64(&map, "ttl")?,
        })
    }
}

fn get_str(map: &Map<String, Value>, field: &'static str) -> Result<String, RecordError> {
    match map.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(RecordError::InvalidField(field)),
        None => Err(RecordError::MissingField(field)),
    }
}

fn get_u64(map: &Map<String, Value>, field: &'static str) -> Result<u64, RecordError> {
    match map.get(field) {
        Some(v) => v.as_u64().ok_or(RecordError::InvalidField(field)),
        None => Err(RecordError::MissingField(field)),
    }
}
