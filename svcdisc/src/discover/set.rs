/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::ResolvedAddress;

/// The resolved addresses of one watched prefix, de-duplicated by network
/// address and kept in insertion order. Only the owning resolver task
/// mutates it.
#[derive(Default)]
pub(crate) struct AddressSet {
    inner: Vec<ResolvedAddress>,
}

impl AddressSet {
    /// Returns false if an entry with the same address is already present.
    pub(crate) fn insert(&mut self, addr: ResolvedAddress) -> bool {
        if self.inner.iter().any(|a| a.address == addr.address) {
            return false;
        }
        self.inner.push(addr);
        true
    }

    /// Returns false if no entry with this address was present.
    pub(crate) fn remove(&mut self, address: &str) -> bool {
        let len = self.inner.len();
        self.inner.retain(|a| a.address != address);
        self.inner.len() != len
    }

    pub(crate) fn snapshot(&self) -> Vec<ResolvedAddress> {
        self.inner.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(address: &str) -> ResolvedAddress {
        ResolvedAddress {
            address: address.to_string(),
            weight: "1".to_string(),
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let mut set = AddressSet::default();
        assert!(set.insert(addr("10.0.0.1:15626")));
        assert!(!set.insert(addr("10.0.0.1:15626")));
        assert_eq!(set.snapshot().len(), 1);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut set = AddressSet::default();
        set.insert(addr("10.0.0.1:15626"));
        assert!(!set.remove("10.0.0.2:15626"));
        assert_eq!(set.snapshot().len(), 1);
    }

    #[test]
    fn net_upsert_count_decides_membership() {
        let mut set = AddressSet::default();
        // interleaved events for independent addresses
        set.insert(addr("10.0.0.1:15626"));
        set.insert(addr("10.0.0.2:15626"));
        set.insert(addr("10.0.0.1:15626"));
        set.remove("10.0.0.2:15626");
        set.insert(addr("10.0.0.3:15626"));
        set.remove("10.0.0.2:15626");

        let snapshot = set.snapshot();
        let addresses: Vec<&str> = snapshot.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(addresses, ["10.0.0.1:15626", "10.0.0.3:15626"]);
    }

    #[test]
    fn keeps_insertion_order() {
        let mut set = AddressSet::default();
        set.insert(addr("c"));
        set.insert(addr("a"));
        set.insert(addr("b"));
        set.remove("a");
        set.insert(addr("a"));

        let snapshot = set.snapshot();
        let addresses: Vec<&str> = snapshot.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(addresses, ["c", "b", "a"]);
    }
}
