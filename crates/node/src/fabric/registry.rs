// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::FaultCode;

/// Handles that can report their mailbox depth for load accounting.
pub trait MailboxProbe {
    fn mailbox_depth(&self) -> usize;
}

/// A namespaced name → handle map with O(1) lookup.
///
/// Sensors use a node-local namespace with a capacity limit; rooms use a
/// cluster-wide namespace (uniqueness across nodes is arbitrated by the
/// gossip layer, the local registry only tracks workers hosted here).
pub struct Registry<H> {
    namespace: &'static str,
    limit: Option<usize>,
    entries: RwLock<HashMap<String, H>>,
}

impl<H: Clone> Registry<H> {
    pub fn new(namespace: &'static str, limit: Option<usize>) -> Self {
        Self { namespace, limit, entries: RwLock::new(HashMap::new()) }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// O(1) handle lookup.
    pub fn resolve(&self, key: &str) -> Option<H> {
        self.entries.read().get(key).cloned()
    }

    /// Return the existing handle, or build and register one. The bool is
    /// true when a new handle was created. Idempotent per key.
    pub fn get_or_register(
        &self,
        key: &str,
        build: impl FnOnce() -> H,
    ) -> Result<(H, bool), FaultCode> {
        if let Some(existing) = self.resolve(key) {
            return Ok((existing, false));
        }
        let mut entries = self.entries.write();
        // Re-check under the write lock; a racing caller may have won.
        if let Some(existing) = entries.get(key) {
            return Ok((existing.clone(), false));
        }
        if self.limit.is_some_and(|limit| entries.len() >= limit) {
            return Err(FaultCode::SensorCapacityExhausted);
        }
        let handle = build();
        entries.insert(key.to_owned(), handle.clone());
        Ok((handle, true))
    }

    pub fn deregister(&self, key: &str) -> Option<H> {
        self.entries.write().remove(key)
    }

    /// Enumerate registered keys (observability).
    pub fn children(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<H: Clone + MailboxProbe> Registry<H> {
    /// Deepest mailbox across all registered workers.
    pub fn max_mailbox_depth(&self) -> usize {
        self.entries.read().values().map(MailboxProbe::mailbox_depth).max().unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
