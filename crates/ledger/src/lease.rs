//! In-process leases serialising writes to the same entity.
//!
//! A lease is taken before a write scope opens and released when the
//! returned [`Lease`] drops. A second request for a held key is rejected with
//! [`LedgerError::ConcurrentModification`] instead of waiting.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{LedgerError, ResultLedger};

pub(crate) fn transfer_key(idx: i32) -> String {
    format!("transfer:{idx}")
}

pub(crate) fn invoice_key(recipient_id: &str) -> String {
    format!("invoice:{recipient_id}")
}

pub(crate) fn asset_key(asset_id: &str) -> String {
    format!("asset:{asset_id}")
}

pub(crate) const CHAIN_KEY: &str = "chain";

#[derive(Debug, Default)]
pub(crate) struct LeaseRegistry {
    held: Arc<Mutex<HashSet<String>>>,
}

impl LeaseRegistry {
    /// Take every key in `keys` or none of them.
    pub(crate) fn acquire<I>(&self, keys: I) -> ResultLedger<Lease>
    where
        I: IntoIterator<Item = String>,
    {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(busy) = keys.iter().find(|k| held.contains(*k)) {
            return Err(LedgerError::ConcurrentModification(format!(
                "{busy} is being modified"
            )));
        }
        held.extend(keys.iter().cloned());

        Ok(Lease {
            held: Arc::clone(&self.held),
            keys,
        })
    }

    pub(crate) fn acquire_one(&self, key: String) -> ResultLedger<Lease> {
        self.acquire([key])
    }

    #[cfg(test)]
    fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

#[derive(Debug)]
#[must_use = "the lease is released when dropped"]
pub(crate) struct Lease {
    held: Arc<Mutex<HashSet<String>>>,
    keys: Vec<String>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_for_same_key_is_rejected() {
        let registry = LeaseRegistry::default();
        let lease = registry.acquire_one(transfer_key(1)).unwrap();

        let err = registry.acquire_one(transfer_key(1)).unwrap_err();
        assert!(err.is_retryable());
        assert!(registry.acquire_one(transfer_key(2)).is_ok());

        drop(lease);
        assert!(!registry.is_held(&transfer_key(1)));
        assert!(registry.acquire_one(transfer_key(1)).is_ok());
    }

    #[test]
    fn multi_key_acquire_is_all_or_nothing() {
        let registry = LeaseRegistry::default();
        let _held = registry.acquire_one(invoice_key("utxob:a")).unwrap();

        let result = registry.acquire([transfer_key(7), invoice_key("utxob:a")]);
        assert!(result.is_err());
        assert!(!registry.is_held(&transfer_key(7)));
    }

    #[test]
    fn duplicate_keys_in_one_request_are_merged() {
        let registry = LeaseRegistry::default();
        let lease = registry
            .acquire([asset_key("a"), asset_key("a")])
            .unwrap();
        drop(lease);
        assert!(!registry.is_held(&asset_key("a")));
    }
}
