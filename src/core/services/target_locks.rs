use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Serializes operations that touch the same supplier, party, or invoice.
///
/// Two concurrent read-modify-write cycles against one order would otherwise
/// both read the same payment list and the later write would drop the earlier
/// record. Every call that rewrites an order's or invoice's payment lists
/// must lock that order's counterparty or that invoice. Locks are
/// process-local; separate processes sharing one store are not coordinated.
#[derive(Debug, Clone, Default)]
pub struct TargetLocks {
    slots: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        trace!(key, "waiting for target lock");
        slot.lock_owned().await
    }

    /// Number of keys that have been locked at least once.
    pub fn tracked(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.len())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_waits_for_release() {
        let locks = TargetLocks::new();
        let guard = locks.lock("supplier:Acme").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("supplier:Acme").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("lock released")
            .unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = TargetLocks::new();
        let _supplier = locks.lock("supplier:Acme").await;
        let _party = locks.lock("party:Globex").await;
        assert_eq!(locks.tracked(), 2);
    }
}
