//! Row-level locking for ledger operations
//!
//! Every operation acquires exclusive locks on the rows it will mutate
//! before reading them, and holds them until commit or abort. Deadlock is
//! prevented by a fixed total acquisition order: escrow rows first (by id),
//! then account rows (ascending user id), then the treasury last. The
//! treasury is the hotspot, so it is always the final lock taken.
//!
//! Acquisition is bounded; an expired wait surfaces as [`Error::LockTimeout`],
//! the one error callers are expected to retry.

use crate::{
    error::{Error, Result},
    types::UserId,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Duration;
use uuid::Uuid;

/// Identity of a lockable row
///
/// The derived `Ord` gives the global acquisition order: `Escrow` before
/// `Account` before `Treasury`, and ascending ids within a variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum LockKey {
    /// An escrow hold row
    Escrow(Uuid),
    /// A user's balance row
    Account(UserId),
    /// The treasury singleton
    Treasury,
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKey::Escrow(id) => write!(f, "escrow:{}", id),
            LockKey::Account(user_id) => write!(f, "account:{}", user_id),
            LockKey::Treasury => write!(f, "treasury"),
        }
    }
}

/// Guards for one operation's row set; dropping releases every lock
#[derive(Debug)]
pub(crate) struct RowLocks {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// In-process lock table, one async mutex per row
pub(crate) struct LockManager {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl LockManager {
    /// Create a lock manager with the given acquisition timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquire every key in the fixed global order
    ///
    /// Keys are sorted and deduplicated before acquisition, so callers may
    /// pass them in operation order.
    pub async fn acquire(&self, mut keys: Vec<LockKey>) -> Result<RowLocks> {
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            // Clone the Arc out before awaiting so no DashMap shard lock is
            // held across the suspension point.
            let lock = self
                .locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            let guard = tokio::time::timeout(self.timeout, lock.lock_owned())
                .await
                .map_err(|_| Error::LockTimeout(key.to_string()))?;
            guards.push(guard);
        }

        Ok(RowLocks { _guards: guards })
    }
}
