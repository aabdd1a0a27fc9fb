//! Advisory maintenance lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};

/// Shared flag behind a store's maintenance lock.
#[derive(Debug, Clone, Default)]
pub struct LockFlag(Arc<AtomicBool>);

impl LockFlag {
    /// Create an unlocked flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, or fail with [`StoreError::Locked`] if it is held.
    pub fn try_acquire(&self) -> StoreResult<MaintenanceLock> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StoreError::Locked)?;
        tracing::debug!("maintenance lock acquired");
        Ok(MaintenanceLock {
            flag: Arc::clone(&self.0),
        })
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Guard held for the duration of an export, import or wipe.
///
/// Released on drop.
#[derive(Debug)]
pub struct MaintenanceLock {
    flag: Arc<AtomicBool>,
}

impl Drop for MaintenanceLock {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        tracing::debug!("maintenance lock released");
    }
}
