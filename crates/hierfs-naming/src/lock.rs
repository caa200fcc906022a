//! Fair shared/exclusive lock attached to every tree node.
//!
//! The lock is a FIFO admission queue over a fixed capacity: a shared
//! holder consumes one unit, an exclusive holder consumes all of them.
//! Once an exclusive request is queued, later shared requests wait behind
//! it even when capacity is available.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

/// Units held by an exclusive holder.
pub const LOCK_CAPACITY: u32 = 100;

/// Access mode of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Many holders at once.
    Shared,
    /// A single holder.
    Exclusive,
}

impl LockMode {
    /// `Exclusive` when `exclusive` is set.
    pub fn from_exclusive(exclusive: bool) -> Self {
        if exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }

    fn weight(self) -> u32 {
        match self {
            LockMode::Shared => 1,
            LockMode::Exclusive => LOCK_CAPACITY,
        }
    }
}

/// Lock failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock was closed while waiting or before the request.
    #[error("lock closed")]
    Closed,

    /// Release of a mode nobody holds.
    #[error("{0:?} lock is not held")]
    NotHeld(LockMode),
}

/// FIFO-fair reader/writer lock with explicit release.
///
/// Unlike a guard-based lock, acquisition and release happen in different
/// remote calls, so holders are counted rather than tracked by guards.
#[derive(Debug)]
pub struct NodeLock {
    permits: Semaphore,
    shared: AtomicU32,
    exclusive: AtomicBool,
}

impl Default for NodeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeLock {
    /// Creates an unlocked lock.
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(LOCK_CAPACITY as usize),
            shared: AtomicU32::new(0),
            exclusive: AtomicBool::new(false),
        }
    }

    /// Waits until the lock is granted in `mode`. Dropping the future
    /// before it completes leaves the queue without taking anything.
    pub async fn acquire(&self, mode: LockMode) -> Result<(), LockError> {
        let permit = self
            .permits
            .acquire_many(mode.weight())
            .await
            .map_err(|_| LockError::Closed)?;
        permit.forget();
        match mode {
            LockMode::Shared => {
                self.shared.fetch_add(1, Ordering::AcqRel);
            }
            LockMode::Exclusive => self.exclusive.store(true, Ordering::Release),
        }
        Ok(())
    }

    /// Returns a grant previously obtained in `mode`.
    pub fn release(&self, mode: LockMode) -> Result<(), LockError> {
        let held = match mode {
            LockMode::Shared => self
                .shared
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
            LockMode::Exclusive => self
                .exclusive
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        };
        if !held {
            return Err(LockError::NotHeld(mode));
        }
        self.permits.add_permits(mode.weight() as usize);
        Ok(())
    }

    /// Number of shared holders.
    pub fn shared_holders(&self) -> u32 {
        self.shared.load(Ordering::Acquire)
    }

    /// True while an exclusive holder exists.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::Acquire)
    }

    /// Fails every waiting and future acquisition.
    pub fn close(&self) {
        self.permits.close();
    }
}
