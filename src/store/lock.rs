//! Entity locking
//!
//! Every lockable entity (a repository, an object) carries an `EntityLock`:
//! a reader/writer lock wrapped in a transactional contract. The caller
//! supplies a transaction closure that runs strictly between acquisition and
//! release, plus an optional success callback that runs only when the
//! transaction returned `Ok` and still before the lock is released, so
//! callbacks must not perform long blocking work.
//!
//! Lock ordering invariant: a repository's lock is always acquired before
//! any object lock it transitively guards (repository shared wraps object
//! shared for reads, repository shared wraps object exclusive for writes,
//! repository exclusive is used alone for structural create/delete). The
//! fixed order prevents lock-order inversion between concurrent requests;
//! no lock in this crate is ever re-acquired by its own holder.

use crate::error::StoreError;
use parking_lot::RwLock;

/// Shared acquisitions default to blocking: read paths are expected to be
/// fast and queueing them is cheaper than failing them.
pub const SHARED_WAIT: bool = true;

/// Exclusive acquisitions default to fail-fast: a caller contending for a
/// busy entity gets an immediate conflict instead of stalling a request
/// thread. Backpressure, not an oversight.
pub const EXCLUSIVE_WAIT: bool = false;

/// Reader/writer lock with a run-under-lock contract.
#[derive(Debug, Default)]
pub struct EntityLock {
    inner: RwLock<()>,
}

impl EntityLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `transaction` under the shared lock. With `wait` the acquisition
    /// blocks; without it a contended lock yields `LockConflict` immediately.
    pub fn read<T, F>(&self, wait: bool, transaction: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError>,
    {
        self.read_then(wait, transaction, |_| {})
    }

    /// `read` plus a success callback, run only on `Ok` and before release.
    pub fn read_then<T, F, S>(
        &self,
        wait: bool,
        transaction: F,
        on_success: S,
    ) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError>,
        S: FnOnce(&T),
    {
        let _guard = if wait {
            self.inner.read()
        } else {
            self.inner.try_read().ok_or(StoreError::LockConflict)?
        };
        let result = transaction()?;
        on_success(&result);
        Ok(result)
    }

    /// Run `transaction` under the exclusive lock. With `wait` the
    /// acquisition blocks; without it a contended lock yields `LockConflict`
    /// immediately.
    pub fn write<T, F>(&self, wait: bool, transaction: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError>,
    {
        self.write_then(wait, transaction, |_| {})
    }

    /// `write` plus a success callback, run only on `Ok` and before release.
    pub fn write_then<T, F, S>(
        &self,
        wait: bool,
        transaction: F,
        on_success: S,
    ) -> Result<T, StoreError>
    where
        F: FnOnce() -> Result<T, StoreError>,
        S: FnOnce(&T),
    {
        let _guard = if wait {
            self.inner.write()
        } else {
            self.inner.try_write().ok_or(StoreError::LockConflict)?
        };
        let result = transaction()?;
        on_success(&result);
        Ok(result)
    }
}
