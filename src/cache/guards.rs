//! Poison-tolerant guards for the local tier's interior locks.
//!
//! A panic in one request thread must not take the fallback tier down
//! with it; a poisoned lock is recovered and logged, and the tier keeps
//! serving whatever state survived.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "rwlock.read",
                result = "poisoned_recovered",
                hint = "tier contents may be stale after panic in another thread",
                "Recovered from poisoned local-tier lock"
            );
            poisoned.into_inner()
        }
    }
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "rwlock.write",
                result = "poisoned_recovered",
                hint = "tier contents may be stale after panic in another thread",
                "Recovered from poisoned local-tier lock"
            );
            poisoned.into_inner()
        }
    }
}
