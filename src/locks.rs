// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! Queue entries, the scan job and the inventory are shared between request
//! handlers and background tasks. A panic in one of those tasks must not
//! take every later request down with it, so these helpers log the poisoning
//! and hand back the guard anyway.
//!
//! ```
//! use std::sync::RwLock;
//! use romsync::locks::{resilient_read, resilient_write};
//!
//! let lock = RwLock::new(0usize);
//! *resilient_write(&lock) += 1;
//! assert_eq!(*resilient_read(&lock), 1);
//! ```

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "romsync::locks",
                event = "LOCK_POISONED_READ",
                "RwLock poisoned during read; a task panicked while holding it. Continuing with current data."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "romsync::locks",
                event = "LOCK_POISONED_WRITE",
                "RwLock poisoned during write; a task panicked while holding it. Continuing with current data."
            );
            poisoned.into_inner()
        }
    }
}
