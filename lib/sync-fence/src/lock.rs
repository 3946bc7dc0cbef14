// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The lock guarding fence callback lists.
//!
//! Every fence is bound to one [`FenceLock`] for its whole life: either a
//! private one created by [`Fence::new`](crate::Fence::new), or one shared
//! with other fences of the same producer through
//! [`Fence::with_lock`](crate::Fence::with_lock). Callback entries are keyed
//! by fence, so fences on a shared lock still signal independently, and a
//! producer holding the lock can complete several of them in one acquisition
//! with [`Fence::signal_locked`](crate::Fence::signal_locked).

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::callback::CallbackList;

/// Mutual exclusion for one or more fences.
pub struct FenceLock {
    callbacks: Mutex<CallbackList>,
    // Paired with `callbacks`. Shared by every fence on this lock, so a
    // sleeper can be woken by a sibling's signal and must re-check its own.
    wait_queue: Condvar,
}

impl FenceLock {
    /// Create a lock that fences can share.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: Mutex::new(CallbackList::default()),
            wait_queue: Condvar::new(),
        })
    }

    /// Acquire the lock.
    ///
    /// While the guard is alive no fence on this lock can queue, unlink or
    /// fire callbacks, and any locking operation on those fences from the
    /// same thread deadlocks. Signal them with
    /// [`Fence::signal_locked`](crate::Fence::signal_locked).
    pub fn lock(&self) -> FenceLockGuard<'_> {
        FenceLockGuard {
            lock: self,
            callbacks: self.callbacks.lock(),
        }
    }

    /// Wake sleepers. Caller holds the lock.
    pub(crate) fn notify_waiters(&self) {
        self.wait_queue.notify_all();
    }

    /// Wake sleepers from outside the lock.
    pub(crate) fn wake_waiters(&self) {
        let _callbacks = self.callbacks.lock();
        self.wait_queue.notify_all();
    }
}

impl fmt::Debug for FenceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceLock")
            .field("locked", &self.callbacks.is_locked())
            .finish()
    }
}

/// Held [`FenceLock`].
pub struct FenceLockGuard<'a> {
    lock: &'a FenceLock,
    callbacks: MutexGuard<'a, CallbackList>,
}

impl FenceLockGuard<'_> {
    pub(crate) fn callbacks(&mut self) -> &mut CallbackList {
        &mut self.callbacks
    }

    /// `true` if this guard holds `lock`.
    pub(crate) fn holds(&self, lock: &FenceLock) -> bool {
        std::ptr::eq(self.lock, lock)
    }

    /// Sleep until notified or until `wake_at`, releasing the lock meanwhile.
    pub(crate) fn sleep(&mut self, wake_at: Option<Instant>) {
        match wake_at {
            Some(wake_at) => {
                self.lock.wait_queue.wait_until(&mut self.callbacks, wake_at);
            }
            None => self.lock.wait_queue.wait(&mut self.callbacks),
        }
    }
}

impl fmt::Debug for FenceLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceLockGuard").finish_non_exhaustive()
    }
}
