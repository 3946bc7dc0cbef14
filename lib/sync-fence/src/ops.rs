// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [`FenceOps`] backend contract.

use std::any::Any;

use crate::callback::CallbackList;
use crate::error::FenceError;
use crate::fence::{Fence, FenceCore};
use crate::status::{Timeout, WaitStatus};

/// Backend operations behind a [`Fence`].
///
/// A producer implements this trait to tell the fence core how completion is
/// detected and reported. Only [`enable_signaling`](Self::enable_signaling)
/// is required; the other hooks default to "no cheaper mechanism".
///
/// # Locking
///
/// `enable_signaling` runs with the fence lock held and must not call any
/// locking operation of the same fence, or of another fence sharing its
/// [`FenceLock`](crate::FenceLock); it gets a [`LockedFence`] for that
/// purpose. `signaled` may also be reached with the lock held (through
/// [`LockedFence::is_signaled`]) and must not lock the fence either.
pub trait FenceOps: Any + Send + Sync {
    /// Arrange for the fence to be signaled asynchronously later.
    ///
    /// Called at most once per fence, the first time someone shows interest
    /// (a callback, a wait, or an explicit [`Fence::enable_sw_signaling`]).
    /// Return `false` if that is impossible or the work is already done; the
    /// core then signals the fence synchronously before the triggering call
    /// returns.
    fn enable_signaling(&self, fence: &mut LockedFence<'_>) -> bool;

    /// Non-blocking completion check.
    ///
    /// The default reports `false`, meaning the backend has nothing cheaper
    /// than waiting for the signal.
    fn signaled(&self, fence: &Fence) -> bool {
        let _ = fence;
        false
    }

    /// Block until the fence signals, the timeout elapses, or an
    /// interruptible wait is interrupted.
    ///
    /// The default is [`Fence::default_wait`].
    fn wait(&self, fence: &Fence, interruptible: bool, timeout: Timeout) -> WaitStatus {
        fence.default_wait(interruptible, timeout)
    }

    /// Free backend resources.
    ///
    /// Called exactly once, when the last reference to the fence is dropped
    /// and its callback list is empty. Consumes the backend.
    fn release(self: Box<Self>, fence: &FenceCore) {
        let _ = fence;
    }
}

/// View of a fence whose lock is held by the caller.
///
/// Handed to [`FenceOps::enable_signaling`] so a backend can complete the
/// fence or clone a reference to it without re-taking the lock.
pub struct LockedFence<'a> {
    fence: &'a Fence,
    callbacks: &'a mut CallbackList,
}

impl<'a> LockedFence<'a> {
    pub(crate) fn new(fence: &'a Fence, callbacks: &'a mut CallbackList) -> Self {
        Self { fence, callbacks }
    }

    /// The fence being operated on.
    pub fn fence(&self) -> &Fence {
        self.fence
    }

    /// Context id of the fence.
    pub fn context(&self) -> u64 {
        self.fence.context()
    }

    /// Sequence number of the fence.
    pub fn seqno(&self) -> u32 {
        self.fence.seqno()
    }

    /// Signal with the lock already held.
    ///
    /// Fires every pending callback even when the fence had already been
    /// signaled concurrently, in which case it still reports
    /// [`FenceError::AlreadySignaled`].
    pub fn signal(&mut self) -> Result<(), FenceError> {
        self.fence.signal_in(self.callbacks)
    }

    /// [`Fence::is_signaled`] for callers holding the lock.
    pub fn is_signaled(&mut self) -> bool {
        if self.fence.core().is_signaled_bit() {
            return true;
        }
        if self.fence.ops().signaled(self.fence) {
            let _ = self.signal();
            return true;
        }
        false
    }
}
