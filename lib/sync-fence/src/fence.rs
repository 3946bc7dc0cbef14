// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The fence object and its signaling state machine.
//!
//! Two flag bits drive everything: `SIGNALED` (one-way, never cleared) and
//! `ENABLE_SIGNAL` (set the first time anyone shows interest, gating the
//! single call to [`FenceOps::enable_signaling`]). Both are atomics tested
//! outside the lock; the callback list is only touched under the lock, which
//! may be shared with other fences (see [`FenceLock`]).
//!
//! The public signal sets `SIGNALED` first and drains callbacks only if
//! `ENABLE_SIGNAL` was already set. Registration sets `ENABLE_SIGNAL` first and
//! checks `SIGNALED` under the lock. With sequentially consistent bit
//! operations one of the two always observes the other, so a callback is
//! either refused or fired, never lost.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{trace, warn};

use crate::callback::{CallbackList, CallbackState, FenceCallback};
use crate::error::FenceError;
use crate::lock::{FenceLock, FenceLockGuard};
use crate::ops::{FenceOps, LockedFence};
use crate::status::{Timeout, WaitStatus};

const FLAG_SIGNALED: u32 = 1 << 0;
const FLAG_ENABLE_SIGNAL: u32 = 1 << 1;

// Keys a fence's entries in a possibly shared callback list.
static NEXT_FENCE_KEY: AtomicU64 = AtomicU64::new(1);

/// Shared state of a fence, independent of its backend.
pub struct FenceCore {
    key: u64,
    context: u64,
    seqno: u32,
    flags: AtomicU32,
    timestamp: OnceLock<Instant>,
    // Only changed under `lock`; read without it.
    pending: AtomicUsize,
    lock: Arc<FenceLock>,
}

impl FenceCore {
    pub(crate) fn new(context: u64, seqno: u32, lock: Arc<FenceLock>) -> Self {
        Self {
            key: NEXT_FENCE_KEY.fetch_add(1, Ordering::Relaxed),
            context,
            seqno,
            flags: AtomicU32::new(0),
            timestamp: OnceLock::new(),
            pending: AtomicUsize::new(0),
            lock,
        }
    }

    /// Context id of the producer timeline this fence belongs to.
    pub fn context(&self) -> u64 {
        self.context
    }

    /// Position of this fence on its context's timeline.
    pub fn seqno(&self) -> u32 {
        self.seqno
    }

    /// `true` once the SIGNALED bit is set. Does not consult the backend.
    pub fn is_signaled_bit(&self) -> bool {
        self.test(FLAG_SIGNALED)
    }

    /// `true` once signaling has been enabled.
    pub fn is_signaling_enabled(&self) -> bool {
        self.test(FLAG_ENABLE_SIGNAL)
    }

    /// When the fence was signaled, if it has been.
    pub fn timestamp(&self) -> Option<Instant> {
        if !self.is_signaled_bit() {
            return None;
        }
        self.timestamp.get().copied()
    }

    /// The lock this fence is bound to, possibly shared with other fences.
    pub fn lock(&self) -> &Arc<FenceLock> {
        &self.lock
    }

    /// Callbacks and internal waiters currently queued on this fence.
    pub fn pending_callbacks(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn key(&self) -> u64 {
        self.key
    }

    pub(crate) fn note_queued(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn note_unlinked(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    fn test(&self, flag: u32) -> bool {
        self.flags.load(Ordering::SeqCst) & flag != 0
    }

    /// Set `flag`, returning whether it was already set.
    fn test_and_set(&self, flag: u32) -> bool {
        self.flags.fetch_or(flag, Ordering::SeqCst) & flag != 0
    }

    fn stamp(&self) {
        self.timestamp.get_or_init(Instant::now);
    }
}

/// Stands in for the backend once it has been handed to `release`.
struct Released;

impl FenceOps for Released {
    fn enable_signaling(&self, _fence: &mut LockedFence<'_>) -> bool {
        false
    }
}

struct FenceInner {
    core: FenceCore,
    ops: Box<dyn FenceOps>,
}

impl Drop for FenceInner {
    fn drop(&mut self) {
        let pending = self.core.pending_callbacks();
        trace!(
            context = self.core.context,
            seqno = self.core.seqno,
            "fence destroy"
        );
        assert!(
            pending == 0,
            "fence (context {}, seqno {}) released with {} pending callback(s)",
            self.core.context,
            self.core.seqno,
            pending
        );

        let ops = std::mem::replace(&mut self.ops, Box::new(Released));
        ops.release(&self.core);
    }
}

/// A reference-counted completion fence.
///
/// Cloning takes a new reference; the backend's
/// [`release`](FenceOps::release) runs when the last reference is dropped.
///
/// Callbacks run with the fence lock held, on whichever thread signals. They
/// must be short and must not call back into a locking operation of the same
/// fence (`add_callback`, `remove_callback`, `enable_sw_signaling`, waits), or
/// of any fence sharing its [`FenceLock`].
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    /// Create an unsignaled fence driven by `ops`, with a lock of its own.
    pub fn new(ops: impl FenceOps, context: u64, seqno: u32) -> Self {
        Self::from_boxed(Box::new(ops), FenceLock::new(), context, seqno)
    }

    /// Create an unsignaled fence bound to a lock shared with other fences.
    pub fn with_lock(
        ops: impl FenceOps,
        lock: &Arc<FenceLock>,
        context: u64,
        seqno: u32,
    ) -> Self {
        Self::from_boxed(Box::new(ops), Arc::clone(lock), context, seqno)
    }

    /// Create an unsignaled fence from an already boxed backend.
    pub fn from_boxed(
        ops: Box<dyn FenceOps>,
        lock: Arc<FenceLock>,
        context: u64,
        seqno: u32,
    ) -> Self {
        trace!(context, seqno, "fence init");
        Self {
            inner: Arc::new(FenceInner {
                core: FenceCore::new(context, seqno, lock),
                ops,
            }),
        }
    }

    /// Backend-independent state.
    pub fn core(&self) -> &FenceCore {
        &self.inner.core
    }

    /// Context id of the producer timeline this fence belongs to.
    pub fn context(&self) -> u64 {
        self.inner.core.context
    }

    /// Position of this fence on its context's timeline.
    pub fn seqno(&self) -> u32 {
        self.inner.core.seqno
    }

    /// When the fence was signaled, if it has been.
    pub fn timestamp(&self) -> Option<Instant> {
        self.inner.core.timestamp()
    }

    /// Number of live references to this fence.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// `true` if both values refer to the same fence.
    pub fn ptr_eq(a: &Fence, b: &Fence) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn ops(&self) -> &dyn FenceOps {
        &*self.inner.ops
    }

    /// Borrow the backend as its concrete type, if it is a `T`.
    pub fn ops_as<T: FenceOps>(&self) -> Option<&T> {
        let ops: &dyn Any = self.ops();
        ops.downcast_ref::<T>()
    }

    // ── Signaling ────────────────────────────────────────────────────

    /// Signal the fence and fire every pending callback.
    ///
    /// Returns [`FenceError::AlreadySignaled`] if someone else got there
    /// first; callbacks are then theirs to fire.
    pub fn signal(&self) -> Result<(), FenceError> {
        let core = &self.inner.core;
        core.stamp();
        if core.test_and_set(FLAG_SIGNALED) {
            return Err(FenceError::AlreadySignaled);
        }
        trace!(context = core.context, seqno = core.seqno, "fence signaled");

        // Nobody can have queued a callback before ENABLE_SIGNAL was set.
        if core.test(FLAG_ENABLE_SIGNAL) {
            let mut guard = core.lock.lock();
            self.fire_callbacks(guard.callbacks());
        }
        Ok(())
    }

    /// Signal while holding this fence's lock, typically to complete several
    /// fences sharing one lock in a single acquisition.
    ///
    /// # Panics
    ///
    /// If `guard` holds a different lock than the one this fence is bound to.
    pub fn signal_locked(&self, guard: &mut FenceLockGuard<'_>) -> Result<(), FenceError> {
        assert!(
            guard.holds(&self.inner.core.lock),
            "fence (context {}, seqno {}) signaled under a lock it is not bound to",
            self.context(),
            self.seqno()
        );
        self.signal_in(guard.callbacks())
    }

    /// Signal with the fence lock already held.
    ///
    /// Drains the callback list unconditionally: a concurrent
    /// [`signal`](Self::signal) may have set the bit but not yet taken the
    /// lock, and no callback may stay queued once the bit is visible.
    pub(crate) fn signal_in(&self, callbacks: &mut CallbackList) -> Result<(), FenceError> {
        let core = &self.inner.core;
        core.stamp();
        let result = if core.test_and_set(FLAG_SIGNALED) {
            Err(FenceError::AlreadySignaled)
        } else {
            trace!(context = core.context, seqno = core.seqno, "fence signaled");
            Ok(())
        };
        self.fire_callbacks(callbacks);
        result
    }

    fn fire_callbacks(&self, callbacks: &mut CallbackList) {
        while let Some(pending) = callbacks.pop_first(&self.inner.core) {
            pending.fire(self);
        }
    }

    /// Explicitly enable signaling, even with no callback or waiter yet.
    ///
    /// Idempotent. If the backend reports it cannot signal on its own, the
    /// fence is signaled before this returns. A fence found signaled once
    /// the lock is taken is left alone.
    pub fn enable_sw_signaling(&self) {
        let core = &self.inner.core;
        if core.is_signaling_enabled() || core.is_signaled_bit() {
            return;
        }
        let mut guard = core.lock.lock();
        self.arm_locked(guard.callbacks());
    }

    /// Lock-held arming step shared by every way of showing interest.
    ///
    /// Sets ENABLE_SIGNAL and, the first time and only while unsignaled, asks
    /// the backend to arm. Returns `false` if the fence is signaled by the
    /// time this returns.
    pub(crate) fn arm_locked(&self, callbacks: &mut CallbackList) -> bool {
        let core = &self.inner.core;
        let was_set = core.test_and_set(FLAG_ENABLE_SIGNAL);
        if core.test(FLAG_SIGNALED) {
            return false;
        }
        if !was_set {
            trace!(context = core.context, seqno = core.seqno, "fence enable signal");
            let mut locked = LockedFence::new(self, callbacks);
            if !self.ops().enable_signaling(&mut locked) {
                let _ = locked.signal();
                return false;
            }
            // the backend may have completed the fence itself
            if core.test(FLAG_SIGNALED) {
                return false;
            }
        }
        true
    }

    // ── Callbacks ────────────────────────────────────────────────────

    /// Queue `func` to run once when the fence signals.
    ///
    /// Fails with [`FenceError::TooLate`] if the fence is already signaled,
    /// including when arming the backend completed it synchronously. The
    /// callback is then **not** invoked; check [`is_signaled`](Self::is_signaled)
    /// and handle completion directly.
    ///
    /// A queued callback may run on any thread that signals the fence.
    pub fn add_callback<F>(&self, callback: &mut FenceCallback, func: F) -> Result<(), FenceError>
    where
        F: FnOnce(&Fence) + Send + 'static,
    {
        callback.ensure_not_pending()?;

        let core = &self.inner.core;
        if core.is_signaled_bit() {
            callback.set_state(CallbackState::Idle);
            return Err(FenceError::TooLate);
        }

        let mut guard = core.lock.lock();
        let callbacks = guard.callbacks();
        if !self.arm_locked(callbacks) {
            callback.set_state(CallbackState::Idle);
            return Err(FenceError::TooLate);
        }
        callbacks.push(core, Box::new(func), callback);
        Ok(())
    }

    /// Unlink a pending callback before it fires.
    ///
    /// Returns `false` if it already fired, was removed, or is not queued on
    /// this fence. Meant for error and recovery paths: a signal racing with
    /// this call may already be firing the callback on another thread.
    pub fn remove_callback(&self, callback: &FenceCallback) -> bool {
        let core = &self.inner.core;
        let mut guard = core.lock.lock();
        match callback.state() {
            CallbackState::Pending(id) => guard.callbacks().remove(core, id),
            _ => false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// `true` if the fence has signaled.
    ///
    /// Consults the backend's [`signaled`](FenceOps::signaled) hook when the
    /// bit is not yet set, and signals the fence if the backend reports
    /// completion.
    pub fn is_signaled(&self) -> bool {
        if self.inner.core.is_signaled_bit() {
            return true;
        }
        if self.ops().signaled(self) {
            let _ = self.signal();
            return true;
        }
        false
    }

    /// `true` if `self` is at or after `other` on their shared timeline.
    ///
    /// Sequence numbers are compared with wraparound.
    pub fn is_later(&self, other: &Fence) -> Result<bool, FenceError> {
        if self.context() != other.context() {
            warn!(
                left = self.context(),
                right = other.context(),
                "ordering fences from different contexts"
            );
            return Err(FenceError::ContextMismatch {
                left: self.context(),
                right: other.context(),
            });
        }
        Ok(self.seqno().wrapping_sub(other.seqno()) < i32::MAX as u32)
    }

    /// The later of two fences on the same timeline, or `None` if that one
    /// has already signaled.
    pub fn later<'a>(&'a self, other: &'a Fence) -> Result<Option<&'a Fence>, FenceError> {
        let later = if self.is_later(other)? { self } else { other };
        Ok((!later.is_signaled()).then_some(later))
    }

    // ── Waiting ──────────────────────────────────────────────────────

    /// Wait for the fence through the backend's [`wait`](FenceOps::wait).
    pub fn wait_timeout(&self, interruptible: bool, timeout: Timeout) -> WaitStatus {
        trace!(
            context = self.context(),
            seqno = self.seqno(),
            %timeout,
            interruptible,
            "fence wait start"
        );
        let status = self.ops().wait(self, interruptible, timeout);
        trace!(
            context = self.context(),
            seqno = self.seqno(),
            ?status,
            "fence wait end"
        );
        status
    }

    /// Wait with no timeout.
    pub fn wait(&self, interruptible: bool) -> WaitStatus {
        self.wait_timeout(interruptible, Timeout::Forever)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("context", &self.context())
            .field("seqno", &self.seqno())
            .field("signaled", &self.inner.core.is_signaled_bit())
            .field("signaling_enabled", &self.inner.core.is_signaling_enabled())
            .finish()
    }
}
