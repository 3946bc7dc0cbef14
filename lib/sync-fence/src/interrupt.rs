// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-thread interrupt requests for interruptible waits.
//!
//! Each thread has one interrupt slot. Another thread holding that thread's
//! [`Interrupter`] can raise it; an interruptible wait on the target thread
//! then returns [`WaitStatus::Interrupted`](crate::WaitStatus::Interrupted).
//! A raised interrupt stays pending until [`Interrupter::clear`] is called,
//! so every interruptible wait started meanwhile bails out immediately.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type WakeFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct InterruptState {
    pending: AtomicBool,
    // How to wake the owning thread while it is blocked in a wait.
    parked: Mutex<Option<WakeFn>>,
}

thread_local! {
    static CURRENT: Arc<InterruptState> = Arc::new(InterruptState::default());
}

/// Handle to one thread's interrupt slot.
#[derive(Clone)]
pub struct Interrupter {
    state: Arc<InterruptState>,
}

impl Interrupter {
    /// Handle for the calling thread.
    pub fn current() -> Self {
        CURRENT.with(|state| Self {
            state: Arc::clone(state),
        })
    }

    /// Mark an interrupt pending and wake the thread if it is blocked in an
    /// interruptible wait.
    pub fn raise(&self) {
        self.state.pending.store(true, Ordering::SeqCst);
        let wake = self.state.parked.lock().clone();
        if let Some(wake) = wake {
            wake();
        }
    }

    /// `true` while an interrupt is pending.
    pub fn is_pending(&self) -> bool {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Consume a pending interrupt. Returns whether one was pending.
    pub fn clear(&self) -> bool {
        self.state.pending.swap(false, Ordering::SeqCst)
    }

    /// Register how to wake this thread for the duration of a wait.
    ///
    /// Must be called before the waiter first checks
    /// [`is_pending`](Self::is_pending) so a concurrent `raise` either is
    /// seen by that check or finds the wake function.
    pub(crate) fn park(&self, wake: impl Fn() + Send + Sync + 'static) -> ParkGuard<'_> {
        *self.state.parked.lock() = Some(Arc::new(wake));
        ParkGuard { state: &self.state }
    }
}

impl std::fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupter")
            .field("pending", &self.is_pending())
            .finish()
    }
}

pub(crate) struct ParkGuard<'a> {
    state: &'a InterruptState,
}

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        self.state.parked.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn raise_and_clear() {
        let interrupter = Interrupter::current();
        assert!(!interrupter.is_pending());
        interrupter.raise();
        assert!(interrupter.is_pending());
        assert!(interrupter.clear());
        assert!(!interrupter.clear());
    }

    #[test]
    fn threads_have_separate_slots() {
        let mine = Interrupter::current();
        let theirs = std::thread::spawn(Interrupter::current).join().unwrap();
        theirs.raise();
        assert!(!mine.is_pending());
        assert!(theirs.is_pending());
    }

    #[test]
    fn raise_calls_parked_wake_until_guard_drops() {
        let interrupter = Interrupter::current();
        let wakes = Arc::new(AtomicUsize::new(0));

        {
            let wakes = Arc::clone(&wakes);
            let _guard = interrupter.park(move || {
                wakes.fetch_add(1, Ordering::SeqCst);
            });
            interrupter.raise();
        }
        interrupter.raise();
        interrupter.clear();

        assert_eq!(wakes.load(Ordering::SeqCst), 1);
    }
}
