// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Blocking waits built on callback registration.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::callback::FenceCallback;
use crate::config;
use crate::error::FenceError;
use crate::fence::Fence;
use crate::interrupt::Interrupter;
use crate::status::{Timeout, WaitAnyStatus, WaitStatus};

impl Fence {
    /// Generic blocking wait for backends without a cheaper mechanism.
    ///
    /// Enables signaling if needed, queues a wakeup callback, and sleeps on
    /// the fence lock until the fence signals, the timeout runs out, or (when
    /// `interruptible`) the calling thread's [`Interrupter`] is raised. The
    /// wakeup callback is unlinked before returning if it did not fire.
    pub fn default_wait(&self, interruptible: bool, timeout: Timeout) -> WaitStatus {
        let core = self.core();
        if core.is_signaled_bit() {
            return WaitStatus::Signaled(timeout);
        }

        let interrupter = interruptible.then(Interrupter::current);
        let _parked = interrupter.as_ref().map(|interrupter| {
            let lock = Arc::clone(core.lock());
            interrupter.park(move || lock.wake_waiters())
        });
        let interrupt_pending = || interrupter.as_ref().is_some_and(Interrupter::is_pending);

        let mut guard = core.lock().lock();
        if interrupt_pending() {
            return WaitStatus::Interrupted;
        }
        if !self.arm_locked(guard.callbacks()) {
            return WaitStatus::Signaled(timeout);
        }
        let wakeup = guard.callbacks().push_internal(
            core,
            Box::new(|fence: &Fence| fence.core().lock().notify_waiters()),
        );

        let start = Instant::now();
        let deadline = timeout.deadline_from(start);
        let mut slow_wait = SlowWait::new(start);
        let mut remaining = timeout;
        let mut interrupted = false;

        // The wait queue may be shared with other fences; every wakeup
        // re-checks this fence's own bit.
        while !core.is_signaled_bit() && !remaining.is_expired() {
            guard.sleep(earliest(deadline, slow_wait.deadline()));

            let now = Instant::now();
            remaining = timeout.remaining_at(deadline, now);
            if core.is_signaled_bit() {
                break;
            }
            slow_wait.check(self, now);
            if !remaining.is_expired() && interrupt_pending() {
                interrupted = true;
                break;
            }
        }

        guard.callbacks().remove(core, wakeup);
        drop(guard);

        if core.is_signaled_bit() {
            WaitStatus::Signaled(remaining)
        } else if interrupted {
            WaitStatus::Interrupted
        } else {
            WaitStatus::TimedOut
        }
    }
}

/// Wait until any of `fences` signals.
///
/// Returns the index of a signaled fence together with the unused timeout.
/// A zero timeout only polls. Fails with [`FenceError::NoFences`] on an
/// empty slice.
pub fn wait_any_timeout(
    fences: &[Fence],
    interruptible: bool,
    timeout: Timeout,
) -> Result<WaitAnyStatus, FenceError> {
    if fences.is_empty() {
        return Err(FenceError::NoFences);
    }

    if timeout.is_expired() {
        return Ok(match fences.iter().position(Fence::is_signaled) {
            Some(index) => WaitAnyStatus::Signaled {
                index,
                remaining: timeout,
            },
            None => WaitAnyStatus::TimedOut,
        });
    }

    let waker = Arc::new(AnyWaker::default());
    let mut registered = Vec::with_capacity(fences.len());
    let mut already_signaled = None;

    for (index, fence) in fences.iter().enumerate() {
        let mut callback = FenceCallback::new();
        let waker = Arc::clone(&waker);
        match fence.add_callback(&mut callback, move |_| waker.wake()) {
            Ok(()) => registered.push(callback),
            Err(_) => {
                already_signaled = Some(index);
                break;
            }
        }
    }

    let status = match already_signaled {
        Some(index) => WaitAnyStatus::Signaled {
            index,
            remaining: timeout,
        },
        None => waker.block(fences, interruptible, timeout),
    };

    for (fence, callback) in fences.iter().zip(&registered) {
        fence.remove_callback(callback);
    }
    Ok(status)
}

/// Shared wakeup target for the callbacks queued by [`wait_any_timeout`].
#[derive(Default)]
struct AnyWaker {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl AnyWaker {
    fn wake(&self) {
        *self.woken.lock() = true;
        self.cond.notify_all();
    }

    fn block(self: &Arc<Self>, fences: &[Fence], interruptible: bool, timeout: Timeout) -> WaitAnyStatus {
        let interrupter = interruptible.then(Interrupter::current);
        let _parked = interrupter.as_ref().map(|interrupter| {
            let waker = Arc::clone(self);
            interrupter.park(move || waker.wake())
        });

        let start = Instant::now();
        let deadline = timeout.deadline_from(start);
        let mut remaining = timeout;

        let mut woken = self.woken.lock();
        loop {
            if let Some(index) = fences.iter().position(|f| f.core().is_signaled_bit()) {
                return WaitAnyStatus::Signaled { index, remaining };
            }
            if remaining.is_expired() {
                return WaitAnyStatus::TimedOut;
            }
            if interrupter.as_ref().is_some_and(Interrupter::is_pending) {
                return WaitAnyStatus::Interrupted;
            }

            if !*woken {
                match deadline {
                    Some(deadline) => {
                        self.cond.wait_until(&mut woken, deadline);
                    }
                    None => self.cond.wait(&mut woken),
                }
            }
            *woken = false;
            remaining = timeout.remaining_at(deadline, Instant::now());
        }
    }
}

/// Emits one warning when a wait outlives the configured threshold.
struct SlowWait {
    start: Instant,
    deadline: Option<Instant>,
}

impl SlowWait {
    fn new(start: Instant) -> Self {
        let deadline = config::global()
            .wait
            .slow_wait_threshold()
            .and_then(|threshold| start.checked_add(threshold));
        Self { start, deadline }
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn check(&mut self, fence: &Fence, now: Instant) {
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            self.deadline = None;
            let waited: Duration = now.duration_since(self.start);
            warn!(
                context = fence.context(),
                seqno = fence.seqno(),
                waited_ms = waited.as_millis() as u64,
                "fence wait exceeded slow-wait threshold"
            );
        }
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
