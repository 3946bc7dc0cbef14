// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Software timeline: a CPU-driven fence producer.
//!
//! A [`SoftTimeline`] owns one context and a 32-bit counter. Fences created on
//! it complete once the counter reaches their seqno. Fences are only enlisted
//! for signaling after someone shows interest in them, so idle fences cost
//! nothing until [`SoftTimeline::advance`] passes them.
//!
//! All fences of a timeline share the timeline's [`FenceLock`], so an advance
//! completes every reached fence in one lock acquisition. Lock order is the
//! fence lock, then the timeline state.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::context::context_alloc;
use crate::fence::Fence;
use crate::lock::FenceLock;
use crate::ops::{FenceOps, LockedFence};

/// Wrapping "`value` has reached `seqno`".
fn reached(value: u32, seqno: u32) -> bool {
    (value.wrapping_sub(seqno) as i32) >= 0
}

#[derive(Default)]
struct TimelineState {
    value: u32,
    // Fences with signaling enabled that have not been reached yet.
    active: Vec<Fence>,
    closed: bool,
}

struct TimelineShared {
    context: u64,
    lock: Arc<FenceLock>,
    state: Mutex<TimelineState>,
}

/// A producer that signals its fences as a counter advances.
///
/// Dropping the timeline signals every fence still waiting on it; fences
/// created from it that have not been armed yet complete as soon as anyone
/// enables signaling on them.
///
/// Callbacks on timeline fences run while the shared lock is held and must
/// not lock any fence of the same timeline.
pub struct SoftTimeline {
    shared: Arc<TimelineShared>,
}

impl SoftTimeline {
    /// Create a timeline on a freshly allocated context, starting at zero.
    pub fn new() -> Self {
        let context = context_alloc(1);
        debug!(context, "soft timeline created");
        Self {
            shared: Arc::new(TimelineShared {
                context,
                lock: FenceLock::new(),
                state: Mutex::new(TimelineState::default()),
            }),
        }
    }

    /// Context id shared by every fence on this timeline.
    pub fn context(&self) -> u64 {
        self.shared.context
    }

    /// Current counter value.
    pub fn value(&self) -> u32 {
        self.shared.state.lock().value
    }

    /// Create a fence that completes when the counter reaches `seqno`.
    pub fn create_fence(&self, seqno: u32) -> Fence {
        Fence::with_lock(
            SoftTimelineOps {
                timeline: Arc::clone(&self.shared),
            },
            &self.shared.lock,
            self.shared.context,
            seqno,
        )
    }

    /// Advance the counter by `step` and signal every armed fence it reached.
    ///
    /// Returns the number of fences signaled.
    pub fn advance(&self, step: u32) -> usize {
        let mut guard = self.shared.lock.lock();
        let reached_fences = {
            let mut state = self.shared.state.lock();
            state.value = state.value.wrapping_add(step);
            let value = state.value;
            let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.active)
                .into_iter()
                .partition(|fence| reached(value, fence.seqno()));
            state.active = waiting;
            done
        };

        for fence in &reached_fences {
            let _ = fence.signal_locked(&mut guard);
        }
        drop(guard);
        reached_fences.len()
    }
}

impl Default for SoftTimeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SoftTimeline {
    fn drop(&mut self) {
        let mut guard = self.shared.lock.lock();
        let remaining = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            std::mem::take(&mut state.active)
        };
        if !remaining.is_empty() {
            debug!(
                context = self.shared.context,
                count = remaining.len(),
                "soft timeline dropped with armed fences, signaling them"
            );
        }
        for fence in &remaining {
            let _ = fence.signal_locked(&mut guard);
        }
        drop(guard);
    }
}

impl std::fmt::Debug for SoftTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SoftTimeline")
            .field("context", &self.shared.context)
            .field("value", &state.value)
            .field("active", &state.active.len())
            .finish()
    }
}

struct SoftTimelineOps {
    timeline: Arc<TimelineShared>,
}

impl FenceOps for SoftTimelineOps {
    fn enable_signaling(&self, fence: &mut LockedFence<'_>) -> bool {
        let mut state = self.timeline.state.lock();
        if state.closed || reached(state.value, fence.seqno()) {
            return false;
        }
        state.active.push(fence.fence().clone());
        true
    }

    fn signaled(&self, fence: &Fence) -> bool {
        let state = self.timeline.state.lock();
        state.closed || reached(state.value, fence.seqno())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::FenceCallback;
    use crate::error::FenceError;
    use crate::status::{Timeout, WaitStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn advance_signals_reached_fences_only() {
        let timeline = SoftTimeline::new();
        let f1 = timeline.create_fence(1);
        let f3 = timeline.create_fence(3);
        assert_eq!(f1.context(), timeline.context());

        f1.enable_sw_signaling();
        f3.enable_sw_signaling();

        assert_eq!(timeline.advance(2), 1);
        assert!(f1.core().is_signaled_bit());
        assert!(!f3.core().is_signaled_bit());

        assert_eq!(timeline.advance(1), 1);
        assert!(f3.core().is_signaled_bit());
        assert_eq!(timeline.value(), 3);
    }

    #[test]
    fn arming_a_reached_fence_signals_synchronously() {
        let timeline = SoftTimeline::new();
        timeline.advance(5);
        let fence = timeline.create_fence(4);

        let mut callback = FenceCallback::new();
        let err = fence.add_callback(&mut callback, |_| {}).unwrap_err();
        assert_eq!(err, FenceError::TooLate);
        assert!(fence.core().is_signaled_bit());
    }

    #[test]
    fn unarmed_fences_are_not_enlisted() {
        let timeline = SoftTimeline::new();
        let fence = timeline.create_fence(1);
        assert_eq!(timeline.advance(1), 0);
        assert!(!fence.core().is_signaled_bit());
        // backend check picks it up
        assert!(fence.is_signaled());
    }

    #[test]
    fn callbacks_fire_on_advance() {
        let timeline = SoftTimeline::new();
        let fence = timeline.create_fence(2);
        let fired = Arc::new(AtomicUsize::new(0));

        let mut callback = FenceCallback::new();
        let counter = Arc::clone(&fired);
        fence
            .add_callback(&mut callback, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        timeline.advance(1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        timeline.advance(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_signals_armed_and_later_armed_fences() {
        let timeline = SoftTimeline::new();
        let armed = timeline.create_fence(10);
        let idle = timeline.create_fence(11);
        armed.enable_sw_signaling();

        drop(timeline);
        assert!(armed.core().is_signaled_bit());
        assert!(!idle.core().is_signaled_bit());

        idle.enable_sw_signaling();
        assert!(idle.core().is_signaled_bit());
    }

    #[test]
    fn signaled_fences_release_their_timeline_reference() {
        let timeline = SoftTimeline::new();
        let fence = timeline.create_fence(1);
        fence.enable_sw_signaling();
        assert_eq!(fence.ref_count(), 2);

        timeline.advance(1);
        assert_eq!(fence.ref_count(), 1);
    }

    #[test]
    fn fences_share_the_timeline_lock() {
        let timeline = SoftTimeline::new();
        let other = SoftTimeline::new();
        let a = timeline.create_fence(1);
        let b = timeline.create_fence(2);
        let c = other.create_fence(1);

        assert!(Arc::ptr_eq(a.core().lock(), b.core().lock()));
        assert!(!Arc::ptr_eq(a.core().lock(), c.core().lock()));
    }

    #[test]
    fn sibling_signal_does_not_release_a_waiter() {
        let timeline = SoftTimeline::new();
        let first = timeline.create_fence(1);
        let second = timeline.create_fence(2);
        first.enable_sw_signaling();

        let waiter = {
            let second = second.clone();
            std::thread::spawn(move || second.wait_timeout(false, Timeout::from_millis(100)))
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(timeline.advance(1), 1);

        assert_eq!(waiter.join().unwrap(), WaitStatus::TimedOut);
        assert!(first.core().is_signaled_bit());
        assert!(!second.core().is_signaled_bit());
        assert_eq!(second.core().pending_callbacks(), 0);
    }

    #[test]
    fn reached_wraps_around() {
        assert!(reached(5, 5));
        assert!(reached(1, u32::MAX));
        assert!(!reached(u32::MAX, 1));
    }
}
