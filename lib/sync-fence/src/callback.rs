// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Callback registrations.
//!
//! A fence never holds on to the registrant's record. It keeps an ordered map
//! of pending entries keyed by [`CallbackId`], and the registrant keeps a
//! [`FenceCallback`] whose shared state tells it whether its entry is still
//! queued. Every state transition happens under the owning fence's lock.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::FenceError;
use crate::fence::{Fence, FenceCore};

pub(crate) type CallbackFn = Box<dyn FnOnce(&Fence) + Send>;

// Ids are unique across fences so a record can be checked against any fence.
static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one registration of a callback on one fence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    const FIRST: Self = Self(0);
    const LAST: Self = Self(u64::MAX);

    fn next() -> Self {
        Self(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for CallbackId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackId({})", self.0)
    }
}

/// Where a callback registration stands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallbackState {
    /// Never armed, or the last add was refused.
    Idle,
    /// Queued on a fence, waiting for it to signal.
    Pending(CallbackId),
    /// Unlinked and invoked by a signal.
    Fired,
    /// Unlinked by [`Fence::remove_callback`] before it fired.
    Removed,
}

/// Registrant-owned callback record.
///
/// Pass it to [`Fence::add_callback`] to arm it and to
/// [`Fence::remove_callback`] to cancel it. A record can be re-armed once it
/// is no longer pending.
#[derive(Debug)]
pub struct FenceCallback {
    state: Arc<Mutex<CallbackState>>,
}

impl FenceCallback {
    /// Create an unarmed record.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CallbackState::Idle)),
        }
    }

    /// Current state of the registration.
    pub fn state(&self) -> CallbackState {
        *self.state.lock()
    }

    /// `true` while the callback is queued on a fence.
    pub fn is_pending(&self) -> bool {
        matches!(self.state(), CallbackState::Pending(_))
    }

    pub(crate) fn ensure_not_pending(&self) -> Result<(), FenceError> {
        if self.is_pending() {
            return Err(FenceError::CallbackBusy);
        }
        Ok(())
    }

    pub(crate) fn set_state(&self, state: CallbackState) {
        *self.state.lock() = state;
    }

    pub(crate) fn slot(&self) -> Arc<Mutex<CallbackState>> {
        Arc::clone(&self.state)
    }
}

impl Default for FenceCallback {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct PendingCallback {
    func: CallbackFn,
    // None for internal wakeup callbacks that have no registrant record
    slot: Option<Arc<Mutex<CallbackState>>>,
}

impl PendingCallback {
    pub(crate) fn fire(self, fence: &Fence) {
        if let Some(slot) = &self.slot {
            *slot.lock() = CallbackState::Fired;
        }
        (self.func)(fence);
    }

    fn mark_removed(&self) {
        if let Some(slot) = &self.slot {
            *slot.lock() = CallbackState::Removed;
        }
    }
}

/// Pending callbacks of every fence on one lock, in registration order.
///
/// Entries are keyed by the owning fence first, so each fence drains only its
/// own callbacks. Every insertion and removal is mirrored in the fence's
/// pending count.
#[derive(Default)]
pub(crate) struct CallbackList {
    entries: BTreeMap<(u64, CallbackId), PendingCallback>,
}

impl CallbackList {
    /// Append a callback tied to a registrant record.
    pub(crate) fn push(
        &mut self,
        fence: &FenceCore,
        func: CallbackFn,
        record: &FenceCallback,
    ) -> CallbackId {
        let id = self.insert(fence, func, Some(record.slot()));
        record.set_state(CallbackState::Pending(id));
        id
    }

    /// Append an internal callback with no registrant record.
    pub(crate) fn push_internal(&mut self, fence: &FenceCore, func: CallbackFn) -> CallbackId {
        self.insert(fence, func, None)
    }

    fn insert(
        &mut self,
        fence: &FenceCore,
        func: CallbackFn,
        slot: Option<Arc<Mutex<CallbackState>>>,
    ) -> CallbackId {
        let id = CallbackId::next();
        self.entries
            .insert((fence.key(), id), PendingCallback { func, slot });
        fence.note_queued();
        id
    }

    /// Unlink `id` without firing it. Returns `false` if it is not queued on
    /// `fence`.
    pub(crate) fn remove(&mut self, fence: &FenceCore, id: CallbackId) -> bool {
        match self.entries.remove(&(fence.key(), id)) {
            Some(pending) => {
                fence.note_unlinked();
                pending.mark_removed();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, fence: &FenceCore, id: CallbackId) -> bool {
        self.entries.contains_key(&(fence.key(), id))
    }

    /// Unlink the oldest pending callback of `fence`.
    pub(crate) fn pop_first(&mut self, fence: &FenceCore) -> Option<PendingCallback> {
        let key = fence.key();
        let (&entry, _) = self
            .entries
            .range((key, CallbackId::FIRST)..=(key, CallbackId::LAST))
            .next()?;
        let pending = self.entries.remove(&entry)?;
        fence.note_unlinked();
        Some(pending)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::FenceLock;

    fn noop() -> CallbackFn {
        Box::new(|_| {})
    }

    fn core() -> FenceCore {
        FenceCore::new(1, 1, FenceLock::new())
    }

    #[test]
    fn push_marks_record_pending() {
        let fence = core();
        let mut list = CallbackList::default();
        let record = FenceCallback::new();
        assert_eq!(record.state(), CallbackState::Idle);

        let id = list.push(&fence, noop(), &record);
        assert_eq!(record.state(), CallbackState::Pending(id));
        assert!(record.ensure_not_pending().is_err());
        assert_eq!(list.len(), 1);
        assert_eq!(fence.pending_callbacks(), 1);
    }

    #[test]
    fn remove_marks_record_removed() {
        let fence = core();
        let mut list = CallbackList::default();
        let record = FenceCallback::new();
        let id = list.push(&fence, noop(), &record);

        assert!(list.remove(&fence, id));
        assert_eq!(record.state(), CallbackState::Removed);
        assert!(!list.remove(&fence, id));
        assert_eq!(list.len(), 0);
        assert_eq!(fence.pending_callbacks(), 0);
        assert!(record.ensure_not_pending().is_ok());
    }

    #[test]
    fn ids_are_ordered_by_insertion() {
        let fence = core();
        let mut list = CallbackList::default();
        let first = list.push_internal(&fence, noop());
        let second = list.push_internal(&fence, noop());
        assert!(first < second);
        assert!(list.contains(&fence, first));
        assert!(list.pop_first(&fence).is_some());
        assert!(!list.contains(&fence, first));
        assert!(list.contains(&fence, second));
    }

    #[test]
    fn entries_of_other_fences_are_untouched() {
        let a = core();
        let b = core();
        let mut list = CallbackList::default();
        let on_b = list.push_internal(&b, noop());
        let on_a = list.push_internal(&a, noop());

        assert!(!list.remove(&a, on_b));
        assert!(list.pop_first(&a).is_some());
        assert!(list.pop_first(&a).is_none());
        assert!(!list.contains(&a, on_a));
        assert!(list.contains(&b, on_b));
        assert_eq!((a.pending_callbacks(), b.pending_callbacks()), (0, 1));
        assert!(list.remove(&b, on_b));
    }

    #[test]
    fn callback_id_display() {
        let fence = core();
        let mut list = CallbackList::default();
        let id = list.push_internal(&fence, noop());
        assert!(id.to_string().starts_with("CallbackId("));
        assert!(id.raw() > 0);
        assert!(list.remove(&fence, id));
    }
}
