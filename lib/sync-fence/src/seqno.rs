// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fences tied to a sequence number in shared memory.
//!
//! A [`SeqnoFence`] wraps a backend [`FenceOps`] and a reference to a
//! [`SyncBuffer`] into which the producer writes its progress. All four fence
//! operations forward to the wrapped backend, which receives the outer fence
//! and can recover the wrapper with [`SeqnoFence::from_fence`]. Release drops
//! the buffer reference before handing over to the backend's own release.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::FenceError;
use crate::fence::{Fence, FenceCore};
use crate::lock::FenceLock;
use crate::ops::{FenceOps, LockedFence};
use crate::status::{Timeout, WaitStatus};

/// Shared memory of 32-bit sequence-number words.
///
/// Producers publish progress with [`write`](Self::write); fences compare
/// against it with [`read`](Self::read). Shared between producer and fences
/// through `Arc`.
#[derive(Debug)]
pub struct SyncBuffer {
    words: Box<[AtomicU32]>,
}

impl SyncBuffer {
    /// Allocate a zeroed buffer of `len` words.
    pub fn new(len: usize) -> Arc<Self> {
        Arc::new(Self {
            words: (0..len).map(|_| AtomicU32::new(0)).collect(),
        })
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// `true` for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Read the word at `offset`.
    pub fn read(&self, offset: usize) -> Result<u32, FenceError> {
        self.word(offset).map(|word| word.load(Ordering::Acquire))
    }

    /// Publish `value` at `offset`.
    pub fn write(&self, offset: usize, value: u32) -> Result<(), FenceError> {
        self.word(offset)
            .map(|word| word.store(value, Ordering::Release))
    }

    fn word(&self, offset: usize) -> Result<&AtomicU32, FenceError> {
        self.words.get(offset).ok_or(FenceError::OffsetOutOfRange {
            offset,
            len: self.words.len(),
        })
    }
}

/// How the buffer word is compared with the fence seqno.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SeqnoCondition {
    /// Complete once the word is at or past the seqno (with wraparound).
    #[default]
    GreaterOrEqual,
    /// Complete once the word is non-zero.
    NonZero,
}

/// Backend wrapper binding a fence to a seqno word in a [`SyncBuffer`].
pub struct SeqnoFence {
    sync_buf: Arc<SyncBuffer>,
    seqno_offset: usize,
    seqno: u32,
    condition: SeqnoCondition,
    ops: Box<dyn FenceOps>,
}

impl SeqnoFence {
    /// Create a fence on `context`/`seqno` whose completion is described by
    /// the word at `seqno_offset` of `sync_buf`.
    ///
    /// Takes its own reference to `sync_buf`, held until the fence is
    /// released.
    pub fn init(
        sync_buf: &Arc<SyncBuffer>,
        seqno_offset: usize,
        condition: SeqnoCondition,
        context: u64,
        seqno: u32,
        ops: impl FenceOps,
    ) -> Result<Fence, FenceError> {
        let wrapper = Self::wrap(sync_buf, seqno_offset, condition, seqno, ops)?;
        Ok(Fence::new(wrapper, context, seqno))
    }

    /// [`init`](Self::init) for a fence bound to a lock shared with other
    /// fences of the same producer.
    pub fn init_with_lock(
        lock: &Arc<FenceLock>,
        sync_buf: &Arc<SyncBuffer>,
        seqno_offset: usize,
        condition: SeqnoCondition,
        context: u64,
        seqno: u32,
        ops: impl FenceOps,
    ) -> Result<Fence, FenceError> {
        let wrapper = Self::wrap(sync_buf, seqno_offset, condition, seqno, ops)?;
        Ok(Fence::with_lock(wrapper, lock, context, seqno))
    }

    fn wrap(
        sync_buf: &Arc<SyncBuffer>,
        seqno_offset: usize,
        condition: SeqnoCondition,
        seqno: u32,
        ops: impl FenceOps,
    ) -> Result<Self, FenceError> {
        if seqno_offset >= sync_buf.len() {
            return Err(FenceError::OffsetOutOfRange {
                offset: seqno_offset,
                len: sync_buf.len(),
            });
        }

        Ok(Self {
            sync_buf: Arc::clone(sync_buf),
            seqno_offset,
            seqno,
            condition,
            ops: Box::new(ops),
        })
    }

    /// Recover the wrapper from a fence, or `None` if it is not a seqno fence.
    pub fn from_fence(fence: &Fence) -> Option<&SeqnoFence> {
        fence.ops_as::<SeqnoFence>()
    }

    /// The shared buffer.
    pub fn sync_buf(&self) -> &Arc<SyncBuffer> {
        &self.sync_buf
    }

    /// Word offset of the seqno in the buffer.
    pub fn seqno_offset(&self) -> usize {
        self.seqno_offset
    }

    /// The completion condition.
    pub fn condition(&self) -> SeqnoCondition {
        self.condition
    }

    /// Evaluate the condition against the current buffer contents.
    pub fn is_reached(&self) -> bool {
        // offset validated at init
        let Ok(value) = self.sync_buf.read(self.seqno_offset) else {
            return false;
        };
        match self.condition {
            SeqnoCondition::GreaterOrEqual => (value.wrapping_sub(self.seqno) as i32) >= 0,
            SeqnoCondition::NonZero => value != 0,
        }
    }
}

impl FenceOps for SeqnoFence {
    fn enable_signaling(&self, fence: &mut LockedFence<'_>) -> bool {
        self.ops.enable_signaling(fence)
    }

    fn signaled(&self, fence: &Fence) -> bool {
        self.ops.signaled(fence)
    }

    fn wait(&self, fence: &Fence, interruptible: bool, timeout: Timeout) -> WaitStatus {
        self.ops.wait(fence, interruptible, timeout)
    }

    fn release(self: Box<Self>, fence: &FenceCore) {
        let SeqnoFence { sync_buf, ops, .. } = *self;
        drop(sync_buf);
        ops.release(fence);
    }
}

impl std::fmt::Debug for SeqnoFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqnoFence")
            .field("seqno_offset", &self.seqno_offset)
            .field("seqno", &self.seqno)
            .field("condition", &self.condition)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::context_alloc;
    use std::sync::atomic::AtomicUsize;

    /// Backend polling the sync buffer through the wrapper.
    struct BufferPoll {
        released: Arc<AtomicUsize>,
    }

    impl FenceOps for BufferPoll {
        fn enable_signaling(&self, fence: &mut LockedFence<'_>) -> bool {
            SeqnoFence::from_fence(fence.fence()).is_some_and(|seqno| !seqno.is_reached())
        }

        fn signaled(&self, fence: &Fence) -> bool {
            SeqnoFence::from_fence(fence).is_some_and(SeqnoFence::is_reached)
        }

        fn release(self: Box<Self>, _fence: &FenceCore) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_backend() -> (BufferPoll, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        (
            BufferPoll {
                released: Arc::clone(&released),
            },
            released,
        )
    }

    #[test]
    fn buffer_read_write_bounds() {
        let buf = SyncBuffer::new(2);
        assert_eq!(buf.len(), 2);
        assert!(!buf.is_empty());
        buf.write(1, 9).unwrap();
        assert_eq!(buf.read(1).unwrap(), 9);
        assert_eq!(
            buf.read(2).unwrap_err(),
            FenceError::OffsetOutOfRange { offset: 2, len: 2 }
        );
        assert!(buf.write(5, 1).is_err());
    }

    #[test]
    fn init_rejects_out_of_range_offset() {
        let buf = SyncBuffer::new(1);
        let (backend, _) = poll_backend();
        let err = SeqnoFence::init(&buf, 1, SeqnoCondition::default(), context_alloc(1), 1, backend)
            .unwrap_err();
        assert!(matches!(err, FenceError::OffsetOutOfRange { offset: 1, len: 1 }));
        assert_eq!(Arc::strong_count(&buf), 1);
    }

    #[test]
    fn release_drops_buffer_and_calls_backend_once() {
        let buf = SyncBuffer::new(4);
        let (backend, released) = poll_backend();
        let fence = SeqnoFence::init(&buf, 2, SeqnoCondition::GreaterOrEqual, context_alloc(1), 5, backend)
            .unwrap();
        assert_eq!(Arc::strong_count(&buf), 2);

        let extra = fence.clone();
        drop(fence);
        assert_eq!(Arc::strong_count(&buf), 2);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(extra);
        assert_eq!(Arc::strong_count(&buf), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_fence_recovers_wrapper() {
        let buf = SyncBuffer::new(1);
        let (backend, _) = poll_backend();
        let fence =
            SeqnoFence::init(&buf, 0, SeqnoCondition::NonZero, context_alloc(1), 3, backend).unwrap();

        let wrapper = SeqnoFence::from_fence(&fence).unwrap();
        assert_eq!(wrapper.seqno_offset(), 0);
        assert_eq!(wrapper.condition(), SeqnoCondition::NonZero);
        assert!(Arc::ptr_eq(wrapper.sync_buf(), &buf));
    }

    #[test]
    fn greater_or_equal_tracks_buffer_with_wraparound() {
        let buf = SyncBuffer::new(1);
        let (backend, _) = poll_backend();
        let fence = SeqnoFence::init(&buf, 0, SeqnoCondition::GreaterOrEqual, context_alloc(1), 2, backend)
            .unwrap();
        let wrapper = SeqnoFence::from_fence(&fence).unwrap();

        buf.write(0, u32::MAX).unwrap();
        assert!(!wrapper.is_reached());
        assert!(!fence.is_signaled());

        buf.write(0, 2).unwrap();
        assert!(wrapper.is_reached());
        assert!(fence.is_signaled());
        assert!(fence.core().is_signaled_bit());
    }

    #[test]
    fn enable_signaling_forwards_and_completes_reached_fence() {
        let buf = SyncBuffer::new(1);
        buf.write(0, 7).unwrap();
        let (backend, _) = poll_backend();
        let fence = SeqnoFence::init(&buf, 0, SeqnoCondition::GreaterOrEqual, context_alloc(1), 7, backend)
            .unwrap();

        // the wrapped backend reports "already done", so the core signals now
        fence.enable_sw_signaling();
        assert!(fence.core().is_signaled_bit());
    }

    #[test]
    fn init_with_lock_shares_the_producer_lock() {
        let buf = SyncBuffer::new(2);
        let lock = FenceLock::new();
        let context = context_alloc(1);
        let (first, _) = poll_backend();
        let (second, _) = poll_backend();
        let a = SeqnoFence::init_with_lock(&lock, &buf, 0, SeqnoCondition::NonZero, context, 1, first)
            .unwrap();
        let b = SeqnoFence::init_with_lock(&lock, &buf, 1, SeqnoCondition::NonZero, context, 2, second)
            .unwrap();
        assert!(Arc::ptr_eq(a.core().lock(), &lock));
        assert!(Arc::ptr_eq(a.core().lock(), b.core().lock()));

        let err = SeqnoFence::init_with_lock(
            &lock,
            &buf,
            2,
            SeqnoCondition::default(),
            context,
            3,
            poll_backend().0,
        )
        .unwrap_err();
        assert_eq!(err, FenceError::OffsetOutOfRange { offset: 2, len: 2 });

        buf.write(1, 1).unwrap();
        assert!(!a.is_signaled());
        assert!(b.is_signaled());
    }
}
