// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error codes reported by fence operations.
//!
//! None of these are fatal. The one unrecoverable misuse, releasing a fence
//! that still has pending callbacks, panics in the release path instead of
//! surfacing here.

use thiserror::Error;

/// Recoverable conditions reported to the immediate caller of a fence
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FenceError {
    /// The fence was already signaled when a signal was attempted.
    ///
    /// Purely informational: the callbacks of the fence have been (or are
    /// being) fired by whoever signaled first.
    #[error("fence already signaled")]
    AlreadySignaled,

    /// The fence completed before the callback could be queued.
    ///
    /// The callback was not registered and will never be invoked; the caller
    /// must handle the completed state itself.
    #[error("fence already signaled, callback not registered")]
    TooLate,

    /// The callback record is still pending on a fence and cannot be reused
    /// until it fires or is removed.
    #[error("callback is still pending on a fence")]
    CallbackBusy,

    /// A wait on a set of fences was given an empty set.
    #[error("no fences to wait on")]
    NoFences,

    /// A seqno word offset lies outside its sync buffer.
    #[error("seqno offset {offset} out of range for sync buffer of {len} words")]
    OffsetOutOfRange {
        /// Requested word offset.
        offset: usize,
        /// Length of the buffer in words.
        len: usize,
    },

    /// Two fences from different contexts were compared for ordering.
    #[error("fences belong to different contexts ({left} != {right})")]
    ContextMismatch {
        /// Context of the left-hand fence.
        left: u64,
        /// Context of the right-hand fence.
        right: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(FenceError::AlreadySignaled.to_string(), "fence already signaled");
        assert!(FenceError::TooLate.to_string().contains("not registered"));
        let msg = FenceError::ContextMismatch { left: 3, right: 7 }.to_string();
        assert!(msg.contains("3 != 7"));
    }
}
