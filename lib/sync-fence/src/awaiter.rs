// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::callback::FenceCallback;
use crate::fence::Fence;

/// Future that resolves once a fence signals.
///
/// The first poll registers a fence callback that wakes the task; later polls
/// only refresh the stored waker. Dropping an unresolved awaiter unlinks its
/// callback.
pub struct FenceAwaiter {
    fence: Fence,
    callback: FenceCallback,
    waker: Arc<Mutex<Option<Waker>>>,
}

impl Fence {
    /// Create a future that resolves when this fence signals.
    pub fn awaiter(&self) -> FenceAwaiter {
        FenceAwaiter {
            fence: self.clone(),
            callback: FenceCallback::new(),
            waker: Arc::new(Mutex::new(None)),
        }
    }
}

impl FenceAwaiter {
    /// The fence being awaited.
    pub fn fence(&self) -> &Fence {
        &self.fence
    }
}

impl Future for FenceAwaiter {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.fence.core().is_signaled_bit() {
            return Poll::Ready(());
        }

        // Store the waker before (re)checking so a signal in between is seen.
        *this.waker.lock() = Some(cx.waker().clone());

        if !this.callback.is_pending() {
            let waker = Arc::clone(&this.waker);
            let registered = this.fence.add_callback(&mut this.callback, move |_| {
                if let Some(waker) = waker.lock().take() {
                    waker.wake();
                }
            });
            if registered.is_err() {
                return Poll::Ready(());
            }
        }

        if this.fence.is_signaled() {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

impl Drop for FenceAwaiter {
    fn drop(&mut self) {
        self.fence.remove_callback(&self.callback);
    }
}
