// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

// Fence core
mod callback;
mod context;
mod error;
mod fence;
mod lock;
mod ops;
mod status;

// Waiting
mod awaiter;
mod interrupt;
mod wait;

// Backends
mod seqno;
mod timeline;

// Ambient
pub mod config;
pub mod logging;

// ── Re-exports ───────────────────────────────────────────────────────

pub use awaiter::FenceAwaiter;
pub use callback::{CallbackId, CallbackState, FenceCallback};
pub use config::{ConfigError, FenceConfig, WaitConfig};
pub use context::context_alloc;
pub use error::FenceError;
pub use fence::{Fence, FenceCore};
pub use interrupt::Interrupter;
pub use lock::{FenceLock, FenceLockGuard};
pub use ops::{FenceOps, LockedFence};
pub use seqno::{SeqnoCondition, SeqnoFence, SyncBuffer};
pub use status::{Timeout, WaitAnyStatus, WaitStatus};
pub use timeline::SoftTimeline;
pub use wait::wait_any_timeout;
