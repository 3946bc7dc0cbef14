// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Timeout and wait-result types shared by every wait path.

use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

/// How long a wait may block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Block until the fence signals or the wait is interrupted.
    Forever,
    /// Block for at most the given duration.
    After(Duration),
}

impl Timeout {
    /// Shorthand for `Timeout::After(Duration::from_millis(ms))`.
    pub fn from_millis(ms: u64) -> Self {
        Self::After(Duration::from_millis(ms))
    }

    /// `true` when no budget is left.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::After(d) if d.is_zero())
    }

    /// Absolute deadline for this budget measured from `start`.
    ///
    /// `None` for [`Timeout::Forever`] or when the deadline is not
    /// representable.
    pub(crate) fn deadline_from(&self, start: Instant) -> Option<Instant> {
        match self {
            Self::Forever => None,
            Self::After(d) => start.checked_add(*d),
        }
    }

    /// Budget left at `now` given the deadline computed by
    /// [`deadline_from`](Self::deadline_from).
    pub(crate) fn remaining_at(&self, deadline: Option<Instant>, now: Instant) -> Self {
        match (self, deadline) {
            (Self::Forever, _) => Self::Forever,
            // unrepresentable deadline: the budget is effectively unbounded
            (Self::After(d), None) => Self::After(*d),
            (Self::After(_), Some(deadline)) => {
                Self::After(deadline.saturating_duration_since(now))
            }
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(d: Option<Duration>) -> Self {
        d.map_or(Self::Forever, Self::After)
    }
}

impl Display for Timeout {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forever => write!(f, "forever"),
            Self::After(d) => write!(f, "{:?}", d),
        }
    }
}

/// Outcome of a blocking wait.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// The fence signaled; carries the unused part of the timeout.
    ///
    /// A wait that found the fence already signaled reports the full
    /// timeout, so callers can tell "did not need to wait" from "used the
    /// whole budget".
    Signaled(Timeout),
    /// The timeout elapsed before the fence signaled.
    TimedOut,
    /// An interruptible wait observed a pending interrupt.
    Interrupted,
}

impl WaitStatus {
    /// `true` for [`WaitStatus::Signaled`].
    pub fn is_signaled(&self) -> bool {
        matches!(self, Self::Signaled(_))
    }

    /// Remaining budget on success, `None` otherwise.
    pub fn remaining(&self) -> Option<Timeout> {
        match self {
            Self::Signaled(remaining) => Some(*remaining),
            _ => None,
        }
    }
}

/// Outcome of [`wait_any_timeout`](crate::wait_any_timeout).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitAnyStatus {
    /// The fence at `index` signaled; carries the unused part of the timeout.
    Signaled {
        /// Position of a signaled fence in the input slice.
        index: usize,
        /// Unused part of the timeout.
        remaining: Timeout,
    },
    /// The timeout elapsed before any fence signaled.
    TimedOut,
    /// An interruptible wait observed a pending interrupt.
    Interrupted,
}
