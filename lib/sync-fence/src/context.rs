// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide allocation of fence context ids.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(0);

/// Reserve `num` consecutive context ids and return the first one.
///
/// A context groups the fences of one producer timeline; fences are only
/// ordered against fences of the same context. Ids are never reused.
pub fn context_alloc(num: u32) -> u64 {
    NEXT_CONTEXT.fetch_add(u64::from(num), Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_do_not_overlap() {
        let a = context_alloc(4);
        let b = context_alloc(1);
        let c = context_alloc(1);
        assert!(b >= a + 4);
        assert_ne!(b, c);
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..64).map(|_| context_alloc(1)).collect::<Vec<_>>()))
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
