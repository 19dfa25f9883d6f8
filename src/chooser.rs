//! Round-robin chooser over a fixed executor array.
//!
//! One shared atomic counter; the i-th call returns slot `i mod N`. Two
//! strategies, picked at construction:
//!
//! - **Power-of-two** sizes use `counter & (N - 1)` on an unsigned counter.
//! - **Generic** sizes use `abs(counter % N)` on a signed 32-bit counter. Once
//!   the counter wraps past `i32::MAX` the absolute value keeps indices in
//!   range, at the cost of a single skipped slot on the exact wrap. Callers
//!   needing strict uniformity across 4 billion calls should size the array to
//!   a power of two.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

enum Counter {
    PowerOfTwo { idx: CachePadded<AtomicU32>, mask: u32 },
    Generic { idx: CachePadded<AtomicI32> },
}

/// Distributes calls across a fixed, non-empty slice of items.
pub struct RoundRobinChooser<T> {
    items: Arc<[T]>,
    counter: Counter,
}

impl<T> RoundRobinChooser<T> {
    /// # Panics
    ///
    /// Panics if `items` is empty.
    pub fn new(items: Arc<[T]>) -> Self {
        assert!(!items.is_empty(), "chooser requires a non-empty array");
        let counter = if items.len().is_power_of_two() {
            Counter::PowerOfTwo {
                idx: CachePadded::new(AtomicU32::new(0)),
                mask: (items.len() - 1) as u32,
            }
        } else {
            Counter::Generic {
                idx: CachePadded::new(AtomicI32::new(0)),
            }
        };
        Self { items, counter }
    }

    /// Index of the next slot. Concurrent callers observe distinct counter
    /// values, so their indices differ modulo the array size.
    pub fn next_index(&self) -> usize {
        match &self.counter {
            Counter::PowerOfTwo { idx, mask } => (idx.fetch_add(1, Ordering::Relaxed) & mask) as usize,
            Counter::Generic { idx } => {
                let n = self.items.len() as i32;
                (idx.fetch_add(1, Ordering::Relaxed) % n).unsigned_abs() as usize
            }
        }
    }

    /// The next item, round-robin.
    pub fn next(&self) -> &T {
        &self.items[self.next_index()]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        // Construction rejects empty arrays.
        self.items.is_empty()
    }

    #[cfg(test)]
    fn with_start(items: Arc<[T]>, start: i32) -> Self {
        let chooser = Self::new(items);
        match &chooser.counter {
            Counter::PowerOfTwo { idx, .. } => idx.store(start as u32, Ordering::Relaxed),
            Counter::Generic { idx } => idx.store(start, Ordering::Relaxed),
        }
        chooser
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Each slot is chosen ⌊K/N⌋ or ⌈K/N⌉ times over K calls.
        #[test]
        fn distribution_is_balanced(n in 1usize..32, k in 0usize..512) {
            let items: Arc<[usize]> = (0..n).collect();
            let chooser = RoundRobinChooser::new(items);

            let mut counts = vec![0usize; n];
            for _ in 0..k {
                counts[chooser.next_index()] += 1;
            }

            for &c in &counts {
                prop_assert!(c == k / n || c == k / n + 1);
            }
        }

        /// Power-of-two chooser equals `call_count & (N - 1)` exactly.
        #[test]
        fn power_of_two_matches_mask(exp in 0u32..6, k in 0usize..512) {
            let n = 1usize << exp;
            let items: Arc<[usize]> = (0..n).collect();
            let chooser = RoundRobinChooser::new(items);

            for call in 0..k {
                prop_assert_eq!(chooser.next_index(), call & (n - 1));
            }
        }
    }
}
