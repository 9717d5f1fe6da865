//! Unprocessed height range: where the next tick starts and stops.

use serde::{Deserialize, Serialize};

/// The inclusive range of block heights not yet present in the index.
///
/// The range is derived, never stored: it starts one past the highest indexed
/// block (or at genesis) and ends at the chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightRange {
    /// First height to process.
    pub next: u64,
    /// Latest height known to the gateway.
    pub latest: u64,
}

impl HeightRange {
    /// Build the range from the last indexed height and the chain head.
    pub fn unprocessed(last_indexed: Option<u64>, latest: u64) -> Self {
        let next = match last_indexed {
            Some(h) => h + 1,
            None => 0,
        };
        Self { next, latest }
    }

    /// Returns `true` if there is nothing to process.
    pub fn is_empty(&self) -> bool {
        self.next > self.latest
    }

    /// Number of heights in the range.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.latest - self.next + 1
        }
    }

    /// Heights in ascending order.
    pub fn heights(&self) -> std::ops::RangeInclusive<u64> {
        self.next..=self.latest
    }
}
