//! The block availability tracker.
//!
//! Downloads and validation are decoupled: blocks arrive from the
//! network in whatever order peers deliver them and are stored at once,
//! while validation only ever consumes consecutive runs starting just
//! above the validated tip. The tracker is the bitmap between the two —
//! one bit per height above the tip, set when the block is on disk.

use bitvec::prelude::*;
use tracing::debug;

use tanager_chain::block::Height;

const INITIAL_CAPACITY: usize = 1024 * 1024;

/// A consecutive run of available blocks, ready for chunk validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    /// First height in the range (inclusive).
    pub start: Height,
    /// Last height in the range (inclusive).
    pub end: Height,
    /// Number of blocks in the range.
    pub count: u32,
}

pub struct BlockTracker {
    validated_tip: Height,
    highest_stored: Height,
    /// Bit `h - validated_tip_at_reset` is unused; the map is indexed by
    /// absolute height and grows by doubling.
    availability: BitVec,
}

impl BlockTracker {
    pub fn new(validated_tip: Height) -> BlockTracker {
        BlockTracker {
            validated_tip,
            highest_stored: validated_tip,
            availability: bitvec![0; INITIAL_CAPACITY],
        }
    }

    pub fn validated_tip(&self) -> Height {
        self.validated_tip
    }

    pub fn highest_stored(&self) -> Height {
        self.highest_stored
    }

    fn grow_to(&mut self, height: Height) {
        let needed = height.0 as usize + 1;
        if needed > self.availability.len() {
            let mut capacity = self.availability.len().max(INITIAL_CAPACITY);
            while capacity < needed {
                capacity *= 2;
            }
            self.availability.resize(capacity, false);
        }
    }

    /// Record that the block at `height` is stored on disk. Idempotent;
    /// heights at or below the validated tip are ignored (they are
    /// implicitly available).
    pub fn mark_available(&mut self, height: Height) {
        if height <= self.validated_tip {
            return;
        }
        self.grow_to(height);
        self.availability.set(height.0 as usize, true);
        if height > self.highest_stored {
            self.highest_stored = height;
        }
    }

    /// Is the block at `height` available? Always true at or below the
    /// validated tip.
    pub fn has_block(&self, height: Height) -> bool {
        if height <= self.validated_tip {
            return true;
        }
        self.availability
            .get(height.0 as usize)
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    /// The consecutive run of available blocks starting at
    /// `validated_tip + 1`, or `None` when the very next block is
    /// missing.
    pub fn find_consecutive_range(&self) -> Option<BlockRange> {
        let start = self.validated_tip.next();
        if !self.has_block(start) {
            return None;
        }
        let mut end = start;
        while self.has_block(end.next()) && end < self.highest_stored {
            end = end.next();
        }
        Some(BlockRange {
            start,
            end,
            count: end.0 - start.0 + 1,
        })
    }

    /// The first missing height above the validated tip — the block
    /// holding validation back. `None` when nothing is missing up to
    /// `highest_stored`.
    pub fn find_blocking_block(&self) -> Option<Height> {
        let mut height = self.validated_tip.next();
        while height <= self.highest_stored {
            if !self.has_block(height) {
                return Some(height);
            }
            height = height.next();
        }
        None
    }

    /// Advance the validated tip, clearing the bits it subsumes. The tip
    /// never moves backwards through this path; reorganisations go
    /// through [`BlockTracker::reset`].
    pub fn mark_validated(&mut self, new_tip: Height) {
        if new_tip <= self.validated_tip {
            return;
        }
        let from = self.validated_tip.next().0 as usize;
        let to = (new_tip.0 as usize).min(self.availability.len().saturating_sub(1));
        for index in from..=to {
            self.availability.set(index, false);
        }
        self.validated_tip = new_tip;
        if self.highest_stored < new_tip {
            self.highest_stored = new_tip;
        }
        debug!(tip = new_tip.0, "tracker advanced");
    }

    /// Forget a single height, e.g. when a stored block turns out to be
    /// corrupt or invalid and must be fetched again. Heights at or below
    /// the tip cannot be forgotten.
    pub fn mark_missing(&mut self, height: Height) {
        if height <= self.validated_tip {
            return;
        }
        if (height.0 as usize) < self.availability.len() {
            self.availability.set(height.0 as usize, false);
        }
    }

    /// Throw the bitmap away and restart from `validated_tip`. Used on a
    /// fresh sync or after a reorganisation below the tip.
    pub fn reset(&mut self, validated_tip: Height) {
        self.availability.clear();
        self.availability.resize(INITIAL_CAPACITY, false);
        self.validated_tip = validated_tip;
        self.highest_stored = validated_tip;
    }

    /// Available blocks strictly above the validated tip.
    pub fn available_count(&self) -> u32 {
        let mut count = 0;
        let mut height = self.validated_tip.next();
        while height <= self.highest_stored {
            if self.has_block(height) {
                count += 1;
            }
            height = height.next();
        }
        count
    }

    /// Missing blocks (gaps) between the tip and the highest stored
    /// height.
    pub fn missing_count(&self) -> u32 {
        if self.highest_stored <= self.validated_tip {
            return 0;
        }
        (self.highest_stored.0 - self.validated_tip.0) - self.available_count()
    }
}
