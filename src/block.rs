//! Physical erase blocks.
//!
//! A `Block` owns an ordered array of page slots and the counters derived
//! from it. All state transitions go through `allocate_free_page`,
//! `invalidate` and `erase`; nothing outside this module flips a page state
//! directly, so the counters always match the array.

use serde::{Deserialize, Serialize};

use crate::{PageId, Step};

/// State of a single page slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageState {
    Free,
    Valid,
    Invalid,
}

/// Write stream a block was last allocated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    /// The neutral stream; everything lands here in single-stream mode.
    User,
    Hot,
    Cold,
}

impl StreamId {
    pub(crate) const COUNT: usize = 3;

    pub(crate) fn index(self) -> usize {
        match self {
            StreamId::User => 0,
            StreamId::Hot => 1,
            StreamId::Cold => 2,
        }
    }
}

/// Destination pool a block was last allocated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// General pool, the neutral default.
    Gen,
    Hot,
    Cold,
}

/// One physical erase block.
#[derive(Clone, Debug)]
pub struct Block {
    pages: Vec<PageState>,
    valid_count: usize,
    invalid_count: usize,
    erase_count: u64,
    trimmed_pages: usize,
    last_prog_step: Step,
    last_invalid_step: Step,
    inv_ewma: f64,
    stream_id: StreamId,
    pool: Pool,
}

impl Block {
    pub fn new(pages_per_block: usize) -> Self {
        Block {
            pages: vec![PageState::Free; pages_per_block],
            valid_count: 0,
            invalid_count: 0,
            erase_count: 0,
            trimmed_pages: 0,
            last_prog_step: 0,
            last_invalid_step: 0,
            inv_ewma: 0.0,
            stream_id: StreamId::User,
            pool: Pool::Gen,
        }
    }

    /// Transition the lowest-indexed FREE slot to VALID and return its index,
    /// or `None` if the block is full. Recording `last_prog_step` is the
    /// caller's job once the write is bound to the logical clock.
    pub fn allocate_free_page(&mut self) -> Option<PageId> {
        let idx = self.pages.iter().position(|&st| st == PageState::Free)?;
        self.pages[idx] = PageState::Valid;
        self.valid_count += 1;
        Some(idx)
    }

    /// Transition a VALID slot to INVALID, updating counters, the last
    /// invalidation step and the invalidation EWMA. A no-op on slots that
    /// are already INVALID. Invalidating a FREE slot is a caller bug.
    pub fn invalidate(&mut self, page: PageId, step: Step, lambda: f64) {
        debug_assert!(
            self.pages[page] != PageState::Free,
            "invalidating a FREE slot"
        );
        if self.pages[page] != PageState::Valid {
            return;
        }
        self.pages[page] = PageState::Invalid;
        self.valid_count -= 1;
        self.invalid_count += 1;
        self.last_invalid_step = step;
        self.inv_ewma = (1.0 - lambda) * self.inv_ewma + lambda;
    }

    /// Reset every slot to FREE and clear all per-cycle state; the erase
    /// counter is the only survivor.
    pub fn erase(&mut self) {
        self.pages.fill(PageState::Free);
        self.valid_count = 0;
        self.invalid_count = 0;
        self.trimmed_pages = 0;
        self.last_prog_step = 0;
        self.last_invalid_step = 0;
        self.inv_ewma = 0.0;
        self.erase_count += 1;
    }

    pub(crate) fn mark_programmed(&mut self, step: Step) {
        self.last_prog_step = step;
    }

    pub(crate) fn mark_trimmed(&mut self) {
        self.trimmed_pages += 1;
    }

    pub(crate) fn tag(&mut self, stream_id: StreamId, pool: Pool) {
        self.stream_id = stream_id;
        self.pool = pool;
    }

    pub fn page(&self, page: PageId) -> PageState {
        self.pages[page]
    }

    pub fn pages_per_block(&self) -> usize {
        self.pages.len()
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid_count
    }

    pub fn free_count(&self) -> usize {
        self.pages.len() - self.valid_count - self.invalid_count
    }

    /// Pages that are VALID or INVALID.
    pub fn used(&self) -> usize {
        self.valid_count + self.invalid_count
    }

    /// True when every slot is FREE.
    pub fn is_fully_free(&self) -> bool {
        self.used() == 0
    }

    /// True when the block holds nothing worth migrating.
    pub fn is_all_invalid(&self) -> bool {
        self.valid_count == 0 && self.invalid_count > 0
    }

    pub fn erase_count(&self) -> u64 {
        self.erase_count
    }

    pub fn trimmed_pages(&self) -> usize {
        self.trimmed_pages
    }

    pub fn last_prog_step(&self) -> Step {
        self.last_prog_step
    }

    pub fn last_invalid_step(&self) -> Step {
        self.last_invalid_step
    }

    pub fn inv_ewma(&self) -> f64 {
        self.inv_ewma
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    /// `invalid / used` for non-empty blocks, 0 otherwise.
    pub fn invalid_ratio(&self) -> f64 {
        let used = self.used();
        if used == 0 {
            return 0.0;
        }
        self.invalid_count as f64 / used as f64
    }

    /// Last step this block saw a program or an invalidation.
    pub fn last_activity(&self) -> Step {
        self.last_prog_step.max(self.last_invalid_step)
    }

    /// Erase count normalized by the device-wide maximum; 0 when no block
    /// has been erased yet.
    pub fn wear_norm(&self, max_erase: u64) -> f64 {
        if max_erase == 0 {
            return 0.0;
        }
        self.erase_count as f64 / max_erase as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAMBDA: f64 = 0.3;

    #[test]
    fn allocates_lowest_free_slot_first() {
        let mut blk = Block::new(4);
        assert_eq!(blk.allocate_free_page(), Some(0));
        assert_eq!(blk.allocate_free_page(), Some(1));
        blk.invalidate(0, 1, LAMBDA);
        // Slot 0 is INVALID now, not FREE, so allocation keeps moving up.
        assert_eq!(blk.allocate_free_page(), Some(2));
        assert_eq!(blk.allocate_free_page(), Some(3));
        assert_eq!(blk.allocate_free_page(), None);
    }

    #[test]
    fn counters_track_page_states() {
        let mut blk = Block::new(4);
        blk.allocate_free_page();
        blk.allocate_free_page();
        blk.allocate_free_page();
        blk.invalidate(1, 5, LAMBDA);
        assert_eq!(blk.valid_count(), 2);
        assert_eq!(blk.invalid_count(), 1);
        assert_eq!(blk.free_count(), 1);
        assert_eq!(blk.used(), 3);
        assert_eq!(blk.valid_count() + blk.invalid_count() + blk.free_count(), 4);
        assert_eq!(blk.last_invalid_step(), 5);
    }

    #[test]
    fn invalidate_is_idempotent_on_invalid_slots() {
        let mut blk = Block::new(2);
        blk.allocate_free_page();
        blk.invalidate(0, 3, LAMBDA);
        let ewma = blk.inv_ewma();
        blk.invalidate(0, 9, LAMBDA);
        assert_eq!(blk.invalid_count(), 1);
        assert_eq!(blk.last_invalid_step(), 3);
        assert_eq!(blk.inv_ewma(), ewma);
    }

    #[test]
    fn ewma_converges_toward_one() {
        let mut blk = Block::new(8);
        let mut expected = 0.0;
        for p in 0..8 {
            blk.allocate_free_page();
            blk.invalidate(p, p as Step + 1, LAMBDA);
            expected = (1.0 - LAMBDA) * expected + LAMBDA;
        }
        assert!((blk.inv_ewma() - expected).abs() < 1e-12);
        assert!(blk.inv_ewma() > 0.0 && blk.inv_ewma() < 1.0);
    }

    #[test]
    fn erase_resets_everything_but_the_erase_counter() {
        let mut blk = Block::new(4);
        for p in 0..4 {
            blk.allocate_free_page();
            blk.invalidate(p, 7, LAMBDA);
        }
        blk.mark_trimmed();
        blk.mark_programmed(7);
        let before = blk.erase_count();
        blk.erase();
        assert_eq!(blk.erase_count(), before + 1);
        assert_eq!(blk.valid_count(), 0);
        assert_eq!(blk.invalid_count(), 0);
        assert_eq!(blk.trimmed_pages(), 0);
        assert_eq!(blk.free_count(), 4);
        assert_eq!(blk.last_prog_step(), 0);
        assert_eq!(blk.last_invalid_step(), 0);
        assert_eq!(blk.inv_ewma(), 0.0);
        for p in 0..4 {
            assert_eq!(blk.page(p), PageState::Free);
        }
    }

    #[test]
    fn derived_quantities_guard_empty_and_unworn_blocks() {
        let blk = Block::new(4);
        assert_eq!(blk.invalid_ratio(), 0.0);
        assert_eq!(blk.wear_norm(0), 0.0);

        let mut blk = Block::new(4);
        blk.allocate_free_page();
        blk.allocate_free_page();
        blk.invalidate(0, 2, LAMBDA);
        blk.mark_programmed(6);
        assert_eq!(blk.invalid_ratio(), 0.5);
        assert_eq!(blk.last_activity(), 6);
        blk.erase();
        assert_eq!(blk.wear_norm(4), 0.25);
    }
}
