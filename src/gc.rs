//! Garbage collection.
//!
//! One call to `collect_garbage` reclaims exactly one victim block: the
//! policy (or a greedy fallback) picks it, valid pages migrate to
//! destinations acquired in GC mode, the victim is erased, and exactly one
//! event record is emitted. Migration walks the victim's pages in ascending
//! order and resolves LPNs through the reverse map only.

use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::block::PageState;
use crate::block_alloc::AllocMode;
use crate::device::Device;
use crate::error::{Errno, Error, Result};
use crate::policy::VictimPolicy;
use crate::{BlockId, Step};

/// Why a collection was started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcCause {
    /// Free-block ratio fell to the foreground threshold.
    FgThreshold,
    /// Safety net: a write arrived with zero free pages.
    #[serde(rename = "fg_nofree")]
    FgNoFree,
    /// Opportunistic background cadence.
    BgToken,
}

impl GcCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            GcCause::FgThreshold => "fg_threshold",
            GcCause::FgNoFree => "fg_nofree",
            GcCause::BgToken => "bg_token",
        }
    }
}

/// Record of one collection, emitted once per invocation.
#[derive(Clone, Debug, Serialize)]
pub struct GcEvent {
    pub step: Step,
    pub cause: GcCause,
    pub victim: BlockId,
    pub moved_valid: usize,
    pub freed_pages: usize,
    /// Wall-clock seconds; excluded from determinism guarantees.
    pub duration_s: f64,
    pub free_blocks_after: usize,
    pub v_valid_before: usize,
    pub v_invalid_before: usize,
    pub v_inv_ewma: f64,
    pub v_erase: u64,
    /// Winning policy score, absent when the greedy fallback chose.
    pub score: Option<f64>,
}

/// Victim stats captured before any migration touches the block.
struct VictimSnapshot {
    valid: usize,
    invalid: usize,
    inv_ewma: f64,
    erase: u64,
}

impl Device {
    /// Run one collection under the given policy.
    pub fn collect_garbage(&mut self, policy: &dyn VictimPolicy, cause: GcCause) -> Result<()> {
        let start = Instant::now();

        let (victim, score) = match policy.pick_victim(&self.blocks, self.clock) {
            Some(v) => (v.index, Some(v.score)),
            None => (
                self.fallback_victim()
                    .ok_or(Error::with_msg(Errno::NoVictim, "every block is empty"))?,
                None,
            ),
        };
        let stream = self.blocks[victim].stream_id();
        let before = VictimSnapshot {
            valid: self.blocks[victim].valid_count(),
            invalid: self.blocks[victim].invalid_count(),
            inv_ewma: self.blocks[victim].inv_ewma(),
            erase: self.blocks[victim].erase_count(),
        };

        if before.valid == 0 {
            // Nothing to migrate: reclaim in place.
            self.erase_block(victim);
            self.finish_collection(start, cause, victim, 0, before, score);
            return Ok(());
        }

        // Pre-reserve a destination so the migration loop can always make
        // its first move.
        let mut dest = self.acquire_dest_block(AllocMode::Gc { exclude: victim }, stream)?;
        let mut moved = 0usize;
        for page in 0..self.cfg.pages_per_block {
            if self.blocks[victim].page(page) != PageState::Valid {
                continue;
            }
            let Some(&lpn) = self.reverse_map.get(&(victim, page)) else {
                debug!("valid slot ({}, {}) missing from reverse map", victim, page);
                continue;
            };
            let dest_page = match self.blocks[dest].allocate_free_page() {
                Some(p) => p,
                None => {
                    // Destination ran dry mid-migration: acquire a new one
                    // and retry this page once.
                    dest = self.acquire_dest_block(AllocMode::Gc { exclude: victim }, stream)?;
                    self.blocks[dest]
                        .allocate_free_page()
                        .ok_or(Error::with_msg(
                            Errno::AllocatorInconsistency,
                            "fresh gc destination has no free page",
                        ))?
                }
            };

            self.blocks[victim].invalidate(page, self.clock, self.cfg.ewma_lambda);
            self.reverse_map.remove(&(victim, page));
            self.mapping.insert(lpn, (dest, dest_page));
            self.reverse_map.insert((dest, dest_page), lpn);
            self.blocks[dest].mark_programmed(self.clock);
            self.device_write_pages += 1;
            moved += 1;
        }

        self.erase_block(victim);
        self.finish_collection(start, cause, victim, moved, before, score);
        Ok(())
    }

    /// Greedy fallback when the policy abstains: most invalid pages wins,
    /// ties to the lowest index, empty blocks excluded.
    fn fallback_victim(&self) -> Option<BlockId> {
        let mut best: Option<(BlockId, usize)> = None;
        for (i, blk) in self.blocks.iter().enumerate() {
            if blk.used() == 0 {
                continue;
            }
            if best.map_or(true, |(_, inv)| blk.invalid_count() > inv) {
                best = Some((i, blk.invalid_count()));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Close the books on a successful collection. The single emission
    /// point for GC events.
    fn finish_collection(
        &mut self,
        start: Instant,
        cause: GcCause,
        victim: BlockId,
        moved: usize,
        before: VictimSnapshot,
        score: Option<f64>,
    ) {
        let duration_s = start.elapsed().as_secs_f64();
        self.gc_count += 1;
        self.gc_total_time += duration_s;
        self.gc_durations.push(duration_s);
        let event = GcEvent {
            step: self.clock,
            cause,
            victim,
            moved_valid: moved,
            freed_pages: self.cfg.pages_per_block - moved,
            duration_s,
            free_blocks_after: self.free_blocks(),
            v_valid_before: before.valid,
            v_invalid_before: before.invalid,
            v_inv_ewma: before.inv_ewma,
            v_erase: before.erase,
            score,
        };
        debug!(
            "gc #{} cause={} victim={} moved={} freed={} free_blocks={}",
            self.gc_count,
            cause.as_str(),
            victim,
            moved,
            event.freed_pages,
            event.free_blocks_after
        );
        self.gc_event_log.push(event);
    }
}
