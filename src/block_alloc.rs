//! Destination-block acquisition.
//!
//! One entry point serves both the host write path and GC migration; the
//! difference between the two is a mode flag, because the reserved-free
//! rules are the easiest place in the whole simulator to get wrong when
//! they are re-derived at every call site.
//!
//! Host mode keeps a per-stream write head, prefers partially-free blocks
//! when rotating, and spends completely-free blocks only while the count
//! stays above the reserve (with a logged exception for forward progress,
//! restored by the foreground threshold GC). GC mode exists to consume the
//! reserve: it may take any block except the victim, and as a last resort
//! erases an all-invalid block on the spot to manufacture a destination.

use log::debug;

use crate::block::{Pool, StreamId};
use crate::config::HotnessMode;
use crate::device::Device;
use crate::error::Result;
use crate::return_errno_with_msg;
use crate::{BlockId, Lpn};

/// Which path is asking for a destination block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AllocMode {
    Host,
    /// Migration destination; the victim itself is never eligible.
    Gc { exclude: BlockId },
}

impl Device {
    /// Classify a host write into a stream.
    pub(crate) fn route_stream(&self, lpn: Lpn) -> StreamId {
        if !self.cfg.three_stream {
            return StreamId::User;
        }
        let hot = match self.cfg.hotness_mode {
            HotnessMode::Recency => self
                .lpn_last_write
                .get(&lpn)
                .is_some_and(|&last| self.clock - last <= self.cfg.recency_tau),
            HotnessMode::Oracle => lpn < self.cfg.oracle_hot_cut,
        };
        if hot {
            StreamId::Hot
        } else {
            StreamId::User
        }
    }

    /// Return a block with at least one FREE page for the given mode and
    /// stream, tagging newly activated destinations with their stream and
    /// pool. Fails with `NoDestination` when no block qualifies.
    pub(crate) fn acquire_dest_block(
        &mut self,
        mode: AllocMode,
        stream: StreamId,
    ) -> Result<BlockId> {
        match mode {
            AllocMode::Host => self.acquire_host_block(stream),
            AllocMode::Gc { exclude } => self.acquire_gc_block(exclude, stream),
        }
    }

    fn acquire_host_block(&mut self, stream: StreamId) -> Result<BlockId> {
        let reserve = self.cfg.reserved_free_blocks;

        if let Some(head) = self.active_block[stream.index()] {
            let blk = &self.blocks[head];
            // A still-untouched head pins the reserve; relinquish it then.
            let pinning = blk.is_fully_free() && self.free_blocks() <= reserve;
            if blk.free_count() > 0 && !pinning {
                return Ok(head);
            }
        }

        if let Some(idx) = self.pick_partial(None) {
            self.activate_host_head(idx, stream);
            return Ok(idx);
        }

        let empties = self.fully_free_blocks(None);
        if !empties.is_empty() {
            if empties.len() <= reserve {
                // No partial alternative left. Taking a reserved block keeps
                // the host moving; the threshold GC runs before the next
                // allocation and restores the reserve.
                debug!(
                    "host write dips into reserved free blocks ({} <= {})",
                    empties.len(),
                    reserve
                );
            }
            let idx = self.choose(&empties).unwrap();
            self.activate_host_head(idx, stream);
            return Ok(idx);
        }

        return_errno_with_msg!(NoDestination, "no block with free pages for host write");
    }

    fn acquire_gc_block(&mut self, exclude: BlockId, stream: StreamId) -> Result<BlockId> {
        for attempt in 0..2 {
            if let Some(idx) = self.pick_partial(Some(exclude)) {
                self.blocks[idx].tag(stream, Pool::Cold);
                return Ok(idx);
            }
            let empties = self.fully_free_blocks(Some(exclude));
            if let Some(idx) = self.choose(&empties) {
                self.blocks[idx].tag(stream, Pool::Cold);
                return Ok(idx);
            }
            if attempt > 0 {
                break;
            }
            // Manufacture a destination from a block that holds only
            // invalid pages, then retry the selection.
            let Some(dead) = self
                .blocks
                .iter()
                .enumerate()
                .find(|(i, b)| *i != exclude && b.is_all_invalid())
                .map(|(i, _)| i)
            else {
                break;
            };
            debug!("gc reclaims all-invalid block {} for a destination", dead);
            self.erase_block(dead);
        }
        return_errno_with_msg!(NoDestination, "no migration destination outside the victim");
    }

    fn activate_host_head(&mut self, idx: BlockId, stream: StreamId) {
        let pool = if stream == StreamId::Hot {
            Pool::Hot
        } else {
            Pool::Gen
        };
        self.blocks[idx].tag(stream, pool);
        self.active_block[stream.index()] = Some(idx);
    }

    /// Random partially-free block, i.e. some pages used and some free.
    fn pick_partial(&mut self, exclude: Option<BlockId>) -> Option<BlockId> {
        let candidates: Vec<BlockId> = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(i, b)| Some(*i) != exclude && b.free_count() > 0 && b.used() > 0)
            .map(|(i, _)| i)
            .collect();
        self.choose(&candidates)
    }

    fn fully_free_blocks(&self, exclude: Option<BlockId>) -> Vec<BlockId> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(i, b)| Some(*i) != exclude && b.is_fully_free())
            .map(|(i, _)| i)
            .collect()
    }
}
