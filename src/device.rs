//! The simulated device: blocks, page mapping and the host write path.
//!
//! `Device` owns the block array, the forward map (LPN to physical slot),
//! the reverse map (slot to LPN), the logical clock and every aggregate
//! counter. Writes are out-of-place: overwriting an LPN invalidates its old
//! slot and programs a fresh one picked by the allocator in `block_alloc`.
//! The reverse map is the only index GC consults during migration; the
//! forward map is never scanned.

use hashbrown::HashMap;
use log::trace;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::block::{Block, StreamId};
use crate::block_alloc::AllocMode;
use crate::config::SimConfig;
use crate::error::{Errno, Error, Result};
use crate::gc::GcEvent;
use crate::{BlockId, Lpn, Ppn, Step};

#[derive(Debug)]
pub struct Device {
    pub(crate) cfg: SimConfig,
    pub(crate) blocks: Vec<Block>,
    pub(crate) mapping: HashMap<Lpn, Ppn>,
    pub(crate) reverse_map: HashMap<Ppn, Lpn>,
    pub(crate) clock: Step,
    /// Current write head per stream, if any.
    pub(crate) active_block: [Option<BlockId>; StreamId::COUNT],
    /// Last write step per LPN, for recency-based hotness.
    pub(crate) lpn_last_write: HashMap<Lpn, Step>,
    pub(crate) rng: SmallRng,

    pub(crate) host_write_pages: u64,
    pub(crate) device_write_pages: u64,
    pub(crate) gc_count: u64,
    pub(crate) gc_total_time: f64,
    pub(crate) gc_durations: Vec<f64>,
    pub(crate) gc_event_log: Vec<GcEvent>,
}

impl Device {
    /// Build a device from a validated configuration.
    pub fn new(cfg: SimConfig) -> Result<Self> {
        cfg.validate()?;
        let blocks = (0..cfg.num_blocks)
            .map(|_| Block::new(cfg.pages_per_block))
            .collect();
        let rng = SmallRng::seed_from_u64(cfg.rng_seed);
        Ok(Device {
            blocks,
            mapping: HashMap::new(),
            reverse_map: HashMap::new(),
            clock: 0,
            active_block: [None; StreamId::COUNT],
            lpn_last_write: HashMap::new(),
            rng,
            host_write_pages: 0,
            device_write_pages: 0,
            gc_count: 0,
            gc_total_time: 0.0,
            gc_durations: Vec::new(),
            gc_event_log: Vec::new(),
            cfg,
        })
    }

    /// Service one host page write to `lpn`.
    ///
    /// Invalidates the previous location (if mapped), routes the write to a
    /// stream, allocates a page on the destination head and records the new
    /// mapping. Fails with `OutOfSpace` when no destination exists.
    pub fn write(&mut self, lpn: Lpn) -> Result<()> {
        self.clock += 1;

        if let Some(&(b, p)) = self.mapping.get(&lpn) {
            self.blocks[b].invalidate(p, self.clock, self.cfg.ewma_lambda);
            self.reverse_map.remove(&(b, p));
        }

        let stream = self.route_stream(lpn);
        let mut dst = self
            .acquire_dest_block(AllocMode::Host, stream)
            .map_err(host_out_of_space)?;
        let page = match self.blocks[dst].allocate_free_page() {
            Some(page) => page,
            None => {
                // Head exhausted between selection and allocation: rotate
                // once and retry.
                self.active_block[stream.index()] = None;
                dst = self
                    .acquire_dest_block(AllocMode::Host, stream)
                    .map_err(host_out_of_space)?;
                self.blocks[dst].allocate_free_page().ok_or(Error::with_msg(
                    Errno::AllocatorInconsistency,
                    "head rotated onto a block without free pages",
                ))?
            }
        };

        self.mapping.insert(lpn, (dst, page));
        self.reverse_map.insert((dst, page), lpn);
        self.lpn_last_write.insert(lpn, self.clock);
        self.blocks[dst].mark_programmed(self.clock);
        self.host_write_pages += 1;
        self.device_write_pages += 1;
        trace!("write lpn={} -> ({}, {}) step={}", lpn, dst, page, self.clock);
        Ok(())
    }

    /// Discard `lpn`. Unmapped LPNs are a no-op beyond the clock tick; no
    /// host or device write is counted either way.
    pub fn trim(&mut self, lpn: Lpn) {
        self.clock += 1;
        let Some((b, p)) = self.mapping.remove(&lpn) else {
            return;
        };
        self.blocks[b].invalidate(p, self.clock, self.cfg.ewma_lambda);
        self.reverse_map.remove(&(b, p));
        self.blocks[b].mark_trimmed();
        self.lpn_last_write.remove(&lpn);
        trace!("trim lpn={} freed ({}, {}) step={}", lpn, b, p, self.clock);
    }

    /// Erase a block and drop any write head parked on it.
    pub(crate) fn erase_block(&mut self, idx: BlockId) {
        self.blocks[idx].erase();
        for head in self.active_block.iter_mut() {
            if *head == Some(idx) {
                *head = None;
            }
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn clock(&self) -> Step {
        self.clock
    }

    pub fn total_pages(&self) -> usize {
        self.cfg.total_pages()
    }

    pub fn free_pages(&self) -> usize {
        self.blocks.iter().map(|b| b.free_count()).sum()
    }

    /// Number of completely-free blocks.
    pub fn free_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_fully_free()).count()
    }

    pub fn mapped_lpns(&self) -> usize {
        self.mapping.len()
    }

    pub fn lookup(&self, lpn: Lpn) -> Option<Ppn> {
        self.mapping.get(&lpn).copied()
    }

    pub fn host_write_pages(&self) -> u64 {
        self.host_write_pages
    }

    pub fn device_write_pages(&self) -> u64 {
        self.device_write_pages
    }

    /// Write amplification so far; 0 until the first host write.
    pub fn waf(&self) -> f64 {
        if self.host_write_pages == 0 {
            return 0.0;
        }
        self.device_write_pages as f64 / self.host_write_pages as f64
    }

    pub fn gc_count(&self) -> u64 {
        self.gc_count
    }

    pub fn gc_total_time(&self) -> f64 {
        self.gc_total_time
    }

    pub fn gc_durations(&self) -> &[f64] {
        &self.gc_durations
    }

    pub fn gc_event_log(&self) -> &[GcEvent] {
        &self.gc_event_log
    }

    pub fn erase_counts(&self) -> Vec<u64> {
        self.blocks.iter().map(|b| b.erase_count()).collect()
    }

    /// Pick uniformly among `candidates` with the device RNG.
    pub(crate) fn choose(&mut self, candidates: &[BlockId]) -> Option<BlockId> {
        use rand::Rng;
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[self.rng.random_range(0..candidates.len())])
    }
}

/// A host write that cannot find any destination is out of space; other
/// allocator failures pass through unchanged.
fn host_out_of_space(err: Error) -> Error {
    if err.errno() == Errno::NoDestination {
        Error::with_msg(Errno::OutOfSpace, "no destination block for host write")
    } else {
        err
    }
}

#[cfg(test)]
impl Device {
    /// Structural invariant battery used across the test suite.
    pub(crate) fn assert_consistent(&self) {
        use crate::block::PageState;

        let ppb = self.cfg.pages_per_block;
        for (i, blk) in self.blocks.iter().enumerate() {
            let mut valid = 0;
            let mut invalid = 0;
            for p in 0..ppb {
                match blk.page(p) {
                    PageState::Valid => valid += 1,
                    PageState::Invalid => invalid += 1,
                    PageState::Free => {}
                }
            }
            assert_eq!(blk.valid_count(), valid, "valid counter drift in block {}", i);
            assert_eq!(
                blk.invalid_count(),
                invalid,
                "invalid counter drift in block {}",
                i
            );
            assert_eq!(blk.valid_count() + blk.invalid_count() + blk.free_count(), ppb);
        }

        let total_valid: usize = self.blocks.iter().map(|b| b.valid_count()).sum();
        assert_eq!(total_valid, self.mapping.len());
        assert_eq!(self.reverse_map.len(), self.mapping.len());

        for (&lpn, &(b, p)) in self.mapping.iter() {
            assert_eq!(self.blocks[b].page(p), PageState::Valid);
            assert_eq!(self.reverse_map.get(&(b, p)), Some(&lpn));
        }
        for (i, blk) in self.blocks.iter().enumerate() {
            for p in 0..ppb {
                if blk.page(p) == PageState::Valid {
                    let lpn = *self
                        .reverse_map
                        .get(&(i, p))
                        .expect("valid slot missing from reverse map");
                    assert_eq!(self.mapping.get(&lpn), Some(&(i, p)));
                }
            }
        }

        assert!(self.host_write_pages <= self.device_write_pages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::PageState;

    fn small_device() -> Device {
        let cfg = SimConfig {
            num_blocks: 4,
            pages_per_block: 4,
            user_capacity_ratio: 1.0,
            gc_free_block_threshold: 0.0,
            rng_seed: 1,
            ..Default::default()
        };
        Device::new(cfg).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = SimConfig {
            pages_per_block: 0,
            ..Default::default()
        };
        assert_eq!(
            Device::new(cfg).unwrap_err().errno(),
            Errno::InvalidConfig
        );
    }

    #[test]
    fn write_maps_and_counts() {
        let mut dev = small_device();
        dev.write(7).unwrap();
        assert_eq!(dev.clock(), 1);
        assert_eq!(dev.host_write_pages(), 1);
        assert_eq!(dev.device_write_pages(), 1);
        let (b, p) = dev.lookup(7).unwrap();
        assert_eq!(dev.blocks()[b].page(p), PageState::Valid);
        assert_eq!(dev.blocks()[b].last_prog_step(), 1);
        dev.assert_consistent();
    }

    #[test]
    fn overwrite_is_out_of_place() {
        let mut dev = small_device();
        dev.write(3).unwrap();
        let old = dev.lookup(3).unwrap();
        dev.write(3).unwrap();
        let new = dev.lookup(3).unwrap();
        assert_ne!(old, new);
        assert_eq!(dev.blocks()[old.0].page(old.1), PageState::Invalid);
        assert_eq!(dev.blocks()[old.0].last_invalid_step(), 2);
        assert!(dev.blocks()[old.0].inv_ewma() > 0.0);
        assert_eq!(dev.mapped_lpns(), 1);
        dev.assert_consistent();
    }

    #[test]
    fn trim_unmaps_without_counting_writes() {
        let mut dev = small_device();
        dev.write(0).unwrap();
        let (b, p) = dev.lookup(0).unwrap();
        dev.trim(0);
        assert_eq!(dev.clock(), 2);
        assert_eq!(dev.lookup(0), None);
        assert_eq!(dev.blocks()[b].page(p), PageState::Invalid);
        assert_eq!(dev.blocks()[b].trimmed_pages(), 1);
        assert_eq!(dev.host_write_pages(), 1);
        assert_eq!(dev.device_write_pages(), 1);
        dev.assert_consistent();
    }

    #[test]
    fn trim_of_unmapped_lpn_only_ticks_the_clock() {
        let mut dev = small_device();
        dev.trim(99);
        assert_eq!(dev.clock(), 1);
        assert_eq!(dev.mapped_lpns(), 0);
        assert_eq!(dev.free_pages(), dev.total_pages());
        dev.assert_consistent();
    }

    #[test]
    fn fill_and_overwrite_round() {
        // Geometry 4x4, threshold 0, greedy never consulted: two rounds of
        // writes to the same four LPNs stay within two blocks and fire no GC.
        let mut dev = small_device();
        for lpn in [0, 1, 2, 3, 0, 1, 2, 3] {
            dev.write(lpn).unwrap();
        }
        assert_eq!(dev.host_write_pages(), 8);
        assert_eq!(dev.device_write_pages(), 8);
        assert_eq!(dev.gc_count(), 0);
        assert_eq!(dev.mapped_lpns(), 4);
        let touched = dev.blocks().iter().filter(|b| b.used() > 0).count();
        assert_eq!(touched, 2);
        dev.assert_consistent();
    }

    #[test]
    fn recency_updates_on_each_write() {
        let mut dev = small_device();
        dev.write(5).unwrap();
        dev.write(6).unwrap();
        dev.write(5).unwrap();
        assert_eq!(dev.lpn_last_write.get(&5), Some(&3));
        assert_eq!(dev.lpn_last_write.get(&6), Some(&2));
        dev.trim(5);
        assert_eq!(dev.lpn_last_write.get(&5), None);
    }
}
