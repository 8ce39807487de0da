//! Simulation configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Errno, Error, Result};
use crate::return_errno_with_msg;
use crate::{Lpn, Step};

/// How LPNs are classified as hot for multi-stream routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotnessMode {
    /// Hot if the LPN was rewritten within `recency_tau` steps.
    Recency,
    /// Hot if the LPN is below `oracle_hot_cut`.
    Oracle,
}

/// Named per-operation latency profiles.
///
/// Only cosmetic to metrics: the modeled-time fields of the run summary are
/// derived from these constants, and no allocation or GC decision reads them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoProfile {
    Default,
    Fast,
    Slow,
    QosLowlat,
}

/// Per-operation latency constants in seconds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LatencyModel {
    pub read_s: f64,
    pub program_s: f64,
    pub erase_s: f64,
    pub migrate_s: f64,
}

impl IoProfile {
    pub fn latency(&self) -> LatencyModel {
        match self {
            IoProfile::Default => LatencyModel {
                read_s: 50e-6,
                program_s: 200e-6,
                erase_s: 2e-3,
                migrate_s: 260e-6,
            },
            IoProfile::Fast => LatencyModel {
                read_s: 25e-6,
                program_s: 90e-6,
                erase_s: 1e-3,
                migrate_s: 120e-6,
            },
            IoProfile::Slow => LatencyModel {
                read_s: 110e-6,
                program_s: 450e-6,
                erase_s: 5e-3,
                migrate_s: 600e-6,
            },
            IoProfile::QosLowlat => LatencyModel {
                read_s: 40e-6,
                program_s: 150e-6,
                erase_s: 1.5e-3,
                migrate_s: 170e-6,
            },
        }
    }
}

impl LatencyModel {
    /// Modeled time for `pages` host page programs.
    pub fn host_seconds(&self, pages: u64) -> f64 {
        pages as f64 * self.program_s
    }

    /// Modeled time for one collection that migrated `moved` valid pages.
    pub fn gc_seconds(&self, moved: usize) -> f64 {
        moved as f64 * (self.read_s + self.migrate_s) + self.erase_s
    }

    fn is_positive(&self) -> bool {
        self.read_s > 0.0 && self.program_s > 0.0 && self.erase_s > 0.0 && self.migrate_s > 0.0
    }
}

/// Device geometry and simulation knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of erase blocks.
    pub num_blocks: usize,
    /// Pages per erase block.
    pub pages_per_block: usize,
    /// Page size in bytes, used only for throughput reporting.
    pub page_size_bytes: usize,
    /// User-addressable fraction of raw capacity, in (0, 1].
    pub user_capacity_ratio: f64,
    /// Foreground GC triggers when `free_blocks / num_blocks` falls to or
    /// below this ratio, in [0, 1).
    pub gc_free_block_threshold: f64,
    /// Seed for the device-owned RNG.
    pub rng_seed: u64,
    /// Smoothing factor for the per-block invalidation EWMA, in (0, 1].
    pub ewma_lambda: f64,
    pub io_profile: IoProfile,
    /// Route host writes into hot/user streams with per-stream write heads.
    pub three_stream: bool,
    pub hotness_mode: HotnessMode,
    /// Recency window (steps) for `HotnessMode::Recency`.
    pub recency_tau: Step,
    /// Hot LPN boundary for `HotnessMode::Oracle`.
    pub oracle_hot_cut: Lpn,
    /// Attempt a background collection every K host ops; 0 disables.
    pub bg_gc_every: u64,
    /// Completely-free blocks set aside for GC migration progress.
    pub reserved_free_blocks: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            num_blocks: 256,
            pages_per_block: 64,
            page_size_bytes: 4096,
            user_capacity_ratio: 0.9,
            gc_free_block_threshold: 0.05,
            rng_seed: 42,
            ewma_lambda: 0.3,
            io_profile: IoProfile::Default,
            three_stream: false,
            hotness_mode: HotnessMode::Recency,
            recency_tau: 4096,
            oracle_hot_cut: 0,
            bg_gc_every: 0,
            reserved_free_blocks: 2,
        }
    }
}

impl SimConfig {
    /// Raw page capacity of the device.
    pub fn total_pages(&self) -> usize {
        self.num_blocks * self.pages_per_block
    }

    /// Host-addressable pages; the remainder is over-provisioning.
    pub fn user_total_pages(&self) -> usize {
        (self.total_pages() as f64 * self.user_capacity_ratio).floor() as usize
    }

    /// Check all fields before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.num_blocks < 1 || self.pages_per_block < 1 {
            return_errno_with_msg!(InvalidConfig, "geometry must be at least 1x1");
        }
        if self.page_size_bytes < 1 {
            return_errno_with_msg!(InvalidConfig, "page_size_bytes must be positive");
        }
        if !(self.user_capacity_ratio > 0.0 && self.user_capacity_ratio <= 1.0) {
            return_errno_with_msg!(InvalidConfig, "user_capacity_ratio must be in (0, 1]");
        }
        if !(self.gc_free_block_threshold >= 0.0 && self.gc_free_block_threshold < 1.0) {
            return_errno_with_msg!(InvalidConfig, "gc_free_block_threshold must be in [0, 1)");
        }
        if !(self.ewma_lambda > 0.0 && self.ewma_lambda <= 1.0) {
            return_errno_with_msg!(InvalidConfig, "ewma_lambda must be in (0, 1]");
        }
        if self.reserved_free_blocks < 1 {
            return_errno_with_msg!(InvalidConfig, "reserved_free_blocks must be positive");
        }
        if !self.io_profile.latency().is_positive() {
            return Err(Error::with_msg(
                Errno::InvalidConfig,
                "latency constants must be positive",
            ));
        }
        Ok(())
    }
}
