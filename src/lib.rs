//! Discrete-event simulator of an SSD flash translation layer, built to
//! measure and compare garbage-collection policies under synthetic
//! workloads.
//!
//! The `Device` keeps a page-granular indirection map and writes
//! out-of-place through per-stream write heads; `collect_garbage` reclaims
//! one victim block per call under a pluggable `VictimPolicy`; the
//! `Simulator` drives a workload with foreground, safety-net and background
//! collections and records traces, per-GC events and an end-of-run
//! `Summary` (WAF, wear distribution, GC latency percentiles).
//!
//! Everything is single-threaded and deterministic: the device owns a
//! seeded RNG, the logical clock ticks once per host op, and identical
//! seeds replay identical runs down to the block states. Only wall-clock
//! GC durations fall outside that guarantee.
//!
//! # Usage Example
//!
//! Run a hot/cold workload under the greedy policy and print the summary.
//!
//! ```
//! let cfg = SimConfig::default();
//! let spec = WorkloadSpec {
//!     n_ops: 200_000,
//!     user_total_pages: cfg.user_total_pages(),
//!     ..Default::default()
//! };
//! let policy = policy_by_name("greedy", &PolicyParams::default())?;
//! let mut sim = Simulator::new(cfg, policy, false)?;
//! sim.warmup(0.5)?;
//! sim.run(make_workload(&spec))?;
//! sim.summary("demo").print();
//! ```

mod block;
mod block_alloc;
mod config;
mod device;
pub mod error;
mod gc;
pub mod metrics;
mod policy;
mod simulator;
mod workload;

pub use self::block::{Block, PageState, Pool, StreamId};
pub use self::config::{HotnessMode, IoProfile, LatencyModel, SimConfig};
pub use self::device::Device;
pub use self::error::{Errno, Error, Result};
pub use self::gc::{GcCause, GcEvent};
pub use self::metrics::{
    percentile, summarize, summarize_gc_events, wear_stats, GcEventDigest, GcLatencyStats,
    HostLatencyStats, Summary, WearStats,
};
pub use self::policy::{
    policy_by_name, policy_names, Atcb, Bsgc, Cat, CostBenefit, Greedy, PolicyParams, Re50315,
    Victim, VictimPolicy,
};
pub use self::simulator::{Simulator, TraceRow};
pub use self::workload::{make_workload, WorkloadOp, WorkloadSpec};

/// Index of an erase block inside the device.
pub type BlockId = usize;
/// Index of a page inside its block.
pub type PageId = usize;
/// Host-visible logical page number.
pub type Lpn = usize;
/// Physical location of a page.
pub type Ppn = (BlockId, PageId);
/// Logical clock value; one tick per host operation.
pub type Step = u64;
