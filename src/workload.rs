//! Workload operations and the synthetic generator.
//!
//! The simulator consumes any iterator of operations; bare LPNs convert to
//! writes so plain `Vec<usize>` workloads keep working. The generator
//! produces the standard update/hot-cold/trim mix used for policy
//! comparisons.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::Lpn;

/// One host operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadOp {
    Write(Lpn),
    Trim(Lpn),
}

impl From<Lpn> for WorkloadOp {
    fn from(lpn: Lpn) -> Self {
        WorkloadOp::Write(lpn)
    }
}

/// Knobs of the synthetic generator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub n_ops: usize,
    /// Probability that an op rewrites a live LPN instead of a fresh one.
    pub update_ratio: f64,
    /// Fraction of the LPN space considered hot.
    pub hot_ratio: f64,
    /// Probability that an update targets the hot region.
    pub hot_weight: f64,
    pub enable_trim: bool,
    /// Probability that an op trims a live LPN, when trims are enabled.
    pub trim_ratio: f64,
    /// Exclusive upper bound on generated LPNs.
    pub user_total_pages: usize,
    pub rng_seed: u64,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        WorkloadSpec {
            n_ops: 0,
            update_ratio: 0.8,
            hot_ratio: 0.2,
            hot_weight: 0.7,
            enable_trim: false,
            trim_ratio: 0.0,
            user_total_pages: 0,
            rng_seed: 42,
        }
    }
}

/// Generate a workload.
///
/// Fresh LPNs are handed out sequentially until `user_total_pages` is
/// exhausted; from then on every op falls back to updates. Updates steer
/// toward the hot region (LPNs below `hot_ratio * user_total_pages`) with
/// probability `hot_weight`, using bounded rejection sampling over the live
/// set. Trimmed LPNs leave the live set and are not reissued.
pub fn make_workload(spec: &WorkloadSpec) -> Vec<WorkloadOp> {
    let mut rng = SmallRng::seed_from_u64(spec.rng_seed);
    let mut ops = Vec::with_capacity(spec.n_ops);
    let mut live: Vec<Lpn> = Vec::new();
    let hot_cut = (spec.hot_ratio * spec.user_total_pages as f64) as Lpn;
    let mut next_lpn: Lpn = 0;

    for _ in 0..spec.n_ops {
        if spec.enable_trim && !live.is_empty() && rng.random::<f64>() < spec.trim_ratio {
            let idx = rng.random_range(0..live.len());
            ops.push(WorkloadOp::Trim(live.swap_remove(idx)));
            continue;
        }
        let update = !live.is_empty()
            && (next_lpn >= spec.user_total_pages || rng.random::<f64>() < spec.update_ratio);
        if update {
            let want_hot = rng.random::<f64>() < spec.hot_weight;
            ops.push(WorkloadOp::Write(pick_update(
                &mut rng, &live, hot_cut, want_hot,
            )));
        } else if next_lpn < spec.user_total_pages {
            live.push(next_lpn);
            ops.push(WorkloadOp::Write(next_lpn));
            next_lpn += 1;
        }
    }
    ops
}

/// Pick a live LPN, preferring the requested temperature class. A few
/// rejection rounds are enough to skew the mix; after that any live LPN
/// will do.
fn pick_update(rng: &mut SmallRng, live: &[Lpn], hot_cut: Lpn, want_hot: bool) -> Lpn {
    for _ in 0..8 {
        let lpn = live[rng.random_range(0..live.len())];
        if (lpn < hot_cut) == want_hot {
            return lpn;
        }
    }
    live[rng.random_range(0..live.len())]
}
