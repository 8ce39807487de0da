//! GC victim-selection policies.
//!
//! A policy is a pure function over a read-only view of the block array and
//! the current logical clock. Every policy scans for the maximum-score
//! block; blocks with no used pages are never eligible, and ties go to the
//! lowest index so runs stay reproducible. Hyperparameters are bound at
//! construction time, and a small name registry maps the command-line
//! spellings to constructors.

use lazy_static::lazy_static;

use crate::block::Block;
use crate::error::{Errno, Error, Result};
use crate::{BlockId, Step};
use serde::{Deserialize, Serialize};

/// A selected victim together with the score that won.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Victim {
    pub index: BlockId,
    pub score: f64,
}

pub trait VictimPolicy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Pick the victim block, or `None` when no block is eligible.
    fn pick_victim(&self, blocks: &[Block], now: Step) -> Option<Victim>;
}

/// Scan for the eligible block with the strictly greatest score.
fn max_score<F>(blocks: &[Block], score: F) -> Option<Victim>
where
    F: Fn(&Block) -> f64,
{
    let mut best: Option<Victim> = None;
    for (index, blk) in blocks.iter().enumerate() {
        if blk.used() == 0 {
            continue;
        }
        let s = score(blk);
        if best.as_ref().map_or(true, |b| s > b.score) {
            best = Some(Victim { index, score: s });
        }
    }
    best
}

/// Observed range of `last_activity` over non-empty blocks.
fn activity_range(blocks: &[Block]) -> (Step, Step) {
    let mut lo = Step::MAX;
    let mut hi = 0;
    for blk in blocks.iter().filter(|b| b.used() > 0) {
        let act = blk.last_activity();
        lo = lo.min(act);
        hi = hi.max(act);
    }
    if lo == Step::MAX {
        (0, 0)
    } else {
        (lo, hi)
    }
}

/// Dimensionless age in [0, 1]: oldest activity scores highest. The +1 in
/// the denominator keeps a degenerate range at zero instead of NaN.
fn age_norm(blk: &Block, lo: Step, hi: Step) -> f64 {
    (hi - blk.last_activity()) as f64 / ((hi - lo) as f64 + 1.0)
}

fn max_erase(blocks: &[Block]) -> u64 {
    blocks.iter().map(|b| b.erase_count()).max().unwrap_or(0)
}

/// Most invalid pages wins.
#[derive(Debug)]
pub struct Greedy;

impl VictimPolicy for Greedy {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn pick_victim(&self, blocks: &[Block], _now: Step) -> Option<Victim> {
        max_score(blocks, |b| b.invalid_count() as f64)
    }
}

/// Classic cost-benefit with the erase count standing in for age:
/// `(1 - u) / (1 + erase_count)` where `u` is the valid fraction of used pages.
#[derive(Debug)]
pub struct CostBenefit;

impl VictimPolicy for CostBenefit {
    fn name(&self) -> &'static str {
        "cost_benefit"
    }

    fn pick_victim(&self, blocks: &[Block], _now: Step) -> Option<Victim> {
        max_score(blocks, |b| {
            let u = b.valid_count() as f64 / b.used() as f64;
            (1.0 - u) * (1.0 / (1.0 + b.erase_count() as f64))
        })
    }
}

/// Wear-balancing greedy: invalid ratio traded against normalized wear.
#[derive(Debug)]
pub struct Bsgc {
    pub alpha: f64,
    pub beta: f64,
}

impl VictimPolicy for Bsgc {
    fn name(&self) -> &'static str {
        "bsgc"
    }

    fn pick_victim(&self, blocks: &[Block], _now: Step) -> Option<Victim> {
        let max_e = max_erase(blocks);
        max_score(blocks, |b| {
            self.alpha * b.invalid_ratio() + self.beta * (1.0 - b.wear_norm(max_e))
        })
    }
}

/// Cost-age-temperature: invalid ratio, cooled temperature, normalized age
/// and inverse wear, weighted.
#[derive(Debug)]
pub struct Cat {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

impl VictimPolicy for Cat {
    fn name(&self) -> &'static str {
        "cat"
    }

    fn pick_victim(&self, blocks: &[Block], _now: Step) -> Option<Victim> {
        let (lo, hi) = activity_range(blocks);
        let max_e = max_erase(blocks);
        max_score(blocks, |b| {
            self.alpha * b.invalid_ratio()
                + self.beta * (1.0 - b.inv_ewma())
                + self.gamma * age_norm(b, lo, hi)
                + self.delta * (1.0 - b.wear_norm(max_e))
        })
    }
}

/// Utilization, wear, age and temperature, weighted.
#[derive(Debug)]
pub struct Atcb {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub eta: f64,
}

impl VictimPolicy for Atcb {
    fn name(&self) -> &'static str {
        "atcb"
    }

    fn pick_victim(&self, blocks: &[Block], _now: Step) -> Option<Victim> {
        let (lo, hi) = activity_range(blocks);
        let max_e = max_erase(blocks);
        max_score(blocks, |b| {
            let u = b.valid_count() as f64 / b.used() as f64;
            self.alpha * (1.0 - u)
                + self.beta * (1.0 - b.wear_norm(max_e))
                + self.gamma * age_norm(b, lo, hi)
                + self.eta * (1.0 - b.inv_ewma())
        })
    }
}

/// Age-amplified greedy: `invalid_count * (age + K)`.
#[derive(Debug)]
pub struct Re50315 {
    pub k: f64,
}

impl VictimPolicy for Re50315 {
    fn name(&self) -> &'static str {
        "re50315"
    }

    fn pick_victim(&self, blocks: &[Block], now: Step) -> Option<Victim> {
        max_score(blocks, |b| {
            let age = (now - b.last_activity()) as f64;
            b.invalid_count() as f64 * (age + self.k)
        })
    }
}

/// Hyperparameters for the policies that take any.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyParams {
    pub bsgc_alpha: f64,
    pub bsgc_beta: f64,
    pub cat_alpha: f64,
    pub cat_beta: f64,
    pub cat_gamma: f64,
    pub cat_delta: f64,
    pub atcb_alpha: f64,
    pub atcb_beta: f64,
    pub atcb_gamma: f64,
    pub atcb_eta: f64,
    pub re50315_k: f64,
}

impl Default for PolicyParams {
    fn default() -> Self {
        PolicyParams {
            bsgc_alpha: 0.7,
            bsgc_beta: 0.3,
            cat_alpha: 0.55,
            cat_beta: 0.25,
            cat_gamma: 0.15,
            cat_delta: 0.05,
            atcb_alpha: 0.5,
            atcb_beta: 0.3,
            atcb_gamma: 0.1,
            atcb_eta: 0.1,
            re50315_k: 1.0,
        }
    }
}

type PolicyCtor = fn(&PolicyParams) -> Box<dyn VictimPolicy>;

lazy_static! {
    /// Name to constructor table, looked up once at startup.
    static ref POLICY_REGISTRY: Vec<(&'static str, PolicyCtor)> = vec![
        ("greedy", |_| Box::new(Greedy)),
        ("cb", |_| Box::new(CostBenefit)),
        ("cost_benefit", |_| Box::new(CostBenefit)),
        ("bsgc", |p| Box::new(Bsgc {
            alpha: p.bsgc_alpha,
            beta: p.bsgc_beta,
        })),
        ("cat", |p| Box::new(Cat {
            alpha: p.cat_alpha,
            beta: p.cat_beta,
            gamma: p.cat_gamma,
            delta: p.cat_delta,
        })),
        ("atcb", |p| Box::new(Atcb {
            alpha: p.atcb_alpha,
            beta: p.atcb_beta,
            gamma: p.atcb_gamma,
            eta: p.atcb_eta,
        })),
        ("re50315", |p| Box::new(Re50315 { k: p.re50315_k })),
    ];
}

/// Construct a policy from its registered name.
pub fn policy_by_name(name: &str, params: &PolicyParams) -> Result<Box<dyn VictimPolicy>> {
    let key = name.to_ascii_lowercase();
    POLICY_REGISTRY
        .iter()
        .find(|(n, _)| *n == key)
        .map(|(_, ctor)| ctor(params))
        .ok_or(Error::with_msg(Errno::InvalidConfig, "unknown gc policy"))
}

/// Registered policy names, in registry order.
pub fn policy_names() -> Vec<&'static str> {
    POLICY_REGISTRY.iter().map(|(n, _)| *n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAMBDA: f64 = 0.3;

    /// Block with the given numbers of valid and invalid pages.
    fn block(ppb: usize, valid: usize, invalid: usize) -> Block {
        let mut blk = Block::new(ppb);
        for p in 0..valid + invalid {
            blk.allocate_free_page();
            if p >= valid {
                blk.invalidate(p, 1, LAMBDA);
            }
        }
        blk
    }

    /// Like `block`, but with pre-existing wear.
    fn worn(ppb: usize, valid: usize, invalid: usize, erases: u64) -> Block {
        let mut blk = Block::new(ppb);
        for _ in 0..erases {
            blk.erase();
        }
        for p in 0..valid + invalid {
            blk.allocate_free_page();
            if p >= valid {
                blk.invalidate(p, 1, LAMBDA);
            }
        }
        blk
    }

    #[test]
    fn greedy_picks_most_invalid() {
        let blocks = vec![block(8, 4, 2), block(8, 2, 5), block(8, 8, 0)];
        let v = Greedy.pick_victim(&blocks, 10).unwrap();
        assert_eq!(v.index, 1);
        assert_eq!(v.score, 5.0);
    }

    #[test]
    fn empty_blocks_are_never_selected() {
        let blocks = vec![Block::new(8), Block::new(8)];
        assert!(Greedy.pick_victim(&blocks, 10).is_none());
        assert!(CostBenefit.pick_victim(&blocks, 10).is_none());
        let cat = Cat {
            alpha: 0.55,
            beta: 0.25,
            gamma: 0.15,
            delta: 0.05,
        };
        assert!(cat.pick_victim(&blocks, 10).is_none());
    }

    #[test]
    fn ties_break_to_the_lowest_index() {
        let blocks = vec![block(8, 4, 3), block(8, 4, 3), block(8, 5, 3)];
        let v = Greedy.pick_victim(&blocks, 10).unwrap();
        assert_eq!(v.index, 0);
    }

    #[test]
    fn cost_benefit_prefers_less_worn_blocks() {
        // Same utilization, different wear: the fresher block wins.
        let a = worn(8, 4, 4, 3);
        let b = block(8, 4, 4);
        let v = CostBenefit.pick_victim(&[a, b], 10).unwrap();
        assert_eq!(v.index, 1);
        assert!((v.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn bsgc_trades_invalid_ratio_against_wear() {
        let tired = worn(8, 2, 6, 4);
        let fresh = block(8, 3, 5);
        let v = Bsgc {
            alpha: 0.7,
            beta: 0.3,
        }
        .pick_victim(&[tired, fresh], 10)
        .unwrap();
        // tired: 0.7*0.75 + 0.3*0 = 0.525; fresh: 0.7*0.625 + 0.3*1 = 0.7375
        assert_eq!(v.index, 1);
        assert!((v.score - 0.7375).abs() < 1e-12);
    }

    #[test]
    fn re50315_amplifies_by_age() {
        let mut young = block(8, 2, 4);
        young.mark_programmed(90);
        let mut old = block(8, 2, 4);
        old.mark_programmed(10);
        let v = Re50315 { k: 1.0 }.pick_victim(&[young, old], 100).unwrap();
        assert_eq!(v.index, 1);
        // old block: age = 100 - 10, score = 4 * (90 + 1)
        assert_eq!(v.score, 4.0 * 91.0);
    }

    #[test]
    fn age_norm_is_bounded_and_orders_by_staleness() {
        let mut a = block(8, 1, 1);
        a.mark_programmed(10);
        let mut b = block(8, 1, 1);
        b.mark_programmed(50);
        let blocks = vec![a, b];
        let (lo, hi) = activity_range(&blocks);
        assert_eq!((lo, hi), (10, 50));
        let na = age_norm(&blocks[0], lo, hi);
        let nb = age_norm(&blocks[1], lo, hi);
        assert!(na > nb);
        assert!((0.0..=1.0).contains(&na));
        assert_eq!(nb, 0.0);
    }

    #[test]
    fn age_norm_degenerate_range_is_zero_not_nan() {
        let blocks = vec![block(8, 1, 1)];
        let (lo, hi) = activity_range(&blocks);
        let n = age_norm(&blocks[0], lo, hi);
        assert_eq!(n, 0.0);
    }

    #[test]
    fn cat_favors_cold_invalid_blocks() {
        // Same invalid ratio on both; the stale block wins on age.
        let mut hot = block(8, 4, 2);
        hot.mark_programmed(100);
        for _ in 0..2 {
            // Pump the ewma with extra invalidations on fresh slots.
            let p = hot.allocate_free_page().unwrap();
            hot.invalidate(p, 100, LAMBDA);
        }
        let mut cold = block(8, 4, 4);
        cold.mark_programmed(10);
        let cat = Cat {
            alpha: 0.55,
            beta: 0.25,
            gamma: 0.15,
            delta: 0.05,
        };
        let v = cat.pick_victim(&[hot, cold], 200).unwrap();
        assert_eq!(v.index, 1);
    }

    #[test]
    fn atcb_weights_follow_the_documented_order() {
        // One block, hand-checked score: u = 0.5, wear_norm = 0 (max erase 0),
        // age_norm = 0 (degenerate range).
        let blk = block(8, 3, 3);
        let ewma = blk.inv_ewma();
        let atcb = Atcb {
            alpha: 0.5,
            beta: 0.3,
            gamma: 0.1,
            eta: 0.1,
        };
        let v = atcb.pick_victim(&[blk], 10).unwrap();
        let expected = 0.5 * 0.5 + 0.3 * 1.0 + 0.1 * 0.0 + 0.1 * (1.0 - ewma);
        assert!((v.score - expected).abs() < 1e-12);
    }

    #[test]
    fn registry_resolves_all_names() {
        let params = PolicyParams::default();
        for name in policy_names() {
            let policy = policy_by_name(name, &params).unwrap();
            assert!(!policy.name().is_empty());
        }
        assert_eq!(policy_by_name("CB", &params).unwrap().name(), "cost_benefit");
        assert_eq!(
            policy_by_name("nope", &params).unwrap_err().errno(),
            Errno::InvalidConfig
        );
    }
}
