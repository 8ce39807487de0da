//! Run metrics: wear distribution, GC latency and the end-of-run summary.

use serde::Serialize;

use crate::block::Block;
use crate::config::LatencyModel;
use crate::device::Device;
use crate::gc::GcEvent;

/// Percentile with linear interpolation between order statistics at
/// `k = (n - 1) * q`. Empty input yields 0.
pub fn percentile(xs: &[f64], q: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    let k = (sorted.len() - 1) as f64 * q;
    let f = k.floor() as usize;
    let c = k.ceil() as usize;
    if f == c {
        sorted[f]
    } else {
        sorted[f] * (c as f64 - k) + sorted[c] * (k - f as f64)
    }
}

/// Distribution of erase counts across blocks.
#[derive(Clone, Debug, Default, Serialize)]
pub struct WearStats {
    pub min: u64,
    pub max: u64,
    pub delta: u64,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Coefficient of variation, 0 when the mean is 0.
    pub cv: f64,
    /// Gini coefficient over erase counts, 0 when all are 0.
    pub gini: f64,
    pub p50: f64,
    pub p95: f64,
}

pub fn wear_stats(blocks: &[Block]) -> WearStats {
    if blocks.is_empty() {
        return WearStats::default();
    }
    let erases: Vec<u64> = blocks.iter().map(|b| b.erase_count()).collect();
    let xs: Vec<f64> = erases.iter().map(|&e| e as f64).collect();
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
    let std = var.sqrt();
    let cv = if mean > 0.0 { std / mean } else { 0.0 };

    let mut sorted = erases.clone();
    sorted.sort_unstable();
    let total: u64 = sorted.iter().sum();
    let gini = if total == 0 {
        0.0
    } else {
        let weighted: u64 = sorted
            .iter()
            .enumerate()
            .map(|(i, &x)| (i as u64 + 1) * x)
            .sum();
        (2.0 * weighted as f64) / (n * total as f64) - (n + 1.0) / n
    };

    WearStats {
        min: *sorted.first().unwrap(),
        max: *sorted.last().unwrap(),
        delta: sorted.last().unwrap() - sorted.first().unwrap(),
        mean,
        std,
        cv,
        gini,
        p50: percentile(&xs, 0.50),
        p95: percentile(&xs, 0.95),
    }
}

/// Wall-clock GC latency distribution, in seconds.
#[derive(Clone, Debug, Default, Serialize)]
pub struct GcLatencyStats {
    pub total_s: f64,
    pub avg_s: f64,
    pub p50_s: f64,
    pub p95_s: f64,
    pub p99_s: f64,
}

pub fn gc_latency_stats(durations: &[f64]) -> GcLatencyStats {
    let total_s: f64 = durations.iter().sum();
    let avg_s = if durations.is_empty() {
        0.0
    } else {
        total_s / durations.len() as f64
    };
    GcLatencyStats {
        total_s,
        avg_s,
        p50_s: percentile(durations, 0.50),
        p95_s: percentile(durations, 0.95),
        p99_s: percentile(durations, 0.99),
    }
}

/// Modeled per-op host latency distribution, in seconds. Unlike the
/// wall-clock GC durations this is derived from the latency profile and the
/// event log, so it is deterministic.
#[derive(Clone, Debug, Default, Serialize)]
pub struct HostLatencyStats {
    pub p50_s: f64,
    pub p95_s: f64,
    pub p99_s: f64,
}

pub fn host_latency_stats(latencies: &[f64]) -> HostLatencyStats {
    HostLatencyStats {
        p50_s: percentile(latencies, 0.50),
        p95_s: percentile(latencies, 0.95),
        p99_s: percentile(latencies, 0.99),
    }
}

/// Shape of the GC event log: how many collections were free lunches and
/// how many pages the expensive ones had to carry.
#[derive(Clone, Debug, Default, Serialize)]
pub struct GcEventDigest {
    /// Fraction of collections that moved zero valid pages.
    pub zero_move_ratio: f64,
    pub moved_p50: f64,
    pub moved_p95: f64,
    pub moved_p99: f64,
}

pub fn summarize_gc_events(events: &[GcEvent]) -> GcEventDigest {
    if events.is_empty() {
        return GcEventDigest::default();
    }
    let moved: Vec<f64> = events.iter().map(|e| e.moved_valid as f64).collect();
    let zero = moved.iter().filter(|&&m| m == 0.0).count();
    GcEventDigest {
        zero_move_ratio: zero as f64 / events.len() as f64,
        moved_p50: percentile(&moved, 0.50),
        moved_p95: percentile(&moved, 0.95),
        moved_p99: percentile(&moved, 0.99),
    }
}

/// End-of-run summary row.
#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    pub policy: String,
    pub ops: u64,
    pub host_write_pages: u64,
    pub device_write_pages: u64,
    pub waf: f64,
    pub gc_count: u64,
    pub wear: WearStats,
    pub gc_latency: GcLatencyStats,
    pub gc_events: GcEventDigest,
    pub free_pages: usize,
    pub total_pages: usize,
    pub seed: u64,
    /// Modeled per-op latency percentiles from the latency profile. All
    /// modeled figures are cosmetic; no decision reads them.
    pub host_latency: HostLatencyStats,
    /// Modeled sustained op rate.
    pub iops: f64,
    /// Modeled host throughput in MB/s.
    pub throughput_mbps: f64,
    /// Host data written, in GiB.
    pub host_gb: f64,
    /// Media data written (host plus migrations), in GiB.
    pub media_gb: f64,
    /// Modeled host program time from the latency profile.
    pub modeled_host_time_s: f64,
    /// Modeled migration and erase time from the latency profile.
    pub modeled_gc_time_s: f64,
    pub note: String,
}

pub fn summarize(
    device: &Device,
    policy: &str,
    ops: u64,
    op_latencies: &[f64],
    note: &str,
) -> Summary {
    let lat: LatencyModel = device.config().io_profile.latency();
    let page_bytes = device.config().page_size_bytes as f64;
    let modeled_gc_time_s = device
        .gc_event_log()
        .iter()
        .map(|e| lat.gc_seconds(e.moved_valid))
        .sum();
    let modeled_total_s: f64 = op_latencies.iter().sum();
    let (iops, throughput_mbps) = if modeled_total_s > 0.0 {
        (
            ops as f64 / modeled_total_s,
            device.host_write_pages() as f64 * page_bytes / 1e6 / modeled_total_s,
        )
    } else {
        (0.0, 0.0)
    };
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    Summary {
        policy: policy.to_string(),
        ops,
        host_write_pages: device.host_write_pages(),
        device_write_pages: device.device_write_pages(),
        waf: device.waf(),
        gc_count: device.gc_count(),
        wear: wear_stats(device.blocks()),
        gc_latency: gc_latency_stats(device.gc_durations()),
        gc_events: summarize_gc_events(device.gc_event_log()),
        free_pages: device.free_pages(),
        total_pages: device.total_pages(),
        seed: device.config().rng_seed,
        host_latency: host_latency_stats(op_latencies),
        iops,
        throughput_mbps,
        host_gb: device.host_write_pages() as f64 * page_bytes / GIB,
        media_gb: device.device_write_pages() as f64 * page_bytes / GIB,
        modeled_host_time_s: lat.host_seconds(device.host_write_pages()),
        modeled_gc_time_s,
        note: note.to_string(),
    }
}

impl Summary {
    /// Print the summary in a fixed console layout.
    pub fn print(&self) {
        println!("=================== Simulation Result ===================");
        println!("  Policy:                {} ({})", self.policy, self.note);
        println!("  Host writes (pages):   {}", self.host_write_pages);
        println!("  Device writes (pages): {}", self.device_write_pages);
        println!("  WAF (device/host):     {:.3}", self.waf);
        println!("  GC count:              {}", self.gc_count);
        println!(
            "  Erase per block:       mean={:.2} (min={}, max={}, d={})",
            self.wear.mean, self.wear.min, self.wear.max, self.wear.delta
        );
        println!(
            "  Wear std/CV/Gini:      {:.2} / {:.4} / {:.4}",
            self.wear.std, self.wear.cv, self.wear.gini
        );
        println!(
            "  Free pages remaining:  {} / {}",
            self.free_pages, self.total_pages
        );
        println!(
            "  GC time total / avg:   {:.2} ms / {:.4} ms",
            self.gc_latency.total_s * 1e3,
            self.gc_latency.avg_s * 1e3
        );
        println!(
            "  GC time p50/p95/p99:   {:.4} / {:.4} / {:.4} ms",
            self.gc_latency.p50_s * 1e3,
            self.gc_latency.p95_s * 1e3,
            self.gc_latency.p99_s * 1e3
        );
        println!(
            "  Modeled lat p50/p99:   {:.4} / {:.4} ms ({:.0} IOPS, {:.1} MB/s)",
            self.host_latency.p50_s * 1e3,
            self.host_latency.p99_s * 1e3,
            self.iops,
            self.throughput_mbps
        );
        println!("=========================================================");
    }
}
