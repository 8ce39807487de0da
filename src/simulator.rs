//! The simulation loop.
//!
//! Drives a `Device` through a workload under one policy: a foreground
//! collection runs whenever the free-block ratio falls to the configured
//! threshold, a safety-net collection runs when a write arrives with zero
//! free pages, and an optional background collection runs every K ops while
//! space is comfortable. Each op appends one trace row when tracing is on.

use log::debug;
use serde::Serialize;

use crate::config::SimConfig;
use crate::device::Device;
use crate::error::Result;
use crate::gc::GcCause;
use crate::metrics::{summarize, Summary};
use crate::policy::VictimPolicy;
use crate::workload::WorkloadOp;
use crate::Step;

/// One row of the per-step trace.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct TraceRow {
    pub step: Step,
    pub free_pages: usize,
    pub device_writes: u64,
    pub gc_count: u64,
    /// Whether any collection ran while processing this op.
    pub gc_event: bool,
}

pub struct Simulator {
    device: Device,
    policy: Box<dyn VictimPolicy>,
    enable_trace: bool,
    trace: Vec<TraceRow>,
    /// Modeled latency per op from the configured profile; deterministic,
    /// unlike the wall-clock GC durations.
    op_latencies: Vec<f64>,
    bg_counter: u64,
    ops_run: u64,
}

impl Simulator {
    pub fn new(cfg: SimConfig, policy: Box<dyn VictimPolicy>, enable_trace: bool) -> Result<Self> {
        Ok(Simulator {
            device: Device::new(cfg)?,
            policy,
            enable_trace,
            trace: Vec::new(),
            op_latencies: Vec::new(),
            bg_counter: 0,
            ops_run: 0,
        })
    }

    fn need_gc(&self) -> bool {
        let ratio = self.device.free_blocks() as f64 / self.device.num_blocks() as f64;
        ratio <= self.device.config().gc_free_block_threshold
    }

    /// Run the workload to completion. Errors abort the run and carry the
    /// failing op's context in the device state.
    pub fn run<W, O>(&mut self, workload: W) -> Result<()>
    where
        W: IntoIterator<Item = O>,
        O: Into<WorkloadOp>,
    {
        for op in workload {
            let op = op.into();
            let pre_gc = self.device.gc_count();
            let pre_events = self.device.gc_event_log().len();

            if self.need_gc() {
                self.device
                    .collect_garbage(&*self.policy, GcCause::FgThreshold)?;
            }

            match op {
                WorkloadOp::Write(lpn) => {
                    if self.device.free_pages() == 0 {
                        self.device.collect_garbage(&*self.policy, GcCause::FgNoFree)?;
                    }
                    self.device.write(lpn)?;
                }
                WorkloadOp::Trim(lpn) => self.device.trim(lpn),
            }
            self.ops_run += 1;

            if self.enable_trace {
                self.trace.push(TraceRow {
                    step: self.device.clock(),
                    free_pages: self.device.free_pages(),
                    device_writes: self.device.device_write_pages(),
                    gc_count: self.device.gc_count(),
                    gc_event: self.device.gc_count() > pre_gc,
                });
            }

            let bg_every = self.device.config().bg_gc_every;
            if bg_every > 0 {
                self.bg_counter += 1;
                if self.bg_counter >= bg_every {
                    // Only spend the token when space is comfortable.
                    if !self.need_gc() && self.device.free_blocks() > 1 {
                        self.device.collect_garbage(&*self.policy, GcCause::BgToken)?;
                    }
                    self.bg_counter = 0;
                }
            }

            let lat = self.device.config().io_profile.latency();
            let mut cost = match op {
                WorkloadOp::Write(_) => lat.program_s,
                WorkloadOp::Trim(_) => 0.0,
            };
            for event in &self.device.gc_event_log()[pre_events..] {
                cost += lat.gc_seconds(event.moved_valid);
            }
            self.op_latencies.push(cost);
        }
        Ok(())
    }

    /// Pre-fill the device with sequential LPNs until `fill` of the user
    /// capacity is live, running the normal loop so foreground GC engages
    /// near exhaustion.
    pub fn warmup(&mut self, fill: f64) -> Result<()> {
        let fill = fill.clamp(0.0, 0.99);
        let target = (self.device.config().user_total_pages() as f64 * fill) as usize;
        debug!("warmup fill of {} sequential LPNs", target);
        self.run((0..target).map(WorkloadOp::Write))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn trace(&self) -> &[TraceRow] {
        &self.trace
    }

    pub fn ops_run(&self) -> u64 {
        self.ops_run
    }

    pub fn op_latencies(&self) -> &[f64] {
        &self.op_latencies
    }

    pub fn summary(&self, note: &str) -> Summary {
        summarize(
            &self.device,
            self.policy.name(),
            self.ops_run,
            &self.op_latencies,
            note,
        )
    }
}
