//! Adaptive mix / bypass control.
//!
//! Decides per hop how much of the processed signal reaches the output.
//! The engine fails soft: a hop whose inference failed, was skipped, or is
//! inside an overrun cooldown steers the mix toward the dry signal, and the
//! mix glides back once inference is healthy again.
//!
//! Also owns the rolling latency window used for p50/p95 reporting.

use crate::meters::DfnStats;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

// =============================================================================
// Constants
// =============================================================================

/// Per-hop smoothing factor toward the target mix.
pub const MIX_SMOOTHING: f32 = 0.2;

/// Below this auto mix the engine reports itself as auto-bypassed.
pub const AUTO_BYPASS_THRESHOLD: f32 = 0.05;

/// Consecutive over-budget inferences that trigger a cooldown.
pub const OVERRUN_LIMIT: u32 = 3;

/// How long inference stays muted after repeated overruns.
pub const COOLDOWN: Duration = Duration::from_secs(2);

/// Floor for the inference time budget.
pub const MIN_BUDGET: Duration = Duration::from_millis(8);

/// Fraction of the hop duration available for inference.
pub const BUDGET_FRACTION: f64 = 0.9;

/// Latency samples kept for percentiles.
pub const LATENCY_WINDOW: usize = 200;

/// Hops between stats reports.
pub const STATS_INTERVAL: u64 = 50;

// =============================================================================
// Latency window
// =============================================================================

/// FIFO of the most recent per-hop processing times, in milliseconds.
#[derive(Clone, Debug)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(LATENCY_WINDOW)
    }
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Non-positive durations are ignored.
    pub fn push(&mut self, ms: f64) {
        if !(ms > 0.0) {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
    }

    /// `sorted[floor(p/100 * (n-1))]`, or 0 when empty.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let idx = ((p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64).floor() as usize;
        sorted[idx.min(n - 1)]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

// =============================================================================
// Mix controller
// =============================================================================

#[derive(Clone, Debug)]
pub struct MixController {
    auto_mix: f32,
    target: f32,
    smoothing: f32,
    auto_bypass: bool,
    overrun_streak: u32,
    cooldown_until: Option<Instant>,
    budget: Duration,
    bypass_count: u64,
    frames: u64,
    latency: LatencyWindow,
}

impl MixController {
    pub fn new(hop_ms: f64) -> Self {
        Self {
            auto_mix: 1.0,
            target: 1.0,
            smoothing: MIX_SMOOTHING,
            auto_bypass: false,
            overrun_streak: 0,
            cooldown_until: None,
            budget: Self::budget_for(hop_ms),
            bypass_count: 0,
            frames: 0,
            latency: LatencyWindow::default(),
        }
    }

    /// `max(8 ms, 0.9 * hop)`.
    pub fn budget_for(hop_ms: f64) -> Duration {
        let micros = (hop_ms.max(0.0) * BUDGET_FRACTION * 1000.0).round() as u64;
        Duration::from_micros(micros).max(MIN_BUDGET)
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(false, |until| now < until)
    }

    /// Sets the hop's target: 0 inside a cooldown, 1 otherwise.
    pub fn begin_hop(&mut self, now: Instant) {
        if self.in_cooldown(now) {
            self.target = 0.0;
        } else {
            self.cooldown_until = None;
            self.target = 1.0;
        }
    }

    /// Tracks inference time against the budget. Returns true when this
    /// call started a cooldown.
    pub fn record_inference(&mut self, elapsed: Duration, now: Instant) -> bool {
        if elapsed <= self.budget {
            self.overrun_streak = 0;
            return false;
        }
        self.overrun_streak += 1;
        if self.overrun_streak >= OVERRUN_LIMIT {
            self.overrun_streak = 0;
            self.cooldown_until = Some(now + COOLDOWN);
            self.target = 0.0;
            log::warn!(
                "Inference exceeded {:.2} ms budget {} times in a row; muting for {:?}",
                self.budget.as_secs_f64() * 1000.0,
                OVERRUN_LIMIT,
                COOLDOWN
            );
            return true;
        }
        false
    }

    /// Closes the hop. A hop that was not processed (`!ok`) or was bypassed
    /// counts as a bypass hop; a failed hop also pulls the target to 0.
    /// Returns the smoothed auto mix.
    pub fn finish_hop(&mut self, ok: bool, bypassed: bool) -> f32 {
        if !ok || bypassed {
            if !ok {
                self.target = 0.0;
            }
            self.bypass_count += 1;
        }
        self.auto_mix += (self.target - self.auto_mix) * self.smoothing;
        self.auto_mix = self.auto_mix.clamp(0.0, 1.0);
        self.auto_bypass = self.auto_mix < AUTO_BYPASS_THRESHOLD;
        self.auto_mix
    }

    /// Records the hop's processing time and, every `STATS_INTERVAL` hops,
    /// returns a stats snapshot.
    pub fn tick(&mut self, elapsed: Duration) -> Option<DfnStats> {
        self.latency.push(elapsed.as_secs_f64() * 1000.0);
        self.frames += 1;
        if self.frames % STATS_INTERVAL != 0 {
            return None;
        }
        Some(self.stats())
    }

    pub fn stats(&self) -> DfnStats {
        DfnStats {
            p50_ms: self.latency.percentile(50.0),
            p95_ms: self.latency.percentile(95.0),
            bypass_count: self.bypass_count,
            auto_mix: self.auto_mix,
            auto_bypass: self.auto_bypass,
            frames: self.frames,
        }
    }

    pub fn auto_mix(&self) -> f32 {
        self.auto_mix
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn auto_bypass(&self) -> bool {
        self.auto_bypass
    }

    pub fn bypass_count(&self) -> u64 {
        self.bypass_count
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn latency(&self) -> &LatencyWindow {
        &self.latency
    }

    pub fn reset(&mut self) {
        let budget = self.budget;
        *self = Self {
            budget,
            ..Self::new(0.0)
        };
    }
}

// =============================================================================
// Tests
// =============================================================================
