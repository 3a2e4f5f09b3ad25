//! Thread-safe telemetry for the realtime engine.
//!
//! The processing thread publishes a `DfnStats` snapshot every few dozen
//! hops; any other thread can read it back without locks. f32/f64 values are
//! stored as their bit patterns.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Periodic engine report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DfnStats {
    /// Median inference time over the latency window.
    pub p50_ms: f64,
    /// 95th percentile inference time.
    pub p95_ms: f64,
    /// Hops that passed the input through unprocessed.
    pub bypass_count: u64,
    pub auto_mix: f32,
    pub auto_bypass: bool,
    /// Hops processed since the last reset.
    pub frames: u64,
}

#[derive(Default)]
pub struct Meters {
    p50_ms: AtomicU64,
    p95_ms: AtomicU64,
    bypass_count: AtomicU64,
    auto_mix: AtomicU32,
    auto_bypass: AtomicBool,
    frames: AtomicU64,
}

impl Meters {
    pub fn new() -> Self {
        let m = Self::default();
        m.auto_mix.store(1.0f32.to_bits(), Ordering::Relaxed);
        m
    }

    pub fn publish(&self, stats: &DfnStats) {
        self.p50_ms.store(stats.p50_ms.to_bits(), Ordering::Relaxed);
        self.p95_ms.store(stats.p95_ms.to_bits(), Ordering::Relaxed);
        self.bypass_count.store(stats.bypass_count, Ordering::Relaxed);
        self.auto_mix.store(stats.auto_mix.to_bits(), Ordering::Relaxed);
        self.auto_bypass.store(stats.auto_bypass, Ordering::Relaxed);
        self.frames.store(stats.frames, Ordering::Relaxed);
    }

    pub fn get_p50_ms(&self) -> f64 {
        f64::from_bits(self.p50_ms.load(Ordering::Relaxed))
    }

    pub fn get_p95_ms(&self) -> f64 {
        f64::from_bits(self.p95_ms.load(Ordering::Relaxed))
    }

    pub fn get_bypass_count(&self) -> u64 {
        self.bypass_count.load(Ordering::Relaxed)
    }

    pub fn get_auto_mix(&self) -> f32 {
        f32::from_bits(self.auto_mix.load(Ordering::Relaxed))
    }

    pub fn get_auto_bypass(&self) -> bool {
        self.auto_bypass.load(Ordering::Relaxed)
    }

    pub fn get_frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Last published values.
    pub fn snapshot(&self) -> DfnStats {
        DfnStats {
            p50_ms: self.get_p50_ms(),
            p95_ms: self.get_p95_ms(),
            bypass_count: self.get_bypass_count(),
            auto_mix: self.get_auto_mix(),
            auto_bypass: self.get_auto_bypass(),
            frames: self.get_frames(),
        }
    }

    pub fn reset(&self) {
        self.publish(&DfnStats {
            auto_mix: 1.0,
            ..DfnStats::default()
        });
    }
}
