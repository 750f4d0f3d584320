use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::stats::StatsCollector;

/// Tracks how many requests of one target are in flight and publishes every
/// new peak as `max-concurrency`.
#[derive(Debug)]
pub struct ConcurrencyGauge {
    current: AtomicU64,
    peak: AtomicU64,
    stats: Arc<StatsCollector>,
}

impl ConcurrencyGauge {
    pub fn new(stats: Arc<StatsCollector>) -> Self {
        Self {
            current: AtomicU64::new(0),
            peak: AtomicU64::new(0),
            stats,
        }
    }

    /// Count one request in. It is counted out when the guard drops.
    pub fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        if self.peak.fetch_max(now, Ordering::AcqRel) < now {
            self.stats.record_peak(now);
        }
        GaugeGuard { gauge: self }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }
}

#[must_use = "the request is counted out as soon as the guard drops"]
#[derive(Debug)]
pub struct GaugeGuard<'a> {
    gauge: &'a ConcurrencyGauge,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::AcqRel);
    }
}
