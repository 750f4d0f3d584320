use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

/// The 10% bucket `current` falls in, or `None` when `total` is too small to
/// report on.
pub fn percent_bucket(total: u64, current: u64) -> Option<u8> {
    if total < 10 {
        return None;
    }
    if current >= total {
        return Some(100);
    }
    let tenth = total as f64 / 10.0;
    let tenths = (current as f64 / tenth).floor() as u8;
    Some(tenths.min(10) * 10)
}

/// Logs run progress in 10% steps, each step once.
#[derive(Debug)]
pub struct ProgressIndicator {
    total: u64,
    attempted: AtomicU64,
    // Bit `n` set once the `n * 10`% bucket has been reported.
    covered: AtomicU16,
}

impl ProgressIndicator {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            attempted: AtomicU64::new(0),
            covered: AtomicU16::new(0),
        }
    }

    /// Count one attempted iteration, logging the bucket it completes if that
    /// bucket is new.
    pub fn advance(&self) -> u64 {
        let attempted = self.attempted.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(bucket) = percent_bucket(self.total, attempted) {
            let bit = 1u16 << (bucket / 10);
            let first = (self.covered.fetch_or(bit, Ordering::AcqRel) & bit) == 0;
            match bucket {
                _ if !first => {}
                0 => {}
                100 => tracing::info!(total = self.total, "progress: 100% completed"),
                _ => tracing::info!(percent = bucket, "progress: {bucket}%"),
            }
        }
        attempted
    }

    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}
