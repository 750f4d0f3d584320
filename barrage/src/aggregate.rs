use crate::metric::Metric;

/// The `Aggregate` trait defines how [`Metric`] samples are folded into a
/// shared, mergeable collector.
///
/// Collectors are written to from many request tasks at once, so both
/// operations take `&self` and synchronize internally.
///
/// # Role
///
/// - Consume the [`Metric`] produced by every request of a target.
/// - Be mergeable, so per-target collectors can be folded into a total.
///
/// # Merge laws
///
/// `merge` must be associative and commutative over the raw fields (counters,
/// sums, extrema). Derived values such as averages are *not* merged; they are
/// recomputed on the accumulator once folding is done.
///
/// # Example
/// ```rust
/// use std::time::Duration;
///
/// use barrage::{
///     aggregate::Aggregate,
///     metric::{Outcome, RequestMetric},
///     stats::{StatKey, StatsCollector},
/// };
///
/// let first = StatsCollector::new("login");
/// first.consume(&RequestMetric::completed(
///     Outcome::Passed { status: 200 },
///     Duration::from_millis(12),
///     None,
///     false,
/// ));
///
/// let total = StatsCollector::new("total");
/// total.merge(&first).merge(&first);
/// assert_eq!(total.counter(StatKey::Success), 2);
/// ```
pub trait Aggregate: Send + Sync {
    type Metric: Metric;

    /// Fold a batch of metrics into the collector.
    fn aggregate(&self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Fold a single metric into the collector.
    fn consume(&self, metric: &Self::Metric);

    /// Fold another collector into this one, returning `self` for chaining.
    fn merge(&self, other: &Self) -> &Self;
}
