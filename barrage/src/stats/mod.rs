//! Concurrent-safe statistics.
//!
//! Every target owns one [`StatsCollector`], written to by all of its request
//! tasks. When a run ends the per-target collectors are folded into a fresh
//! accumulator keyed `total` through [`Aggregate::merge`].
//!
//! # Merge algebra
//!
//! | class    | fields                                        | merge |
//! |----------|-----------------------------------------------|-------|
//! | counter  | `total-sent`, `success`, `failed::<code>`, …  | sum   |
//! | peak     | `max-concurrency`                             | max   |
//! | sum      | `main-duration`, `exec-duration`              | sum   |
//! | longest  | `longest-duration`, `longest-exec-duration`   | max   |
//! | shortest | `shortest-duration`, `shortest-exec-duration` | min   |
//! | average  | `average-duration`, `average-exec-duration`   | never, recomputed |

mod key;
mod preset;

use std::{collections::BTreeMap, time::Duration};

use parking_lot::{Mutex, RwLock};

pub use key::{StatClass, StatKey, StatValue, UnknownStatKey};
pub use preset::FieldPreset;

use crate::{
    aggregate::Aggregate,
    metric::{Outcome, RequestMetric},
    report::StatsReport,
};

#[derive(Debug, Default)]
pub struct StatsCollector {
    key: RwLock<String>,
    fields: Mutex<BTreeMap<StatKey, StatValue>>,
}

impl StatsCollector {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: RwLock::new(key.into()),
            fields: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn key(&self) -> String {
        self.key.read().clone()
    }

    pub fn set_key(&self, key: impl Into<String>) {
        *self.key.write() = key.into();
    }

    /// Add `n` to a counter field. Zero still creates the field.
    pub fn incr(&self, key: StatKey, n: u64) {
        if key.class() != StatClass::Counter {
            tracing::warn!(%key, "field is not a counter");
            return;
        }
        self.fields
            .lock()
            .entry(key)
            .or_insert(StatValue::Counter(0))
            .merge(StatValue::Counter(n));
    }

    pub fn incr_failed(&self, status: u16, n: u64) {
        self.incr(StatKey::Failed(status), n);
    }

    /// Feed a duration into a running sum, a longest or a shortest field.
    /// The first write always stores; later ones follow the field's class.
    pub fn add_duration(&self, key: StatKey, duration: Duration) {
        let value = match key.class() {
            StatClass::Sum => StatValue::Sum(duration),
            StatClass::Longest => StatValue::Longest(duration),
            StatClass::Shortest => StatValue::Shortest(duration),
            class => {
                tracing::warn!(%key, ?class, "field does not take durations");
                return;
            }
        };
        let mut fields = self.fields.lock();
        match fields.get_mut(&key) {
            Some(current) => current.merge(value),
            None => {
                fields.insert(key, value);
            }
        }
    }

    /// Record an observed in-flight count; only a new maximum is kept.
    pub fn record_peak(&self, observed: u64) {
        self.fields
            .lock()
            .entry(StatKey::MaxConcurrency)
            .or_insert(StatValue::Peak(0))
            .merge(StatValue::Peak(observed));
    }

    /// `average-duration = main-duration / success`.
    pub fn calculate_average(&self) {
        self.average_into(StatKey::MainDuration, StatKey::AverageDuration);
    }

    /// `average-exec-duration = exec-duration / success`.
    pub fn calculate_exec_average(&self) {
        self.average_into(StatKey::ExecDuration, StatKey::AverageExecDuration);
    }

    fn average_into(&self, sum: StatKey, average: StatKey) {
        let mut fields = self.fields.lock();
        let success = fields
            .get(&StatKey::Success)
            .and_then(StatValue::as_count)
            .unwrap_or(0);
        let total = fields.get(&sum).and_then(StatValue::as_duration);

        match total {
            Some(total) if success > 0 => {
                let nanos = total.as_nanos() / u128::from(success);
                let nanos = u64::try_from(nanos).unwrap_or(u64::MAX);
                fields.insert(average, StatValue::Average(Duration::from_nanos(nanos)));
            }
            _ => {
                fields.remove(&average);
            }
        }
    }

    /// Fold `source` into `self`, restricted to the fields `allow` accepts.
    pub fn merge_only(&self, source: &StatsCollector, allow: impl Fn(&StatKey) -> bool) -> &Self {
        // Snapshot first so the two locks are never held together.
        let incoming = source.snapshot();
        let mut fields = self.fields.lock();
        for (key, value) in incoming.into_iter().filter(|(key, _)| allow(key)) {
            if key.class() == StatClass::Average {
                continue;
            }
            match fields.get_mut(&key) {
                Some(current) => current.merge(value),
                None => {
                    fields.insert(key, value);
                }
            }
        }
        self
    }

    pub fn get(&self, key: StatKey) -> Option<StatValue> {
        self.fields.lock().get(&key).copied()
    }

    /// Counter or peak value, zero when absent.
    pub fn counter(&self, key: StatKey) -> u64 {
        self.get(key).and_then(|v| v.as_count()).unwrap_or(0)
    }

    pub fn duration(&self, key: StatKey) -> Option<Duration> {
        self.get(key).and_then(|v| v.as_duration())
    }

    pub fn total_sent(&self) -> u64 {
        self.counter(StatKey::TotalSent)
    }

    /// `failed::<code>` buckets, code to count.
    pub fn failures(&self) -> BTreeMap<u16, u64> {
        self.fields
            .lock()
            .iter()
            .filter_map(|(key, value)| match key {
                StatKey::Failed(code) => value.as_count().map(|n| (*code, n)),
                _ => None,
            })
            .collect()
    }

    pub fn snapshot(&self) -> BTreeMap<StatKey, StatValue> {
        self.fields.lock().clone()
    }

    pub fn render(&self, preset: &FieldPreset) -> String {
        StatsReport::from(self).render(preset)
    }

    pub fn print_pretty(&self, preset: &FieldPreset) {
        print!("{}", self.render(preset));
    }
}

impl Aggregate for StatsCollector {
    type Metric = RequestMetric;

    fn consume(&self, metric: &RequestMetric) {
        self.incr(StatKey::TotalSent, 1);
        match metric.outcome {
            Outcome::Passed { .. } => self.incr(StatKey::Success, 1),
            Outcome::Failed { status } => self.incr_failed(status, 1),
            Outcome::Timeout { .. } => self.incr(StatKey::Timeout, 1),
            Outcome::ConnectionRefused => self.incr(StatKey::ConnectionRefused, 1),
            Outcome::OtherError => self.incr(StatKey::OtherErrors, 1),
        }

        let Some(latency) = metric.latency else {
            return;
        };
        self.incr(StatKey::CacheUsed, u64::from(metric.cache_hit));
        self.add_duration(StatKey::MainDuration, latency);
        self.add_duration(StatKey::LongestDuration, latency);
        self.add_duration(StatKey::ShortestDuration, latency);
        if let Some(exec) = metric.exec_duration {
            self.add_duration(StatKey::ExecDuration, exec);
            self.add_duration(StatKey::LongestExecDuration, exec);
            self.add_duration(StatKey::ShortestExecDuration, exec);
        }
    }

    fn merge(&self, other: &Self) -> &Self {
        self.merge_only(other, |_| true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metric::TimeoutKind;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn passed(latency: u64) -> RequestMetric {
        RequestMetric::completed(Outcome::Passed { status: 200 }, ms(latency), None, false)
    }

    #[test]
    fn first_duration_write_always_stores() {
        let stats = StatsCollector::new("t");
        stats.add_duration(StatKey::ShortestDuration, ms(50));
        stats.add_duration(StatKey::ShortestDuration, ms(80));
        stats.add_duration(StatKey::ShortestDuration, ms(20));
        stats.add_duration(StatKey::LongestDuration, ms(5));
        stats.add_duration(StatKey::LongestDuration, ms(3));

        assert_eq!(stats.duration(StatKey::ShortestDuration), Some(ms(20)));
        assert_eq!(stats.duration(StatKey::LongestDuration), Some(ms(5)));
    }

    #[test]
    fn average_requires_success() {
        let stats = StatsCollector::new("t");
        stats.add_duration(StatKey::MainDuration, ms(100));
        stats.calculate_average();
        assert_eq!(stats.get(StatKey::AverageDuration), None);

        stats.incr(StatKey::Success, 4);
        stats.calculate_average();
        assert_eq!(stats.duration(StatKey::AverageDuration), Some(ms(25)));
    }

    #[test]
    fn exec_average() {
        let stats = StatsCollector::new("t");
        stats.incr(StatKey::Success, 2);
        stats.add_duration(StatKey::ExecDuration, ms(30));
        stats.calculate_exec_average();
        assert_eq!(stats.duration(StatKey::AverageExecDuration), Some(ms(15)));
    }

    #[test]
    fn consume_classifies_outcomes() {
        let stats = StatsCollector::new("t");
        stats.consume(&passed(10));
        stats.consume(&RequestMetric::completed(
            Outcome::Failed { status: 404 },
            ms(30),
            Some(ms(2)),
            true,
        ));
        stats.consume(&RequestMetric::aborted(Outcome::Timeout {
            source: TimeoutKind::Server,
        }));
        stats.consume(&RequestMetric::aborted(Outcome::ConnectionRefused));
        stats.consume(&RequestMetric::aborted(Outcome::OtherError));

        assert_eq!(stats.total_sent(), 5);
        assert_eq!(stats.counter(StatKey::Success), 1);
        assert_eq!(stats.failures(), BTreeMap::from([(404, 1)]));
        assert_eq!(stats.counter(StatKey::Timeout), 1);
        assert_eq!(stats.counter(StatKey::ConnectionRefused), 1);
        assert_eq!(stats.counter(StatKey::OtherErrors), 1);
        assert_eq!(stats.counter(StatKey::CacheUsed), 1);
        assert_eq!(stats.duration(StatKey::MainDuration), Some(ms(40)));
        assert_eq!(stats.duration(StatKey::ShortestDuration), Some(ms(10)));
        assert_eq!(stats.duration(StatKey::LongestDuration), Some(ms(30)));
        assert_eq!(stats.duration(StatKey::ExecDuration), Some(ms(2)));
    }

    #[test]
    fn merge_follows_field_classes() {
        let a = StatsCollector::new("a");
        a.incr(StatKey::Success, 3);
        a.incr_failed(500, 1);
        a.record_peak(4);
        a.add_duration(StatKey::MainDuration, ms(30));
        a.add_duration(StatKey::LongestDuration, ms(20));
        a.add_duration(StatKey::ShortestDuration, ms(5));
        a.calculate_average();

        let b = StatsCollector::new("b");
        b.incr(StatKey::Success, 1);
        b.incr_failed(500, 2);
        b.incr_failed(404, 1);
        b.record_peak(9);
        b.add_duration(StatKey::MainDuration, ms(10));
        b.add_duration(StatKey::LongestDuration, ms(40));
        b.add_duration(StatKey::ShortestDuration, ms(7));
        b.calculate_average();

        let total = StatsCollector::new("acc");
        total.merge(&a).merge(&b);
        total.set_key("total");

        assert_eq!(total.key(), "total");
        assert_eq!(total.counter(StatKey::Success), 4);
        assert_eq!(total.failures(), BTreeMap::from([(404, 1), (500, 3)]));
        assert_eq!(total.counter(StatKey::MaxConcurrency), 9);
        assert_eq!(total.duration(StatKey::MainDuration), Some(ms(40)));
        assert_eq!(total.duration(StatKey::LongestDuration), Some(ms(40)));
        assert_eq!(total.duration(StatKey::ShortestDuration), Some(ms(5)));
        assert_eq!(total.get(StatKey::AverageDuration), None);

        total.calculate_average();
        assert_eq!(total.duration(StatKey::AverageDuration), Some(ms(10)));
    }

    #[test]
    fn merge_is_order_independent() {
        let a = StatsCollector::new("a");
        a.consume(&passed(12));
        a.consume(&passed(3));
        let b = StatsCollector::new("b");
        b.consume(&passed(40));

        let ab = StatsCollector::new("ab");
        ab.merge(&a).merge(&b);
        let ba = StatsCollector::new("ba");
        ba.merge(&b).merge(&a);

        assert_eq!(ab.snapshot(), ba.snapshot());
    }

    #[test]
    fn merge_only_respects_allow_list() {
        let source = StatsCollector::new("s");
        source.incr(StatKey::Success, 2);
        source.incr(StatKey::Timeout, 5);

        let target = StatsCollector::new("t");
        target.merge_only(&source, |key| *key == StatKey::Success);
        assert_eq!(target.counter(StatKey::Success), 2);
        assert_eq!(target.get(StatKey::Timeout), None);
    }

    #[test]
    fn merging_into_itself_does_not_deadlock() {
        let stats = StatsCollector::new("self");
        stats.incr(StatKey::Success, 1);
        stats.merge(&stats);
        assert_eq!(stats.counter(StatKey::Success), 2);
    }

    #[test]
    fn render_lists_preset_fields_and_failed_codes() {
        let stats = StatsCollector::new("login");
        stats.incr(StatKey::TotalSent, 3);
        stats.incr(StatKey::Success, 1);
        stats.incr_failed(404, 2);

        let rendered = stats.render(&FieldPreset::default_with_failed_codes());
        assert!(rendered.contains("======== login ========"));
        assert!(rendered.contains("--- Total Number of Requests => 3"));
        assert!(rendered.contains("--- Total Success => 1"));
        assert!(rendered.contains("--- Failed(404) => 2"));
        assert!(!rendered.contains("Total Timeouts"));

        let bare = stats.render(&FieldPreset::new([(StatKey::Success, "ok")]));
        assert!(!bare.contains("Failed(404)"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(StatsCollector::new("t"));
        let handles = (0..64)
            .map(|_| {
                let stats = stats.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        stats.consume(&passed(1));
                    }
                })
            })
            .collect::<Vec<_>>();
        futures::future::join_all(handles).await;

        assert_eq!(stats.total_sent(), 6400);
        assert_eq!(stats.counter(StatKey::Success), 6400);
        assert_eq!(stats.duration(StatKey::MainDuration), Some(ms(6400)));
    }
}
