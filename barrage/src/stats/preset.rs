use super::StatKey;

/// Which fields a rendering shows, and under which labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPreset {
    pub fields: Vec<(StatKey, String)>,
    /// Append one line per `failed::<code>` bucket found in the collector.
    pub failed_codes: bool,
}

impl FieldPreset {
    pub fn new(fields: impl IntoIterator<Item = (StatKey, impl Into<String>)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(key, label)| (key, label.into()))
                .collect(),
            failed_codes: false,
        }
    }

    pub fn with_failed_codes(mut self) -> Self {
        self.failed_codes = true;
        self
    }

    pub fn default_with_failed_codes() -> Self {
        Self::new([
            (StatKey::TotalSent, "Total Number of Requests"),
            (StatKey::Success, "Total Success"),
            (StatKey::Timeout, "Total Timeouts"),
            (StatKey::ConnectionRefused, "Total Conn. Refused"),
            (StatKey::OtherErrors, "Total Other Errors"),
            (StatKey::CacheUsed, "Total Cache Hits"),
            (StatKey::MaxConcurrency, "Max Concurrency Achieved"),
            (StatKey::AverageDuration, "Average Duration"),
            (StatKey::ShortestDuration, "Shortest Duration"),
            (StatKey::LongestDuration, "Longest Duration"),
            (StatKey::AverageExecDuration, "Average App Execution"),
            (StatKey::ShortestExecDuration, "Shortest App Execution"),
            (StatKey::LongestExecDuration, "Longest App Execution"),
        ])
        .with_failed_codes()
    }
}

impl Default for FieldPreset {
    fn default() -> Self {
        Self::default_with_failed_codes()
    }
}
