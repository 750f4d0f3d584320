use std::{collections::BTreeMap, fmt::Write as _, io::Write as _};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::{FieldPreset, StatKey, StatValue, StatsCollector};

/// Point-in-time, serializable view of a [`StatsCollector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub key: String,
    pub fields: BTreeMap<StatKey, StatValue>,
}

impl From<&StatsCollector> for StatsReport {
    fn from(stats: &StatsCollector) -> Self {
        Self {
            key: stats.key(),
            fields: stats.snapshot(),
        }
    }
}

impl StatsReport {
    /// Share of sent requests that passed, in percent.
    pub fn success_ratio(&self) -> Option<f64> {
        let count = |key: StatKey| {
            self.fields
                .get(&key)
                .and_then(StatValue::as_count)
                .unwrap_or(0)
        };
        let sent = count(StatKey::TotalSent);
        (sent > 0).then(|| count(StatKey::Success) as f64 / sent as f64 * 100.0)
    }

    /// Header line, one line per preset field present, then the failed buckets
    /// when the preset asks for them.
    pub fn render(&self, preset: &FieldPreset) -> String {
        let mut out = format!("\n======== {} ========\n", self.key);
        for (key, label) in &preset.fields {
            if let Some(value) = self.fields.get(key) {
                let _ = writeln!(out, "--- {label} => {value}");
            }
        }
        if preset.failed_codes {
            for (key, value) in &self.fields {
                if let StatKey::Failed(code) = key {
                    let _ = writeln!(out, "--- Failed({code}) => {value}");
                }
            }
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends reports somewhere: stdout, a file, a database.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: &StatsReport) -> Result<(), ReportError>;
}

#[derive(Debug, Clone, Default)]
pub struct StdoutReporter {
    pub preset: FieldPreset,
}

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(&self, report: &StatsReport) -> Result<(), ReportError> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(report.render(&self.preset).as_bytes())?;
        Ok(())
    }
}

/// One JSON document per report on stdout.
#[derive(Debug, Clone, Default)]
pub struct JsonReporter {
    pub pretty: bool,
}

impl JsonReporter {
    pub fn render(&self, report: &StatsReport) -> Result<String, ReportError> {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        Ok(rendered)
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn report(&self, report: &StatsReport) -> Result<(), ReportError> {
        let rendered = self.render(report)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{rendered}")?;
        Ok(())
    }
}
