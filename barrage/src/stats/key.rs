use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const FAILED_PREFIX: &str = "failed::";

/// Every field a [`StatsCollector`](super::StatsCollector) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatKey {
    TotalSent,
    Success,
    /// Responses whose assertions failed, bucketed by status code.
    Failed(u16),
    Timeout,
    ConnectionRefused,
    OtherErrors,
    CacheUsed,
    MaxConcurrency,
    MainDuration,
    LongestDuration,
    ShortestDuration,
    AverageDuration,
    ExecDuration,
    LongestExecDuration,
    ShortestExecDuration,
    AverageExecDuration,
}

/// How a field is updated and merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatClass {
    Counter,
    Peak,
    Sum,
    Longest,
    Shortest,
    Average,
}

impl StatKey {
    pub fn class(&self) -> StatClass {
        match self {
            Self::TotalSent
            | Self::Success
            | Self::Failed(_)
            | Self::Timeout
            | Self::ConnectionRefused
            | Self::OtherErrors
            | Self::CacheUsed => StatClass::Counter,
            Self::MaxConcurrency => StatClass::Peak,
            Self::MainDuration | Self::ExecDuration => StatClass::Sum,
            Self::LongestDuration | Self::LongestExecDuration => StatClass::Longest,
            Self::ShortestDuration | Self::ShortestExecDuration => StatClass::Shortest,
            Self::AverageDuration | Self::AverageExecDuration => StatClass::Average,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::TotalSent => "total-sent",
            Self::Success => "success",
            Self::Failed(_) => "failed",
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection-refused",
            Self::OtherErrors => "other-errors",
            Self::CacheUsed => "cache-used",
            Self::MaxConcurrency => "max-concurrency",
            Self::MainDuration => "main-duration",
            Self::LongestDuration => "longest-duration",
            Self::ShortestDuration => "shortest-duration",
            Self::AverageDuration => "average-duration",
            Self::ExecDuration => "exec-duration",
            Self::LongestExecDuration => "longest-exec-duration",
            Self::ShortestExecDuration => "shortest-exec-duration",
            Self::AverageExecDuration => "average-exec-duration",
        }
    }

    const NAMED: [StatKey; 15] = [
        Self::TotalSent,
        Self::Success,
        Self::Timeout,
        Self::ConnectionRefused,
        Self::OtherErrors,
        Self::CacheUsed,
        Self::MaxConcurrency,
        Self::MainDuration,
        Self::LongestDuration,
        Self::ShortestDuration,
        Self::AverageDuration,
        Self::ExecDuration,
        Self::LongestExecDuration,
        Self::ShortestExecDuration,
        Self::AverageExecDuration,
    ];
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(code) => write!(f, "{FAILED_PREFIX}{code}"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stat key `{0}`")]
pub struct UnknownStatKey(pub String);

impl FromStr for StatKey {
    type Err = UnknownStatKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(code) = s.strip_prefix(FAILED_PREFIX) {
            return code
                .parse()
                .map(Self::Failed)
                .map_err(|_| UnknownStatKey(s.to_string()));
        }
        Self::NAMED
            .into_iter()
            .find(|key| key.name() == s)
            .ok_or_else(|| UnknownStatKey(s.to_string()))
    }
}

impl Serialize for StatKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StatKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A field value, tagged with its class so merging needs no lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatValue {
    Counter(u64),
    Peak(u64),
    Sum(Duration),
    Longest(Duration),
    Shortest(Duration),
    Average(Duration),
}

impl StatValue {
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Counter(n) | Self::Peak(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Sum(d) | Self::Longest(d) | Self::Shortest(d) | Self::Average(d) => Some(*d),
            _ => None,
        }
    }

    /// Fold `other` into `self`. Averages are left alone, mismatched classes
    /// too.
    pub(crate) fn merge(&mut self, other: StatValue) {
        match (self, other) {
            (Self::Counter(a), Self::Counter(b)) => *a = a.saturating_add(b),
            (Self::Peak(a), Self::Peak(b)) => *a = (*a).max(b),
            (Self::Sum(a), Self::Sum(b)) => *a = a.saturating_add(b),
            (Self::Longest(a), Self::Longest(b)) => *a = (*a).max(b),
            (Self::Shortest(a), Self::Shortest(b)) => *a = (*a).min(b),
            _ => {}
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter(n) | Self::Peak(n) => write!(f, "{n}"),
            Self::Sum(d) | Self::Longest(d) | Self::Shortest(d) | Self::Average(d) => {
                write!(f, "{d:?}")
            }
        }
    }
}
