use std::{fmt::Debug, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// A single sample produced by one request.
/// Metrics are consumed into an [`Aggregate`](crate::aggregate::Aggregate).
pub trait Metric
where
    Self: Serialize + DeserializeOwned + PartialEq + Send + Sync + Debug + Clone,
{
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeoutKind {
    /// The request did not complete within the target's timeout.
    Transport,
    /// The server answered 504 Gateway Timeout.
    Server,
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Outcome {
    /// Response received and every assertion passed.
    Passed { status: u16 },
    /// Response received but an assertion failed.
    Failed { status: u16 },
    Timeout { source: TimeoutKind },
    ConnectionRefused,
    /// Any other transport failure, or a body that could not be read.
    OtherError,
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetric {
    pub outcome: Outcome,
    /// Wall-clock time, present once the response was classified.
    pub latency: Option<Duration>,
    /// Server-side execution time, present when the target names an exec
    /// duration header.
    pub exec_duration: Option<Duration>,
    pub cache_hit: bool,
}

impl Metric for RequestMetric {}

impl RequestMetric {
    /// A request that never produced a usable response.
    pub fn aborted(outcome: Outcome) -> Self {
        Self {
            outcome,
            latency: None,
            exec_duration: None,
            cache_hit: false,
        }
    }

    pub fn completed(
        outcome: Outcome,
        latency: Duration,
        exec_duration: Option<Duration>,
        cache_hit: bool,
    ) -> Self {
        Self {
            outcome,
            latency: Some(latency),
            exec_duration,
            cache_hit,
        }
    }
}
