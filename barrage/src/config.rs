//! Target descriptions.
//!
//! Field names follow the kebab-case keys of the YAML documents the CLI loads,
//! so a deserialized document maps one to one onto [`TargetConfig`].

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    assertion::AssertionRegistry,
    error::{ConfigError, check_counts},
    variable::{ContentFormat, VariableMap},
};

/// How each iteration walks the list of targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// The full chain, in declared order.
    #[default]
    #[serde(alias = "seq")]
    Sequential,
    /// The full chain, rotated to start one target further every iteration.
    RoundRobin,
    /// Every target fired independently and at once.
    Parallel,
}

impl FromStr for Policy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "seq" | "sequential" => Ok(Self::Sequential),
            "round-robin" => Ok(Self::RoundRobin),
            "parallel" => Ok(Self::Parallel),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequential => "sequential",
            Self::RoundRobin => "round-robin",
            Self::Parallel => "parallel",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshUnit {
    Ms,
    Sec,
}

/// Data-source cadence: `every <value> <type>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(rename = "type")]
    pub unit: RefreshUnit,
    #[serde(rename = "value")]
    pub count: i64,
}

impl RefreshConfig {
    pub fn millis(count: i64) -> Self {
        Self {
            unit: RefreshUnit::Ms,
            count,
        }
    }

    pub fn secs(count: i64) -> Self {
        Self {
            unit: RefreshUnit::Sec,
            count,
        }
    }

    /// `None` means "run once, never refresh".
    pub fn interval(&self) -> Option<Duration> {
        let count = u64::try_from(self.count).ok().filter(|c| *c >= 1)?;
        Some(match self.unit {
            RefreshUnit::Ms => Duration::from_millis(count),
            RefreshUnit::Sec => Duration::from_secs(count),
        })
    }
}

/// A single HTTP target and how hard to hit it.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    #[builder(default, setter(into))]
    #[serde(default)]
    pub name: String,
    #[builder(default = "GET".to_string(), setter(into))]
    #[serde(default = "default_method")]
    pub method: String,
    #[builder(setter(into))]
    pub url: String,
    #[builder(default)]
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[builder(default, setter(into))]
    #[serde(default)]
    pub form_body: String,
    #[builder(default = 1)]
    #[serde(default = "one")]
    pub concurrency: usize,
    #[builder(default = 1)]
    #[serde(default = "one")]
    pub request_count: usize,
    #[builder(default = Duration::from_secs(30))]
    #[serde(
        rename = "max-timeout",
        with = "duration_secs",
        default = "default_timeout"
    )]
    pub timeout: Duration,
    /// Response header whose value `"1"` marks a cache hit.
    #[builder(default, setter(strip_option, into))]
    #[serde(default, rename = "cache-usage-header-name")]
    pub cache_header: Option<String>,
    /// Response header carrying the server-side execution time (`"12.5ms"`).
    #[builder(default, setter(strip_option, into))]
    #[serde(default, rename = "exec-duration-header-name")]
    pub exec_duration_header: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub enable_logs: bool,
    /// How the whole run walks its targets. Every target that sets it has to
    /// agree with the others; data sources only accept `sequential`.
    #[builder(default, setter(strip_option))]
    #[serde(default, rename = "targeting-policy")]
    pub policy: Option<Policy>,
    #[builder(default)]
    #[serde(default)]
    pub variables: VariableMap,
    /// Enabled assertions, name to expected value.
    #[builder(default)]
    #[serde(default)]
    pub assertions: BTreeMap<String, String>,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub refresh: Option<RefreshConfig>,
    #[builder(default)]
    #[serde(default)]
    pub content_format: ContentFormat,
}

impl TargetConfig {
    /// Fatal configuration checks, run before any request is sent.
    pub fn validate(&self, registry: &AssertionRegistry) -> Result<(), ConfigError> {
        check_counts(self.concurrency, self.request_count)?;
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout(self.name.clone()));
        }
        self.http_method()?;
        for (name, expected) in &self.assertions {
            registry
                .build(name, expected)
                .map_err(|source| ConfigError::Assertion {
                    target: self.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn http_method(&self) -> Result<Method, ConfigError> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(self.method.clone()))
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn one() -> usize {
    1
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
