//! Barrage: chained HTTP load testing.
//!
//! Barrage drives a configurable volume of concurrent requests against one or
//! more HTTP targets. Targets can depend on each other: values extracted from
//! one response (a login token, a user id) are substituted into the requests
//! of the next. Every response is checked by pluggable assertions, and the
//! outcome of every request lands in mergeable per-target statistics.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`LoadTest`]: glue that ties everything together. It validates the
//!   configuration, builds the workers and runs them.
//! - [`Targeting`]: the scheduler. It admits iterations under a global
//!   concurrency bound and walks the targets according to a [`Policy`].
//! - [`RequestWorker`]: one target. It builds requests, classifies responses
//!   and records a [`RequestMetric`] per request.
//! - [`StatsCollector`]: an [`Aggregate`] consuming metrics. Collectors merge,
//!   so per-target numbers fold into a total.
//! - [`StatsReport`] and [`Reporter`]: a snapshot of a collector, and where it
//!   goes (stdout, JSON).
//! - [`Transport`]: how requests leave the process. [`ReqwestTransport`] by
//!   default, anything implementing the trait otherwise.
//!
//! # Example
//!
//! Log in once per iteration and fetch the profile with the returned token:
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//!
//! use barrage::{
//!     LoadTest, Policy, TargetConfig,
//!     assertion::BODY_CONTAINS,
//!     stats::FieldPreset,
//!     variable::{VariableEntry, VariableMap, VariableType},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let login = TargetConfig::builder()
//!         .name("login")
//!         .method("POST")
//!         .url("http://localhost:3000/login")
//!         .form_body(r#"{"user":"robert"}"#)
//!         .variables(VariableMap::from([(
//!             "$token".to_string(),
//!             VariableEntry::new(VariableType::String, "data.token"),
//!         )]))
//!         .build();
//!     let profile = TargetConfig::builder()
//!         .name("profile")
//!         .url("http://localhost:3000/me")
//!         .headers(BTreeMap::from([(
//!             "Authorization".to_string(),
//!             "Bearer $token".to_string(),
//!         )]))
//!         .assertions(BTreeMap::from([(BODY_CONTAINS.to_string(), "robert".to_string())]))
//!         .build();
//!
//!     let summary = LoadTest::builder()
//!         .name("login flow")
//!         .targets(vec![login, profile])
//!         .policy(Policy::Sequential)
//!         .concurrency(20)
//!         .request_count(2_000)
//!         .build()
//!         .run()
//!         .await
//!         .unwrap();
//!
//!     summary.print(&FieldPreset::default_with_failed_codes());
//! }
//! ```
//!
//! # Where to start
//!
//! - Read the docs for [`LoadTest`], [`TargetConfig`] and [`Targeting`].
//! - See `examples/` for runnable scenarios (recommended: `examples/chain.rs`).

/// Mergeable metric collectors
pub mod aggregate;
/// Response assertions and their registry
pub mod assertion;
/// Target descriptions
pub mod config;
pub mod error;
/// In-flight request tracking
pub mod gauge;
/// Per-request samples
pub mod metric;
pub mod progress;
/// Reports and Reporters
pub mod report;
pub mod stats;
pub mod targeting;
/// HTTP capability
pub mod transport;
pub mod util;
/// Extraction and substitution of chain variables
pub mod variable;
pub mod wait;
pub mod worker;

pub use aggregate::Aggregate;
pub use config::{Policy, TargetConfig};
pub use error::ConfigError;
pub use load_test::{LoadTest, RunSummary};
pub use metric::{Metric, RequestMetric};
pub use report::{Reporter, StatsReport};
pub use stats::StatsCollector;
pub use targeting::Targeting;
pub use transport::{ReqwestTransport, Transport};
pub use worker::RequestWorker;
