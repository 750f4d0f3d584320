//! One target, many requests.
//!
//! A [`RequestWorker`] turns its [`TargetConfig`] into requests, classifies each
//! response and records the result in its own [`StatsCollector`]. It runs either
//! standalone ([`RequestWorker::run`]) or as one link of a chain driven by
//! [`Targeting`](crate::targeting::Targeting).

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use futures::future::join_all;
use reqwest::Method;
use tokio::{sync::Semaphore, task::JoinError};

use crate::{
    aggregate::Aggregate,
    assertion::{AssertionManager, AssertionRegistry, Observed},
    config::TargetConfig,
    error::{ConfigError, check_counts},
    gauge::ConcurrencyGauge,
    metric::{Outcome, RequestMetric, TimeoutKind},
    progress::ProgressIndicator,
    stats::StatsCollector,
    transport::{Transport, TransportError, TransportRequest},
    util::parse_duration,
    variable::{self, VariableMap},
};

const GATEWAY_TIMEOUT: u16 = 504;

#[derive(Debug)]
pub struct RequestWorker {
    config: TargetConfig,
    method: Method,
    transport: Arc<dyn Transport>,
    assertions: AssertionManager,
    stats: Arc<StatsCollector>,
    gauge: ConcurrencyGauge,
}

impl RequestWorker {
    pub fn new(
        config: TargetConfig,
        transport: Arc<dyn Transport>,
        registry: &AssertionRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate(registry)?;
        let method = config.http_method()?;
        let assertions =
            registry
                .manager_for(&config.assertions)
                .map_err(|source| ConfigError::Assertion {
                    target: config.name.clone(),
                    source,
                })?;
        let stats = Arc::new(StatsCollector::new(config.name.clone()));
        let gauge = ConcurrencyGauge::new(stats.clone());

        Ok(Self {
            config,
            method,
            transport,
            assertions,
            stats,
            gauge,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    /// Computes both averages of this worker's collector.
    pub fn finish(&self) {
        self.stats.calculate_average();
        self.stats.calculate_exec_average();
    }

    fn build_request(&self, variables: &VariableMap) -> TransportRequest {
        TransportRequest {
            method: self.method.clone(),
            url: variable::substitute(variables, &self.config.url),
            headers: self
                .config
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), variable::substitute(variables, value)))
                .collect(),
            body: variable::substitute(variables, &self.config.form_body),
        }
    }

    fn needs_body(&self) -> bool {
        self.assertions.needs_body() || !self.config.variables.is_empty()
    }

    fn abort(&self, outcome: Outcome, reason: &dyn std::fmt::Display) {
        if self.config.enable_logs {
            tracing::error!(target_name = %self.config.name, ?outcome, "request failed: {reason}");
        }
        self.stats.consume(&RequestMetric::aborted(outcome));
    }

    /// Send one request with `variables` substituted and record its outcome.
    ///
    /// Returns the response body when it was read, which happens when an
    /// assertion reads it or the target declares variables.
    pub async fn execute(&self, variables: &VariableMap) -> Option<Bytes> {
        let _in_flight = self.gauge.enter();
        let request = self.build_request(variables);
        let timeout = self.config.timeout;
        let started = Instant::now();

        let sent = tokio::time::timeout(timeout, self.transport.send(request, timeout)).await;
        let mut response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let outcome = match e {
                    TransportError::Timeout => Outcome::Timeout {
                        source: TimeoutKind::Transport,
                    },
                    TransportError::ConnectionRefused => Outcome::ConnectionRefused,
                    TransportError::Other(_) => Outcome::OtherError,
                };
                self.abort(outcome, &e);
                return None;
            }
            Err(elapsed) => {
                let outcome = Outcome::Timeout {
                    source: TimeoutKind::Transport,
                };
                self.abort(outcome, &elapsed);
                return None;
            }
        };

        let status = response.status();
        if status == GATEWAY_TIMEOUT {
            let outcome = Outcome::Timeout {
                source: TimeoutKind::Server,
            };
            self.abort(outcome, &"server timeout");
            return None;
        }

        let body = if self.needs_body() {
            match response.body().await {
                Ok(body) => Some(body),
                Err(e) => {
                    self.abort(Outcome::OtherError, &format!("failed to read body: {e}"));
                    return None;
                }
            }
        } else {
            None
        };

        let mut assertions = self.assertions.clone();
        let observed = Observed {
            status,
            body: body.as_ref(),
        };
        if let Err(e) = assertions.observe(&observed) {
            tracing::debug!(error = %e, "assertion rejected the response");
        }

        let outcome = match assertions.run_all() {
            Ok(()) => Outcome::Passed { status },
            Err(e) => {
                if self.config.enable_logs {
                    tracing::warn!(target_name = %self.config.name, status, error = %e, "assertion failed");
                }
                Outcome::Failed { status }
            }
        };

        let cache_hit = self
            .config
            .cache_header
            .as_deref()
            .and_then(|name| response.header(name))
            .is_some_and(|value| value == "1");
        let exec_duration = self.config.exec_duration_header.as_deref().map(|name| {
            response
                .header(name)
                .and_then(parse_duration)
                .unwrap_or_default()
        });

        self.stats.consume(&RequestMetric::completed(
            outcome,
            started.elapsed(),
            exec_duration,
            cache_hit,
        ));
        body
    }

    /// One request as a link of a chain: `variables` are substituted in, and
    /// whatever this target extracts from its response is merged over them
    /// for the next link.
    pub async fn do_in_chain(&self, variables: &VariableMap) -> VariableMap {
        match self.execute(variables).await {
            Some(body) if !self.config.variables.is_empty() => {
                let extracted =
                    variable::extract(&self.config.variables, &body, self.config.content_format);
                variable::merge(variables, &extracted)
            }
            _ => variables.clone(),
        }
    }

    /// Fire `request-count` requests, at most `concurrency` at a time, wait for
    /// all of them and compute the averages.
    pub async fn run(self: &Arc<Self>) -> Result<(), ConfigError> {
        check_counts(self.config.concurrency, self.config.request_count)?;
        tracing::info!(
            target_name = %self.config.name,
            requests = self.config.request_count,
            concurrency = self.config.concurrency,
            "running target"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let progress = Arc::new(ProgressIndicator::new(self.config.request_count as u64));
        let empty = Arc::new(VariableMap::new());
        let mut handles = Vec::with_capacity(self.config.request_count);
        for _ in 0..self.config.request_count {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(self);
            let progress = progress.clone();
            let empty = empty.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                progress.advance();
                worker.execute(&empty).await;
            }));
        }
        log_join_failures(join_all(handles).await, &self.config.name);

        self.finish();
        tracing::info!(target_name = %self.config.name, "target done");
        Ok(())
    }
}

/// Join errors mean a request task panicked or was cancelled. The run goes on.
pub(crate) fn log_join_failures(results: Vec<Result<(), JoinError>>, scope: &str) {
    for error in results.into_iter().filter_map(Result::err) {
        tracing::error!(scope, %error, "request task failed");
    }
}
