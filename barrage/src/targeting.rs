//! Scheduling of dependent targets.
//!
//! A run admits `request_count` iterations, at most `concurrency` at a time. What
//! one iteration does depends on the [`Policy`]:
//!
//! - `sequential`: every worker once, in declared order, each one inheriting
//!   the variables its predecessors extracted;
//! - `round-robin`: the same chain, rotated to start at worker `i mod n`;
//! - `parallel`: every worker at once with the ambient variables only.
//!
//! Data sources are chained among themselves before the first iteration, and
//! again on their refresh cadence while the run lasts. What they extract seeds
//! every iteration.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::{
    sync::{Semaphore, watch},
    task::JoinHandle,
};

use crate::{
    aggregate::Aggregate,
    config::Policy,
    error::{ConfigError, check_counts},
    progress::ProgressIndicator,
    stats::{FieldPreset, StatsCollector},
    variable::{self, VariableMap},
    wait::Wait,
    worker::{RequestWorker, log_join_failures},
};

/// Run `chain` in order, threading the variable map from each worker to the
/// next, and return what the last one produced.
pub async fn execute_chain<'a>(
    chain: impl IntoIterator<Item = &'a Arc<RequestWorker>>,
    seed: VariableMap,
) -> VariableMap {
    let mut variables = seed;
    for worker in chain {
        variables = worker.do_in_chain(&variables).await;
    }
    variables
}

#[derive(Debug)]
pub struct Targeting {
    policy: Policy,
    concurrency: usize,
    request_count: usize,
    workers: Vec<Arc<RequestWorker>>,
    data_sources: Vec<Arc<RequestWorker>>,
    variables: Arc<RwLock<VariableMap>>,
    progress: Arc<ProgressIndicator>,
    total: Option<StatsCollector>,
}

impl Targeting {
    pub fn new(policy: Policy, concurrency: usize, request_count: usize) -> Result<Self, ConfigError> {
        check_counts(concurrency, request_count)?;
        Ok(Self {
            policy,
            concurrency,
            request_count,
            workers: Vec::new(),
            data_sources: Vec::new(),
            variables: Arc::new(RwLock::new(VariableMap::new())),
            progress: Arc::new(ProgressIndicator::new(request_count as u64)),
            total: None,
        })
    }

    pub fn add_worker(&mut self, worker: RequestWorker) -> &mut Self {
        self.workers.push(Arc::new(worker));
        self
    }

    pub fn add_data_source(&mut self, worker: RequestWorker) -> &mut Self {
        self.data_sources.push(Arc::new(worker));
        self
    }

    /// Replace the ambient variables every iteration starts from.
    pub fn set_variables(&mut self, variables: VariableMap) -> &mut Self {
        *self.variables.write() = variables;
        self
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn workers(&self) -> &[Arc<RequestWorker>] {
        &self.workers
    }

    pub fn data_sources(&self) -> &[Arc<RequestWorker>] {
        &self.data_sources
    }

    pub fn variables(&self) -> VariableMap {
        self.variables.read().clone()
    }

    pub fn progress(&self) -> &ProgressIndicator {
        &self.progress
    }

    /// Every worker's collector folded together, available once the run is done.
    pub fn merged_stats(&self) -> Option<&StatsCollector> {
        self.total.as_ref()
    }

    pub async fn run(&mut self) -> Result<(), ConfigError> {
        if self.workers.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let refresher = self.start_data_sources(stop_rx).await;

        tracing::info!(
            policy = %self.policy,
            targets = self.workers.len(),
            requests = self.request_count,
            concurrency = self.concurrency,
            "running targets"
        );
        let workers: Arc<[Arc<RequestWorker>]> = self.workers.iter().cloned().collect();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(self.request_count);
        for iteration in 0..self.request_count {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let workers = workers.clone();
            let ambient = self.variables.clone();
            let progress = self.progress.clone();
            let policy = self.policy;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                progress.advance();
                let seed = ambient.read().clone();
                run_iteration(policy, &workers, iteration, seed).await;
            }));
        }
        log_join_failures(join_all(handles).await, "targeting");

        let _ = stop_tx.send(true);
        if let Some(refresher) = refresher {
            if let Err(error) = refresher.await {
                tracing::error!(%error, "data-source refresher failed");
            }
        }

        self.data_sources.iter().for_each(|source| source.finish());
        self.workers.iter().for_each(|worker| worker.finish());
        self.total = Some(self.merge_workers());
        tracing::info!("targets done");
        Ok(())
    }

    fn merge_workers(&self) -> StatsCollector {
        let total = StatsCollector::new("accumulator");
        for worker in &self.workers {
            total.merge(worker.stats());
        }
        total.set_key("total");
        total.calculate_average();
        total.calculate_exec_average();
        total
    }

    /// Run the data sources once, then hand them to a background refresher when
    /// the first one has a cadence.
    async fn start_data_sources(&self, stop: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let first = self.data_sources.first()?;
        let wait = first
            .config()
            .refresh
            .and_then(|refresh| refresh.interval())
            .map(Wait::every);

        tracing::info!(count = self.data_sources.len(), "running data-source(s)");
        let sources: Arc<[Arc<RequestWorker>]> = self.data_sources.iter().cloned().collect();
        refresh_ambient(&sources, &self.variables).await;

        let wait = wait?;
        let ambient = self.variables.clone();
        Some(tokio::spawn(async move {
            let mut wait = wait.with_stop(stop);
            while wait.wait().await {
                refresh_ambient(&sources, &ambient).await;
                tracing::debug!(round = wait.iterations(), "data-source(s) refreshed");
            }
            if let Some(error) = wait.error() {
                tracing::warn!(%error, "data-source refresh stopped");
            }
        }))
    }

    /// Print every worker's stats, then the total.
    pub fn print_stats(&self, preset: &FieldPreset) {
        for worker in &self.workers {
            worker.stats().print_pretty(preset);
        }
        if let Some(total) = &self.total {
            total.print_pretty(preset);
        }
    }
}

async fn run_iteration(
    policy: Policy,
    workers: &[Arc<RequestWorker>],
    iteration: usize,
    seed: VariableMap,
) {
    match policy {
        Policy::Sequential => {
            execute_chain(workers, seed).await;
        }
        Policy::RoundRobin => {
            let start = iteration % workers.len();
            let rotated = workers.iter().cycle().skip(start).take(workers.len());
            execute_chain(rotated, seed).await;
        }
        Policy::Parallel => {
            join_all(workers.iter().map(|worker| worker.do_in_chain(&seed))).await;
        }
    }
}

async fn refresh_ambient(sources: &[Arc<RequestWorker>], ambient: &RwLock<VariableMap>) {
    let seed = ambient.read().clone();
    let produced = execute_chain(sources, seed).await;
    let mut current = ambient.write();
    *current = variable::merge(&current, &produced);
}
