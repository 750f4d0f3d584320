use thiserror::Error;

use crate::{assertion::AssertionError, config::Policy};

/// Failures that abort a run before anything is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("concurrency and request count must be positive")]
    NonPositive,
    #[error("concurrency ({concurrency}) cannot exceed the request count ({requests})")]
    ConcurrencyExceedsRequests { concurrency: usize, requests: usize },
    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),
    #[error("unknown targeting policy `{0}`")]
    UnknownPolicy(String),
    #[error("conflicting targeting policies `{first}` and `{second}`")]
    ConflictingPolicies { first: Policy, second: Policy },
    #[error("data source `{0}` always runs sequentially")]
    DataSourcePolicy(String),
    #[error("target `{0}`: max timeout must be at least one second")]
    ZeroTimeout(String),
    #[error("target `{target}`: {source}")]
    Assertion {
        target: String,
        #[source]
        source: AssertionError,
    },
    #[error("no targets to run")]
    NoTargets,
}

/// Checks shared by workers and the scheduler.
pub(crate) fn check_counts(concurrency: usize, requests: usize) -> Result<(), ConfigError> {
    if concurrency == 0 || requests == 0 {
        return Err(ConfigError::NonPositive);
    }
    if concurrency > requests {
        return Err(ConfigError::ConcurrencyExceedsRequests {
            concurrency,
            requests,
        });
    }
    Ok(())
}
