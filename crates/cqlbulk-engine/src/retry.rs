//! Write-retry policy
//!
//! Sessions consult the policy attached to a prepared statement when a
//! request fails, beneath the asynchronous handle the engine sees.

use crate::session::{Consistency, RequestError};
use std::future::Future;
use tracing::debug;

/// Attempts allowed when a policy keeps moving to the next host.
pub const DEFAULT_MAX_HOST_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry on the same host at the given level
    Retry(Consistency),
    /// Retry on the next host of the query plan
    TryNextHost(Consistency),
    /// Surface the error to the caller
    Rethrow,
}

/// Decides what happens after a failed request
///
/// `retries` counts the retries already made for this request.
pub trait RetryPolicy: Send + Sync {
    fn on_write_timeout(
        &self,
        consistency: Consistency,
        required: u32,
        received: u32,
        retries: u32,
    ) -> RetryDecision;

    fn on_read_timeout(
        &self,
        consistency: Consistency,
        required: u32,
        received: u32,
        data_retrieved: bool,
        retries: u32,
    ) -> RetryDecision;

    fn on_unavailable(
        &self,
        consistency: Consistency,
        required: u32,
        alive: u32,
        retries: u32,
    ) -> RetryDecision;

    fn on_request_error(
        &self,
        consistency: Consistency,
        error: &RequestError,
        retries: u32,
    ) -> RetryDecision;

    /// Routes `error` to the matching hook.
    fn decide(&self, consistency: Consistency, error: &RequestError, retries: u32) -> RetryDecision {
        match *error {
            RequestError::WriteTimeout { consistency, required, received } => {
                self.on_write_timeout(consistency, required, received, retries)
            },
            RequestError::ReadTimeout { consistency, required, received, data_retrieved } => {
                self.on_read_timeout(consistency, required, received, data_retrieved, retries)
            },
            RequestError::Unavailable { consistency, required, alive } => {
                self.on_unavailable(consistency, required, alive, retries)
            },
            _ => self.on_request_error(consistency, error, retries),
        }
    }
}

/// Loader policy
///
/// - write timeout: retry at the same level while `retries < max_retries`
/// - read timeout: retry once, only when enough replicas answered but the
///   data itself was not retrieved
/// - unavailable: give up immediately
/// - anything else: try the next host
#[derive(Debug, Clone, Copy)]
pub struct LoaderRetryPolicy {
    max_retries: u32,
}

impl LoaderRetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl RetryPolicy for LoaderRetryPolicy {
    fn on_write_timeout(
        &self,
        consistency: Consistency,
        _required: u32,
        _received: u32,
        retries: u32,
    ) -> RetryDecision {
        if retries < self.max_retries {
            RetryDecision::Retry(consistency)
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_read_timeout(
        &self,
        consistency: Consistency,
        required: u32,
        received: u32,
        data_retrieved: bool,
        retries: u32,
    ) -> RetryDecision {
        if retries == 0 && received >= required && !data_retrieved {
            RetryDecision::Retry(consistency)
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_unavailable(
        &self,
        _consistency: Consistency,
        _required: u32,
        _alive: u32,
        _retries: u32,
    ) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_request_error(
        &self,
        consistency: Consistency,
        _error: &RequestError,
        _retries: u32,
    ) -> RetryDecision {
        RetryDecision::TryNextHost(consistency)
    }
}

/// Runs `attempt` until it succeeds or `policy` gives up
///
/// # Arguments
///
/// * `policy` - Consulted after each failure; `None` fails on the first error
/// * `consistency` - Level for the first attempt
/// * `attempt` - Issues one request, given the level and the retry count
///
/// # Returns
///
/// The first successful result, or the last error once the policy rethrows
/// or [`DEFAULT_MAX_HOST_ATTEMPTS`] hosts have been tried.
pub async fn execute_with_policy<T, F, Fut>(
    policy: Option<&dyn RetryPolicy>,
    consistency: Consistency,
    mut attempt: F,
) -> Result<T, RequestError>
where
    F: FnMut(Consistency, u32) -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut level = consistency;
    let mut retries = 0u32;
    let mut hosts_tried = 1u32;

    loop {
        let err = match attempt(level, retries).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let Some(policy) = policy else {
            return Err(err);
        };

        match policy.decide(level, &err, retries) {
            RetryDecision::Retry(next) => level = next,
            RetryDecision::TryNextHost(next) => {
                if hosts_tried >= DEFAULT_MAX_HOST_ATTEMPTS {
                    return Err(err);
                }
                hosts_tried += 1;
                level = next;
            },
            RetryDecision::Rethrow => return Err(err),
        }

        retries += 1;
        debug!(retries = retries, consistency = %level, error = %err, "Retrying request");
    }
}
