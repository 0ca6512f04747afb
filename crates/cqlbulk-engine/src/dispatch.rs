//! Bounded in-flight request dispatch
//!
//! [`RequestDispatcher`] caps the number of outstanding requests of one worker
//! with a semaphore. `submit` waits for a permit, spawns a completion task
//! that owns the request future, the original record text and the permit,
//! and returns right away. The completion applies the client timeout, updates
//! the atomic [`JobCounters`], echoes failed records to the bad-insert sink
//! and finally releases the permit.

use crate::rate_limiter::LatencyTracker;
use crate::session::{ExecuteFuture, RequestError};
use crate::sink::RecordSink;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-worker tallies, updated from completion tasks
#[derive(Debug, Default)]
pub struct JobCounters {
    succeeded: AtomicU64,
    parse_errors: AtomicU64,
    request_errors: AtomicU64,
}

/// Point-in-time copy of [`JobCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Rows written (load) or read (unload)
    pub succeeded: u64,
    pub parse_errors: u64,
    pub request_errors: u64,
}

impl JobCounters {
    pub fn add_succeeded(&self, rows: u64) -> u64 {
        self.succeeded.fetch_add(rows, Ordering::Relaxed) + rows
    }

    pub fn add_parse_error(&self) -> u64 {
        self.parse_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_request_error(&self) -> u64 {
        self.request_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn request_errors(&self) -> u64 {
        self.request_errors.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            succeeded: self.succeeded.load(Ordering::Acquire),
            parse_errors: self.parse_errors.load(Ordering::Acquire),
            request_errors: self.request_errors.load(Ordering::Acquire),
        }
    }
}

impl std::ops::AddAssign for CounterSnapshot {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.parse_errors += other.parse_errors;
        self.request_errors += other.request_errors;
    }
}

struct DispatchState {
    source: String,
    counters: Arc<JobCounters>,
    max_failures: u64,
    query_timeout: Duration,
    bad_sink: Option<Arc<RecordSink>>,
    log_sink: Option<Arc<RecordSink>>,
    latency: Option<Arc<LatencyTracker>>,
    progress_every: Option<u64>,
    completed: AtomicU64,
    ceiling_logged: AtomicBool,
}

impl DispatchState {
    fn ceiling_reached(&self) -> bool {
        self.counters.request_errors() >= self.max_failures
    }

    fn complete(&self, result: Result<(), RequestError>, records: &[String]) {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        match result {
            Ok(()) => {
                self.counters.add_succeeded(records.len() as u64);
            },
            Err(err) => {
                let failures = self.counters.add_request_error();
                for record in records {
                    warn!(source = %self.source, error = %err, record = %record, "Request failed");
                    self.write_sink(&self.log_sink, &format!(
                        "Error writing record from {}: {}: {}",
                        self.source, err, record
                    ));
                    self.write_sink(&self.bad_sink, record);
                }
                if failures >= self.max_failures && !self.ceiling_logged.swap(true, Ordering::AcqRel) {
                    error!(source = %self.source, failures = failures, "Maximum number of request errors reached");
                    self.write_sink(&self.log_sink, &format!(
                        "Maximum number of request errors reached ({}) for {}",
                        failures, self.source
                    ));
                }
            },
        }

        if let Some(every) = self.progress_every {
            if completed % every == 0 {
                let snapshot = self.counters.snapshot();
                info!(
                    source = %self.source,
                    completed = completed,
                    succeeded = snapshot.succeeded,
                    request_errors = snapshot.request_errors,
                    "Progress"
                );
            }
        }
    }

    fn write_sink(&self, sink: &Option<Arc<RecordSink>>, line: &str) {
        if let Some(sink) = sink {
            if let Err(e) = sink.write_record(line) {
                error!(source = %self.source, error = %e, "Failed to write sink");
            }
        }
    }
}

/// Bounds one worker's outstanding requests and enforces its failure ceiling
pub struct RequestDispatcher {
    permits: Arc<Semaphore>,
    capacity: u32,
    state: Arc<DispatchState>,
}

impl RequestDispatcher {
    /// # Arguments
    ///
    /// * `source` - Identifies the worker in logs
    /// * `capacity` - Requests allowed in flight at once (at least 1)
    /// * `max_failures` - Failed requests at which submission stops
    /// * `query_timeout` - Client-side limit on each request
    pub fn new(
        source: impl Into<String>,
        capacity: usize,
        max_failures: u64,
        query_timeout: Duration,
    ) -> Self {
        let capacity = u32::try_from(capacity.clamp(1, Semaphore::MAX_PERMITS)).unwrap_or(u32::MAX);
        Self {
            permits: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            state: Arc::new(DispatchState {
                source: source.into(),
                counters: Arc::new(JobCounters::default()),
                max_failures,
                query_timeout,
                bad_sink: None,
                log_sink: None,
                latency: None,
                progress_every: None,
                completed: AtomicU64::new(0),
                ceiling_logged: AtomicBool::new(false),
            }),
        }
    }

    /// Only valid before the first submission
    fn state_mut(&mut self) -> Option<&mut DispatchState> {
        Arc::get_mut(&mut self.state)
    }

    pub fn with_bad_sink(mut self, sink: Option<Arc<RecordSink>>) -> Self {
        if let Some(state) = self.state_mut() {
            state.bad_sink = sink;
        }
        self
    }

    pub fn with_log_sink(mut self, sink: Option<Arc<RecordSink>>) -> Self {
        if let Some(state) = self.state_mut() {
            state.log_sink = sink;
        }
        self
    }

    /// Feeds request latencies to `tracker`.
    pub fn with_latency_tracker(mut self, tracker: Option<Arc<LatencyTracker>>) -> Self {
        if let Some(state) = self.state_mut() {
            state.latency = tracker;
        }
        self
    }

    /// Logs progress every `every` completions.
    pub fn with_progress(mut self, every: u64) -> Self {
        if let Some(state) = self.state_mut() {
            state.progress_every = Some(every.max(1));
        }
        self
    }

    pub fn counters(&self) -> Arc<JobCounters> {
        Arc::clone(&self.state.counters)
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Starts a request once a slot is free
    ///
    /// # Arguments
    ///
    /// * `start` - Issues the request; called only after a permit is held
    /// * `records` - Original text of every row the request carries
    ///
    /// # Returns
    ///
    /// `false` without starting the request once the failure ceiling is
    /// reached, including while waiting for the permit.
    pub async fn submit<F>(&self, start: F, records: Vec<String>) -> bool
    where
        F: FnOnce() -> ExecuteFuture,
    {
        if self.state.ceiling_reached() {
            return false;
        }
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };
        if self.state.ceiling_reached() {
            return false;
        }

        let handle = start();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(state.query_timeout, handle).await {
                Ok(result) => result,
                Err(_) => Err(RequestError::ClientTimeout(
                    u64::try_from(state.query_timeout.as_millis()).unwrap_or(u64::MAX),
                )),
            };
            if let Some(tracker) = &state.latency {
                tracker.record(started.elapsed());
            }
            state.complete(result, &records);
            drop(permit);
        });
        true
    }

    /// Waits for every outstanding request
    ///
    /// # Returns
    ///
    /// `true` when the failure ceiling was not reached.
    pub async fn drain(&self) -> bool {
        match self.permits.acquire_many(self.capacity).await {
            Ok(all) => drop(all),
            Err(_) => return false,
        }
        let ok = !self.state.ceiling_reached();
        debug!(source = %self.state.source, ok = ok, "Drained outstanding requests");
        ok
    }

    /// Requests completed so far, successful or not
    pub fn completed_count(&self) -> u64 {
        self.state.completed.load(Ordering::Acquire)
    }
}
