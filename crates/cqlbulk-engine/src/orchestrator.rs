//! Worker pool for load and unload jobs
//!
//! Runs one task per load source or unload range, at most `num_workers` at
//! a time. The first fatal error aborts every sibling and is returned;
//! per-source outcomes and counters are summed into a [`JobSummary`].

use crate::dispatch::CounterSnapshot;
use crate::load::{LoadOutcome, LoadTask};
use crate::partitioner::TokenRange;
use crate::sink::LoadSinks;
use crate::unload::UnloadTask;
use cqlbulk_common::{BulkError, Result};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};

/// One load input
pub struct LoadSource {
    pub name: String,
    pub reader: Box<dyn AsyncBufRead + Unpin + Send>,
    pub sinks: LoadSinks,
}

impl LoadSource {
    /// An in-memory or already opened input without side channels
    pub fn new(name: impl Into<String>, reader: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        Self { name: name.into(), reader: Box::new(reader), sinks: LoadSinks::default() }
    }

    pub fn with_sinks(mut self, sinks: LoadSinks) -> Self {
        self.sinks = sinks;
        self
    }

    /// Opens `path`, with `.BADPARSE`, `.BADINSERT` and `.LOG` files in
    /// `bad_dir` when given
    pub async fn open(path: &Path, bad_dir: Option<&Path>, json_array: bool) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let name = path.display().to_string();
        let sinks = match bad_dir {
            Some(dir) => {
                let stem = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| name.clone());
                LoadSinks::in_dir(dir, &stem, json_array)?
            },
            None => LoadSinks::default(),
        };
        Ok(Self::new(name, BufReader::new(file)).with_sinks(sinks))
    }
}

/// Totals of a finished job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    /// Summed over every worker; for unloads `succeeded` counts rows written
    pub counters: CounterSnapshot,
    /// Per source or range: rows, or a negative ceiling code
    pub results: Vec<(String, i64)>,
    pub elapsed: Duration,
}

impl JobSummary {
    /// Whether every source finished below its error ceilings
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|(_, code)| *code >= 0)
    }

    /// Sources stopped by a ceiling
    pub fn failed_sources(&self) -> Vec<&str> {
        self.results.iter().filter(|(_, code)| *code < 0).map(|(name, _)| name.as_str()).collect()
    }
}

/// Loads every source, `task.config().num_workers` at a time
///
/// # Returns
///
/// The summed counters and one result per source in input order. A fatal
/// error in any source aborts the rest.
pub async fn run_load(task: LoadTask, sources: Vec<LoadSource>) -> Result<JobSummary> {
    let started = Instant::now();
    let num_workers = task.config().num_workers;
    info!(sources = sources.len(), workers = num_workers, table = %task.table().table, "Starting load");

    let jobs = sources
        .into_iter()
        .map(|source| {
            let task = task.clone();
            let name = source.name.clone();
            let job = async move { task.process_file(&source.name, source.reader, source.sinks).await };
            (name, job)
        })
        .collect();

    let outcomes = run_pool(jobs, num_workers).await?;
    let mut summary = JobSummary::default();
    for (name, outcome) in outcomes {
        summary.counters += outcome.counters();
        if let LoadOutcome::ParseCeilingExceeded(_) | LoadOutcome::InsertCeilingExceeded(_) = outcome {
            error!(source = %name, code = outcome.code(), "Source stopped at error ceiling");
        }
        summary.results.push((name, outcome.code()));
    }
    summary.elapsed = started.elapsed();

    info!(
        inserted = summary.counters.succeeded,
        parse_errors = summary.counters.parse_errors,
        request_errors = summary.counters.request_errors,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Load finished"
    );
    Ok(summary)
}

/// Unloads the job's token ranges, one worker per range
///
/// # Arguments
///
/// * `task` - The unload task; its config decides bounds and worker count
/// * `open` - Creates the writer for range `i`
pub async fn run_unload<W, F>(task: UnloadTask, mut open: F) -> Result<JobSummary>
where
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnMut(usize, &TokenRange) -> Result<W>,
{
    let started = Instant::now();
    let ranges = task.ranges()?;
    let num_workers = task.config().num_workers;
    info!(ranges = ranges.len(), workers = num_workers, "Starting unload");

    let mut jobs = Vec::with_capacity(ranges.len());
    for (index, range) in ranges.into_iter().enumerate() {
        let writer = open(index, &range)?;
        let task = task.clone();
        let name = range.to_string();
        jobs.push((name, async move { task.process_range(&range, writer).await }));
    }

    let rows = run_pool(jobs, num_workers).await?;
    let mut summary = JobSummary::default();
    for (name, count) in rows {
        summary.counters.succeeded += count;
        summary.results.push((name, i64::try_from(count).unwrap_or(i64::MAX)));
    }
    summary.elapsed = started.elapsed();

    info!(
        rows = summary.counters.succeeded,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Unload finished"
    );
    Ok(summary)
}

/// Runs `jobs` with at most `num_workers` in flight
///
/// Results come back in job order. The first error or panic aborts the
/// remaining workers.
async fn run_pool<T, Fut>(jobs: Vec<(String, Fut)>, num_workers: usize) -> Result<Vec<(String, T)>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let capacity = num_workers.max(1);
    let mut results: Vec<Option<(String, T)>> = std::iter::repeat_with(|| None).take(jobs.len()).collect();
    let mut pending = jobs.into_iter().enumerate();
    let mut running = JoinSet::new();

    loop {
        while running.len() < capacity {
            let Some((index, (name, job))) = pending.next() else {
                break;
            };
            let span = info_span!("worker", id = index, source = %name);
            running.spawn(async move { (index, name, job.await) }.instrument(span));
        }

        let Some(joined) = running.join_next().await else {
            break;
        };
        match joined {
            Ok((index, name, Ok(value))) => results[index] = Some((name, value)),
            Ok((index, name, Err(e))) => {
                error!(worker = index, source = %name, error = %e, "Worker failed, aborting job");
                running.abort_all();
                return Err(e);
            },
            Err(e) => {
                error!(error = %e, "Worker panicked, aborting job");
                running.abort_all();
                return Err(BulkError::Worker(e.to_string()));
            },
        }
    }

    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pool_caps_workers_and_keeps_order() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs = (0..10u64)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                let job = async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 - i)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i * 2)
                };
                (format!("job-{i}"), job)
            })
            .collect();

        let results = run_pool(jobs, 3).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
        let values: Vec<u64> = results.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(results[4].0, "job-4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_aborts_siblings_on_error() {
        let finished = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<(String, std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send>>)> = vec![
            ("bad".to_string(), Box::pin(async { Err(BulkError::Connection("refused".into())) })),
            ("slow".to_string(), {
                let finished = finished.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        ];

        let err = run_pool(jobs, 2).await.unwrap_err();
        assert!(matches!(err, BulkError::Connection(_)));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pool_maps_panic_to_worker_error() {
        let jobs = vec![("boom".to_string(), async {
            if true {
                panic!("worker blew up");
            }
            Ok(())
        })];
        let err = run_pool::<(), _>(jobs, 1).await.unwrap_err();
        assert!(matches!(err, BulkError::Worker(_)));
    }

    #[test]
    fn test_summary_flags_ceiling_codes() {
        let summary = JobSummary {
            results: vec![("a.csv".into(), 10), ("b.csv".into(), -2)],
            ..JobSummary::default()
        };
        assert!(!summary.is_success());
        assert_eq!(summary.failed_sources(), vec!["b.csv"]);
    }
}
