//! Load worker
//!
//! [`LoadTask::process_file`] drives one source through parsing, throttling
//! and dispatch. Parsing and submission are sequential; requests complete on
//! their own tasks. A source stops at the first ceiling it hits and reports
//! which one through [`LoadOutcome`].

use crate::config::{InputFormat, LoadConfig};
use crate::dispatch::{CounterSnapshot, JobCounters, RequestDispatcher};
use crate::rate_limiter::{build_throttle, LatencyTracker, Throttle};
use crate::parser::ParseError;
use crate::record::{RecordError, RecordParser};
use crate::retry::LoaderRetryPolicy;
use crate::schema::fuzzy::HeaderMatcher;
use crate::schema::BoundTable;
use crate::session::{BoundStatement, BoundValue, CqlSession, PreparedStatement, Statement};
use crate::sink::LoadSinks;
use crate::types::Record;
use cqlbulk_common::{BulkError, Result};
use serde_json::Value;
use std::string::FromUtf8Error;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// How a source ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Completed(CounterSnapshot),
    /// More records failed to parse than `max_parse_errors`
    ParseCeilingExceeded(CounterSnapshot),
    /// `max_insert_errors` requests failed
    InsertCeilingExceeded(CounterSnapshot),
}

impl LoadOutcome {
    /// Rows written, or `-1` (parse ceiling) / `-2` (insert ceiling)
    pub fn code(&self) -> i64 {
        match self {
            LoadOutcome::Completed(c) => i64::try_from(c.succeeded).unwrap_or(i64::MAX),
            LoadOutcome::ParseCeilingExceeded(_) => -1,
            LoadOutcome::InsertCeilingExceeded(_) => -2,
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        match self {
            LoadOutcome::Completed(c)
            | LoadOutcome::ParseCeilingExceeded(c)
            | LoadOutcome::InsertCeilingExceeded(c) => *c,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LoadOutcome::Completed(_))
    }
}

/// Everything a load worker needs; cheap to clone across workers
#[derive(Clone)]
pub struct LoadTask {
    session: Arc<dyn CqlSession>,
    table: BoundTable,
    parser: RecordParser,
    insert: Arc<PreparedStatement>,
    config: Arc<LoadConfig>,
    throttle: Option<Arc<dyn Throttle>>,
    latency: Option<Arc<LatencyTracker>>,
}

impl LoadTask {
    /// Prepares the INSERT for `table` once for the whole job
    ///
    /// The prepared statement carries the configured consistency and a
    /// [`LoaderRetryPolicy`] with `max_retries`. The throttle comes from
    /// `config.rate` unless replaced with [`LoadTask::with_throttle`].
    pub async fn prepare(session: Arc<dyn CqlSession>, table: BoundTable, config: LoadConfig) -> Result<Self> {
        config.validate()?;
        config.parser.validate_skip_columns(table.columns.len())?;
        let insert = prepare_insert(session.as_ref(), &table, &config).await?;

        let parser = RecordParser::new(Arc::clone(&table.columns), &config.parser);
        let (throttle, latency) = build_throttle(&config.rate, config.progress_every)?;
        Ok(Self {
            session,
            table,
            parser,
            insert: Arc::new(insert),
            config: Arc::new(config),
            throttle,
            latency,
        })
    }

    /// The same job bound to `columns`, in that order, with its own insert
    async fn rebind(&self, columns: &[String]) -> Result<Self> {
        let table = self.table.select(columns)?;
        self.config.parser.validate_skip_columns(table.columns.len())?;
        let insert = prepare_insert(self.session.as_ref(), &table, &self.config).await?;
        Ok(Self {
            parser: RecordParser::new(Arc::clone(&table.columns), &self.config.parser),
            table,
            insert: Arc::new(insert),
            ..self.clone()
        })
    }

    /// Throttle shared by every worker of the job
    pub fn with_throttle(mut self, throttle: Option<Arc<dyn Throttle>>) -> Self {
        self.throttle = throttle;
        self
    }

    /// Receives the latency of every request
    pub fn with_latency_tracker(mut self, tracker: Option<Arc<LatencyTracker>>) -> Self {
        self.latency = tracker;
        self
    }

    pub fn table(&self) -> &BoundTable {
        &self.table
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Loads one source
    ///
    /// # Arguments
    ///
    /// * `source` - Name used in logs and sink messages
    /// * `reader` - The source text
    /// * `sinks` - Bad-parse, bad-insert and log channels for this source
    ///
    /// # Returns
    ///
    /// The outcome with this source's counters. Lines that are not valid
    /// UTF-8 and unreadable JSON array text are rejected records. I/O
    /// failures and an unmatched header are fatal errors; records read before
    /// the failure are still written and the sinks closed before it is
    /// returned.
    #[tracing::instrument(skip(self, reader, sinks), fields(table = %self.table.table))]
    pub async fn process_file<R>(&self, source: &str, mut reader: R, sinks: LoadSinks) -> Result<LoadOutcome>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        info!(source = %source, "Processing");
        let started = Instant::now();

        let rebound = match self.config.header_match_threshold {
            Some(threshold) => match self.bind_header(source, &mut reader, threshold).await {
                Ok(rebound) => rebound,
                Err(e) => {
                    close_after_error(source, &sinks);
                    return Err(e);
                },
            },
            None => None,
        };
        let header_lines = u64::from(rebound.is_some());
        let task = rebound.as_ref().unwrap_or(self);

        let dispatcher = RequestDispatcher::new(
            source,
            self.config.per_worker_in_flight(),
            self.config.max_insert_errors,
            self.config.query_timeout(),
        )
        .with_bad_sink(sinks.bad_insert.clone())
        .with_log_sink(sinks.log.clone())
        .with_latency_tracker(self.latency.clone())
        .with_progress(self.config.progress_every);

        let mut run = SourceRun {
            task,
            source,
            sinks: &sinks,
            counters: dispatcher.counters(),
            dispatcher,
            batch: Vec::with_capacity(self.config.batch_size),
            lines: header_lines,
            header_lines,
            to_skip: self.config.skip_rows,
        };

        let read = match self.config.format {
            InputFormat::Delimited | InputFormat::JsonLines => run.read_lines(reader).await,
            InputFormat::JsonArray => run.read_array(reader).await,
        };
        let outcome = match read {
            Ok(Some(outcome)) => outcome,
            Ok(None) => run.finish(started).await,
            Err(e) => {
                error!(source = %source, error = %e, "Reading source failed");
                if run.flush().await.is_none() {
                    run.dispatcher.drain().await;
                }
                close_after_error(source, &sinks);
                return Err(e);
            },
        };
        sinks.close()?;
        Ok(outcome)
    }

    /// Reads the header line and binds the columns it names
    ///
    /// `None` for an empty source. Header fields are matched against the
    /// bound columns.
    async fn bind_header<R>(&self, source: &str, reader: &mut R, threshold: f64) -> Result<Option<Self>>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        let header = match read_line(reader, &mut buf).await? {
            None => return Ok(None),
            Some(Ok(header)) => header,
            Some(Err(e)) => {
                return Err(BulkError::Schema(format!("header of {source}: {}", e.utf8_error())));
            },
        };
        let fields = self
            .parser
            .header_fields(&header)
            .map_err(|e| BulkError::Schema(format!("header of {source}: {e}")))?;
        let names: Vec<String> = self.table.columns.iter().map(|c| c.name.clone()).collect();
        let order = HeaderMatcher::new(threshold).match_header(&fields, &names)?;
        info!(source = %source, columns = ?order, "Column order inferred from header");
        self.rebind(&order).await.map(Some)
    }
}

async fn prepare_insert(session: &dyn CqlSession, table: &BoundTable, config: &LoadConfig) -> Result<PreparedStatement> {
    let query = table.generate_insert(config.ttl);
    let insert = session
        .prepare(&query)
        .await?
        .with_consistency(config.consistency)
        .with_retry_policy(Arc::new(LoaderRetryPolicy::new(config.max_retries)));
    info!(query = %query, consistency = %config.consistency, "Prepared insert");
    Ok(insert)
}

fn close_after_error(source: &str, sinks: &LoadSinks) {
    if let Err(e) = sinks.close() {
        error!(source = %source, error = %e, "Failed to close sinks");
    }
}

/// Reads one line without its `\n` or `\r\n` terminator
///
/// `None` at end of input; the inner error keeps the bytes of a line that
/// is not valid UTF-8.
async fn read_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<std::result::Result<String, FromUtf8Error>>>
where
    R: AsyncBufRead + Unpin + Send,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8(std::mem::take(buf))))
}

/// Walks the elements of a JSON array one value at a time
///
/// A syntax error ends the walk with the unread text, so the elements before
/// it are kept.
struct ArrayElements<'a> {
    input: &'a [u8],
    pos: usize,
    started: bool,
    done: bool,
}

/// A syntax error and the text from the failing element on
struct Unreadable {
    reason: String,
    rest: String,
}

impl<'a> ArrayElements<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0, started: false, done: false }
    }

    fn skip_whitespace(&mut self) {
        while self.input.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn fail(&mut self, reason: impl Into<String>) -> std::result::Result<Value, Unreadable> {
        self.done = true;
        let rest = String::from_utf8_lossy(&self.input[self.pos..]).trim().to_string();
        Err(Unreadable { reason: reason.into(), rest })
    }

    /// Consumes `]`; anything but whitespace after it is an error.
    fn close(&mut self) -> Option<std::result::Result<Value, Unreadable>> {
        self.pos += 1;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Some(self.fail("unexpected text after the closing ']'"));
        }
        self.done = true;
        None
    }
}

impl Iterator for ArrayElements<'_> {
    type Item = std::result::Result<Value, Unreadable>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.skip_whitespace();
        if !self.started {
            self.started = true;
            if self.input.get(self.pos) != Some(&b'[') {
                return Some(self.fail("expected '['"));
            }
            self.pos += 1;
            self.skip_whitespace();
            if self.input.get(self.pos) == Some(&b']') {
                return self.close();
            }
        } else {
            match self.input.get(self.pos) {
                Some(b',') => self.pos += 1,
                Some(b']') => return self.close(),
                _ => return Some(self.fail("expected ',' or ']'")),
            }
        }

        let mut values = serde_json::Deserializer::from_slice(&self.input[self.pos..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => {
                self.pos += values.byte_offset();
                Some(Ok(value))
            },
            Some(Err(e)) => Some(self.fail(e.to_string())),
            None => Some(self.fail("unterminated array")),
        }
    }
}

/// State of one `process_file` call
struct SourceRun<'a> {
    task: &'a LoadTask,
    source: &'a str,
    sinks: &'a LoadSinks,
    dispatcher: RequestDispatcher,
    counters: Arc<JobCounters>,
    batch: Vec<(Record, String)>,
    /// Lines read so far, header, skipped and blank ones included
    lines: u64,
    header_lines: u64,
    to_skip: u64,
}

enum Admit {
    Take,
    Skip,
    Stop,
}

impl SourceRun<'_> {
    fn admit(&mut self, text: &str) -> Admit {
        self.lines += 1;
        if self.to_skip > 0 {
            self.to_skip -= 1;
            return Admit::Skip;
        }
        if let Some(max) = self.task.config.max_rows {
            if self.lines - self.header_lines - self.task.config.skip_rows > max {
                return Admit::Stop;
            }
        }
        if text.trim().is_empty() {
            return Admit::Skip;
        }
        Admit::Take
    }

    async fn read_lines<R>(&mut self, mut reader: R) -> Result<Option<LoadOutcome>>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let json = self.task.config.format == InputFormat::JsonLines;
        let mut buf = Vec::new();
        while let Some(line) = read_line(&mut reader, &mut buf).await? {
            let (text, decoded) = match line {
                Ok(text) => (text, None),
                Err(e) => (
                    String::from_utf8_lossy(e.as_bytes()).into_owned(),
                    Some(ParseError::Encoding(e.utf8_error().to_string())),
                ),
            };
            match self.admit(&text) {
                Admit::Take => {},
                Admit::Skip => continue,
                Admit::Stop => break,
            }
            let parsed = match decoded {
                Some(source) => Err(RecordError::new(self.lines, None, source)),
                None if json => self.task.parser.parse_json(&text, self.lines).map(Some),
                None => self.task.parser.parse_line(&text, self.lines),
            };
            if let Some(outcome) = self.handle(parsed, text).await {
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    async fn read_array<R>(&mut self, mut reader: R) -> Result<Option<LoadOutcome>>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await?;

        for element in ArrayElements::new(&content) {
            let value = match element {
                Ok(value) => value,
                Err(unreadable) => {
                    self.lines += 1;
                    let err = RecordError::new(self.lines, None, ParseError::Json(unreadable.reason));
                    return Ok(self.reject(err, &unreadable.rest).await);
                },
            };
            let text = value.to_string();
            match self.admit(&text) {
                Admit::Take => {},
                Admit::Skip => continue,
                Admit::Stop => break,
            }
            let parsed = self.task.parser.parse_json_value(&value, self.lines).map(Some);
            if let Some(outcome) = self.handle(parsed, text).await {
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    /// Queues a parsed record or accounts for a rejected one.
    async fn handle(&mut self, parsed: std::result::Result<Option<Record>, RecordError>, text: String) -> Option<LoadOutcome> {
        match parsed {
            Ok(None) => None,
            Ok(Some(record)) => {
                self.batch.push((record, text));
                if self.batch.len() >= self.task.config.batch_size {
                    return self.flush().await;
                }
                None
            },
            Err(err) => self.reject(err, &text).await,
        }
    }

    async fn reject(&mut self, err: RecordError, text: &str) -> Option<LoadOutcome> {
        let errors = self.counters.add_parse_error();
        warn!(source = %self.source, line = err.line, error = %err, record = %text, "Failed to parse record");
        self.sinks.log_line(&format!(
            "Error parsing line {} in {}: {}: {}",
            err.line, self.source, err, text
        ));

        if errors > self.task.config.max_parse_errors {
            let tolerated = self.task.config.max_parse_errors;
            error!(source = %self.source, errors = tolerated, "Maximum number of parse errors exceeded");
            self.sinks.log_line(&format!(
                "Maximum number of parse errors exceeded ({}) for {}",
                tolerated, self.source
            ));
            self.dispatcher.drain().await;
            return Some(LoadOutcome::ParseCeilingExceeded(self.counters.snapshot()));
        }

        if let Some(bad) = &self.sinks.bad_parse {
            if let Err(e) = bad.write_record(text) {
                error!(source = %self.source, error = %e, "Failed to write bad-parse sink");
            }
        }
        None
    }

    /// Sends the pending batch; `Some` when the insert ceiling stops the source.
    async fn flush(&mut self) -> Option<LoadOutcome> {
        if self.batch.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.batch);
        let rows = pending.len();
        let nulls_unset = self.task.config.nulls_unset;

        let mut statements = Vec::with_capacity(rows);
        let mut texts = Vec::with_capacity(rows);
        for (record, text) in pending {
            statements.push(BoundStatement {
                prepared: Arc::clone(&self.task.insert),
                values: record.into_iter().map(|v| BoundValue::from_option(v, nulls_unset)).collect(),
            });
            texts.push(text);
        }
        let statement = match statements.len() {
            1 => match statements.pop() {
                Some(single) => Statement::Bound(single),
                None => return None,
            },
            _ => Statement::Batch(statements),
        };

        if let Some(throttle) = &self.task.throttle {
            throttle.acquire(u32::try_from(rows).unwrap_or(u32::MAX)).await;
        }
        let session = &self.task.session;
        if self.dispatcher.submit(|| session.execute_async(statement), texts).await {
            None
        } else {
            self.dispatcher.drain().await;
            Some(LoadOutcome::InsertCeilingExceeded(self.counters.snapshot()))
        }
    }

    async fn finish(&mut self, started: Instant) -> LoadOutcome {
        if let Some(outcome) = self.flush().await {
            return outcome;
        }
        if !self.dispatcher.drain().await {
            return LoadOutcome::InsertCeilingExceeded(self.counters.snapshot());
        }

        let counters = self.counters.snapshot();
        let elapsed = started.elapsed();
        info!(
            source = %self.source,
            lines = self.lines,
            inserted = counters.succeeded,
            parse_errors = counters.parse_errors,
            elapsed_ms = elapsed.as_millis() as u64,
            "DONE"
        );
        self.sinks.log_line(&format!(
            "*** DONE: {}  number of lines processed: {} ({} inserted)",
            self.source, self.lines, counters.succeeded
        ));
        LoadOutcome::Completed(counters)
    }
}
