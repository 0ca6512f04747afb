//! Shared helpers for engine integration tests
//!
//! [`MemorySession`] is an in-process [`CqlSession`]: writes land in a
//! vector, reads come from rows seeded with a token, and failures are
//! injected by the first bound value.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use cqlbulk_common::Result;
use cqlbulk_engine::retry::execute_with_policy;
use cqlbulk_engine::session::{
    BoundValue, ColumnMetadata, Consistency, ExecuteFuture, PreparedStatement, RequestError, Row,
    RowStream, Statement, TableMetadata,
};
use cqlbulk_engine::types::CqlValue;
use cqlbulk_engine::CqlSession;
use futures::StreamExt;
use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct State {
    written: Mutex<Vec<Vec<BoundValue>>>,
    prepared: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    requests: AtomicU64,
    attempts: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// In-memory session for one table
pub struct MemorySession {
    metadata: TableMetadata,
    rows: Vec<(i64, Row)>,
    failing: HashSet<i32>,
    latency: Duration,
    read_error_after: Option<usize>,
    state: Arc<State>,
}

impl MemorySession {
    pub fn new(metadata: TableMetadata) -> Self {
        Self {
            metadata,
            rows: Vec::new(),
            failing: HashSet::new(),
            latency: Duration::ZERO,
            read_error_after: None,
            state: Arc::new(State::default()),
        }
    }

    /// Rows readable by range queries, each with its partition token
    pub fn with_rows(mut self, rows: Vec<(i64, Row)>) -> Self {
        self.rows = rows;
        self
    }

    /// Writes whose first value is `Int(id)` for one of `ids` time out
    pub fn failing(mut self, ids: impl IntoIterator<Item = i32>) -> Self {
        self.failing = ids.into_iter().collect();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Row streams fail after yielding `rows` rows
    pub fn with_read_error_after(mut self, rows: usize) -> Self {
        self.read_error_after = Some(rows);
        self
    }

    pub fn written(&self) -> Vec<Vec<BoundValue>> {
        self.state.written.lock().unwrap().clone()
    }

    pub fn written_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .written()
            .iter()
            .filter_map(|values| match values.first() {
                Some(BoundValue::Value(CqlValue::Int(id))) => Some(*id),
                _ => None,
            })
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn prepared(&self) -> Vec<String> {
        self.state.prepared.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.queries.lock().unwrap().clone()
    }

    /// Statements received by `execute_async`
    pub fn requests(&self) -> u64 {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Attempts including retries
    pub fn attempts(&self) -> u64 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    fn failure_for(&self, statement: &Statement) -> Option<RequestError> {
        let bound = match statement {
            Statement::Bound(b) => vec![b],
            Statement::Batch(statements) => statements.iter().collect(),
            Statement::Simple { .. } => Vec::new(),
        };
        let fails = bound.iter().any(|b| match b.values.first() {
            Some(BoundValue::Value(CqlValue::Int(id))) => self.failing.contains(id),
            _ => false,
        });
        fails.then(|| RequestError::WriteTimeout {
            consistency: statement.consistency(),
            required: 1,
            received: 0,
        })
    }
}

#[async_trait]
impl CqlSession for MemorySession {
    async fn table_metadata(&self, keyspace: &str, table: &str) -> Result<Option<TableMetadata>> {
        Ok((self.metadata.keyspace == keyspace && self.metadata.name == table).then(|| self.metadata.clone()))
    }

    async fn prepare(&self, query: &str) -> Result<PreparedStatement> {
        self.state.prepared.lock().unwrap().push(query.to_string());
        Ok(PreparedStatement::new(query))
    }

    fn execute_async(&self, statement: Statement) -> ExecuteFuture {
        let state = Arc::clone(&self.state);
        let failure = self.failure_for(&statement);
        let latency = self.latency;
        state.requests.fetch_add(1, Ordering::SeqCst);

        Box::pin(async move {
            let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let policy = statement.retry_policy();
            let result = execute_with_policy(policy.as_deref(), statement.consistency(), |_, _| {
                state.attempts.fetch_add(1, Ordering::SeqCst);
                let failure = failure.clone();
                async move { failure.map_or(Ok(()), Err) }
            })
            .await;

            if result.is_ok() {
                let mut written = state.written.lock().unwrap();
                match statement {
                    Statement::Bound(b) => written.push(b.values),
                    Statement::Batch(statements) => written.extend(statements.into_iter().map(|b| b.values)),
                    Statement::Simple { .. } => {},
                }
            }
            state.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    async fn execute(&self, statement: Statement) -> std::result::Result<RowStream, RequestError> {
        let Statement::Simple { query, .. } = statement else {
            return Err(RequestError::Server("reads take simple statements".into()));
        };
        self.state.queries.lock().unwrap().push(query.clone());

        let pattern = Regex::new(r"Token\([^)]*\) > (-?\d+) AND Token\([^)]*\) <= (-?\d+)").unwrap();
        let captures = pattern
            .captures(&query)
            .ok_or_else(|| RequestError::Server(format!("no token restriction in '{query}'")))?;
        let begin: i128 = captures[1].parse().unwrap();
        let end: i128 = captures[2].parse().unwrap();

        let mut results: Vec<std::result::Result<Row, RequestError>> = self
            .rows
            .iter()
            .filter(|(token, _)| i128::from(*token) > begin && i128::from(*token) <= end)
            .map(|(_, row)| Ok(row.clone()))
            .collect();
        if let Some(after) = self.read_error_after {
            results.truncate(after);
            results.push(Err(RequestError::ReadTimeout {
                consistency: Consistency::LocalOne,
                required: 1,
                received: 0,
                data_retrieved: false,
            }));
        }
        Ok(futures::stream::iter(results).boxed())
    }
}

/// `ks.t (id int, name text, tags set<text>)` partitioned by `id`
pub fn people_table() -> TableMetadata {
    TableMetadata {
        keyspace: "ks".into(),
        name: "t".into(),
        columns: vec![
            ColumnMetadata::new("id", "int"),
            ColumnMetadata::new("name", "text"),
            ColumnMetadata::new("tags", "set<text>"),
        ],
        partition_key: vec!["id".into()],
        user_types: Vec::new(),
    }
}

pub fn text(s: &str) -> CqlValue {
    CqlValue::Text(s.to_string())
}

pub fn person(id: i32, name: Option<&str>, tags: &[&str]) -> Row {
    Row::new(vec![
        Some(CqlValue::Int(id)),
        name.map(text),
        Some(CqlValue::Set(tags.iter().map(|t| text(t)).collect())),
    ])
}

/// Clonable in-memory writer for sinks
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl std::io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
