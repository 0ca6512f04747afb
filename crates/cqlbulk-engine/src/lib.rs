//! cqlbulk Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Bulk transfer between delimited/JSON text and a CQL table.
//!
//! - **Parsing**: [`parser::FieldParser`] per column, [`record::RecordParser`] per record
//! - **Schema**: [`schema::SchemaBinder`] resolves columns and generates statements
//! - **Dispatch**: [`dispatch::RequestDispatcher`] bounds requests in flight and
//!   enforces the failure ceiling; [`rate_limiter`] throttles submission
//! - **Jobs**: [`load::LoadTask`], [`unload::UnloadTask`] and the
//!   [`orchestrator`] worker pool
//!
//! The engine talks to the cluster only through [`session::CqlSession`].

pub mod config;
pub mod dispatch;
pub mod load;
pub mod orchestrator;
pub mod parser;
pub mod partitioner;
pub mod rate_limiter;
pub mod record;
pub mod retry;
pub mod schema;
pub mod session;
pub mod sink;
pub mod types;
pub mod unload;

pub use config::{LoadConfig, ParserOptions, UnloadConfig};
pub use load::{LoadOutcome, LoadTask};
pub use orchestrator::{run_load, run_unload, JobSummary, LoadSource};
pub use partitioner::{split, TokenRange, TokenSpace};
pub use schema::{BoundTable, SchemaBinder, TableRef};
pub use session::CqlSession;
pub use unload::UnloadTask;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
