//! cqlbulk Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error taxonomy and logging setup for the cqlbulk workspace.
//!
//! - **Error Handling**: [`BulkError`], the fatal, job-aborting error type
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//!
//! # Example
//!
//! ```no_run
//! use cqlbulk_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     info!("loader started");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{BulkError, Result};
