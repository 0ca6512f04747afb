//! Unload worker
//!
//! Streams the rows of one token range and writes each as a record line.

use crate::config::{OutputFormat, UnloadConfig};
use crate::partitioner::{split, TokenRange};
use crate::record::RecordParser;
use crate::schema::BoundTable;
use crate::session::{CqlSession, Statement};
use cqlbulk_common::{BulkError, Result};
use futures::TryStreamExt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Everything an unload worker needs; cheap to clone across workers
#[derive(Clone)]
pub struct UnloadTask {
    session: Arc<dyn CqlSession>,
    table: BoundTable,
    formatter: RecordParser,
    config: Arc<UnloadConfig>,
}

impl UnloadTask {
    /// # Arguments
    ///
    /// * `session` - Session the range queries run on
    /// * `table` - Bound table; must carry its partition key
    /// * `config` - Validated before use
    pub fn new(session: Arc<dyn CqlSession>, table: BoundTable, config: UnloadConfig) -> Result<Self> {
        config.validate()?;
        if table.partition_key.is_empty() {
            return Err(BulkError::Schema(format!(
                "{}.{} has no partition key to split on",
                table.keyspace, table.table
            )));
        }
        let formatter = RecordParser::new(Arc::clone(&table.columns), &config.parser);
        Ok(Self { session, table, formatter, config: Arc::new(config) })
    }

    pub fn config(&self) -> &UnloadConfig {
        &self.config
    }

    /// The job's token bounds split into one range per worker
    pub fn ranges(&self) -> Result<Vec<TokenRange>> {
        let (begin, end) = self.config.token_bounds()?;
        Ok(split(&begin, &end, self.config.num_workers))
    }

    /// Writes every row of `range` to `writer`
    ///
    /// # Returns
    ///
    /// Rows written. A failed read or a value that cannot be formatted
    /// aborts the range.
    #[tracing::instrument(skip(self, writer), fields(range = %range))]
    pub async fn process_range<W>(&self, range: &TokenRange, mut writer: W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let query = self.table.generate_range_select(range, self.config.where_clause.as_deref())?;
        debug!(query = %query, "Querying range");

        let mut rows = self
            .session
            .execute(Statement::Simple { query, consistency: self.config.consistency })
            .await
            .map_err(|e| BulkError::Connection(format!("range {range}: {e}")))?;

        let mut written = 0u64;
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| BulkError::Connection(format!("range {range}: {e}")))?
        {
            let line = match self.config.format {
                OutputFormat::Delimited => self.formatter.format_row(&row),
                OutputFormat::Json => self.formatter.format_json(&row),
            }
            .map_err(|e| BulkError::Worker(format!("range {range}: row {}: {e}", written + 1)))?;

            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            written += 1;
        }
        writer.flush().await?;

        info!(rows = written, "Range unloaded");
        Ok(written)
    }
}
