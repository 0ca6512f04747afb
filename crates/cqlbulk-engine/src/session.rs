//! Session abstraction
//!
//! The engine never speaks the wire protocol itself. A driver adapter
//! implements [`CqlSession`]; the engine prepares statements, binds values
//! and consumes the futures and row streams the adapter hands back.

use crate::retry::RetryPolicy;
use crate::types::{CqlType, CqlValue, UserType};
use async_trait::async_trait;
use cqlbulk_common::{BulkError, Result};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Request consistency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    #[default]
    LocalOne,
}

impl FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let level = match s.to_ascii_uppercase().as_str() {
            "ANY" => Consistency::Any,
            "ONE" => Consistency::One,
            "TWO" => Consistency::Two,
            "THREE" => Consistency::Three,
            "QUORUM" => Consistency::Quorum,
            "ALL" => Consistency::All,
            "LOCAL_QUORUM" => Consistency::LocalQuorum,
            "EACH_QUORUM" => Consistency::EachQuorum,
            "SERIAL" => Consistency::Serial,
            "LOCAL_SERIAL" => Consistency::LocalSerial,
            "LOCAL_ONE" => Consistency::LocalOne,
            other => return Err(format!("unknown consistency level '{other}'")),
        };
        Ok(level)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
            Consistency::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

/// Why one request failed
///
/// Per-record: counted against the insert-error ceiling, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("write timeout at {consistency} ({received}/{required} replicas acknowledged)")]
    WriteTimeout { consistency: Consistency, required: u32, received: u32 },

    #[error("read timeout at {consistency} ({received}/{required} replicas responded, data {})",
        data_state(.data_retrieved))]
    ReadTimeout { consistency: Consistency, required: u32, received: u32, data_retrieved: bool },

    #[error("unavailable at {consistency} ({alive}/{required} replicas alive)")]
    Unavailable { consistency: Consistency, required: u32, alive: u32 },

    #[error("no response within {0} ms")]
    ClientTimeout(u64),

    #[error("request rejected: {0}")]
    Server(String),
}

fn data_state(retrieved: &bool) -> &'static str {
    if *retrieved {
        "retrieved"
    } else {
        "missing"
    }
}

/// A statement prepared once per job and shared by all workers
#[derive(Clone)]
pub struct PreparedStatement {
    pub query: String,
    pub consistency: Consistency,
    /// Consulted by the session when a request fails
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl PreparedStatement {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), consistency: Consistency::default(), retry_policy: None }
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("query", &self.query)
            .field("consistency", &self.consistency)
            .field("retry_policy", &self.retry_policy.is_some())
            .finish()
    }
}

/// One bind-marker value
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Value(CqlValue),
    Null,
    /// Leaves the column untouched
    Unset,
}

impl BoundValue {
    pub fn from_option(value: Option<CqlValue>, nulls_unset: bool) -> Self {
        match value {
            Some(v) => BoundValue::Value(v),
            None if nulls_unset => BoundValue::Unset,
            None => BoundValue::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub prepared: Arc<PreparedStatement>,
    pub values: Vec<BoundValue>,
}

/// What a session executes
#[derive(Debug, Clone)]
pub enum Statement {
    Bound(BoundStatement),
    /// Unlogged batch
    Batch(Vec<BoundStatement>),
    /// Ad hoc query with no bind markers
    Simple { query: String, consistency: Consistency },
}

impl Statement {
    /// Rows written by this statement
    pub fn row_count(&self) -> usize {
        match self {
            Statement::Batch(statements) => statements.len(),
            _ => 1,
        }
    }

    pub fn consistency(&self) -> Consistency {
        match self {
            Statement::Bound(b) => b.prepared.consistency,
            Statement::Batch(statements) => statements
                .first()
                .map(|b| b.prepared.consistency)
                .unwrap_or_default(),
            Statement::Simple { consistency, .. } => *consistency,
        }
    }

    pub fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
        match self {
            Statement::Bound(b) => b.prepared.retry_policy.clone(),
            Statement::Batch(statements) => {
                statements.first().and_then(|b| b.prepared.retry_policy.clone())
            },
            Statement::Simple { .. } => None,
        }
    }
}

/// A result row, positionally aligned with the selected columns
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Option<CqlValue>>,
}

impl Row {
    pub fn new(values: Vec<Option<CqlValue>>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    /// Type as the cluster reports it, e.g. `frozen<list<int>>`
    pub type_name: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into() }
    }
}

/// What the engine needs to know about a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub keyspace: String,
    pub name: String,
    /// All columns in the table's natural order
    pub columns: Vec<ColumnMetadata>,
    /// Partition key column names, in component order
    pub partition_key: Vec<String>,
    /// User-defined types of the keyspace
    pub user_types: Vec<UserTypeMetadata>,
}

/// A user-defined type as the cluster reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTypeMetadata {
    pub name: String,
    pub fields: Vec<ColumnMetadata>,
}

impl UserTypeMetadata {
    pub fn new(name: impl Into<String>, fields: Vec<ColumnMetadata>) -> Self {
        Self { name: name.into(), fields }
    }
}

/// Nesting limit for user types; a cycle in metadata stops here
const MAX_TYPE_DEPTH: usize = 16;

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Parses `type_name`, resolving user-defined types of this keyspace.
    ///
    /// # Errors
    ///
    /// `SchemaType` for an unknown type name.
    pub fn resolve_type(&self, type_name: &str) -> Result<CqlType> {
        self.resolve_nested(type_name, 0)
    }

    fn resolve_nested(&self, type_name: &str, depth: usize) -> Result<CqlType> {
        CqlType::parse_with(type_name, &|name| self.user_type(name, depth))
    }

    fn user_type(&self, name: &str, depth: usize) -> Result<Option<UserType>> {
        let Some(udt) = self.user_types.iter().find(|u| u.name.eq_ignore_ascii_case(name)) else {
            return Ok(None);
        };
        if depth >= MAX_TYPE_DEPTH {
            return Err(BulkError::SchemaType(format!("{name} (nested too deeply)")));
        }
        let mut fields = Vec::with_capacity(udt.fields.len());
        for field in &udt.fields {
            fields.push((field.name.clone(), self.resolve_nested(&field.type_name, depth + 1)?));
        }
        Ok(Some(UserType { name: udt.name.clone(), fields }))
    }
}

/// Completion handle for an asynchronous write
pub type ExecuteFuture = BoxFuture<'static, std::result::Result<(), RequestError>>;

/// Rows of a read, streamed page by page
pub type RowStream = BoxStream<'static, std::result::Result<Row, RequestError>>;

/// Connection to the cluster, shared by every worker
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Metadata for `keyspace.table`, or `None` when it does not exist.
    async fn table_metadata(&self, keyspace: &str, table: &str) -> Result<Option<TableMetadata>>;

    async fn prepare(&self, query: &str) -> Result<PreparedStatement>;

    /// Starts a write without waiting for it
    fn execute_async(&self, statement: Statement) -> ExecuteFuture;

    /// Runs a read and streams its rows
    async fn execute(&self, statement: Statement) -> std::result::Result<RowStream, RequestError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_round_trip() {
        for level in [Consistency::One, Consistency::LocalQuorum, Consistency::EachQuorum] {
            assert_eq!(level.to_string().parse::<Consistency>().unwrap(), level);
        }
        assert_eq!("local_one".parse::<Consistency>().unwrap(), Consistency::LocalOne);
        assert!("SOME".parse::<Consistency>().is_err());
    }

    #[test]
    fn test_bound_value_from_option() {
        assert_eq!(BoundValue::from_option(None, false), BoundValue::Null);
        assert_eq!(BoundValue::from_option(None, true), BoundValue::Unset);
        assert_eq!(
            BoundValue::from_option(Some(CqlValue::Int(1)), true),
            BoundValue::Value(CqlValue::Int(1))
        );
    }

    #[test]
    fn test_batch_statement_counts_rows() {
        let prepared = Arc::new(PreparedStatement::new("INSERT").with_consistency(Consistency::Quorum));
        let bound = BoundStatement { prepared, values: vec![] };
        let batch = Statement::Batch(vec![bound.clone(), bound]);
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.consistency(), Consistency::Quorum);
        assert!(batch.retry_policy().is_none());
    }

    #[test]
    fn test_request_error_messages() {
        let err = RequestError::ReadTimeout {
            consistency: Consistency::Quorum,
            required: 2,
            received: 2,
            data_retrieved: false,
        };
        assert_eq!(err.to_string(), "read timeout at QUORUM (2/2 replicas responded, data missing)");
    }
    fn metadata(user_types: Vec<UserTypeMetadata>) -> TableMetadata {
        TableMetadata {
            keyspace: "ks".to_string(),
            name: "t".to_string(),
            columns: vec![ColumnMetadata::new("id", "int")],
            partition_key: vec!["id".to_string()],
            user_types,
        }
    }

    #[test]
    fn test_resolve_nested_user_types() {
        let table = metadata(vec![
            UserTypeMetadata::new(
                "person",
                vec![ColumnMetadata::new("name", "text"), ColumnMetadata::new("home", "frozen<address>")],
            ),
            UserTypeMetadata::new("address", vec![ColumnMetadata::new("zip", "int")]),
        ]);

        let CqlType::Udt(person) = table.resolve_type("frozen<person>").unwrap() else {
            panic!("not a user type")
        };
        assert_eq!(person.fields[0], ("name".to_string(), CqlType::Text));
        let CqlType::Udt(address) = &person.fields[1].1 else { panic!("not a user type") };
        assert_eq!(address.fields, vec![("zip".to_string(), CqlType::Int)]);

        assert!(matches!(table.resolve_type("frozen<phone>"), Err(BulkError::SchemaType(_))));
    }

    #[test]
    fn test_cyclic_user_types_are_rejected() {
        let table = metadata(vec![UserTypeMetadata::new("node", vec![ColumnMetadata::new("next", "frozen<node>")])]);
        assert!(matches!(table.resolve_type("node"), Err(BulkError::SchemaType(_))));
    }
}
