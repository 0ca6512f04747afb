//! Schema binding and statement generation
//!
//! [`SchemaBinder`] resolves a table against live metadata and builds the
//! ordered [`ColumnSpec`] list every record parser of the job shares.
//! [`BoundTable`] generates the INSERT and SELECT text prepared once per job.

pub mod fuzzy;

use crate::config::ParserOptions;
use crate::partitioner::TokenRange;
use crate::record::ColumnSpec;
use crate::session::{ColumnMetadata, CqlSession, TableMetadata};
use cqlbulk_common::{BulkError, Result};
use fuzzy::HeaderMatcher;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// `keyspace.table`, identifiers already case-folded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub keyspace: String,
    pub table: String,
}

impl TableRef {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self { keyspace: keyspace.into(), table: table.into() }
    }
}

impl FromStr for TableRef {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self> {
        let pattern = Regex::new(&format!(r"^\s*({IDENT})\s*\.\s*({IDENT})\s*$"))
            .map_err(|e| BulkError::MalformedSchema(e.to_string()))?;
        let caps = pattern
            .captures(s)
            .ok_or_else(|| BulkError::MalformedSchema(format!("expected keyspace.table, got '{s}'")))?;
        Ok(TableRef::new(fold_identifier(&caps[1]), fold_identifier(&caps[2])))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_identifier(&self.keyspace), quote_identifier(&self.table))
    }
}

/// Bare or double-quoted CQL identifier
const IDENT: &str = r#""(?:[^"]|"")+"|[A-Za-z_][A-Za-z0-9_]*"#;

/// Lower-cases bare identifiers; strips quotes from quoted ones, keeping case.
fn fold_identifier(raw: &str) -> String {
    let raw = raw.trim();
    match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => raw.to_lowercase(),
    }
}

/// Quotes `name` unless it is a plain lower-case identifier.
pub fn quote_identifier(name: &str) -> String {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// A column named in a declared schema, optionally with its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredColumn {
    pub name: String,
    pub type_name: Option<String>,
}

/// `ks.table(col1, col2 type, ...)` as written by the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredSchema {
    pub table: TableRef,
    pub columns: Vec<DeclaredColumn>,
}

impl DeclaredSchema {
    /// Parses a declared schema, failing fast with `MalformedSchema`.
    ///
    /// # Example
    ///
    /// ```
    /// use cqlbulk_engine::schema::DeclaredSchema;
    ///
    /// let schema = DeclaredSchema::parse(r#"ks."Events"(id, "When" timestamp)"#).unwrap();
    /// assert_eq!(schema.table.table, "Events");
    /// assert_eq!(schema.columns[1].name, "When");
    /// assert_eq!(schema.columns[1].type_name.as_deref(), Some("timestamp"));
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = |why: &str| BulkError::MalformedSchema(format!("{why}: '{text}'"));

        let pattern = Regex::new(&format!(r"(?s)^\s*({IDENT})\s*\.\s*({IDENT})\s*\((.*)\)\s*$"))
            .map_err(|e| BulkError::MalformedSchema(e.to_string()))?;
        let column_pattern = Regex::new(&format!(r"(?s)^\s*({IDENT})(?:\s+(\S.*?))?\s*$"))
            .map_err(|e| BulkError::MalformedSchema(e.to_string()))?;

        let caps = pattern
            .captures(text)
            .ok_or_else(|| malformed("expected keyspace.table(columns)"))?;
        let table = TableRef::new(fold_identifier(&caps[1]), fold_identifier(&caps[2]));

        let mut columns = Vec::new();
        for part in split_columns(&caps[3]).ok_or_else(|| malformed("unbalanced column list"))? {
            let col = column_pattern
                .captures(part)
                .ok_or_else(|| malformed("invalid column declaration"))?;
            columns.push(DeclaredColumn {
                name: fold_identifier(&col[1]),
                type_name: col.get(2).map(|m| m.as_str().to_string()),
            });
        }
        if columns.is_empty() {
            return Err(malformed("no columns declared"));
        }
        Ok(Self { table, columns })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Splits on commas outside `<...>` and double quotes; `None` when unbalanced.
fn split_columns(list: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let (mut depth, mut quoted, mut start) = (0usize, false, 0usize);
    for (i, c) in list.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '<' if !quoted => depth += 1,
            '>' if !quoted => depth = depth.checked_sub(1)?,
            ',' if !quoted && depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            },
            _ => {},
        }
    }
    if quoted || depth != 0 {
        return None;
    }
    let last = &list[start..];
    if !(parts.is_empty() && last.trim().is_empty()) {
        parts.push(last);
    }
    Some(parts)
}

/// A table resolved for one job
#[derive(Debug, Clone)]
pub struct BoundTable {
    pub keyspace: String,
    pub table: String,
    pub columns: Arc<[ColumnSpec]>,
    /// Partition key column names in component order
    pub partition_key: Vec<String>,
}

impl BoundTable {
    /// Builds a table from a fully typed declaration, without metadata.
    pub fn from_declared(schema: &DeclaredSchema, options: &ParserOptions) -> Result<Self> {
        let mut columns = Vec::with_capacity(schema.columns.len());
        for column in &schema.columns {
            let type_name = column.type_name.as_deref().ok_or_else(|| {
                BulkError::MalformedSchema(format!("column '{}' has no type", column.name))
            })?;
            columns.push(ColumnSpec::new(&column.name, type_name.parse()?, options));
        }
        Ok(Self {
            keyspace: schema.table.keyspace.clone(),
            table: schema.table.table.clone(),
            columns: columns.into(),
            partition_key: Vec::new(),
        })
    }

    pub fn with_partition_key(mut self, partition_key: Vec<String>) -> Self {
        self.partition_key = partition_key;
        self
    }

    /// This table restricted to `names`, in that order
    pub fn select(&self, names: &[String]) -> Result<BoundTable> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let spec = self.columns.iter().find(|c| &c.name == name).ok_or_else(|| {
                BulkError::Schema(format!("column '{name}' is not bound for {}", self.qualified_name()))
            })?;
            columns.push(spec.clone());
        }
        if columns.is_empty() {
            return Err(BulkError::Schema(format!("no columns to bind in {}", self.qualified_name())));
        }
        Ok(BoundTable { columns: columns.into(), ..self.clone() })
    }

    fn qualified_name(&self) -> String {
        format!("{}.{}", quote_identifier(&self.keyspace), quote_identifier(&self.table))
    }

    fn column_list(&self) -> String {
        self.columns.iter().map(|c| quote_identifier(&c.name)).collect::<Vec<_>>().join(", ")
    }

    /// `INSERT INTO ks.table (a, b) VALUES (?, ?)`, with `USING TTL n` when set
    pub fn generate_insert(&self, ttl: Option<u32>) -> String {
        let markers = vec!["?"; self.columns.len()].join(", ");
        let mut query = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified_name(),
            self.column_list(),
            markers
        );
        if let Some(ttl) = ttl {
            query.push_str(&format!(" USING TTL {ttl}"));
        }
        query
    }

    /// `SELECT a, b FROM ks.table`
    pub fn generate_select(&self) -> String {
        format!("SELECT {} FROM {}", self.column_list(), self.qualified_name())
    }

    /// SELECT scoped to `(range.begin, range.end]`, ANDed with `extra` when given
    pub fn generate_range_select(&self, range: &TokenRange, extra: Option<&str>) -> Result<String> {
        if self.partition_key.is_empty() {
            return Err(BulkError::Schema(format!("{} has no partition key", self.qualified_name())));
        }
        let token = format!(
            "Token({})",
            self.partition_key.iter().map(|k| quote_identifier(k)).collect::<Vec<_>>().join(", ")
        );
        let mut query = format!(
            "{} WHERE {token} > {} AND {token} <= {}",
            self.generate_select(),
            range.begin,
            range.end
        );
        if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
            query.push_str(&format!(" AND {extra}"));
        }
        Ok(query)
    }
}

/// Resolves tables against session metadata
pub struct SchemaBinder {
    session: Arc<dyn CqlSession>,
    options: ParserOptions,
}

impl SchemaBinder {
    pub fn new(session: Arc<dyn CqlSession>, options: ParserOptions) -> Self {
        Self { session, options }
    }

    async fn metadata(&self, table: &TableRef) -> Result<TableMetadata> {
        self.session
            .table_metadata(&table.keyspace, &table.table)
            .await?
            .ok_or_else(|| BulkError::Schema(format!("table {table} does not exist")))
    }

    /// Binds `table`, in natural column order unless `columns` names a subset
    ///
    /// # Errors
    ///
    /// `Schema` for an unknown table, unknown or repeated column;
    /// `SchemaType` for a column type without a parser.
    pub async fn bind(&self, table: &TableRef, columns: Option<&[String]>) -> Result<BoundTable> {
        let metadata = self.metadata(table).await?;
        self.bind_metadata(&metadata, columns)
    }

    /// Binds a declared schema; declared types must agree with the table.
    pub async fn bind_declared(&self, schema: &DeclaredSchema) -> Result<BoundTable> {
        let metadata = self.metadata(&schema.table).await?;
        let bound = self.bind_metadata(&metadata, Some(&schema.column_names()))?;

        for (declared, spec) in schema.columns.iter().zip(bound.columns.iter()) {
            if let Some(type_name) = &declared.type_name {
                let declared_type = metadata.resolve_type(type_name)?;
                if declared_type != spec.cql_type {
                    return Err(BulkError::Schema(format!(
                        "column '{}' is declared {declared_type} but the table has {}",
                        spec.name, spec.cql_type
                    )));
                }
            }
        }
        Ok(bound)
    }

    /// Binds the columns named by a header line, matched by similarity.
    pub async fn bind_header(
        &self,
        table: &TableRef,
        header: &[String],
        threshold: f64,
    ) -> Result<BoundTable> {
        let metadata = self.metadata(table).await?;
        let names: Vec<String> = metadata.columns.iter().map(|c| c.name.clone()).collect();
        let order = HeaderMatcher::new(threshold).match_header(header, &names)?;
        info!(table = %table, columns = ?order, "Column order inferred from header");
        self.bind_metadata(&metadata, Some(&order))
    }

    fn bind_metadata(&self, metadata: &TableMetadata, columns: Option<&[String]>) -> Result<BoundTable> {
        let table = TableRef::new(&metadata.keyspace, &metadata.name);
        let selected: Vec<&ColumnMetadata> = match columns {
            None => metadata.columns.iter().collect(),
            Some(names) => {
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    let column = metadata.column(name).ok_or_else(|| {
                        BulkError::Schema(format!("column '{name}' does not exist in {table}"))
                    })?;
                    if selected.iter().any(|c: &&ColumnMetadata| c.name == column.name) {
                        return Err(BulkError::Schema(format!("column '{name}' is listed twice")));
                    }
                    selected.push(column);
                }
                selected
            },
        };
        if selected.is_empty() {
            return Err(BulkError::Schema(format!("no columns to bind in {table}")));
        }

        let mut specs = Vec::with_capacity(selected.len());
        for column in selected {
            let cql_type = metadata.resolve_type(&column.type_name)?;
            specs.push(ColumnSpec::new(&column.name, cql_type, &self.options));
        }
        debug!(table = %table, columns = specs.len(), "Bound table");

        Ok(BoundTable {
            keyspace: metadata.keyspace.clone(),
            table: metadata.name.clone(),
            columns: specs.into(),
            partition_key: metadata.partition_key.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::{
        ExecuteFuture, PreparedStatement, RequestError, RowStream, Statement, UserTypeMetadata,
    };
    use crate::types::CqlType;
    use async_trait::async_trait;

    struct MetadataOnly(TableMetadata);

    #[async_trait]
    impl CqlSession for MetadataOnly {
        async fn table_metadata(&self, keyspace: &str, table: &str) -> Result<Option<TableMetadata>> {
            Ok((self.0.keyspace == keyspace && self.0.name == table).then(|| self.0.clone()))
        }

        async fn prepare(&self, query: &str) -> Result<PreparedStatement> {
            Ok(PreparedStatement::new(query))
        }

        fn execute_async(&self, _statement: Statement) -> ExecuteFuture {
            Box::pin(async { Err(RequestError::Server("unsupported".into())) })
        }

        async fn execute(&self, _statement: Statement) -> std::result::Result<RowStream, RequestError> {
            Err(RequestError::Server("unsupported".into()))
        }
    }

    fn binder() -> SchemaBinder {
        let metadata = TableMetadata {
            keyspace: "ks".into(),
            name: "t".into(),
            columns: vec![
                ColumnMetadata::new("id", "int"),
                ColumnMetadata::new("name", "text"),
                ColumnMetadata::new("tags", "frozen<set<text>>"),
                ColumnMetadata::new("Mixed", "varint"),
            ],
            partition_key: vec!["id".into()],
            user_types: Vec::new(),
        };
        SchemaBinder::new(Arc::new(MetadataOnly(metadata)), ParserOptions::default())
    }

    fn names(table: &BoundTable) -> Vec<&str> {
        table.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_declared_schema_grammar() {
        let schema = DeclaredSchema::parse("KS.T (a, b map<text, int>, \"C,d\")").unwrap();
        assert_eq!(schema.table, TableRef::new("ks", "t"));
        assert_eq!(schema.column_names(), vec!["a", "b", "C,d"]);
        assert_eq!(schema.columns[1].type_name.as_deref(), Some("map<text, int>"));

        for bad in ["ks.t", "ks(a)", "ks.t()", "ks.t(a,,b)", "ks.t(a b<c)", "ks.t(\"a)"] {
            let err = DeclaredSchema::parse(bad).unwrap_err();
            assert!(matches!(err, BulkError::MalformedSchema(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn test_table_ref_and_identifier_quoting() {
        let table: TableRef = "Ks.\"Tbl\"".parse().unwrap();
        assert_eq!(table, TableRef::new("ks", "Tbl"));
        assert_eq!(table.to_string(), "ks.\"Tbl\"");
        assert_eq!(quote_identifier("plain_1"), "plain_1");
        assert_eq!(quote_identifier("say\"hi"), "\"say\"\"hi\"");
        assert!("no_dot".parse::<TableRef>().is_err());
    }

    #[tokio::test]
    async fn test_bind_natural_order_and_subset() {
        let binder = binder();
        let table = TableRef::new("ks", "t");

        let all = binder.bind(&table, None).await.unwrap();
        assert_eq!(names(&all), vec!["id", "name", "tags", "Mixed"]);
        assert_eq!(all.columns[2].cql_type, CqlType::Set(Box::new(CqlType::Text)));

        let subset = binder.bind(&table, Some(&["name".to_string(), "id".to_string()])).await.unwrap();
        assert_eq!(names(&subset), vec!["name", "id"]);

        assert!(matches!(
            binder.bind(&table, Some(&["nope".to_string()])).await.unwrap_err(),
            BulkError::Schema(_)
        ));
        assert!(binder.bind(&table, Some(&["id".to_string(), "id".to_string()])).await.is_err());
        assert!(binder.bind(&TableRef::new("ks", "missing"), None).await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_type_fails_bind() {
        let metadata = TableMetadata {
            keyspace: "ks".into(),
            name: "t".into(),
            columns: vec![ColumnMetadata::new("id", "int"), ColumnMetadata::new("pos", "tuple<int, int>")],
            partition_key: vec!["id".into()],
            user_types: Vec::new(),
        };
        let binder = SchemaBinder::new(Arc::new(MetadataOnly(metadata)), ParserOptions::default());
        let err = binder.bind(&TableRef::new("ks", "t"), None).await.unwrap_err();
        assert!(matches!(err, BulkError::SchemaType(_)));
    }

    #[tokio::test]
    async fn test_bind_resolves_user_types() {
        let metadata = TableMetadata {
            keyspace: "ks".into(),
            name: "t".into(),
            columns: vec![ColumnMetadata::new("id", "int"), ColumnMetadata::new("home", "frozen<address>")],
            partition_key: vec!["id".into()],
            user_types: vec![UserTypeMetadata::new(
                "address",
                vec![ColumnMetadata::new("street", "text"), ColumnMetadata::new("zip", "int")],
            )],
        };
        let binder = SchemaBinder::new(Arc::new(MetadataOnly(metadata)), ParserOptions::default());
        let bound = binder.bind(&TableRef::new("ks", "t"), None).await.unwrap();
        let CqlType::Udt(address) = &bound.columns[1].cql_type else { panic!("not a user type") };
        assert_eq!(address.name, "address");
        assert_eq!(address.fields[1], ("zip".to_string(), CqlType::Int));

        let schema = DeclaredSchema::parse("ks.t(id int, home frozen<address>)").unwrap();
        assert!(binder.bind_declared(&schema).await.is_ok());
        let schema = DeclaredSchema::parse("ks.t(id int, home text)").unwrap();
        assert!(matches!(binder.bind_declared(&schema).await.unwrap_err(), BulkError::Schema(_)));
    }

    #[tokio::test]
    async fn test_bind_declared_checks_types() {
        let binder = binder();
        let ok = DeclaredSchema::parse("ks.t(id int, tags set<text>)").unwrap();
        assert_eq!(names(&binder.bind_declared(&ok).await.unwrap()), vec!["id", "tags"]);

        let wrong = DeclaredSchema::parse("ks.t(id bigint)").unwrap();
        assert!(matches!(binder.bind_declared(&wrong).await.unwrap_err(), BulkError::Schema(_)));

        let quoted = DeclaredSchema::parse("ks.t(\"Mixed\")").unwrap();
        assert!(binder.bind_declared(&quoted).await.is_ok());
        let folded = DeclaredSchema::parse("ks.t(Mixed)").unwrap();
        assert!(binder.bind_declared(&folded).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_header() {
        let binder = binder();
        let header = vec!["Name".to_string(), "id".to_string()];
        let bound = binder.bind_header(&TableRef::new("ks", "t"), &header, 0.9).await.unwrap();
        assert_eq!(names(&bound), vec!["name", "id"]);
    }

    #[tokio::test]
    async fn test_select_reorders_bound_columns() {
        let bound = binder().bind(&TableRef::new("ks", "t"), None).await.unwrap();
        let selected = bound.select(&["tags".to_string(), "id".to_string()]).unwrap();
        assert_eq!(names(&selected), vec!["tags", "id"]);
        assert_eq!(selected.partition_key, vec!["id"]);
        assert!(bound.select(&["missing".to_string()]).is_err());
        assert!(bound.select(&[]).is_err());
    }

    #[tokio::test]
    async fn test_statement_generation() {
        let bound = binder().bind(&TableRef::new("ks", "t"), None).await.unwrap();
        assert_eq!(
            bound.generate_insert(None),
            "INSERT INTO ks.t (id, name, tags, \"Mixed\") VALUES (?, ?, ?, ?)"
        );
        assert_eq!(
            bound.generate_insert(Some(3600)),
            "INSERT INTO ks.t (id, name, tags, \"Mixed\") VALUES (?, ?, ?, ?) USING TTL 3600"
        );
        assert_eq!(bound.generate_select(), "SELECT id, name, tags, \"Mixed\" FROM ks.t");
        assert_eq!(
            bound.generate_range_select(&TokenRange::new(-10, 10), Some("name = 'x' ")).unwrap(),
            "SELECT id, name, tags, \"Mixed\" FROM ks.t WHERE Token(id) > -10 AND Token(id) <= 10 AND name = 'x'"
        );
    }

    #[test]
    fn test_from_declared_requires_types() {
        let options = ParserOptions::default();
        let typed = DeclaredSchema::parse("ks.t(id int, v text)").unwrap();
        let table = BoundTable::from_declared(&typed, &options).unwrap().with_partition_key(vec!["id".into()]);
        assert_eq!(table.generate_select(), "SELECT id, v FROM ks.t");

        let untyped = DeclaredSchema::parse("ks.t(id, v text)").unwrap();
        assert!(BoundTable::from_declared(&untyped, &options).is_err());
    }
}
