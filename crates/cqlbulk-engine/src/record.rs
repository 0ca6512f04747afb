//! Record parser
//!
//! Turns one line of delimited text (or one JSON object) into a [`Record`]
//! aligned with the bound columns, and formats result rows back to text.
//! A record is all or nothing: the first failing column rejects it.

use crate::config::ParserOptions;
use crate::parser::tokenize::{FieldSplitter, Token};
use crate::parser::{FieldParser, ParseError};
use crate::session::Row;
use crate::types::{CqlType, CqlValue, Record};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// One bound column and its parser
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub cql_type: CqlType,
    pub parser: FieldParser,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, cql_type: CqlType, options: &ParserOptions) -> Self {
        let parser = FieldParser::for_type(&cql_type, options);
        Self { name: name.into(), cql_type, parser }
    }
}

/// A rejected record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}{}: {source}", column_label(.column))]
pub struct RecordError {
    pub line: u64,
    /// Zero-based input position of the failing field
    pub column: Option<usize>,
    #[source]
    pub source: ParseError,
}

fn column_label(column: &Option<usize>) -> String {
    column.map(|c| format!(", column {c}")).unwrap_or_default()
}

impl RecordError {
    pub fn new(line: u64, column: Option<usize>, source: ParseError) -> Self {
        Self { line, column, source }
    }
}

/// Converts between record text and typed values for a fixed column list
#[derive(Debug, Clone)]
pub struct RecordParser {
    columns: Arc<[ColumnSpec]>,
    splitter: FieldSplitter,
    null_string: String,
    comment: Option<String>,
    skip: BTreeSet<usize>,
}

impl RecordParser {
    /// # Arguments
    ///
    /// * `columns` - Bound columns in record order, skipped positions excluded
    /// * `options` - Delimiter, quoting, null sentinel, comment and skip settings
    pub fn new(columns: Arc<[ColumnSpec]>, options: &ParserOptions) -> Self {
        Self {
            columns,
            splitter: FieldSplitter {
                delimiter: options.delimiter,
                quote: options.quote,
                escape: options.escape,
                max_chars: options.max_chars_per_field,
                nesting: false,
            },
            null_string: options.null_string.clone(),
            comment: options.comment.clone().filter(|c| !c.is_empty()),
            skip: options.skip_columns.iter().copied().collect(),
        }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Fields expected on each input line, skipped ones included
    pub fn field_count(&self) -> usize {
        self.columns.len() + self.skip.len()
    }

    /// Parses one delimited line; `Ok(None)` means a comment line.
    pub fn parse_line(&self, text: &str, line: u64) -> Result<Option<Record>, RecordError> {
        if let Some(marker) = &self.comment {
            if text.trim_start().starts_with(marker.as_str()) {
                return Ok(None);
            }
        }
        let tokens = self.splitter.split(text).map_err(|e| RecordError::new(line, None, e))?;
        self.parse_fields(&tokens, line).map(Some)
    }

    /// Parses pre-split fields, dropping skipped positions.
    pub fn parse_fields(&self, tokens: &[Token], line: u64) -> Result<Record, RecordError> {
        let expected = self.field_count();
        if tokens.len() != expected {
            return Err(RecordError::new(
                line,
                None,
                ParseError::FieldCount { expected, found: tokens.len() },
            ));
        }

        let mut record = Vec::with_capacity(self.columns.len());
        let mut columns = self.columns.iter();
        for (position, token) in tokens.iter().enumerate() {
            if self.skip.contains(&position) {
                continue;
            }
            let Some(column) = columns.next() else {
                return Err(RecordError::new(
                    line,
                    Some(position),
                    ParseError::FieldCount { expected: self.columns.len(), found: position + 1 },
                ));
            };
            if !token.quoted && token.text == self.null_string {
                record.push(None);
                continue;
            }
            let value = column
                .parser
                .parse(&token.text)
                .map_err(|e| RecordError::new(line, Some(position), e))?;
            record.push(Some(value));
        }
        Ok(record)
    }

    /// Splits a header line into column names, dropping skipped positions.
    pub fn header_fields(&self, text: &str) -> Result<Vec<String>, ParseError> {
        Ok(self
            .splitter
            .split(text)?
            .into_iter()
            .enumerate()
            .filter(|(position, _)| !self.skip.contains(position))
            .map(|(_, token)| token.text)
            .collect())
    }

    /// Parses one JSON object keyed by column name.
    pub fn parse_json(&self, text: &str, line: u64) -> Result<Record, RecordError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RecordError::new(line, None, ParseError::Json(e.to_string())))?;
        self.parse_json_value(&value, line)
    }

    pub fn parse_json_value(&self, value: &Value, line: u64) -> Result<Record, RecordError> {
        let Value::Object(object) = value else {
            return Err(RecordError::new(
                line,
                None,
                ParseError::Json(format!("expected an object, found {value}")),
            ));
        };

        if let Some(unknown) = object.keys().find(|k| !self.columns.iter().any(|c| &c.name == *k)) {
            return Err(RecordError::new(line, None, ParseError::UnexpectedField(unknown.clone())));
        }

        let mut record = Vec::with_capacity(self.columns.len());
        for (index, column) in self.columns.iter().enumerate() {
            match object.get(&column.name) {
                None => {
                    return Err(RecordError::new(
                        line,
                        Some(index),
                        ParseError::MissingField(column.name.clone()),
                    ))
                },
                Some(Value::Null) => record.push(None),
                Some(v) => record.push(Some(
                    column.parser.parse_json(v).map_err(|e| RecordError::new(line, Some(index), e))?,
                )),
            }
        }
        Ok(record)
    }

    /// Formats a result row as one delimited line.
    pub fn format_row(&self, row: &Row) -> Result<String, RecordError> {
        self.check_width(row)?;
        let delimiter = self.splitter.delimiter.to_string();
        let mut fields = Vec::with_capacity(self.columns.len());
        for (index, (column, value)) in self.columns.iter().zip(&row.values).enumerate() {
            let field = match value {
                None => self.null_string.clone(),
                Some(v) => {
                    let text = column.parser.format(v).map_err(|e| RecordError::new(0, Some(index), e))?;
                    self.quote_if_needed(text)
                },
            };
            fields.push(field);
        }
        Ok(fields.join(&delimiter))
    }

    /// Formats a result row as one JSON object.
    pub fn format_json(&self, row: &Row) -> Result<String, RecordError> {
        self.check_width(row)?;
        let mut object = serde_json::Map::with_capacity(self.columns.len());
        for (index, (column, value)) in self.columns.iter().zip(&row.values).enumerate() {
            let json = match value {
                None => Value::Null,
                Some(v) => column.parser.format_json(v).map_err(|e| RecordError::new(0, Some(index), e))?,
            };
            object.insert(column.name.clone(), json);
        }
        serde_json::to_string(&Value::Object(object))
            .map_err(|e| RecordError::new(0, None, ParseError::Json(e.to_string())))
    }

    fn check_width(&self, row: &Row) -> Result<(), RecordError> {
        if row.values.len() != self.columns.len() {
            return Err(RecordError::new(
                0,
                None,
                ParseError::FieldCount { expected: self.columns.len(), found: row.values.len() },
            ));
        }
        Ok(())
    }

    fn quote_if_needed(&self, text: String) -> String {
        if self.splitter.needs_quoting(&text)
            || text == self.null_string
            || text.starts_with(self.splitter.quote)
            || text.starts_with(['[', '{'])
        {
            self.splitter.quote(&text)
        } else {
            text
        }
    }
}
