//! Type parser library
//!
//! Converts between field text and [`CqlValue`]s. One [`FieldParser`] is
//! built per column when the schema is bound; it is immutable and shared by
//! every worker.
//!
//! # Example
//!
//! ```
//! use cqlbulk_engine::config::ParserOptions;
//! use cqlbulk_engine::parser::FieldParser;
//! use cqlbulk_engine::types::{CqlType, CqlValue};
//!
//! let parser = FieldParser::for_type(&CqlType::Int, &ParserOptions::default());
//! assert_eq!(parser.parse("42").unwrap(), CqlValue::Int(42));
//! assert_eq!(parser.format(&CqlValue::Int(42)).unwrap(), "42");
//! ```

pub mod collection;
pub mod numeric;
pub mod scalar;
pub mod temporal;
pub mod tokenize;

use crate::config::ParserOptions;
use crate::types::{CqlType, CqlValue};
use collection::{CollectionParser, UdtParser};
use numeric::{NumericKind, NumericParser};
use scalar::{BlobParser, BooleanParser, InetParser, TextParser, UuidParser};
use serde_json::Value;
use temporal::{DateParser, TimeParser, TimestampParser};
use thiserror::Error;

/// Why a single field or record could not be converted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid {expected} value '{text}'")]
    InvalidValue { expected: &'static str, text: String },

    #[error("cannot write a {found} value as {expected}")]
    TypeMismatch { expected: &'static str, found: &'static str },

    #[error("field exceeds {limit} characters")]
    FieldTooLong { limit: usize },

    #[error("unterminated quoted field")]
    UnterminatedQuote,

    #[error("unexpected '{0}' after closing quote")]
    TrailingCharacters(char),

    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("malformed collection '{text}': {reason}")]
    Collection { text: String, reason: String },

    #[error("collections cannot contain null")]
    NullElement,

    #[error("missing value for column '{0}'")]
    MissingField(String),

    #[error("unexpected field '{0}'")]
    UnexpectedField(String),

    #[error("malformed JSON record: {0}")]
    Json(String),

    #[error("invalid UTF-8: {0}")]
    Encoding(String),

    #[error("pattern '{pattern}' cannot format a {kind} value")]
    Pattern { kind: &'static str, pattern: String },
}

impl ParseError {
    pub fn invalid(expected: &'static str, text: impl Into<String>) -> Self {
        ParseError::InvalidValue { expected, text: text.into() }
    }

    pub fn mismatch(expected: &'static str, found: &CqlValue) -> Self {
        ParseError::TypeMismatch { expected, found: found.kind() }
    }

    pub fn collection(text: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseError::Collection { text: text.into(), reason: reason.into() }
    }
}

/// Text conversion for one column type
#[derive(Debug, Clone)]
pub enum FieldParser {
    Numeric(NumericParser),
    Boolean(BooleanParser),
    Blob(BlobParser),
    Uuid(UuidParser),
    Text(TextParser),
    Inet(InetParser),
    Timestamp(TimestampParser),
    Date(DateParser),
    Time(TimeParser),
    Collection(CollectionParser),
    Udt(UdtParser),
}

impl FieldParser {
    /// Builds the parser for `ty`, recursing into collection element types.
    pub fn for_type(ty: &CqlType, options: &ParserOptions) -> FieldParser {
        if let Some(kind) = NumericKind::for_type(ty) {
            return FieldParser::Numeric(NumericParser::new(
                kind,
                options.number_locale(),
                options.grouping,
            ));
        }

        match ty {
            CqlType::Boolean => FieldParser::Boolean(match &options.bool_tokens {
                Some((t, f)) => BooleanParser::new(t.clone(), f.clone()),
                None => BooleanParser::from_style(options.bool_style),
            }),
            CqlType::Blob => FieldParser::Blob(BlobParser::new(options.blob_encoding)),
            CqlType::Uuid => FieldParser::Uuid(UuidParser::new(false)),
            CqlType::TimeUuid => FieldParser::Uuid(UuidParser::new(true)),
            CqlType::Ascii => FieldParser::Text(TextParser::new(true)),
            CqlType::Inet => FieldParser::Inet(InetParser),
            CqlType::Timestamp => {
                FieldParser::Timestamp(TimestampParser::new(options.timestamp_pattern.clone()))
            },
            CqlType::Date => FieldParser::Date(DateParser::new(options.date_pattern.clone())),
            CqlType::Time => FieldParser::Time(TimeParser::new(options.time_pattern.clone())),
            CqlType::List(element) => FieldParser::Collection(CollectionParser::list(
                Self::for_type(element, options),
                options.collections.clone(),
            )),
            CqlType::Set(element) => FieldParser::Collection(CollectionParser::set(
                Self::for_type(element, options),
                options.collections.clone(),
            )),
            CqlType::Map(key, value) => FieldParser::Collection(CollectionParser::map(
                Self::for_type(key, options),
                Self::for_type(value, options),
                options.collections.clone(),
            )),
            CqlType::Udt(udt) => FieldParser::Udt(UdtParser::new(
                udt.name.clone(),
                udt.fields
                    .iter()
                    .map(|(name, ty)| (name.clone(), Self::for_type(ty, options)))
                    .collect(),
                options.collections.clone(),
            )),
            _ => FieldParser::Text(TextParser::new(false)),
        }
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        match self {
            FieldParser::Numeric(p) => p.parse(text),
            FieldParser::Boolean(p) => p.parse(text),
            FieldParser::Blob(p) => p.parse(text),
            FieldParser::Uuid(p) => p.parse(text),
            FieldParser::Text(p) => p.parse(text),
            FieldParser::Inet(p) => p.parse(text),
            FieldParser::Timestamp(p) => p.parse(text),
            FieldParser::Date(p) => p.parse(text),
            FieldParser::Time(p) => p.parse(text),
            FieldParser::Collection(p) => p.parse(text),
            FieldParser::Udt(p) => p.parse(text),
        }
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        match self {
            FieldParser::Numeric(p) => p.format(value),
            FieldParser::Boolean(p) => p.format(value),
            FieldParser::Blob(p) => p.format(value),
            FieldParser::Uuid(p) => p.format(value),
            FieldParser::Text(p) => p.format(value),
            FieldParser::Inet(p) => p.format(value),
            FieldParser::Timestamp(p) => p.format(value),
            FieldParser::Date(p) => p.format(value),
            FieldParser::Time(p) => p.format(value),
            FieldParser::Collection(p) => p.format(value),
            FieldParser::Udt(p) => p.format(value),
        }
    }

    /// Converts a JSON value; JSON `null` is an error here and handled by callers.
    pub fn parse_json(&self, value: &Value) -> Result<CqlValue, ParseError> {
        match (self, value) {
            (_, Value::Null) => Err(ParseError::NullElement),
            (FieldParser::Collection(p), _) => p.parse_json(value),
            (FieldParser::Udt(p), _) => p.parse_json(value),
            (FieldParser::Numeric(p), Value::Number(n)) => {
                let text = n.to_string();
                p.parse_canonical(&text).ok_or_else(|| ParseError::invalid("number", text))
            },
            (FieldParser::Numeric(p), Value::String(s)) => {
                p.parse_canonical(s.trim()).map_or_else(|| p.parse(s), Ok)
            },
            (FieldParser::Boolean(_), Value::Bool(b)) => Ok(CqlValue::Boolean(*b)),
            (FieldParser::Text(p), Value::String(s)) => p.parse_raw(s),
            (_, Value::String(s)) => self.parse(s),
            (_, other) => Err(ParseError::invalid("scalar", other.to_string())),
        }
    }

    pub fn format_json(&self, value: &CqlValue) -> Result<Value, ParseError> {
        match (self, value) {
            (FieldParser::Collection(p), _) => p.format_json(value),
            (FieldParser::Udt(p), _) => p.format_json(value),
            (FieldParser::Numeric(p), _) => {
                let canonical = p.format_canonical(value)?;
                Ok(match value {
                    CqlValue::Int(v) => Value::from(*v),
                    CqlValue::BigInt(v) => Value::from(*v),
                    CqlValue::Float(v) => float_json(f64::from(*v), canonical),
                    CqlValue::Double(v) => float_json(*v, canonical),
                    _ => Value::String(canonical),
                })
            },
            (FieldParser::Boolean(_), CqlValue::Boolean(b)) => Ok(Value::Bool(*b)),
            (FieldParser::Text(_), CqlValue::Text(s)) => Ok(Value::String(s.clone())),
            _ => self.format(value).map(Value::String),
        }
    }

    /// Bracketed output that nests inside collections without quoting
    pub fn is_collection(&self) -> bool {
        matches!(self, FieldParser::Collection(_) | FieldParser::Udt(_))
    }

    /// Free-form output that should always be quoted when nested
    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            FieldParser::Text(_)
                | FieldParser::Inet(_)
                | FieldParser::Timestamp(_)
                | FieldParser::Date(_)
                | FieldParser::Time(_)
        )
    }
}

fn float_json(v: f64, canonical: String) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::String(canonical))
}
