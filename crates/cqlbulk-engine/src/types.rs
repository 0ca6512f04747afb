//! CQL data model: column types and typed values

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use cqlbulk_common::BulkError;
use num_bigint::BigInt;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Column type as reported by table metadata or a declared schema
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CqlType {
    Ascii,
    BigInt,
    Blob,
    Boolean,
    Counter,
    Date,
    Decimal,
    Double,
    Float,
    Inet,
    Int,
    Text,
    Time,
    Timestamp,
    TimeUuid,
    Uuid,
    Varchar,
    Varint,
    List(Box<CqlType>),
    Set(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
    Udt(UserType),
}

/// A user-defined type with its fields in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserType {
    pub name: String,
    pub fields: Vec<(String, CqlType)>,
}

/// Looks up a user-defined type by its lower-cased name
pub type UserTypeLookup<'a> = dyn Fn(&str) -> Result<Option<UserType>, BulkError> + 'a;

impl CqlType {
    pub fn is_collection(&self) -> bool {
        matches!(self, CqlType::List(_) | CqlType::Set(_) | CqlType::Map(_, _))
    }

    /// Types whose formatted text is free-form and needs quoting inside collections
    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            CqlType::Ascii
                | CqlType::Text
                | CqlType::Varchar
                | CqlType::Timestamp
                | CqlType::Date
                | CqlType::Time
                | CqlType::Inet
        )
    }

    /// Parses type text, resolving names that are not built-in through `user_type`.
    ///
    /// # Arguments
    ///
    /// * `text` - type text such as `map<text, frozen<address>>`
    /// * `user_type` - called with the lower-cased name, without keyspace prefix
    ///
    /// # Errors
    ///
    /// `SchemaType` when a name is neither built-in nor a known user type.
    pub fn parse_with(text: &str, user_type: &UserTypeLookup<'_>) -> Result<Self, BulkError> {
        let text = text.trim();
        let lower = text.to_ascii_lowercase();

        if let Some((outer, inner)) = split_generic(&lower) {
            return match outer {
                "frozen" => Self::parse_with(inner, user_type),
                "list" => Ok(CqlType::List(Box::new(Self::parse_with(inner, user_type)?))),
                "set" => Ok(CqlType::Set(Box::new(Self::parse_with(inner, user_type)?))),
                "map" => {
                    let (key, value) = split_top_level_comma(inner)
                        .ok_or_else(|| BulkError::SchemaType(text.to_string()))?;
                    Ok(CqlType::Map(
                        Box::new(Self::parse_with(key, user_type)?),
                        Box::new(Self::parse_with(value, user_type)?),
                    ))
                },
                _ => Err(BulkError::SchemaType(text.to_string())),
            };
        }

        if let Some(ty) = builtin(&lower) {
            return Ok(ty);
        }
        let name = lower.rsplit('.').next().unwrap_or(&lower).trim_matches('"');
        match user_type(name)? {
            Some(udt) => Ok(CqlType::Udt(udt)),
            None => Err(BulkError::SchemaType(text.to_string())),
        }
    }
}

impl FromStr for CqlType {
    type Err = BulkError;

    /// Parses CQL type text such as `map<text, frozen<list<int>>>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with(s, &|_| Ok(None))
    }
}

fn builtin(lower: &str) -> Option<CqlType> {
    let ty = match lower {
        "ascii" => CqlType::Ascii,
        "bigint" => CqlType::BigInt,
        "blob" => CqlType::Blob,
        "boolean" => CqlType::Boolean,
        "counter" => CqlType::Counter,
        "date" => CqlType::Date,
        "decimal" => CqlType::Decimal,
        "double" => CqlType::Double,
        "float" => CqlType::Float,
        "inet" => CqlType::Inet,
        "int" => CqlType::Int,
        "text" => CqlType::Text,
        "time" => CqlType::Time,
        "timestamp" => CqlType::Timestamp,
        "timeuuid" => CqlType::TimeUuid,
        "uuid" => CqlType::Uuid,
        "varchar" => CqlType::Varchar,
        "varint" => CqlType::Varint,
        _ => return None,
    };
    Some(ty)
}

fn split_generic(text: &str) -> Option<(&str, &str)> {
    let open = text.find('<')?;
    let inner = text.strip_suffix('>')?;
    Some((text[..open].trim(), inner[open + 1..].trim()))
}

fn split_top_level_comma(text: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => return Some((&text[..i], &text[i + 1..])),
            _ => {},
        }
    }
    None
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlType::Ascii => f.write_str("ascii"),
            CqlType::BigInt => f.write_str("bigint"),
            CqlType::Blob => f.write_str("blob"),
            CqlType::Boolean => f.write_str("boolean"),
            CqlType::Counter => f.write_str("counter"),
            CqlType::Date => f.write_str("date"),
            CqlType::Decimal => f.write_str("decimal"),
            CqlType::Double => f.write_str("double"),
            CqlType::Float => f.write_str("float"),
            CqlType::Inet => f.write_str("inet"),
            CqlType::Int => f.write_str("int"),
            CqlType::Text => f.write_str("text"),
            CqlType::Time => f.write_str("time"),
            CqlType::Timestamp => f.write_str("timestamp"),
            CqlType::TimeUuid => f.write_str("timeuuid"),
            CqlType::Uuid => f.write_str("uuid"),
            CqlType::Varchar => f.write_str("varchar"),
            CqlType::Varint => f.write_str("varint"),
            CqlType::List(e) => write!(f, "list<{e}>"),
            CqlType::Set(e) => write!(f, "set<{e}>"),
            CqlType::Map(k, v) => write!(f, "map<{k}, {v}>"),
            CqlType::Udt(udt) => f.write_str(&udt.name),
        }
    }
}

/// A typed column value
///
/// Sets keep first-occurrence order with duplicates removed; maps keep
/// insertion order with distinct keys.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(BigDecimal),
    Varint(BigInt),
    Boolean(bool),
    Uuid(Uuid),
    Text(String),
    Blob(Vec<u8>),
    Inet(IpAddr),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    /// Field values in declaration order; `None` for an unset field
    Udt(Vec<(String, Option<CqlValue>)>),
}

impl CqlValue {
    /// Short name of the variant, used in type-mismatch messages
    pub fn kind(&self) -> &'static str {
        match self {
            CqlValue::Int(_) => "int",
            CqlValue::BigInt(_) => "bigint",
            CqlValue::Float(_) => "float",
            CqlValue::Double(_) => "double",
            CqlValue::Decimal(_) => "decimal",
            CqlValue::Varint(_) => "varint",
            CqlValue::Boolean(_) => "boolean",
            CqlValue::Uuid(_) => "uuid",
            CqlValue::Text(_) => "text",
            CqlValue::Blob(_) => "blob",
            CqlValue::Inet(_) => "inet",
            CqlValue::Timestamp(_) => "timestamp",
            CqlValue::Date(_) => "date",
            CqlValue::Time(_) => "time",
            CqlValue::List(_) => "list",
            CqlValue::Set(_) => "set",
            CqlValue::Map(_) => "map",
            CqlValue::Udt(_) => "udt",
        }
    }
}

/// One row of values, positionally aligned with the bound columns
pub type Record = Vec<Option<CqlValue>>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalar_types() {
        assert_eq!("int".parse::<CqlType>().unwrap(), CqlType::Int);
        assert_eq!(" TimeUUID ".parse::<CqlType>().unwrap(), CqlType::TimeUuid);
        assert_eq!("varchar".parse::<CqlType>().unwrap(), CqlType::Varchar);
    }

    #[test]
    fn test_parse_nested_collections() {
        let ty: CqlType = "map<text, frozen<list<int>>>".parse().unwrap();
        assert_eq!(
            ty,
            CqlType::Map(
                Box::new(CqlType::Text),
                Box::new(CqlType::List(Box::new(CqlType::Int)))
            )
        );
        assert_eq!(ty.to_string(), "map<text, list<int>>");
    }

    #[test]
    fn test_unknown_type_is_schema_type_error() {
        let err = "tuple<int, text>".parse::<CqlType>().unwrap_err();
        assert!(matches!(err, BulkError::SchemaType(ref t) if t == "tuple<int, text>"));
        assert!("duration".parse::<CqlType>().is_err());
        assert!("map<int>".parse::<CqlType>().is_err());
    }
    #[test]
    fn test_user_types_resolve_through_the_lookup() {
        let address = UserType {
            name: "address".to_string(),
            fields: vec![("street".to_string(), CqlType::Text), ("zip".to_string(), CqlType::Int)],
        };
        let lookup = |name: &str| Ok::<_, BulkError>((name == "address").then(|| address.clone()));

        let ty = CqlType::parse_with("list<frozen<Ks.Address>>", &lookup).unwrap();
        assert_eq!(ty, CqlType::List(Box::new(CqlType::Udt(address.clone()))));
        assert_eq!(ty.to_string(), "list<address>");

        let err = CqlType::parse_with("frozen<phone>", &lookup).unwrap_err();
        assert!(matches!(err, BulkError::SchemaType(ref t) if t == "phone"));
        assert!("frozen<address>".parse::<CqlType>().is_err());
    }
}
