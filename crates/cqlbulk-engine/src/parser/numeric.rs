//! Locale-aware numeric parsing and formatting

use super::ParseError;
use crate::types::{CqlType, CqlValue};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Separators used for numbers in the text files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberLocale {
    pub decimal_separator: char,
    pub grouping_separator: char,
}

impl NumberLocale {
    /// `1,234.5`
    pub const ENGLISH: NumberLocale =
        NumberLocale { decimal_separator: '.', grouping_separator: ',' };

    /// `1 234,5` with a no-break space
    pub const FRENCH: NumberLocale =
        NumberLocale { decimal_separator: ',', grouping_separator: '\u{a0}' };

    /// `1.234,5`
    pub const GERMAN: NumberLocale =
        NumberLocale { decimal_separator: ',', grouping_separator: '.' };

    /// Locale implied by a decimal separator
    pub fn from_decimal_separator(c: char) -> Self {
        if c == ',' {
            Self::FRENCH
        } else {
            NumberLocale { decimal_separator: c, ..Self::ENGLISH }
        }
    }

    /// Explicit separators; without a grouping separator it is implied by
    /// the decimal one.
    pub fn new(decimal_separator: char, grouping_separator: Option<char>) -> Self {
        match grouping_separator {
            Some(grouping_separator) => NumberLocale { decimal_separator, grouping_separator },
            None => Self::from_decimal_separator(decimal_separator),
        }
    }

    fn is_grouping(&self, c: char) -> bool {
        c == self.grouping_separator
            || (self.grouping_separator.is_whitespace() && (c == ' ' || c == '\u{202f}'))
    }
}

impl Default for NumberLocale {
    fn default() -> Self {
        Self::ENGLISH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Varint,
}

impl NumericKind {
    fn name(self) -> &'static str {
        match self {
            NumericKind::Int => "int",
            NumericKind::BigInt => "bigint",
            NumericKind::Float => "float",
            NumericKind::Double => "double",
            NumericKind::Decimal => "decimal",
            NumericKind::Varint => "varint",
        }
    }

    fn has_fraction(self) -> bool {
        matches!(self, NumericKind::Float | NumericKind::Double | NumericKind::Decimal)
    }

    pub fn for_type(ty: &CqlType) -> Option<Self> {
        match ty {
            CqlType::Int => Some(NumericKind::Int),
            CqlType::BigInt | CqlType::Counter => Some(NumericKind::BigInt),
            CqlType::Float => Some(NumericKind::Float),
            CqlType::Double => Some(NumericKind::Double),
            CqlType::Decimal => Some(NumericKind::Decimal),
            CqlType::Varint => Some(NumericKind::Varint),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NumericParser {
    kind: NumericKind,
    locale: NumberLocale,
    grouping: bool,
}

impl NumericParser {
    pub fn new(kind: NumericKind, locale: NumberLocale, grouping: bool) -> Self {
        Self { kind, locale, grouping }
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let normalized = self.normalize(text).ok_or_else(|| self.invalid(text))?;
        self.parse_canonical(&normalized).ok_or_else(|| self.invalid(text))
    }

    /// Parses locale-neutral text (`1234.5`), as found in JSON numbers.
    pub fn parse_canonical(&self, text: &str) -> Option<CqlValue> {
        let value = match self.kind {
            NumericKind::Int => CqlValue::Int(text.parse().ok()?),
            NumericKind::BigInt => CqlValue::BigInt(text.parse().ok()?),
            NumericKind::Float => CqlValue::Float(text.parse().ok()?),
            NumericKind::Double => CqlValue::Double(text.parse().ok()?),
            NumericKind::Decimal => CqlValue::Decimal(BigDecimal::from_str(text).ok()?),
            NumericKind::Varint => CqlValue::Varint(BigInt::from_str(text).ok()?),
        };
        Some(value)
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        Ok(self.localize(&self.format_canonical(value)?))
    }

    pub fn format_canonical(&self, value: &CqlValue) -> Result<String, ParseError> {
        let text = match (self.kind, value) {
            (NumericKind::Int, CqlValue::Int(v)) => v.to_string(),
            (NumericKind::BigInt, CqlValue::BigInt(v)) => v.to_string(),
            (NumericKind::Float, CqlValue::Float(v)) => v.to_string(),
            (NumericKind::Double, CqlValue::Double(v)) => v.to_string(),
            (NumericKind::Decimal, CqlValue::Decimal(v)) => v.to_string(),
            (NumericKind::Varint, CqlValue::Varint(v)) => v.to_string(),
            (kind, other) => {
                return Err(ParseError::TypeMismatch { expected: kind.name(), found: other.kind() })
            },
        };
        Ok(text)
    }

    /// Strips grouping and maps the decimal separator to `.`.
    fn normalize(&self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let mut out = String::with_capacity(trimmed.len());
        for c in trimmed.chars() {
            if c == self.locale.decimal_separator {
                if !self.kind.has_fraction() {
                    return None;
                }
                out.push('.');
            } else if self.locale.is_grouping(c) {
                if !self.grouping {
                    return None;
                }
            } else {
                out.push(c);
            }
        }
        Some(out)
    }

    fn localize(&self, canonical: &str) -> String {
        let (sign, rest) = match canonical.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", canonical),
        };
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, tail) = rest.split_at(digits_end);

        let mut out = String::with_capacity(canonical.len() + int_part.len() / 3);
        out.push_str(sign);
        if self.grouping {
            for (i, c) in int_part.chars().enumerate() {
                if i > 0 && (int_part.len() - i) % 3 == 0 {
                    out.push(self.locale.grouping_separator);
                }
                out.push(c);
            }
        } else {
            out.push_str(int_part);
        }
        for c in tail.chars() {
            out.push(if c == '.' { self.locale.decimal_separator } else { c });
        }
        out
    }

    fn invalid(&self, text: &str) -> ParseError {
        ParseError::invalid(self.kind.name(), text)
    }
}
