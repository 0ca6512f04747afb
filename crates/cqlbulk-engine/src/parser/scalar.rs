//! Boolean, blob, uuid, text and inet parsers

use super::ParseError;
use crate::types::CqlValue;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Preset true/false token pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BoolStyle {
    #[default]
    #[serde(rename = "TRUE_FALSE")]
    TrueFalse,
    #[serde(rename = "1_0")]
    OneZero,
    #[serde(rename = "T_F")]
    TF,
    #[serde(rename = "Y_N")]
    YN,
    #[serde(rename = "YES_NO")]
    YesNo,
}

impl BoolStyle {
    pub fn tokens(self) -> (&'static str, &'static str) {
        match self {
            BoolStyle::TrueFalse => ("TRUE", "FALSE"),
            BoolStyle::OneZero => ("1", "0"),
            BoolStyle::TF => ("T", "F"),
            BoolStyle::YN => ("Y", "N"),
            BoolStyle::YesNo => ("YES", "NO"),
        }
    }
}

impl std::str::FromStr for BoolStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRUE_FALSE" => Ok(BoolStyle::TrueFalse),
            "1_0" => Ok(BoolStyle::OneZero),
            "T_F" => Ok(BoolStyle::TF),
            "Y_N" => Ok(BoolStyle::YN),
            "YES_NO" => Ok(BoolStyle::YesNo),
            other => Err(format!("unknown boolean style '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BooleanParser {
    true_token: String,
    false_token: String,
}

impl BooleanParser {
    pub fn new(true_token: impl Into<String>, false_token: impl Into<String>) -> Self {
        Self { true_token: true_token.into(), false_token: false_token.into() }
    }

    pub fn from_style(style: BoolStyle) -> Self {
        let (t, f) = style.tokens();
        Self::new(t, f)
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let text = text.trim();
        if text.eq_ignore_ascii_case(&self.true_token) {
            Ok(CqlValue::Boolean(true))
        } else if text.eq_ignore_ascii_case(&self.false_token) {
            Ok(CqlValue::Boolean(false))
        } else {
            Err(ParseError::invalid("boolean", text))
        }
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        match value {
            CqlValue::Boolean(true) => Ok(self.true_token.clone()),
            CqlValue::Boolean(false) => Ok(self.false_token.clone()),
            other => Err(ParseError::mismatch("boolean", other)),
        }
    }
}

/// Text encoding for blob columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlobEncoding {
    #[default]
    Base64,
    /// Hex digits, `0x` prefix optional on input and always written
    Hex,
}

#[derive(Debug, Clone)]
pub struct BlobParser {
    encoding: BlobEncoding,
}

impl BlobParser {
    pub fn new(encoding: BlobEncoding) -> Self {
        Self { encoding }
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let text = text.trim();
        let bytes = match self.encoding {
            BlobEncoding::Base64 => BASE64.decode(text).ok(),
            BlobEncoding::Hex => {
                let digits = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .unwrap_or(text);
                hex::decode(digits).ok()
            },
        };
        bytes.map(CqlValue::Blob).ok_or_else(|| ParseError::invalid("blob", text))
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        match value {
            CqlValue::Blob(bytes) => Ok(match self.encoding {
                BlobEncoding::Base64 => BASE64.encode(bytes),
                BlobEncoding::Hex => format!("0x{}", hex::encode(bytes)),
            }),
            other => Err(ParseError::mismatch("blob", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UuidParser {
    time_based: bool,
}

impl UuidParser {
    pub fn new(time_based: bool) -> Self {
        Self { time_based }
    }

    fn name(&self) -> &'static str {
        if self.time_based {
            "timeuuid"
        } else {
            "uuid"
        }
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let text = text.trim();
        let uuid = Uuid::parse_str(text).map_err(|_| ParseError::invalid(self.name(), text))?;
        if self.time_based && uuid.get_version_num() != 1 {
            return Err(ParseError::invalid(self.name(), text));
        }
        Ok(CqlValue::Uuid(uuid))
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        match value {
            CqlValue::Uuid(uuid) => Ok(uuid.hyphenated().to_string()),
            other => Err(ParseError::mismatch(self.name(), other)),
        }
    }
}

/// Text, varchar and ascii
///
/// Recognizes `\n`, `\r` and `\\`; other backslash sequences pass through.
#[derive(Debug, Clone)]
pub struct TextParser {
    ascii: bool,
}

impl TextParser {
    pub fn new(ascii: bool) -> Self {
        Self { ascii }
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        if self.ascii && !text.is_ascii() {
            return Err(ParseError::invalid("ascii", text));
        }
        Ok(CqlValue::Text(unescape(text)))
    }

    /// Takes text verbatim, without escape processing (JSON input).
    pub fn parse_raw(&self, text: &str) -> Result<CqlValue, ParseError> {
        if self.ascii && !text.is_ascii() {
            return Err(ParseError::invalid("ascii", text));
        }
        Ok(CqlValue::Text(text.to_string()))
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        match value {
            CqlValue::Text(s) => Ok(escape(s)),
            other => Err(ParseError::mismatch("text", other)),
        }
    }
}

fn unescape(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => {
                out.push('\n');
                chars.next();
            },
            Some('r') => {
                out.push('\r');
                chars.next();
            },
            Some('\\') => {
                out.push('\\');
                chars.next();
            },
            _ => out.push('\\'),
        }
    }
    out
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct InetParser;

impl InetParser {
    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let text = text.trim();
        text.parse::<IpAddr>()
            .map(CqlValue::Inet)
            .map_err(|_| ParseError::invalid("inet", text))
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        match value {
            CqlValue::Inet(addr) => Ok(addr.to_string()),
            other => Err(ParseError::mismatch("inet", other)),
        }
    }
}
