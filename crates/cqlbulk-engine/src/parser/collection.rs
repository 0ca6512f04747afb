//! List, set, map and user-type parsers

use super::tokenize::{FieldSplitter, Token};
use super::{FieldParser, ParseError};
use crate::types::CqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bracket, delimiter and quoting characters for collection text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSyntax {
    pub list_open: char,
    pub list_close: char,
    pub set_open: char,
    pub set_close: char,
    pub map_open: char,
    pub map_close: char,
    pub delimiter: char,
    pub key_separator: char,
    pub quote: char,
    pub escape: char,
}

impl Default for CollectionSyntax {
    fn default() -> Self {
        Self {
            list_open: '[',
            list_close: ']',
            set_open: '{',
            set_close: '}',
            map_open: '{',
            map_close: '}',
            delimiter: ',',
            key_separator: ':',
            quote: '"',
            escape: '\\',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    List,
    Set,
    Map,
}

/// Parser for one collection column; elements recurse into child parsers
#[derive(Debug, Clone)]
pub struct CollectionParser {
    kind: CollectionKind,
    key: Option<Box<FieldParser>>,
    element: Box<FieldParser>,
    syntax: CollectionSyntax,
}

impl CollectionParser {
    pub fn list(element: FieldParser, syntax: CollectionSyntax) -> Self {
        Self { kind: CollectionKind::List, key: None, element: Box::new(element), syntax }
    }

    pub fn set(element: FieldParser, syntax: CollectionSyntax) -> Self {
        Self { kind: CollectionKind::Set, key: None, element: Box::new(element), syntax }
    }

    pub fn map(key: FieldParser, value: FieldParser, syntax: CollectionSyntax) -> Self {
        Self {
            kind: CollectionKind::Map,
            key: Some(Box::new(key)),
            element: Box::new(value),
            syntax,
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    fn brackets(&self) -> (char, char) {
        match self.kind {
            CollectionKind::List => (self.syntax.list_open, self.syntax.list_close),
            CollectionKind::Set => (self.syntax.set_open, self.syntax.set_close),
            CollectionKind::Map => (self.syntax.map_open, self.syntax.map_close),
        }
    }

    fn splitter(&self) -> FieldSplitter {
        element_splitter(&self.syntax)
    }

    fn name(&self) -> &'static str {
        match self.kind {
            CollectionKind::List => "list",
            CollectionKind::Set => "set",
            CollectionKind::Map => "map",
        }
    }

    fn key_parser(&self) -> &FieldParser {
        self.key.as_deref().unwrap_or(&self.element)
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let trimmed = text.trim();
        let (open, close) = self.brackets();
        let body = trimmed
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
            .ok_or_else(|| {
                ParseError::collection(text, format!("expected {open}...{close} around the {}", self.name()))
            })?;

        if body.trim().is_empty() {
            return Ok(self.empty());
        }

        let splitter = self.splitter();
        match self.kind {
            CollectionKind::List | CollectionKind::Set => {
                let mut items = Vec::new();
                for token in splitter.split(body)? {
                    let item = parse_element(&self.element, &token)?;
                    if self.kind == CollectionKind::List || !items.contains(&item) {
                        items.push(item);
                    }
                }
                Ok(self.wrap(items))
            },
            CollectionKind::Map => {
                let mut entries: Vec<(CqlValue, CqlValue)> = Vec::new();
                for raw in splitter.split_raw(body)? {
                    let (raw_key, raw_value) = splitter
                        .split_once_raw(&raw, self.syntax.key_separator)?
                        .ok_or_else(|| {
                            ParseError::collection(
                                raw.trim(),
                                format!("expected key{}value", self.syntax.key_separator),
                            )
                        })?;
                    let key = parse_element(self.key_parser(), &single_token(&splitter, &raw_key)?)?;
                    let value = parse_element(&self.element, &single_token(&splitter, &raw_value)?)?;
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(ParseError::collection(text, "duplicate map key"));
                    }
                    entries.push((key, value));
                }
                Ok(CqlValue::Map(entries))
            },
        }
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        let (open, close) = self.brackets();
        let mut parts = Vec::new();

        match (self.kind, value) {
            (CollectionKind::List, CqlValue::List(items))
            | (CollectionKind::Set, CqlValue::Set(items)) => {
                for item in items {
                    parts.push(self.format_element(&self.element, item)?);
                }
            },
            (CollectionKind::Map, CqlValue::Map(entries)) => {
                for (key, value) in entries {
                    parts.push(format!(
                        "{}{}{}",
                        self.format_element(self.key_parser(), key)?,
                        self.syntax.key_separator,
                        self.format_element(&self.element, value)?
                    ));
                }
            },
            (_, other) => return Err(ParseError::mismatch(self.name(), other)),
        }

        let mut out = String::new();
        out.push(open);
        out.push_str(&parts.join(&self.syntax.delimiter.to_string()));
        out.push(close);
        Ok(out)
    }

    pub fn parse_json(&self, value: &Value) -> Result<CqlValue, ParseError> {
        match (self.kind, value) {
            (CollectionKind::List | CollectionKind::Set, Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let parsed = self.element.parse_json(item)?;
                    if self.kind == CollectionKind::List || !out.contains(&parsed) {
                        out.push(parsed);
                    }
                }
                Ok(self.wrap(out))
            },
            (CollectionKind::Map, Value::Object(object)) => {
                let mut entries = Vec::with_capacity(object.len());
                for (key, value) in object {
                    let key = self.key_parser().parse_json(&Value::String(key.clone()))?;
                    entries.push((key, self.element.parse_json(value)?));
                }
                Ok(CqlValue::Map(entries))
            },
            (_, Value::String(text)) => self.parse(text),
            (_, other) => Err(ParseError::invalid(self.name(), other.to_string())),
        }
    }

    pub fn format_json(&self, value: &CqlValue) -> Result<Value, ParseError> {
        match (self.kind, value) {
            (CollectionKind::List, CqlValue::List(items))
            | (CollectionKind::Set, CqlValue::Set(items)) => items
                .iter()
                .map(|item| self.element.format_json(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (CollectionKind::Map, CqlValue::Map(entries)) => {
                let mut object = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = match self.key_parser().format_json(key)? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    object.insert(key, self.element.format_json(value)?);
                }
                Ok(Value::Object(object))
            },
            (_, other) => Err(ParseError::mismatch(self.name(), other)),
        }
    }

    fn empty(&self) -> CqlValue {
        match self.kind {
            CollectionKind::Map => CqlValue::Map(Vec::new()),
            _ => self.wrap(Vec::new()),
        }
    }

    fn wrap(&self, items: Vec<CqlValue>) -> CqlValue {
        match self.kind {
            CollectionKind::Set => CqlValue::Set(items),
            _ => CqlValue::List(items),
        }
    }

    fn format_element(&self, parser: &FieldParser, value: &CqlValue) -> Result<String, ParseError> {
        format_element(&self.syntax, parser, value)
    }
}

/// Parser for a user-defined type, written `{field: value, ...}`
///
/// Fields are matched by name in any order. A field that is absent or
/// written as unquoted `null` is unset; unset fields are left out when
/// formatting.
#[derive(Debug, Clone)]
pub struct UdtParser {
    name: String,
    fields: Vec<(String, FieldParser)>,
    syntax: CollectionSyntax,
}

impl UdtParser {
    pub fn new(name: impl Into<String>, fields: Vec<(String, FieldParser)>, syntax: CollectionSyntax) -> Self {
        Self { name: name.into(), fields, syntax }
    }

    /// Index of the field called `name`; exact spelling wins over case-folded.
    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(field, _)| field == name)
            .or_else(|| self.fields.iter().position(|(field, _)| field.eq_ignore_ascii_case(name)))
    }

    fn unknown_field(&self, text: &str, name: &str) -> ParseError {
        ParseError::collection(text, format!("{} has no field '{name}'", self.name))
    }

    fn collect(&self, values: Vec<Option<CqlValue>>) -> CqlValue {
        CqlValue::Udt(self.fields.iter().map(|(name, _)| name.clone()).zip(values).collect())
    }

    pub fn parse(&self, text: &str) -> Result<CqlValue, ParseError> {
        let (open, close) = (self.syntax.map_open, self.syntax.map_close);
        let body = text
            .trim()
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
            .ok_or_else(|| ParseError::collection(text, format!("expected {open}...{close} around the {}", self.name)))?;

        let mut values: Vec<Option<CqlValue>> = vec![None; self.fields.len()];
        let mut seen = vec![false; self.fields.len()];
        if body.trim().is_empty() {
            return Ok(self.collect(values));
        }

        let splitter = element_splitter(&self.syntax);
        for raw in splitter.split_raw(body)? {
            let (raw_name, raw_value) = splitter
                .split_once_raw(&raw, self.syntax.key_separator)?
                .ok_or_else(|| {
                    ParseError::collection(raw.trim(), format!("expected field{}value", self.syntax.key_separator))
                })?;
            let name = single_token(&splitter, &raw_name)?.text;
            let index = self.position(&name).ok_or_else(|| self.unknown_field(text, &name))?;
            if seen[index] {
                return Err(ParseError::collection(text, format!("field '{name}' appears twice")));
            }
            seen[index] = true;

            let token = single_token(&splitter, &raw_value)?;
            if token.quoted || !token.text.eq_ignore_ascii_case("null") {
                values[index] = Some(self.fields[index].1.parse(&token.text)?);
            }
        }
        Ok(self.collect(values))
    }

    pub fn format(&self, value: &CqlValue) -> Result<String, ParseError> {
        let CqlValue::Udt(entries) = value else {
            return Err(ParseError::mismatch("udt", value));
        };
        let splitter = element_splitter(&self.syntax);
        let mut parts = Vec::with_capacity(entries.len());
        for (name, field_value) in entries {
            let index = self.position(name).ok_or_else(|| ParseError::UnexpectedField(name.clone()))?;
            let Some(field_value) = field_value else { continue };
            let (field, parser) = &self.fields[index];
            let label = if needs_quoting(&self.syntax, field) { splitter.quote(field) } else { field.clone() };
            parts.push(format!(
                "{label}{}{}",
                self.syntax.key_separator,
                format_element(&self.syntax, parser, field_value)?
            ));
        }

        let mut out = String::new();
        out.push(self.syntax.map_open);
        out.push_str(&parts.join(&self.syntax.delimiter.to_string()));
        out.push(self.syntax.map_close);
        Ok(out)
    }

    pub fn parse_json(&self, value: &Value) -> Result<CqlValue, ParseError> {
        match value {
            Value::Object(object) => {
                let mut values: Vec<Option<CqlValue>> = vec![None; self.fields.len()];
                for (name, field_value) in object {
                    let index = self
                        .position(name)
                        .ok_or_else(|| self.unknown_field(&value.to_string(), name))?;
                    if !field_value.is_null() {
                        values[index] = Some(self.fields[index].1.parse_json(field_value)?);
                    }
                }
                Ok(self.collect(values))
            },
            Value::String(text) => self.parse(text),
            other => Err(ParseError::invalid("udt", other.to_string())),
        }
    }

    pub fn format_json(&self, value: &CqlValue) -> Result<Value, ParseError> {
        let CqlValue::Udt(entries) = value else {
            return Err(ParseError::mismatch("udt", value));
        };
        let mut object = serde_json::Map::with_capacity(entries.len());
        for (name, field_value) in entries {
            let index = self.position(name).ok_or_else(|| ParseError::UnexpectedField(name.clone()))?;
            if let Some(field_value) = field_value {
                let (field, parser) = &self.fields[index];
                object.insert(field.clone(), parser.format_json(field_value)?);
            }
        }
        Ok(Value::Object(object))
    }
}

fn element_splitter(syntax: &CollectionSyntax) -> FieldSplitter {
    FieldSplitter {
        delimiter: syntax.delimiter,
        quote: syntax.quote,
        escape: syntax.escape,
        max_chars: usize::MAX,
        nesting: true,
    }
}

fn format_element(syntax: &CollectionSyntax, parser: &FieldParser, value: &CqlValue) -> Result<String, ParseError> {
    let text = parser.format(value)?;
    if parser.is_collection() {
        return Ok(text);
    }
    if parser.is_text_like() || needs_quoting(syntax, &text) {
        Ok(element_splitter(syntax).quote(&text))
    } else {
        Ok(text)
    }
}

fn needs_quoting(syntax: &CollectionSyntax, text: &str) -> bool {
    text.is_empty()
        || text.eq_ignore_ascii_case("null")
        || element_splitter(syntax).needs_quoting(text)
        || text.chars().any(|c| {
            c == syntax.key_separator
                || c == syntax.escape
                || matches!(c, '[' | ']' | '{' | '}' | '(' | ')')
        })
}

fn single_token(splitter: &FieldSplitter, raw: &str) -> Result<Token, ParseError> {
    let mut tokens = splitter.split(raw)?;
    match tokens.len() {
        1 => Ok(tokens.remove(0)),
        _ => Err(ParseError::collection(raw.trim(), "unexpected delimiter")),
    }
}

fn parse_element(parser: &FieldParser, token: &Token) -> Result<CqlValue, ParseError> {
    if !token.quoted && token.text.eq_ignore_ascii_case("null") {
        return Err(ParseError::NullElement);
    }
    parser.parse(&token.text)
}
