//! Job configuration
//!
//! Collaborators hand the engine validated configuration. Every struct has a
//! `Default` built from the `DEFAULT_*` constants below, can be deserialized
//! with serde, and can be overlaid from `CQLBULK_*` environment variables.

use crate::parser::collection::CollectionSyntax;
use crate::parser::numeric::NumberLocale;
use crate::parser::scalar::{BlobEncoding, BoolStyle};
use crate::parser::temporal::{fits_date, fits_time, fits_timestamp};
use crate::partitioner::TokenSpace;
use crate::session::Consistency;
use cqlbulk_common::{BulkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Parser Defaults
// ============================================================================

/// Default field delimiter.
pub const DEFAULT_DELIMITER: char = ',';

/// Default quote character.
pub const DEFAULT_QUOTE: char = '"';

/// Default escape character inside quoted fields.
pub const DEFAULT_ESCAPE: char = '\\';

/// Default null sentinel: an empty unquoted field.
pub const DEFAULT_NULL_STRING: &str = "";

/// Default per-field character limit.
pub const DEFAULT_MAX_CHARS_PER_FIELD: usize = 4096;

/// Default decimal separator.
pub const DEFAULT_DECIMAL_SEPARATOR: char = '.';

// ============================================================================
// Load Defaults
// ============================================================================

/// Default number of requests in flight across the whole job.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1000;

/// Default rows per statement; 1 disables batching.
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Default per-request client timeout in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 2000;

/// Default write-timeout retries.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Default tolerated parse errors per source.
pub const DEFAULT_MAX_PARSE_ERRORS: u64 = 10;

/// Default tolerated request errors per source.
pub const DEFAULT_MAX_INSERT_ERRORS: u64 = 10;

/// Default number of concurrently running workers.
pub const DEFAULT_NUM_WORKERS: usize = 5;

/// Default completions between progress log lines.
pub const DEFAULT_PROGRESS_EVERY: u64 = 100_000;

/// Default dispatch rate in rows per second.
pub const DEFAULT_RATE: f64 = 50_000.0;

// ============================================================================
// Adaptive Rate Defaults
// ============================================================================

/// Default interval between stat samples in milliseconds.
pub const DEFAULT_ADAPT_INTERVAL_MS: u64 = 1000;

/// Default fraction removed from the rate when the stat is above the band.
pub const DEFAULT_DOWN_FRACTION: f64 = 0.1;

/// Default fraction added to the rate when the stat is below the band.
pub const DEFAULT_UP_FRACTION: f64 = 0.05;

/// Text <-> value conversion settings shared by load and unload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    pub delimiter: char,
    pub quote: char,
    pub escape: char,
    /// Unquoted field text meaning "no value"
    pub null_string: String,
    /// Lines starting with this prefix are ignored
    pub comment: Option<String>,
    pub max_chars_per_field: usize,
    pub decimal_separator: char,
    /// Implied by `decimal_separator` when unset
    pub grouping_separator: Option<char>,
    /// Accept and emit digit grouping in numbers
    pub grouping: bool,
    pub bool_style: BoolStyle,
    /// Custom `(true, false)` tokens, overriding `bool_style`
    pub bool_tokens: Option<(String, String)>,
    pub blob_encoding: BlobEncoding,
    /// chrono format; RFC 3339 when unset
    pub timestamp_pattern: Option<String>,
    pub date_pattern: Option<String>,
    pub time_pattern: Option<String>,
    pub collections: CollectionSyntax,
    /// Zero-based input positions dropped before type conversion
    pub skip_columns: Vec<usize>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            quote: DEFAULT_QUOTE,
            escape: DEFAULT_ESCAPE,
            null_string: DEFAULT_NULL_STRING.to_string(),
            comment: None,
            max_chars_per_field: DEFAULT_MAX_CHARS_PER_FIELD,
            decimal_separator: DEFAULT_DECIMAL_SEPARATOR,
            grouping_separator: None,
            grouping: false,
            bool_style: BoolStyle::default(),
            bool_tokens: None,
            blob_encoding: BlobEncoding::default(),
            timestamp_pattern: None,
            date_pattern: None,
            time_pattern: None,
            collections: CollectionSyntax::default(),
            skip_columns: Vec::new(),
        }
    }
}

impl ParserOptions {
    /// Overlays `CQLBULK_DELIMITER`, `CQLBULK_NULL_STRING`, `CQLBULK_DECIMAL_SEPARATOR`,
    /// `CQLBULK_GROUPING_SEPARATOR` (which also turns grouping on),
    /// `CQLBULK_BOOL_STYLE`, `CQLBULK_DATE_FORMAT`, `CQLBULK_TIMESTAMP_FORMAT`,
    /// `CQLBULK_TIME_FORMAT` and `CQLBULK_MAX_CHARS_PER_FIELD`.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();

        if let Ok(delim) = std::env::var("CQLBULK_DELIMITER") {
            options.delimiter = parse_delimiter(&delim)?;
        }
        if let Ok(null) = std::env::var("CQLBULK_NULL_STRING") {
            options.null_string = null;
        }
        if let Ok(sep) = std::env::var("CQLBULK_DECIMAL_SEPARATOR") {
            options.decimal_separator = parse_delimiter(&sep)?;
        }
        if let Ok(sep) = std::env::var("CQLBULK_GROUPING_SEPARATOR") {
            options.grouping_separator = Some(parse_delimiter(&sep)?);
            options.grouping = true;
        }
        if let Ok(style) = std::env::var("CQLBULK_BOOL_STYLE") {
            options.bool_style = style.parse().map_err(BulkError::Config)?;
        }
        options.date_pattern = std::env::var("CQLBULK_DATE_FORMAT").ok().or(options.date_pattern);
        options.timestamp_pattern =
            std::env::var("CQLBULK_TIMESTAMP_FORMAT").ok().or(options.timestamp_pattern);
        options.time_pattern = std::env::var("CQLBULK_TIME_FORMAT").ok().or(options.time_pattern);
        options.max_chars_per_field =
            env_or("CQLBULK_MAX_CHARS_PER_FIELD", options.max_chars_per_field);

        options.validate()?;
        Ok(options)
    }

    pub fn number_locale(&self) -> NumberLocale {
        NumberLocale::new(self.decimal_separator, self.grouping_separator)
    }

    pub fn validate(&self) -> Result<()> {
        if self.delimiter == self.quote {
            return Err(BulkError::config("delimiter and quote must differ"));
        }
        if self.max_chars_per_field == 0 {
            return Err(BulkError::config("max_chars_per_field must be greater than 0"));
        }
        let locale = self.number_locale();
        if (self.grouping || self.grouping_separator.is_some())
            && locale.grouping_separator == locale.decimal_separator
        {
            return Err(BulkError::config("grouping and decimal separators must differ"));
        }
        if let Some((t, f)) = &self.bool_tokens {
            if t.is_empty() || f.is_empty() || t.eq_ignore_ascii_case(f) {
                return Err(BulkError::config("boolean tokens must be distinct and non-empty"));
            }
        }
        let patterns: [(&Option<String>, &str, fn(&str) -> bool); 3] = [
            (&self.timestamp_pattern, "timestamp", fits_timestamp),
            (&self.date_pattern, "date", fits_date),
            (&self.time_pattern, "time", fits_time),
        ];
        for (pattern, kind, fits) in patterns {
            if let Some(pattern) = pattern {
                if !fits(pattern) {
                    return Err(BulkError::Config(format!("invalid {kind} pattern '{pattern}'")));
                }
            }
        }
        let c = &self.collections;
        if c.delimiter == c.quote || c.delimiter == c.key_separator {
            return Err(BulkError::config(
                "collection delimiter must differ from quote and key separator",
            ));
        }
        Ok(())
    }

    /// Checks skip positions against the number of bound columns
    ///
    /// A line has `columns` fields plus one per skipped position; a skip
    /// index outside that range would never match a field.
    pub fn validate_skip_columns(&self, columns: usize) -> Result<()> {
        let skipped: BTreeSet<usize> = self.skip_columns.iter().copied().collect();
        let fields = columns + skipped.len();
        if let Some(position) = skipped.iter().find(|&&p| p >= fields) {
            return Err(BulkError::Config(format!(
                "skip column {position} is outside the {fields} input fields"
            )));
        }
        Ok(())
    }
}

/// Accepts a single character or the two-character alias `\t`.
pub fn parse_delimiter(text: &str) -> Result<char> {
    if text == "\\t" {
        return Ok('\t');
    }
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(BulkError::Config(format!("delimiter must be one character, got '{text}'"))),
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Feedback-driven throttle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub interval_ms: u64,
    /// Upper edge of the acceptable stat band
    pub max_stat: f64,
    /// Lower edge of the acceptable stat band
    pub min_stat: f64,
    pub down_fraction: f64,
    pub up_fraction: f64,
    /// Swap the adjustment directions
    pub invert: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_ADAPT_INTERVAL_MS,
            max_stat: f64::MAX,
            min_stat: 0.0,
            down_fraction: DEFAULT_DOWN_FRACTION,
            up_fraction: DEFAULT_UP_FRACTION,
            invert: false,
        }
    }
}

impl AdaptiveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_stat > self.max_stat {
            return Err(BulkError::Config(format!(
                "min_stat ({}) cannot be greater than max_stat ({})",
                self.min_stat, self.max_stat
            )));
        }
        if !(0.0..1.0).contains(&self.down_fraction) || self.up_fraction < 0.0 {
            return Err(BulkError::config(
                "down_fraction must be in [0, 1) and up_fraction non-negative",
            ));
        }
        Ok(())
    }
}

/// Dispatch throttle; `rows_per_second: None` disables throttling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    pub rows_per_second: Option<f64>,
    pub adaptive: Option<AdaptiveConfig>,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self { rows_per_second: Some(DEFAULT_RATE), adaptive: None }
    }
}

impl RateConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(rate) = self.rows_per_second {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(BulkError::Config(format!("rate must be positive, got {rate}")));
            }
        } else if self.adaptive.is_some() {
            return Err(BulkError::config("adaptive throttling needs a starting rate"));
        }
        if let Some(adaptive) = &self.adaptive {
            adaptive.validate()?;
        }
        Ok(())
    }
}

/// Input record encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    #[default]
    Delimited,
    /// One JSON object per line
    JsonLines,
    /// A single JSON array of objects
    JsonArray,
}

impl FromStr for InputFormat {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "delim" | "delimited" => Ok(InputFormat::Delimited),
            "jsonline" | "json_lines" | "jsonl" => Ok(InputFormat::JsonLines),
            "jsonarray" | "json_array" => Ok(InputFormat::JsonArray),
            other => Err(BulkError::Config(format!("unknown input format '{other}'"))),
        }
    }
}

/// Load job settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub parser: ParserOptions,
    pub format: InputFormat,
    pub batch_size: usize,
    /// Requests in flight for the whole job, divided among workers
    pub max_in_flight: usize,
    pub query_timeout_ms: u64,
    pub max_retries: u32,
    pub max_parse_errors: u64,
    pub max_insert_errors: u64,
    /// Data lines ignored at the start of each source
    pub skip_rows: u64,
    /// Stop after this many data lines per source
    pub max_rows: Option<u64>,
    /// Bind absent values as unset instead of null
    pub nulls_unset: bool,
    pub consistency: Consistency,
    pub ttl: Option<u32>,
    pub num_workers: usize,
    pub progress_every: u64,
    pub rate: RateConfig,
    /// Minimum similarity (0.0 to 1.0) for header-to-column matching.
    /// When set, the first line of each delimited source is a header whose
    /// fields pick and order the bound columns.
    pub header_match_threshold: Option<f64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            parser: ParserOptions::default(),
            format: InputFormat::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_parse_errors: DEFAULT_MAX_PARSE_ERRORS,
            max_insert_errors: DEFAULT_MAX_INSERT_ERRORS,
            skip_rows: 0,
            max_rows: None,
            nulls_unset: false,
            consistency: Consistency::LocalOne,
            ttl: None,
            num_workers: DEFAULT_NUM_WORKERS,
            progress_every: DEFAULT_PROGRESS_EVERY,
            rate: RateConfig::default(),
            header_match_threshold: None,
        }
    }
}

impl LoadConfig {
    /// Defaults overlaid with `CQLBULK_*` variables, validated
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            parser: ParserOptions::from_env()?,
            format: match std::env::var("CQLBULK_FORMAT") {
                Ok(f) => f.parse()?,
                Err(_) => defaults.format,
            },
            batch_size: env_or("CQLBULK_BATCH_SIZE", defaults.batch_size),
            max_in_flight: env_or("CQLBULK_NUM_FUTURES", defaults.max_in_flight),
            query_timeout_ms: env_or("CQLBULK_QUERY_TIMEOUT_MS", defaults.query_timeout_ms),
            max_retries: env_or("CQLBULK_NUM_RETRIES", defaults.max_retries),
            max_parse_errors: env_or("CQLBULK_MAX_ERRORS", defaults.max_parse_errors),
            max_insert_errors: env_or("CQLBULK_MAX_INSERT_ERRORS", defaults.max_insert_errors),
            skip_rows: env_or("CQLBULK_SKIP_ROWS", defaults.skip_rows),
            max_rows: std::env::var("CQLBULK_MAX_ROWS").ok().and_then(|s| s.parse().ok()),
            nulls_unset: env_or("CQLBULK_NULLS_UNSET", defaults.nulls_unset),
            consistency: env_or("CQLBULK_CONSISTENCY", defaults.consistency),
            ttl: std::env::var("CQLBULK_TTL").ok().and_then(|s| s.parse().ok()),
            num_workers: env_or("CQLBULK_NUM_THREADS", defaults.num_workers),
            progress_every: env_or("CQLBULK_PROGRESS_EVERY", defaults.progress_every),
            rate: RateConfig {
                rows_per_second: std::env::var("CQLBULK_RATE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .or(defaults.rate.rows_per_second),
                adaptive: None,
            },
            header_match_threshold: std::env::var("CQLBULK_HEADER_MATCH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// In-flight capacity of one worker
    pub fn per_worker_in_flight(&self) -> usize {
        (self.max_in_flight / self.num_workers.max(1)).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        self.parser.validate()?;
        self.rate.validate()?;

        if self.batch_size == 0 {
            return Err(BulkError::config("batch_size must be greater than 0"));
        }
        if self.max_in_flight == 0 {
            return Err(BulkError::config("max_in_flight must be greater than 0"));
        }
        if self.num_workers == 0 {
            return Err(BulkError::config("num_workers must be greater than 0"));
        }
        if self.max_insert_errors == 0 {
            return Err(BulkError::config("max_insert_errors must be greater than 0"));
        }
        if self.query_timeout_ms == 0 {
            return Err(BulkError::config("query_timeout_ms must be greater than 0"));
        }
        if self.max_rows == Some(0) {
            return Err(BulkError::config("max_rows must be greater than 0 when set"));
        }
        if self.progress_every == 0 {
            return Err(BulkError::config("progress_every must be greater than 0"));
        }
        if let Some(threshold) = self.header_match_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(BulkError::Config(format!(
                    "header_match_threshold must be within [0, 1], got {threshold}"
                )));
            }
        }
        if self.format != InputFormat::Delimited && !self.parser.skip_columns.is_empty() {
            return Err(BulkError::config("skip_columns only applies to delimited input"));
        }
        if self.format != InputFormat::Delimited && self.header_match_threshold.is_some() {
            return Err(BulkError::config("header matching only applies to delimited input"));
        }
        Ok(())
    }
}

/// Output record encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Delimited,
    /// One JSON object per line
    Json,
}

/// Unload job settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnloadConfig {
    pub parser: ParserOptions,
    pub format: OutputFormat,
    pub num_workers: usize,
    /// Token bounds as decimal text; the full ring of `token_space` when unset
    pub begin_token: Option<String>,
    pub end_token: Option<String>,
    pub token_space: TokenSpace,
    /// Extra CQL predicate ANDed to the token restriction
    pub where_clause: Option<String>,
    pub consistency: Consistency,
}

impl Default for UnloadConfig {
    fn default() -> Self {
        Self {
            parser: ParserOptions::default(),
            format: OutputFormat::default(),
            num_workers: DEFAULT_NUM_WORKERS,
            begin_token: None,
            end_token: None,
            token_space: TokenSpace::default(),
            where_clause: None,
            consistency: Consistency::LocalOne,
        }
    }
}

impl UnloadConfig {
    pub fn validate(&self) -> Result<()> {
        self.parser.validate()?;
        if self.num_workers == 0 {
            return Err(BulkError::config("num_workers must be greater than 0"));
        }
        if self.begin_token.is_some() != self.end_token.is_some() {
            return Err(BulkError::config("begin_token and end_token must be set together"));
        }
        self.token_bounds()?;
        Ok(())
    }

    /// Resolved `(begin, end)` bounds for the job
    pub fn token_bounds(&self) -> Result<(num_bigint::BigInt, num_bigint::BigInt)> {
        let (full_begin, full_end) = self.token_space.full_range();
        let parse = |text: &Option<String>, fallback: num_bigint::BigInt| match text {
            Some(t) => t
                .trim()
                .parse::<num_bigint::BigInt>()
                .map_err(|_| BulkError::Config(format!("invalid token '{t}'"))),
            None => Ok(fallback),
        };
        let begin = parse(&self.begin_token, full_begin)?;
        let end = parse(&self.end_token, full_end)?;
        if begin >= end {
            return Err(BulkError::Config(format!(
                "begin token ({begin}) must be below end token ({end})"
            )));
        }
        Ok((begin, end))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_validate() {
        assert!(LoadConfig::default().validate().is_ok());
        assert!(UnloadConfig::default().validate().is_ok());
        assert_eq!(LoadConfig::default().per_worker_in_flight(), 200);
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("\\t").unwrap(), '\t');
        assert_eq!(parse_delimiter("|").unwrap(), '|');
        assert!(parse_delimiter("||").is_err());
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn test_invalid_load_settings() {
        let mut config = LoadConfig { batch_size: 0, ..Default::default() };
        assert!(config.validate().is_err());

        config = LoadConfig { header_match_threshold: Some(1.5), ..Default::default() };
        assert!(config.validate().is_err());

        config = LoadConfig::default();
        config.parser.date_pattern = Some("%Y-%Q".into());
        assert!(config.validate().is_err());

        config = LoadConfig::default();
        config.parser.date_pattern = Some("%Y-%m-%d %H".into());
        assert!(config.validate().is_err());
        config.parser.date_pattern = None;
        config.parser.time_pattern = Some("%d.%m %H:%M".into());
        assert!(config.validate().is_err());
        config.parser.time_pattern = Some("%H:%M".into());
        config.parser.timestamp_pattern = Some("%d.%m.%Y %H:%M".into());
        assert!(config.validate().is_ok());

        config = LoadConfig::default();
        config.parser.decimal_separator = ',';
        config.parser.grouping_separator = Some(',');
        assert!(config.validate().is_err());
        config.parser.grouping_separator = Some('.');
        assert!(config.validate().is_ok());

        config = LoadConfig::default();
        config.rate.adaptive = Some(AdaptiveConfig { min_stat: 10.0, max_stat: 5.0, ..Default::default() });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_skip_columns_must_fall_within_the_line() {
        let options = ParserOptions { skip_columns: vec![0, 3], ..Default::default() };
        assert!(options.validate_skip_columns(2).is_ok());
        assert!(options.validate_skip_columns(1).is_err());

        let repeated = ParserOptions { skip_columns: vec![2, 2], ..Default::default() };
        assert!(repeated.validate_skip_columns(2).is_ok());
        assert!(repeated.validate_skip_columns(1).is_err());

        let json = LoadConfig {
            format: InputFormat::JsonLines,
            header_match_threshold: Some(0.8),
            ..Default::default()
        };
        assert!(json.validate().is_err());
    }

    #[test]
    fn test_unload_token_bounds() {
        let config = UnloadConfig {
            begin_token: Some("-100".into()),
            end_token: Some("100".into()),
            ..Default::default()
        };
        let (b, e) = config.token_bounds().unwrap();
        assert_eq!(b, (-100).into());
        assert_eq!(e, 100.into());

        let reversed = UnloadConfig {
            begin_token: Some("5".into()),
            end_token: Some("5".into()),
            ..Default::default()
        };
        assert!(reversed.validate().is_err());

        let half = UnloadConfig { begin_token: Some("1".into()), ..Default::default() };
        assert!(half.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: LoadConfig = serde_json::from_str(
            r#"{"batch_size": 20, "format": "json_lines", "parser": {"delimiter": "|"}}"#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.format, InputFormat::JsonLines);
        assert_eq!(config.parser.delimiter, '|');
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
    }

    #[test]
    #[serial]
    fn test_load_config_from_env() {
        std::env::set_var("CQLBULK_DELIMITER", "\\t");
        std::env::set_var("CQLBULK_NUM_FUTURES", "64");
        std::env::set_var("CQLBULK_FORMAT", "jsonarray");
        std::env::set_var("CQLBULK_CONSISTENCY", "QUORUM");
        let config = LoadConfig::from_env();
        for key in ["CQLBULK_DELIMITER", "CQLBULK_NUM_FUTURES", "CQLBULK_FORMAT", "CQLBULK_CONSISTENCY"] {
            std::env::remove_var(key);
        }

        let config = config.unwrap();
        assert_eq!(config.parser.delimiter, '\t');
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.format, InputFormat::JsonArray);
        assert_eq!(config.consistency, Consistency::Quorum);
    }
}
