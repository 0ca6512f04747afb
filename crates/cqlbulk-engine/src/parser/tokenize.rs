//! Quote-aware field splitting shared by the record and collection parsers

use super::ParseError;

/// One split field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Field text with surrounding quotes and escapes removed
    pub text: String,
    /// Whether the field was enclosed in quote characters
    pub quoted: bool,
}

impl Token {
    pub fn unquoted(text: impl Into<String>) -> Self {
        Token { text: text.into(), quoted: false }
    }
}

/// Delimiter, quote and escape characters plus a per-field length guard
///
/// Inside a quoted field `escape` followed by `quote` or `escape` yields that
/// character, any other escape sequence is kept verbatim, and a doubled quote
/// is a literal quote. Unquoted fields are trimmed and taken as-is. With
/// `nesting` enabled, brackets and quoted sections inside an unquoted field
/// are skipped over so nested collections stay in one piece; a field that
/// opens with `[` or `{` is always read that way.
#[derive(Debug, Clone)]
pub struct FieldSplitter {
    pub delimiter: char,
    pub quote: char,
    pub escape: char,
    pub max_chars: usize,
    pub nesting: bool,
}

impl FieldSplitter {
    pub fn split(&self, input: &str) -> Result<Vec<Token>, ParseError> {
        let chars: Vec<char> = input.chars().collect();
        let mut tokens = Vec::new();
        let mut pos = 0;
        loop {
            let (token, next) = self.read_field(&chars, pos)?;
            tokens.push(token);
            match next {
                Some(p) => pos = p,
                None => return Ok(tokens),
            }
        }
    }

    /// Quote `text` so that [`FieldSplitter::split`] yields it back unchanged.
    pub fn quote(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 2);
        out.push(self.quote);
        for c in text.chars() {
            if c == self.quote || c == self.escape {
                out.push(self.escape);
            }
            out.push(c);
        }
        out.push(self.quote);
        out
    }

    /// Whether `text` must be quoted to survive a split
    pub fn needs_quoting(&self, text: &str) -> bool {
        text.starts_with(char::is_whitespace)
            || text.ends_with(char::is_whitespace)
            || text
                .chars()
                .any(|c| c == self.delimiter || c == self.quote || c == '\n' || c == '\r')
    }

    fn is_blank(&self, c: char) -> bool {
        (c == ' ' || c == '\t') && c != self.delimiter
    }

    fn read_field(
        &self,
        chars: &[char],
        start: usize,
    ) -> Result<(Token, Option<usize>), ParseError> {
        let mut i = start;
        while i < chars.len() && self.is_blank(chars[i]) {
            i += 1;
        }

        match chars.get(i) {
            Some(&c) if c == self.quote => self.read_quoted(chars, i + 1),
            // an unquoted collection keeps its inner delimiters
            Some('[' | '{') => self.read_unquoted(chars, start, true),
            _ => self.read_unquoted(chars, start, self.nesting),
        }
    }

    fn read_quoted(
        &self,
        chars: &[char],
        start: usize,
    ) -> Result<(Token, Option<usize>), ParseError> {
        let mut text = String::new();
        let mut count = 0usize;
        let mut i = start;

        loop {
            let c = *chars.get(i).ok_or(ParseError::UnterminatedQuote)?;
            let next = chars.get(i + 1).copied();

            if c == self.escape && c != self.quote && (next == Some(self.quote) || next == Some(self.escape)) {
                text.push(next.unwrap_or(c));
                i += 2;
            } else if c == self.quote {
                if next == Some(self.quote) {
                    text.push(c);
                    i += 2;
                } else {
                    i += 1;
                    break;
                }
            } else {
                text.push(c);
                i += 1;
            }

            count += 1;
            if count > self.max_chars {
                return Err(ParseError::FieldTooLong { limit: self.max_chars });
            }
        }

        while i < chars.len() && self.is_blank(chars[i]) {
            i += 1;
        }
        let token = Token { text, quoted: true };
        match chars.get(i) {
            None => Ok((token, None)),
            Some(&c) if c == self.delimiter => Ok((token, Some(i + 1))),
            Some(&c) => Err(ParseError::TrailingCharacters(c)),
        }
    }

    fn read_unquoted(
        &self,
        chars: &[char],
        start: usize,
        nesting: bool,
    ) -> Result<(Token, Option<usize>), ParseError> {
        let i = self.scan(chars, start, self.delimiter, nesting)?;
        let raw: String = chars[start..i].iter().collect();
        let text = raw.trim();
        if text.chars().count() > self.max_chars {
            return Err(ParseError::FieldTooLong { limit: self.max_chars });
        }

        let next = if i < chars.len() { Some(i + 1) } else { None };
        Ok((Token::unquoted(text), next))
    }

    /// Index of the first `stop` character at or after `start` that is outside
    /// brackets and quoted sections (when `nesting`), or the input length.
    fn scan(&self, chars: &[char], start: usize, stop: char, nesting: bool) -> Result<usize, ParseError> {
        let mut depth = 0usize;
        let mut i = start;

        while i < chars.len() {
            let c = chars[i];
            if c == stop && depth == 0 {
                break;
            }
            if nesting {
                match c {
                    '[' | '{' | '(' => depth += 1,
                    ']' | '}' | ')' => depth = depth.saturating_sub(1),
                    _ if c == self.quote => {
                        i = self.skip_quoted(chars, i + 1)?;
                        continue;
                    },
                    _ => {},
                }
            }
            i += 1;
        }
        Ok(i)
    }

    /// Splits on top-level delimiters, leaving quotes and escapes in place.
    pub fn split_raw(&self, input: &str) -> Result<Vec<String>, ParseError> {
        let chars: Vec<char> = input.chars().collect();
        let mut parts = Vec::new();
        let mut pos = 0;
        loop {
            let end = self.scan(&chars, pos, self.delimiter, true)?;
            parts.push(chars[pos..end].iter().collect());
            if end >= chars.len() {
                return Ok(parts);
            }
            pos = end + 1;
        }
    }

    /// Splits at the first top-level `separator`, leaving both halves raw.
    pub fn split_once_raw(&self, input: &str, separator: char) -> Result<Option<(String, String)>, ParseError> {
        let chars: Vec<char> = input.chars().collect();
        let at = self.scan(&chars, 0, separator, true)?;
        if at >= chars.len() {
            return Ok(None);
        }
        Ok(Some((chars[..at].iter().collect(), chars[at + 1..].iter().collect())))
    }

    /// Returns the index just past the closing quote of a section starting at `i`.
    fn skip_quoted(&self, chars: &[char], mut i: usize) -> Result<usize, ParseError> {
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            if c == self.escape && c != self.quote && (next == Some(self.quote) || next == Some(self.escape)) {
                i += 2;
            } else if c == self.quote {
                if next == Some(self.quote) {
                    i += 2;
                } else {
                    return Ok(i + 1);
                }
            } else {
                i += 1;
            }
        }
        Err(ParseError::UnterminatedQuote)
    }
}
