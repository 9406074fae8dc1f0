//! Structured-literal parser.
//!
//! Parses the JSON-like argument payloads of document queries into BSON
//! values. The accepted language is closed: objects, arrays, strings,
//! numbers, booleans, `null`, regex literals and a fixed set of constructor
//! forms (`ObjectId`, `ISODate`, `new Date`, `NumberInt`, `NumberLong`).
//! Nothing here evaluates code; any other identifier, call or operator is
//! rejected as malformed.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use mongodb::bson::{oid::ObjectId, Bson, DateTime as BsonDateTime, Document, Regex};

use common::errors::{AppError, AppResult};

/// Maximum nesting of objects and arrays.
const MAX_DEPTH: usize = 64;

/// Character cursor shared by the literal and document-query parsers.
pub(crate) struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    pub(crate) fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub(crate) fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Consumes `c` (after whitespace) if it is next.
    pub(crate) fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn is_eof(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.src.len()
    }

    /// Reads `[A-Za-z_$][A-Za-z0-9_$]*`.
    pub(crate) fn ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
            _ => return None,
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            self.bump();
        }
        Some(&self.src[start..self.pos])
    }

    /// Reads a run of characters accepted by `accept`.
    pub(crate) fn take_while(&mut self, accept: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&accept) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    pub(crate) fn malformed(&self, msg: impl std::fmt::Display) -> AppError {
        AppError::MalformedArguments(format!("{} (at offset {})", msg, self.pos))
    }

    fn expect(&mut self, c: char) -> AppResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.malformed(format!("expected `{}`", c)))
        }
    }
}

/// Parses a complete literal; trailing text is an error.
pub fn parse_literal(text: &str) -> AppResult<Bson> {
    let mut cursor = Cursor::new(text);
    let value = parse_value(&mut cursor)?;
    if !cursor.is_eof() {
        return Err(cursor.malformed("unexpected trailing input"));
    }
    Ok(value)
}

/// Parses one literal value at the cursor.
pub(crate) fn parse_value(cursor: &mut Cursor<'_>) -> AppResult<Bson> {
    value_at_depth(cursor, 0)
}

fn value_at_depth(cursor: &mut Cursor<'_>, depth: usize) -> AppResult<Bson> {
    if depth > MAX_DEPTH {
        return Err(cursor.malformed("literal is nested too deeply"));
    }
    cursor.skip_ws();
    match cursor.peek() {
        Some('{') => parse_object(cursor, depth).map(Bson::Document),
        Some('[') => parse_array(cursor, depth),
        Some('"') | Some('\'') => parse_string(cursor).map(Bson::String),
        Some('/') => parse_regex(cursor),
        Some(c) if c == '-' || c == '.' || c.is_ascii_digit() => parse_number(cursor),
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => parse_word(cursor),
        Some(c) => Err(cursor.malformed(format!("unexpected character `{}`", c))),
        None => Err(cursor.malformed("unexpected end of input")),
    }
}

fn parse_object(cursor: &mut Cursor<'_>, depth: usize) -> AppResult<Document> {
    cursor.expect('{')?;
    let mut doc = Document::new();
    loop {
        if cursor.eat('}') {
            return Ok(doc);
        }
        cursor.skip_ws();
        let key = match cursor.peek() {
            Some('"') | Some('\'') => parse_string(cursor)?,
            _ => cursor
                .ident()
                .map(str::to_string)
                .ok_or_else(|| cursor.malformed("expected an object key"))?,
        };
        cursor.expect(':')?;
        let value = value_at_depth(cursor, depth + 1)?;
        doc.insert(key, value);
        if !cursor.eat(',') {
            cursor.expect('}')?;
            return Ok(doc);
        }
    }
}

fn parse_array(cursor: &mut Cursor<'_>, depth: usize) -> AppResult<Bson> {
    cursor.expect('[')?;
    let mut items = Vec::new();
    loop {
        if cursor.eat(']') {
            return Ok(Bson::Array(items));
        }
        items.push(value_at_depth(cursor, depth + 1)?);
        if !cursor.eat(',') {
            cursor.expect(']')?;
            return Ok(Bson::Array(items));
        }
    }
}

fn parse_string(cursor: &mut Cursor<'_>) -> AppResult<String> {
    cursor.skip_ws();
    let quote = cursor
        .bump()
        .filter(|q| *q == '"' || *q == '\'')
        .ok_or_else(|| cursor.malformed("expected a string"))?;
    let mut out = String::new();
    loop {
        let c = cursor
            .bump()
            .ok_or_else(|| cursor.malformed("unterminated string"))?;
        match c {
            c if c == quote => return Ok(out),
            '\\' => {
                let escaped = cursor
                    .bump()
                    .ok_or_else(|| cursor.malformed("unterminated string"))?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'v' => out.push('\u{b}'),
                    '0' => out.push('\0'),
                    'u' => out.push(parse_unicode_escape(cursor)?),
                    other => out.push(other),
                }
            }
            '\n' => return Err(cursor.malformed("newline in string literal")),
            c => out.push(c),
        }
    }
}

fn hex4(cursor: &mut Cursor<'_>) -> AppResult<u32> {
    let mut code = 0u32;
    for _ in 0..4 {
        let digit = cursor
            .bump()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| cursor.malformed("invalid \\u escape"))?;
        code = code * 16 + digit;
    }
    Ok(code)
}

fn parse_unicode_escape(cursor: &mut Cursor<'_>) -> AppResult<char> {
    let high = hex4(cursor)?;
    let code = if (0xD800..0xDC00).contains(&high) {
        if cursor.bump() != Some('\\') || cursor.bump() != Some('u') {
            return Err(cursor.malformed("unpaired surrogate in \\u escape"));
        }
        let low = hex4(cursor)?;
        if !(0xDC00..0xE000).contains(&low) {
            return Err(cursor.malformed("unpaired surrogate in \\u escape"));
        }
        0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
    } else {
        high
    };
    char::from_u32(code).ok_or_else(|| cursor.malformed("invalid \\u escape"))
}

fn parse_number(cursor: &mut Cursor<'_>) -> AppResult<Bson> {
    cursor.skip_ws();
    let text = cursor.take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.'));
    number_from_text(text).ok_or_else(|| cursor.malformed(format!("invalid number `{}`", text)))
}

fn number_from_text(text: &str) -> Option<Bson> {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    if unsigned.is_empty() || !unsigned.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if unsigned.chars().all(|c| c.is_ascii_digit()) {
        let n: i64 = text.parse().ok()?;
        return Some(match i32::try_from(n) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(n),
        });
    }
    let valid = unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !valid {
        return None;
    }
    let f: f64 = text.parse().ok()?;
    f.is_finite().then_some(Bson::Double(f))
}

fn parse_regex(cursor: &mut Cursor<'_>) -> AppResult<Bson> {
    cursor.bump();
    let mut pattern = String::new();
    let mut in_class = false;
    loop {
        let c = cursor
            .bump()
            .ok_or_else(|| cursor.malformed("unterminated regular expression"))?;
        match c {
            '\\' => {
                let next = cursor
                    .bump()
                    .ok_or_else(|| cursor.malformed("unterminated regular expression"))?;
                if next != '/' {
                    pattern.push('\\');
                }
                pattern.push(next);
            }
            '[' => {
                in_class = true;
                pattern.push(c);
            }
            ']' => {
                in_class = false;
                pattern.push(c);
            }
            '/' if !in_class => break,
            '\n' => return Err(cursor.malformed("newline in regular expression")),
            c => pattern.push(c),
        }
    }
    let flags = cursor.take_while(|c| c.is_ascii_alphabetic());
    let mut options: Vec<char> = Vec::new();
    for flag in flags.chars() {
        match flag {
            'i' | 'm' | 's' | 'x' => {
                if !options.contains(&flag) {
                    options.push(flag);
                }
            }
            'u' => {}
            other => {
                return Err(cursor.malformed(format!("unsupported regex flag `{}`", other)))
            }
        }
    }
    options.sort_unstable();
    Ok(Bson::RegularExpression(Regex {
        pattern,
        options: options.into_iter().collect(),
    }))
}

/// Keywords and constructor forms.
fn parse_word(cursor: &mut Cursor<'_>) -> AppResult<Bson> {
    let word = cursor
        .ident()
        .ok_or_else(|| cursor.malformed("expected a value"))?;
    match word {
        "true" => Ok(Bson::Boolean(true)),
        "false" => Ok(Bson::Boolean(false)),
        "null" => Ok(Bson::Null),
        "new" => {
            let ctor = cursor
                .ident()
                .ok_or_else(|| cursor.malformed("expected a constructor after `new`"))?;
            match ctor {
                "Date" => parse_date_ctor(cursor),
                "ObjectId" => parse_object_id(cursor),
                other => Err(cursor.malformed(format!("`new {}` is not allowed", other))),
            }
        }
        "ObjectId" => parse_object_id(cursor),
        "ISODate" => parse_date_ctor(cursor),
        "NumberInt" => {
            let n = parse_integer_arg(cursor)?;
            i32::try_from(n)
                .map(Bson::Int32)
                .map_err(|_| cursor.malformed("NumberInt value out of range"))
        }
        "NumberLong" => parse_integer_arg(cursor).map(Bson::Int64),
        other => Err(cursor.malformed(format!("`{}` is not a literal value", other))),
    }
}

/// Parses `( [arg] )` and returns the optional single argument.
fn parse_call_arg(cursor: &mut Cursor<'_>) -> AppResult<Option<Bson>> {
    cursor.expect('(')?;
    if cursor.eat(')') {
        return Ok(None);
    }
    cursor.skip_ws();
    let arg = match cursor.peek() {
        Some('"') | Some('\'') => Bson::String(parse_string(cursor)?),
        Some(c) if c == '-' || c.is_ascii_digit() => parse_number(cursor)?,
        _ => return Err(cursor.malformed("constructor arguments must be a string or a number")),
    };
    cursor.expect(')')?;
    Ok(Some(arg))
}

fn parse_object_id(cursor: &mut Cursor<'_>) -> AppResult<Bson> {
    match parse_call_arg(cursor)? {
        None => Ok(Bson::ObjectId(ObjectId::new())),
        Some(Bson::String(hex)) => ObjectId::parse_str(&hex)
            .map(Bson::ObjectId)
            .map_err(|_| cursor.malformed(format!("invalid ObjectId `{}`", hex))),
        Some(_) => Err(cursor.malformed("ObjectId expects a 24-character hex string")),
    }
}

fn parse_date_ctor(cursor: &mut Cursor<'_>) -> AppResult<Bson> {
    let millis = match parse_call_arg(cursor)? {
        None => Utc::now().timestamp_millis(),
        Some(Bson::String(text)) => parse_date_text(&text)
            .ok_or_else(|| cursor.malformed(format!("invalid date `{}`", text)))?,
        Some(Bson::Int32(n)) => i64::from(n),
        Some(Bson::Int64(n)) => n,
        Some(_) => return Err(cursor.malformed("dates expect a string or epoch milliseconds")),
    };
    Ok(Bson::DateTime(BsonDateTime::from_millis(millis)))
}

fn parse_integer_arg(cursor: &mut Cursor<'_>) -> AppResult<i64> {
    match parse_call_arg(cursor)? {
        Some(Bson::Int32(n)) => Ok(i64::from(n)),
        Some(Bson::Int64(n)) => Ok(n),
        Some(Bson::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| cursor.malformed(format!("invalid integer `{}`", s))),
        _ => Err(cursor.malformed("expected an integer argument")),
    }
}

/// Epoch milliseconds for RFC 3339, naive date-time (UTC) or plain dates.
fn parse_date_text(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Renders a document back into literal syntax accepted by [`parse_literal`].
pub fn render_document(doc: &Document) -> String {
    let mut out = String::new();
    render_doc_into(doc, &mut out);
    out
}

fn render_doc_into(doc: &Document, out: &mut String) {
    out.push('{');
    for (i, (key, value)) in doc.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&quote(key));
        out.push_str(": ");
        render_into(value, out);
    }
    out.push('}');
}

fn render_into(value: &Bson, out: &mut String) {
    match value {
        Bson::Document(doc) => render_doc_into(doc, out),
        Bson::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_into(item, out);
            }
            out.push(']');
        }
        Bson::String(s) => out.push_str(&quote(s)),
        Bson::Int32(n) => out.push_str(&n.to_string()),
        Bson::Int64(n) => {
            if i32::try_from(*n).is_ok() {
                out.push_str(&format!("NumberLong({})", n));
            } else {
                out.push_str(&n.to_string());
            }
        }
        Bson::Double(f) => out.push_str(&format!("{:?}", f)),
        Bson::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Bson::Null => out.push_str("null"),
        Bson::ObjectId(oid) => out.push_str(&format!("ObjectId(\"{}\")", oid.to_hex())),
        Bson::DateTime(dt) => {
            let rendered = dt
                .try_to_rfc3339_string()
                .map(|s| format!("ISODate(\"{}\")", s))
                .unwrap_or_else(|_| format!("new Date({})", dt.timestamp_millis()));
            out.push_str(&rendered);
        }
        Bson::RegularExpression(re) => {
            out.push('/');
            out.push_str(&re.pattern.replace('/', "\\/"));
            out.push('/');
            out.push_str(&re.options);
        }
        other => out.push_str(&other.to_string()),
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}
