//! Typed OData literals.
//!
//! Literals appear in key predicates, concurrency tokens and service operation
//! parameters. Parsing happens in two steps so callers can tell the failure
//! modes apart:
//!
//! 1. [`lex`] decides whether the text is a literal of *any* kind. Failure here
//!    is a [`LiteralError::Syntax`].
//! 2. [`coerce`] converts a lexed literal to a declared [`PrimitiveType`].
//!    Failure here is a [`LiteralError::TypeMismatch`] or
//!    [`LiteralError::OutOfRange`].
//!
//! ```rust
//! use odata_server::literal::{parse_typed, Literal};
//! use odata_server::metadata::PrimitiveType;
//!
//! let value = parse_typed("'O''Neil'", PrimitiveType::String).unwrap();
//! assert_eq!(value, Literal::String("O'Neil".to_string()));
//! assert_eq!(value.to_uri_literal(), "'O''Neil'");
//! ```

use crate::error::{LiteralError, LiteralResult};
use crate::metadata::PrimitiveType;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, FixedOffset};
use serde_json::{Number, Value};
use std::fmt;
use uuid::Uuid;

/// A literal value coerced to a primitive type.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    /// Validated decimal text, kept verbatim
    Decimal(String),
    Double(f64),
    Single(f32),
    String(String),
    Guid(Uuid),
    DateTimeOffset(DateTime<FixedOffset>),
    Binary(Vec<u8>),
}

/// A literal recognised by the lexer but not yet bound to a type.
#[derive(Debug, Clone, PartialEq)]
pub enum LexedLiteral {
    Null,
    Boolean(bool),
    /// Integer digits with optional sign; `long` when suffixed with `L`
    Integer { text: String, long: bool },
    /// Number with fraction or exponent, with optional `M`/`D`/`F` suffix
    Number { text: String, suffix: Option<char> },
    /// `INF`, `-INF` or `NaN`
    SpecialFloat(f64),
    String(String),
    Guid(Uuid),
    DateTimeOffset(DateTime<FixedOffset>),
    Binary(Vec<u8>),
}

/// Lex a literal without binding it to a type.
pub fn lex(text: &str) -> LiteralResult<LexedLiteral> {
    let syntax = || LiteralError::Syntax {
        text: text.to_string(),
    };

    match text {
        "" => return Err(syntax()),
        "null" => return Ok(LexedLiteral::Null),
        "true" => return Ok(LexedLiteral::Boolean(true)),
        "false" => return Ok(LexedLiteral::Boolean(false)),
        "INF" => return Ok(LexedLiteral::SpecialFloat(f64::INFINITY)),
        "-INF" => return Ok(LexedLiteral::SpecialFloat(f64::NEG_INFINITY)),
        "NaN" => return Ok(LexedLiteral::SpecialFloat(f64::NAN)),
        _ => {}
    }

    if text.starts_with('\'') {
        return unquote(text).map(LexedLiteral::String).ok_or_else(syntax);
    }

    if let Some((prefix, body)) = split_prefixed(text) {
        let body = unquote(body).ok_or_else(syntax)?;
        return match prefix.to_ascii_lowercase().as_str() {
            "guid" => Uuid::parse_str(&body)
                .map(LexedLiteral::Guid)
                .map_err(|_| syntax()),
            "datetimeoffset" | "datetime" => DateTime::parse_from_rfc3339(&body)
                .map(LexedLiteral::DateTimeOffset)
                .map_err(|_| syntax()),
            "binary" => BASE64
                .decode(body.as_bytes())
                .map(LexedLiteral::Binary)
                .map_err(|_| syntax()),
            "x" => decode_hex(&body).map(LexedLiteral::Binary).ok_or_else(syntax),
            _ => Err(syntax()),
        };
    }

    if is_bare_guid(text) {
        return Uuid::parse_str(text)
            .map(LexedLiteral::Guid)
            .map_err(|_| syntax());
    }

    if looks_like_datetime(text) {
        return DateTime::parse_from_rfc3339(text)
            .map(LexedLiteral::DateTimeOffset)
            .map_err(|_| syntax());
    }

    lex_number(text).ok_or_else(syntax)
}

/// Coerce a lexed literal to a declared primitive type.
pub fn coerce(lexed: &LexedLiteral, target: PrimitiveType, text: &str) -> LiteralResult<Literal> {
    let mismatch = || LiteralError::TypeMismatch {
        text: text.to_string(),
        expected: target.edm_name().to_string(),
    };
    let out_of_range = || LiteralError::OutOfRange {
        text: text.to_string(),
        expected: target.edm_name().to_string(),
    };

    match (lexed, target) {
        (LexedLiteral::Null, _) => Ok(Literal::Null),
        (LexedLiteral::Boolean(b), PrimitiveType::Boolean) => Ok(Literal::Boolean(*b)),
        (LexedLiteral::Integer { text: digits, long }, t) if t.is_integral() => {
            if *long && t != PrimitiveType::Int64 {
                return Err(mismatch());
            }
            let value: i64 = digits.parse().map_err(|_| out_of_range())?;
            integral_literal(value, t).ok_or_else(out_of_range)
        }
        (LexedLiteral::Integer { text: digits, long: false }, PrimitiveType::Decimal) => {
            decimal_literal(digits).ok_or_else(out_of_range)
        }
        (LexedLiteral::Integer { text: digits, long: false }, PrimitiveType::Double)
        | (LexedLiteral::Integer { text: digits, long: false }, PrimitiveType::Single) => {
            float_literal(digits, target).ok_or_else(out_of_range)
        }
        (LexedLiteral::Number { text: number, suffix }, PrimitiveType::Decimal)
            if matches!(suffix, None | Some('M')) =>
        {
            decimal_literal(number).ok_or_else(out_of_range)
        }
        (LexedLiteral::Number { text: number, suffix }, PrimitiveType::Double)
            if matches!(suffix, None | Some('D')) =>
        {
            float_literal(number, target).ok_or_else(out_of_range)
        }
        (LexedLiteral::Number { text: number, suffix }, PrimitiveType::Single)
            if matches!(suffix, None | Some('F')) =>
        {
            float_literal(number, target).ok_or_else(out_of_range)
        }
        (LexedLiteral::SpecialFloat(v), PrimitiveType::Double) => Ok(Literal::Double(*v)),
        (LexedLiteral::SpecialFloat(v), PrimitiveType::Single) => Ok(Literal::Single(*v as f32)),
        (LexedLiteral::String(s), PrimitiveType::String) => Ok(Literal::String(s.clone())),
        (LexedLiteral::Guid(g), PrimitiveType::Guid) => Ok(Literal::Guid(*g)),
        (LexedLiteral::DateTimeOffset(d), PrimitiveType::DateTimeOffset) => {
            Ok(Literal::DateTimeOffset(*d))
        }
        (LexedLiteral::Binary(b), PrimitiveType::Binary) => Ok(Literal::Binary(b.clone())),
        _ => Err(mismatch()),
    }
}

/// Lex and coerce in one step.
pub fn parse_typed(text: &str, target: PrimitiveType) -> LiteralResult<Literal> {
    let lexed = lex(text)?;
    coerce(&lexed, target, text)
}

/// Split `text` on `separator` where it appears outside single-quoted strings.
///
/// Returns `None` when a quoted string is left unterminated.
pub fn split_top_level(text: &str, separator: char) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (index, c) in text.char_indices() {
        if c == '\'' {
            // '' inside a string toggles twice and stays inside
            in_quotes = !in_quotes;
        } else if c == separator && !in_quotes {
            parts.push(&text[start..index]);
            start = index + c.len_utf8();
        }
    }
    if in_quotes {
        return None;
    }
    parts.push(&text[start..]);
    Some(parts)
}

impl Literal {
    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    /// Serialize in URI literal form.
    pub fn to_uri_literal(&self) -> String {
        match self {
            Literal::Null => "null".to_string(),
            Literal::Boolean(b) => b.to_string(),
            Literal::Byte(v) => v.to_string(),
            Literal::Int16(v) => v.to_string(),
            Literal::Int32(v) => v.to_string(),
            Literal::Int64(v) => v.to_string(),
            Literal::Decimal(text) => text.clone(),
            Literal::Double(v) => format_float(*v),
            Literal::Single(v) => format_float(f64::from(*v)),
            Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
            Literal::Guid(g) => g.hyphenated().to_string(),
            Literal::DateTimeOffset(d) => d.to_rfc3339(),
            Literal::Binary(bytes) => format!("binary'{}'", BASE64.encode(bytes)),
        }
    }

    /// Raw text form used for `$value` responses.
    pub fn to_raw_string(&self) -> String {
        match self {
            Literal::String(s) => s.clone(),
            Literal::Binary(bytes) => BASE64.encode(bytes),
            other => other.to_uri_literal(),
        }
    }

    /// Convert a JSON payload value to a literal of the declared type.
    pub fn from_json(value: &Value, target: PrimitiveType) -> LiteralResult<Literal> {
        let text = value.to_string();
        let mismatch = || LiteralError::TypeMismatch {
            text: text.clone(),
            expected: target.edm_name().to_string(),
        };
        let out_of_range = || LiteralError::OutOfRange {
            text: text.clone(),
            expected: target.edm_name().to_string(),
        };

        match (value, target) {
            (Value::Null, _) => Ok(Literal::Null),
            (Value::Bool(b), PrimitiveType::Boolean) => Ok(Literal::Boolean(*b)),
            (Value::Number(n), t) if t.is_integral() => {
                let v = n.as_i64().ok_or_else(|| {
                    if n.is_u64() { out_of_range() } else { mismatch() }
                })?;
                integral_literal(v, t).ok_or_else(out_of_range)
            }
            (Value::String(s), PrimitiveType::Int64) => {
                let v: i64 = s.parse().map_err(|_| mismatch())?;
                Ok(Literal::Int64(v))
            }
            (Value::Number(n), PrimitiveType::Decimal) => {
                decimal_literal(&n.to_string()).ok_or_else(out_of_range)
            }
            (Value::String(s), PrimitiveType::Decimal) => match lex_number(s) {
                Some(LexedLiteral::Integer { text, long: false })
                | Some(LexedLiteral::Number { text, suffix: None }) => {
                    decimal_literal(&text).ok_or_else(out_of_range)
                }
                _ => Err(mismatch()),
            },
            (Value::Number(n), PrimitiveType::Double) => {
                n.as_f64().map(Literal::Double).ok_or_else(mismatch)
            }
            (Value::Number(n), PrimitiveType::Single) => {
                let v = n.as_f64().ok_or_else(mismatch)?;
                float_literal(&v.to_string(), PrimitiveType::Single).ok_or_else(out_of_range)
            }
            (Value::String(s), PrimitiveType::Double) | (Value::String(s), PrimitiveType::Single) => {
                match lex(s) {
                    Ok(LexedLiteral::SpecialFloat(v)) => {
                        coerce(&LexedLiteral::SpecialFloat(v), target, s).map_err(|_| mismatch())
                    }
                    _ => Err(mismatch()),
                }
            }
            (Value::String(s), PrimitiveType::String) => Ok(Literal::String(s.clone())),
            (Value::String(s), PrimitiveType::Guid) => {
                Uuid::parse_str(s).map(Literal::Guid).map_err(|_| mismatch())
            }
            (Value::String(s), PrimitiveType::DateTimeOffset) => DateTime::parse_from_rfc3339(s)
                .map(Literal::DateTimeOffset)
                .map_err(|_| mismatch()),
            (Value::String(s), PrimitiveType::Binary) => BASE64
                .decode(s.as_bytes())
                .map(Literal::Binary)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }

    /// Convert to the JSON representation stored in entity payloads.
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Boolean(b) => Value::Bool(*b),
            Literal::Byte(v) => Value::from(*v),
            Literal::Int16(v) => Value::from(*v),
            Literal::Int32(v) => Value::from(*v),
            Literal::Int64(v) => Value::from(*v),
            Literal::Decimal(text) => text
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(text.clone())),
            Literal::Double(v) => float_to_json(*v),
            Literal::Single(v) => float_to_json(f64::from(*v)),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Guid(g) => Value::String(g.hyphenated().to_string()),
            Literal::DateTimeOffset(d) => Value::String(d.to_rfc3339()),
            Literal::Binary(bytes) => Value::String(BASE64.encode(bytes)),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri_literal())
    }
}

fn integral_literal(value: i64, target: PrimitiveType) -> Option<Literal> {
    match target {
        PrimitiveType::Byte => u8::try_from(value).ok().map(Literal::Byte),
        PrimitiveType::Int16 => i16::try_from(value).ok().map(Literal::Int16),
        PrimitiveType::Int32 => i32::try_from(value).ok().map(Literal::Int32),
        PrimitiveType::Int64 => Some(Literal::Int64(value)),
        _ => None,
    }
}

// System.Decimal holds at most 29 significant digits
const MAX_DECIMAL_DIGITS: usize = 29;

fn decimal_literal(text: &str) -> Option<Literal> {
    if text.contains(['e', 'E']) {
        let value: f64 = text.parse().ok()?;
        if !value.is_finite() || value.abs() >= 1e29 {
            return None;
        }
        return Some(Literal::Decimal(text.to_string()));
    }
    let digits = text
        .trim_start_matches(['-', '+'])
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    let significant = digits.trim_start_matches('0');
    if significant.len() > MAX_DECIMAL_DIGITS {
        return None;
    }
    Some(Literal::Decimal(text.to_string()))
}

fn float_literal(text: &str, target: PrimitiveType) -> Option<Literal> {
    let value: f64 = text.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    match target {
        PrimitiveType::Single => {
            if value.abs() > f64::from(f32::MAX) {
                None
            } else {
                Some(Literal::Single(value as f32))
            }
        }
        _ => Some(Literal::Double(value)),
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "INF".to_string()
    } else if value == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        value.to_string()
    }
}

fn float_to_json(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(format_float(value)))
}

/// Content of a `'...'` string with `''` unescaped, if well formed.
fn unquote(text: &str) -> Option<String> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            // a lone quote inside the body ends the string early
            if chars.next() != Some('\'') {
                return None;
            }
        }
        result.push(c);
    }
    Some(result)
}

/// `prefix'body'` forms such as `guid'...'` and `X'...'`.
fn split_prefixed(text: &str) -> Option<(&str, &str)> {
    let quote = text.find('\'')?;
    let (prefix, body) = text.split_at(quote);
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((prefix, body))
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

fn is_bare_guid(text: &str) -> bool {
    let groups: Vec<&str> = text.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

fn looks_like_datetime(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() > 10 && bytes[..4].iter().all(u8::is_ascii_digit) && bytes[4] == b'-'
}

fn lex_number(text: &str) -> Option<LexedLiteral> {
    let (body, suffix) = match text.chars().last()? {
        c @ ('L' | 'l') => (&text[..text.len() - 1], Some(c.to_ascii_uppercase())),
        c @ ('M' | 'm' | 'D' | 'd' | 'F' | 'f') => {
            (&text[..text.len() - 1], Some(c.to_ascii_uppercase()))
        }
        _ => (text, None),
    };

    let unsigned = body.strip_prefix(['-', '+']).unwrap_or(body);
    if unsigned.is_empty() || !unsigned.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (&unsigned[..pos], Some(&unsigned[pos + 1..])),
        None => (unsigned, None),
    };
    let mut parts = mantissa.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();

    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !(all_digits(whole) || (whole.is_empty() && fraction.is_some_and(all_digits))) {
        return None;
    }
    if let Some(f) = fraction {
        if !f.is_empty() && !all_digits(f) {
            return None;
        }
    }
    if let Some(e) = exponent {
        let e = e.strip_prefix(['-', '+']).unwrap_or(e);
        if !all_digits(e) {
            return None;
        }
    }

    if fraction.is_none() && exponent.is_none() {
        return match suffix {
            None => Some(LexedLiteral::Integer {
                text: body.to_string(),
                long: false,
            }),
            Some('L') => Some(LexedLiteral::Integer {
                text: body.to_string(),
                long: true,
            }),
            Some(s) => Some(LexedLiteral::Number {
                text: body.to_string(),
                suffix: Some(s),
            }),
        };
    }

    if suffix == Some('L') {
        return None;
    }
    Some(LexedLiteral::Number {
        text: body.to_string(),
        suffix,
    })
}
