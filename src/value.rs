//! FITS header value representation, parsing, and formatting.
//!
//! A card value is one of: logical, integer, float, string, complex
//! (integer or float), or undefined (value indicator present but no value).

/// A parsed FITS header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// FITS logical value (`T` or `F`).
    Logical(bool),
    /// FITS integer value.
    Integer(i64),
    /// FITS floating-point value.
    Float(f64),
    /// FITS character string (content between single quotes).
    String(String),
    /// FITS complex integer `(real, imaginary)`.
    ComplexInt(i64, i64),
    /// FITS complex float `(real, imaginary)`.
    ComplexFloat(f64, f64),
    /// Value indicator present but the value field is empty.
    Undefined,
}

impl Value {
    /// The value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// The value as a float, accepting integers too.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// The value as a logical, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

// ── Parsing ──

/// Split a non-string value field at the comment separator.
///
/// The standard uses ` / ` but real-world files omit the trailing space
/// (e.g. `BITPIX = -32 /No. of bits per pixel`); both forms are accepted.
fn split_comment(field: &[u8]) -> (&[u8], Option<String>) {
    let len = field.len();
    let mut i = 0;
    while i + 1 < len {
        if field[i] == b' ' && field[i + 1] == b'/' {
            let value_part = &field[..i];
            let mut comment_start = i + 2;
            if comment_start < len && field[comment_start] == b' ' {
                comment_start += 1;
            }
            let comment = std::str::from_utf8(&field[comment_start..])
                .ok()
                .map(|s| s.trim_end().to_string())
                .filter(|s| !s.is_empty());
            return (value_part, comment);
        }
        i += 1;
    }
    (field, None)
}

/// Parse a FITS character-string value starting with `'` at byte 0.
///
/// Doubled single-quotes inside the string represent a literal quote.
/// Everything after the closing quote is whitespace or a comment.
fn parse_string(field: &[u8]) -> Option<(Value, Option<String>)> {
    if field.is_empty() || field[0] != b'\'' {
        return None;
    }

    let mut value = String::new();
    let mut i = 1;
    let len = field.len();

    loop {
        if i >= len {
            // Unterminated string: be lenient and accept what we have.
            break;
        }
        if field[i] == b'\'' {
            if i + 1 < len && field[i + 1] == b'\'' {
                value.push('\'');
                i += 2;
            } else {
                i += 1;
                break;
            }
        } else {
            value.push(field[i] as char);
            i += 1;
        }
    }

    // FITS pads string values to a minimum of 8 characters.
    let trimmed = value.trim_end().to_string();
    let (_, comment) = split_comment(&field[i..]);
    Some((Value::String(trimmed), comment))
}

/// Try to parse a complex value `(real, imag)`.
fn parse_complex(text: &str) -> Option<Value> {
    let text = text.trim();
    if !text.starts_with('(') || !text.ends_with(')') {
        return None;
    }
    let inner = &text[1..text.len() - 1];
    let comma_pos = inner.find(',')?;
    let left = inner[..comma_pos].trim();
    let right = inner[comma_pos + 1..].trim();

    if !left.contains('.') && !right.contains('.') {
        if let (Ok(re), Ok(im)) = (left.parse::<i64>(), right.parse::<i64>()) {
            return Some(Value::ComplexInt(re, im));
        }
    }

    let re = parse_float_str(left)?;
    let im = parse_float_str(right)?;
    Some(Value::ComplexFloat(re, im))
}

/// Parse a float string, handling the FITS `D` exponent notation.
fn parse_float_str(s: &str) -> Option<f64> {
    let normalized = s.replace(['D', 'd'], "E");
    normalized.parse::<f64>().ok()
}

/// Parse a FITS header value from the value portion of a card (bytes 10..80).
///
/// Returns the parsed [`Value`] and an optional comment. An empty value
/// field yields [`Value::Undefined`].
pub fn parse_value(value_bytes: &[u8]) -> (Value, Option<String>) {
    if value_bytes.is_empty() {
        return (Value::Undefined, None);
    }

    if value_bytes[0] == b'\'' {
        if let Some(parsed) = parse_string(value_bytes) {
            return parsed;
        }
    }

    let (val_part, comment) = split_comment(value_bytes);
    let val_text = match std::str::from_utf8(val_part) {
        Ok(t) => t.trim(),
        Err(_) => return (Value::Undefined, comment),
    };
    if val_text.is_empty() {
        return (Value::Undefined, comment);
    }

    if val_text == "T" {
        return (Value::Logical(true), comment);
    }
    if val_text == "F" {
        return (Value::Logical(false), comment);
    }

    if val_text.starts_with('(') {
        if let Some(v) = parse_complex(val_text) {
            return (v, comment);
        }
    }

    // Integer: no decimal point or exponent characters.
    if !val_text.contains(['.', 'E', 'e', 'D', 'd']) {
        if let Ok(n) = val_text.parse::<i64>() {
            return (Value::Integer(n), comment);
        }
    }

    if let Some(f) = parse_float_str(val_text) {
        return (Value::Float(f), comment);
    }

    (Value::Undefined, comment)
}

// ── Formatting ──

/// Serialize a [`Value`] into value-field bytes for the card serializer.
///
/// With `fixed` layout, numeric and logical values are right-justified in
/// the first 20 bytes (columns 11-30 of the card) and strings start with a
/// quote at byte 0. Free format left-justifies everything.
pub fn format_value(value: &Value, fixed: bool) -> Vec<u8> {
    let text: Vec<u8> = match value {
        Value::Logical(b) => vec![if *b { b'T' } else { b'F' }],
        Value::Integer(n) => format!("{}", n).into_bytes(),
        Value::Float(f) => format_float(*f).into_bytes(),
        Value::String(s) => return quote_string(s),
        Value::ComplexInt(re, im) => format!("({}, {})", re, im).into_bytes(),
        Value::ComplexFloat(re, im) => {
            format!("({}, {})", format_float(*re), format_float(*im)).into_bytes()
        }
        Value::Undefined => Vec::new(),
    };

    if fixed && text.len() < 20 {
        let mut buf = vec![b' '; 20];
        let start = 20 - text.len();
        buf[start..].copy_from_slice(&text);
        buf
    } else {
        text
    }
}

/// Format a float so the result parses back to the same value.
///
/// Exponential form keeps the card compact; precision is reduced only when
/// the representation would not fit a fixed-format field.
fn format_float(f: f64) -> String {
    if f == 0.0 {
        return String::from("0.0");
    }
    let mut precision = 15usize;
    loop {
        let s = format!("{:.prec$E}", f, prec = precision);
        if s.len() <= 20 || precision == 0 {
            return s;
        }
        precision -= 1;
    }
}

/// Quote a string value, doubling embedded quotes and padding the content
/// to the FITS minimum of 8 characters.
fn quote_string(s: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(s.len() + 4);
    buf.push(b'\'');
    for ch in s.bytes() {
        if ch == b'\'' {
            buf.push(b'\'');
            buf.push(b'\'');
        } else {
            buf.push(ch);
        }
    }
    while buf.len() < 9 {
        buf.push(b' ');
    }
    buf.push(b'\'');
    buf
}
