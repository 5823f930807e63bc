//! Canonical JSON text for payload hashing.
//!
//! Canonical rules:
//! - object keys sorted by code point, recursively
//! - `", "` between items, `": "` between a key and its value
//! - only printable ASCII written raw; everything else escaped as `\uXXXX`
//!   (UTF-16 surrogate pairs above U+FFFF)
//! - floats in shortest round-trip digits, fixed notation while the decimal
//!   exponent is in `-4..16`, otherwise `d.ddde+XX`
//!
//! The output is ASCII, so byte length equals character count.

use crate::error::{LedgerError, Result};
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::{Map, Value};
use std::io;

/// Render a payload in canonical form.
pub fn canonical_json(value: &Value) -> Result<String> {
    let canon = canon_value(value);
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, CanonicalFormatter);
    canon.serialize(&mut serializer)?;
    String::from_utf8(out).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn canon_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut canon = Map::new();
            for (key, item) in entries {
                canon.insert(key.clone(), canon_value(item));
            }
            Value::Object(canon)
        }
        Value::Array(items) => Value::Array(items.iter().map(canon_value).collect()),
        other => other.clone(),
    }
}

struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(float_text(value).as_bytes())
    }

    // Quotes, backslashes and control characters never reach here; serde_json
    // routes them through `write_char_escape`.
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        let mut units = [0u16; 2];
        for (i, ch) in fragment.char_indices() {
            if (' '..='~').contains(&ch) {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Shortest round-trip text for a finite float.
fn float_text(value: f64) -> String {
    // `{:e}` yields the shortest digits, e.g. "1.5e3", "-2.5e-7", "0e0".
    let sci = format!("{:e}", value);
    let (negative, sci) = match sci.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, sci.as_str()),
    };
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    // Position of the decimal point relative to the first digit.
    let point = exponent + 1;
    let ndigits = digits.len() as i32;

    let mut out = String::with_capacity(digits.len() + 8);
    if negative {
        out.push('-');
    }
    if point <= -4 || point > 16 {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exponent < 0 { '-' } else { '+' };
        out.push_str(&format!("e{}{:02}", sign, exponent.abs()));
    } else if point <= 0 {
        out.push_str("0.");
        out.push_str(&"0".repeat(-point as usize));
        out.push_str(&digits);
    } else if point >= ndigits {
        out.push_str(&digits);
        out.push_str(&"0".repeat((point - ndigits) as usize));
        out.push_str(".0");
    } else {
        let (whole, fraction) = digits.split_at(point as usize);
        out.push_str(whole);
        out.push('.');
        out.push_str(fraction);
    }
    out
}
