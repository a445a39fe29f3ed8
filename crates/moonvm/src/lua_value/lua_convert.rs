// Numeric coercions, centralized so every caller agrees on the
// conversion matrix: integer <-> float by exact representability,
// string <-> number by parse, number -> string by formatting.

use std::rc::Rc;

use crate::lua_value::{LuaStr, LuaValue};

// 2^63 is exactly representable as f64; i64::MAX is not. The upper
// bound below is therefore exclusive.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Exact float-to-integer conversion: succeeds iff `f` has no
/// fractional part and fits the signed 64-bit range.
pub fn float_to_integer(f: f64) -> Option<i64> {
    if f >= -TWO_POW_63 && f < TWO_POW_63 && f.floor() == f {
        Some(f as i64)
    } else {
        None
    }
}

/// Coerce a value to an integer: integers pass through, floats must
/// represent an integer exactly, strings go through the number parser.
pub fn to_integer(val: &LuaValue) -> Option<i64> {
    match val {
        LuaValue::Integer(i) => Some(*i),
        LuaValue::Float(f) => float_to_integer(*f),
        LuaValue::String(s) => str_to_integer(s.as_bytes()),
        _ => None,
    }
}

/// Coerce a value to a float: both number subtypes convert, strings go
/// through the number parser.
pub fn to_number(val: &LuaValue) -> Option<f64> {
    match val {
        LuaValue::Integer(i) => Some(*i as f64),
        LuaValue::Float(f) => Some(*f),
        LuaValue::String(s) => {
            let s = std::str::from_utf8(s.as_bytes()).ok()?;
            parse_float(s)
        }
        _ => None,
    }
}

fn str_to_integer(bytes: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    if let Some(i) = parse_integer(s) {
        return Some(i);
    }
    parse_float(s).and_then(float_to_integer)
}

/// Parse a Lua integer literal: optional sign, decimal or `0x` hex
/// digits, surrounding whitespace ignored. Hexadecimal literals wrap
/// modulo 2^64; decimal literals that overflow fail (and fall back to
/// the float parser in the callers that want Lua's coercion order).
pub fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    let (negative, digits) = split_sign(s)?;

    let value = if let Some(hex) = strip_hex_prefix(digits) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut acc: u64 = 0;
        for b in hex.bytes() {
            let d = (b as char).to_digit(16)? as u64;
            acc = acc.wrapping_mul(16).wrapping_add(d);
        }
        acc as i64
    } else {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let mut acc: i64 = 0;
        for b in digits.bytes() {
            let d = (b - b'0') as i64;
            acc = acc.checked_mul(10)?.checked_add(d)?;
        }
        acc
    };

    Some(if negative { value.wrapping_neg() } else { value })
}

/// Parse a Lua float literal: optional sign, decimal with optional
/// `e`/`E` exponent, or `0x` hex with optional `p`/`P` binary exponent.
/// The `inf` and `nan` spellings are deliberately rejected.
pub fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    let (negative, rest) = split_sign(s)?;

    let magnitude = if let Some(hex) = strip_hex_prefix(rest) {
        parse_hex_float(hex)?
    } else {
        parse_dec_float(rest)?
    };

    Some(if negative { -magnitude } else { magnitude })
}

fn split_sign(s: &str) -> Option<(bool, &str)> {
    if s.is_empty() {
        return None;
    }
    match s.as_bytes()[0] {
        b'-' => Some((true, &s[1..])),
        b'+' => Some((false, &s[1..])),
        _ => Some((false, s)),
    }
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

fn parse_dec_float(s: &str) -> Option<f64> {
    // validate the charset by hand so that "inf", "nan" and stray
    // garbage never reach the stdlib parser
    let bytes = s.as_bytes();
    let mut digits = 0usize;
    let mut dot = false;
    let mut exp_at = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'0'..=b'9' => digits += 1,
            b'.' if !dot && exp_at.is_none() => dot = true,
            b'e' | b'E' if exp_at.is_none() && digits > 0 => exp_at = Some(i),
            b'+' | b'-' if i > 0 && exp_at == Some(i - 1) => {}
            _ => return None,
        }
    }
    if digits == 0 {
        return None;
    }
    if let Some(e) = exp_at {
        let exp = &s[e + 1..];
        let exp_digits = exp.trim_start_matches(['+', '-']);
        if exp_digits.is_empty() || !exp_digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    s.parse::<f64>().ok()
}

fn parse_hex_float(s: &str) -> Option<f64> {
    let (mantissa_part, exponent) = match s.find(['p', 'P']) {
        Some(i) => {
            let exp = &s[i + 1..];
            let (neg, digits) = split_sign(exp)?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let mut e: i32 = 0;
            for b in digits.bytes() {
                e = e.saturating_mul(10).saturating_add((b - b'0') as i32);
            }
            (&s[..i], if neg { -e } else { e })
        }
        None => (s, 0),
    };

    let (int_part, frac_part) = match mantissa_part.find('.') {
        Some(i) => (&mantissa_part[..i], &mantissa_part[i + 1..]),
        None => (mantissa_part, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let mut value = 0.0f64;
    for b in int_part.bytes() {
        let d = (b as char).to_digit(16)? as f64;
        value = value * 16.0 + d;
    }
    let mut scale = 1.0f64 / 16.0;
    for b in frac_part.bytes() {
        let d = (b as char).to_digit(16)? as f64;
        value += d * scale;
        scale /= 16.0;
    }

    Some(value * 2.0f64.powi(exponent))
}

/// Parse a string as a number the way Lua coercion does: integer parse
/// first, float parse second.
pub fn str_to_number(bytes: &[u8]) -> Option<LuaValue> {
    let s = std::str::from_utf8(bytes).ok()?;
    if let Some(i) = parse_integer(s) {
        return Some(LuaValue::Integer(i));
    }
    parse_float(s).map(LuaValue::Float)
}

pub fn integer_to_str(i: i64) -> String {
    itoa::Buffer::new().format(i).to_owned()
}

/// Format a float the way `tostring` does: the shortest round-tripping
/// decimal form, with a `.0` suffix so integral floats stay visibly
/// floats; infinities and NaN spell out locale-independently.
pub fn float_to_str(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_owned();
    }
    let mut s = format!("{f}");
    if !s.contains(['.', 'e', 'E']) {
        s.push_str(".0");
    }
    s
}

/// String coercion used by `to_string` and concatenation: strings pass
/// through, numbers format, everything else fails.
pub fn to_lua_string(val: &LuaValue) -> Option<Rc<LuaStr>> {
    match val {
        LuaValue::String(s) => Some(s.clone()),
        LuaValue::Integer(i) => Some(LuaStr::from_str(&integer_to_str(*i))),
        LuaValue::Float(f) => Some(LuaStr::from_str(&float_to_str(*f))),
        _ => None,
    }
}
