//! RFC 8785 JSON Canonicalization Scheme (JCS) encoding and hashing.
//!
//! Two upstreams advertising the same capability surface with different key
//! orders or whitespace must fingerprint identically, so drift detection
//! hashes the canonical encoding rather than whatever bytes the upstream
//! happened to send. Object members are sorted by UTF-16 code units, strings
//! use minimal escaping, and numbers follow the ECMAScript
//! `Number::toString` algorithm as required by the RFC.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalizeError {
    /// NaN and infinities have no JSON representation.
    #[error("non-finite number cannot be canonicalized")]
    NonFinite,
}

/// Encodes a JSON value to its RFC 8785 canonical byte sequence.
pub fn canonicalize(value: &serde_json::Value) -> Result<Vec<u8>, CanonicalizeError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out.into_bytes())
}

/// Lowercase hex SHA-256 of the canonical encoding.
pub fn fingerprint(value: &serde_json::Value) -> Result<String, CanonicalizeError> {
    let canonical = canonicalize(value)?;
    let digest = Sha256::digest(&canonical);
    Ok(format!("{:x}", digest))
}

fn write_value(value: &serde_json::Value, out: &mut String) -> Result<(), CanonicalizeError> {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(true) => out.push_str("true"),
        serde_json::Value::Bool(false) => out.push_str("false"),
        serde_json::Value::Number(n) => out.push_str(&format_number(n)?),
        serde_json::Value::String(s) => write_string(s, out),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            // RFC 8785 section 3.2.3: sort keys by UTF-16 code units.
            entries.sort_by(|(a, _), (b, _)| {
                a.encode_utf16().cmp(b.encode_utf16())
            });
            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Minimal escaping per RFC 8785 section 3.2.2.2.
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\x08' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\x0c' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            c if c < '\x20' => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn format_number(n: &serde_json::Number) -> Result<String, CanonicalizeError> {
    if let Some(i) = n.as_i64() {
        return Ok(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    let f = n.as_f64().ok_or(CanonicalizeError::NonFinite)?;
    format_double(f)
}

/// Serializes an IEEE double the way ECMAScript `Number::toString` does:
/// shortest round-tripping digit string, plain decimal notation while the
/// decimal point stays within [-6, 21), exponent notation beyond that.
fn format_double(f: f64) -> Result<String, CanonicalizeError> {
    if !f.is_finite() {
        return Err(CanonicalizeError::NonFinite);
    }
    if f == 0.0 {
        // Covers negative zero as well; ECMAScript prints both as "0".
        return Ok("0".to_string());
    }

    let negative = f < 0.0;
    // Rust's LowerExp already emits the shortest round-tripping digits.
    let sci = format!("{:e}", f.abs());
    let (mantissa, exponent) = sci
        .split_once('e')
        .expect("LowerExp output always contains an exponent");
    let exponent: i32 = exponent
        .parse()
        .expect("LowerExp exponent is a valid integer");
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let k = digits.len() as i32;
    // n is the position of the decimal point: value = 0.<digits> * 10^n.
    let n = exponent + 1;

    let body = if k <= n && n <= 21 {
        let mut s = digits;
        s.extend(std::iter::repeat('0').take((n - k) as usize));
        s
    } else if 0 < n && n <= 21 {
        format!("{}.{}", &digits[..n as usize], &digits[n as usize..])
    } else if -6 < n && n <= 0 {
        format!("0.{}{}", "0".repeat((-n) as usize), digits)
    } else {
        let e = n - 1;
        let mant = if k == 1 {
            digits
        } else {
            format!("{}.{}", &digits[..1], &digits[1..])
        };
        format!("{}e{}{}", mant, if e >= 0 { "+" } else { "-" }, e.abs())
    };

    Ok(if negative {
        format!("-{}", body)
    } else {
        body
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(value: &serde_json::Value) -> String {
        String::from_utf8(canonicalize(value).unwrap()).unwrap()
    }

    #[test]
    fn scalars() {
        assert_eq!(canon(&json!(null)), "null");
        assert_eq!(canon(&json!(true)), "true");
        assert_eq!(canon(&json!(false)), "false");
        assert_eq!(canon(&json!(0)), "0");
        assert_eq!(canon(&json!(-1)), "-1");
        assert_eq!(canon(&json!("hello")), r#""hello""#);
    }

    #[test]
    fn keys_sorted_by_code_units() {
        let value = json!({"z": 1, "a": 2, "m": 3});
        assert_eq!(canon(&value), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn key_permutation_is_invisible() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(canon(&a), canon(&b));
    }

    #[test]
    fn reparse_is_stable() {
        let value = json!({
            "tools": [{"name": "echo", "inputSchema": {"type": "object"}}],
            "count": 2.5,
            "note": "line\nbreak \"quoted\""
        });
        let first = canon(&value);
        let reparsed: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(first, canon(&reparsed));
    }

    #[test]
    fn string_escaping_is_minimal() {
        assert_eq!(canon(&json!("a\"b")), r#""a\"b""#);
        assert_eq!(canon(&json!("a\\b")), r#""a\\b""#);
        assert_eq!(canon(&json!("tab\there")), r#""tab\there""#);
        assert_eq!(canon(&json!("\u{1}")), r#""\u0001""#);
        // Forward slash and non-ASCII pass through unescaped.
        assert_eq!(canon(&json!("a/b")), r#""a/b""#);
        assert_eq!(canon(&json!("héllo\u{1F600}")), "\"héllo\u{1F600}\"");
    }

    #[test]
    fn doubles_follow_ecmascript_tostring() {
        assert_eq!(canon(&json!(1.0)), "1");
        assert_eq!(canon(&json!(-0.0f64)), "0");
        assert_eq!(canon(&json!(0.1)), "0.1");
        assert_eq!(canon(&json!(123.456)), "123.456");
        assert_eq!(canon(&json!(1e20)), "100000000000000000000");
        assert_eq!(canon(&json!(1e21)), "1e+21");
        assert_eq!(canon(&json!(1e-6)), "0.000001");
        assert_eq!(canon(&json!(1e-7)), "1e-7");
        assert_eq!(canon(&json!(-2.5e30)), "-2.5e+30");
    }

    #[test]
    fn fingerprint_matches_canonical_equality() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        let c = json!({"a": 2, "b": 2});
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&c).unwrap());
    }

    #[test]
    fn fingerprint_is_lowercase_hex() {
        let hash = fingerprint(&json!({"tools": []})).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
