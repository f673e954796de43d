// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Correlation header codec.
//!
//! Data crossing a remote boundary travels in a single `Correlation-Context`
//! header: comma separated `key=value` pairs, percent-encoded, with an
//! optional `;type=l|d|b` property for non-string values.

use http::{HeaderMap, HeaderValue};
use tracing::debug;

use crate::types::Value;

/// Header carrying propagated data.
pub const CORRELATION_CONTEXT_HEADER: &str = "correlation-context";

/// Encode entries as a `Correlation-Context` value. Null values are skipped.
pub fn encode_correlation_context<'a, I>(entries: I) -> Option<HeaderValue>
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let pairs: Vec<String> = entries
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let mut pair = format!("{}={}", percent_encode(key), percent_encode(&value.to_string()));
            if let Some(tag) = value.type_tag() {
                pair.push_str(";type=");
                pair.push_str(tag);
            }
            pair
        })
        .collect();

    if pairs.is_empty() {
        return None;
    }
    HeaderValue::from_str(&pairs.join(",")).ok()
}

/// Decode a `Correlation-Context` value. Malformed pairs are ignored.
pub fn decode_correlation_context(text: &str) -> Vec<(String, Value)> {
    text.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let decoded = decode_pair(pair);
            if decoded.is_none() {
                debug!(pair, "Ignoring malformed correlation pair");
            }
            decoded
        })
        .collect()
}

fn decode_pair(pair: &str) -> Option<(String, Value)> {
    let mut parts = pair.split(';');
    let (raw_key, raw_value) = parts.next()?.split_once('=')?;
    let key = percent_decode(raw_key.trim())?;
    if key.is_empty() {
        return None;
    }
    let text = percent_decode(raw_value.trim())?;

    let mut type_tag = None;
    for property in parts {
        if let Some((name, tag)) = property.split_once('=') {
            if name.trim() == "type" {
                type_tag = Some(tag.trim());
            }
        }
    }

    let value = match type_tag {
        None => Value::String(text),
        Some("l") => Value::Long(text.parse().ok()?),
        Some("d") => Value::Double(text.parse().ok()?),
        Some("b") => Value::Bool(text.parse().ok()?),
        Some(_) => return None,
    };
    Some((key, value))
}

/// Read a header, joining multiple values with `,`.
pub fn read_joined(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn percent_decode(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = text.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}
