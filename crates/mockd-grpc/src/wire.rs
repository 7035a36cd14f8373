//! Schema-less protobuf wire codec
//!
//! mockd mocks declare gRPC services without proto descriptors, so request
//! messages decode into JSON keyed by field number (`{"1": "hello"}`), and
//! response messages encode from the same shape. Length-delimited fields
//! decode as a nested message when the bytes parse cleanly, else as UTF-8
//! text, else as base64.

use base64::Engine;
use serde_json::{json, Map, Value};

/// Decode a protobuf message into field-number keyed JSON.
///
/// Unknown or truncated input yields `None`; callers treat that as an empty
/// message rather than failing the request.
pub fn decode_message(buf: &[u8]) -> Option<Value> {
    decode_inner(buf, 0)
}

const MAX_NESTING: usize = 16;

fn decode_inner(buf: &[u8], depth: usize) -> Option<Value> {
    if depth > MAX_NESTING {
        return None;
    }
    let mut fields: Map<String, Value> = Map::new();
    let mut pos = 0;
    while pos < buf.len() {
        let (tag, read) = decode_varint(&buf[pos..])?;
        pos += read;
        let field_number = (tag >> 3) as u32;
        let wire_type = (tag & 0x07) as u8;
        if field_number == 0 {
            return None;
        }
        let value = match wire_type {
            0 => {
                let (raw, read) = decode_varint(&buf[pos..])?;
                pos += read;
                json!(raw as i64)
            }
            1 => {
                let bytes: [u8; 8] = buf.get(pos..pos + 8)?.try_into().ok()?;
                pos += 8;
                json!(f64::from_le_bytes(bytes))
            }
            5 => {
                let bytes: [u8; 4] = buf.get(pos..pos + 4)?.try_into().ok()?;
                pos += 4;
                json!(f32::from_le_bytes(bytes) as f64)
            }
            2 => {
                let (len, read) = decode_varint(&buf[pos..])?;
                pos += read;
                let end = pos.checked_add(len as usize)?;
                let bytes = buf.get(pos..end)?;
                pos = end;
                decode_length_delimited(bytes, depth)
            }
            _ => return None,
        };
        insert_field(&mut fields, field_number, value);
    }
    Some(Value::Object(fields))
}

fn decode_length_delimited(bytes: &[u8], depth: usize) -> Value {
    if !bytes.is_empty() {
        // A clean nested parse wins over a string interpretation
        if let Some(nested @ Value::Object(_)) = decode_inner(bytes, depth + 1) {
            if nested.as_object().is_some_and(|m| !m.is_empty()) {
                return nested;
            }
        }
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => json!(text),
        Err(_) => json!(base64::engine::general_purpose::STANDARD.encode(bytes)),
    }
}

/// Repeated fields collapse into arrays
fn insert_field(fields: &mut Map<String, Value>, field_number: u32, value: Value) {
    let key = field_number.to_string();
    match fields.get_mut(&key) {
        None => {
            fields.insert(key, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let prior = existing.take();
            *existing = Value::Array(vec![prior, value]);
        }
    }
}

fn decode_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().take(10).enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Encode field-number keyed JSON into protobuf wire bytes.
///
/// Keys that do not parse as field numbers are skipped. Strings become
/// length-delimited UTF-8, integers and booleans varints, other numbers
/// doubles, objects nested messages, arrays repeated fields.
pub fn encode_message(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    let Some(map) = value.as_object() else {
        return out;
    };
    let mut entries: Vec<(u32, &Value)> = map
        .iter()
        .filter_map(|(key, value)| key.parse::<u32>().ok().map(|n| (n, value)))
        .collect();
    entries.sort_by_key(|(n, _)| *n);
    for (field_number, value) in entries {
        encode_field(field_number, value, &mut out);
    }
    out
}

fn encode_field(field_number: u32, value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                encode_field(field_number, item, out);
            }
        }
        Value::Bool(b) => {
            encode_varint(u64::from(field_number) << 3, out);
            encode_varint(u64::from(*b), out);
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                encode_varint(u64::from(field_number) << 3, out);
                encode_varint(i as u64, out);
            } else if let Some(f) = n.as_f64() {
                encode_varint((u64::from(field_number) << 3) | 1, out);
                out.extend_from_slice(&f.to_le_bytes());
            }
        }
        Value::String(s) => {
            encode_varint((u64::from(field_number) << 3) | 2, out);
            encode_varint(s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Object(_) => {
            let nested = encode_message(value);
            encode_varint((u64::from(field_number) << 3) | 2, out);
            encode_varint(nested.len() as u64, out);
            out.extend_from_slice(&nested);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let message = json!({"1": "hello", "2": 42, "3": true});
        let decoded = decode_message(&encode_message(&message)).expect("decode");
        assert_eq!(decoded["1"], "hello");
        assert_eq!(decoded["2"], 42);
        // Booleans decode as varints
        assert_eq!(decoded["3"], 1);
    }

    #[test]
    fn nested_message_roundtrip() {
        let message = json!({"1": {"2": "inner", "3": 7}});
        let decoded = decode_message(&encode_message(&message)).expect("decode");
        assert_eq!(decoded["1"]["2"], "inner");
        assert_eq!(decoded["1"]["3"], 7);
    }

    #[test]
    fn repeated_fields_collapse_to_arrays() {
        let message = json!({"4": ["a", "b", "c"]});
        let decoded = decode_message(&encode_message(&message)).expect("decode");
        assert_eq!(decoded["4"], json!(["a", "b", "c"]));
    }

    #[test]
    fn doubles_survive() {
        let message = json!({"5": 2.5});
        let decoded = decode_message(&encode_message(&message)).expect("decode");
        assert_eq!(decoded["5"], 2.5);
    }

    #[test]
    fn truncated_input_is_none() {
        let mut bytes = encode_message(&json!({"1": "hello"}));
        bytes.truncate(bytes.len() - 2);
        assert!(decode_message(&bytes).is_none());
    }

    #[test]
    fn empty_message_decodes_to_empty_object() {
        assert_eq!(decode_message(&[]).expect("decode"), json!({}));
    }

    #[test]
    fn non_field_keys_are_skipped_on_encode() {
        let message = json!({"not-a-number": "x", "1": "kept"});
        let decoded = decode_message(&encode_message(&message)).expect("decode");
        assert_eq!(decoded, json!({"1": "kept"}));
    }
}
