//! # Bencode Codec
//!
//! Decoder and encoder for the bencode format used by torrent files and
//! tracker responses:
//!
//! - Integers:   `i<number>e`        Example: `i42e`
//! - Strings:    `<length>:<data>`   Example: `4:spam`
//! - Lists:      `l<items>e`         Example: `l4:spami42ee`
//! - Dicts:      `d<pairs>e`         Example: `d3:cow3:moo4:spam4:eggse`
//!
//! The decoder works on byte offsets rather than consuming slices, which
//! lets [`dict_value_span`] report the exact byte range a value occupies in
//! the source. The raw span of the `info` dictionary is what gets hashed to
//! form the torrent's identity, so it must come straight from the input
//! rather than from a re-encode.

use std::collections::BTreeMap;
use std::ops::Range;

use thiserror::Error;

/// Byte strings larger than this are rejected outright to keep a hostile
/// length prefix from allocating unbounded memory.
const MAX_BYTES_LEN: usize = 100 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("malformed bencode: {0}")]
    Malformed(&'static str),
    #[error("truncated bencode: {0}")]
    Truncated(&'static str),
}

/// A decoded bencode value.
///
/// Dictionary keys are raw byte strings; `BTreeMap` keeps them in
/// lexicographic byte order, which is also the canonical wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Signed integer
    Int(i64),
    /// Byte string, not necessarily valid UTF-8
    Bytes(Vec<u8>),
    /// Ordered list of values
    List(Vec<Value>),
    /// Dictionary keyed by byte strings
    Dict(BTreeMap<Vec<u8>, Value>),
}

/// Decode a complete bencoded value, rejecting trailing bytes.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, end) = parse_value(data, 0)?;
    if end != data.len() {
        return Err(BencodeError::Malformed("trailing bytes after value"));
    }
    Ok(value)
}

/// Decode the first value in `data`, returning it together with the number
/// of source bytes it spans.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    parse_value(data, 0)
}

/// Locate the raw encoded bytes of one key's value inside a top-level
/// dictionary.
///
/// Returns `None` when the key is absent. The returned range indexes into
/// `data` and spans exactly the value, excluding the key.
pub fn dict_value_span(data: &[u8], key: &[u8]) -> Result<Option<Range<usize>>, BencodeError> {
    if data.first() != Some(&b'd') {
        return Err(BencodeError::Malformed("top-level value is not a dictionary"));
    }
    let mut cur = 1;
    loop {
        match data.get(cur) {
            None => return Err(BencodeError::Truncated("dictionary missing terminator")),
            Some(b'e') => return Ok(None),
            Some(_) => {
                let (parsed_key, key_end) = parse_value(data, cur)?;
                let Value::Bytes(parsed_key) = parsed_key else {
                    return Err(BencodeError::Malformed("dictionary key must be a byte string"));
                };
                let (_, value_end) = parse_value(data, key_end)?;
                if parsed_key == key {
                    return Ok(Some(key_end..value_end));
                }
                cur = value_end;
            }
        }
    }
}

fn parse_value(data: &[u8], pos: usize) -> Result<(Value, usize), BencodeError> {
    match data.get(pos) {
        None => Err(BencodeError::Truncated("expected a value")),
        Some(b'i') => parse_int(data, pos),
        Some(b'0'..=b'9') => parse_bytes(data, pos),
        Some(b'l') => parse_list(data, pos),
        Some(b'd') => parse_dict(data, pos),
        Some(_) => Err(BencodeError::Malformed("unrecognized value prefix")),
    }
}

fn parse_int(data: &[u8], pos: usize) -> Result<(Value, usize), BencodeError> {
    let end = data[pos + 1..]
        .iter()
        .position(|&b| b == b'e')
        .map(|offset| pos + 1 + offset)
        .ok_or(BencodeError::Truncated("integer missing terminator"))?;

    let body = &data[pos + 1..end];
    if body.is_empty() {
        return Err(BencodeError::Malformed("empty integer"));
    }

    // Leading zeros and "-0" are technically malformed but tolerated here;
    // re-encoding always emits the shortest form.
    let text = std::str::from_utf8(body)
        .map_err(|_| BencodeError::Malformed("integer is not ASCII"))?;
    let value = text
        .parse::<i64>()
        .map_err(|_| BencodeError::Malformed("bad integer literal"))?;

    Ok((Value::Int(value), end + 1))
}

fn parse_bytes(data: &[u8], pos: usize) -> Result<(Value, usize), BencodeError> {
    let mut colon = pos;
    loop {
        match data.get(colon) {
            None => return Err(BencodeError::Truncated("length prefix missing colon")),
            Some(b':') => break,
            Some(b) if b.is_ascii_digit() => colon += 1,
            Some(_) => return Err(BencodeError::Malformed("bad length prefix")),
        }
    }

    let len = std::str::from_utf8(&data[pos..colon])
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or(BencodeError::Malformed("bad length prefix"))?;
    if len > MAX_BYTES_LEN {
        return Err(BencodeError::Malformed("byte string length out of range"));
    }

    let start = colon + 1;
    let end = start
        .checked_add(len)
        .ok_or(BencodeError::Malformed("byte string length out of range"))?;
    if end > data.len() {
        return Err(BencodeError::Truncated("byte string runs past end of input"));
    }

    Ok((Value::Bytes(data[start..end].to_vec()), end))
}

fn parse_list(data: &[u8], pos: usize) -> Result<(Value, usize), BencodeError> {
    let mut items = Vec::new();
    let mut cur = pos + 1;
    loop {
        match data.get(cur) {
            None => return Err(BencodeError::Truncated("list missing terminator")),
            Some(b'e') => return Ok((Value::List(items), cur + 1)),
            Some(_) => {
                let (item, next) = parse_value(data, cur)?;
                items.push(item);
                cur = next;
            }
        }
    }
}

fn parse_dict(data: &[u8], pos: usize) -> Result<(Value, usize), BencodeError> {
    let mut entries = BTreeMap::new();
    let mut cur = pos + 1;
    loop {
        match data.get(cur) {
            None => return Err(BencodeError::Truncated("dictionary missing terminator")),
            Some(b'e') => return Ok((Value::Dict(entries), cur + 1)),
            Some(b) if b.is_ascii_digit() => {
                let (key, key_end) = parse_bytes(data, cur)?;
                let Value::Bytes(key) = key else { unreachable!() };
                let (value, value_end) = parse_value(data, key_end)?;
                // Keys arriving out of order are accepted leniently; the
                // map restores canonical order on re-encode.
                entries.insert(key, value);
                cur = value_end;
            }
            Some(_) => return Err(BencodeError::Malformed("dictionary key must be a byte string")),
        }
    }
}

impl Value {
    /// Encode to canonical bencode bytes.
    ///
    /// Dictionary keys serialize in lexicographic byte order and integers in
    /// their shortest signed decimal form, so `encode(decode(x)) == x` holds
    /// for any canonical input.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    fn encode_to(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Int(n) => {
                buf.push(b'i');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.push(b'e');
            }
            Self::Bytes(bytes) => {
                buf.extend_from_slice(bytes.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(bytes);
            }
            Self::List(items) => {
                buf.push(b'l');
                for item in items {
                    item.encode_to(buf);
                }
                buf.push(b'e');
            }
            Self::Dict(entries) => {
                buf.push(b'd');
                for (key, value) in entries {
                    buf.extend_from_slice(key.len().to_string().as_bytes());
                    buf.push(b':');
                    buf.extend_from_slice(key);
                    value.encode_to(buf);
                }
                buf.push(b'e');
            }
        }
    }

    /// Render as JSON for display. Byte strings convert lossily to UTF-8.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Bytes(bytes) => {
                serde_json::Value::from(String::from_utf8_lossy(bytes).into_owned())
            }
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Dict(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| {
                        (String::from_utf8_lossy(key).into_owned(), value.to_json())
                    })
                    .collect(),
            ),
        }
    }

    /// The integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The raw bytes, if this is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The bytes as UTF-8 text, if this is a byte string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// The items, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// The entries, if this is a dictionary.
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Self::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a dictionary entry by key.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        match self {
            Self::Dict(entries) => entries.get(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_dict_with_sorted_keys() {
        let value = decode(b"d3:foo3:bar5:helloi52ee").unwrap();
        assert_eq!(value.get(b"foo").and_then(Value::as_str), Some("bar"));
        assert_eq!(value.get(b"hello").and_then(Value::as_int), Some(52));
        assert_eq!(value.to_json().to_string(), r#"{"foo":"bar","hello":52}"#);
    }

    #[test]
    fn decodes_list() {
        let value = decode(b"l5:helloi52ee").unwrap();
        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_str(), Some("hello"));
        assert_eq!(items[1].as_int(), Some(52));
        assert_eq!(value.to_json().to_string(), r#"["hello",52]"#);
    }

    #[test]
    fn decodes_integers() {
        assert_eq!(decode(b"i-123e").unwrap(), Value::Int(-123));
        assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
        assert_eq!(
            decode(b"i123"),
            Err(BencodeError::Truncated("integer missing terminator"))
        );
        assert!(matches!(decode(b"iasde"), Err(BencodeError::Malformed(_))));
    }

    #[test]
    fn decodes_binary_byte_strings() {
        let value = decode(b"4:\x00\x01\x02\x03").unwrap();
        assert_eq!(value.as_bytes(), Some(&[0u8, 1, 2, 3][..]));
        assert_eq!(decode(b"0:").unwrap(), Value::Bytes(vec![]));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(decode(b""), Err(BencodeError::Truncated(_))));
        assert!(matches!(decode(b"x"), Err(BencodeError::Malformed(_))));
        assert!(matches!(decode(b"5:ab"), Err(BencodeError::Truncated(_))));
        assert!(matches!(decode(b"li1e"), Err(BencodeError::Truncated(_))));
        assert!(matches!(decode(b"d3:fooe"), Err(BencodeError::Malformed(_))));
        assert!(matches!(decode(b"i1ei2e"), Err(BencodeError::Malformed(_))));
    }

    #[test]
    fn round_trips_canonical_input() {
        let samples: &[&[u8]] = &[
            b"i42e",
            b"i-7e",
            b"4:spam",
            b"l4:spami42ee",
            b"d3:cow3:moo4:spam4:eggse",
            b"d5:itemsli1ei2ei3ee4:name4:test5:valuei42ee",
        ];
        for sample in samples {
            let value = decode(sample).unwrap();
            assert_eq!(value.encode(), sample.to_vec());
        }
    }

    #[test]
    fn encoder_restores_key_order() {
        // Keys decoded out of order come back canonical.
        let value = decode(b"d1:b3:foo1:a3:bare").unwrap();
        assert_eq!(value.encode(), b"d1:a3:bar1:b3:fooe".to_vec());
    }

    #[test]
    fn reports_value_spans() {
        let data = b"d8:announce3:url4:infod6:lengthi5eee";
        let (_, consumed) = decode_prefix(data).unwrap();
        assert_eq!(consumed, data.len());

        let span = dict_value_span(data, b"info").unwrap().unwrap();
        assert_eq!(&data[span], b"d6:lengthi5ee");

        let span = dict_value_span(data, b"announce").unwrap().unwrap();
        assert_eq!(&data[span], b"3:url");

        assert_eq!(dict_value_span(data, b"missing").unwrap(), None);
        assert!(dict_value_span(b"i1e", b"info").is_err());
    }
}
