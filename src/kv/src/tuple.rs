// Copyright 2026 Stratum Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Order-preserving tuple encoding.
//!
//! A tuple is a sequence of typed scalars serialized to a byte string such
//! that the lexicographic order of encodings equals the element-wise order
//! of the tuples, and the encoding of a tuple is a strict prefix of the
//! encoding of any tuple it is a prefix of. Both properties are what make
//! range scans over key subspaces work.
//!
//! Each element starts with a type tag. Strings and byte strings escape
//! embedded `0x00` as `0x00 0xFF` and end with a bare `0x00`, so a packed
//! string (minus its terminator) is a byte prefix of every packed string it
//! textually prefixes. Integers use a biased length-in-tag scheme, doubles
//! a sign-flip transform.

use crate::error::{KvError, KvResult};

const TAG_BYTES: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_INT_ZERO: u8 = 0x14;
const TAG_DOUBLE: u8 = 0x21;
const TAG_FALSE: u8 = 0x26;
const TAG_TRUE: u8 = 0x27;

/// One element of a tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Bytes(Vec<u8>),
    String(String),
    Int(i64),
    Uint(u64),
    Double(f64),
    Bool(bool),
}

impl Element {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Element::Bytes(b) => {
                out.push(TAG_BYTES);
                escape_into(b, out);
            }
            Element::String(s) => {
                out.push(TAG_STRING);
                escape_into(s.as_bytes(), out);
            }
            Element::Int(i) => encode_int(*i, out),
            Element::Uint(u) => encode_uint(*u, out),
            Element::Double(d) => {
                out.push(TAG_DOUBLE);
                let bits = d.to_bits();
                let mapped = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
                out.extend_from_slice(&mapped.to_be_bytes());
            }
            Element::Bool(b) => out.push(if *b { TAG_TRUE } else { TAG_FALSE }),
        }
    }

    fn decode(input: &mut &[u8]) -> KvResult<Element> {
        let (&tag, rest) = input
            .split_first()
            .ok_or_else(|| KvError::Tuple("empty element".into()))?;
        *input = rest;
        match tag {
            TAG_BYTES => Ok(Element::Bytes(unescape(input)?)),
            TAG_STRING => {
                let raw = unescape(input)?;
                let s = String::from_utf8(raw)
                    .map_err(|_| KvError::Tuple("invalid utf-8 in string element".into()))?;
                Ok(Element::String(s))
            }
            TAG_DOUBLE => {
                let bytes = take(input, 8)?;
                let mapped = u64::from_be_bytes(bytes.try_into().unwrap());
                let bits = if mapped >> 63 == 1 { mapped ^ (1 << 63) } else { !mapped };
                Ok(Element::Double(f64::from_bits(bits)))
            }
            TAG_FALSE => Ok(Element::Bool(false)),
            TAG_TRUE => Ok(Element::Bool(true)),
            TAG_INT_ZERO => Ok(Element::Int(0)),
            t if t > TAG_INT_ZERO && t <= TAG_INT_ZERO + 8 => {
                let len = (t - TAG_INT_ZERO) as usize;
                let magnitude = be_uint(take(input, len)?);
                if magnitude <= i64::MAX as u64 {
                    Ok(Element::Int(magnitude as i64))
                } else {
                    Ok(Element::Uint(magnitude))
                }
            }
            t if t < TAG_INT_ZERO && t >= TAG_INT_ZERO - 8 => {
                let len = (TAG_INT_ZERO - t) as usize;
                let encoded = be_uint(take(input, len)?);
                let magnitude = max_for(len) - encoded;
                if magnitude == 1 << 63 {
                    Ok(Element::Int(i64::MIN))
                } else if magnitude <= i64::MAX as u64 {
                    Ok(Element::Int(-(magnitude as i64)))
                } else {
                    Err(KvError::Tuple("negative integer out of range".into()))
                }
            }
            t => Err(KvError::Tuple(format!("unknown element tag {t:#04x}"))),
        }
    }
}

/// Pack a tuple into a fresh byte string.
pub fn pack(elements: &[Element]) -> Vec<u8> {
    let mut out = Vec::with_capacity(elements.len() * 8);
    pack_into(elements, &mut out);
    out
}

/// Pack a tuple, appending to `out`.
pub fn pack_into(elements: &[Element], out: &mut Vec<u8>) {
    for element in elements {
        element.encode(out);
    }
}

/// Decode a packed tuple, consuming the whole input.
pub fn unpack(mut key: &[u8]) -> KvResult<Vec<Element>> {
    let mut elements = Vec::new();
    while !key.is_empty() {
        elements.push(Element::decode(&mut key)?);
    }
    Ok(elements)
}

fn escape_into(raw: &[u8], out: &mut Vec<u8>) {
    for &b in raw {
        out.push(b);
        if b == 0x00 {
            out.push(0xFF);
        }
    }
    out.push(0x00);
}

fn unescape(input: &mut &[u8]) -> KvResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < input.len() {
        let b = input[i];
        if b == 0x00 {
            if input.get(i + 1) == Some(&0xFF) {
                out.push(0x00);
                i += 2;
                continue;
            }
            *input = &input[i + 1..];
            return Ok(out);
        }
        out.push(b);
        i += 1;
    }
    Err(KvError::Tuple("unterminated byte string".into()))
}

fn encode_int(value: i64, out: &mut Vec<u8>) {
    if value >= 0 {
        encode_uint(value as u64, out);
        return;
    }
    // i64::MIN magnitude still fits an u64
    let magnitude = (value as i128).unsigned_abs() as u64;
    let len = byte_len(magnitude);
    let encoded = max_for(len) - magnitude;
    out.push(TAG_INT_ZERO - len as u8);
    out.extend_from_slice(&encoded.to_be_bytes()[8 - len..]);
}

fn encode_uint(value: u64, out: &mut Vec<u8>) {
    if value == 0 {
        out.push(TAG_INT_ZERO);
        return;
    }
    let len = byte_len(value);
    out.push(TAG_INT_ZERO + len as u8);
    out.extend_from_slice(&value.to_be_bytes()[8 - len..]);
}

fn byte_len(value: u64) -> usize {
    (8 - value.leading_zeros() as usize / 8).max(1)
}

/// Largest unsigned value representable in `len` bytes.
fn max_for(len: usize) -> u64 {
    if len >= 8 {
        u64::MAX
    } else {
        (1u64 << (len * 8)) - 1
    }
}

fn be_uint(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

fn take<'a>(input: &mut &'a [u8], len: usize) -> KvResult<&'a [u8]> {
    if input.len() < len {
        return Err(KvError::Tuple("short element".into()));
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

impl From<i64> for Element {
    fn from(v: i64) -> Self {
        Element::Int(v)
    }
}

impl From<i32> for Element {
    fn from(v: i32) -> Self {
        Element::Int(v as i64)
    }
}

impl From<u64> for Element {
    fn from(v: u64) -> Self {
        Element::Uint(v)
    }
}

impl From<&str> for Element {
    fn from(v: &str) -> Self {
        Element::String(v.to_owned())
    }
}

impl From<String> for Element {
    fn from(v: String) -> Self {
        Element::String(v)
    }
}

impl From<Vec<u8>> for Element {
    fn from(v: Vec<u8>) -> Self {
        Element::Bytes(v)
    }
}

impl From<bool> for Element {
    fn from(v: bool) -> Self {
        Element::Bool(v)
    }
}

impl From<f64> for Element {
    fn from(v: f64) -> Self {
        Element::Double(v)
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use pretty_assertions::assert_eq;

    use super::*;

    fn roundtrip(elements: Vec<Element>) {
        let packed = pack(&elements);
        assert_eq!(unpack(&packed).unwrap(), elements);
    }

    #[test]
    fn test_roundtrip() {
        roundtrip(vec![]);
        roundtrip(vec![Element::Int(0)]);
        roundtrip(vec![Element::Int(1), Element::Int(-1)]);
        roundtrip(vec![Element::Int(i64::MAX), Element::Int(i64::MIN)]);
        roundtrip(vec![Element::Uint(u64::MAX)]);
        roundtrip(vec![Element::String("hello".into()), Element::String("".into())]);
        roundtrip(vec![Element::String("a\x00b".into())]);
        roundtrip(vec![Element::Bytes(vec![0, 1, 0xFF, 0])]);
        roundtrip(vec![Element::Bool(true), Element::Bool(false)]);
        roundtrip(vec![Element::Double(0.0), Element::Double(-1.5), Element::Double(1.5)]);
        roundtrip(vec![
            Element::String("user".into()),
            Element::Int(42),
            Element::Bytes(vec![7]),
        ]);
    }

    #[test]
    fn test_integer_order() {
        let values = [
            i64::MIN,
            i64::MIN + 1,
            -65536,
            -256,
            -255,
            -2,
            -1,
            0,
            1,
            2,
            255,
            256,
            65535,
            i64::MAX,
        ];
        for (a, b) in values.iter().tuple_windows() {
            let pa = pack(&[Element::Int(*a)]);
            let pb = pack(&[Element::Int(*b)]);
            assert!(pa < pb, "{a} should sort before {b}");
        }
    }

    #[test]
    fn test_string_order_and_prefix() {
        let pa = pack(&[Element::String("abc".into())]);
        let pb = pack(&[Element::String("abd".into())]);
        assert!(pa < pb);

        // Minus the terminator, "ab" is a byte prefix of "abc".
        let mut prefix = pack(&[Element::String("ab".into())]);
        assert_eq!(prefix.pop(), Some(0x00));
        assert!(pa.starts_with(&prefix));
    }

    #[test]
    fn test_double_order() {
        let values = [f64::NEG_INFINITY, -10.5, -0.0, 0.0, 1.0e-10, 2.5, f64::INFINITY];
        for (a, b) in values.iter().tuple_windows() {
            let pa = pack(&[Element::Double(*a)]);
            let pb = pack(&[Element::Double(*b)]);
            assert!(pa <= pb, "{a} should not sort after {b}");
        }
    }

    #[test]
    fn test_tuple_prefix_property() {
        let short = pack(&[Element::String("chat".into()), Element::Int(9)]);
        let long = pack(&[
            Element::String("chat".into()),
            Element::Int(9),
            Element::String("text".into()),
        ]);
        assert!(long.starts_with(&short));
    }

    #[test]
    fn test_malformed() {
        assert!(unpack(&[0x02, b'a']).is_err());
        assert!(unpack(&[0x15]).is_err());
        assert!(unpack(&[0x7F]).is_err());
    }
}
