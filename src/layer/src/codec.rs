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

//! Packed codec: typed value <-> compact byte encoding for field cells.
//!
//! Scalars are fixed-width little-endian; booleans one byte; strings, byte
//! strings, lists and maps carry an unsigned varint length prefix; fixed
//! arrays and structs encode their elements back to back with no length.
//! The encoding is byte-exact, so equal values always compare equal at the
//! index layer.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::types::{Kind, Value};

/// Encode a value of the given kind, appending to `out`.
pub fn encode(kind: &Kind, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    if !value.matches(kind) {
        return Err(Error::mismatch(format!(
            "value {value:?} does not match field kind {kind:?}"
        )));
    }
    encode_unchecked(kind, value, out);
    Ok(())
}

/// Encode into a fresh buffer.
pub fn encode_to_vec(kind: &Kind, value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode(kind, value, &mut out)?;
    Ok(out)
}

fn encode_unchecked(kind: &Kind, value: &Value, out: &mut Vec<u8>) {
    match (kind, value) {
        (Kind::Bool, Value::Bool(b)) => out.put_u8(*b as u8),
        (Kind::I8, Value::I8(v)) => out.put_i8(*v),
        (Kind::I16, Value::I16(v)) => out.put_i16_le(*v),
        (Kind::I32, Value::I32(v)) => out.put_i32_le(*v),
        (Kind::I64, Value::I64(v)) => out.put_i64_le(*v),
        (Kind::U8, Value::U8(v)) => out.put_u8(*v),
        (Kind::U16, Value::U16(v)) => out.put_u16_le(*v),
        (Kind::U32, Value::U32(v)) => out.put_u32_le(*v),
        (Kind::U64, Value::U64(v)) => out.put_u64_le(*v),
        (Kind::F32, Value::F32(v)) => out.put_f32_le(*v),
        (Kind::F64, Value::F64(v)) => out.put_f64_le(*v),
        (Kind::String, Value::String(s)) => {
            encode_varint(s.len() as u64, out);
            out.put_slice(s.as_bytes());
        }
        (Kind::Bytes, Value::Bytes(b)) => {
            encode_varint(b.len() as u64, out);
            out.put_slice(b);
        }
        (Kind::Array(inner, _), Value::Array(items)) => {
            for item in items {
                encode_unchecked(inner, item, out);
            }
        }
        (Kind::List(inner), Value::List(items)) => {
            encode_varint(items.len() as u64, out);
            for item in items {
                encode_unchecked(inner, item, out);
            }
        }
        (Kind::Map(key_kind, value_kind), Value::Map(entries)) => {
            encode_varint(entries.len() as u64, out);
            for (key, value) in entries {
                encode_unchecked(key_kind, key, out);
                encode_unchecked(value_kind, value, out);
            }
        }
        (Kind::Struct(kinds), Value::Struct(items)) => {
            for (kind, item) in kinds.iter().zip(items) {
                encode_unchecked(kind, item, out);
            }
        }
        // `matches` ruled out every other pairing.
        _ => unreachable!("codec dispatch after kind check"),
    }
}

/// Decode one value of the given kind, consuming from `input`.
pub fn decode(kind: &Kind, input: &mut &[u8]) -> Result<Value> {
    match kind {
        Kind::Bool => Ok(Value::Bool(take(input, 1)?[0] != 0)),
        Kind::I8 => Ok(Value::I8(take(input, 1)?[0] as i8)),
        Kind::I16 => Ok(Value::I16(fixed(input, i16::from_le_bytes)?)),
        Kind::I32 => Ok(Value::I32(fixed(input, i32::from_le_bytes)?)),
        Kind::I64 => Ok(Value::I64(fixed(input, i64::from_le_bytes)?)),
        Kind::U8 => Ok(Value::U8(take(input, 1)?[0])),
        Kind::U16 => Ok(Value::U16(fixed(input, u16::from_le_bytes)?)),
        Kind::U32 => Ok(Value::U32(fixed(input, u32::from_le_bytes)?)),
        Kind::U64 => Ok(Value::U64(fixed(input, u64::from_le_bytes)?)),
        Kind::F32 => Ok(Value::F32(fixed(input, f32::from_le_bytes)?)),
        Kind::F64 => Ok(Value::F64(fixed(input, f64::from_le_bytes)?)),
        Kind::String => {
            let len = decode_varint(input)? as usize;
            let raw = take(input, len)?;
            String::from_utf8(raw.to_vec())
                .map(Value::String)
                .map_err(|_| Error::corrupt("invalid utf-8 in string cell"))
        }
        Kind::Bytes => {
            let len = decode_varint(input)? as usize;
            Ok(Value::Bytes(take(input, len)?.to_vec()))
        }
        Kind::Array(inner, len) => {
            let mut items = Vec::with_capacity(*len);
            for _ in 0..*len {
                items.push(decode(inner, input)?);
            }
            Ok(Value::Array(items))
        }
        Kind::List(inner) => {
            let len = decode_varint(input)? as usize;
            let mut items = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                items.push(decode(inner, input)?);
            }
            Ok(Value::List(items))
        }
        Kind::Map(key_kind, value_kind) => {
            let len = decode_varint(input)? as usize;
            let mut entries = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                let key = decode(key_kind, input)?;
                let value = decode(value_kind, input)?;
                entries.push((key, value));
            }
            Ok(Value::Map(entries))
        }
        Kind::Struct(kinds) => {
            let mut items = Vec::with_capacity(kinds.len());
            for kind in kinds {
                items.push(decode(kind, input)?);
            }
            Ok(Value::Struct(items))
        }
    }
}

/// Decode a whole cell; trailing bytes are corruption.
pub fn decode_exact(kind: &Kind, mut input: &[u8]) -> Result<Value> {
    let value = decode(kind, &mut input)?;
    if !input.is_empty() {
        return Err(Error::corrupt("trailing bytes after decoded cell"));
    }
    Ok(value)
}

/// `+1` in the fixed 8-byte width counters are kept in.
pub(crate) const COUNT_INC: &[u8] = &[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
/// `-1` (two's complement) in the counter width.
pub(crate) const COUNT_DEC: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// `+1` in the field's width, suitable for the store's atomic add.
pub fn plus_one(kind: &Kind) -> Result<&'static [u8]> {
    match kind {
        Kind::I8 | Kind::U8 => Ok(&[0x01]),
        Kind::I16 | Kind::U16 => Ok(&[0x01, 0x00]),
        Kind::I32 | Kind::U32 => Ok(&[0x01, 0x00, 0x00, 0x00]),
        Kind::I64 | Kind::U64 => Ok(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
        other => Err(Error::mismatch(format!(
            "{other:?} does not support atomic increment"
        ))),
    }
}

/// `-1` (two's complement) in the field's width.
pub fn minus_one(kind: &Kind) -> Result<&'static [u8]> {
    match kind {
        Kind::I8 | Kind::U8 => Ok(&[0xFF]),
        Kind::I16 | Kind::U16 => Ok(&[0xFF, 0xFF]),
        Kind::I32 | Kind::U32 => Ok(&[0xFF, 0xFF, 0xFF, 0xFF]),
        Kind::I64 | Kind::U64 => Ok(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
        other => Err(Error::mismatch(format!(
            "{other:?} does not support atomic decrement"
        ))),
    }
}

pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            out.put_u8(value as u8);
            return;
        }
        out.put_u8(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
}

pub fn decode_varint(input: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for shift in 0..10 {
        let byte = take(input, 1)?[0];
        value |= ((byte & 0x7F) as u64) << (shift * 7);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::corrupt("varint longer than ten bytes"))
}

fn take<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if input.remaining() < len {
        return Err(Error::corrupt("short read while decoding cell"));
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

fn fixed<T, const N: usize>(input: &mut &[u8], convert: fn([u8; N]) -> T) -> Result<T> {
    let raw = take(input, N)?;
    Ok(convert(raw.try_into().expect("slice length checked")))
}
