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

//! Field kinds and dynamic cell values.

use stratum_kv::Element;

use crate::error::{Error, Result};

/// The storage type of a field. Drives codec dispatch, tuple conversion,
/// and atomic-add constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Bytes,
    /// Fixed-length array; elements are encoded without a length prefix.
    Array(Box<Kind>, usize),
    List(Box<Kind>),
    Map(Box<Kind>, Box<Kind>),
    /// Nested struct; fields are encoded in declaration order.
    Struct(Vec<Kind>),
}

impl Kind {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Kind::I8
                | Kind::I16
                | Kind::I32
                | Kind::I64
                | Kind::U8
                | Kind::U16
                | Kind::U32
                | Kind::U64
        )
    }

    /// Short name persisted into the schema history.
    pub fn name(&self) -> String {
        match self {
            Kind::Bool => "bool".into(),
            Kind::I8 => "i8".into(),
            Kind::I16 => "i16".into(),
            Kind::I32 => "i32".into(),
            Kind::I64 => "i64".into(),
            Kind::U8 => "u8".into(),
            Kind::U16 => "u16".into(),
            Kind::U32 => "u32".into(),
            Kind::U64 => "u64".into(),
            Kind::F32 => "f32".into(),
            Kind::F64 => "f64".into(),
            Kind::String => "string".into(),
            Kind::Bytes => "bytes".into(),
            Kind::Array(inner, len) => format!("[{}; {len}]", inner.name()),
            Kind::List(inner) => format!("[{}]", inner.name()),
            Kind::Map(key, value) => format!("map[{}]{}", key.name(), value.name()),
            Kind::Struct(fields) => format!("struct({})", fields.len()),
        }
    }
}

/// A dynamically typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(Vec<Value>),
}

impl Value {
    /// The kind-zero value: what an absent cell decodes to.
    pub fn default_of(kind: &Kind) -> Value {
        match kind {
            Kind::Bool => Value::Bool(false),
            Kind::I8 => Value::I8(0),
            Kind::I16 => Value::I16(0),
            Kind::I32 => Value::I32(0),
            Kind::I64 => Value::I64(0),
            Kind::U8 => Value::U8(0),
            Kind::U16 => Value::U16(0),
            Kind::U32 => Value::U32(0),
            Kind::U64 => Value::U64(0),
            Kind::F32 => Value::F32(0.0),
            Kind::F64 => Value::F64(0.0),
            Kind::String => Value::String(String::new()),
            Kind::Bytes => Value::Bytes(Vec::new()),
            Kind::Array(inner, len) => {
                Value::Array(vec![Value::default_of(inner); *len])
            }
            Kind::List(_) => Value::List(Vec::new()),
            Kind::Map(_, _) => Value::Map(Vec::new()),
            Kind::Struct(fields) => {
                Value::Struct(fields.iter().map(Value::default_of).collect())
            }
        }
    }

    /// Whether the value equals the kind-zero value. Optional indexes use
    /// this to decide that a record carries nothing to index.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Bool(b) => !b,
            Value::I8(v) => *v == 0,
            Value::I16(v) => *v == 0,
            Value::I32(v) => *v == 0,
            Value::I64(v) => *v == 0,
            Value::U8(v) => *v == 0,
            Value::U16(v) => *v == 0,
            Value::U32(v) => *v == 0,
            Value::U64(v) => *v == 0,
            Value::F32(v) => *v == 0.0,
            Value::F64(v) => *v == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Array(items) | Value::List(items) | Value::Struct(items) => {
                items.iter().all(Value::is_empty)
            }
            Value::Map(entries) => entries.is_empty(),
        }
    }

    /// Convert to a tuple element for use inside keys. Only scalar kinds
    /// can live in a key.
    pub fn to_element(&self) -> Result<Element> {
        match self {
            Value::Bool(b) => Ok(Element::Bool(*b)),
            Value::I8(v) => Ok(Element::Int(*v as i64)),
            Value::I16(v) => Ok(Element::Int(*v as i64)),
            Value::I32(v) => Ok(Element::Int(*v as i64)),
            Value::I64(v) => Ok(Element::Int(*v)),
            Value::U8(v) => Ok(Element::Uint(*v as u64)),
            Value::U16(v) => Ok(Element::Uint(*v as u64)),
            Value::U32(v) => Ok(Element::Uint(*v as u64)),
            Value::U64(v) => Ok(Element::Uint(*v)),
            Value::F32(v) => Ok(Element::Double(*v as f64)),
            Value::F64(v) => Ok(Element::Double(*v)),
            Value::String(s) => Ok(Element::String(s.clone())),
            Value::Bytes(b) => Ok(Element::Bytes(b.clone())),
            other => Err(Error::mismatch(format!(
                "composite value {other:?} cannot be used inside a key"
            ))),
        }
    }

    /// Convert a decoded tuple element back to a value of the given kind.
    pub fn from_element(kind: &Kind, element: &Element) -> Result<Value> {
        let fail = || {
            Error::mismatch(format!(
                "key element {element:?} does not fit field kind {kind:?}"
            ))
        };
        let int = |min: i64, max: i64| -> Result<i64> {
            match element {
                Element::Int(i) if *i >= min && *i <= max => Ok(*i),
                Element::Uint(u) if *u <= max as u64 => Ok(*u as i64),
                _ => Err(fail()),
            }
        };
        let uint = |max: u64| -> Result<u64> {
            match element {
                Element::Int(i) if *i >= 0 && *i as u64 <= max => Ok(*i as u64),
                Element::Uint(u) if *u <= max => Ok(*u),
                _ => Err(fail()),
            }
        };
        match kind {
            Kind::Bool => match element {
                Element::Bool(b) => Ok(Value::Bool(*b)),
                _ => Err(fail()),
            },
            Kind::I8 => Ok(Value::I8(int(i8::MIN as i64, i8::MAX as i64)? as i8)),
            Kind::I16 => Ok(Value::I16(int(i16::MIN as i64, i16::MAX as i64)? as i16)),
            Kind::I32 => Ok(Value::I32(int(i32::MIN as i64, i32::MAX as i64)? as i32)),
            Kind::I64 => match element {
                Element::Int(i) => Ok(Value::I64(*i)),
                Element::Uint(u) if *u <= i64::MAX as u64 => Ok(Value::I64(*u as i64)),
                _ => Err(fail()),
            },
            Kind::U8 => Ok(Value::U8(uint(u8::MAX as u64)? as u8)),
            Kind::U16 => Ok(Value::U16(uint(u16::MAX as u64)? as u16)),
            Kind::U32 => Ok(Value::U32(uint(u32::MAX as u64)? as u32)),
            Kind::U64 => Ok(Value::U64(uint(u64::MAX)?)),
            Kind::F32 => match element {
                Element::Double(d) => Ok(Value::F32(*d as f32)),
                _ => Err(fail()),
            },
            Kind::F64 => match element {
                Element::Double(d) => Ok(Value::F64(*d)),
                _ => Err(fail()),
            },
            Kind::String => match element {
                Element::String(s) => Ok(Value::String(s.clone())),
                _ => Err(fail()),
            },
            Kind::Bytes => match element {
                Element::Bytes(b) => Ok(Value::Bytes(b.clone())),
                _ => Err(fail()),
            },
            _ => Err(fail()),
        }
    }

    /// Whether the value's variant is storable under the given kind.
    pub fn matches(&self, kind: &Kind) -> bool {
        match (self, kind) {
            (Value::Bool(_), Kind::Bool)
            | (Value::I8(_), Kind::I8)
            | (Value::I16(_), Kind::I16)
            | (Value::I32(_), Kind::I32)
            | (Value::I64(_), Kind::I64)
            | (Value::U8(_), Kind::U8)
            | (Value::U16(_), Kind::U16)
            | (Value::U32(_), Kind::U32)
            | (Value::U64(_), Kind::U64)
            | (Value::F32(_), Kind::F32)
            | (Value::F64(_), Kind::F64)
            | (Value::String(_), Kind::String)
            | (Value::Bytes(_), Kind::Bytes) => true,
            (Value::Array(items), Kind::Array(inner, len)) => {
                items.len() == *len && items.iter().all(|item| item.matches(inner))
            }
            (Value::List(items), Kind::List(inner)) => {
                items.iter().all(|item| item.matches(inner))
            }
            (Value::Map(entries), Kind::Map(key, value)) => entries
                .iter()
                .all(|(k, v)| k.matches(key) && v.matches(value)),
            (Value::Struct(items), Kind::Struct(kinds)) => {
                items.len() == kinds.len()
                    && items.iter().zip(kinds).all(|(item, kind)| item.matches(kind))
            }
            _ => false,
        }
    }

    /// Numeric view used by gen-id assignment and counter decoding.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            Value::U8(v) => Some(*v as i64),
            Value::U16(v) => Some(*v as i64),
            Value::U32(v) => Some(*v as i64),
            Value::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Build an integer value of the given kind, truncating to its width.
    pub fn integer_of(kind: &Kind, raw: i64) -> Result<Value> {
        match kind {
            Kind::I8 => Ok(Value::I8(raw as i8)),
            Kind::I16 => Ok(Value::I16(raw as i16)),
            Kind::I32 => Ok(Value::I32(raw as i32)),
            Kind::I64 => Ok(Value::I64(raw)),
            Kind::U8 => Ok(Value::U8(raw as u8)),
            Kind::U16 => Ok(Value::U16(raw as u16)),
            Kind::U32 => Ok(Value::U32(raw as u32)),
            Kind::U64 => Ok(Value::U64(raw as u64)),
            other => Err(Error::mismatch(format!("{other:?} is not an integer kind"))),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_element_roundtrip() {
        let cases = [
            (Kind::I64, Value::I64(-5)),
            (Kind::I32, Value::I32(77)),
            (Kind::U64, Value::U64(u64::MAX)),
            (Kind::String, Value::String("hi".into())),
            (Kind::Bytes, Value::Bytes(vec![1, 2])),
            (Kind::Bool, Value::Bool(true)),
            (Kind::F64, Value::F64(2.5)),
        ];
        for (kind, value) in cases {
            let element = value.to_element().unwrap();
            assert_eq!(Value::from_element(&kind, &element).unwrap(), value);
        }
    }

    #[test]
    fn test_element_kind_mismatch() {
        let element = Value::String("x".into()).to_element().unwrap();
        assert!(Value::from_element(&Kind::I64, &element).is_err());

        let element = Value::I64(300).to_element().unwrap();
        assert!(Value::from_element(&Kind::I8, &element).is_err());
    }

    #[test]
    fn test_emptiness() {
        assert!(Value::I64(0).is_empty());
        assert!(Value::String(String::new()).is_empty());
        assert!(!Value::I64(1).is_empty());
        assert!(!Value::String("x".into()).is_empty());
        assert!(Value::default_of(&Kind::Map(Box::new(Kind::String), Box::new(Kind::I32))).is_empty());
    }
}
