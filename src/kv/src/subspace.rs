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

use bytes::Bytes;

use crate::error::{KvError, KvResult};
use crate::tuple::{self, Element};

/// A byte-string key prefix. Operations on a subspace implicitly prepend the
/// prefix to every key they touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subspace {
    prefix: Bytes,
}

/// A half-open key interval `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub begin: Bytes,
    pub end: Bytes,
}

impl Subspace {
    pub fn new(prefix: impl Into<Bytes>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// The raw prefix, which is also the key of the subspace's own row.
    pub fn key(&self) -> &[u8] {
        &self.prefix
    }

    /// A child subspace whose prefix is this one extended by the packed
    /// elements.
    pub fn sub(&self, elements: &[Element]) -> Subspace {
        Subspace { prefix: self.pack(elements) }
    }

    /// Pack a tuple under this prefix.
    pub fn pack(&self, elements: &[Element]) -> Bytes {
        let mut out = Vec::with_capacity(self.prefix.len() + elements.len() * 8);
        out.extend_from_slice(&self.prefix);
        tuple::pack_into(elements, &mut out);
        out.into()
    }

    /// Strip the prefix and decode the remainder of `key` as a tuple.
    pub fn unpack(&self, key: &[u8]) -> KvResult<Vec<Element>> {
        let rest = key
            .strip_prefix(self.prefix.as_ref())
            .ok_or_else(|| KvError::Tuple("key is outside the subspace".into()))?;
        tuple::unpack(rest)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
    }

    /// The range of keys strictly below this subspace: `prefix 00 ..
    /// prefix FF`. Excludes the bare prefix key itself.
    pub fn range(&self) -> KeyRange {
        KeyRange {
            begin: extended(&self.prefix, 0x00),
            end: extended(&self.prefix, 0xFF),
        }
    }

    /// The range including the bare prefix key: `prefix .. prefix FF`. Used
    /// for record rows, where the bare key may carry an existence marker.
    pub fn raw_range(&self) -> KeyRange {
        KeyRange {
            begin: self.prefix.clone(),
            end: extended(&self.prefix, 0xFF),
        }
    }
}

fn extended(prefix: &[u8], last: u8) -> Bytes {
    let mut out = Vec::with_capacity(prefix.len() + 1);
    out.extend_from_slice(prefix);
    out.push(last);
    out.into()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_pack_unpack() {
        let root = Subspace::new(vec![0x15, 0x2A]);
        let key = root.pack(&[Element::from("login"), Element::from(7i64)]);
        assert!(root.contains(&key));
        assert_eq!(
            root.unpack(&key).unwrap(),
            vec![Element::from("login"), Element::from(7i64)]
        );

        let other = Subspace::new(vec![0x16]);
        assert!(other.unpack(&key).is_err());
    }

    #[test]
    fn test_nested_sub() {
        let root = Subspace::new(vec![0x15]);
        let child = root.sub(&[Element::from("misc")]);
        let key = child.pack(&[Element::from("ai")]);
        assert_eq!(
            root.unpack(&key).unwrap(),
            vec![Element::from("misc"), Element::from("ai")]
        );
    }

    #[test]
    fn test_range_bounds() {
        let sub = Subspace::new(vec![0x15, 0x01]);
        let range = sub.range();
        assert_eq!(range.begin.as_ref(), &[0x15, 0x01, 0x00]);
        assert_eq!(range.end.as_ref(), &[0x15, 0x01, 0xFF]);

        let raw = sub.raw_range();
        assert_eq!(raw.begin.as_ref(), &[0x15, 0x01]);
        // The bare prefix key is inside the raw range but outside the
        // strict one.
        assert!(raw.begin >= sub.key());
        assert!(range.begin.as_ref() > sub.key());
    }
}
