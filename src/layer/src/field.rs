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

use rand::Rng;

use crate::codec;
use crate::error::{Error, Result};
use crate::types::{Kind, Value};

/// Id-generation strategy applied on `add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenId {
    #[default]
    None,
    /// Unix nanoseconds folded with a small random component; useful when a
    /// date-ordered primary key is wanted anyway.
    Date,
    /// Random 63-bit id; spreads records evenly and reveals nothing.
    Random,
}

/// Description of one declared field.
#[derive(Debug, Clone)]
pub struct Field {
    /// Stored name: the last key element of the field's row and a building
    /// block for index names.
    pub name: String,
    /// Position within the record, used for [`Record`](crate::Record)
    /// access.
    pub pos: usize,
    pub kind: Kind,
    /// Lives in the primary key tuple, never in a value row.
    pub primary: bool,
    /// Eligible for atomic per-field operations.
    pub mutable: bool,
    /// Never persisted; a data carrier, e.g. for relation edge payloads.
    pub unstored: bool,
    pub auto_increment: bool,
    pub gen_id: GenId,
}

/// Parsed form of a field annotation: `"<stored-name>[,flag…]"`.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ParsedTag {
    pub name: String,
    pub primary: bool,
    pub mutable: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub unstored: bool,
}

impl ParsedTag {
    pub fn parse(tag: &str) -> Result<ParsedTag> {
        let mut parts = tag.split(',');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(Error::schema("field tag has no stored name"));
        }
        let mut parsed = ParsedTag { name: name.to_owned(), ..ParsedTag::default() };
        for part in parts {
            match part.trim() {
                "primary" => parsed.primary = true,
                "mutable" => parsed.mutable = true,
                "autoincrement" => parsed.auto_increment = true,
                "unique" => parsed.unique = true,
                "unstored" => parsed.unstored = true,
                flag => {
                    return Err(Error::schema(format!(
                        "field «{name}» has unsupported «{flag}» option"
                    )))
                }
            }
        }
        Ok(parsed)
    }
}

impl Field {
    /// Whether the field occupies its own kv row under the record.
    pub fn stored(&self) -> bool {
        !self.unstored && !self.primary
    }

    pub(crate) fn set_auto_increment(&mut self) -> Result<()> {
        if !self.kind.is_integer() {
            return Err(Error::schema(format!(
                "field «{}» of kind {:?} cannot be auto-incremented",
                self.name, self.kind
            )));
        }
        if self.gen_id != GenId::None {
            return Err(Error::schema(format!(
                "field «{}» already generates ids, cannot also auto-increment",
                self.name
            )));
        }
        self.auto_increment = true;
        Ok(())
    }

    pub(crate) fn set_gen_id(&mut self, strategy: GenId) -> Result<()> {
        if !matches!(self.kind, Kind::I64 | Kind::U64) {
            return Err(Error::schema(format!(
                "field «{}» must be a 64-bit integer to carry generated ids",
                self.name
            )));
        }
        if self.auto_increment {
            return Err(Error::schema(format!(
                "field «{}» is auto-incremented, cannot also generate ids",
                self.name
            )));
        }
        self.gen_id = strategy;
        Ok(())
    }

    /// Produce a fresh id per the field's strategy. Runs inside the write
    /// chain, so a conflict retry draws a new id.
    pub(crate) fn generate_id(&self) -> Result<Value> {
        let raw = match self.gen_id {
            GenId::None => {
                return Err(Error::schema(format!(
                    "field «{}» has no id generation strategy",
                    self.name
                )))
            }
            GenId::Date => {
                let nanos = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos() as i64;
                nanos ^ rand::thread_rng().gen_range(0..0xFFFF)
            }
            GenId::Random => rand::thread_rng().gen_range(0..i64::MAX),
        };
        Value::integer_of(&self.kind, raw)
    }

    pub(crate) fn plus_one(&self) -> Result<&'static [u8]> {
        codec::plus_one(&self.kind)
    }

    /// Decode the little-endian cell an atomic add produced back into the
    /// field's kind.
    pub(crate) fn decode_counter(&self, raw: &[u8]) -> Result<Value> {
        codec::decode_exact(&self.kind, raw)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_tag() {
        let tag = ParsedTag::parse("id,primary,autoincrement").unwrap();
        assert_eq!(tag.name, "id");
        assert!(tag.primary);
        assert!(tag.auto_increment);
        assert!(!tag.mutable);

        let tag = ParsedTag::parse("login").unwrap();
        assert_eq!(tag.name, "login");
        assert!(!tag.primary);

        let tag = ParsedTag::parse("score, mutable").unwrap();
        assert!(tag.mutable);
    }

    #[test]
    fn test_parse_tag_rejects_unknown_flag() {
        let err = ParsedTag::parse("login,uniq").unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(ParsedTag::parse("").is_err());
    }

    #[test]
    fn test_auto_increment_kinds() {
        let mut field = Field {
            name: "id".into(),
            pos: 0,
            kind: Kind::I64,
            primary: true,
            mutable: false,
            unstored: false,
            auto_increment: false,
            gen_id: GenId::None,
        };
        field.set_auto_increment().unwrap();
        assert!(field.auto_increment);

        let mut text = Field { kind: Kind::String, ..field.clone() };
        assert!(text.set_auto_increment().is_err());

        // Mutually exclusive with generated ids.
        let mut gen = Field { auto_increment: false, ..field.clone() };
        gen.set_gen_id(GenId::Random).unwrap();
        assert!(gen.set_auto_increment().is_err());
        assert!(field.set_gen_id(GenId::Date).is_err());
    }

    #[test]
    fn test_generate_id() {
        let field = Field {
            name: "id".into(),
            pos: 0,
            kind: Kind::I64,
            primary: true,
            mutable: false,
            unstored: false,
            auto_increment: false,
            gen_id: GenId::Random,
        };
        let id = field.generate_id().unwrap();
        assert!(matches!(id, Value::I64(v) if v >= 0));
    }
}
