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

//! Persisted schema history.
//!
//! Every built object keeps up to 255 versions of its field layout under
//! `misc/schema/<version>`, as JSON blobs recording which fields live in
//! the primary tuple, the packed body, and mutable rows. When the layout
//! declared by the current build differs from the newest stored version, a
//! new version is written, the signal that a migration will be needed.
//! Reading the history back to drive a migration is not implemented here.

use serde::{Deserialize, Serialize};
use stratum_kv::{Element, RangeOptions, Subspace};

use crate::error::{Error, Result};
use crate::field::Field;
use crate::promise::ChainCtx;

const MAX_VERSIONS: u16 = 255;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct SchemaField {
    pub name: String,
    /// Declared name on the host-language type; the layer keeps it equal
    /// to the stored name, a generator may diverge them.
    pub obj_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl SchemaField {
    fn of(field: &Field) -> SchemaField {
        SchemaField {
            name: field.name.clone(),
            obj_name: field.name.clone(),
            type_name: field.kind.name(),
        }
    }

    fn matches(&self, other: &SchemaField) -> bool {
        (self.name == other.name || self.obj_name == other.obj_name)
            && self.type_name == other.type_name
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SchemaVersion {
    pub primary: Vec<SchemaField>,
    pub packed: Vec<SchemaField>,
    pub mutable: Vec<SchemaField>,
    #[serde(rename = "timestamp")]
    pub created: i64,
}

impl SchemaVersion {
    /// The layout of the current build.
    pub fn current(fields: &[Field], primary: &[usize]) -> SchemaVersion {
        let mut version = SchemaVersion {
            primary: primary
                .iter()
                .map(|index| SchemaField::of(&fields[*index]))
                .collect(),
            packed: Vec::new(),
            mutable: Vec::new(),
            created: unix_nanos(),
        };
        for field in fields {
            if field.primary || field.unstored {
                continue;
            }
            if field.mutable {
                version.mutable.push(SchemaField::of(field));
            } else {
                version.packed.push(SchemaField::of(field));
            }
        }
        version
    }

    /// Whether this build's layout drifted from `stored`.
    pub fn differs(&self, stored: &SchemaVersion) -> bool {
        fn lists_differ(new: &[SchemaField], old: &[SchemaField]) -> bool {
            new.len() != old.len()
                || new.iter().zip(old).any(|(a, b)| !a.matches(b))
        }
        lists_differ(&self.primary, &stored.primary)
            || lists_differ(&self.packed, &stored.packed)
            || lists_differ(&self.mutable, &stored.mutable)
    }
}

/// Load the stored history and record the current layout if it drifted.
/// Returns the version number the build is running at.
pub(crate) async fn reconcile(
    ctx: &ChainCtx,
    misc_sub: &Subspace,
    object_name: &str,
    current: &SchemaVersion,
) -> Result<u8> {
    let schema_sub = misc_sub.sub(&[Element::from("schema")]);
    let rows = ctx
        .read_range(&schema_sub.range(), RangeOptions::default())
        .await?;

    let mut latest: Option<(u8, SchemaVersion)> = None;
    for row in &rows {
        let elements = schema_sub
            .unpack(&row.key)
            .map_err(|_| Error::corrupt("schema history key does not unpack"))?;
        let version = match elements.as_slice() {
            [Element::Int(v)] if (0..=MAX_VERSIONS as i64).contains(v) => *v as u8,
            [Element::Uint(v)] if *v <= MAX_VERSIONS as u64 => *v as u8,
            _ => return Err(Error::corrupt("schema history key is not a version")),
        };
        let stored: SchemaVersion = serde_json::from_slice(&row.value)
            .map_err(|err| Error::corrupt(format!("schema blob does not decode: {err}")))?;
        match &latest {
            Some((_, newest)) if newest.created >= stored.created => {}
            _ => latest = Some((version, stored)),
        }
    }

    match latest {
        Some((version, newest)) if !current.differs(&newest) => Ok(version),
        Some((version, _)) => {
            let next = version as u16 + 1;
            if next > MAX_VERSIONS {
                tracing::warn!(object = object_name, "schema history is full, not recorded");
                return Ok(version);
            }
            write_version(ctx, &schema_sub, next as u8, current)?;
            tracing::info!(
                object = object_name,
                version = next,
                "schema layout drifted, recorded a new version"
            );
            Ok(next as u8)
        }
        None => {
            write_version(ctx, &schema_sub, 1, current)?;
            Ok(1)
        }
    }
}

fn write_version(
    ctx: &ChainCtx,
    schema_sub: &Subspace,
    version: u8,
    current: &SchemaVersion,
) -> Result<()> {
    let blob = serde_json::to_vec(current)
        .map_err(|err| Error::corrupt(format!("schema blob does not encode: {err}")))?;
    ctx.txn
        .set(schema_sub.pack(&[Element::Uint(version as u64)]), blob)
        .map_err(Error::from)
}

fn unix_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::field::GenId;
    use crate::types::Kind;

    fn field(name: &str, kind: Kind, primary: bool, mutable: bool) -> Field {
        Field {
            name: name.into(),
            pos: 0,
            kind,
            primary,
            mutable,
            unstored: false,
            auto_increment: false,
            gen_id: GenId::None,
        }
    }

    #[test]
    fn test_differs() {
        let fields = vec![
            field("id", Kind::I64, true, false),
            field("login", Kind::String, false, false),
            field("score", Kind::I64, false, true),
        ];
        let current = SchemaVersion::current(&fields, &[0]);
        assert_eq!(current.primary.len(), 1);
        assert_eq!(current.packed.len(), 1);
        assert_eq!(current.mutable.len(), 1);
        assert!(!current.differs(&current.clone()));

        // A changed field type is drift.
        let mut changed = fields.clone();
        changed[1].kind = Kind::Bytes;
        let next = SchemaVersion::current(&changed, &[0]);
        assert!(next.differs(&current));

        // A renamed field with the declared name preserved is not.
        let mut renamed = current.clone();
        renamed.packed[0].name = "new_login".into();
        assert!(!renamed.differs(&current));
    }

    #[test]
    fn test_serialized_shape() {
        let fields = vec![field("id", Kind::I64, true, false)];
        let current = SchemaVersion::current(&fields, &[0]);
        let blob = serde_json::to_value(&current).unwrap();
        assert!(blob.get("primary").is_some());
        assert!(blob.get("packed").is_some());
        assert!(blob.get("mutable").is_some());
        assert!(blob.get("timestamp").is_some());
        assert_eq!(blob["primary"][0]["name"], "id");
        assert_eq!(blob["primary"][0]["obj_name"], "id");
        assert_eq!(blob["primary"][0]["type"], "i64");
    }
}
