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

use std::collections::HashMap;

use bytes::Bytes;
use stratum_kv::{KeyValue, Subspace};

use crate::codec;
use crate::error::{Error, Result};
use crate::object::{ObjectCore, Row};
use crate::record::Record;
use crate::types::Value;

/// A fetched record in raw form: per-field cell bytes keyed by stored name,
/// plus the primary-key values decoded out of the row's key tuple.
#[derive(Debug, Default, Clone)]
pub struct RowValue {
    raw: HashMap<String, Bytes>,
    decoded: HashMap<String, Value>,
}

impl RowValue {
    /// Parse the kv rows of one record. `sub` is the record's subspace; the
    /// primary tuple is recovered from it.
    pub(crate) fn from_kv(
        core: &ObjectCore,
        sub: &Subspace,
        rows: &[KeyValue],
    ) -> Result<RowValue> {
        let mut value = RowValue::default();
        for row in rows {
            let elements = match sub.unpack(&row.key) {
                Ok(elements) => elements,
                Err(err) => {
                    tracing::warn!(%err, "skipping row with invalid key");
                    continue;
                }
            };
            match elements.as_slice() {
                // Bare subspace key: the existence marker.
                [] => continue,
                [stratum_kv::Element::String(name)] => {
                    value.raw.insert(name.clone(), row.value.clone());
                }
                _ => {
                    tracing::warn!("skipping row with unexpected key shape");
                }
            }
        }
        value.decode_primary(core, sub)?;
        Ok(value)
    }

    /// Build from an already-grouped raw map plus the record's primary
    /// tuple elements; the query scan path uses this.
    pub(crate) fn from_parts(
        core: &ObjectCore,
        raw: HashMap<String, Bytes>,
        primary: &[stratum_kv::Element],
    ) -> Result<RowValue> {
        let mut value = RowValue { raw, decoded: HashMap::new() };
        value.set_primary(core, primary)?;
        Ok(value)
    }

    fn decode_primary(&mut self, core: &ObjectCore, sub: &Subspace) -> Result<()> {
        let elements = core
            .primary_sub
            .unpack(sub.key())
            .map_err(|_| Error::corrupt("record subspace is outside the primary subspace"))?;
        self.set_primary(core, &elements)
    }

    fn set_primary(&mut self, core: &ObjectCore, elements: &[stratum_kv::Element]) -> Result<()> {
        if elements.len() != core.primary.len() {
            return Err(Error::corrupt(format!(
                "primary tuple has {} elements, schema expects {}",
                elements.len(),
                core.primary.len()
            )));
        }
        for (index, element) in core.primary.iter().zip(elements) {
            let field = &core.fields[*index];
            let value = Value::from_element(&field.kind, element)?;
            self.decoded.insert(field.name.clone(), value);
        }
        Ok(())
    }

    /// Raw cell bytes of a stored field, if present.
    pub fn raw(&self, name: &str) -> Option<&[u8]> {
        self.raw.get(name).map(|bytes| bytes.as_ref())
    }

    /// A decoded primary-key value.
    pub fn decoded(&self, name: &str) -> Option<&Value> {
        self.decoded.get(name)
    }

    /// Decode into a positional row following the schema. Missing cells
    /// read as the kind-zero value.
    pub(crate) fn to_row(&self, core: &ObjectCore) -> Result<Row> {
        let mut row = Vec::with_capacity(core.fields.len());
        for field in &core.fields {
            let value = if field.primary {
                self.decoded
                    .get(&field.name)
                    .cloned()
                    .unwrap_or_else(|| Value::default_of(&field.kind))
            } else if !field.stored() {
                Value::default_of(&field.kind)
            } else {
                match self.raw.get(&field.name) {
                    Some(bytes) => codec::decode_exact(&field.kind, bytes)?,
                    None => Value::default_of(&field.kind),
                }
            };
            row.push(value);
        }
        Ok(row)
    }

    /// Materialize a typed record.
    pub(crate) fn fill<R: Record>(&self, core: &ObjectCore) -> Result<R> {
        let row = self.to_row(core)?;
        Ok(core.record_from_row::<R>(&row))
    }
}
