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

//! Record types: schema, subspaces, and the shared write orchestration.

mod builder;
mod handle;

use std::collections::HashMap;

use itertools::Itertools;
use stratum_kv::{Database, Element, RangeOptions, Subspace};

pub use self::builder::ObjectBuilder;
pub use self::handle::Object;
use crate::codec;
use crate::counter::CounterCore;
use crate::error::{Error, Result};
use crate::field::Field;
use crate::index::Index;
use crate::promise::ChainCtx;
use crate::record::Record;
use crate::types::Value;
use crate::value::RowValue;

/// A record's field values in declaration order.
pub(crate) type Row = Vec<Value>;

/// Compiled schema and storage layout of one record type. Built once by
/// [`ObjectBuilder`] and immutable afterwards; shared by every handle,
/// index, counter, and relation that touches the type.
pub(crate) struct ObjectCore {
    pub name: String,
    pub db: Database,
    /// Declared fields; `fields[i].pos == i`.
    pub fields: Vec<Field>,
    pub by_name: HashMap<String, usize>,
    /// Field positions forming the primary key, in declaration order.
    pub primary: Vec<usize>,
    /// Persisted kv rows per record (stored fields).
    pub stored_count: usize,
    pub misc_sub: Subspace,
    pub primary_sub: Subspace,
    pub indexes: HashMap<String, Index>,
    pub counters: HashMap<String, CounterCore>,
    /// Schema-history version observed at build time.
    pub schema_version: u8,
}

impl ObjectCore {
    pub fn field(&self, name: &str) -> Result<&Field> {
        self.by_name
            .get(name)
            .map(|index| &self.fields[*index])
            .ok_or_else(|| Error::schema(format!("object «{}» has no field «{name}»", self.name)))
    }

    /// Snapshot a typed record into a positional row.
    pub fn row_of<R: Record>(&self, record: &R) -> Row {
        (0..self.fields.len())
            .map(|pos| record.get_field(pos))
            .collect_vec()
    }

    pub fn record_from_row<R: Record>(&self, row: &Row) -> R {
        let mut record = R::default();
        for (pos, value) in row.iter().enumerate() {
            record.set_field(pos, value.clone());
        }
        record
    }

    /// The primary tuple of a row, validated against the schema.
    pub fn primary_tuple(&self, row: &Row) -> Result<Vec<Element>> {
        let mut tuple = Vec::with_capacity(self.primary.len());
        for index in &self.primary {
            let field = &self.fields[*index];
            let value = &row[*index];
            if !value.matches(&field.kind) {
                return Err(Error::mismatch(format!(
                    "primary field «{}» expects {:?}, got {value:?}",
                    field.name, field.kind
                )));
            }
            tuple.push(value.to_element()?);
        }
        Ok(tuple)
    }

    /// Validate caller-provided key values against the primary fields.
    pub fn primary_from_values(&self, values: &[Value]) -> Result<Vec<Element>> {
        if values.len() != self.primary.len() {
            return Err(Error::mismatch(format!(
                "object «{}» has a {}-field primary key, got {} values",
                self.name,
                self.primary.len(),
                values.len()
            )));
        }
        let mut tuple = Vec::with_capacity(values.len());
        for (index, value) in self.primary.iter().zip(values) {
            let field = &self.fields[*index];
            if !value.matches(&field.kind) {
                return Err(Error::mismatch(format!(
                    "primary field «{}» expects {:?}, got {value:?}",
                    field.name, field.kind
                )));
            }
            tuple.push(value.to_element()?);
        }
        Ok(tuple)
    }

    /// The subspace holding one record's rows.
    pub fn sub(&self, primary: &[Element]) -> Subspace {
        self.primary_sub.sub(primary)
    }

    /// Start fetching one record's rows; [`NeedObject::fetch`] resolves
    /// them in a later chain step.
    pub fn need(&self, ctx: &ChainCtx, sub: Subspace) -> NeedObject {
        NeedObject { ctx: ctx.clone(), sub }
    }

    /// Shared write sub-procedure behind `add`, `set`, and `write`.
    ///
    /// For a fresh record the counters are bumped; for a replacement the
    /// whole record range is cleared first so stale cells cannot leak. Then
    /// every stored field is packed into its own kv row and every index is
    /// brought in line with the new row.
    pub async fn do_write(
        &self,
        ctx: &ChainCtx,
        sub: &Subspace,
        primary: &[Element],
        row: &Row,
        old: Option<&Row>,
        add_new: bool,
    ) -> Result<()> {
        if add_new {
            for counter in self.counters.values() {
                counter.increment(ctx, self, row)?;
            }
        } else {
            ctx.txn.clear_range(&sub.raw_range()).map_err(Error::from)?;
        }

        let mut written = 0usize;
        for field in &self.fields {
            if !field.stored() {
                continue;
            }
            let cell = codec::encode_to_vec(&field.kind, &row[field.pos])?;
            ctx.txn
                .set(sub.pack(&[Element::from(field.name.as_str())]), cell)
                .map_err(Error::from)?;
            written += 1;
        }
        if written == 0 {
            // Keep the record observable even without stored fields.
            ctx.txn
                .set(sub.key().to_vec(), Vec::new())
                .map_err(Error::from)?;
        }

        for index in self.indexes.values() {
            index.write(ctx, self, primary, row, old).await?;
        }
        tracing::trace!(object = %self.name, rows = written, add_new, "record written");
        Ok(())
    }

    /// Remove one record: its rows, its index entries, its counter share.
    pub async fn do_delete(
        &self,
        ctx: &ChainCtx,
        sub: &Subspace,
        primary: &[Element],
        old: &Row,
    ) -> Result<()> {
        ctx.txn.clear_range(&sub.raw_range()).map_err(Error::from)?;
        for index in self.indexes.values() {
            index.remove(ctx, self, primary, old)?;
        }
        for counter in self.counters.values() {
            counter.decrement(ctx, self, old)?;
        }
        Ok(())
    }

    /// Scale a record limit to a kv-row limit, since every record occupies
    /// one row per stored field.
    pub fn key_limit(&self, limit: usize) -> Option<usize> {
        if limit == 0 {
            None
        } else {
            Some(limit * self.stored_count.max(1))
        }
    }
}

/// A record fetch split across chain steps: constructed in the step that
/// plans the read, resolved by `fetch` in the next.
pub(crate) struct NeedObject {
    ctx: ChainCtx,
    sub: Subspace,
}

impl NeedObject {
    pub async fn fetch(&self, core: &ObjectCore) -> Result<RowValue> {
        let rows = self
            .ctx
            .read_range(&self.sub.raw_range(), RangeOptions::default())
            .await?;
        if rows.is_empty() {
            return Err(Error::NotFound);
        }
        RowValue::from_kv(core, &self.sub, &rows)
    }
}

/// Conversion of the accepted primary-key argument shapes into key
/// values: a record carrying its key fields, a bare scalar, or an
/// explicit value list.
pub trait IntoPrimaryKey<R: Record> {
    fn into_key_values(self, object: &Object<R>) -> Result<Vec<Value>>;
}

impl<R: Record> IntoPrimaryKey<R> for &R {
    fn into_key_values(self, object: &Object<R>) -> Result<Vec<Value>> {
        let core = object.core();
        Ok(core
            .primary
            .iter()
            .map(|index| self.get_field(core.fields[*index].pos))
            .collect())
    }
}

impl<R: Record> IntoPrimaryKey<R> for Value {
    fn into_key_values(self, _object: &Object<R>) -> Result<Vec<Value>> {
        Ok(vec![self])
    }
}

impl<R: Record> IntoPrimaryKey<R> for Vec<Value> {
    fn into_key_values(self, _object: &Object<R>) -> Result<Vec<Value>> {
        Ok(self)
    }
}

macro_rules! scalar_primary_key {
    ($($ty:ty),+) => {
        $(impl<R: Record> IntoPrimaryKey<R> for $ty {
            fn into_key_values(self, _object: &Object<R>) -> Result<Vec<Value>> {
                Ok(vec![Value::from(self)])
            }
        })+
    };
}

scalar_primary_key!(i32, i64, u32, u64, String);

impl<R: Record, A: Into<Value>, B: Into<Value>> IntoPrimaryKey<R> for (A, B) {
    fn into_key_values(self, _object: &Object<R>) -> Result<Vec<Value>> {
        Ok(vec![self.0.into(), self.1.into()])
    }
}
