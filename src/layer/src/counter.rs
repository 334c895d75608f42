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

//! Counters: record populations aggregated by a tuple of field values.
//!
//! A bucket lives at `counter-sub / field-value-tuple` and holds an 8-byte
//! little-endian signed integer maintained by atomic adds; a missing
//! bucket reads as zero. Buckets move on `add` and `delete` only; a `set`
//! replacing a record whose counted fields changed leaves them stale,
//! which is a known limitation.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use stratum_kv::{Element, Subspace};

use crate::codec::{COUNT_DEC, COUNT_INC};
use crate::error::{Error, Result};
use crate::object::{ObjectCore, Row};
use crate::promise::{done, ChainCtx, Promise, Step};
use crate::record::Record;

#[derive(Clone)]
pub(crate) struct CounterCore {
    pub name: String,
    /// Source field positions, in declared order; their values key the
    /// bucket.
    pub fields: Vec<usize>,
    pub sub: Subspace,
}

impl CounterCore {
    fn bucket_of(&self, core: &ObjectCore, row: &Row) -> Result<Vec<Element>> {
        self.fields
            .iter()
            .map(|pos| {
                let field = &core.fields[*pos];
                let value = &row[*pos];
                if !value.matches(&field.kind) {
                    return Err(Error::mismatch(format!(
                        "counter field «{}» expects {:?}, got {value:?}",
                        field.name, field.kind
                    )));
                }
                value.to_element()
            })
            .collect()
    }

    pub fn increment(&self, ctx: &ChainCtx, core: &ObjectCore, row: &Row) -> Result<()> {
        let bucket = self.bucket_of(core, row)?;
        ctx.txn
            .atomic_add(self.sub.pack(&bucket), COUNT_INC)
            .map_err(Error::from)
    }

    pub fn decrement(&self, ctx: &ChainCtx, core: &ObjectCore, row: &Row) -> Result<()> {
        let bucket = self.bucket_of(core, row)?;
        ctx.txn
            .atomic_add(self.sub.pack(&bucket), COUNT_DEC)
            .map_err(Error::from)
    }
}

/// Decode a counter cell; short cells are zero-padded.
pub(crate) fn decode_count(raw: Option<&[u8]>) -> i64 {
    match raw {
        None => 0,
        Some(raw) => {
            let mut buf = [0u8; 8];
            let n = raw.len().min(8);
            buf[..n].copy_from_slice(&raw[..n]);
            i64::from_le_bytes(buf)
        }
    }
}

/// Handle for reading one counter of an object.
pub struct Counter<R: Record> {
    pub(crate) core: Arc<ObjectCore>,
    pub(crate) name: String,
    pub(crate) _marker: PhantomData<fn() -> R>,
}

impl<R: Record> Counter<R> {
    /// The bucket value for the field tuple carried by `record`.
    pub fn get(&self, record: &R) -> Promise<i64> {
        let core = self.core.clone();
        let row = core.row_of(record);
        let name = self.name.clone();
        Promise::new(core.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let row = row.clone();
            let name = name.clone();
            async move {
                let counter = core
                    .counters
                    .get(&name)
                    .ok_or_else(|| Error::mismatch(format!("counter «{name}» is undefined")))?;
                let bucket = counter.bucket_of(&core, &row)?;
                let raw = ctx.read_get(&counter.sub.pack(&bucket)).await?;
                Ok(done(&out, decode_count(raw.as_deref())))
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_decode_count() {
        assert_eq!(decode_count(None), 0);
        assert_eq!(decode_count(Some(&2i64.to_le_bytes())), 2);
        assert_eq!(decode_count(Some(&(-3i64).to_le_bytes())), -3);
        assert_eq!(decode_count(Some(&[5])), 5);
    }
}
