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

use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::try_join_all;
use futures::FutureExt;
use itertools::Itertools;
use stratum_kv::{Element, KeySelector};

use crate::counter::Counter;
use crate::error::{Error, Result};
use crate::field::GenId;
use crate::index::geo::IndexGeo;
use crate::index::search::IndexSearch;
use crate::index::IndexKind;
use crate::object::{IntoPrimaryKey, ObjectCore};
use crate::promise::{done, ChainCtx, Promise, Step};
use crate::query::Query;
use crate::record::Record;
use crate::types::Value;

/// Records wiped and rewritten per transaction while reindexing.
const REINDEX_PAGE: usize = 256;

/// Typed handle to a built record type. Cheap to clone; all clones share
/// the compiled schema.
pub struct Object<R: Record> {
    core: Arc<ObjectCore>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Record> Clone for Object<R> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone(), _marker: PhantomData }
    }
}

impl<R: Record> std::fmt::Debug for Object<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object").field("name", &self.core.name).finish()
    }
}

impl<R: Record> Object<R> {
    pub(crate) fn from_core(core: Arc<ObjectCore>) -> Self {
        Self { core, _marker: PhantomData }
    }

    pub(crate) fn core(&self) -> &Arc<ObjectCore> {
        &self.core
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Schema-history version this build runs at.
    pub fn schema_version(&self) -> u8 {
        self.core.schema_version
    }

    /// Insert a new record. Auto-increment and generated-id fields are
    /// assigned first; the returned record carries them. Fails with
    /// [`Error::AlreadyExists`] when the primary key is taken.
    pub fn add(&self, record: &R) -> Promise<R> {
        let core = self.core.clone();
        let row = core.row_of(record);
        Promise::new(core.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let mut row = row.clone();
            async move {
                for pos in 0..core.fields.len() {
                    let field = &core.fields[pos];
                    if field.auto_increment {
                        let key = core.misc_sub.pack(&[
                            Element::from("ai"),
                            Element::from(field.name.as_str()),
                        ]);
                        ctx.txn.atomic_add(key.clone(), field.plus_one()?)?;
                        let raw = ctx.txn.get(&key).await?.ok_or_else(|| {
                            Error::corrupt("auto-increment cell missing after add")
                        })?;
                        row[pos] = field.decode_counter(&raw)?;
                    } else if field.gen_id != GenId::None {
                        row[pos] = field.generate_id()?;
                    }
                }
                let primary = core.primary_tuple(&row)?;
                let sub = core.sub(&primary);
                let found = ctx
                    .read_key(KeySelector::first_greater_or_equal(sub.raw_range().begin))
                    .await?;

                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        if let Some(found) = &found {
                            if sub.contains(found) {
                                return Err(Error::AlreadyExists);
                            }
                        }
                        core.do_write(&ctx, &sub, &primary, &row, None, true).await?;
                        let record = core.record_from_row::<R>(&row);
                        Ok(done(&out, record))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Upsert: replace the record under its primary key, or create it.
    pub fn set(&self, record: &R) -> Promise<()> {
        self.write_inner(record, false)
    }

    /// Replace an existing record; a missing one is
    /// [`Error::NotFound`].
    pub fn write(&self, record: &R) -> Promise<()> {
        self.write_inner(record, true)
    }

    fn write_inner(&self, record: &R, must_exist: bool) -> Promise<()> {
        let core = self.core.clone();
        let row = core.row_of(record);
        Promise::new(core.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let row = row.clone();
            async move {
                let primary = core.primary_tuple(&row)?;
                let sub = core.sub(&primary);
                let need = core.need(&ctx, sub.clone());

                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let old = match need.fetch(&core).await {
                            Ok(value) => Some(value.to_row(&core)?),
                            Err(Error::NotFound) if !must_exist => None,
                            Err(err) => return Err(err),
                        };
                        let add_new = old.is_none();
                        core.do_write(&ctx, &sub, &primary, &row, old.as_ref(), add_new)
                            .await?;
                        Ok(done(&out, ()))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Like [`Object::write`], but runs `mutate` on the currently stored
    /// record between read and write; the returned record is the mutated
    /// one. The callback may run more than once when the store retries.
    pub fn update<F>(&self, record: &R, mutate: F) -> Promise<R>
    where
        F: Fn(&mut R) -> Result<()> + Send + Sync + 'static,
    {
        let core = self.core.clone();
        let row = core.row_of(record);
        let mutate = Arc::new(mutate);
        Promise::new(core.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let row = row.clone();
            let mutate = mutate.clone();
            async move {
                let primary = core.primary_tuple(&row)?;
                let sub = core.sub(&primary);
                let need = core.need(&ctx, sub.clone());

                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let stored = need.fetch(&core).await?;
                        let old_row = stored.to_row(&core)?;
                        let mut record = stored.fill::<R>(&core)?;
                        mutate(&mut record)?;
                        let new_row = core.row_of(&record);
                        if core.primary_tuple(&new_row)? != primary {
                            return Err(Error::mismatch(
                                "update may not change the primary key",
                            ));
                        }
                        core.do_write(&ctx, &sub, &primary, &new_row, Some(&old_row), false)
                            .await?;
                        Ok(done(&out, record))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Fetch a record by primary key.
    pub fn get(&self, key: impl IntoPrimaryKey<R>) -> Promise<R> {
        let core = self.core.clone();
        let tuple = match key
            .into_key_values(self)
            .and_then(|values| core.primary_from_values(&values))
        {
            Ok(tuple) => tuple,
            Err(err) => return Promise::ready_err(core.db.clone(), err),
        };
        Promise::new(core.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let tuple = tuple.clone();
            async move {
                let need = core.need(&ctx, core.sub(&tuple));
                let step: Step = Step::Next(Box::new(move |_ctx| {
                    async move {
                        let value = need.fetch(&core).await?;
                        Ok(done(&out, value.fill::<R>(&core)?))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Fetch a record through a secondary index; the index key is taken
    /// from the given record's source fields.
    pub fn get_by(&self, index_name: &str, record: &R) -> Promise<R> {
        let core = self.core.clone();
        if !core.indexes.contains_key(index_name) {
            return Promise::ready_err(
                core.db.clone(),
                Error::mismatch(format!("index «{index_name}» is undefined")),
            );
        }
        let row = core.row_of(record);
        let index_name = index_name.to_owned();
        Promise::new(core.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let row = row.clone();
            let index_name = index_name.clone();
            async move {
                let index = core
                    .indexes
                    .get(&index_name)
                    .ok_or_else(|| Error::mismatch(format!("index «{index_name}» is undefined")))?;
                let key = index.key_of(&core, &row)?.ok_or(Error::NotFound)?;
                let sub = index.primary_sub_of(&ctx, &core, &key).await?;
                let need = core.need(&ctx, sub);
                let step: Step = Step::Next(Box::new(move |_ctx| {
                    async move {
                        let value = need.fetch(&core).await?;
                        Ok(done(&out, value.fill::<R>(&core)?))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Fetch several records by primary key in one snapshot; results keep
    /// the caller's order. Any missing record fails the whole batch.
    pub fn multi_get<K>(&self, keys: Vec<K>) -> Promise<Vec<R>>
    where
        K: IntoPrimaryKey<R>,
    {
        let core = self.core.clone();
        let mut tuples = Vec::with_capacity(keys.len());
        for key in keys {
            match key
                .into_key_values(self)
                .and_then(|values| core.primary_from_values(&values))
            {
                Ok(tuple) => tuples.push(tuple),
                Err(err) => return Promise::ready_err(core.db.clone(), err),
            }
        }
        Promise::new(core.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let tuples = tuples.clone();
            async move {
                let needs = tuples
                    .iter()
                    .map(|tuple| core.need(&ctx, core.sub(tuple)))
                    .collect_vec();
                let step: Step = Step::Next(Box::new(move |_ctx| {
                    async move {
                        let values =
                            try_join_all(needs.iter().map(|need| need.fetch(&core))).await?;
                        let records = values
                            .iter()
                            .map(|value| value.fill::<R>(&core))
                            .collect::<Result<Vec<R>>>()?;
                        Ok(done(&out, records))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Delete a record: every field row, every index entry, every counter
    /// contribution, atomically.
    pub fn delete(&self, key: impl IntoPrimaryKey<R>) -> Promise<()> {
        let core = self.core.clone();
        let tuple = match key
            .into_key_values(self)
            .and_then(|values| core.primary_from_values(&values))
        {
            Ok(tuple) => tuple,
            Err(err) => return Promise::ready_err(core.db.clone(), err),
        };
        Promise::new(core.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let tuple = tuple.clone();
            async move {
                let sub = core.sub(&tuple);
                let need = core.need(&ctx, sub.clone());
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let stored = need.fetch(&core).await?;
                        let old_row = stored.to_row(&core)?;
                        core.do_delete(&ctx, &sub, &tuple, &old_row).await?;
                        Ok(done(&out, ()))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// List records whose primary key starts with the given values.
    pub fn list(&self, values: Vec<Value>) -> Query<R> {
        Query::new(self.core.clone(), None, values)
    }

    pub fn list_all(&self) -> Query<R> {
        Query::new(self.core.clone(), None, Vec::new())
    }

    /// Query through a secondary index; combine with
    /// [`Query::list`](crate::Query::list) to pick the index key.
    pub fn use_index(&self, name: &str) -> Query<R> {
        Query::new(self.core.clone(), Some(name.to_owned()), Vec::new())
    }

    /// Atomically add `delta` to a mutable integer field, without
    /// touching the rest of the record. The returned record carries the
    /// new value.
    pub fn inc_field(&self, record: &R, field_name: &str, delta: Value) -> Promise<R> {
        let core = self.core.clone();
        let prepared = self.mutable_field(field_name).and_then(|pos| {
            let field = &core.fields[pos];
            if !field.kind.is_integer() {
                return Err(Error::mismatch(format!(
                    "field «{field_name}» is not an integer, cannot increment"
                )));
            }
            if !delta.matches(&field.kind) {
                return Err(Error::mismatch(format!(
                    "increment value {delta:?} does not fit field «{field_name}»"
                )));
            }
            Ok(pos)
        });
        let pos = match prepared {
            Ok(pos) => pos,
            Err(err) => return Promise::ready_err(core.db.clone(), err),
        };
        let row = core.row_of(record);
        Promise::new(core.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let mut row = row.clone();
            let delta = delta.clone();
            async move {
                let primary = core.primary_tuple(&row)?;
                let field = &core.fields[pos];
                let key = core
                    .sub(&primary)
                    .pack(&[Element::from(field.name.as_str())]);
                let current = ctx.txn.get(&key).await?;
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let raw = current.ok_or(Error::NotFound)?;
                        let field = &core.fields[pos];
                        let stored = field.decode_counter(&raw)?;
                        let delta_cell = crate::codec::encode_to_vec(&field.kind, &delta)?;
                        ctx.txn.atomic_add(key, &delta_cell)?;
                        let sum = stored
                            .as_i64()
                            .zip(delta.as_i64())
                            .map(|(a, b)| a.wrapping_add(b))
                            .ok_or_else(|| Error::mismatch("field does not add"))?;
                        row[pos] = Value::integer_of(&field.kind, sum)?;
                        Ok(done(&out, core.record_from_row::<R>(&row)))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Overwrite a single mutable field from the given record; the record
    /// itself must already exist.
    pub fn set_field(&self, record: &R, field_name: &str) -> Promise<()> {
        let core = self.core.clone();
        let pos = match self.mutable_field(field_name) {
            Ok(pos) => pos,
            Err(err) => return Promise::ready_err(core.db.clone(), err),
        };
        let row = core.row_of(record);
        Promise::new(core.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let row = row.clone();
            async move {
                let primary = core.primary_tuple(&row)?;
                let field = &core.fields[pos];
                let key = core
                    .sub(&primary)
                    .pack(&[Element::from(field.name.as_str())]);
                let cell = crate::codec::encode_to_vec(&field.kind, &row[pos])?;
                let current = ctx.txn.get(&key).await?;
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        if current.is_none() {
                            return Err(Error::NotFound);
                        }
                        ctx.txn.set(key, cell)?;
                        Ok(done(&out, ()))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Fetch a single mutable field, run the callback on its value, and
    /// write the result back. The returned record carries the new value.
    pub fn update_field<F>(&self, record: &R, field_name: &str, mutate: F) -> Promise<R>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let core = self.core.clone();
        let pos = match self.mutable_field(field_name) {
            Ok(pos) => pos,
            Err(err) => return Promise::ready_err(core.db.clone(), err),
        };
        let row = core.row_of(record);
        let mutate = Arc::new(mutate);
        Promise::new(core.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let mut row = row.clone();
            let mutate = mutate.clone();
            async move {
                let primary = core.primary_tuple(&row)?;
                let field = &core.fields[pos];
                let key = core
                    .sub(&primary)
                    .pack(&[Element::from(field.name.as_str())]);
                let current = ctx.txn.get(&key).await?;
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let raw = current.ok_or(Error::NotFound)?;
                        let field = &core.fields[pos];
                        let updated = mutate(crate::codec::decode_exact(&field.kind, &raw)?)?;
                        if !updated.matches(&field.kind) {
                            return Err(Error::mismatch(format!(
                                "callback value {updated:?} does not fit field «{}»",
                                field.name
                            )));
                        }
                        let cell = crate::codec::encode_to_vec(&field.kind, &updated)?;
                        ctx.txn.set(key, cell)?;
                        row[pos] = updated;
                        Ok(done(&out, core.record_from_row::<R>(&row)))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Handle for one of the object's counters, named by its
    /// comma-joined field list.
    pub fn counter(&self, name: &str) -> Result<Counter<R>> {
        if !self.core.counters.contains_key(name) {
            return Err(Error::mismatch(format!("counter «{name}» is undefined")));
        }
        Ok(Counter {
            core: self.core.clone(),
            name: name.to_owned(),
            _marker: PhantomData,
        })
    }

    /// Handle for a geospatial index.
    pub fn geo_index(&self, name: &str) -> Result<IndexGeo<R>> {
        match self.core.indexes.get(name) {
            Some(index) if matches!(index.kind, IndexKind::Geo { .. }) => Ok(IndexGeo {
                core: self.core.clone(),
                name: name.to_owned(),
                _marker: PhantomData,
            }),
            Some(_) => Err(Error::mismatch(format!("index «{name}» is not geospatial"))),
            None => Err(Error::mismatch(format!("index «{name}» is undefined"))),
        }
    }

    /// Handle for a full-text index.
    pub fn search_index(&self, name: &str) -> Result<IndexSearch<R>> {
        match self.core.indexes.get(name) {
            Some(index) if matches!(index.kind, IndexKind::Search) => Ok(IndexSearch {
                core: self.core.clone(),
                name: name.to_owned(),
                _marker: PhantomData,
            }),
            Some(_) => Err(Error::mismatch(format!("index «{name}» is not a search index"))),
            None => Err(Error::mismatch(format!("index «{name}» is undefined"))),
        }
    }

    /// Rebuild an index from scratch: wipe its subspace, then rescan all
    /// records page by page, each page in its own transaction.
    pub async fn reindex(&self, name: &str) -> Result<()> {
        let core = self.core.clone();
        let index = core
            .indexes
            .get(name)
            .ok_or_else(|| Error::mismatch(format!("index «{name}» is undefined")))?
            .clone();

        {
            let index = index.clone();
            core.db
                .transact(move |txn| {
                    let index = index.clone();
                    async move {
                        txn.clear_range(&index.sub.raw_range())
                            .map_err(Error::from)
                    }
                })
                .await?;
        }

        let mut query = self.list_all().limit(REINDEX_PAGE);
        let mut total = 0usize;
        while query.next() {
            let batch = query.scan_all().await?;
            if batch.is_empty() {
                break;
            }
            total += batch.len();
            let mut rows = Vec::with_capacity(batch.len());
            for record in &batch {
                let row = core.row_of(record);
                let primary = core.primary_tuple(&row)?;
                rows.push((primary, row));
            }
            let rows = Arc::new(rows);
            let core_ref = core.clone();
            let index = index.clone();
            core.db
                .transact(move |txn| {
                    let rows = rows.clone();
                    let core = core_ref.clone();
                    let index = index.clone();
                    let ctx = ChainCtx { txn, snapshot: false };
                    async move {
                        for (primary, row) in rows.iter() {
                            index.write(&ctx, &core, primary, row, None).await?;
                        }
                        Ok::<(), crate::error::Error>(())
                    }
                })
                .await?;
        }
        tracing::debug!(object = %core.name, index = name, total, "reindex finished");
        Ok(())
    }
}

impl<R: Record> Object<R> {
    fn mutable_field(&self, name: &str) -> Result<usize> {
        let field = self.core.field(name)?;
        if !field.mutable {
            return Err(Error::mismatch(format!(
                "field «{name}» must be mutable for atomic field operations"
            )));
        }
        Ok(field.pos)
    }
}
