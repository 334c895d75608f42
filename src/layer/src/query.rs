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

//! Ordered range scans over a primary or index subspace.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use itertools::Itertools;
use stratum_kv::{Element, RangeOptions};

use crate::error::{Error, Result};
use crate::object::ObjectCore;
use crate::promise::ChainCtx;
use crate::record::Record;
use crate::types::Value;
use crate::value::RowValue;

/// Options read by slice chains at execution time.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelectOptions {
    /// 0 means unbounded.
    pub limit: usize,
    pub reverse: bool,
    /// Resume point extending the key prefix.
    pub from: Vec<Value>,
}

/// A list query: primary-prefix scan or index-backed listing, with
/// `from`/`to` bounds, a record limit, reversal, and chunked paging via
/// [`Query::next`].
pub struct Query<R: Record> {
    core: Arc<ObjectCore>,
    index: Option<String>,
    prefix: Vec<Value>,
    from: Vec<Value>,
    to: Vec<Value>,
    limit: usize,
    reverse: bool,
    next_from: Option<Vec<Element>>,
    started: bool,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Record> Query<R> {
    pub(crate) fn new(core: Arc<ObjectCore>, index: Option<String>, prefix: Vec<Value>) -> Self {
        Self {
            core,
            index,
            prefix,
            from: Vec::new(),
            to: Vec::new(),
            limit: 0,
            reverse: false,
            next_from: None,
            started: false,
            _marker: PhantomData,
        }
    }

    /// Restrict the scan to keys starting with the given values: a
    /// primary-key prefix, or the index key when an index is in use.
    pub fn list(mut self, values: Vec<Value>) -> Self {
        self.prefix = values;
        self
    }

    /// Start the result at this key suffix (extending the prefix).
    pub fn from(mut self, values: Vec<Value>) -> Self {
        self.from = values;
        self
    }

    /// End the result at this key suffix (exclusive).
    pub fn to(mut self, values: Vec<Value>) -> Self {
        self.to = values;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Fetch one page of typed records. Repeated calls interleaved with
    /// [`Query::next`] walk the whole range in `limit`-sized chunks.
    pub async fn scan_all(&mut self) -> Result<Vec<R>> {
        let core = self.core.clone();
        let values = self.slice().await?;
        values.iter().map(|value| value.fill::<R>(&core)).collect()
    }

    /// Fetch one page as raw row values: per-field cell bytes plus the
    /// decoded primary tuple, without materializing typed records.
    pub async fn slice(&mut self) -> Result<Vec<RowValue>> {
        match &self.index {
            Some(_) => self.scan_index().await,
            None => self.scan_primary().await,
        }
    }

    /// Advance to the next page; returns whether another fetch can make
    /// progress. The first call always returns true.
    pub fn next(&mut self) -> bool {
        if !self.started {
            self.started = true;
            return true;
        }
        self.next_from.is_some()
    }

    async fn scan_primary(&mut self) -> Result<Vec<RowValue>> {
        let core = self.core.clone();
        let prefix = core.primary_prefix_elements(&self.prefix)?;
        let from = values_to_elements(&self.from)?;
        let to = values_to_elements(&self.to)?;
        let resume = self.next_from.take();
        let limit = self.limit;
        let reverse = self.reverse;

        let (values, last) = core
            .db
            .clone()
            .read_transact(move |txn| {
                let core = core.clone();
                let prefix = prefix.clone();
                let from = from.clone();
                let to = to.clone();
                let resume = resume.clone();
                async move {
                    let ctx = ChainCtx { txn, snapshot: true };
                    let sub = if prefix.is_empty() {
                        core.primary_sub.clone()
                    } else {
                        core.primary_sub.sub(&prefix)
                    };
                    let mut range = sub.range();
                    if !from.is_empty() {
                        if reverse {
                            range.end = sub.pack(&from);
                        } else {
                            range.begin = sub.pack(&from);
                        }
                    }
                    if !to.is_empty() {
                        if reverse {
                            range.begin = sub.pack(&to);
                        } else {
                            range.end = sub.pack(&to);
                        }
                    }
                    if let Some(resume) = &resume {
                        // Resume strictly after (or before, reversed) the
                        // last record of the previous page.
                        let record_sub = core.sub(resume);
                        if reverse {
                            range.end = record_sub.raw_range().begin;
                        } else {
                            range.begin = record_sub.raw_range().end;
                        }
                    }

                    let options = RangeOptions {
                        limit: core.key_limit(limit),
                        reverse,
                    };
                    let rows = ctx.read_range(&range, options).await?;

                    // Split every row into its primary tuple and field
                    // name, then group rows of one record together. The
                    // trailing group needs no special flush.
                    let key_len = core.primary.len();
                    let parsed = rows
                        .iter()
                        .map(|row| {
                            let full = core
                                .primary_sub
                                .unpack(&row.key)
                                .map_err(|_| Error::corrupt("scanned key does not unpack"))?;
                            if full.len() < key_len {
                                return Err(Error::corrupt(format!(
                                    "scanned key has {} elements, primary needs {key_len}",
                                    full.len()
                                )));
                            }
                            let field = match &full[key_len..] {
                                // Bare record key: the existence marker.
                                [] => None,
                                [Element::String(name)] => Some(name.clone()),
                                _ => {
                                    return Err(Error::corrupt(
                                        "scanned key carries a nested field path",
                                    ))
                                }
                            };
                            Ok((full[..key_len].to_vec(), field, row.value.clone()))
                        })
                        .collect::<Result<Vec<_>>>()?;

                    let mut values = Vec::new();
                    let mut last: Option<Vec<Element>> = None;
                    let grouped = parsed
                        .into_iter()
                        .chunk_by(|(primary, _, _)| primary.clone());
                    for (primary, group) in &grouped {
                        if limit > 0 && values.len() >= limit {
                            break;
                        }
                        let raw: HashMap<String, Bytes> = group
                            .filter_map(|(_, field, value)| field.map(|name| (name, value)))
                            .collect();
                        values.push(RowValue::from_parts(&core, raw, &primary)?);
                        last = Some(primary);
                    }
                    Ok::<(Vec<RowValue>, Option<Vec<stratum_kv::Element>>), crate::error::Error>((values, last))
                }
            })
            .await?;

        self.next_from = last;
        Ok(values)
    }

    async fn scan_index(&mut self) -> Result<Vec<RowValue>> {
        let core = self.core.clone();
        let name = self.index.clone().unwrap_or_default();
        let index = core
            .indexes
            .get(&name)
            .ok_or_else(|| Error::mismatch(format!("index «{name}» is undefined")))?
            .clone();
        let prefix = values_to_elements(&self.prefix)?;
        let from = values_to_elements(&self.from)?;
        let limit = self.limit;
        let reverse = self.reverse;

        core.db
            .clone()
            .read_transact(move |txn| {
                let core = core.clone();
                let index = index.clone();
                let prefix = prefix.clone();
                let from = from.clone();
                async move {
                    let ctx = ChainCtx { txn, snapshot: true };
                    let primaries = index
                        .list(
                            &ctx,
                            &prefix,
                            (!from.is_empty()).then_some(from.as_slice()),
                            limit,
                            reverse,
                        )
                        .await?;
                    let mut values = Vec::with_capacity(primaries.len());
                    for primary in primaries {
                        let need = core.need(&ctx, core.sub(&primary));
                        // The iterator skips entries it cannot read rather
                        // than failing the page.
                        match need.fetch(&core).await {
                            Ok(value) => values.push(value),
                            Err(Error::NotFound) => continue,
                            Err(err) => return Err(err),
                        }
                    }
                    Ok(values)
                }
            })
            .await
    }
}

fn values_to_elements(values: &[Value]) -> Result<Vec<Element>> {
    values.iter().map(|value| value.to_element()).collect()
}

impl ObjectCore {
    /// Validate a primary-prefix value list: at most the number of primary
    /// fields, each matching its field's kind in declaration order.
    pub(crate) fn primary_prefix_elements(&self, values: &[Value]) -> Result<Vec<Element>> {
        if values.len() > self.primary.len() {
            return Err(Error::mismatch(format!(
                "list prefix has {} values, primary key only {}",
                values.len(),
                self.primary.len()
            )));
        }
        values
            .iter()
            .zip(&self.primary)
            .map(|(value, index)| {
                let field = &self.fields[*index];
                if !value.matches(&field.kind) {
                    return Err(Error::mismatch(format!(
                        "list prefix value {value:?} does not fit primary field «{}»",
                        field.name
                    )));
                }
                value.to_element()
            })
            .collect()
    }
}
