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

//! Secondary indexes.
//!
//! Layouts:
//!
//! - unique: `index-sub / index-key` → packed primary tuple
//! - plain, optional, geo, search, custom:
//!   `index-sub / index-key / primary-tuple` → empty
//!
//! A write first removes the entry of the old record when its index key
//! changed, so after any successful mutation exactly one entry reflects
//! the record's current value.

pub mod geo;
pub mod search;

use std::sync::Arc;

use itertools::Itertools;
use stratum_kv::{tuple, Element, KeySelector, RangeOptions, Subspace};

use crate::error::{Error, Result};
use crate::object::{ObjectCore, Row};
use crate::promise::ChainCtx;
use crate::types::Value;

/// Callback of a custom index: maps a record's row to an index key, or
/// `None` to leave the record unindexed.
pub(crate) type CustomFn = Arc<dyn Fn(&[Value]) -> Option<Vec<Value>> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum IndexKind {
    Plain { unique: bool, optional: bool },
    Geo { precision: u8 },
    Search,
    Custom { callback: CustomFn },
}

#[derive(Clone)]
pub(crate) struct Index {
    pub name: String,
    pub kind: IndexKind,
    /// Source field positions. Geo uses exactly two (lat, lon); search one
    /// or more string fields; custom none.
    pub fields: Vec<usize>,
    pub sub: Subspace,
}

impl Index {
    pub fn unique(&self) -> bool {
        matches!(self.kind, IndexKind::Plain { unique: true, .. })
    }

    /// The index key of a row, or `None` when the row is not to be
    /// indexed. Search indexes are multi-key and handled separately.
    pub fn key_of(&self, core: &ObjectCore, row: &Row) -> Result<Option<Vec<Element>>> {
        match &self.kind {
            IndexKind::Plain { optional, .. } => {
                let values: Vec<&Value> =
                    self.fields.iter().map(|pos| &row[*pos]).collect();
                if *optional && values.iter().all(|value| value.is_empty()) {
                    return Ok(None);
                }
                values
                    .into_iter()
                    .map(|value| value.to_element())
                    .collect::<Result<Vec<_>>>()
                    .map(Some)
            }
            IndexKind::Geo { precision } => {
                let lat = float_of(core, row, self.fields[0])?;
                let lon = float_of(core, row, self.fields[1])?;
                if lat == 0.0 && lon == 0.0 {
                    // The null island point means "not placed yet".
                    return Ok(None);
                }
                let hash = geo::encode(lat, lon, *precision as usize);
                Ok(Some(vec![Element::String(hash)]))
            }
            IndexKind::Custom { callback } => match callback(row) {
                None => Ok(None),
                Some(values) => values
                    .iter()
                    .map(|value| value.to_element())
                    .collect::<Result<Vec<_>>>()
                    .map(Some),
            },
            IndexKind::Search => Err(Error::mismatch(format!(
                "search index «{}» has no single key",
                self.name
            ))),
        }
    }

    /// Tokens of a row under a search index.
    pub fn tokens_of(&self, row: &Row) -> Vec<String> {
        self.fields
            .iter()
            .filter_map(|pos| match &row[*pos] {
                Value::String(text) => Some(search::tokenize(text)),
                _ => None,
            })
            .flatten()
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Bring the index in line with `row`; `old` is the previous row of
    /// the same primary, if the record already existed.
    pub async fn write(
        &self,
        ctx: &ChainCtx,
        core: &ObjectCore,
        primary: &[Element],
        row: &Row,
        old: Option<&Row>,
    ) -> Result<()> {
        if matches!(self.kind, IndexKind::Search) {
            return self.write_search(ctx, primary, row, old);
        }

        let new_key = self.key_of(core, row)?;
        let old_key = match old {
            Some(old_row) => self.key_of(core, old_row)?,
            None => None,
        };
        if new_key == old_key {
            // Same structural key: nothing moved.
            return Ok(());
        }
        if let Some(old_key) = old_key {
            self.clear_entry(ctx, &old_key, primary)?;
        }
        let Some(new_key) = new_key else { return Ok(()) };

        if self.unique() {
            let key = self.sub.pack(&new_key);
            let packed_primary = tuple::pack(primary);
            match ctx.read_get(&key).await? {
                Some(existing) if existing.as_ref() != packed_primary.as_slice() => {
                    return Err(Error::AlreadyExists);
                }
                Some(_) => {}
                None => {
                    ctx.txn.set(key, packed_primary).map_err(Error::from)?;
                }
            }
        } else {
            ctx.txn
                .set(self.entry_key(&new_key, primary), Vec::new())
                .map_err(Error::from)?;
        }
        Ok(())
    }

    /// Remove the entries of a deleted record.
    pub fn remove(
        &self,
        ctx: &ChainCtx,
        core: &ObjectCore,
        primary: &[Element],
        old: &Row,
    ) -> Result<()> {
        if matches!(self.kind, IndexKind::Search) {
            for token in self.tokens_of(old) {
                ctx.txn
                    .clear(self.entry_key(&[Element::String(token)], primary))
                    .map_err(Error::from)?;
            }
            return Ok(());
        }
        if let Some(key) = self.key_of(core, old)? {
            self.clear_entry(ctx, &key, primary)?;
        }
        Ok(())
    }

    fn write_search(
        &self,
        ctx: &ChainCtx,
        primary: &[Element],
        row: &Row,
        old: Option<&Row>,
    ) -> Result<()> {
        let new_tokens = self.tokens_of(row);
        let old_tokens = old.map(|old_row| self.tokens_of(old_row)).unwrap_or_default();
        for token in &new_tokens {
            if !old_tokens.contains(token) {
                ctx.txn
                    .set(
                        self.entry_key(&[Element::String(token.clone())], primary),
                        Vec::new(),
                    )
                    .map_err(Error::from)?;
            }
        }
        for token in &old_tokens {
            if !new_tokens.contains(token) {
                ctx.txn
                    .clear(self.entry_key(&[Element::String(token.clone())], primary))
                    .map_err(Error::from)?;
            }
        }
        Ok(())
    }

    fn clear_entry(&self, ctx: &ChainCtx, key: &[Element], primary: &[Element]) -> Result<()> {
        if self.unique() {
            ctx.txn.clear(self.sub.pack(key)).map_err(Error::from)
        } else {
            ctx.txn
                .clear(self.entry_key(key, primary))
                .map_err(Error::from)
        }
    }

    fn entry_key(&self, key: &[Element], primary: &[Element]) -> bytes::Bytes {
        let mut elements = Vec::with_capacity(key.len() + primary.len());
        elements.extend_from_slice(key);
        elements.extend_from_slice(primary);
        self.sub.pack(&elements)
    }

    /// Resolve an index key to the primary subspace of the matching
    /// record: the unique value row, or the first entry under the key.
    pub async fn primary_sub_of(
        &self,
        ctx: &ChainCtx,
        core: &ObjectCore,
        key: &[Element],
    ) -> Result<Subspace> {
        if self.unique() {
            let raw = ctx
                .read_get(&self.sub.pack(key))
                .await?
                .ok_or(Error::NotFound)?;
            let primary = tuple::unpack(&raw)
                .map_err(|_| Error::corrupt("unique index value is not a primary tuple"))?;
            Ok(core.sub(&primary))
        } else {
            let prefix = self.sub.sub(key);
            let found = ctx
                .read_key(KeySelector::first_greater_or_equal(prefix.range().begin))
                .await?
                .ok_or(Error::NotFound)?;
            if !prefix.contains(&found) {
                return Err(Error::NotFound);
            }
            let primary = prefix
                .unpack(&found)
                .map_err(|_| Error::corrupt("index entry key does not unpack"))?;
            if primary.is_empty() {
                return Err(Error::corrupt("index entry carries no primary tuple"));
            }
            Ok(core.sub(&primary))
        }
    }

    /// Primary tuples of every entry under the given index key, in
    /// key-sorted order. Unique indexes cannot be listed.
    pub async fn list(
        &self,
        ctx: &ChainCtx,
        prefix: &[Element],
        from: Option<&[Element]>,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<Vec<Element>>> {
        if self.unique() {
            return Err(Error::mismatch(format!(
                "unique index «{}» cannot be listed",
                self.name
            )));
        }
        let key_len = if prefix.is_empty() {
            match &self.kind {
                IndexKind::Plain { .. } => self.fields.len(),
                _ => {
                    return Err(Error::mismatch(format!(
                        "index «{}» needs an explicit key to be listed",
                        self.name
                    )))
                }
            }
        } else {
            prefix.len()
        };
        let base = if prefix.is_empty() { self.sub.clone() } else { self.sub.sub(prefix) };
        let mut range = base.range();
        if let Some(from) = from {
            if reverse {
                range.end = base.pack(from);
            } else {
                range.begin = base.pack(from);
            }
        }
        let options = RangeOptions {
            limit: (limit > 0).then_some(limit),
            reverse,
        };
        let rows = ctx.read_range(&range, options).await?;
        let mut primaries = Vec::with_capacity(rows.len());
        for row in rows {
            let full = self
                .sub
                .unpack(&row.key)
                .map_err(|_| Error::corrupt("index entry key does not unpack"))?;
            if full.len() <= key_len {
                return Err(Error::corrupt("index entry carries no primary tuple"));
            }
            primaries.push(full[key_len..].to_vec());
        }
        Ok(primaries)
    }
}

fn float_of(core: &ObjectCore, row: &Row, pos: usize) -> Result<f64> {
    match &row[pos] {
        Value::F64(v) => Ok(*v),
        Value::F32(v) => Ok(*v as f64),
        other => Err(Error::mismatch(format!(
            "geo source field «{}» must be a float, got {other:?}",
            core.fields[pos].name
        ))),
    }
}
