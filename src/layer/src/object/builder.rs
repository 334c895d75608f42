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
use std::marker::PhantomData;
use std::sync::Arc;

use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::field::{Field, GenId, ParsedTag};
use crate::index::{CustomFn, Index, IndexKind};
use crate::object::handle::Object;
use crate::object::ObjectCore;
use crate::promise::ChainCtx;
use crate::record::Record;
use crate::schema::{self, SchemaVersion};
use crate::types::{Kind, Value};
use crate::counter::CounterCore;

enum IndexSpec {
    Plain { name: String, fields: Vec<String>, unique: bool, optional: bool },
    Geo { name: String, lat: String, lon: String, precision: u8 },
    Search { name: String, fields: Vec<String> },
    Custom { name: String, callback: CustomFn },
}

impl IndexSpec {
    fn name(&self) -> &str {
        match self {
            IndexSpec::Plain { name, .. }
            | IndexSpec::Geo { name, .. }
            | IndexSpec::Search { name, .. }
            | IndexSpec::Custom { name, .. } => name,
        }
    }
}

/// Declares the schema of one record type and compiles it into an
/// [`Object`].
///
/// Declaration mistakes are collected and reported by [`done`], so a chain
/// of calls reads cleanly; [`done`] also allocates every subspace and
/// reconciles the stored schema history.
///
/// [`done`]: ObjectBuilder::done
pub struct ObjectBuilder<R: Record> {
    dir: Directory,
    name: String,
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    primary: Vec<usize>,
    indexes: Vec<IndexSpec>,
    counters: Vec<Vec<String>>,
    errors: Vec<Error>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Record> ObjectBuilder<R> {
    pub(crate) fn new(dir: Directory, name: &str) -> Self {
        Self {
            dir,
            name: name.to_owned(),
            fields: Vec::new(),
            by_name: HashMap::new(),
            primary: Vec::new(),
            indexes: Vec::new(),
            counters: Vec::new(),
            errors: Vec::new(),
            _marker: PhantomData,
        }
    }

    fn fail(&mut self, err: Error) {
        self.errors.push(err);
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.by_name.get(name).copied().ok_or_else(|| {
            Error::schema(format!("object «{}» has no field «{name}»", self.name))
        })
    }

    /// Declare the next field. The annotation is
    /// `"<stored-name>[,flag…]"` with flags `primary`, `mutable`,
    /// `autoincrement`, `unique`, `unstored`; the declaration order must
    /// match the positions served by the type's [`Record`] impl.
    pub fn field(mut self, tag: &str, kind: Kind) -> Self {
        let parsed = match ParsedTag::parse(tag) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.fail(err);
                return self;
            }
        };
        if self.by_name.contains_key(&parsed.name) {
            self.fail(Error::schema(format!(
                "object «{}» already has a field «{}»",
                self.name, parsed.name
            )));
            return self;
        }
        let pos = self.fields.len();
        let mut field = Field {
            name: parsed.name.clone(),
            pos,
            kind,
            primary: parsed.primary,
            mutable: parsed.mutable,
            unstored: parsed.unstored,
            auto_increment: false,
            gen_id: GenId::None,
        };
        if parsed.auto_increment {
            if let Err(err) = field.set_auto_increment() {
                self.fail(err);
            }
        }
        if parsed.primary && parsed.unstored {
            self.fail(Error::schema(format!(
                "field «{}» cannot be both primary and unstored",
                parsed.name
            )));
        }
        if parsed.primary {
            self.primary.push(pos);
        }
        self.by_name.insert(parsed.name.clone(), pos);
        self.fields.push(field);
        if parsed.unique {
            self = self.unique(&[&parsed.name]);
        }
        self
    }

    /// Set the primary composition explicitly, when no field tags carry
    /// `primary`.
    pub fn primary(mut self, names: &[&str]) -> Self {
        if !self.primary.is_empty() {
            self.fail(Error::schema(format!(
                "object «{}» already has a primary key",
                self.name
            )));
            return self;
        }
        for name in names {
            match self.position(name) {
                Ok(pos) => {
                    self.fields[pos].primary = true;
                    self.primary.push(pos);
                }
                Err(err) => self.fail(err),
            }
        }
        self
    }

    pub fn auto_increment(mut self, name: &str) -> Self {
        match self.position(name) {
            Ok(pos) => {
                if let Err(err) = self.fields[pos].set_auto_increment() {
                    self.fail(err);
                }
            }
            Err(err) => self.fail(err),
        }
        self
    }

    /// Date-based generated id: useful when a time-ordered key is wanted.
    pub fn id_date(self, name: &str) -> Self {
        self.gen_id(name, GenId::Date)
    }

    /// Random generated id: spreads records and reveals nothing.
    pub fn id_random(self, name: &str) -> Self {
        self.gen_id(name, GenId::Random)
    }

    fn gen_id(mut self, name: &str, strategy: GenId) -> Self {
        match self.position(name) {
            Ok(pos) => {
                if let Err(err) = self.fields[pos].set_gen_id(strategy) {
                    self.fail(err);
                }
            }
            Err(err) => self.fail(err),
        }
        self
    }

    /// Unique index: `add` and `set` fail with "already exists" when
    /// another record holds the same field values.
    pub fn unique(self, names: &[&str]) -> Self {
        self.plain_index(names, true, false)
    }

    /// Plain index over one or more fields.
    pub fn index(self, names: &[&str]) -> Self {
        self.plain_index(names, false, false)
    }

    /// Plain index written only when at least one source field is
    /// non-empty.
    pub fn index_optional(self, names: &[&str]) -> Self {
        self.plain_index(names, false, true)
    }

    fn plain_index(mut self, names: &[&str], unique: bool, optional: bool) -> Self {
        let name = names.join(",");
        let fields: Vec<String> = names.iter().map(|n| (*n).to_owned()).collect();
        self.push_index(IndexSpec::Plain { name, fields, unique, optional });
        self
    }

    /// Geohash index over a latitude and a longitude field; `precision`
    /// (1..=12) picks the cell size.
    pub fn index_geo(mut self, name: &str, lat: &str, lon: &str, precision: u8) -> Self {
        let precision = if (1..=12).contains(&precision) { precision } else { 12 };
        self.push_index(IndexSpec::Geo {
            name: name.to_owned(),
            lat: lat.to_owned(),
            lon: lon.to_owned(),
            precision,
        });
        self
    }

    /// Word index over string fields, for [`IndexSearch`] lookups.
    ///
    /// [`IndexSearch`]: crate::IndexSearch
    pub fn index_search(mut self, name: &str, fields: &[&str]) -> Self {
        self.push_index(IndexSpec::Search {
            name: name.to_owned(),
            fields: fields.iter().map(|n| (*n).to_owned()).collect(),
        });
        self
    }

    /// Custom index: the callback maps a record to its index key values,
    /// or `None` to leave it unindexed.
    pub fn index_custom<F>(mut self, name: &str, callback: F) -> Self
    where
        F: Fn(&R) -> Option<Vec<Value>> + Send + Sync + 'static,
    {
        let wrapped: CustomFn = Arc::new(move |row| {
            let mut record = R::default();
            for (pos, value) in row.iter().enumerate() {
                record.set_field(pos, value.clone());
            }
            callback(&record)
        });
        self.push_index(IndexSpec::Custom { name: name.to_owned(), callback: wrapped });
        self
    }

    fn push_index(&mut self, spec: IndexSpec) {
        if self.indexes.iter().any(|existing| existing.name() == spec.name()) {
            self.fail(Error::schema(format!(
                "object «{}» already has an index «{}»",
                self.name,
                spec.name()
            )));
            return;
        }
        if spec.name() == "misc" {
            self.fail(Error::schema("index name «misc» is reserved"));
            return;
        }
        self.indexes.push(spec);
    }

    /// Count records grouped by the values of the given fields.
    pub fn counter(mut self, names: &[&str]) -> Self {
        self.counters
            .push(names.iter().map(|n| (*n).to_owned()).collect());
        self
    }

    /// Allocate subspaces, reconcile the schema history, and return the
    /// usable object.
    pub async fn done(mut self) -> Result<Object<R>> {
        if self.primary.is_empty() {
            self.fail(Error::schema(format!(
                "object «{}» has no primary key",
                self.name
            )));
        }
        let compiled_indexes = self.compile_indexes();
        let compiled_counters = self.compile_counters();
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        let db = self.dir.database().clone();
        let dir_name = self.dir.name().to_owned();
        let base: Vec<&str> = vec!["dir", &dir_name, &self.name];

        let misc_sub = db.create_or_open(&with(&base, &["misc"])).await?;
        let primary_names: Vec<String> = self
            .primary
            .iter()
            .map(|pos| self.fields[*pos].name.clone())
            .collect();
        let primary_path: Vec<&str> = primary_names.iter().map(String::as_str).collect();
        let primary_sub = db.create_or_open(&with(&base, &primary_path)).await?;

        let mut indexes = HashMap::new();
        for (name, kind, field_positions) in compiled_indexes {
            let sub = db.create_or_open(&with(&base, &[&name])).await?;
            indexes.insert(
                name.clone(),
                Index { name, kind, fields: field_positions, sub },
            );
        }
        let mut counters = HashMap::new();
        for (name, field_positions) in compiled_counters {
            let sub = db.create_or_open(&with(&base, &[&name])).await?;
            counters.insert(
                name.clone(),
                CounterCore { name, fields: field_positions, sub },
            );
        }

        let stored_count = self.fields.iter().filter(|field| field.stored()).count();
        let current = SchemaVersion::current(&self.fields, &self.primary);
        let object_name = self.name.clone();
        let schema_version = {
            let misc_sub = misc_sub.clone();
            db.transact(move |txn| {
                let ctx = ChainCtx { txn, snapshot: false };
                let misc_sub = misc_sub.clone();
                let current = current.clone();
                let object_name = object_name.clone();
                async move { schema::reconcile(&ctx, &misc_sub, &object_name, &current).await }
            })
            .await?
        };

        let core = Arc::new(ObjectCore {
            name: self.name,
            db,
            fields: self.fields,
            by_name: self.by_name,
            primary: self.primary,
            stored_count,
            misc_sub,
            primary_sub,
            indexes,
            counters,
            schema_version,
        });
        self.dir.register(core.clone());
        Ok(Object::from_core(core))
    }

    fn compile_indexes(&mut self) -> Vec<(String, IndexKind, Vec<usize>)> {
        let mut compiled = Vec::new();
        let specs = std::mem::take(&mut self.indexes);
        for spec in specs {
            match spec {
                IndexSpec::Plain { name, fields, unique, optional } => {
                    match self.positions(&fields, scalar, "index fields must be scalars") {
                        Ok(positions) => compiled.push((
                            name,
                            IndexKind::Plain { unique, optional },
                            positions,
                        )),
                        Err(err) => self.fail(err),
                    }
                }
                IndexSpec::Geo { name, lat, lon, precision } => {
                    let float = |kind: &Kind| matches!(kind, Kind::F32 | Kind::F64);
                    match self.positions(
                        &[lat, lon],
                        float,
                        "geo index sources must be floats",
                    ) {
                        Ok(positions) => {
                            compiled.push((name, IndexKind::Geo { precision }, positions))
                        }
                        Err(err) => self.fail(err),
                    }
                }
                IndexSpec::Search { name, fields } => {
                    let text = |kind: &Kind| matches!(kind, Kind::String);
                    match self.positions(
                        &fields,
                        text,
                        "search index sources must be strings",
                    ) {
                        Ok(positions) => compiled.push((name, IndexKind::Search, positions)),
                        Err(err) => self.fail(err),
                    }
                }
                IndexSpec::Custom { name, callback } => {
                    compiled.push((name, IndexKind::Custom { callback }, Vec::new()))
                }
            }
        }
        compiled
    }

    fn compile_counters(&mut self) -> Vec<(String, Vec<usize>)> {
        let mut compiled = Vec::new();
        let specs = std::mem::take(&mut self.counters);
        for names in specs {
            match self.positions(&names, scalar, "counter fields must be scalars") {
                Ok(positions) => compiled.push((names.join(","), positions)),
                Err(err) => self.fail(err),
            }
        }
        compiled
    }

    fn positions<S: AsRef<str>>(
        &self,
        names: &[S],
        accept: impl Fn(&Kind) -> bool,
        why: &str,
    ) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                let pos = self.position(name.as_ref())?;
                if !accept(&self.fields[pos].kind) {
                    return Err(Error::schema(format!(
                        "field «{}»: {why}",
                        name.as_ref()
                    )));
                }
                Ok(pos)
            })
            .collect()
    }
}

fn with<'a>(base: &[&'a str], tail: &[&'a str]) -> Vec<&'a str> {
    let mut path = base.to_vec();
    path.extend_from_slice(tail);
    path
}

/// Whether a kind can live inside a key tuple.
fn scalar(kind: &Kind) -> bool {
    !matches!(
        kind,
        Kind::Array(_, _) | Kind::List(_) | Kind::Map(_, _) | Kind::Struct(_)
    )
}
