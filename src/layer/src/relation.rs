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

//! N-to-N relations: bidirectional edges between two record types.
//!
//! Layout under `dir / rel / <host> / <client>`:
//!
//! - `host / <host-pk> / <client-pk>` → per-edge payload about the client
//! - `client / <client-pk> / <host-pk>` → per-edge payload about the host
//! - `info / a / <host-pk>` → the host's edge count
//! - `info / b / <client-pk>` → the client's edge count (optionally
//!   redirected into a mutable field of the client record)
//!
//! A self-relation (host == client) keeps both directions in the host
//! subspace. `set` is idempotent: re-adding an existing edge moves no
//! counter; `add` on an existing edge is "already exists"; `delete`
//! removes both directions and settles the counters only when the edge
//! was actually there.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use stratum_kv::{Element, RangeOptions, Subspace};

use crate::codec::{self, COUNT_DEC, COUNT_INC};
use crate::counter::decode_count;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::object::{Object, ObjectCore, Row};
use crate::promise::{done, ChainCtx, Promise, PromiseSlice, Step};
use crate::query::SelectOptions;
use crate::record::Record;
use crate::types::Value;

pub(crate) struct RelationCore {
    host: Arc<ObjectCore>,
    client: Arc<ObjectCore>,
    host_sub: Subspace,
    client_sub: Subspace,
    info_sub: Subspace,
    counter: bool,
    /// Field of the host record carried on the client-side mirror.
    host_data: Option<usize>,
    /// Field of the client record carried on the host-side edge.
    client_data: Option<usize>,
    /// Mutable integer field of the client record receiving the client's
    /// edge count instead of `info/b`.
    counter_client_field: Option<usize>,
}

/// One side of a relation call: the key tuple, plus the record's row when
/// a whole record was passed (needed to encode edge payloads).
pub struct RelationArg {
    tuple: Vec<Element>,
    row: Option<Row>,
}

/// Accepted argument shapes for relation endpoints: a record, a scalar
/// primary value, or an explicit value list.
pub trait IntoRelationArg<R: Record> {
    fn into_relation_arg(self, object: &Object<R>) -> Result<RelationArg>;
}

impl<R: Record> IntoRelationArg<R> for &R {
    fn into_relation_arg(self, object: &Object<R>) -> Result<RelationArg> {
        let core = object.core();
        let row = core.row_of(self);
        let tuple = core.primary_tuple(&row)?;
        Ok(RelationArg { tuple, row: Some(row) })
    }
}

impl<R: Record> IntoRelationArg<R> for Value {
    fn into_relation_arg(self, object: &Object<R>) -> Result<RelationArg> {
        let tuple = object.core().primary_from_values(&[self])?;
        Ok(RelationArg { tuple, row: None })
    }
}

impl<R: Record> IntoRelationArg<R> for Vec<Value> {
    fn into_relation_arg(self, object: &Object<R>) -> Result<RelationArg> {
        let tuple = object.core().primary_from_values(&self)?;
        Ok(RelationArg { tuple, row: None })
    }
}

macro_rules! scalar_relation_arg {
    ($($ty:ty),+) => {
        $(impl<R: Record> IntoRelationArg<R> for $ty {
            fn into_relation_arg(self, object: &Object<R>) -> Result<RelationArg> {
                Value::from(self).into_relation_arg(object)
            }
        })+
    };
}

scalar_relation_arg!(i32, i64, u32, u64, String);

/// Declares an N-to-N relation between two built objects.
pub struct RelationBuilder<H: Record, C: Record> {
    dir: Directory,
    host: Object<H>,
    client: Object<C>,
    counter: bool,
    host_data: Option<String>,
    client_data: Option<String>,
    counter_client_field: Option<String>,
}

impl<H: Record, C: Record> RelationBuilder<H, C> {
    pub(crate) fn new(dir: &Directory, host: &Object<H>, client: &Object<C>) -> Self {
        Self {
            dir: dir.clone(),
            host: host.clone(),
            client: client.clone(),
            counter: false,
            host_data: None,
            client_data: None,
            counter_client_field: None,
        }
    }

    /// Track per-host and per-client edge counts.
    pub fn counter(mut self, enabled: bool) -> Self {
        self.counter = enabled;
        self
    }

    /// Carry this field of the host record as the payload readable from
    /// the client side.
    pub fn host_data(mut self, field: &str) -> Self {
        self.host_data = Some(field.to_owned());
        self
    }

    /// Carry this field of the client record as the payload readable from
    /// the host side.
    pub fn client_data(mut self, field: &str) -> Self {
        self.client_data = Some(field.to_owned());
        self
    }

    /// Keep the client's edge count denormalized into this mutable
    /// integer field of the client record instead of `info/b`.
    pub fn counter_client_field(mut self, field: &str) -> Self {
        self.counter_client_field = Some(field.to_owned());
        self
    }

    pub async fn done(self) -> Result<Relation<H, C>> {
        let host_core = self.host.core().clone();
        let client_core = self.client.core().clone();

        let host_data = match &self.host_data {
            Some(name) => Some(host_core.field(name)?.pos),
            None => None,
        };
        let client_data = match &self.client_data {
            Some(name) => Some(client_core.field(name)?.pos),
            None => None,
        };
        let counter_client_field = match &self.counter_client_field {
            Some(name) => {
                let field = client_core.field(name)?;
                if !field.mutable || !field.kind.is_integer() {
                    return Err(Error::schema(format!(
                        "relation counter field «{name}» must be a mutable integer"
                    )));
                }
                if !self.counter {
                    return Err(Error::schema(
                        "a relation counter field needs counters enabled",
                    ));
                }
                Some(field.pos)
            }
            None => None,
        };

        let db = self.dir.database().clone();
        let dir_name = self.dir.name().to_owned();
        let base: [&str; 5] = ["dir", &dir_name, "rel", &host_core.name, &client_core.name];
        let host_sub = db.create_or_open(&join(&base, "host")).await?;
        let client_sub = if host_core.name == client_core.name {
            // Self-relation: one subspace holds both directions.
            host_sub.clone()
        } else {
            db.create_or_open(&join(&base, "client")).await?
        };
        let info_sub = db.create_or_open(&join(&base, "info")).await?;

        Ok(Relation {
            core: Arc::new(RelationCore {
                host: host_core,
                client: client_core,
                host_sub,
                client_sub,
                info_sub,
                counter: self.counter,
                host_data,
                client_data,
                counter_client_field,
            }),
            _marker: PhantomData,
        })
    }
}

fn join<'a>(base: &[&'a str; 5], tail: &'a str) -> Vec<&'a str> {
    let mut path = base.to_vec();
    path.push(tail);
    path
}

/// An edge id with its raw payload, for cheap pagination without record
/// fetches.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeData {
    pub id: Vec<Value>,
    pub data: Bytes,
}

/// A built N-to-N relation between a host and a client object.
pub struct Relation<H: Record, C: Record> {
    core: Arc<RelationCore>,
    _marker: PhantomData<fn() -> (H, C)>,
}

impl<H: Record, C: Record> Clone for Relation<H, C> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone(), _marker: PhantomData }
    }
}

impl RelationCore {
    fn edge_key(&self, host: &[Element], client: &[Element]) -> Bytes {
        self.host_sub.pack(&concat(host, client))
    }

    fn mirror_key(&self, host: &[Element], client: &[Element]) -> Bytes {
        self.client_sub.pack(&concat(client, host))
    }

    fn payload(
        &self,
        source: &Arc<ObjectCore>,
        field: Option<usize>,
        row: Option<&Row>,
    ) -> Result<Vec<u8>> {
        match (field, row) {
            (Some(pos), Some(row)) => {
                codec::encode_to_vec(&source.fields[pos].kind, &row[pos])
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Write both directions of an edge and settle the counters.
    fn write_edge(&self, ctx: &ChainCtx, host: &RelationArg, client: &RelationArg) -> Result<()> {
        let client_payload = self.payload(&self.client, self.client_data, client.row.as_ref())?;
        let host_payload = self.payload(&self.host, self.host_data, host.row.as_ref())?;
        ctx.txn
            .set(self.edge_key(&host.tuple, &client.tuple), client_payload)?;
        ctx.txn
            .set(self.mirror_key(&host.tuple, &client.tuple), host_payload)?;
        self.bump_counters(ctx, &host.tuple, &client.tuple, COUNT_INC)
    }

    fn clear_edge(&self, ctx: &ChainCtx, host: &[Element], client: &[Element]) -> Result<()> {
        ctx.txn.clear(self.edge_key(host, client))?;
        ctx.txn.clear(self.mirror_key(host, client))?;
        self.bump_counters(ctx, host, client, COUNT_DEC)
    }

    fn bump_counters(
        &self,
        ctx: &ChainCtx,
        host: &[Element],
        client: &[Element],
        delta: &[u8],
    ) -> Result<()> {
        if !self.counter {
            return Ok(());
        }
        ctx.txn.atomic_add(
            self.info_sub.pack(&concat(&[Element::from("a")], host)),
            delta,
        )?;
        match self.counter_client_field {
            Some(pos) => {
                // Denormalized: the count lives inside the client record.
                let field = &self.client.fields[pos];
                let key = self
                    .client
                    .sub(client)
                    .pack(&[Element::from(field.name.as_str())]);
                let width = codec::plus_one(&field.kind)?.len();
                ctx.txn.atomic_add(key, &delta[..width])?;
            }
            None => {
                ctx.txn.atomic_add(
                    self.info_sub.pack(&concat(&[Element::from("b")], client)),
                    delta,
                )?;
            }
        }
        Ok(())
    }
}

impl<H: Record, C: Record> Relation<H, C> {
    fn host_object(&self) -> Object<H> {
        Object::from_core(self.core.host.clone())
    }

    fn client_object(&self) -> Object<C> {
        Object::from_core(self.core.client.clone())
    }

    fn args(
        &self,
        host: impl IntoRelationArg<H>,
        client: impl IntoRelationArg<C>,
    ) -> Result<(RelationArg, RelationArg)> {
        Ok((
            host.into_relation_arg(&self.host_object())?,
            client.into_relation_arg(&self.client_object())?,
        ))
    }

    /// Connect host and client. Idempotent: an existing edge is left
    /// untouched and no counter moves.
    pub fn set(
        &self,
        host: impl IntoRelationArg<H>,
        client: impl IntoRelationArg<C>,
    ) -> Promise<()> {
        self.upsert(host, client, false)
    }

    /// Connect host and client; an existing edge is
    /// [`Error::AlreadyExists`].
    pub fn add(
        &self,
        host: impl IntoRelationArg<H>,
        client: impl IntoRelationArg<C>,
    ) -> Promise<()> {
        self.upsert(host, client, true)
    }

    fn upsert(
        &self,
        host: impl IntoRelationArg<H>,
        client: impl IntoRelationArg<C>,
        strict: bool,
    ) -> Promise<()> {
        let core = self.core.clone();
        let (host, client) = match self.args(host, client) {
            Ok(args) => args,
            Err(err) => return Promise::ready_err(core.host.db.clone(), err),
        };
        let args = Arc::new((host, client));
        Promise::new(core.host.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let args = args.clone();
            async move {
                let (host, client) = args.as_ref();
                let existing = ctx.txn.get(&core.edge_key(&host.tuple, &client.tuple)).await?;
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let (host, client) = args.as_ref();
                        if existing.is_some() {
                            if strict {
                                return Err(Error::AlreadyExists);
                            }
                            return Ok(done(&out, ()));
                        }
                        core.write_edge(&ctx, host, client)?;
                        Ok(done(&out, ()))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Disconnect host and client. Counters move only when the edge
    /// actually existed.
    pub fn delete(
        &self,
        host: impl IntoRelationArg<H>,
        client: impl IntoRelationArg<C>,
    ) -> Promise<()> {
        let core = self.core.clone();
        let (host, client) = match self.args(host, client) {
            Ok(args) => args,
            Err(err) => return Promise::ready_err(core.host.db.clone(), err),
        };
        let args = Arc::new((host, client));
        Promise::new(core.host.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let args = args.clone();
            async move {
                let (host, client) = args.as_ref();
                let existing = ctx.txn.get(&core.edge_key(&host.tuple, &client.tuple)).await?;
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let (host, client) = args.as_ref();
                        if existing.is_some() {
                            core.clear_edge(&ctx, &host.tuple, &client.tuple)?;
                        }
                        Ok(done(&out, ()))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }

    /// Whether the edge exists.
    pub fn check(
        &self,
        host: impl IntoRelationArg<H>,
        client: impl IntoRelationArg<C>,
    ) -> Promise<bool> {
        let core = self.core.clone();
        let (host, client) = match self.args(host, client) {
            Ok(args) => args,
            Err(err) => return Promise::ready_err(core.host.db.clone(), err),
        };
        Promise::new(core.host.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let key = core.edge_key(&host.tuple, &client.tuple);
            async move {
                let existing = ctx.read_get(&key).await?;
                Ok(done(&out, existing.is_some()))
            }
            .boxed()
        })
    }

    /// The host's edge count.
    pub fn get_clients_count(&self, host: impl IntoRelationArg<H>) -> Promise<i64> {
        let core = self.core.clone();
        let host = match host.into_relation_arg(&self.host_object()) {
            Ok(arg) => arg,
            Err(err) => return Promise::ready_err(core.host.db.clone(), err),
        };
        Promise::new(core.host.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let key = core
                .info_sub
                .pack(&concat(&[Element::from("a")], &host.tuple));
            async move {
                if !core.counter {
                    return Err(Error::mismatch("relation counters are not enabled"));
                }
                let raw = ctx.read_get(&key).await?;
                Ok(done(&out, decode_count(raw.as_deref())))
            }
            .boxed()
        })
    }

    /// The client's edge count, read from `info/b` or from the
    /// denormalized client field.
    pub fn get_hosts_count(&self, client: impl IntoRelationArg<C>) -> Promise<i64> {
        let core = self.core.clone();
        let client = match client.into_relation_arg(&self.client_object()) {
            Ok(arg) => arg,
            Err(err) => return Promise::ready_err(core.host.db.clone(), err),
        };
        Promise::new(core.host.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let key = match core.counter_client_field {
                Some(pos) => {
                    let field = &core.client.fields[pos];
                    core.client
                        .sub(&client.tuple)
                        .pack(&[Element::from(field.name.as_str())])
                }
                None => core
                    .info_sub
                    .pack(&concat(&[Element::from("b")], &client.tuple)),
            };
            async move {
                if !core.counter {
                    return Err(Error::mismatch("relation counters are not enabled"));
                }
                let raw = ctx.read_get(&key).await?;
                Ok(done(&out, decode_count(raw.as_deref())))
            }
            .boxed()
        })
    }

    /// The client records connected to a host, with per-edge payloads
    /// written into the clients' data field.
    pub fn get_clients(&self, host: impl IntoRelationArg<H>) -> PromiseSlice<C> {
        let core = self.core.clone();
        let host = match host.into_relation_arg(&self.host_object()) {
            Ok(arg) => arg,
            Err(err) => {
                return PromiseSlice::new(
                    Promise::ready_err(core.host.db.clone(), err),
                    Arc::new(Mutex::new(SelectOptions::default())),
                )
            }
        };
        let options = Arc::new(Mutex::new(SelectOptions::default()));
        let chain_options = options.clone();
        let host_tuple = host.tuple;
        let inner = Promise::new(core.host.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let host_tuple = host_tuple.clone();
            let options = chain_options.clone();
            async move {
                let edges =
                    scan_edges(&ctx, &core.host_sub, &host_tuple, &core.client, &options).await?;
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let mut records = Vec::with_capacity(edges.len());
                        for (tuple, payload) in edges {
                            let need = core.client.need(&ctx, core.client.sub(&tuple));
                            let mut record = match need.fetch(&core.client).await {
                                Ok(value) => value.fill::<C>(&core.client)?,
                                Err(Error::NotFound) => continue,
                                Err(err) => return Err(err),
                            };
                            apply_payload(&core.client, core.client_data, &payload, &mut record)?;
                            records.push(record);
                        }
                        Ok(done(&out, records))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        });
        PromiseSlice::new(inner, options)
    }

    /// The host records connected to a client; symmetric to
    /// [`Relation::get_clients`].
    pub fn get_hosts(&self, client: impl IntoRelationArg<C>) -> PromiseSlice<H> {
        let core = self.core.clone();
        let client = match client.into_relation_arg(&self.client_object()) {
            Ok(arg) => arg,
            Err(err) => {
                return PromiseSlice::new(
                    Promise::ready_err(core.host.db.clone(), err),
                    Arc::new(Mutex::new(SelectOptions::default())),
                )
            }
        };
        let options = Arc::new(Mutex::new(SelectOptions::default()));
        let chain_options = options.clone();
        let client_tuple = client.tuple;
        let inner = Promise::new(core.host.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let client_tuple = client_tuple.clone();
            let options = chain_options.clone();
            async move {
                let edges =
                    scan_edges(&ctx, &core.client_sub, &client_tuple, &core.host, &options).await?;
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let mut records = Vec::with_capacity(edges.len());
                        for (tuple, payload) in edges {
                            let need = core.host.need(&ctx, core.host.sub(&tuple));
                            let mut record = match need.fetch(&core.host).await {
                                Ok(value) => value.fill::<H>(&core.host)?,
                                Err(Error::NotFound) => continue,
                                Err(err) => return Err(err),
                            };
                            apply_payload(&core.host, core.host_data, &payload, &mut record)?;
                            records.push(record);
                        }
                        Ok(done(&out, records))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        });
        PromiseSlice::new(inner, options)
    }

    /// Only the client id tuples and raw payloads, for cheap pagination
    /// without fetching the client records.
    pub fn get_client_ids(
        &self,
        host: impl IntoRelationArg<H>,
        limit: usize,
    ) -> Promise<Vec<EdgeData>> {
        let core = self.core.clone();
        let host = match host.into_relation_arg(&self.host_object()) {
            Ok(arg) => arg,
            Err(err) => return Promise::ready_err(core.host.db.clone(), err),
        };
        let host_tuple = host.tuple;
        Promise::new(core.host.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let host_tuple = host_tuple.clone();
            async move {
                let options = Arc::new(Mutex::new(SelectOptions {
                    limit,
                    ..SelectOptions::default()
                }));
                let edges =
                    scan_edges(&ctx, &core.host_sub, &host_tuple, &core.client, &options).await?;
                let mut ids = Vec::with_capacity(edges.len());
                for (tuple, payload) in edges {
                    let id = core
                        .client
                        .primary
                        .iter()
                        .zip(&tuple)
                        .map(|(index, element)| {
                            Value::from_element(&core.client.fields[*index].kind, element)
                        })
                        .collect::<Result<Vec<Value>>>()?;
                    ids.push(EdgeData { id, data: payload });
                }
                Ok(done(&out, ids))
            }
            .boxed()
        })
    }

    /// Only the host id tuples and raw payloads of a client's edges.
    pub fn get_host_ids(
        &self,
        client: impl IntoRelationArg<C>,
        limit: usize,
    ) -> Promise<Vec<EdgeData>> {
        let core = self.core.clone();
        let client = match client.into_relation_arg(&self.client_object()) {
            Ok(arg) => arg,
            Err(err) => return Promise::ready_err(core.host.db.clone(), err),
        };
        let client_tuple = client.tuple;
        Promise::new(core.host.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let client_tuple = client_tuple.clone();
            async move {
                let options = Arc::new(Mutex::new(SelectOptions {
                    limit,
                    ..SelectOptions::default()
                }));
                let edges =
                    scan_edges(&ctx, &core.client_sub, &client_tuple, &core.host, &options).await?;
                let mut ids = Vec::with_capacity(edges.len());
                for (tuple, payload) in edges {
                    let id = core
                        .host
                        .primary
                        .iter()
                        .zip(&tuple)
                        .map(|(index, element)| {
                            Value::from_element(&core.host.fields[*index].kind, element)
                        })
                        .collect::<Result<Vec<Value>>>()?;
                    ids.push(EdgeData { id, data: payload });
                }
                Ok(done(&out, ids))
            }
            .boxed()
        })
    }

    /// Read both edge payloads, run the callback over both records, and
    /// write the re-encoded payloads back. The records' own primary rows
    /// are not touched.
    pub fn update_data<F>(&self, host: &H, client: &C, mutate: F) -> Promise<(H, C)>
    where
        F: Fn(&mut H, &mut C) -> Result<()> + Send + Sync + 'static,
    {
        let core = self.core.clone();
        let args = match self.args(host, client) {
            Ok(args) => Arc::new(args),
            Err(err) => return Promise::ready_err(core.host.db.clone(), err),
        };
        let host = host.clone();
        let client = client.clone();
        let mutate = Arc::new(mutate);
        Promise::new(core.host.db.clone(), false, move |ctx, out| {
            let core = core.clone();
            let args = args.clone();
            let mutate = mutate.clone();
            let mut host = host.clone();
            let mut client = client.clone();
            async move {
                let (host_arg, client_arg) = args.as_ref();
                let edge_key = core.edge_key(&host_arg.tuple, &client_arg.tuple);
                let mirror_key = core.mirror_key(&host_arg.tuple, &client_arg.tuple);
                let client_payload = ctx.txn.get(&edge_key).await?;
                let host_payload = ctx.txn.get(&mirror_key).await?;
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let client_payload = client_payload.ok_or(Error::NotFound)?;
                        let host_payload = host_payload.ok_or(Error::NotFound)?;
                        apply_payload(&core.client, core.client_data, &client_payload, &mut client)?;
                        apply_payload(&core.host, core.host_data, &host_payload, &mut host)?;
                        mutate(&mut host, &mut client)?;
                        if let Some(pos) = core.client_data {
                            let field = &core.client.fields[pos];
                            let cell =
                                codec::encode_to_vec(&field.kind, &client.get_field(pos))?;
                            ctx.txn.set(edge_key, cell)?;
                        }
                        if let Some(pos) = core.host_data {
                            let field = &core.host.fields[pos];
                            let cell = codec::encode_to_vec(&field.kind, &host.get_field(pos))?;
                            ctx.txn.set(mirror_key, cell)?;
                        }
                        Ok(done(&out, (host, client)))
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        })
    }
}

impl Directory {
    /// Declare an N-to-N relation between two objects of this directory.
    pub fn n2n<H: Record, C: Record>(
        &self,
        host: &Object<H>,
        client: &Object<C>,
    ) -> RelationBuilder<H, C> {
        RelationBuilder::new(self, host, client)
    }
}

/// Scan one direction's edges of an endpoint: `(other-side primary tuple,
/// payload)` pairs, bounded and ordered per the select options.
async fn scan_edges(
    ctx: &ChainCtx,
    side_sub: &Subspace,
    endpoint: &[Element],
    other: &Arc<ObjectCore>,
    options: &Arc<Mutex<SelectOptions>>,
) -> Result<Vec<(Vec<Element>, Bytes)>> {
    let opts = options.lock().clone();
    let endpoint_sub = side_sub.sub(endpoint);
    let mut range = endpoint_sub.range();
    if !opts.from.is_empty() {
        let from = opts
            .from
            .iter()
            .map(|value| value.to_element())
            .collect::<Result<Vec<Element>>>()?;
        if opts.reverse {
            range.end = endpoint_sub.pack(&from);
        } else {
            range.begin = endpoint_sub.pack(&from);
        }
    }
    let rows = ctx
        .read_range(
            &range,
            RangeOptions {
                limit: (opts.limit > 0).then_some(opts.limit),
                reverse: opts.reverse,
            },
        )
        .await?;
    let mut edges = Vec::with_capacity(rows.len());
    for row in rows {
        let tuple = endpoint_sub
            .unpack(&row.key)
            .map_err(|_| Error::corrupt("relation edge key does not unpack"))?;
        if tuple.len() != other.primary.len() {
            return Err(Error::corrupt("relation edge key has a foreign shape"));
        }
        edges.push((tuple, row.value));
    }
    Ok(edges)
}

/// Decode an edge payload into the record's data-carrier field; an empty
/// payload resets it to the kind-zero value.
fn apply_payload<R: Record>(
    core: &Arc<ObjectCore>,
    field: Option<usize>,
    payload: &[u8],
    record: &mut R,
) -> Result<()> {
    let Some(pos) = field else { return Ok(()) };
    let kind = &core.fields[pos].kind;
    let value = if payload.is_empty() {
        Value::default_of(kind)
    } else {
        codec::decode_exact(kind, payload)?
    };
    record.set_field(pos, value);
    Ok(())
}

fn concat(a: &[Element], b: &[Element]) -> Vec<Element> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}
