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

//! Promises: one logical operation's pipeline of transactional steps.
//!
//! A promise owns an entry closure producing a *chain*: each step receives
//! the transaction context and either returns the next step, finishes, or
//! fails. The enclosing transaction drives all attached chains round-robin,
//! so independent operations interleave their read phases inside one store
//! transaction. The store may retry that transaction on conflict; the
//! promise is then cleared and its chain re-built from the entry closure,
//! which is why entries are `Fn` and must stay free of external side
//! effects.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use stratum_kv::{
    Database, KeyRange, KeySelector, KeyValue, RangeOptions, Transaction as KvTransaction,
};

use crate::error::{Error, Result};
use crate::query::SelectOptions;
use crate::record::Record;
use crate::transaction::Transaction;

/// Execution context handed to every chain step.
#[derive(Clone)]
pub(crate) struct ChainCtx {
    pub txn: KvTransaction,
    /// True when the whole transaction is a snapshot read; reads then skip
    /// conflict tracking.
    pub snapshot: bool,
}

impl ChainCtx {
    pub async fn read_get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let value = if self.snapshot {
            self.txn.snapshot_get(key).await?
        } else {
            self.txn.get(key).await?
        };
        Ok(value)
    }

    pub async fn read_range(
        &self,
        range: &KeyRange,
        options: RangeOptions,
    ) -> Result<Vec<KeyValue>> {
        let rows = if self.snapshot {
            self.txn.snapshot_get_range(range, options).await?
        } else {
            self.txn.get_range(range, options).await?
        };
        Ok(rows)
    }

    pub async fn read_key(&self, selector: KeySelector) -> Result<Option<Bytes>> {
        Ok(self.txn.get_key(selector).await?)
    }
}

/// Outcome of one chain step.
pub(crate) enum Step {
    Next(ChainStep),
    Done,
}

/// One continuation in a promise's chain.
pub(crate) type ChainStep = Box<dyn FnOnce(ChainCtx) -> BoxFuture<'static, Result<Step>> + Send>;

/// The re-runnable head of a chain.
pub(crate) type ChainEntry =
    Arc<dyn Fn(ChainCtx) -> BoxFuture<'static, Result<Step>> + Send + Sync>;

/// Where a chain leaves its typed response.
pub(crate) type OutSlot<T> = Arc<Mutex<Option<Result<T>>>>;

/// Store the response and finish the chain.
pub(crate) fn done<T>(out: &OutSlot<T>, value: T) -> Step {
    *out.lock() = Some(Ok(value));
    Step::Done
}

pub(crate) type AfterFn = Arc<dyn Fn() -> DynTask + Send + Sync>;

/// Type-erased view of a promise, as the transaction executor sees it.
#[derive(Clone)]
pub(crate) struct DynTask {
    pub entry: ChainEntry,
    pub clear: Arc<dyn Fn() + Send + Sync>,
    pub fail: Arc<dyn Fn(Error) + Send + Sync>,
    pub read_only: bool,
    pub after: Arc<Mutex<Option<AfterFn>>>,
}

impl DynTask {
    pub fn first_step(&self) -> ChainStep {
        let entry = self.entry.clone();
        Box::new(move |ctx| entry(ctx))
    }
}

/// A single logical operation awaiting execution.
///
/// Run it standalone with [`Promise::exec`], or attach it to a
/// [`Transaction`] with [`Promise::check`] / [`Promise::attempt`] and read
/// the response with [`Promise::result`] after the transaction executed.
pub struct Promise<T> {
    db: Database,
    read_only: bool,
    entry: ChainEntry,
    out: OutSlot<T>,
    after: Arc<Mutex<Option<AfterFn>>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Build a promise whose chain is produced by `build`, which receives
    /// the context and the typed output slot on every (re-)run.
    pub(crate) fn new<F>(db: Database, read_only: bool, build: F) -> Promise<T>
    where
        F: Fn(ChainCtx, OutSlot<T>) -> BoxFuture<'static, Result<Step>> + Send + Sync + 'static,
    {
        let out: OutSlot<T> = Arc::new(Mutex::new(None));
        let entry: ChainEntry = {
            let out = out.clone();
            Arc::new(move |ctx| build(ctx, out.clone()))
        };
        Promise {
            db,
            read_only,
            entry,
            out,
            after: Arc::new(Mutex::new(None)),
        }
    }

    /// A promise that fails without touching the store; used when argument
    /// validation fails at call time.
    pub(crate) fn ready_err(db: Database, err: Error) -> Promise<T> {
        Promise::new(db, true, move |_ctx, _out| {
            let err = err.clone();
            async move { Err(err) }.boxed()
        })
    }

    pub(crate) fn task(&self) -> DynTask {
        let out_clear = self.out.clone();
        let out_fail = self.out.clone();
        DynTask {
            entry: self.entry.clone(),
            clear: Arc::new(move || {
                *out_clear.lock() = None;
            }),
            fail: Arc::new(move |err| {
                *out_fail.lock() = Some(Err(err));
            }),
            read_only: self.read_only,
            after: self.after.clone(),
        }
    }

    /// Execute standalone in its own transaction, retried by the store on
    /// conflict, and return the response.
    pub async fn exec(self) -> Result<T> {
        let mut txn = Transaction::new(&self.db);
        self.check(&mut txn);
        txn.execute().await?;
        self.take()
    }

    /// Attach with the `check` policy: an error cancels the whole
    /// transaction.
    pub fn check(&self, txn: &mut Transaction) {
        txn.push_check(self.task());
    }

    /// Attach with the `try` policy: an error is recorded in this promise
    /// but the transaction goes on and may commit.
    pub fn attempt(&self, txn: &mut Transaction) {
        txn.push_try(self.task());
    }

    /// Schedule a follow-up promise that starts inside the same transaction
    /// once this chain finished.
    pub fn after<U, F>(&self, make: F)
    where
        U: Send + 'static,
        F: Fn() -> Promise<U> + Send + Sync + 'static,
    {
        *self.after.lock() = Some(Arc::new(move || make().task()));
    }

    /// The response recorded by the last execution.
    ///
    /// Panics if the promise was never driven by a transaction; that is a
    /// programming error, not a runtime condition.
    pub fn result(&self) -> Result<T> {
        self.take()
    }

    fn take(&self) -> Result<T> {
        self.out
            .lock()
            .take()
            .expect("promise was not executed; attach it to a transaction first")
    }
}

/// A promise resolving to a list of records, with chainable paging options
/// read by the chain at execution time.
pub struct PromiseSlice<R: Record> {
    inner: Promise<Vec<R>>,
    options: Arc<Mutex<SelectOptions>>,
}

impl<R: Record> PromiseSlice<R> {
    pub(crate) fn new(inner: Promise<Vec<R>>, options: Arc<Mutex<SelectOptions>>) -> Self {
        Self { inner, options }
    }

    pub fn limit(self, limit: usize) -> Self {
        self.options.lock().limit = limit;
        self
    }

    pub fn reverse(self) -> Self {
        self.options.lock().reverse = true;
        self
    }

    /// Resume the listing from this key suffix.
    pub fn from(self, values: Vec<crate::types::Value>) -> Self {
        self.options.lock().from = values;
        self
    }

    pub async fn exec(self) -> Result<Vec<R>> {
        self.inner.exec().await
    }

    pub fn check(&self, txn: &mut Transaction) {
        self.inner.check(txn);
    }

    pub fn attempt(&self, txn: &mut Transaction) {
        self.inner.attempt(txn);
    }

    pub fn result(&self) -> Result<Vec<R>> {
        self.inner.result()
    }
}
