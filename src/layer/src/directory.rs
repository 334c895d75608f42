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

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use stratum_kv::{Database, Subspace, Transaction as KvTransaction};

use crate::error::Result;
use crate::object::{ObjectBuilder, ObjectCore};
use crate::promise::ChainCtx;
use crate::record::Record;
use crate::transaction::Transaction;

/// A named root scope owning a set of objects. The entry point for
/// declaring schemas.
#[derive(Clone)]
pub struct Directory {
    inner: Arc<DirInner>,
}

struct DirInner {
    name: String,
    db: Database,
    #[allow(dead_code)]
    sub: Subspace,
    objects: Mutex<Vec<Arc<ObjectCore>>>,
}

impl Directory {
    /// Open (or create) the directory named `name`.
    pub async fn open(db: &Database, name: &str) -> Result<Directory> {
        let sub = db.create_or_open(&["dir", name]).await?;
        Ok(Directory {
            inner: Arc::new(DirInner {
                name: name.to_owned(),
                db: db.clone(),
                sub,
                objects: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// Start declaring a record type stored under this directory.
    pub fn object<R: Record>(&self, name: &str) -> ObjectBuilder<R> {
        ObjectBuilder::new(self.clone(), name)
    }

    /// A transaction grouping several promises of this directory's
    /// objects.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(&self.inner.db)
    }

    /// Run a raw read-only transaction against the underlying store.
    pub async fn read<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: Fn(KvTransaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.inner.db.read_transact(f).await
    }

    /// Run a raw read-write transaction against the underlying store,
    /// retried on conflict.
    pub async fn write<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: Fn(KvTransaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.inner.db.transact(f).await
    }

    pub(crate) fn register(&self, core: Arc<ObjectCore>) {
        self.inner.objects.lock().push(core);
    }

    /// Wipe the data of every object built under this directory: record
    /// rows, indexes, counters, and the misc space (auto-increment state
    /// and schema history included).
    pub async fn clear_all(&self) -> Result<()> {
        let cores: Vec<Arc<ObjectCore>> = self.inner.objects.lock().clone();
        self.inner
            .db
            .transact(move |txn| {
                let cores = cores.clone();
                let ctx = ChainCtx { txn, snapshot: false };
                async move {
                    for core in &cores {
                        ctx.txn.clear_range(&core.primary_sub.raw_range())?;
                        ctx.txn.clear_range(&core.misc_sub.raw_range())?;
                        for index in core.indexes.values() {
                            ctx.txn.clear_range(&index.sub.raw_range())?;
                        }
                        for counter in core.counters.values() {
                            ctx.txn.clear_range(&counter.sub.raw_range())?;
                        }
                    }
                    Ok(())
                }
            })
            .await
    }
}
