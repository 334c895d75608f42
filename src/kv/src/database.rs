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

use crate::error::KvError;
use crate::memory::MemoryEngine;
use crate::transaction::Transaction;

/// Tuning knobs for a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Maximum attempts for a conflicting read-write transaction.
    pub retry_limit: usize,
    /// Number of recently committed write sets retained for conflict
    /// validation. Snapshots older than the window conflict conservatively.
    pub conflict_window: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self { retry_limit: 32, conflict_window: 1024 }
    }
}

/// Errors that can flow out of a transaction closure. Implemented by
/// [`KvError`] itself and by higher-layer error types wrapping it, so the
/// retry loop can see through to the conflict.
pub trait TransactError: From<KvError> {
    fn retryable(&self) -> bool;
}

impl TransactError for KvError {
    fn retryable(&self) -> bool {
        self.is_retryable()
    }
}

/// Handle to an ordered transactional key-value store.
#[derive(Clone)]
pub struct Database {
    engine: Arc<MemoryEngine>,
    options: Arc<DatabaseOptions>,
}

impl Database {
    /// An in-memory database, suitable for tests and embedding.
    pub fn memory() -> Self {
        Self::memory_with(DatabaseOptions::default())
    }

    pub fn memory_with(options: DatabaseOptions) -> Self {
        Self {
            engine: Arc::new(MemoryEngine::new(options.conflict_window)),
            options: Arc::new(options),
        }
    }

    /// Run a read-write transaction. The closure is re-invoked with a fresh
    /// transaction whenever the commit conflicts, up to the retry limit, so
    /// it must be free of side effects outside the transaction.
    pub async fn transact<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        E: TransactError,
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let txn = Transaction::new(self.engine.clone(), true);
            let retryable = attempt < self.options.retry_limit;
            match f(txn.clone()).await {
                Ok(value) => {
                    let (reads, ops) = match txn.take_for_commit() {
                        Ok(parts) => parts,
                        Err(err) => return Err(E::from(err)),
                    };
                    match self.engine.commit(txn.snapshot_version(), &reads, ops) {
                        Ok(_) => return Ok(value),
                        Err(err) if err.is_retryable() && retryable => {
                            tracing::trace!(attempt, "commit conflict, retrying transaction");
                        }
                        Err(err) if err.is_retryable() => {
                            return Err(E::from(KvError::RetryLimit));
                        }
                        Err(err) => return Err(E::from(err)),
                    }
                }
                Err(err) if err.retryable() && retryable => {
                    tracing::trace!(attempt, "transaction closure conflicted, retrying");
                }
                Err(err) if err.retryable() => return Err(E::from(KvError::RetryLimit)),
                Err(err) => return Err(err),
            }
        }
    }

    /// Run a read-only transaction over a single snapshot. Reads add no
    /// conflict footprint and the closure runs exactly once.
    pub async fn read_transact<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        E: TransactError,
        F: Fn(Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let txn = Transaction::new(self.engine.clone(), false);
        f(txn).await
    }

    pub(crate) fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }
}
