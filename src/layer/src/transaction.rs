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

//! Grouping of promises into one underlying-store transaction.

use std::sync::Arc;

use stratum_kv::Database;

use crate::error::{Error, Result};
use crate::promise::{ChainCtx, ChainStep, DynTask, Step};

#[derive(Clone, Copy, Debug)]
enum Policy {
    /// An error cancels the whole transaction.
    Check,
    /// An error is swallowed into the promise; the transaction may commit.
    Try,
}

/// Executes a set of promises inside a single store transaction.
///
/// If every attached promise is read-only the transaction runs as a
/// snapshot read; otherwise as a read-write transaction that the store
/// retries on conflict, re-running every chain from its entry.
pub struct Transaction {
    db: Database,
    tasks: Vec<(DynTask, Policy)>,
    preset: Option<Error>,
}

impl Transaction {
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone(), tasks: Vec::new(), preset: None }
    }

    pub(crate) fn push_check(&mut self, task: DynTask) {
        self.tasks.push((task, Policy::Check));
    }

    pub(crate) fn push_try(&mut self, task: DynTask) {
        self.tasks.push((task, Policy::Try));
    }

    /// Mark the transaction failed; `execute` will refuse to run and no
    /// write reaches the store.
    pub fn fail(&mut self, err: Error) {
        self.preset = Some(err);
    }

    /// Run every attached chain to completion and commit.
    pub async fn execute(self) -> Result<()> {
        if let Some(err) = self.preset {
            return Err(err);
        }
        if self.tasks.is_empty() {
            return Ok(());
        }
        let read_only = self.tasks.iter().all(|(task, _)| task.read_only);
        let tasks = Arc::new(self.tasks);

        if read_only {
            self.db
                .read_transact(move |txn| {
                    let tasks = tasks.clone();
                    async move { run_chains(&tasks, ChainCtx { txn, snapshot: true }).await }
                })
                .await
        } else {
            self.db
                .transact(move |txn| {
                    let tasks = tasks.clone();
                    async move { run_chains(&tasks, ChainCtx { txn, snapshot: false }).await }
                })
                .await
        }
    }
}

/// One attempt: clear every promise, then drive the chains round-robin.
/// Step `i+1` of a task never runs before its step `i`; there is no
/// ordering guarantee between different tasks within a round.
async fn run_chains(initial: &[(DynTask, Policy)], ctx: ChainCtx) -> Result<()> {
    let mut tasks: Vec<(DynTask, Policy)> = initial.to_vec();
    for (task, _) in &tasks {
        (task.clear)();
    }
    let mut slots: Vec<Option<ChainStep>> =
        tasks.iter().map(|(task, _)| Some(task.first_step())).collect();

    loop {
        let mut progressed = false;
        let mut index = 0;
        while index < slots.len() {
            if let Some(step) = slots[index].take() {
                progressed = true;
                match step(ctx.clone()).await {
                    Ok(Step::Next(next)) => slots[index] = Some(next),
                    Ok(Step::Done) => {
                        // A finished task may enqueue a follow-up promise
                        // into the same transaction.
                        let after = tasks[index].0.after.lock().clone();
                        if let Some(make) = after {
                            let task = make();
                            (task.clear)();
                            slots.push(Some(task.first_step()));
                            tasks.push((task, Policy::Try));
                        }
                    }
                    Err(err) => {
                        (tasks[index].0.fail)(err.clone());
                        if matches!(tasks[index].1, Policy::Check) {
                            return Err(err);
                        }
                    }
                }
            }
            index += 1;
        }
        if !progressed {
            return Ok(());
        }
    }
}
