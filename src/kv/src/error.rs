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

use thiserror::Error;

pub type KvResult<T> = Result<T, KvError>;

/// Errors surfaced by the key-value substrate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The transaction read state that another transaction committed over.
    /// Retryable.
    #[error("transaction conflict")]
    Conflict,

    /// The conflict retry budget was exhausted.
    #[error("transaction retry limit reached")]
    RetryLimit,

    /// The transaction was cancelled before commit.
    #[error("transaction cancelled")]
    Cancelled,

    /// A write was issued through a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// A key could not be decoded as a tuple.
    #[error("malformed tuple encoding: {0}")]
    Tuple(String),
}

impl KvError {
    /// Whether rerunning the transaction closure may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::Conflict)
    }
}
