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

use stratum_kv::{KvError, TransactError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the document layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// No row matched: a point get, an index lookup, a relation edge.
    #[error("document not found")]
    NotFound,

    /// A primary key, a unique index key, or a relation edge collided.
    #[error("object already exists")]
    AlreadyExists,

    /// Stored bytes do not decode as the schema describes them.
    #[error("data corrupt: {0}")]
    DataCorrupt(String),

    /// A value passed in does not match the schema: wrong primary-key kind,
    /// undefined index, wrong slice element.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Invalid schema declaration, reported by the object builder.
    #[error("schema error: {0}")]
    Schema(String),

    /// Underlying store failure.
    #[error("storage error: {0}")]
    Storage(#[from] KvError),
}

impl TransactError for Error {
    fn retryable(&self) -> bool {
        matches!(self, Error::Storage(err) if err.is_retryable())
    }
}

impl Error {
    pub(crate) fn corrupt(context: impl Into<String>) -> Self {
        Error::DataCorrupt(context.into())
    }

    pub(crate) fn mismatch(context: impl Into<String>) -> Self {
        Error::TypeMismatch(context.into())
    }

    pub(crate) fn schema(context: impl Into<String>) -> Self {
        Error::Schema(context.into())
    }
}
