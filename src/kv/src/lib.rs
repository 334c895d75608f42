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

//! An ordered, transactional key-value substrate for the stratum document
//! layer.
//!
//! The crate exposes the contract the layer consumes: byte-string keys kept
//! in lexicographic order, serializable read-write transactions retried on
//! conflict, snapshot reads, streaming range reads, atomic little-endian
//! adds, an order-preserving tuple encoding, and a directory layer that
//! allocates short stable prefixes for human-readable paths.
//!
//! The backend shipped here is an in-memory multi-version engine intended
//! for tests and embedding. It keeps every committed version of every key,
//! never garbage-collects, and should not be used as durable storage.

#![forbid(unsafe_code)]

mod database;
mod directory;
mod error;
mod memory;
mod subspace;
mod transaction;
pub mod tuple;

pub use database::{Database, DatabaseOptions, TransactError};
pub use error::{KvError, KvResult};
pub use subspace::{KeyRange, Subspace};
pub use transaction::{KeySelector, KeyValue, RangeOptions, Transaction};
pub use tuple::Element;
