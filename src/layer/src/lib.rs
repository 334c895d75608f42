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

//! Document/object layer over a transactional ordered key-value store.
//!
//! User code declares record schemas through [`Directory::object`]: typed
//! fields, a primary key, secondary indexes (unique, plain, optional,
//! geospatial, full-text, custom), counters, and N-to-N relations between
//! record types. The layer translates record-level operations into
//! coordinated key-value operations inside a single transaction of the
//! underlying store, so records, their index entries, and their counters
//! never disagree at a committed state.
//!
//! ```ignore
//! let db = Database::memory();
//! let dir = Directory::open(&db, "app").await?;
//! let users = dir
//!     .object::<User>("user")
//!     .field("id,primary,autoincrement", Kind::I64)
//!     .field("login,unique", Kind::String)
//!     .done()
//!     .await?;
//!
//! let john = users.add(&User { login: "john".into(), ..User::default() }).exec().await?;
//! let fetched = users.get(john.id).exec().await?;
//! ```

#![forbid(unsafe_code)]

mod codec;
mod counter;
mod directory;
mod error;
mod field;
mod index;
mod object;
mod promise;
mod query;
mod record;
mod schema;
mod transaction;
mod types;
mod value;

pub mod relation;

pub use stratum_kv::{Database, DatabaseOptions, Element};

pub use crate::counter::Counter;
pub use crate::directory::Directory;
pub use crate::error::{Error, Result};
pub use crate::field::{Field, GenId};
pub use crate::index::geo::IndexGeo;
pub use crate::index::search::IndexSearch;
pub use crate::object::{IntoPrimaryKey, Object, ObjectBuilder};
pub use crate::promise::{Promise, PromiseSlice};
pub use crate::query::Query;
pub use crate::record::Record;
pub use crate::relation::{Relation, RelationBuilder};
pub use crate::transaction::Transaction;
pub use crate::types::{Kind, Value};
pub use crate::value::RowValue;
