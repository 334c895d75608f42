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

use crate::types::Value;

/// Positional access to a user record's fields.
///
/// The layer addresses fields by position, in the order they were declared
/// on the [`ObjectBuilder`](crate::ObjectBuilder). Implementations are
/// mechanical:
///
/// ```ignore
/// #[derive(Clone, Default)]
/// struct User {
///     id: i64,
///     login: String,
/// }
///
/// impl Record for User {
///     fn get_field(&self, pos: usize) -> Value {
///         match pos {
///             0 => self.id.into(),
///             1 => self.login.clone().into(),
///             _ => unreachable!("field position out of range"),
///         }
///     }
///
///     fn set_field(&mut self, pos: usize, value: Value) {
///         match (pos, value) {
///             (0, Value::I64(v)) => self.id = v,
///             (1, Value::String(v)) => self.login = v,
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait Record: Clone + Default + Send + Sync + 'static {
    /// The value of the field declared at `pos`.
    fn get_field(&self, pos: usize) -> Value;

    /// Store a value into the field declared at `pos`. Implementations
    /// ignore values whose variant does not fit the field.
    fn set_field(&mut self, pos: usize, value: Value);
}
