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

//! Directory layer: maps human-readable paths to short, stable key
//! prefixes.
//!
//! Node metadata lives in a reserved space starting with `0xFE`, below the
//! key ceiling and above every allocated prefix. Prefixes are tuple-encoded
//! values of a single atomic-add allocator, so they stay short and never
//! collide with the node space.

use bytes::Bytes;

use crate::database::Database;
use crate::error::{KvError, KvResult};
use crate::subspace::Subspace;
use crate::tuple::{self, Element};

const NODE_SPACE: u8 = 0xFE;
const ALLOCATOR_KEY: &[u8] = &[NODE_SPACE, 0x00];

fn node_key(path: &[&str]) -> Bytes {
    let elements: Vec<Element> = path.iter().map(|p| Element::from(*p)).collect();
    let mut key = vec![NODE_SPACE];
    tuple::pack_into(&elements, &mut key);
    key.into()
}

impl Database {
    /// Open the subspace for `path`, allocating a fresh prefix on first
    /// use. Concurrent callers race through the conflict-retry loop, so
    /// exactly one allocation wins per path.
    pub async fn create_or_open(&self, path: &[&str]) -> KvResult<Subspace> {
        if path.is_empty() {
            return Err(KvError::Tuple("directory path must not be empty".into()));
        }
        let key = node_key(path);
        let prefix: Bytes = self
            .transact::<_, KvError, _, _>(|txn| {
                let key = key.clone();
                async move {
                    if let Some(existing) = txn.get(&key).await? {
                        return Ok(existing);
                    }
                    txn.atomic_add(Bytes::from_static(ALLOCATOR_KEY), &1u64.to_le_bytes())?;
                    let raw = txn
                        .get(ALLOCATOR_KEY)
                        .await?
                        .expect("allocator key exists after atomic add");
                    let mut buf = [0u8; 8];
                    buf[..raw.len().min(8)].copy_from_slice(&raw[..raw.len().min(8)]);
                    let id = u64::from_le_bytes(buf);
                    let prefix: Bytes = tuple::pack(&[Element::Uint(id)]).into();
                    txn.set(key, prefix.clone())?;
                    tracing::debug!(id, "allocated directory prefix");
                    Ok(prefix)
                }
            })
            .await?;
        Ok(Subspace::new(prefix))
    }
}
