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

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{KvError, KvResult};
use crate::memory::{add_le, MemoryEngine, Span, WriteOp};
use crate::subspace::KeyRange;

/// One row returned by a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

/// Options for range reads.
#[derive(Debug, Clone, Default)]
pub struct RangeOptions {
    /// Maximum number of rows; `None` reads the whole range.
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl RangeOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), reverse: false }
    }
}

/// Resolves to the first key at or after (`FirstGreaterOrEqual`) or
/// strictly after (`FirstGreaterThan`) the given key.
#[derive(Debug, Clone)]
pub enum KeySelector {
    FirstGreaterOrEqual(Bytes),
    FirstGreaterThan(Bytes),
}

impl KeySelector {
    pub fn first_greater_or_equal(key: impl Into<Bytes>) -> Self {
        KeySelector::FirstGreaterOrEqual(key.into())
    }

    pub fn first_greater_than(key: impl Into<Bytes>) -> Self {
        KeySelector::FirstGreaterThan(key.into())
    }

    fn scan_start(&self) -> Bytes {
        match self {
            KeySelector::FirstGreaterOrEqual(key) => key.clone(),
            KeySelector::FirstGreaterThan(key) => {
                let mut next = Vec::with_capacity(key.len() + 1);
                next.extend_from_slice(key);
                next.push(0x00);
                next.into()
            }
        }
    }
}

/// Highest key bound used when resolving key selectors; every allocated
/// subspace prefix sorts below it.
const KEY_CEILING: &[u8] = &[0xFF];

enum OverlayEntry {
    Set(Bytes),
    Clear,
    Add { delta: Vec<u8>, over_clear: bool },
}

#[derive(Default)]
struct TxnState {
    /// Replay log shipped to the engine at commit.
    ops: Vec<WriteOp>,
    /// Read-your-writes view of buffered point mutations.
    overlay: BTreeMap<Bytes, OverlayEntry>,
    /// Ranges cleared in this transaction, applied to the base snapshot.
    cleared: Vec<(Bytes, Bytes)>,
    reads: Vec<Span>,
    cancelled: bool,
}

/// A transaction handle. Cheap to clone; all clones share one buffered
/// write set and read footprint over a fixed snapshot version.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
}

struct TxnInner {
    engine: Arc<MemoryEngine>,
    snapshot: u64,
    writable: bool,
    state: Mutex<TxnState>,
}

impl Transaction {
    pub(crate) fn new(engine: Arc<MemoryEngine>, writable: bool) -> Self {
        let snapshot = engine.version();
        Self {
            inner: Arc::new(TxnInner {
                engine,
                snapshot,
                writable,
                state: Mutex::new(TxnState::default()),
            }),
        }
    }

    pub fn is_writable(&self) -> bool {
        self.inner.writable
    }

    /// Read a single key, adding it to the read-conflict footprint.
    pub async fn get(&self, key: &[u8]) -> KvResult<Option<Bytes>> {
        let mut state = self.inner.state.lock();
        if self.inner.writable {
            state.reads.push(Span::Point(Bytes::copy_from_slice(key)));
        }
        Ok(self.resolve(&state, key))
    }

    /// Read a single key without registering a read conflict.
    pub async fn snapshot_get(&self, key: &[u8]) -> KvResult<Option<Bytes>> {
        let state = self.inner.state.lock();
        Ok(self.resolve(&state, key))
    }

    /// Range read, adding the range to the read-conflict footprint.
    pub async fn get_range(
        &self,
        range: &KeyRange,
        options: RangeOptions,
    ) -> KvResult<Vec<KeyValue>> {
        let mut state = self.inner.state.lock();
        if self.inner.writable {
            state
                .reads
                .push(Span::Range(range.begin.clone(), range.end.clone()));
        }
        Ok(self.range_view(&state, range, options))
    }

    /// Range read without registering a read conflict.
    pub async fn snapshot_get_range(
        &self,
        range: &KeyRange,
        options: RangeOptions,
    ) -> KvResult<Vec<KeyValue>> {
        let state = self.inner.state.lock();
        Ok(self.range_view(&state, range, options))
    }

    /// Resolve a key selector to the key it points at, if any key exists
    /// below the key ceiling.
    pub async fn get_key(&self, selector: KeySelector) -> KvResult<Option<Bytes>> {
        let begin = selector.scan_start();
        let end = Bytes::from_static(KEY_CEILING);
        let mut state = self.inner.state.lock();
        let found = self.first_in_range(&state, &begin, &end);
        if self.inner.writable {
            let read_end = match &found {
                Some(kv) => {
                    let mut k = kv.key.to_vec();
                    k.push(0x00);
                    k.into()
                }
                None => end,
            };
            state.reads.push(Span::Range(begin, read_end));
        }
        Ok(found.map(|kv| kv.key))
    }

    pub fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> KvResult<()> {
        self.writable()?;
        let (key, value) = (key.into(), value.into());
        let mut state = self.inner.state.lock();
        state.ops.push(WriteOp::Set(key.clone(), value.clone()));
        state.overlay.insert(key, OverlayEntry::Set(value));
        Ok(())
    }

    pub fn clear(&self, key: impl Into<Bytes>) -> KvResult<()> {
        self.writable()?;
        let key = key.into();
        let mut state = self.inner.state.lock();
        state.ops.push(WriteOp::Clear(key.clone()));
        state.overlay.insert(key, OverlayEntry::Clear);
        Ok(())
    }

    pub fn clear_range(&self, range: &KeyRange) -> KvResult<()> {
        self.writable()?;
        let mut state = self.inner.state.lock();
        state
            .ops
            .push(WriteOp::ClearRange(range.begin.clone(), range.end.clone()));
        let buffered: Vec<Bytes> = state
            .overlay
            .range((Included(range.begin.clone()), Excluded(range.end.clone())))
            .map(|(key, _)| key.clone())
            .collect();
        for key in buffered {
            state.overlay.remove(&key);
        }
        state.cleared.push((range.begin.clone(), range.end.clone()));
        Ok(())
    }

    /// Atomic little-endian add; the width of `delta` defines the cell
    /// width. Does not add a read conflict.
    pub fn atomic_add(&self, key: impl Into<Bytes>, delta: &[u8]) -> KvResult<()> {
        self.writable()?;
        let key = key.into();
        let mut state = self.inner.state.lock();
        state.ops.push(WriteOp::Add(key.clone(), delta.to_vec()));
        let next = match state.overlay.remove(&key) {
            Some(OverlayEntry::Set(value)) => {
                OverlayEntry::Set(add_le(Some(&value), delta).into())
            }
            Some(OverlayEntry::Clear) => {
                OverlayEntry::Add { delta: delta.to_vec(), over_clear: true }
            }
            Some(OverlayEntry::Add { delta: buffered, over_clear }) => OverlayEntry::Add {
                delta: add_le(Some(&buffered), delta),
                over_clear,
            },
            None => OverlayEntry::Add {
                delta: delta.to_vec(),
                over_clear: in_cleared(&state.cleared, &key),
            },
        };
        state.overlay.insert(key, next);
        Ok(())
    }

    /// Abort the transaction; the commit step will refuse it.
    pub fn cancel(&self) {
        self.inner.state.lock().cancelled = true;
    }

    pub(crate) fn snapshot_version(&self) -> u64 {
        self.inner.snapshot
    }

    pub(crate) fn engine(&self) -> &Arc<MemoryEngine> {
        &self.inner.engine
    }

    /// Drain the read footprint and write log for commit.
    pub(crate) fn take_for_commit(&self) -> KvResult<(Vec<Span>, Vec<WriteOp>)> {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            return Err(KvError::Cancelled);
        }
        Ok((
            std::mem::take(&mut state.reads),
            std::mem::take(&mut state.ops),
        ))
    }

    fn writable(&self) -> KvResult<()> {
        if self.inner.writable {
            Ok(())
        } else {
            Err(KvError::ReadOnly)
        }
    }

    fn resolve(&self, state: &TxnState, key: &[u8]) -> Option<Bytes> {
        if let Some(entry) = state.overlay.get(key) {
            return match entry {
                OverlayEntry::Set(value) => Some(value.clone()),
                OverlayEntry::Clear => None,
                OverlayEntry::Add { delta, over_clear } => {
                    let base = if *over_clear {
                        None
                    } else {
                        self.inner.engine.get(key, self.inner.snapshot)
                    };
                    Some(add_le(base.as_deref(), delta).into())
                }
            };
        }
        if in_cleared(&state.cleared, key) {
            return None;
        }
        self.inner.engine.get(key, self.inner.snapshot)
    }

    fn range_view(
        &self,
        state: &TxnState,
        range: &KeyRange,
        options: RangeOptions,
    ) -> Vec<KeyValue> {
        let mut view: BTreeMap<Bytes, Bytes> = self
            .inner
            .engine
            .scan(&range.begin, &range.end, self.inner.snapshot)
            .into_iter()
            .filter(|(key, _)| !in_cleared(&state.cleared, key))
            .collect();
        for (key, entry) in state
            .overlay
            .range((Included(range.begin.clone()), Excluded(range.end.clone())))
        {
            match entry {
                OverlayEntry::Set(value) => {
                    view.insert(key.clone(), value.clone());
                }
                OverlayEntry::Clear => {
                    view.remove(key);
                }
                OverlayEntry::Add { delta, over_clear } => {
                    let base = if *over_clear {
                        None
                    } else {
                        self.inner.engine.get(key, self.inner.snapshot)
                    };
                    view.insert(key.clone(), add_le(base.as_deref(), delta).into());
                }
            }
        }

        let take = options.limit.unwrap_or(usize::MAX);
        if options.reverse {
            view.into_iter()
                .rev()
                .take(take)
                .map(|(key, value)| KeyValue { key, value })
                .collect()
        } else {
            view.into_iter()
                .take(take)
                .map(|(key, value)| KeyValue { key, value })
                .collect()
        }
    }

    /// First visible row in `[begin, end)`, probing the base store lazily
    /// instead of materializing the whole range.
    fn first_in_range(&self, state: &TxnState, begin: &Bytes, end: &Bytes) -> Option<KeyValue> {
        let buffered = state
            .overlay
            .range((Included(begin.clone()), Excluded(end.clone())))
            .find_map(|(key, entry)| match entry {
                OverlayEntry::Clear => None,
                _ => self
                    .resolve(state, key)
                    .map(|value| KeyValue { key: key.clone(), value }),
            });

        let mut cursor = begin.clone();
        let base = loop {
            let Some((key, _)) =
                self.inner
                    .engine
                    .first(&cursor, end, self.inner.snapshot)
            else {
                break None;
            };
            match self.resolve(state, &key) {
                Some(value) => break Some(KeyValue { key, value }),
                // Cleared or overwritten by a tombstone; step past it.
                None => {
                    let mut next = key.to_vec();
                    next.push(0x00);
                    cursor = next.into();
                }
            }
        };

        match (buffered, base) {
            (Some(a), Some(b)) => Some(if a.key <= b.key { a } else { b }),
            (a, b) => a.or(b),
        }
    }
}

fn in_cleared(cleared: &[(Bytes, Bytes)], key: &[u8]) -> bool {
    cleared
        .iter()
        .any(|(begin, end)| begin.as_ref() <= key && key < end.as_ref())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn engine() -> Arc<MemoryEngine> {
        Arc::new(MemoryEngine::new(64))
    }

    fn commit(txn: &Transaction) {
        let (reads, ops) = txn.take_for_commit().unwrap();
        txn.engine()
            .commit(txn.snapshot_version(), &reads, ops)
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_your_writes() {
        let engine = engine();
        let txn = Transaction::new(engine.clone(), true);
        txn.set(&b"a"[..], &b"1"[..]).unwrap();
        assert_eq!(txn.get(b"a").await.unwrap(), Some(Bytes::from_static(b"1")));

        txn.clear(&b"a"[..]).unwrap();
        assert_eq!(txn.get(b"a").await.unwrap(), None);

        txn.atomic_add(&b"n"[..], &1u64.to_le_bytes()).unwrap();
        txn.atomic_add(&b"n"[..], &1u64.to_le_bytes()).unwrap();
        assert_eq!(
            txn.get(b"n").await.unwrap(),
            Some(Bytes::copy_from_slice(&2u64.to_le_bytes()))
        );
    }

    #[tokio::test]
    async fn test_clear_range_overlay() {
        let engine = engine();
        let setup = Transaction::new(engine.clone(), true);
        setup.set(&b"p1"[..], &b"old"[..]).unwrap();
        setup.set(&b"p2"[..], &b"old"[..]).unwrap();
        commit(&setup);

        let txn = Transaction::new(engine.clone(), true);
        let range = KeyRange {
            begin: Bytes::from_static(b"p"),
            end: Bytes::from_static(b"q"),
        };
        txn.clear_range(&range).unwrap();
        txn.set(&b"p2"[..], &b"new"[..]).unwrap();

        assert_eq!(txn.get(b"p1").await.unwrap(), None);
        assert_eq!(
            txn.get(b"p2").await.unwrap(),
            Some(Bytes::from_static(b"new"))
        );
        let rows = txn.get_range(&range, RangeOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.as_ref(), b"p2");
    }

    #[tokio::test]
    async fn test_get_key_selector() {
        let engine = engine();
        let setup = Transaction::new(engine.clone(), true);
        setup.set(&b"b"[..], &b""[..]).unwrap();
        setup.set(&b"d"[..], &b""[..]).unwrap();
        commit(&setup);

        let txn = Transaction::new(engine.clone(), true);
        let found = txn
            .get_key(KeySelector::first_greater_than(&b"b"[..]))
            .await
            .unwrap();
        assert_eq!(found, Some(Bytes::from_static(b"d")));

        let found = txn
            .get_key(KeySelector::first_greater_or_equal(&b"b"[..]))
            .await
            .unwrap();
        assert_eq!(found, Some(Bytes::from_static(b"b")));

        let found = txn
            .get_key(KeySelector::first_greater_than(&b"zz"[..]))
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_reverse_and_limit() {
        let engine = engine();
        let txn = Transaction::new(engine.clone(), true);
        for k in [b"a", b"b", b"c"] {
            txn.set(&k[..], &b""[..]).unwrap();
        }
        let range = KeyRange {
            begin: Bytes::from_static(b"a"),
            end: Bytes::from_static(b"z"),
        };
        let rows = txn
            .get_range(&range, RangeOptions { limit: Some(2), reverse: true })
            .await
            .unwrap();
        let keys: Vec<&[u8]> = rows.iter().map(|kv| kv.key.as_ref()).collect();
        assert_eq!(keys, vec![&b"c"[..], &b"b"[..]]);
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let engine = engine();
        let txn = Transaction::new(engine, false);
        assert_eq!(
            txn.set(&b"a"[..], &b"1"[..]).unwrap_err(),
            KvError::ReadOnly
        );
    }
}
