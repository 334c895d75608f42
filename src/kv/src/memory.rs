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

use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound::{Excluded, Included};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{KvError, KvResult};

/// One buffered mutation, replayed in order at commit.
#[derive(Debug, Clone)]
pub(crate) enum WriteOp {
    Set(Bytes, Bytes),
    Clear(Bytes),
    ClearRange(Bytes, Bytes),
    /// Little-endian wrapping add; the operand width defines the cell width.
    Add(Bytes, Vec<u8>),
}

/// A read or write footprint used for conflict detection.
#[derive(Debug, Clone)]
pub(crate) enum Span {
    Point(Bytes),
    Range(Bytes, Bytes),
}

impl Span {
    fn overlaps(&self, other: &Span) -> bool {
        match (self, other) {
            (Span::Point(a), Span::Point(b)) => a == b,
            (Span::Point(p), Span::Range(b, e)) | (Span::Range(b, e), Span::Point(p)) => {
                b <= p && p < e
            }
            (Span::Range(b1, e1), Span::Range(b2, e2)) => b1 < e2 && b2 < e1,
        }
    }
}

/// Multi-version in-memory ordered key-value engine.
///
/// Maps `(key, version)` to a value or tombstone; reads observe the newest
/// entry at or below their snapshot version. It never garbage-collects.
/// Commits are validated optimistically against a bounded log of recently
/// committed write spans.
pub(crate) struct MemoryEngine {
    inner: RwLock<EngineInner>,
    window: usize,
}

struct EngineInner {
    data: BTreeMap<(Bytes, Reverse<u64>), Option<Bytes>>,
    version: u64,
    recent: VecDeque<(u64, Vec<Span>)>,
    /// Snapshots older than this cannot be validated any more and must
    /// conservatively conflict.
    trimmed_below: u64,
}

impl MemoryEngine {
    pub fn new(window: usize) -> Self {
        Self {
            inner: RwLock::new(EngineInner {
                data: BTreeMap::new(),
                version: 0,
                recent: VecDeque::new(),
                trimmed_below: 0,
            }),
            window,
        }
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn get(&self, key: &[u8], version: u64) -> Option<Bytes> {
        self.inner.read().get_at(key, version)
    }

    /// All live key-value pairs in `[begin, end)` at `version`, ascending.
    pub fn scan(&self, begin: &[u8], end: &[u8], version: u64) -> Vec<(Bytes, Bytes)> {
        self.inner.read().scan_at(begin, end, version)
    }

    /// The first live key-value pair in `[begin, end)` at `version`.
    pub fn first(&self, begin: &[u8], end: &[u8], version: u64) -> Option<(Bytes, Bytes)> {
        self.inner.read().first_at(begin, end, version)
    }

    /// Validate the read set against commits newer than `snapshot`, then
    /// apply the write ops at a fresh version.
    pub fn commit(&self, snapshot: u64, reads: &[Span], ops: Vec<WriteOp>) -> KvResult<u64> {
        let mut inner = self.inner.write();
        if snapshot < inner.trimmed_below {
            return Err(KvError::Conflict);
        }
        for (version, spans) in &inner.recent {
            if *version <= snapshot {
                continue;
            }
            for written in spans {
                if reads.iter().any(|read| read.overlaps(written)) {
                    return Err(KvError::Conflict);
                }
            }
        }

        inner.version += 1;
        let version = inner.version;
        let mut written = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                WriteOp::Set(key, value) => {
                    written.push(Span::Point(key.clone()));
                    inner.data.insert((key, Reverse(version)), Some(value));
                }
                WriteOp::Clear(key) => {
                    written.push(Span::Point(key.clone()));
                    inner.data.insert((key, Reverse(version)), None);
                }
                WriteOp::ClearRange(begin, end) => {
                    let live: Vec<Bytes> = inner
                        .scan_at(&begin, &end, version)
                        .into_iter()
                        .map(|(key, _)| key)
                        .collect();
                    for key in live {
                        inner.data.insert((key, Reverse(version)), None);
                    }
                    written.push(Span::Range(begin, end));
                }
                WriteOp::Add(key, delta) => {
                    written.push(Span::Point(key.clone()));
                    let current = inner.get_at(&key, version);
                    let sum = add_le(current.as_deref(), &delta);
                    inner.data.insert((key, Reverse(version)), Some(sum.into()));
                }
            }
        }
        inner.recent.push_back((version, written));
        if inner.recent.len() > self.window {
            if let Some((trimmed, _)) = inner.recent.pop_front() {
                inner.trimmed_below = trimmed;
            }
        }
        Ok(version)
    }
}

impl EngineInner {
    fn get_at(&self, key: &[u8], version: u64) -> Option<Bytes> {
        let key = Bytes::copy_from_slice(key);
        let range = (
            Included((key.clone(), Reverse(version))),
            Included((key, Reverse(0u64))),
        );
        self.data
            .range(range)
            .next()
            .and_then(|(_, value)| value.clone())
    }

    fn scan_at(&self, begin: &[u8], end: &[u8], version: u64) -> Vec<(Bytes, Bytes)> {
        if begin >= end {
            return Vec::new();
        }
        let range = (
            Included((Bytes::copy_from_slice(begin), Reverse(u64::MAX))),
            Excluded((Bytes::copy_from_slice(end), Reverse(u64::MAX))),
        );
        let mut out = Vec::new();
        let mut last_key: Option<&Bytes> = None;
        // Entries of one key are adjacent, newest version first.
        for ((key, Reverse(entry_version)), value) in self.data.range(range) {
            if *entry_version > version {
                continue;
            }
            if last_key != Some(key) {
                last_key = Some(key);
                if let Some(value) = value {
                    out.push((key.clone(), value.clone()));
                }
            }
        }
        out
    }

    fn first_at(&self, begin: &[u8], end: &[u8], version: u64) -> Option<(Bytes, Bytes)> {
        if begin >= end {
            return None;
        }
        let range = (
            Included((Bytes::copy_from_slice(begin), Reverse(u64::MAX))),
            Excluded((Bytes::copy_from_slice(end), Reverse(u64::MAX))),
        );
        let mut last_key: Option<&Bytes> = None;
        for ((key, Reverse(entry_version)), value) in self.data.range(range) {
            if *entry_version > version {
                continue;
            }
            if last_key != Some(key) {
                last_key = Some(key);
                // Tombstoned keys fall through to the next key.
                if let Some(value) = value {
                    return Some((key.clone(), value.clone()));
                }
            }
        }
        None
    }
}

/// Little-endian wrapping add. The operand width defines the result width;
/// the current value is zero-padded or truncated to it first.
pub(crate) fn add_le(current: Option<&[u8]>, delta: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; delta.len()];
    if let Some(current) = current {
        let n = current.len().min(delta.len());
        out[..n].copy_from_slice(&current[..n]);
    }
    let mut carry = 0u16;
    for (byte, add) in out.iter_mut().zip(delta) {
        let sum = *byte as u16 + *add as u16 + carry;
        *byte = sum as u8;
        carry = sum >> 8;
    }
    out
}
