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

//! Full-text index: one entry per word of the source string fields.
//!
//! Words are split on whitespace, commas and dots, lower-cased, and run
//! through a pluggable normalizer. A query matches a record when every
//! query word prefixes one of the record's indexed words; with N query
//! words a record needs hits under all N of them.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use stratum_kv::{tuple, Element, KeyRange, RangeOptions};

use crate::error::Error;
use crate::object::ObjectCore;
use crate::promise::{done, Promise, PromiseSlice, Step};
use crate::query::SelectOptions;
use crate::record::Record;

/// Hits fetched per word before the conjunction count; single-word queries
/// use the caller's limit directly.
const MULTI_WORD_SCAN_LIMIT: usize = 1000;

/// Split a string into normalized index tokens.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == '.')
        .filter(|word| !word.is_empty() && *word != "!")
        .map(normalize)
        .collect()
}

fn normalize(word: &str) -> String {
    word.to_lowercase()
}

/// Handle for full-text lookups on one object's search index.
pub struct IndexSearch<R: Record> {
    pub(crate) core: Arc<ObjectCore>,
    pub(crate) name: String,
    pub(crate) _marker: PhantomData<fn() -> R>,
}

impl<R: Record> IndexSearch<R> {
    /// Records whose indexed words cover every word of the query.
    pub fn search(&self, query: &str) -> PromiseSlice<R> {
        let core = self.core.clone();
        let name = self.name.clone();
        let words = tokenize(query);
        let options = Arc::new(Mutex::new(SelectOptions::default()));
        let chain_options = options.clone();
        let inner = Promise::new(core.db.clone(), true, move |_ctx, out| {
            let core = core.clone();
            let name = name.clone();
            let words = words.clone();
            let options = chain_options.clone();
            async move {
                if words.is_empty() {
                    return Err(Error::mismatch("no words found in the search query"));
                }
                let index = core
                    .indexes
                    .get(&name)
                    .ok_or_else(|| Error::mismatch(format!("index «{name}» is undefined")))?
                    .clone();

                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let opts = options.lock().clone();
                        let per_word = if words.len() == 1 && opts.limit > 0 {
                            opts.limit
                        } else {
                            MULTI_WORD_SCAN_LIMIT
                        };

                        // Hit counting: a primary qualifies once it was
                        // seen under every query word.
                        let mut hits: HashMap<Vec<u8>, (usize, Vec<Element>)> = HashMap::new();
                        let mut candidates = Vec::new();
                        for word in &words {
                            let range = word_prefix_range(&index.sub, word);
                            let rows = ctx
                                .read_range(
                                    &range,
                                    RangeOptions {
                                        limit: Some(per_word),
                                        reverse: opts.reverse,
                                    },
                                )
                                .await?;
                            for row in rows {
                                let full = index.sub.unpack(&row.key).map_err(|_| {
                                    Error::corrupt("search index entry does not unpack")
                                })?;
                                if full.len() < 2 {
                                    continue;
                                }
                                let primary = full[1..].to_vec();
                                let packed = tuple::pack(&primary);
                                let entry = hits.entry(packed).or_insert((0, primary));
                                entry.0 += 1;
                                if entry.0 == words.len() {
                                    candidates.push(core.sub(&entry.1));
                                }
                            }
                        }

                        let step: Step = Step::Next(Box::new(move |ctx| {
                            async move {
                                let mut records = Vec::new();
                                for sub in candidates {
                                    let need = core.need(&ctx, sub);
                                    match need.fetch(&core).await {
                                        Ok(value) => records.push(value.fill::<R>(&core)?),
                                        Err(Error::NotFound) => continue,
                                        Err(err) => return Err(err),
                                    }
                                }
                                Ok(done(&out, records))
                            }
                            .boxed()
                        }));
                        Ok(step)
                    }
                    .boxed()
                }));
                Ok(step)
            }
            .boxed()
        });
        PromiseSlice::new(inner, options)
    }
}

/// The key range of every token starting with `word`: the packed token key
/// minus its terminator, extended by `0x00` and `0xFF`.
fn word_prefix_range(sub: &stratum_kv::Subspace, word: &str) -> KeyRange {
    let packed = sub.pack(&[Element::from(word)]);
    let stem = &packed[..packed.len() - 1];
    let mut begin = Vec::with_capacity(stem.len() + 1);
    begin.extend_from_slice(stem);
    begin.push(0x00);
    let mut end = Vec::with_capacity(stem.len() + 1);
    end.extend_from_slice(stem);
    end.push(0xFF);
    KeyRange { begin: begin.into(), end: end.into() }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, wide world."), vec!["hello", "wide", "world"]);
        assert_eq!(tokenize("a.b,c"), vec!["a", "b", "c"]);
        assert_eq!(tokenize("  ,, .."), Vec::<String>::new());
        assert_eq!(tokenize("MiXeD CaSe"), vec!["mixed", "case"]);
    }
}
