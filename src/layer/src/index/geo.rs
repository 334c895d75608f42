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

//! Geospatial index: records keyed by a geohash prefix of their
//! coordinates.
//!
//! Precision picks the prefix length (1..=12); one geohash cell at
//! precision 4 is roughly 20 km across, at precision 6 roughly 600 m. A
//! lookup fans out over the 9-cell neighbor grid of the query point, so
//! hits near cell borders are not missed. Ordering across cells is not
//! guaranteed and distance filtering is left to the caller.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use stratum_kv::{Element, RangeOptions};

use crate::object::ObjectCore;
use crate::promise::{done, Promise, PromiseSlice, Step};
use crate::query::SelectOptions;
use crate::record::Record;

const BASE32: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Geohash of a coordinate pair at the given precision (in characters).
pub(crate) fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let precision = precision.clamp(1, 12);
    let (mut lat_lo, mut lat_hi) = (-90.0f64, 90.0f64);
    let (mut lon_lo, mut lon_hi) = (-180.0f64, 180.0f64);
    let mut hash = String::with_capacity(precision);
    let mut even = true;
    let mut bit = 0usize;
    let mut ch = 0usize;
    while hash.len() < precision {
        if even {
            let mid = (lon_lo + lon_hi) / 2.0;
            if lon >= mid {
                ch |= 1 << (4 - bit);
                lon_lo = mid;
            } else {
                lon_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if lat >= mid {
                ch |= 1 << (4 - bit);
                lat_lo = mid;
            } else {
                lat_hi = mid;
            }
        }
        even = !even;
        if bit < 4 {
            bit += 1;
        } else {
            hash.push(BASE32[ch] as char);
            bit = 0;
            ch = 0;
        }
    }
    hash
}

/// Center point and half-sizes of a geohash cell.
pub(crate) fn decode_center(hash: &str) -> (f64, f64, f64, f64) {
    let (mut lat_lo, mut lat_hi) = (-90.0f64, 90.0f64);
    let (mut lon_lo, mut lon_hi) = (-180.0f64, 180.0f64);
    let mut even = true;
    for ch in hash.bytes() {
        let index = BASE32.iter().position(|b| *b == ch).unwrap_or(0);
        for bit in (0..5).rev() {
            let set = index >> bit & 1 == 1;
            if even {
                let mid = (lon_lo + lon_hi) / 2.0;
                if set {
                    lon_lo = mid;
                } else {
                    lon_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if set {
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even = !even;
        }
    }
    (
        (lat_lo + lat_hi) / 2.0,
        (lon_lo + lon_hi) / 2.0,
        (lat_hi - lat_lo) / 2.0,
        (lon_hi - lon_lo) / 2.0,
    )
}

/// The query cell plus its eight neighbors, deduplicated. Cells falling off
/// the poles are dropped; longitude wraps.
pub(crate) fn search_cells(lat: f64, lon: f64, precision: usize) -> Vec<String> {
    let center = encode(lat, lon, precision);
    let (lat_c, lon_c, lat_err, lon_err) = decode_center(&center);
    let mut cells = BTreeSet::new();
    cells.insert(center);
    for dy in [-1.0f64, 0.0, 1.0] {
        for dx in [-1.0f64, 0.0, 1.0] {
            let lat_n = lat_c + dy * lat_err * 2.0;
            if !(-90.0..=90.0).contains(&lat_n) {
                continue;
            }
            let mut lon_n = lon_c + dx * lon_err * 2.0;
            if lon_n >= 180.0 {
                lon_n -= 360.0;
            } else if lon_n < -180.0 {
                lon_n += 360.0;
            }
            cells.insert(encode(lat_n, lon_n, precision));
        }
    }
    cells.into_iter().collect()
}

/// Handle for geospatial lookups on one object's geo index.
pub struct IndexGeo<R: Record> {
    pub(crate) core: Arc<ObjectCore>,
    pub(crate) name: String,
    pub(crate) _marker: PhantomData<fn() -> R>,
}

impl<R: Record> IndexGeo<R> {
    /// Records around the given point: one bounded range scan per grid
    /// cell, then a fetch per candidate. Yields at most about nine times
    /// `limit` records, unordered across cells.
    pub fn get_geo(&self, lat: f64, lon: f64, limit: usize) -> PromiseSlice<R> {
        let core = self.core.clone();
        let name = self.name.clone();
        let options = Arc::new(Mutex::new(SelectOptions {
            limit,
            ..SelectOptions::default()
        }));
        let chain_options = options.clone();
        let inner = Promise::new(core.db.clone(), true, move |ctx, out| {
            let core = core.clone();
            let name = name.clone();
            let options = chain_options.clone();
            async move {
                let index = core
                    .indexes
                    .get(&name)
                    .ok_or_else(|| crate::Error::mismatch(format!("index «{name}» is undefined")))?;
                let precision = match &index.kind {
                    super::IndexKind::Geo { precision } => *precision as usize,
                    _ => {
                        return Err(crate::Error::mismatch(format!(
                            "index «{name}» is not geospatial"
                        )))
                    }
                };
                let cells = search_cells(lat, lon, precision);
                let index = index.clone();
                let step: Step = Step::Next(Box::new(move |ctx| {
                    async move {
                        let opts = options.lock().clone();
                        let mut candidates = Vec::new();
                        for cell in cells {
                            let cell_sub = index.sub.sub(&[Element::String(cell)]);
                            let rows = ctx
                                .read_range(
                                    &cell_sub.range(),
                                    RangeOptions {
                                        limit: (opts.limit > 0).then_some(opts.limit),
                                        reverse: opts.reverse,
                                    },
                                )
                                .await?;
                            for row in rows {
                                let primary = cell_sub.unpack(&row.key).map_err(|_| {
                                    crate::Error::corrupt("geo index entry does not unpack")
                                })?;
                                candidates.push(core.sub(&primary));
                            }
                        }
                        let step: Step = Step::Next(Box::new(move |ctx| {
                            async move {
                                let mut records = Vec::new();
                                for sub in candidates {
                                    let need = core.need(&ctx, sub);
                                    match need.fetch(&core).await {
                                        Ok(value) => records.push(value.fill::<R>(&core)?),
                                        Err(crate::Error::NotFound) => continue,
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

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_encode_known_points() {
        // Reference hashes from the canonical geohash algorithm.
        assert_eq!(encode(57.64911, 10.40744, 11), "u4pruydqqvj");
        assert_eq!(encode(42.6, -5.6, 5), "ezs42");
        assert_eq!(encode(0.0, 0.0, 4), "s000");
    }

    #[test]
    fn test_decode_roundtrip() {
        let hash = encode(30.1, 50.101, 8);
        let (lat, lon, lat_err, lon_err) = decode_center(&hash);
        assert!((lat - 30.1).abs() <= lat_err);
        assert!((lon - 50.101).abs() <= lon_err);
    }

    #[test]
    fn test_search_cells() {
        let cells = search_cells(30.1, 50.101, 4);
        assert_eq!(cells.len(), 9);
        assert!(cells.contains(&encode(30.1, 50.101, 4)));

        // At the pole, off-grid cells are dropped rather than wrapped.
        let polar = search_cells(89.99, 0.0, 4);
        assert!(polar.len() < 9);
    }
}
