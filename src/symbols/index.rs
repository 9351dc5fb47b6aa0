// =============================================================================
// Symbol Index — in-memory catalog with fuzzy search and a query cache
// =============================================================================
//
// Lifecycle: bootstrap (fail-open) -> merge* / search*.
//
// The catalog, its key positions and the query cache share one RwLock. Every
// merge bumps `epoch` and clears the cache inside the same write section; a
// search that computed its answer under an older epoch does not insert it, so
// a cached answer older than the latest merge is never served.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::MarketApi;
use crate::error::ConsoleError;
use crate::symbols::record::{RawSymbolRecord, SymbolRecord};
use crate::symbols::scorer::string_score;

/// Results at or below this combined score are dropped.
const MIN_SCORE: f64 = 0.25;
/// Weight of the exchange match in the combined score.
const EXCHANGE_WEIGHT: f64 = 0.4;

/// A catalog record with its score for one search call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: SymbolRecord,
    pub score: f64,
}

/// Counts returned by [`SymbolIndex::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Bootstrap catalog document: `{ "symbols": [...] }` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CatalogPayload {
    Wrapped { symbols: Vec<RawSymbolRecord> },
    Bare(Vec<RawSymbolRecord>),
}

impl CatalogPayload {
    pub fn into_records(self) -> Vec<RawSymbolRecord> {
        match self {
            Self::Wrapped { symbols } => symbols,
            Self::Bare(records) => records,
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    query: String,
    limit: usize,
}

#[derive(Default)]
struct Catalog {
    /// Insertion order is the tie-break order for equal scores.
    records: Vec<SymbolRecord>,
    positions: HashMap<String, usize>,
    cache: HashMap<CacheKey, Vec<ScoredRecord>>,
    epoch: u64,
}

/// Owned symbol catalog. Share it behind an `Arc` between the search bar and
/// the console.
#[derive(Default)]
pub struct SymbolIndex {
    inner: RwLock<Catalog>,
}

impl SymbolIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index seeded with `records` (same rules as [`merge`]).
    ///
    /// [`merge`]: SymbolIndex::merge
    pub fn with_records(records: Vec<RawSymbolRecord>) -> Self {
        let index = Self::new();
        index.merge(records);
        index
    }

    /// Load the bootstrap catalog from `url`. Never fails: any error leaves
    /// the index empty so the console keeps working on remote search alone.
    pub async fn bootstrap(api: &dyn MarketApi, url: &str) -> Self {
        match api.fetch_symbol_catalog(url).await {
            Ok(records) => {
                let index = Self::with_records(records);
                info!(url, count = index.len(), "symbol catalog loaded");
                index
            }
            Err(e) => {
                let err = ConsoleError::BootstrapUnavailable(format!("{e:#}"));
                warn!(url, error = %err, "falling back to empty symbol index");
                Self::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a record by exact key (case-insensitive).
    pub fn get(&self, symbol: &str) -> Option<SymbolRecord> {
        let key = symbol.trim().to_uppercase();
        let catalog = self.inner.read();
        catalog
            .positions
            .get(&key)
            .map(|&pos| catalog.records[pos].clone())
    }

    /// Snapshot of every record in insertion order.
    pub fn records(&self) -> Vec<SymbolRecord> {
        self.inner.read().records.clone()
    }

    /// Fuzzy search. Returns at most `limit` records ranked by
    /// `score(symbol) + 0.4 * score(exchange)`, dropping scores `<= 0.25`.
    /// Equal scores keep catalog insertion order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<ScoredRecord> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let key = CacheKey { query, limit };

        let (results, epoch) = {
            let catalog = self.inner.read();
            if let Some(hit) = catalog.cache.get(&key) {
                debug!(query = %key.query, limit, "symbol search cache hit");
                return hit.clone();
            }
            (rank(&catalog.records, &key.query, limit), catalog.epoch)
        };

        let mut catalog = self.inner.write();
        if catalog.epoch == epoch {
            catalog.cache.insert(key, results.clone());
        } else {
            debug!(query = %key.query, "catalog merged during search, result not cached");
        }
        results
    }

    /// Merge incoming records by key: existing records are shallow-merged
    /// (incoming fields win), unknown keys are appended. Always invalidates
    /// the whole query cache.
    pub fn merge(&self, incoming: Vec<RawSymbolRecord>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let mut catalog = self.inner.write();
        let catalog = &mut *catalog;

        for raw in incoming {
            let Some(normalised) = raw.normalise() else {
                debug!(?raw, "skipping symbol record without a key");
                summary.skipped += 1;
                continue;
            };

            match catalog.positions.get(&normalised.symbol) {
                Some(&pos) => {
                    normalised.apply_to(&mut catalog.records[pos]);
                    summary.updated += 1;
                }
                None => {
                    let record = normalised.into_record();
                    catalog
                        .positions
                        .insert(record.symbol.clone(), catalog.records.len());
                    catalog.records.push(record);
                    summary.inserted += 1;
                }
            }
        }

        catalog.cache.clear();
        catalog.epoch += 1;

        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            total = catalog.records.len(),
            epoch = catalog.epoch,
            "symbol catalog merged"
        );
        summary
    }
}

fn rank(records: &[SymbolRecord], query: &str, limit: usize) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = records
        .iter()
        .map(|record| ScoredRecord {
            score: string_score(&record.symbol, query)
                + EXCHANGE_WEIGHT * string_score(&record.exchange, query),
            record: record.clone(),
        })
        .filter(|r| r.score > MIN_SCORE)
        .collect();

    // `sort_by` is stable, which preserves insertion order on ties.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

impl std::fmt::Debug for SymbolIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let catalog = self.inner.read();
        f.debug_struct("SymbolIndex")
            .field("records", &catalog.records.len())
            .field("cached_queries", &catalog.cache.len())
            .field("epoch", &catalog.epoch)
            .finish()
    }
}
