// =============================================================================
// Symbol Search — local-first suggestions refined by a remote round trip
// =============================================================================
//
// Each keystroke:
//   1. bumps the query generation,
//   2. answers immediately from the local index,
//   3. asks the service for more matches,
//   4. if still the latest query, merges them and re-ranks.
//
// A remote answer for a superseded query is dropped without touching the
// index. A remote failure is notified and the local matches stay.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::api::MarketApi;
use crate::error::{ConsoleError, StreamKind};
use crate::notifications::NotificationSink;
use crate::runtime_config::SearchSettings;
use crate::symbols::index::{ScoredRecord, SymbolIndex};
use crate::types::Severity;

/// How a [`SymbolSearch::suggest`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    /// Query shorter than the minimum length; nothing was searched.
    TooShort,
    /// Remote results were merged and the query re-ranked.
    Merged,
    /// The remote call failed; only local matches are available.
    RemoteFailed,
    /// A newer query started before the remote answer arrived.
    Superseded,
}

/// Suggestions for one query.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestions {
    pub query: String,
    pub local: Vec<ScoredRecord>,
    pub merged: Option<Vec<ScoredRecord>>,
    pub outcome: SearchOutcome,
}

impl Suggestions {
    /// The list to display: merged results when available, else local ones.
    pub fn best(&self) -> &[ScoredRecord] {
        self.merged.as_deref().unwrap_or(&self.local)
    }
}

pub struct SymbolSearch {
    index: Arc<SymbolIndex>,
    api: Arc<dyn MarketApi>,
    notifier: Arc<dyn NotificationSink>,
    settings: SearchSettings,
    generation: AtomicU64,
}

impl SymbolSearch {
    pub fn new(
        index: Arc<SymbolIndex>,
        api: Arc<dyn MarketApi>,
        notifier: Arc<dyn NotificationSink>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            index,
            api,
            notifier,
            settings,
            generation: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> &Arc<SymbolIndex> {
        &self.index
    }

    /// Run the local + remote search for `query`.
    pub async fn suggest(&self, query: &str) -> Suggestions {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query = query.trim().to_string();

        if query.chars().count() < self.settings.min_query_len {
            return Suggestions {
                query,
                local: Vec::new(),
                merged: None,
                outcome: SearchOutcome::TooShort,
            };
        }

        let local = self.index.search(&query, self.settings.local_limit);
        let remote = self
            .api
            .search_symbols(&query, self.settings.remote_limit)
            .await;

        let current = self.generation.load(Ordering::SeqCst);
        if current != generation {
            let stale = ConsoleError::StaleResponseDiscarded {
                stream: StreamKind::Search,
                generation,
                current,
            };
            debug!(query = %query, reason = %stale, "remote search result discarded");
            return Suggestions {
                query,
                local,
                merged: None,
                outcome: SearchOutcome::Superseded,
            };
        }

        match remote {
            Ok(records) => {
                let summary = self.index.merge(records);
                let merged = self.index.search(&query, self.settings.remote_limit);
                debug!(
                    query = %query,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    results = merged.len(),
                    "remote search merged"
                );
                Suggestions {
                    query,
                    local,
                    merged: Some(merged),
                    outcome: SearchOutcome::Merged,
                }
            }
            Err(e) => {
                let err = ConsoleError::RemoteSearchFailed(format!("{e:#}"));
                warn!(query = %query, error = %err, "remote search failed");
                self.notifier
                    .notify(Severity::Error, err.title(), Some(&err.detail()));
                Suggestions {
                    query,
                    local,
                    merged: None,
                    outcome: SearchOutcome::RemoteFailed,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeApi;
    use crate::notifications::NotificationCenter;
    use crate::symbols::RawSymbolRecord;

    struct Fixture {
        api: Arc<FakeApi>,
        notes: Arc<NotificationCenter>,
        search: Arc<SymbolSearch>,
    }

    fn fixture(seed: Vec<RawSymbolRecord>) -> Fixture {
        let api = Arc::new(FakeApi::new());
        let notes = Arc::new(NotificationCenter::new(None));
        let search = Arc::new(SymbolSearch::new(
            Arc::new(SymbolIndex::with_records(seed)),
            api.clone(),
            notes.clone(),
            SearchSettings::default(),
        ));
        Fixture { api, notes, search }
    }

    #[tokio::test]
    async fn short_query_is_not_searched() {
        let fx = fixture(vec![RawSymbolRecord::new("BTCUSDT", "BINANCE")]);
        let s = fx.search.suggest("b").await;
        assert_eq!(s.outcome, SearchOutcome::TooShort);
        assert!(s.best().is_empty());
        assert!(fx.api.calls().is_empty());
    }

    #[tokio::test]
    async fn remote_results_are_merged_and_reranked() {
        let fx = fixture(vec![RawSymbolRecord::new("BTCUSDT", "BINANCE")]);
        fx.api
            .set_search("eth", vec![RawSymbolRecord::new("ETHUSDT", "BINANCE")]);

        let s = fx.search.suggest("eth").await;
        assert_eq!(s.outcome, SearchOutcome::Merged);
        assert_eq!(s.best()[0].record.symbol, "ETHUSDT");
        assert!(fx.search.index().get("ETHUSDT").is_some());
    }

    #[tokio::test]
    async fn remote_failure_keeps_local_results_and_notifies() {
        let fx = fixture(vec![RawSymbolRecord::new("BTCUSDT", "BINANCE")]);
        fx.api.fail_search("btc", "search backend down");

        let s = fx.search.suggest("btc").await;
        assert_eq!(s.outcome, SearchOutcome::RemoteFailed);
        assert_eq!(s.best()[0].record.symbol, "BTCUSDT");

        let notes = fx.notes.active();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].severity, Severity::Error);
        assert_eq!(notes[0].detail.as_deref(), Some("search backend down"));
    }

    #[tokio::test]
    async fn superseded_remote_results_are_discarded() {
        let fx = fixture(Vec::new());
        fx.api
            .set_search("bt", vec![RawSymbolRecord::new("BTOLD", "STALE")]);
        fx.api
            .set_search("btc", vec![RawSymbolRecord::new("BTCUSDT", "BINANCE")]);
        let gate = fx.api.hold_search("bt");

        let first = {
            let search = fx.search.clone();
            tokio::spawn(async move { search.suggest("bt").await })
        };
        while fx.api.count_calls("search:bt") == 0 {
            tokio::task::yield_now().await;
        }

        let second = fx.search.suggest("btc").await;
        assert_eq!(second.outcome, SearchOutcome::Merged);

        gate.send(()).unwrap();
        let first = first.await.unwrap();
        assert_eq!(first.outcome, SearchOutcome::Superseded);
        assert!(fx.search.index().get("BTOLD").is_none());
        assert!(fx.search.index().get("BTCUSDT").is_some());
    }
}
