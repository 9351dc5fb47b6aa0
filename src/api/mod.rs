// =============================================================================
// Analysis service API
// =============================================================================
//
// `MarketApi` is the seam between the console and the remote analysis
// service. `ApiClient` is the reqwest implementation; tests swap in the
// in-memory fake from `testing`.

pub mod client;
#[cfg(test)]
pub mod testing;

use anyhow::Result;
use async_trait::async_trait;

use crate::symbols::RawSymbolRecord;
use crate::types::{AnalyzeRequest, AnalyzeResponse, Candle, LivePrice};

pub use client::ApiClient;

/// Request/response contract of the analysis service.
///
/// Every method fails with the response body (or a synthesized
/// `"{METHOD} {path} failed with status {code}"`) on a non-2xx status.
#[async_trait]
pub trait MarketApi: Send + Sync {
    /// GET the static bootstrap catalog (`{symbols: [...]}` or a bare array).
    async fn fetch_symbol_catalog(&self, url: &str) -> Result<Vec<RawSymbolRecord>>;

    /// GET /search?q=&limit=
    async fn search_symbols(&self, query: &str, limit: usize) -> Result<Vec<RawSymbolRecord>>;

    /// GET /history?symbol=&timeframe=&limit=
    async fn fetch_history(&self, symbol: &str, timeframe: &str, limit: usize)
        -> Result<Vec<Candle>>;

    /// GET /live?symbol=&timeframe=
    async fn fetch_live(&self, symbol: &str, timeframe: &str) -> Result<LivePrice>;

    /// POST /analyze
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse>;
}
