// =============================================================================
// Fake market API — in-memory service for unit tests
// =============================================================================
//
// Responses are configured per key; any call can be held back with a gate
// (`hold_*`) so tests control the order in which responses land.
// =============================================================================

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::api::MarketApi;
use crate::symbols::RawSymbolRecord;
use crate::types::{AnalyzeRequest, AnalyzeResponse, Candle, LivePrice};

#[derive(Default)]
struct FakeState {
    catalog: Option<std::result::Result<Vec<RawSymbolRecord>, String>>,
    search: HashMap<String, std::result::Result<Vec<RawSymbolRecord>, String>>,
    history: HashMap<String, std::result::Result<Vec<Candle>, String>>,
    live: HashMap<String, std::result::Result<LivePrice, String>>,
    analyze: Option<std::result::Result<AnalyzeResponse, String>>,
    gates: HashMap<String, oneshot::Receiver<()>>,
    calls: Vec<String>,
    analyze_requests: Vec<AnalyzeRequest>,
}

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

pub fn candle(timestamp: i64, close: f64) -> Candle {
    Candle {
        timestamp,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: Some(10.0),
    }
}

pub fn live_price(price: f64) -> LivePrice {
    LivePrice {
        price,
        open: None,
        high: None,
        low: None,
        volume: None,
        timestamp: Some(1_700_000_000_000),
        received_at: None,
    }
}

fn pair(symbol: &str, timeframe: &str) -> String {
    format!("{symbol}@{timeframe}")
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_catalog(&self, records: Vec<RawSymbolRecord>) {
        self.state.lock().catalog = Some(Ok(records));
    }

    pub fn fail_catalog(&self, msg: &str) {
        self.state.lock().catalog = Some(Err(msg.to_string()));
    }

    pub fn set_search(&self, query: &str, records: Vec<RawSymbolRecord>) {
        self.state.lock().search.insert(query.to_string(), Ok(records));
    }

    pub fn fail_search(&self, query: &str, msg: &str) {
        self.state
            .lock()
            .search
            .insert(query.to_string(), Err(msg.to_string()));
    }

    pub fn set_history(&self, symbol: &str, timeframe: &str, candles: Vec<Candle>) {
        self.state
            .lock()
            .history
            .insert(pair(symbol, timeframe), Ok(candles));
    }

    pub fn fail_history(&self, symbol: &str, timeframe: &str, msg: &str) {
        self.state
            .lock()
            .history
            .insert(pair(symbol, timeframe), Err(msg.to_string()));
    }

    pub fn set_live(&self, symbol: &str, timeframe: &str, live: LivePrice) {
        self.state.lock().live.insert(pair(symbol, timeframe), Ok(live));
    }

    pub fn fail_live(&self, symbol: &str, timeframe: &str, msg: &str) {
        self.state
            .lock()
            .live
            .insert(pair(symbol, timeframe), Err(msg.to_string()));
    }

    pub fn set_analyze(&self, response: AnalyzeResponse) {
        self.state.lock().analyze = Some(Ok(response));
    }

    pub fn fail_analyze(&self, msg: &str) {
        self.state.lock().analyze = Some(Err(msg.to_string()));
    }

    fn hold(&self, key: String) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().gates.insert(key, rx);
        tx
    }

    /// Hold the next `/search` response for `query` until the sender fires.
    pub fn hold_search(&self, query: &str) -> oneshot::Sender<()> {
        self.hold(format!("search:{query}"))
    }

    /// Hold the next `/history` response for the pair until the sender fires.
    pub fn hold_history(&self, symbol: &str, timeframe: &str) -> oneshot::Sender<()> {
        self.hold(format!("history:{}", pair(symbol, timeframe)))
    }

    /// Hold the next `/analyze` response until the sender fires.
    pub fn hold_analyze(&self) -> oneshot::Sender<()> {
        self.hold("analyze".to_string())
    }

    /// Every call made so far, e.g. `live:BTCUSDT@1h`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn analyze_requests(&self) -> Vec<AnalyzeRequest> {
        self.state.lock().analyze_requests.clone()
    }

    async fn enter(&self, call: String, gate: String) {
        let rx = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.gates.remove(&gate)
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }
}

#[async_trait]
impl MarketApi for FakeApi {
    async fn fetch_symbol_catalog(&self, url: &str) -> Result<Vec<RawSymbolRecord>> {
        self.enter(format!("catalog:{url}"), "catalog".into()).await;
        match self.state.lock().catalog.clone() {
            Some(Ok(records)) => Ok(records),
            Some(Err(msg)) => anyhow::bail!(msg),
            None => anyhow::bail!("GET {url} failed with status 404"),
        }
    }

    async fn search_symbols(&self, query: &str, _limit: usize) -> Result<Vec<RawSymbolRecord>> {
        self.enter(format!("search:{query}"), format!("search:{query}"))
            .await;
        match self.state.lock().search.get(query).cloned() {
            Some(Ok(records)) => Ok(records),
            Some(Err(msg)) => anyhow::bail!(msg),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: &str,
        _limit: usize,
    ) -> Result<Vec<Candle>> {
        let key = pair(symbol, timeframe);
        self.enter(format!("history:{key}"), format!("history:{key}"))
            .await;
        match self.state.lock().history.get(&key).cloned() {
            Some(Ok(candles)) => Ok(candles),
            Some(Err(msg)) => anyhow::bail!(msg),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_live(&self, symbol: &str, timeframe: &str) -> Result<LivePrice> {
        let key = pair(symbol, timeframe);
        self.enter(format!("live:{key}"), format!("live:{key}")).await;
        match self.state.lock().live.get(&key).cloned() {
            Some(Ok(live)) => Ok(live),
            Some(Err(msg)) => anyhow::bail!(msg),
            None => Ok(live_price(100.0)),
        }
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        self.state.lock().analyze_requests.push(request.clone());
        self.enter(format!("analyze:{}", request.symbol), "analyze".into())
            .await;
        match self.state.lock().analyze.clone() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => anyhow::bail!(msg),
            None => Ok(AnalyzeResponse {
                signals: Vec::new(),
                generated_at: None,
            }),
        }
    }
}
