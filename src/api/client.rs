// =============================================================================
// Analysis Service REST Client
// =============================================================================
//
// Thin JSON-over-HTTP client for the four analysis endpoints plus the static
// symbol catalog. Empty query parameters are omitted. Non-2xx responses are
// turned into errors carrying the response body, or a synthesized message
// when the body is empty.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::api::MarketApi;
use crate::symbols::index::CatalogPayload;
use crate::symbols::RawSymbolRecord;
use crate::types::{AnalyzeRequest, AnalyzeResponse, Candle, LivePrice};

/// REST client bound to one analysis service base URL.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client for `base_url` (e.g. `http://127.0.0.1:8000/api`).
    /// A trailing slash is ignored.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url).with_context(|| format!("invalid API base URL '{base_url}'"))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "ApiClient initialised");
        Ok(Self { base_url, client })
    }

    #[cfg(test)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -------------------------------------------------------------------------
    // URL helpers
    // -------------------------------------------------------------------------

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Resolve a catalog URL: absolute URLs are used as-is, relative ones are
    /// joined against the base URL's origin.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        let base = Url::parse(&self.base_url)
            .with_context(|| format!("invalid API base URL '{}'", self.base_url))?;
        base.join(url)
            .with_context(|| format!("failed to resolve '{url}' against {}", self.base_url))
    }

    // -------------------------------------------------------------------------
    // Request helpers
    // -------------------------------------------------------------------------

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query: Vec<(&str, &str)> = params
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (*k, v.as_str()))
            .collect();

        let resp = self
            .client
            .get(self.endpoint(path))
            .query(&query)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        Self::read_json(resp, Method::GET, path).await
    }

    async fn read_json<T: DeserializeOwned>(
        resp: reqwest::Response,
        method: Method,
        path: &str,
    ) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(error_text(&method, path, status.as_u16(), &body));
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("failed to parse {method} {path} response"))
    }
}

/// Error text for a failed call: the body when there is one, otherwise a
/// synthesized status line.
fn error_text(method: &Method, path: &str, status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("{method} {path} failed with status {status}")
    } else {
        body.to_string()
    }
}

#[async_trait]
impl MarketApi for ApiClient {
    #[instrument(skip(self), name = "api::fetch_symbol_catalog")]
    async fn fetch_symbol_catalog(&self, url: &str) -> Result<Vec<RawSymbolRecord>> {
        let resolved = self.resolve(url)?;
        let resp = self
            .client
            .get(resolved.clone())
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await
            .with_context(|| format!("GET {resolved} request failed"))?;

        let payload: CatalogPayload = Self::read_json(resp, Method::GET, resolved.path()).await?;
        let records = payload.into_records();
        debug!(count = records.len(), "symbol catalog fetched");
        Ok(records)
    }

    #[instrument(skip(self), name = "api::search_symbols")]
    async fn search_symbols(&self, query: &str, limit: usize) -> Result<Vec<RawSymbolRecord>> {
        let records: Vec<RawSymbolRecord> = self
            .get_json("/search", &[("q", query.to_string()), ("limit", limit.to_string())])
            .await?;
        debug!(query, count = records.len(), "remote symbol search");
        Ok(records)
    }

    #[instrument(skip(self), name = "api::fetch_history")]
    async fn fetch_history(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let candles: Vec<Candle> = self
            .get_json(
                "/history",
                &[
                    ("symbol", symbol.to_string()),
                    ("timeframe", timeframe.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        debug!(symbol, timeframe, count = candles.len(), "history fetched");
        Ok(candles)
    }

    #[instrument(skip(self), name = "api::fetch_live")]
    async fn fetch_live(&self, symbol: &str, timeframe: &str) -> Result<LivePrice> {
        let live: LivePrice = self
            .get_json(
                "/live",
                &[
                    ("symbol", symbol.to_string()),
                    ("timeframe", timeframe.to_string()),
                ],
            )
            .await?;
        debug!(symbol, timeframe, price = live.price, "live price fetched");
        Ok(live)
    }

    #[instrument(skip(self, request), fields(symbol = %request.symbol), name = "api::analyze")]
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        let resp = self
            .client
            .post(self.endpoint("/analyze"))
            .json(request)
            .send()
            .await
            .context("POST /analyze request failed")?;

        let body: AnalyzeResponse = Self::read_json(resp, Method::POST, "/analyze").await?;
        debug!(count = body.signals.len(), "analysis received");
        Ok(body)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new("http://127.0.0.1:8000/api/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(client().base_url(), "http://127.0.0.1:8000/api");
        assert_eq!(client().endpoint("/live"), "http://127.0.0.1:8000/api/live");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(ApiClient::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn relative_catalog_url_uses_origin() {
        let url = client().resolve("/symbols-demo.json").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/symbols-demo.json");
    }

    #[test]
    fn absolute_catalog_url_is_kept() {
        let url = client().resolve("https://cdn.example.com/symbols.json").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/symbols.json");
    }

    #[test]
    fn error_text_prefers_body() {
        assert_eq!(
            error_text(&Method::GET, "/history", 404, "No recent candle available"),
            "No recent candle available"
        );
        assert_eq!(
            error_text(&Method::POST, "/analyze", 500, "  "),
            "POST /analyze failed with status 500"
        );
    }
}
