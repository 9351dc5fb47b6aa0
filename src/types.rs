// =============================================================================
// Shared types used across the Oryon console
// =============================================================================
//
// Wire shapes of the analysis service (`/history`, `/live`, `/analyze`) plus
// the small enums shared by the orchestrator, the projector and the
// notification sink.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Notification severity
// =============================================================================

/// Severity attached to every user-visible notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Market data
// =============================================================================

/// A single OHLC candle returned by `GET /history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in epoch milliseconds.
    #[serde(deserialize_with = "deserialize_timestamp_ms")]
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Latest price snapshot returned by `GET /live`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePrice {
    pub price: f64,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp_ms")]
    pub timestamp: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp_ms")]
    pub received_at: Option<i64>,
}

impl LivePrice {
    /// Bar time of the quote: the candle timestamp if present, otherwise the
    /// time the service received it.
    pub fn observed_at(&self) -> Option<i64> {
        self.timestamp.or(self.received_at)
    }
}

// =============================================================================
// Analysis signals
// =============================================================================

/// Trade direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "LONG", alias = "Long")]
    Long,
    #[serde(alias = "SHORT", alias = "Short")]
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// One human-readable justification attached to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReason {
    pub label: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// A chart annotation primitive. `payload` is kind-specific and opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A trade setup produced by the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub timeframe: String,
    pub direction: Direction,
    pub entry: f64,
    #[serde(alias = "stopLoss")]
    pub stop_loss: f64,
    #[serde(default, alias = "takeProfits")]
    pub take_profits: Vec<f64>,
    /// Reward/risk ratio of the first target.
    #[serde(default)]
    pub rr: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub reasons: Vec<SignalReason>,
    #[serde(default)]
    pub overlays: Vec<Overlay>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
}

/// Body of `POST /analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub symbol: String,
    pub timeframes: Vec<String>,
    pub lookback: u32,
    pub layers: Vec<String>,
}

/// Response of `POST /analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub signals: Vec<Signal>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

// =============================================================================
// Timestamp parsing
// =============================================================================

/// Epoch values below this are taken to be seconds rather than milliseconds.
const SECONDS_CUTOFF: f64 = 100_000_000_000.0;

/// Parse a timestamp the service may send as RFC 3339, naive ISO-8601 (UTC
/// assumed), a bare date, or an epoch number in seconds or milliseconds.
pub fn parse_timestamp_ms(val: &serde_json::Value) -> Result<i64> {
    match val {
        serde_json::Value::Number(n) => {
            let raw = n.as_f64().context("timestamp is not a finite number")?;
            if raw.abs() < SECONDS_CUTOFF {
                Ok((raw * 1000.0) as i64)
            } else {
                Ok(raw as i64)
            }
        }
        serde_json::Value::String(s) => parse_timestamp_str(s),
        _ => anyhow::bail!("timestamp has unexpected JSON type: {val}"),
    }
}

fn parse_timestamp_str(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("failed to parse '{s}' as a timestamp"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("midnight is always a valid time")?;
    Ok(midnight.and_utc().timestamp_millis())
}

fn deserialize_timestamp_ms<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    parse_timestamp_ms(&value).map_err(serde::de::Error::custom)
}

fn deserialize_opt_timestamp_ms<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => parse_timestamp_ms(&v)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candle_accepts_naive_iso_timestamp() {
        let json = r#"{"timestamp":"2024-01-02T03:04:05","open":1,"high":2,"low":0.5,"close":1.5,"volume":10}"#;
        let candle: Candle = serde_json::from_str(json).unwrap();
        assert_eq!(candle.timestamp, 1_704_164_645_000);
        assert_eq!(candle.volume, Some(10.0));
    }

    #[test]
    fn candle_accepts_rfc3339_and_epoch_seconds() {
        let rfc = serde_json::json!("2024-01-02T03:04:05+00:00");
        let secs = serde_json::json!(1_704_164_645);
        let millis = serde_json::json!(1_704_164_645_000_i64);
        assert_eq!(parse_timestamp_ms(&rfc).unwrap(), 1_704_164_645_000);
        assert_eq!(parse_timestamp_ms(&secs).unwrap(), 1_704_164_645_000);
        assert_eq!(parse_timestamp_ms(&millis).unwrap(), 1_704_164_645_000);
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let json = r#"{"timestamp":"yesterday","open":1,"high":1,"low":1,"close":1}"#;
        assert!(serde_json::from_str::<Candle>(json).is_err());
    }

    #[test]
    fn live_price_falls_back_to_received_at() {
        let json = r#"{"price":101.5,"received_at":"2024-01-02T03:04:05.250"}"#;
        let live: LivePrice = serde_json::from_str(json).unwrap();
        assert_eq!(live.timestamp, None);
        assert_eq!(live.observed_at(), Some(1_704_164_645_250));
    }

    #[test]
    fn signal_parses_backend_payload() {
        let json = r#"{
            "id": "sig-1",
            "symbol": "BTCUSDT",
            "timeframe": "1h",
            "direction": "long",
            "entry": 100.0,
            "stop_loss": 95.0,
            "take_profits": [110.0, 120.0],
            "rr": 2.0,
            "score": 0.82,
            "reasons": [{"label": "HTF bias"}, {"label": "Sweep", "detail": "sell-side"}],
            "overlays": [{"kind": "liquidity", "payload": {"level": 94.5}}],
            "created_at": "2024-01-02T03:04:05"
        }"#;
        let sig: Signal = serde_json::from_str(json).unwrap();
        assert_eq!(sig.direction, Direction::Long);
        assert_eq!(sig.take_profits, vec![110.0, 120.0]);
        assert_eq!(sig.reasons[1].detail.as_deref(), Some("sell-side"));
        assert_eq!(sig.overlays[0].kind, "liquidity");
    }

    #[test]
    fn analyze_response_tolerates_missing_fields() {
        let resp: AnalyzeResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.signals.is_empty());
        assert!(resp.generated_at.is_none());
    }

    #[test]
    fn severity_defaults_to_info() {
        assert_eq!(Severity::default(), Severity::Info);
        assert_eq!(serde_json::to_value(Severity::Warning).unwrap(), "warning");
    }
}
