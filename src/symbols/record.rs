use serde::{Deserialize, Serialize};

/// Exchange assigned to records that arrive without one.
pub const DEFAULT_EXCHANGE: &str = "LOCAL";
/// Asset type assigned to records that arrive without one.
pub const DEFAULT_ASSET_TYPE: &str = "unknown";

/// A tradable instrument in the local catalog. `symbol` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub symbol: String,
    pub exchange: String,
    pub asset_type: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub quote: Option<String>,
}

/// Symbol record as sent by the bootstrap catalog or `GET /search`.
///
/// Sources disagree on field names, so every alias is captured separately and
/// resolved by [`RawSymbolRecord::normalise`]: `ticker` for `symbol`, `venue`
/// for `exchange`, `type` / `assetType` for `asset_type`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSymbolRecord {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default, rename = "assetType")]
    pub asset_type_camel: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub quote: Option<String>,
}

/// Incoming record after alias resolution. `None` means "not provided".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalisedRecord {
    pub symbol: String,
    pub exchange: Option<String>,
    pub asset_type: Option<String>,
    pub base: Option<String>,
    pub quote: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl RawSymbolRecord {
    /// Convenience constructor used by tests and the console.
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            exchange: Some(exchange.into()),
            ..Self::default()
        }
    }

    /// Resolve aliases. Returns `None` when neither `symbol` nor `ticker`
    /// carries a usable key.
    pub fn normalise(&self) -> Option<NormalisedRecord> {
        let symbol = non_empty(&self.symbol)
            .or_else(|| non_empty(&self.ticker))?
            .to_uppercase();

        Some(NormalisedRecord {
            symbol,
            exchange: non_empty(&self.exchange).or_else(|| non_empty(&self.venue)),
            asset_type: non_empty(&self.asset_type)
                .or_else(|| non_empty(&self.asset_type_camel))
                .or_else(|| non_empty(&self.kind)),
            base: non_empty(&self.base),
            quote: non_empty(&self.quote),
        })
    }
}

impl NormalisedRecord {
    /// Build a fresh catalog record, filling defaults for missing fields.
    pub fn into_record(self) -> SymbolRecord {
        SymbolRecord {
            symbol: self.symbol,
            exchange: self.exchange.unwrap_or_else(|| DEFAULT_EXCHANGE.to_string()),
            asset_type: self
                .asset_type
                .unwrap_or_else(|| DEFAULT_ASSET_TYPE.to_string()),
            base: self.base,
            quote: self.quote,
        }
    }

    /// Shallow merge onto an existing record: provided fields win, missing
    /// fields keep the stored value.
    pub fn apply_to(self, existing: &mut SymbolRecord) {
        if let Some(exchange) = self.exchange {
            existing.exchange = exchange;
        }
        if let Some(asset_type) = self.asset_type {
            existing.asset_type = asset_type;
        }
        if self.base.is_some() {
            existing.base = self.base;
        }
        if self.quote.is_some() {
            existing.quote = self.quote;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_resolved() {
        let raw: RawSymbolRecord = serde_json::from_str(
            r#"{"ticker":"eurusd","venue":"FX","type":"forex","base":"EUR","quote":"USD"}"#,
        )
        .unwrap();
        let rec = raw.normalise().unwrap().into_record();
        assert_eq!(rec.symbol, "EURUSD");
        assert_eq!(rec.exchange, "FX");
        assert_eq!(rec.asset_type, "forex");
        assert_eq!(rec.base.as_deref(), Some("EUR"));
    }

    #[test]
    fn canonical_names_take_precedence_over_aliases() {
        let raw: RawSymbolRecord = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","ticker":"XBT","exchange":"BINANCE","venue":"OTHER","asset_type":"crypto","type":"spot"}"#,
        )
        .unwrap();
        let rec = raw.normalise().unwrap().into_record();
        assert_eq!(rec.symbol, "BTCUSDT");
        assert_eq!(rec.exchange, "BINANCE");
        assert_eq!(rec.asset_type, "crypto");
    }

    #[test]
    fn missing_fields_get_defaults() {
        let rec = RawSymbolRecord {
            symbol: Some("  spx ".into()),
            ..RawSymbolRecord::default()
        }
        .normalise()
        .unwrap()
        .into_record();
        assert_eq!(rec.symbol, "SPX");
        assert_eq!(rec.exchange, DEFAULT_EXCHANGE);
        assert_eq!(rec.asset_type, DEFAULT_ASSET_TYPE);
        assert!(rec.base.is_none());
    }

    #[test]
    fn record_without_key_is_rejected() {
        let raw: RawSymbolRecord = serde_json::from_str(r#"{"exchange":"FX","symbol":"  "}"#).unwrap();
        assert!(raw.normalise().is_none());
    }

    #[test]
    fn apply_keeps_absent_fields() {
        let mut existing = RawSymbolRecord {
            symbol: Some("BTCUSDT".into()),
            exchange: Some("BINANCE".into()),
            asset_type: Some("crypto".into()),
            base: Some("BTC".into()),
            quote: Some("USDT".into()),
            ..RawSymbolRecord::default()
        }
        .normalise()
        .unwrap()
        .into_record();

        RawSymbolRecord::new("BTCUSDT", "NEW")
            .normalise()
            .unwrap()
            .apply_to(&mut existing);

        assert_eq!(existing.exchange, "NEW");
        assert_eq!(existing.asset_type, "crypto");
        assert_eq!(existing.base.as_deref(), Some("BTC"));
        assert_eq!(existing.quote.as_deref(), Some("USDT"));
    }
}
