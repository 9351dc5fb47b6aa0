// =============================================================================
// Overlay Projector — chart-ready views of the current signal set
// =============================================================================
//
// Pure functions, recomputed whenever the signal set changes:
//   - overlays_by_kind: overlay primitives grouped per kind, tagged with the
//     originating signal id and timeframe
//   - trade_levels: entry / stop / TP1..TPn price lines with stable ids
//   - markers: bar markers for the enabled liquidity / order-block layers
//   - live_bar: the in-progress bar implied by the latest live quote
// =============================================================================

use serde::Serialize;

use crate::runtime_config::LayerToggle;
use crate::types::{parse_timestamp_ms, LivePrice, Signal};

pub const ENTRY_COLOR: &str = "rgba(56,189,248,0.6)";
pub const STOP_COLOR: &str = "rgba(248,113,113,0.7)";
pub const TARGET_COLOR: &str = "rgba(74,222,128,0.7)";
const LIQUIDITY_MARKER_COLOR: &str = "#38bdf8";
const ORDER_BLOCK_MARKER_COLOR: &str = "#a855f7";

pub const LIQUIDITY_KIND: &str = "liquidity";
pub const ORDER_BLOCK_KIND: &str = "order_block";

// ---------------------------------------------------------------------------
// Overlay groups
// ---------------------------------------------------------------------------

/// One overlay payload tagged with the signal it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedOverlay {
    pub signal_id: String,
    pub timeframe: String,
    pub payload: serde_json::Value,
}

/// All overlays of one kind, in signal order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayGroup {
    pub kind: String,
    pub items: Vec<TaggedOverlay>,
}

/// Group every overlay of every signal by kind. Groups appear in the order
/// their kind is first encountered.
pub fn overlays_by_kind(signals: &[Signal]) -> Vec<OverlayGroup> {
    let mut groups: Vec<OverlayGroup> = Vec::new();
    for signal in signals {
        for overlay in &signal.overlays {
            let item = TaggedOverlay {
                signal_id: signal.id.clone(),
                timeframe: signal.timeframe.clone(),
                payload: overlay.payload.clone(),
            };
            match groups.iter_mut().find(|g| g.kind == overlay.kind) {
                Some(group) => group.items.push(item),
                None => groups.push(OverlayGroup {
                    kind: overlay.kind.clone(),
                    items: vec![item],
                }),
            }
        }
    }
    groups
}

/// Find the group for `kind`.
pub fn group<'a>(groups: &'a [OverlayGroup], kind: &str) -> Option<&'a OverlayGroup> {
    groups.iter().find(|g| g.kind == kind)
}

// ---------------------------------------------------------------------------
// Trade levels
// ---------------------------------------------------------------------------

/// A horizontal price line derived from a signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeLevel {
    /// `"{signal_id}-{label}"`, stable across recomputation.
    pub id: String,
    pub signal_id: String,
    pub label: String,
    pub price: f64,
    pub color: &'static str,
}

/// Entry, stop and one line per take-profit for every signal.
pub fn trade_levels(signals: &[Signal]) -> Vec<TradeLevel> {
    let mut levels = Vec::new();
    for signal in signals {
        let mut push = |label: String, price: f64, color: &'static str| {
            levels.push(TradeLevel {
                id: format!("{}-{}", signal.id, label),
                signal_id: signal.id.clone(),
                label,
                price,
                color,
            });
        };

        push("Entry".to_string(), signal.entry, ENTRY_COLOR);
        push("Stop".to_string(), signal.stop_loss, STOP_COLOR);
        for (i, &price) in signal.take_profits.iter().enumerate() {
            push(format!("TP{}", i + 1), price, TARGET_COLOR);
        }
    }
    levels
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerPosition {
    AboveBar,
    BelowBar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerShape {
    ArrowUp,
    ArrowDown,
}

/// A bar annotation for the chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartMarker {
    /// Bar time in epoch seconds.
    pub time: i64,
    pub position: MarkerPosition,
    pub shape: MarkerShape,
    pub color: &'static str,
    pub text: String,
}

fn layer_enabled(layers: &[LayerToggle], key: &str) -> bool {
    layers.iter().any(|l| l.key == key && l.enabled)
}

/// Render a payload field for display: strings unquoted, missing as empty.
fn field_text(payload: &serde_json::Value, field: &str) -> Option<String> {
    match payload.get(field)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// First parseable timestamp among `fields`, in epoch seconds.
fn payload_time(payload: &serde_json::Value, fields: &[&str], now_ms: i64) -> i64 {
    fields
        .iter()
        .filter_map(|f| payload.get(*f))
        .find_map(|v| parse_timestamp_ms(v).ok())
        .unwrap_or(now_ms)
        / 1000
}

/// Markers for the liquidity and order-block layers that are switched on.
/// Overlays without a usable time are pinned to `now_ms`.
pub fn markers(groups: &[OverlayGroup], layers: &[LayerToggle], now_ms: i64) -> Vec<ChartMarker> {
    let mut out = Vec::new();

    if layer_enabled(layers, LIQUIDITY_KIND) {
        if let Some(g) = group(groups, LIQUIDITY_KIND) {
            for item in &g.items {
                let p = &item.payload;
                out.push(ChartMarker {
                    time: payload_time(p, &["start", "timestamp"], now_ms),
                    position: MarkerPosition::AboveBar,
                    shape: MarkerShape::ArrowDown,
                    color: LIQUIDITY_MARKER_COLOR,
                    text: format!(
                        "{} {}",
                        field_text(p, "kind").unwrap_or_else(|| "LQ".to_string()),
                        field_text(p, "level").unwrap_or_default()
                    ),
                });
            }
        }
    }

    if layer_enabled(layers, ORDER_BLOCK_KIND) {
        if let Some(g) = group(groups, ORDER_BLOCK_KIND) {
            for item in &g.items {
                let p = &item.payload;
                let bullish = field_text(p, "direction").as_deref() == Some("long");
                out.push(ChartMarker {
                    time: payload_time(p, &["timestamp"], now_ms),
                    position: if bullish {
                        MarkerPosition::BelowBar
                    } else {
                        MarkerPosition::AboveBar
                    },
                    shape: if bullish {
                        MarkerShape::ArrowUp
                    } else {
                        MarkerShape::ArrowDown
                    },
                    color: ORDER_BLOCK_MARKER_COLOR,
                    text: if bullish { "Bull OB" } else { "Bear OB" }.to_string(),
                });
            }
        }
    }

    out
}

/// Short description of an overlay for lists and tooltips.
pub fn overlay_label(kind: &str, payload: &serde_json::Value) -> String {
    match kind {
        LIQUIDITY_KIND => format!(
            "{} @ {}",
            field_text(payload, "kind").unwrap_or_else(|| "Liquidity".to_string()),
            field_text(payload, "level").unwrap_or_default()
        ),
        ORDER_BLOCK_KIND => format!(
            "{} block",
            field_text(payload, "direction").unwrap_or_else(|| "OB".to_string())
        ),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Live bar
// ---------------------------------------------------------------------------

/// The in-progress bar implied by a live quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveBar {
    /// Bar time in epoch seconds.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Missing open/high/low fall back to the quote price; a quote without any
/// timestamp is placed at `now_ms`.
pub fn live_bar(live: &LivePrice, now_ms: i64) -> LiveBar {
    LiveBar {
        time: live.observed_at().unwrap_or(now_ms) / 1000,
        open: live.open.unwrap_or(live.price),
        high: live.high.unwrap_or(live.price),
        low: live.low.unwrap_or(live.price),
        close: live.price,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Overlay};
    use serde_json::json;

    fn signal(id: &str, timeframe: &str, overlays: Vec<Overlay>) -> Signal {
        Signal {
            id: id.to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: timeframe.to_string(),
            direction: Direction::Long,
            entry: 100.0,
            stop_loss: 95.0,
            take_profits: vec![110.0, 120.0],
            rr: 2.0,
            score: 0.8,
            reasons: Vec::new(),
            overlays,
            created_at: None,
        }
    }

    fn overlay(kind: &str, payload: serde_json::Value) -> Overlay {
        Overlay {
            kind: kind.to_string(),
            payload,
        }
    }

    fn layers(keys: &[&str]) -> Vec<LayerToggle> {
        keys.iter().map(|k| LayerToggle::new(k, k, true)).collect()
    }

    #[test]
    fn trade_levels_for_one_signal() {
        let levels = trade_levels(&[signal("s1", "1h", Vec::new())]);
        let labels: Vec<&str> = levels.iter().map(|l| l.label.as_str()).collect();
        let prices: Vec<f64> = levels.iter().map(|l| l.price).collect();
        assert_eq!(labels, vec!["Entry", "Stop", "TP1", "TP2"]);
        assert_eq!(prices, vec![100.0, 95.0, 110.0, 120.0]);
        assert_eq!(levels[0].id, "s1-Entry");
        assert_eq!(levels[3].id, "s1-TP2");
        assert_eq!(levels[1].color, STOP_COLOR);
        assert_eq!(levels[2].color, TARGET_COLOR);
    }

    #[test]
    fn trade_levels_without_targets() {
        let mut s = signal("s2", "4h", Vec::new());
        s.take_profits.clear();
        assert_eq!(trade_levels(&[s]).len(), 2);
        assert!(trade_levels(&[]).is_empty());
    }

    #[test]
    fn overlays_grouped_by_kind_in_encounter_order() {
        let signals = vec![
            signal(
                "a",
                "1h",
                vec![
                    overlay("liquidity", json!({"level": 94.5})),
                    overlay("order_block", json!({"direction": "long"})),
                ],
            ),
            signal("b", "15m", vec![overlay("liquidity", json!({"level": 99}))]),
        ];
        let groups = overlays_by_kind(&signals);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].kind, "liquidity");
        assert_eq!(groups[0].items.len(), 2);
        assert_eq!(groups[0].items[1].signal_id, "b");
        assert_eq!(groups[0].items[1].timeframe, "15m");
        assert_eq!(group(&groups, "order_block").unwrap().items[0].signal_id, "a");
        assert!(group(&groups, "fvg").is_none());
    }

    #[test]
    fn markers_follow_layer_toggles() {
        let signals = vec![signal(
            "a",
            "1h",
            vec![
                overlay(
                    "liquidity",
                    json!({"kind": "EQH", "level": 101.5, "start": "2024-01-02T03:04:05"}),
                ),
                overlay("order_block", json!({"direction": "long", "timestamp": 1_704_164_645})),
            ],
        )];
        let groups = overlays_by_kind(&signals);

        let all = markers(&groups, &layers(&["liquidity", "order_block"]), 0);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].text, "EQH 101.5");
        assert_eq!(all[0].time, 1_704_164_645);
        assert_eq!(all[1].text, "Bull OB");
        assert_eq!(all[1].position, MarkerPosition::BelowBar);
        assert_eq!(all[1].shape, MarkerShape::ArrowUp);

        let only_ob = markers(&groups, &layers(&["order_block"]), 0);
        assert_eq!(only_ob.len(), 1);

        let mut off = layers(&["liquidity", "order_block"]);
        off.iter_mut().for_each(|l| l.enabled = false);
        assert!(markers(&groups, &off, 0).is_empty());
    }

    #[test]
    fn marker_without_time_uses_now() {
        let groups = overlays_by_kind(&[signal("a", "1h", vec![overlay("liquidity", json!({}))])]);
        let m = markers(&groups, &layers(&["liquidity"]), 5_000);
        assert_eq!(m[0].time, 5);
        assert_eq!(m[0].text, "LQ ");
    }

    #[test]
    fn overlay_labels() {
        assert_eq!(
            overlay_label("liquidity", &json!({"kind": "sell-side", "level": 94})),
            "sell-side @ 94"
        );
        assert_eq!(overlay_label("order_block", &json!({})), "OB block");
        assert_eq!(overlay_label("fvg", &json!({})), "fvg");
    }

    #[test]
    fn live_bar_defaults_to_price() {
        let live = LivePrice {
            price: 101.0,
            open: Some(100.0),
            high: None,
            low: None,
            volume: None,
            timestamp: None,
            received_at: Some(1_700_000_000_500),
        };
        let bar = live_bar(&live, 0);
        assert_eq!(bar.time, 1_700_000_000);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 101.0);
        assert_eq!(bar.low, 101.0);
        assert_eq!(bar.close, 101.0);
    }
}
