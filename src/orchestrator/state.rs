// =============================================================================
// Orchestrator state — what the console currently shows
// =============================================================================
//
// Each data stream (history, live, analyze) moves through
// Idle → Loading → Settled | Failed. The last good value of a stream stays in
// place whatever its phase; a failure only changes the phase.
// =============================================================================

use serde::Serialize;

use crate::runtime_config::LayerToggle;
use crate::symbols::SymbolRecord;
use crate::types::{Candle, LivePrice, Signal};

/// Lifecycle of one data stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "error", rename_all = "snake_case")]
pub enum StreamPhase {
    #[default]
    Idle,
    Loading,
    Settled,
    Failed(String),
}

impl std::fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Settled => write!(f, "settled"),
            Self::Failed(e) => write!(f, "failed ({e})"),
        }
    }
}

/// What happened to a dispatched history load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Applied {
    /// The response was current and is now displayed.
    Applied,
    /// A newer request superseded this one; the response was dropped.
    Discarded,
    /// The request failed; prior data stays displayed.
    Failed,
}

/// Result of [`super::DataOrchestrator::analyze`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnalyzeOutcome {
    /// No symbol, no active timeframe, or an analysis already in flight.
    Disabled,
    Completed { signals: usize },
    Failed,
    /// The selection changed while the request was in flight.
    Superseded,
}

/// Mutable console state guarded by the orchestrator's lock.
#[derive(Debug, Clone)]
pub(crate) struct ConsoleState {
    pub selected: Option<SymbolRecord>,
    pub timeframes: Vec<String>,
    pub active_timeframe: String,
    pub lookback: u32,
    pub layers: Vec<LayerToggle>,

    pub candles: Vec<Candle>,
    pub live: Option<LivePrice>,
    pub signals: Vec<Signal>,
    pub last_run: Option<String>,

    pub history_phase: StreamPhase,
    pub live_phase: StreamPhase,
    pub analyze_phase: StreamPhase,
}

impl ConsoleState {
    /// Keep the active timeframe when it is still listed, otherwise fall back
    /// to the first listed one. Returns `true` if it changed.
    pub fn reconcile_active(&mut self) -> bool {
        if self.timeframes.is_empty() || self.timeframes.contains(&self.active_timeframe) {
            return false;
        }
        self.active_timeframe = self.timeframes[0].clone();
        true
    }

    pub fn enabled_layers(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|l| l.enabled)
            .map(|l| l.key.clone())
            .collect()
    }
}

/// Serializable view of the whole console state.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorSnapshot {
    pub state_version: u64,
    pub selected: Option<SymbolRecord>,
    pub timeframes: Vec<String>,
    pub active_timeframe: String,
    pub lookback: u32,
    pub layers: Vec<LayerToggle>,
    pub candles: Vec<Candle>,
    pub live: Option<LivePrice>,
    pub signals: Vec<Signal>,
    pub last_run: Option<String>,
    pub history: StreamPhase,
    pub live_feed: StreamPhase,
    pub analysis: StreamPhase,
    pub analyzing: bool,
    pub polling: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(timeframes: &[&str], active: &str) -> ConsoleState {
        ConsoleState {
            selected: None,
            timeframes: timeframes.iter().map(|s| s.to_string()).collect(),
            active_timeframe: active.to_string(),
            lookback: 600,
            layers: vec![
                LayerToggle::new("order_block", "Order Blocks", true),
                LayerToggle::new("fvg", "FVG", false),
            ],
            candles: Vec::new(),
            live: None,
            signals: Vec::new(),
            last_run: None,
            history_phase: StreamPhase::Idle,
            live_phase: StreamPhase::Idle,
            analyze_phase: StreamPhase::Idle,
        }
    }

    #[test]
    fn active_timeframe_kept_when_listed() {
        let mut s = state(&["4h", "1h"], "1h");
        assert!(!s.reconcile_active());
        assert_eq!(s.active_timeframe, "1h");
    }

    #[test]
    fn active_timeframe_falls_back_to_first() {
        let mut s = state(&["4h", "15m"], "1h");
        assert!(s.reconcile_active());
        assert_eq!(s.active_timeframe, "4h");
    }

    #[test]
    fn empty_list_keeps_active() {
        let mut s = state(&[], "1h");
        assert!(!s.reconcile_active());
        assert_eq!(s.active_timeframe, "1h");
    }

    #[test]
    fn only_enabled_layers_are_sent() {
        assert_eq!(state(&[], "1h").enabled_layers(), vec!["order_block"]);
    }

    #[test]
    fn phase_serialises_with_error() {
        let json = serde_json::to_value(StreamPhase::Failed("502".into())).unwrap();
        assert_eq!(json["phase"], "failed");
        assert_eq!(json["error"], "502");
        assert_eq!(StreamPhase::Loading.to_string(), "loading");
    }
}
