// =============================================================================
// Console error taxonomy
// =============================================================================
//
// Transport code returns `anyhow::Result`; the stream owners translate those
// failures into one of these variants before logging and notifying.
//
//   BootstrapUnavailable    : logged only, index starts empty
//   RemoteSearchFailed      : notified, local matches stay visible
//   HistoryLoadFailed       : notified, previous candles stay visible
//   LiveFeedFailed          : notified, last live price stays visible
//   AnalyzeFailed           : notified, previous signals stay visible
//   StaleResponseDiscarded  : internal only, never surfaced
// =============================================================================

use thiserror::Error;

/// Data stream a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Search,
    History,
    Live,
    Analyze,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::History => write!(f, "history"),
            Self::Live => write!(f, "live"),
            Self::Analyze => write!(f, "analyze"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("symbol catalog unavailable: {0}")]
    BootstrapUnavailable(String),
    #[error("remote symbol search failed: {0}")]
    RemoteSearchFailed(String),
    #[error("history load failed for {symbol}@{timeframe}: {reason}")]
    HistoryLoadFailed {
        symbol: String,
        timeframe: String,
        reason: String,
    },
    #[error("live feed failed for {symbol}@{timeframe}: {reason}")]
    LiveFeedFailed {
        symbol: String,
        timeframe: String,
        reason: String,
    },
    #[error("analysis failed for {symbol}: {reason}")]
    AnalyzeFailed { symbol: String, reason: String },
    #[error("{stream} response for generation {generation} superseded by {current}")]
    StaleResponseDiscarded {
        stream: StreamKind,
        generation: u64,
        current: u64,
    },
}

impl ConsoleError {
    /// Whether the failure is shown to the user. Bootstrap degradation and
    /// superseded responses are log-only.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            Self::BootstrapUnavailable(_) | Self::StaleResponseDiscarded { .. }
        )
    }

    /// Notification title for user-visible failures.
    pub fn title(&self) -> &'static str {
        match self {
            Self::BootstrapUnavailable(_) => "Symbol catalog unavailable",
            Self::RemoteSearchFailed(_) => "Remote search unavailable",
            Self::HistoryLoadFailed { .. } => "History unavailable",
            Self::LiveFeedFailed { .. } => "Live feed unavailable",
            Self::AnalyzeFailed { .. } => "Analysis failed",
            Self::StaleResponseDiscarded { .. } => "Stale response",
        }
    }

    /// The underlying failure text, without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            Self::BootstrapUnavailable(reason) | Self::RemoteSearchFailed(reason) => {
                reason.clone()
            }
            Self::HistoryLoadFailed { reason, .. }
            | Self::LiveFeedFailed { reason, .. }
            | Self::AnalyzeFailed { reason, .. } => reason.clone(),
            Self::StaleResponseDiscarded { .. } => self.to_string(),
        }
    }
}
