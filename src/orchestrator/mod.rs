// =============================================================================
// Data Orchestrator — selection, history, live polling and analysis
// =============================================================================
//
// Owns everything the console displays and the three async streams that feed
// it:
//
//   history  : one load per (symbol, active timeframe) change
//   live     : a single poller task, first poll immediate, then every
//              `live_poll_secs`; aborted whenever the pair changes
//   analyze  : on demand, single-flight
//
// Every dispatch captures the stream's generation. A response is committed
// only while that generation is still current, checked under the state write
// lock so a newer selection can never be overwritten by an older answer.
//
// Thread safety:
//   - parking_lot::RwLock for the console state (never held across .await).
//   - Atomics for generations, the in-flight flag and the state version.
//   - A tokio watch channel publishes the state version to subscribers.
// =============================================================================

pub mod state;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, TimeZone};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::MarketApi;
use crate::error::{ConsoleError, StreamKind};
use crate::notifications::NotificationSink;
use crate::runtime_config::{clamp_lookback, ConsoleConfig, LayerToggle};
use crate::symbols::SymbolRecord;
use crate::types::{parse_timestamp_ms, AnalyzeRequest, Severity, Signal};

pub use state::{AnalyzeOutcome, Applied, OrchestratorSnapshot, StreamPhase};
use state::ConsoleState;

// =============================================================================
// Internals
// =============================================================================

/// Generation counters for the orchestrated streams.
#[derive(Default)]
struct Generations {
    history: AtomicU64,
    live: AtomicU64,
    analyze: AtomicU64,
}

impl Generations {
    fn counter(&self, stream: StreamKind) -> Option<&AtomicU64> {
        match stream {
            StreamKind::History => Some(&self.history),
            StreamKind::Live => Some(&self.live),
            StreamKind::Analyze => Some(&self.analyze),
            StreamKind::Search => None,
        }
    }

    /// Start a new generation of `stream` and return it.
    fn next(&self, stream: StreamKind) -> u64 {
        self.counter(stream)
            .map(|c| c.fetch_add(1, Ordering::SeqCst) + 1)
            .unwrap_or_default()
    }

    fn current(&self, stream: StreamKind) -> u64 {
        self.counter(stream)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or_default()
    }
}

/// Shared between the orchestrator handle and its spawned tasks.
struct Inner {
    api: Arc<dyn MarketApi>,
    notifier: Arc<dyn NotificationSink>,
    history_limit: usize,
    poll_interval: Duration,

    state: RwLock<ConsoleState>,
    generations: Generations,
    analyze_in_flight: AtomicBool,
    /// Running live poller and the live generation it was started for.
    poller: Mutex<Option<(u64, JoinHandle<()>)>>,
    torn_down: AtomicBool,

    state_version: AtomicU64,
    version_tx: watch::Sender<u64>,
}

/// Releases the analyze in-flight flag however the request ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    fn increment_version(&self) {
        let version = self.state_version.fetch_add(1, Ordering::SeqCst) + 1;
        self.version_tx.send_replace(version);
    }

    /// Mutate state without generation checks.
    fn update(&self, f: impl FnOnce(&mut ConsoleState)) {
        f(&mut self.state.write());
        self.increment_version();
    }

    /// Apply `f` only if `generation` is still the current one for `stream`.
    fn commit(
        &self,
        stream: StreamKind,
        generation: u64,
        f: impl FnOnce(&mut ConsoleState),
    ) -> bool {
        {
            let mut state = self.state.write();
            let current = self.generations.current(stream);
            if current != generation {
                let stale = ConsoleError::StaleResponseDiscarded {
                    stream,
                    generation,
                    current,
                };
                debug!(reason = %stale, "response discarded");
                return false;
            }
            f(&mut state);
        }
        self.increment_version();
        true
    }

    /// Move the analyze generation forward so an in-flight analysis is
    /// dropped when it lands. Must be called with the state write lock held.
    fn supersede_analyze(&self, state: &mut ConsoleState) {
        self.generations.next(StreamKind::Analyze);
        if state.analyze_phase == StreamPhase::Loading {
            state.analyze_phase = if state.signals.is_empty() {
                StreamPhase::Idle
            } else {
                StreamPhase::Settled
            };
        }
    }

    fn report(&self, err: &ConsoleError) {
        warn!(error = %err, "stream failure");
        if err.is_user_visible() {
            self.notifier
                .notify(Severity::Error, err.title(), Some(&err.detail()));
        }
    }

    // ── History ─────────────────────────────────────────────────────────

    fn spawn_history(
        self: &Arc<Self>,
        symbol: String,
        timeframe: String,
        generation: u64,
    ) -> JoinHandle<Applied> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = inner
                .api
                .fetch_history(&symbol, &timeframe, inner.history_limit)
                .await;

            match result {
                Ok(mut candles) => {
                    candles.sort_by_key(|c| c.timestamp);
                    let count = candles.len();
                    let applied = inner.commit(StreamKind::History, generation, |s| {
                        s.candles = candles;
                        s.history_phase = StreamPhase::Settled;
                    });
                    if !applied {
                        return Applied::Discarded;
                    }
                    info!(symbol = %symbol, timeframe = %timeframe, candles = count, "history loaded");
                    Applied::Applied
                }
                Err(e) => {
                    let err = ConsoleError::HistoryLoadFailed {
                        symbol,
                        timeframe,
                        reason: format!("{e:#}"),
                    };
                    let detail = err.detail();
                    if !inner.commit(StreamKind::History, generation, |s| {
                        s.history_phase = StreamPhase::Failed(detail);
                    }) {
                        return Applied::Discarded;
                    }
                    inner.report(&err);
                    Applied::Failed
                }
            }
        })
    }

    // ── Live polling ────────────────────────────────────────────────────

    /// Replace the running poller with one for `target`, unless a newer
    /// generation already owns the slot.
    fn restart_poller(self: &Arc<Self>, target: Option<(String, String)>, generation: u64) {
        let mut slot = self.poller.lock();
        if let Some((owner, _)) = slot.as_ref() {
            if *owner > generation {
                return;
            }
        }
        if let Some((owner, handle)) = slot.take() {
            handle.abort();
            debug!(generation = owner, "live poller stopped");
        }
        if let Some((symbol, timeframe)) = target {
            let inner = Arc::clone(self);
            let handle = tokio::spawn(async move {
                inner.poll_live(symbol, timeframe, generation).await;
            });
            *slot = Some((generation, handle));
        }
    }

    async fn poll_live(self: Arc<Self>, symbol: String, timeframe: String, generation: u64) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(symbol = %symbol, timeframe = %timeframe, every = ?self.poll_interval, "live poller started");

        loop {
            ticker.tick().await;

            let still_current = match self.api.fetch_live(&symbol, &timeframe).await {
                Ok(live) => self.commit(StreamKind::Live, generation, |s| {
                    s.live = Some(live);
                    s.live_phase = StreamPhase::Settled;
                }),
                Err(e) => {
                    let err = ConsoleError::LiveFeedFailed {
                        symbol: symbol.clone(),
                        timeframe: timeframe.clone(),
                        reason: format!("{e:#}"),
                    };
                    let detail = err.detail();
                    let current = self.commit(StreamKind::Live, generation, |s| {
                        s.live_phase = StreamPhase::Failed(detail);
                    });
                    if current {
                        self.report(&err);
                    }
                    current
                }
            };

            if !still_current {
                break;
            }
        }
    }
}

// =============================================================================
// DataOrchestrator
// =============================================================================

/// Coordinates selection, history loads, live polling and analysis.
///
/// Dropping the orchestrator tears it down.
pub struct DataOrchestrator {
    inner: Arc<Inner>,
}

impl DataOrchestrator {
    pub fn new(
        api: Arc<dyn MarketApi>,
        notifier: Arc<dyn NotificationSink>,
        config: &ConsoleConfig,
    ) -> Self {
        let mut state = ConsoleState {
            selected: None,
            timeframes: config.timeframes.clone(),
            active_timeframe: config.active_timeframe.clone(),
            lookback: clamp_lookback(config.lookback),
            layers: config.layers.clone(),
            candles: Vec::new(),
            live: None,
            signals: Vec::new(),
            last_run: None,
            history_phase: StreamPhase::Idle,
            live_phase: StreamPhase::Idle,
            analyze_phase: StreamPhase::Idle,
        };
        state.reconcile_active();

        let (version_tx, _) = watch::channel(1);
        Self {
            inner: Arc::new(Inner {
                api,
                notifier,
                history_limit: config.history_limit,
                poll_interval: config.live_poll_interval(),
                state: RwLock::new(state),
                generations: Generations::default(),
                analyze_in_flight: AtomicBool::new(false),
                poller: Mutex::new(None),
                torn_down: AtomicBool::new(false),
                state_version: AtomicU64::new(1),
                version_tx,
            }),
        }
    }

    fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    // ── Selection ───────────────────────────────────────────────────────

    /// Select a symbol (or clear the selection with `None`).
    ///
    /// Supersedes in-flight history and analysis, starts a history load and
    /// restarts live polling. Returns the history load handle.
    pub fn select_symbol(&self, symbol: Option<SymbolRecord>) -> Option<JoinHandle<Applied>> {
        if self.is_torn_down() {
            return None;
        }

        let selected = symbol.clone();
        let (history_gen, live_gen, target) = {
            let mut state = self.inner.state.write();
            state.selected = symbol;
            state.reconcile_active();

            self.inner.supersede_analyze(&mut state);
            let history_gen = self.inner.generations.next(StreamKind::History);
            let live_gen = self.inner.generations.next(StreamKind::Live);

            let target = state
                .selected
                .as_ref()
                .map(|r| (r.symbol.clone(), state.active_timeframe.clone()));
            if target.is_some() {
                state.history_phase = StreamPhase::Loading;
                state.live_phase = StreamPhase::Loading;
            } else {
                state.candles.clear();
                state.live = None;
                state.history_phase = StreamPhase::Idle;
                state.live_phase = StreamPhase::Idle;
            }
            (history_gen, live_gen, target)
        };
        self.inner.increment_version();

        match &selected {
            Some(record) => {
                info!(symbol = %record.symbol, exchange = %record.exchange, "symbol selected");
                self.inner.notifier.notify(
                    Severity::Info,
                    "Symbol selected",
                    Some(&format!("{} @ {}", record.symbol, record.exchange)),
                );
            }
            None => info!("selection cleared"),
        }

        self.inner.restart_poller(target.clone(), live_gen);
        target.map(|(symbol, timeframe)| self.inner.spawn_history(symbol, timeframe, history_gen))
    }

    /// Reload history and live data for the current selection.
    fn reload(&self) -> Option<JoinHandle<Applied>> {
        let (history_gen, live_gen, target) = {
            let mut state = self.inner.state.write();
            let target = state
                .selected
                .as_ref()
                .map(|r| (r.symbol.clone(), state.active_timeframe.clone()));
            let target = target?;
            state.history_phase = StreamPhase::Loading;
            state.live_phase = StreamPhase::Loading;
            (
                self.inner.generations.next(StreamKind::History),
                self.inner.generations.next(StreamKind::Live),
                target,
            )
        };
        self.inner.increment_version();

        self.inner.restart_poller(Some(target.clone()), live_gen);
        let (symbol, timeframe) = target;
        Some(self.inner.spawn_history(symbol, timeframe, history_gen))
    }

    // ── Timeframes ──────────────────────────────────────────────────────

    /// Display `timeframe`. Only a listed timeframe can become active; a
    /// change supersedes a running analysis and reloads history and live data.
    pub fn set_active_timeframe(&self, timeframe: &str) -> Option<JoinHandle<Applied>> {
        if self.is_torn_down() {
            return None;
        }
        {
            let mut state = self.inner.state.write();
            if state.active_timeframe == timeframe {
                return None;
            }
            if !state.timeframes.iter().any(|tf| tf == timeframe) {
                drop(state);
                warn!(timeframe, "timeframe is not active; ignoring");
                self.inner.notifier.notify(
                    Severity::Warning,
                    "Timeframe not enabled",
                    Some(&format!("enable {timeframe} before displaying it")),
                );
                return None;
            }
            state.active_timeframe = timeframe.to_string();
            self.inner.supersede_analyze(&mut state);
        }
        info!(timeframe, "active timeframe changed");
        self.inner.increment_version();
        self.reload()
    }

    /// Replace the analysis timeframes. Duplicates are dropped; if the active
    /// timeframe is no longer listed the first entry becomes active. Any
    /// change to the list supersedes a running analysis.
    pub fn set_timeframes(&self, timeframes: Vec<String>) -> Option<JoinHandle<Applied>> {
        if self.is_torn_down() {
            return None;
        }
        let mut unique: Vec<String> = Vec::with_capacity(timeframes.len());
        for tf in timeframes {
            let tf = tf.trim().to_string();
            if !tf.is_empty() && !unique.contains(&tf) {
                unique.push(tf);
            }
        }

        let active_changed = {
            let mut state = self.inner.state.write();
            if state.timeframes != unique {
                state.timeframes = unique;
                self.inner.supersede_analyze(&mut state);
            }
            state.reconcile_active()
        };
        self.inner.increment_version();

        if active_changed {
            self.reload()
        } else {
            None
        }
    }

    /// Add `timeframe` to the analysis list, or remove it if present.
    pub fn toggle_timeframe(&self, timeframe: &str) -> Option<JoinHandle<Applied>> {
        let mut timeframes = self.inner.state.read().timeframes.clone();
        match timeframes.iter().position(|tf| tf == timeframe) {
            Some(i) => {
                timeframes.remove(i);
            }
            None => timeframes.push(timeframe.to_string()),
        }
        self.set_timeframes(timeframes)
    }

    // ── Analysis parameters ─────────────────────────────────────────────

    /// Set the lookback window; returns the clamped value actually stored.
    pub fn set_lookback(&self, lookback: u32) -> u32 {
        let clamped = clamp_lookback(lookback);
        self.inner.update(|s| s.lookback = clamped);
        clamped
    }

    /// Switch a layer on or off. Returns `false` for an unknown key.
    pub fn set_layer(&self, key: &str, enabled: bool) -> bool {
        let mut found = false;
        self.inner.update(|s| {
            if let Some(layer) = s.layers.iter_mut().find(|l| l.key == key) {
                layer.enabled = enabled;
                found = true;
            }
        });
        found
    }

    pub fn layers(&self) -> Vec<LayerToggle> {
        self.inner.state.read().layers.clone()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.inner.state.read().signals.clone()
    }

    pub fn is_analyzing(&self) -> bool {
        self.inner.analyze_in_flight.load(Ordering::SeqCst)
    }

    // ── Analysis ────────────────────────────────────────────────────────

    /// Run the analysis for the current selection.
    ///
    /// Does nothing unless a symbol is selected, at least one timeframe is
    /// active and no other analysis is running.
    pub async fn analyze(&self) -> AnalyzeOutcome {
        if self.is_torn_down() {
            return AnalyzeOutcome::Disabled;
        }

        let request = {
            let state = self.inner.state.read();
            match &state.selected {
                Some(record) if !state.timeframes.is_empty() => AnalyzeRequest {
                    symbol: record.symbol.clone(),
                    timeframes: state.timeframes.clone(),
                    lookback: clamp_lookback(state.lookback),
                    layers: state.enabled_layers(),
                },
                _ => return AnalyzeOutcome::Disabled,
            }
        };

        if self
            .inner
            .analyze_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("analysis already in flight");
            return AnalyzeOutcome::Disabled;
        }
        let _in_flight = InFlight(&self.inner.analyze_in_flight);

        let generation = {
            let mut state = self.inner.state.write();
            state.analyze_phase = StreamPhase::Loading;
            self.inner.generations.next(StreamKind::Analyze)
        };
        self.inner.increment_version();

        info!(
            symbol = %request.symbol,
            timeframes = ?request.timeframes,
            lookback = request.lookback,
            layers = ?request.layers,
            "analysis requested"
        );

        match self.inner.api.analyze(&request).await {
            Ok(response) => {
                let count = response.signals.len();
                let last_run = completion_time(response.generated_at.as_deref());
                let applied = self.inner.commit(StreamKind::Analyze, generation, |s| {
                    s.signals = response.signals;
                    s.last_run = Some(last_run);
                    s.analyze_phase = StreamPhase::Settled;
                });
                if !applied {
                    return AnalyzeOutcome::Superseded;
                }
                info!(symbol = %request.symbol, signals = count, "analysis complete");
                self.inner.notifier.notify(
                    Severity::Success,
                    "Analysis complete",
                    Some(&format!("{count} signal(s) detected")),
                );
                AnalyzeOutcome::Completed { signals: count }
            }
            Err(e) => {
                let err = ConsoleError::AnalyzeFailed {
                    symbol: request.symbol.clone(),
                    reason: format!("{e:#}"),
                };
                let detail = err.detail();
                if !self.inner.commit(StreamKind::Analyze, generation, |s| {
                    s.analyze_phase = StreamPhase::Failed(detail);
                }) {
                    return AnalyzeOutcome::Superseded;
                }
                self.inner.report(&err);
                AnalyzeOutcome::Failed
            }
        }
    }

    // ── Observation ─────────────────────────────────────────────────────

    pub fn current_state_version(&self) -> u64 {
        self.inner.state_version.load(Ordering::SeqCst)
    }

    /// Receive the state version after every committed change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version_tx.subscribe()
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        let version = self.current_state_version();
        let polling = self.inner.poller.lock().is_some();
        let state = self.inner.state.read();
        OrchestratorSnapshot {
            state_version: version,
            selected: state.selected.clone(),
            timeframes: state.timeframes.clone(),
            active_timeframe: state.active_timeframe.clone(),
            lookback: state.lookback,
            layers: state.layers.clone(),
            candles: state.candles.clone(),
            live: state.live.clone(),
            signals: state.signals.clone(),
            last_run: state.last_run.clone(),
            history: state.history_phase.clone(),
            live_feed: state.live_phase.clone(),
            analysis: state.analyze_phase.clone(),
            analyzing: self.is_analyzing(),
            polling,
        }
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Stop polling and ignore every response still in flight.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.inner.state.write();
            self.inner.generations.next(StreamKind::History);
            self.inner.generations.next(StreamKind::Live);
            self.inner.supersede_analyze(&mut state);
        }
        if let Some((_, handle)) = self.inner.poller.lock().take() {
            handle.abort();
        }
        self.inner.increment_version();
        info!("orchestrator torn down");
    }
}

impl Drop for DataOrchestrator {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// `HH:MM:SS` local time of `generated_at`, or of now when it is missing or
/// unparseable.
fn completion_time(generated_at: Option<&str>) -> String {
    generated_at
        .and_then(|raw| parse_timestamp_ms(&serde_json::Value::String(raw.to_string())).ok())
        .and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Local::now)
        .format("%H:%M:%S")
        .to_string()
}
