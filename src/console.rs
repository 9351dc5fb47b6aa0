// =============================================================================
// Console — line-oriented command surface
// =============================================================================
//
// Parses one command per line and drives the search flow and the
// orchestrator. Output is plain text; `snapshot` prints the full state as
// JSON.
//
// Commands never wait on the network. Searches, history loads and analyses
// run as tasks and report on the event channel when they land, so a newer
// command can supersede an older one while it is still in flight.
//
//   search <query>          local + remote symbol suggestions
//   select <n|SYMBOL>       select a suggestion (or a known symbol)
//   clear                   clear the selection
//   tf <tf>                 toggle an analysis timeframe
//   tfs <tf,tf,...>         replace the analysis timeframes
//   active <tf>             display another listed timeframe
//   lookback <n>            candles per timeframe for analysis
//   layer <key> on|off      switch an overlay layer
//   analyze                 run the analysis
//   reasons <signal-id>     explain why a signal fired
//   status | levels | overlays | notes | snapshot
//   dismiss <id>            dismiss a notification
//   quit
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::notifications::NotificationCenter;
use crate::orchestrator::{
    AnalyzeOutcome, Applied, DataOrchestrator, OrchestratorSnapshot, StreamPhase,
};
use crate::overlays;
use crate::runtime_config::{ConsoleConfig, LayerToggle, AVAILABLE_TIMEFRAMES};
use crate::symbols::search::Suggestions;
use crate::symbols::{SearchOutcome, SymbolRecord, SymbolSearch};
use crate::types::Severity;

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// 1-based position in the last suggestion list.
    Position(usize),
    Symbol(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Select(Selector),
    Clear,
    ToggleTimeframe(String),
    SetTimeframes(Vec<String>),
    Active(String),
    Lookback(u32),
    Layer { key: String, enabled: bool },
    Analyze,
    Reasons(String),
    Status,
    Levels,
    Overlays,
    Notes,
    Dismiss(String),
    Snapshot,
    Help,
    Quit,
}

fn known_timeframe(tf: &str) -> Result<String> {
    let tf = tf.trim();
    if !AVAILABLE_TIMEFRAMES.contains(&tf) {
        bail!(
            "unknown timeframe '{tf}' (expected one of {})",
            AVAILABLE_TIMEFRAMES.join(", ")
        );
    }
    Ok(tf.to_string())
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_lowercase().as_str() {
        "search" | "s" => Command::Search(rest.to_string()),
        "select" => {
            if rest.is_empty() {
                bail!("usage: select <n|SYMBOL>");
            }
            match rest.parse::<usize>() {
                Ok(0) => bail!("suggestions are numbered from 1"),
                Ok(n) => Command::Select(Selector::Position(n)),
                Err(_) => Command::Select(Selector::Symbol(rest.to_uppercase())),
            }
        }
        "clear" => Command::Clear,
        "tf" => Command::ToggleTimeframe(known_timeframe(rest)?),
        "tfs" => Command::SetTimeframes(
            rest.split(',')
                .filter(|tf| !tf.trim().is_empty())
                .map(known_timeframe)
                .collect::<Result<Vec<_>>>()?,
        ),
        "active" => Command::Active(known_timeframe(rest)?),
        "lookback" => Command::Lookback(
            rest.parse()
                .with_context(|| format!("invalid lookback '{rest}'"))?,
        ),
        "layer" => {
            let mut parts = rest.split_whitespace();
            let (Some(key), Some(state), None) = (parts.next(), parts.next(), parts.next()) else {
                bail!("usage: layer <key> on|off");
            };
            let enabled = match state.to_lowercase().as_str() {
                "on" | "true" | "1" => true,
                "off" | "false" | "0" => false,
                other => bail!("expected on|off, got '{other}'"),
            };
            Command::Layer {
                key: key.to_string(),
                enabled,
            }
        }
        "analyze" | "a" => Command::Analyze,
        "reasons" | "why" => {
            if rest.is_empty() {
                bail!("usage: reasons <signal-id>");
            }
            Command::Reasons(rest.to_string())
        }
        "status" => Command::Status,
        "levels" => Command::Levels,
        "overlays" => Command::Overlays,
        "notes" => Command::Notes,
        "dismiss" => {
            if rest.is_empty() {
                bail!("usage: dismiss <id>");
            }
            Command::Dismiss(rest.to_string())
        }
        "snapshot" => Command::Snapshot,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(command))
}

// =============================================================================
// Console
// =============================================================================

/// Output of one command.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub text: String,
    pub quit: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quit: false,
        }
    }
}

pub struct Console {
    search: Arc<SymbolSearch>,
    orchestrator: Arc<DataOrchestrator>,
    notes: Arc<NotificationCenter>,
    /// Records behind the numbers of the last search listing.
    suggestions: Arc<Mutex<Vec<SymbolRecord>>>,
    /// Output of background work, printed when it lands.
    events: mpsc::UnboundedSender<String>,
}

impl Console {
    /// Build the console and the receiver for output of background work.
    pub fn new(
        search: SymbolSearch,
        orchestrator: DataOrchestrator,
        notes: Arc<NotificationCenter>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (events, rx) = mpsc::unbounded_channel();
        let console = Self {
            search: Arc::new(search),
            orchestrator: Arc::new(orchestrator),
            notes,
            suggestions: Arc::new(Mutex::new(Vec::new())),
            events,
        };
        (console, rx)
    }

    pub fn orchestrator(&self) -> &DataOrchestrator {
        &self.orchestrator
    }

    /// Copy the workflow settings back into `config` for saving.
    pub fn store_settings(&self, config: &mut ConsoleConfig) {
        let snap = self.orchestrator.snapshot();
        config.timeframes = snap.timeframes;
        config.active_timeframe = snap.active_timeframe;
        config.lookback = snap.lookback;
        config.layers = snap.layers;
    }

    /// Print a line whenever a fresh live price lands for the selection.
    pub fn follow_live(&self) -> JoinHandle<()> {
        let mut versions = self.orchestrator.subscribe();
        let orchestrator = Arc::downgrade(&self.orchestrator);
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut last: Option<(String, f64)> = None;
            while versions.changed().await.is_ok() {
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                let snap = orchestrator.snapshot();
                if snap.live_feed != StreamPhase::Settled {
                    continue;
                }
                let (Some(record), Some(live)) = (&snap.selected, &snap.live) else {
                    continue;
                };
                let current = (record.symbol.clone(), live.price);
                if last.as_ref() == Some(&current) {
                    continue;
                }
                if events
                    .send(format!("live {} {}", current.0, current.1))
                    .is_err()
                {
                    break;
                }
                last = Some(current);
            }
        })
    }

    pub fn execute(&self, command: Command) -> Result<Reply> {
        debug!(?command, "console command");
        let reply = match command {
            Command::Search(query) => {
                let text = format!("searching '{}'", query.trim());
                self.spawn_search(query);
                Reply::text(text)
            }
            Command::Select(selector) => {
                let record = self.resolve(&selector)?;
                let text = format!("selected {} @ {}", record.symbol, record.exchange);
                let handle = self.orchestrator.select_symbol(Some(record));
                self.report_history(handle);
                Reply::text(text)
            }
            Command::Clear => {
                self.orchestrator.select_symbol(None);
                Reply::text("selection cleared")
            }
            Command::ToggleTimeframe(tf) => {
                let handle = self.orchestrator.toggle_timeframe(&tf);
                self.report_history(handle);
                Reply::text(self.timeframe_line())
            }
            Command::SetTimeframes(tfs) => {
                let handle = self.orchestrator.set_timeframes(tfs);
                self.report_history(handle);
                Reply::text(self.timeframe_line())
            }
            Command::Active(tf) => {
                let current = self.orchestrator.snapshot();
                if !current.timeframes.contains(&tf) {
                    bail!("'{tf}' is not an analysis timeframe; add it with 'tf {tf}'");
                }
                let handle = self.orchestrator.set_active_timeframe(&tf);
                self.report_history(handle);
                Reply::text(self.timeframe_line())
            }
            Command::Lookback(n) => {
                let stored = self.orchestrator.set_lookback(n);
                Reply::text(format!("lookback {stored}"))
            }
            Command::Layer { key, enabled } => {
                if !self.orchestrator.set_layer(&key, enabled) {
                    bail!("unknown layer '{key}'");
                }
                Reply::text(render_layers(&self.orchestrator.layers()))
            }
            Command::Analyze => Reply::text(self.start_analysis()),
            Command::Reasons(id) => Reply::text(self.explain(&id)?),
            Command::Status => Reply::text(render_status(&self.orchestrator.snapshot())),
            Command::Levels => Reply::text(render_levels(&self.orchestrator.snapshot())),
            Command::Overlays => Reply::text(render_overlays(&self.orchestrator.snapshot())),
            Command::Notes => Reply::text(self.render_notes()),
            Command::Dismiss(id) => {
                if !self.notes.dismiss(&id) {
                    bail!("no notification with id '{id}'");
                }
                Reply::text("dismissed")
            }
            Command::Snapshot => Reply::text(
                serde_json::to_string_pretty(&self.orchestrator.snapshot())
                    .context("failed to serialise snapshot")?,
            ),
            Command::Help => Reply::text(HELP),
            Command::Quit => Reply {
                text: "bye".to_string(),
                quit: true,
            },
        };
        Ok(reply)
    }

    // ── Background work ─────────────────────────────────────────────────

    fn spawn_search(&self, query: String) {
        let search = Arc::clone(&self.search);
        let suggestions = Arc::clone(&self.suggestions);
        let events = self.events.clone();
        tokio::spawn(async move {
            let found = search.suggest(&query).await;
            let text = match found.outcome {
                SearchOutcome::Superseded => {
                    debug!(query = %found.query, "search superseded; not listed");
                    return;
                }
                SearchOutcome::TooShort => "type at least two characters".to_string(),
                SearchOutcome::Merged | SearchOutcome::RemoteFailed => {
                    *suggestions.lock() = found.best().iter().map(|s| s.record.clone()).collect();
                    render_suggestions(&found)
                }
            };
            let _ = events.send(text);
        });
    }

    fn report_history(&self, handle: Option<JoinHandle<Applied>>) {
        let Some(handle) = handle else {
            return;
        };
        let orchestrator = Arc::downgrade(&self.orchestrator);
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = match handle.await {
                Ok(Applied::Applied) => "history loaded",
                Ok(Applied::Failed) => "history unavailable; previous candles kept",
                Ok(Applied::Discarded) | Err(_) => {
                    let _ = events.send("history superseded by a newer request".to_string());
                    return;
                }
            };
            if let Some(orchestrator) = orchestrator.upgrade() {
                let status = render_status(&orchestrator.snapshot());
                let _ = events.send(format!("{outcome}\n{status}"));
            }
        });
    }

    fn start_analysis(&self) -> String {
        let snap = self.orchestrator.snapshot();
        if snap.selected.is_none() || snap.timeframes.is_empty() {
            return "analysis unavailable: select a symbol and at least one timeframe".to_string();
        }
        if snap.analyzing {
            return "analysis already running".to_string();
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let events = self.events.clone();
        tokio::spawn(async move {
            let text = match orchestrator.analyze().await {
                AnalyzeOutcome::Disabled => "analysis unavailable".to_string(),
                AnalyzeOutcome::Completed { .. } => render_signals(&orchestrator.snapshot()),
                AnalyzeOutcome::Failed => "analysis failed; previous signals kept".to_string(),
                AnalyzeOutcome::Superseded => {
                    "analysis superseded by a newer selection".to_string()
                }
            };
            let _ = events.send(text);
        });
        "analysis requested".to_string()
    }

    /// List the reasons behind a signal and raise each one as a notification.
    fn explain(&self, id: &str) -> Result<String> {
        let signal = self
            .orchestrator
            .signals()
            .into_iter()
            .find(|s| s.id == id)
            .with_context(|| format!("no signal with id '{id}'"))?;
        if signal.reasons.is_empty() {
            return Ok(format!("{id}: no reasons given"));
        }

        let mut out = Vec::with_capacity(signal.reasons.len());
        for reason in &signal.reasons {
            self.notes
                .push(Severity::Info, &reason.label, reason.detail.as_deref());
            out.push(match &reason.detail {
                Some(detail) => format!("{}: {}", reason.label, detail),
                None => reason.label.clone(),
            });
        }
        Ok(out.join("\n"))
    }

    fn resolve(&self, selector: &Selector) -> Result<SymbolRecord> {
        match selector {
            Selector::Position(n) => n
                .checked_sub(1)
                .and_then(|i| self.suggestions.lock().get(i).cloned())
                .with_context(|| format!("no suggestion #{n}; run 'search' first")),
            Selector::Symbol(symbol) => self
                .search
                .index()
                .get(symbol)
                .with_context(|| format!("unknown symbol '{symbol}'; try 'search {symbol}'")),
        }
    }

    fn timeframe_line(&self) -> String {
        let snap = self.orchestrator.snapshot();
        render_timeframes(&snap)
    }

    fn render_notes(&self) -> String {
        let notes = self.notes.active();
        if notes.is_empty() {
            return "no notifications".to_string();
        }
        notes
            .iter()
            .map(|n| match &n.detail {
                Some(detail) => format!("[{}] {} {}: {}", n.severity, n.id, n.title, detail),
                None => format!("[{}] {} {}", n.severity, n.id, n.title),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// Rendering
// =============================================================================

const HELP: &str = "\
search <query>       find symbols
select <n|SYMBOL>    select a suggestion or known symbol
clear                clear the selection
tf <tf>              toggle an analysis timeframe
tfs <tf,tf,...>      replace the analysis timeframes
active <tf>          display another analysis timeframe
lookback <n>         candles per timeframe (200-2000)
layer <key> on|off   switch an overlay layer
analyze              run the analysis
reasons <signal-id>  explain why a signal fired
status               selection, candles, live price
levels               trade levels of the current signals
overlays             overlays and chart markers
notes                active notifications
dismiss <id>         dismiss a notification
snapshot             full state as JSON
quit                 save settings and exit";

fn render_timeframes(snap: &OrchestratorSnapshot) -> String {
    let list: Vec<String> = snap
        .timeframes
        .iter()
        .map(|tf| {
            if *tf == snap.active_timeframe {
                format!("[{tf}]")
            } else {
                tf.clone()
            }
        })
        .collect();
    format!("timeframes: {}", list.join(" "))
}

fn render_layers(layers: &[LayerToggle]) -> String {
    let list: Vec<String> = layers
        .iter()
        .map(|l| format!("{}={}", l.key, if l.enabled { "on" } else { "off" }))
        .collect();
    format!("layers: {}", list.join(" "))
}

fn render_suggestions(found: &Suggestions) -> String {
    let best = found.best();
    if best.is_empty() {
        return format!("no symbols match '{}'", found.query);
    }
    let mut out = String::new();
    for (i, hit) in best.iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. {:<12} {:<10} {:<10} {:.2}\n",
            i + 1,
            hit.record.symbol,
            hit.record.exchange,
            hit.record.asset_type,
            hit.score
        ));
    }
    if found.outcome == SearchOutcome::RemoteFailed {
        out.push_str("(remote search unavailable, local matches only)\n");
    }
    out.trim_end().to_string()
}

fn render_status(snap: &OrchestratorSnapshot) -> String {
    let mut out = Vec::new();
    match &snap.selected {
        Some(r) => out.push(format!("symbol: {} @ {} ({})", r.symbol, r.exchange, r.asset_type)),
        None => out.push("symbol: none".to_string()),
    }
    out.push(render_timeframes(snap));
    out.push(format!("lookback: {}", snap.lookback));
    out.push(render_layers(&snap.layers));

    let last_close = snap
        .candles
        .last()
        .map(|c| format!(", last close {}", c.close))
        .unwrap_or_default();
    out.push(format!(
        "history: {} ({} candles{})",
        snap.history,
        snap.candles.len(),
        last_close
    ));

    match &snap.live {
        Some(live) => {
            let bar = overlays::live_bar(live, Utc::now().timestamp_millis());
            out.push(format!(
                "live: {} ({}) o {} h {} l {}",
                bar.close, snap.live_feed, bar.open, bar.high, bar.low
            ));
        }
        None => out.push(format!("live: - ({})", snap.live_feed)),
    }

    out.push(format!(
        "analysis: {}{} ({} signals{})",
        snap.analysis,
        if snap.analyzing { ", running" } else { "" },
        snap.signals.len(),
        snap.last_run
            .as_ref()
            .map(|t| format!(", last run {t}"))
            .unwrap_or_default()
    ));
    out.join("\n")
}

fn render_signals(snap: &OrchestratorSnapshot) -> String {
    if snap.signals.is_empty() {
        return "no signals".to_string();
    }
    snap.signals
        .iter()
        .map(|s| {
            let reasons: Vec<&str> = s.reasons.iter().map(|r| r.label.as_str()).collect();
            format!(
                "{} {} {} entry {} stop {} targets {:?} rr {:.2} score {:.2} [{}]",
                s.symbol,
                s.timeframe,
                s.direction,
                s.entry,
                s.stop_loss,
                s.take_profits,
                s.rr,
                s.score,
                reasons.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_levels(snap: &OrchestratorSnapshot) -> String {
    let levels = overlays::trade_levels(&snap.signals);
    if levels.is_empty() {
        return "no trade levels".to_string();
    }
    levels
        .iter()
        .map(|l| format!("{:<24} {:<6} {}", l.id, l.label, l.price))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_overlays(snap: &OrchestratorSnapshot) -> String {
    let groups = overlays::overlays_by_kind(&snap.signals);
    if groups.is_empty() {
        return "no overlays".to_string();
    }
    let mut out = Vec::new();
    for group in &groups {
        out.push(format!("{} ({})", group.kind, group.items.len()));
        for item in &group.items {
            out.push(format!(
                "  {} [{} {}]",
                overlays::overlay_label(&group.kind, &item.payload),
                item.signal_id,
                item.timeframe
            ));
        }
    }
    let markers = overlays::markers(&groups, &snap.layers, Utc::now().timestamp_millis());
    if !markers.is_empty() {
        out.push(format!("markers ({})", markers.len()));
        for m in &markers {
            out.push(format!("  {} {}", m.time, m.text));
        }
    }
    out.join("\n")
}
