// =============================================================================
// Oryon Console — Main Entry Point
// =============================================================================
//
// Loads the console config, bootstraps the symbol index from the static
// catalog (fail-open), then reads commands from stdin until `quit` or Ctrl-C.
// Results of background work (searches, history loads, analyses, live
// prices) are printed as they land. Workflow settings (timeframes, lookback,
// layers) are saved on exit.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod console;
mod error;
mod notifications;
mod orchestrator;
mod overlays;
mod runtime_config;
mod symbols;
mod types;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiClient;
use crate::console::Console;
use crate::notifications::NotificationCenter;
use crate::orchestrator::DataOrchestrator;
use crate::runtime_config::ConsoleConfig;
use crate::symbols::{SymbolIndex, SymbolSearch};

const CONFIG_PATH: &str = "console_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Oryon console starting");

    let mut config = ConsoleConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        ConsoleConfig::default()
    });
    config.apply_env_overrides();

    info!(
        api_base = %config.api_base,
        symbol_index_url = %config.symbol_index_url,
        timeframes = ?config.timeframes,
        "Console configured"
    );

    // ── 2. Service client & notifications ────────────────────────────────
    let client = Arc::new(ApiClient::new(&config.api_base, config.request_timeout())?);
    let notes = Arc::new(NotificationCenter::new(config.notification_ttl()));

    // ── 3. Symbol index (fail-open) ──────────────────────────────────────
    let index = Arc::new(SymbolIndex::bootstrap(client.as_ref(), &config.symbol_index_url).await);
    info!(symbols = index.len(), "Symbol index ready");

    // ── 4. Search flow & orchestrator ────────────────────────────────────
    let search = SymbolSearch::new(index, client.clone(), notes.clone(), config.search.clone());
    let orchestrator = DataOrchestrator::new(client, notes.clone(), &config);
    let (console, mut events) = Console::new(search, orchestrator, notes);
    let _live_feed = console.follow_live();

    // ── 5. Command loop ──────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"type 'help' for commands\n> ").await?;
    stdout.flush().await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let output = match crate::console::parse(&line) {
                    Ok(None) => String::new(),
                    Ok(Some(command)) => match console.execute(command) {
                        Ok(reply) if reply.quit => break,
                        Ok(reply) => reply.text,
                        Err(e) => format!("error: {e:#}"),
                    },
                    Err(e) => format!("error: {e:#}"),
                };
                if !output.is_empty() {
                    stdout.write_all(output.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                stdout.write_all(b"> ").await?;
                stdout.flush().await?;
            }
            Some(output) = events.recv() => {
                stdout.write_all(b"\n").await?;
                stdout.write_all(output.as_bytes()).await?;
                stdout.write_all(b"\n> ").await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    // ── 6. Shutdown ──────────────────────────────────────────────────────
    console.orchestrator().teardown();
    console.store_settings(&mut config);
    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "Failed to save console config on shutdown");
    }

    info!("Oryon console stopped");
    Ok(())
}
