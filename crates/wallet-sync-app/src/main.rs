// wallet-sync entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Open the state database
// 4. Build app state (restores chain; selection waits for the first wallet snapshot)
// 5. Create mpsc channels
// 6. Bind and spawn the wallet bridge server
// 7. Spawn the app event loop and the stdout printer
// 8. Wait for Ctrl+C
// 9. Cleanup on exit

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};
use wallet_sync_app::app::{self, AppState, SolanaConnector};
use wallet_sync_app::config;
use wallet_sync_app::display;
use wallet_sync_app::protocol::UserCommand;
use wallet_sync_app::ws_server;
use wallet_sync_core::db::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("wallet-sync starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        chain = %config.default_chain,
        port = config.bridge_port,
        commitment = %config.commitment,
        "config loaded"
    );

    // 3. Open the state database
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let store = SqliteStore::open(&config.db_path).context("failed to open database")?;
    info!(path = %config.db_path, "database opened");

    // 4. App state
    let port = config.bridge_port;
    let (state, channels) = AppState::new(config, Arc::new(store), SolanaConnector);
    info!(chain = %state.chain.current(), "chain restored");

    // 5. Channels
    let (bridge_tx, bridge_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ui_tx, mut ui_rx) = mpsc::channel(256);

    // 6. Wallet bridge server
    let listener = ws_server::bind(port)
        .await
        .with_context(|| format!("failed to bind wallet bridge on port {port}"))?;
    println!("waiting for a wallet bridge on ws://{}", listener.local_addr()?);
    let bridge_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::serve(listener, bridge_tx).await {
            error!(error = %e, "wallet bridge server error");
        }
    });

    // 7. Event loop and printer
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(bridge_rx, cmd_rx, ui_tx, state, channels).await {
            error!(error = %e, "event loop error");
        }
    });
    let printer_handle = tokio::spawn(async move {
        while let Some(update) = ui_rx.recv().await {
            println!("{}", display::render(&update));
        }
    });

    // 8. Wait for Ctrl+C
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, shutting down");
    let _ = cmd_tx.send(UserCommand::Quit).await;

    // 9. Cleanup: give the event loop a moment to cancel its session
    if tokio::time::timeout(Duration::from_secs(5), app_handle)
        .await
        .is_err()
    {
        error!("event loop did not stop within 5s");
    }
    bridge_handle.abort();
    printer_handle.abort();

    info!("wallet-sync shut down");
    Ok(())
}

/// Log to `logs/wallet-sync.log`; stdout is reserved for the balance display.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("wallet-sync.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("wallet_sync_app=info,wallet_sync_core=info,warn")
            }),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
