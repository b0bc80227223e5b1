use std::io::Write;

use anyhow::{Context, Result};
use autopatch::backend::PipeWireGraph;
use autopatch::cli::{session_options, Cli};
use autopatch::listing::{ListOptions, Listing};
use autopatch::{
    logging, PatternSet, PatternStore, RefreshHandle, RefreshRequest, RunOutcome, SessionManager,
};
use autopatch_conf::AutopatchConfig;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        AutopatchConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_to(&mut config);

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    logging::init(&config.logging.level);

    let list = cli.list_options();
    if cli.patterns.is_empty() && config.matching.pattern_file.is_none() && !list.any() {
        anyhow::bail!("Nothing to do: give pattern pairs, a pattern file, or a listing option");
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_shutdown_signal().await;
            cancel.cancel();
        }
    });

    if list.any() {
        return run_listing(&config, list, cli.json, cancel).await;
    }

    let exact = config.matching.exact;
    let pattern_file = config.matching.pattern_file.clone();
    let mut patterns = match &pattern_file {
        Some(path) => PatternSet::from_file(path, exact).context("Failed to read pattern file")?,
        None => PatternSet::new(exact),
    };
    if pattern_file.is_some() && !cli.patterns.is_empty() {
        warn!("Patterns given on the command line are dropped when the pattern file is reloaded");
    }
    patterns.add_pairs(cli.patterns.as_slice());
    info!("Loaded {} pattern pairs", patterns.len());

    let store = PatternStore::new(patterns, pattern_file);
    let mut manager = SessionManager::new(
        PipeWireGraph::new(),
        store.clone(),
        session_options(&config, false),
    );
    spawn_reload_trigger(store, manager.refresh_handle(), cancel.clone());

    match manager.run(cancel).await? {
        RunOutcome::Aborted => info!("Shutdown complete"),
        RunOutcome::Finished => info!("Graph server went away, exiting"),
    }
    Ok(())
}

async fn run_listing(
    config: &AutopatchConfig,
    list: ListOptions,
    json: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let mut manager = SessionManager::new(
        PipeWireGraph::new(),
        PatternStore::new(PatternSet::default(), None),
        session_options(config, true),
    );

    let Some(live) = manager.connect(&cancel).await? else {
        return Ok(());
    };
    let listing = Listing::collect(live.graph(), &list).context("Failed to list ports")?;
    drop(live);

    let mut stdout = std::io::stdout().lock();
    if json {
        listing.write_json(&mut stdout)?;
    } else {
        listing.write_text(&mut stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

/// Re-read the pattern file on SIGHUP, then ask for a new pass.
#[cfg(unix)]
fn spawn_reload_trigger(store: PatternStore, refresh: RefreshHandle, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Could not install SIGHUP handler, pattern reload disabled: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("Received SIGHUP, re-reading pattern file");
                    match store.reload() {
                        Ok(_) => {
                            refresh.request(RefreshRequest::PatternsReloaded);
                        }
                        Err(e) => error!("Keeping current patterns: {}", e),
                    }
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_trigger(_store: PatternStore, _refresh: RefreshHandle, _cancel: CancellationToken) {
    warn!("Pattern file reload is not supported on this platform");
}

async fn wait_for_shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(_) => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
