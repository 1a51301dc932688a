#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::Result;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

mod utils;

use chatsend::config::{default_store_path, Settings};
use chatsend::events::{DeliveryEvent, EventBus};
use chatsend::store::JsonFileStore;
use chatsend::transport::HttpTransport;
use chatsend::{DeliveryReconciler, DeliveryState, PendingMessageScanner};

/// Command line arguments for chatsend
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chatsend: resend pending chat messages from a local store.",
    long_about = "chatsend reads the local message store, resends every message that has not \
    reached the server yet, and records the outcome without ever downgrading a message's \
    delivery state.\n\n\
    By default it performs a single pass and waits for it to finish. With --watch it keeps \
    scanning until interrupted."
)]
struct Args {
    /// JSON message store (defaults to the user data directory)
    #[arg(long, value_name = "PATH")]
    store: Option<PathBuf>,

    /// Settings file (defaults to $CHATSEND_CONFIG or the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the effective settings to PATH and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Log to a file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Keep scanning periodically until Ctrl-C
    #[arg(long)]
    watch: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn log_event(event: &DeliveryEvent) {
    match event {
        DeliveryEvent::ResendStarted(message) => {
            info!("Resend started for {} ({:?})", message.label(), message.state)
        }
        DeliveryEvent::MessageConfirmed(message) => {
            info!("Message {} confirmed as {:?}", message.label(), message.state)
        }
        DeliveryEvent::SendFailed { message, class } => {
            warn!("Message {} failed ({:?}), now {:?}", message.label(), class, message.state)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { LevelFilter::Debug } else { LevelFilter::Info };
    utils::setup_logging(args.log_file.as_deref(), level)?;

    let settings = Settings::load(args.config.as_deref())?;
    if let Some(path) = &args.write_config {
        settings.save(path)?;
        println!("Settings written to {}", path.display());
        return Ok(());
    }
    if settings.token.is_empty() {
        warn!("No API token configured, the server will most likely reject every message");
    }

    let store_path = match args.store {
        Some(path) => path,
        None => default_store_path()?,
    };
    let store = Arc::new(JsonFileStore::open(&store_path).await?);
    info!("Using message store {}", store.path().display());

    let transport = Arc::new(HttpTransport::new(&settings));
    let bus = EventBus::new(settings.event_buffer);
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} delivery events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let reconciler = DeliveryReconciler::new(
        store.clone(),
        transport,
        Arc::new(bus),
        settings.reconciler_config(),
    );
    let scanner = PendingMessageScanner::new(reconciler);

    if args.watch {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    let _ = shutdown_tx.send(()).await;
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        });
        scanner.run(settings.scan_interval(), shutdown_rx).await;
        let running = scanner.in_flight();
        if running > 0 {
            warn!("Stopping with {} resends still running", running);
        }
        return Ok(());
    }

    let dispatched = scanner.scan_and_resend().await;
    if dispatched.is_empty() {
        println!("No pending messages");
        return Ok(());
    }
    info!("Waiting for {} resends", dispatched.len());
    let finished = dispatched.join().await;
    let confirmed = finished.iter().filter(|m| m.state.is_confirmed()).count();
    let failed = finished
        .iter()
        .filter(|m| m.state == DeliveryState::Failed)
        .count();
    println!(
        "Resent {} messages: {} confirmed, {} failed, {} still pending",
        finished.len(),
        confirmed,
        failed,
        finished.len() - confirmed - failed
    );
    Ok(())
}
