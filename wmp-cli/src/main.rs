//! Command-line Web Monetization client.
//!
//! Declares a payment pointer on an in-memory document, negotiates a session
//! with the provider and logs every monetization event until interrupted.
//!
//! # Usage
//!
//! ```bash
//! wmp-cli --provider-url https://wmp.example --payment-pointer '$wallet.example/alice'
//!
//! # Configure logging level
//! RUST_LOG=debug wmp-cli --provider-url https://wmp.example --payment-pointer '$wallet.example/alice'
//! ```
//!
//! See the `config` module for the environment variables.

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use wmp::{BroadcastHost, HeadDocument, MonetizationEvent};
use wmp_http::WmpClient;

use crate::config::Args;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing with RUST_LOG env filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!("wmp failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let host = Arc::new(BroadcastHost::new());
    let mut events = host.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let document = HeadDocument::with_monetization(host);
    document.declare(&args.payment_pointer);

    let client = WmpClient::new(Arc::new(document), args.client_config()?)?;
    tracing::info!(
        provider = %args.provider_url,
        pointer = %args.payment_pointer,
        discovery = %args.discovery,
        "Starting payment session"
    );
    client.setup_payment(args.provider_url.as_str(), None)?;

    shutdown_signal().await;
    client.close_monetization_stream();
    drop(client);

    // The host goes away with the client, which ends the logger once the
    // final events are written.
    if tokio::time::timeout(Duration::from_secs(1), logger)
        .await
        .is_err()
    {
        tracing::debug!("Event logger did not finish in time");
    }

    tracing::info!("Payment session closed");
    Ok(())
}

fn log_event(event: &MonetizationEvent) {
    match event.detail_json() {
        Ok(detail) => tracing::info!(event = event.name(), %detail, "Monetization event"),
        Err(err) => tracing::warn!(event = event.name(), error = %err, "Unserializable event"),
    }
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
