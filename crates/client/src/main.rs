//! Single-machine coordinator node.
//!
//! Runs the poll loop and the HTTP admin surface over an in-memory log.
//! Useful for local walkthroughs of the protocol; production deployments
//! wire a broker-backed log into the same client.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

use coldsign_client::{http, run_poll_loop, Client, FileKeyStore, InMemoryState};
use coldsign_storage::InMemoryLog;

#[derive(Parser)]
#[command(name = "coldsign-node")]
#[command(about = "Threshold-signature coordinator node")]
struct Cli {
    /// Username of this participant; also its address on the log.
    #[arg(short, long)]
    username: String,

    /// HTTP listen address for the admin API.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Directory holding the Ed25519 keypair files.
    #[arg(long, default_value = "./coldsign-keys")]
    key_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coldsign_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let keystore = FileKeyStore::new(&cli.key_dir);
    keystore.init(&cli.username)?;

    let client = Client::new(
        &cli.username,
        &keystore,
        Box::new(InMemoryState::new()),
        Box::new(InMemoryLog::new()),
    )?;
    info!(username = %cli.username, pub_key = %hex::encode(client.public_key()), "node ready");

    let client = Arc::new(Mutex::new(client));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = tokio::spawn(run_poll_loop(client.clone(), shutdown_rx));

    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!(address = %cli.listen, "admin API listening");

    tokio::select! {
        result = http::serve(client, listener) => {
            result.context("HTTP server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    shutdown_tx.send(true).ok();
    poller.await.context("poll loop panicked")??;
    Ok(())
}
