//! Standalone index server.
//!
//! ```bash
//! RUST_LOG=veildex_server=debug cargo run --example serve -- --addr 127.0.0.1:4000
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use veildex_server::{net, ServerEngine};

#[derive(Parser)]
#[command(about = "Veildex encrypted-index server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:4000")]
    addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;

    let engine = Arc::new(ServerEngine::new());
    net::serve(listener, engine).await?;
    Ok(())
}
