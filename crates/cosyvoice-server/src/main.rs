//! CosyVoice reference server - streams raw PCM for a form-encoded utterance

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod state;
mod synth;

use cosyvoice_core::ServerConfig;
use state::AppState;

#[derive(Debug, Parser)]
#[command(name = "cosyvoice-server", version, about = "Reference streaming synthesis endpoint")]
struct Args {
    /// TOML file with server settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cosyvoice_server=debug,cosyvoice_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CosyVoice reference server");

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    info!(
        "Rendering {} Hz PCM, {} ms per character, chunks of {}..={} bytes",
        config.sample_rate, config.ms_per_char, config.min_chunk_bytes, config.max_chunk_bytes
    );

    let addr = config.bind_addr();
    let state = AppState::new(config);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
