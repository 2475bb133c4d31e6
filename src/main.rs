use std::sync::Arc;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use devroom_relay::ai::AiClient;
use devroom_relay::auth::{ProjectDirectory, TokenVerifier};
use devroom_relay::cli::Args;
use devroom_relay::config::RelayConfig;
use devroom_relay::server::{self, RelayContext};
use devroom_relay::room;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = RelayConfig::resolve(&args)?;

    let directory = match &config.directory_url {
        Some(url) => ProjectDirectory::http(url),
        None => {
            eprintln!(
                "{}",
                "  No --directory-url configured; every project lookup will be rejected."
                    .bright_yellow()
            );
            ProjectDirectory::fixed([])
        }
    };

    let ctx = Arc::new(RelayContext {
        verifier: TokenVerifier::new(config.jwt_secret.as_bytes()),
        directory,
        ai: AiClient::new(config.google_api_key.clone(), config.model.clone()),
        rooms: room::new_room_store(),
    });

    server::serve(&config.bind, config.port, ctx).await
}
