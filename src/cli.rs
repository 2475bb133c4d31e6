use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "devroom-relay")]
#[command(version)]
#[command(about = "Realtime project chat relay with an inline AI assistant")]
pub struct Args {
    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub bind: Option<String>,

    /// Base URL of the project backend used for membership lookups
    #[arg(long)]
    pub directory_url: Option<String>,

    /// Generative model identifier
    #[arg(long)]
    pub model: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}
