use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mesh_node::cli;
use mesh_node::config::{FileConfig, NodePaths, load_config};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "meshnode")]
#[command(about = "Peer-to-peer secure messaging mesh node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.meshnode)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load or generate the device key pair and print its fingerprints
    Keygen(KeygenArgs),

    /// Render text as a terminal QR code
    Qr(QrArgs),

    /// Print the acoustic tone schedule for text
    Tones(TonesArgs),

    /// Join the mesh over the relay, chatting on stdin/stdout
    Relay(RelayArgs),
}

#[derive(Parser)]
struct KeygenArgs {
    /// Replace the stored key pair with a fresh one
    #[arg(long)]
    reset: bool,
}

#[derive(Parser)]
struct QrArgs {
    text: String,
}

#[derive(Parser)]
struct TonesArgs {
    text: String,

    /// Bit duration in milliseconds (defaults to [acoustic] bit_duration_ms)
    #[arg(long)]
    bit_ms: Option<u64>,
}

#[derive(Parser)]
struct RelayArgs {
    /// Relay WebSocket URL (overrides [relay] url)
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "meshnode=debug,mesh_node=debug,mesh_core=debug,side_channel=debug,info"
    } else {
        "info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let paths = NodePaths::new(cli.data_dir)?;
    let file_config: FileConfig = load_config(&paths.data_dir)
        .extract()
        .with_context(|| format!("invalid config: {}", paths.config_toml_path().display()))?;

    match cli.command {
        Commands::Keygen(args) => cli::keygen_command(&paths, args.reset),
        Commands::Qr(args) => cli::qr_command(&args.text),
        Commands::Tones(args) => {
            let bit_ms = args.bit_ms.unwrap_or(file_config.acoustic.bit_duration_ms);
            cli::tones_command(&args.text, bit_ms)
        }
        Commands::Relay(args) => cli::relay_command(&paths, file_config, args.url).await,
    }
}
