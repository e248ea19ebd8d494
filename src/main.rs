//! bidib - BiDiB serial link tool
//!
//! Encodes and decodes link packets, replays captured traffic through the
//! receive path and prints the effective engine configuration.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bidib")]
#[command(about = "Packet tool for the BiDiB serial link")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode one message as a framed packet (hex)
    Encode {
        /// Node address, dotted (e.g. 1.2), 0 for the interface
        #[arg(short, long, default_value = "0")]
        address: String,

        /// Message type: number (0x07) or name (SYS_PING)
        #[arg(short = 't', long = "type")]
        msg_type: String,

        /// Sequence number
        #[arg(short, long, default_value = "1")]
        seq: u8,

        /// Payload as hex
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// Decode packets from hex
    Decode {
        /// Raw link bytes as hex
        hex: Option<String>,

        /// Read raw link bytes from a binary file instead
        #[arg(short, long, conflicts_with = "hex")]
        file: Option<PathBuf>,

        /// Print one JSON object per message
        #[arg(long)]
        json: bool,
    },

    /// Feed captured inbound traffic through the receive path
    Replay {
        /// Raw link bytes as hex
        hex: Option<String>,

        /// Read raw link bytes from a binary file instead
        #[arg(short, long, conflicts_with = "hex")]
        file: Option<PathBuf>,
    },

    /// Print the effective engine configuration as YAML
    Config {
        /// Configuration file (defaults to BIDIB_CONFIG, then built-in defaults)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match commands::execute(cli.command) {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            tracing::error!("{}", e);
            Err(e)
        }
    }
}
