use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "logwide", about = "Write log events to a wide-column store with reverse indexes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write newline-delimited JSON events
    Ingest(IngestArgs),
    /// Validate an output configuration
    Check(CheckArgs),
}

#[derive(Args, Clone, Debug)]
pub struct IngestArgs {
    /// Path to the TOML output config
    #[arg(long, env = "LOGWIDE_CONFIG")]
    pub config: PathBuf,

    /// Event file, one JSON object per line; `-` reads stdin
    #[arg(long, default_value = "-")]
    pub input: String,

    /// Read every written row back and print it
    #[arg(long)]
    pub readback: bool,
}

#[derive(Args, Clone, Debug)]
pub struct CheckArgs {
    /// Path to the TOML output config
    #[arg(long, env = "LOGWIDE_CONFIG")]
    pub config: PathBuf,
}
