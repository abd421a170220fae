// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "privacy-mask")]
#[command(about = "Rasterize and apply camera privacy masks")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rasterize the static masks of a config into a bitmask image
    Rasterize {
        /// Privacy mask config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output frame width in pixels
        #[arg(long)]
        width: u32,

        /// Output frame height in pixels
        #[arg(long)]
        height: u32,

        /// Where to write the quarter-resolution bitmask (PNG)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply the static masks of a config to an image
    Blend {
        /// Privacy mask config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Input image
        #[arg(short, long)]
        input: PathBuf,

        /// Output image (PNG)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check a config against the engine's invariants
    Validate {
        /// Privacy mask config (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=privacy_mask=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rasterize {
            config,
            width,
            height,
            output,
        } => cli::rasterize(&config, width, height, output.as_deref()),
        Commands::Blend {
            config,
            input,
            output,
        } => cli::blend_image(&config, &input, &output),
        Commands::Validate { config } => cli::validate(&config),
    }
}
