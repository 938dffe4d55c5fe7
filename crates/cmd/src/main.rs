// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::commands::{MountArgs, config_command, mount_command, tree_command};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "proctree")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the demo tree and serve it until interrupted
    Mount(MountArgs),
    /// Print the demo tree without mounting it
    Tree {
        /// YAML options file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the effective options as YAML
    Config {
        /// YAML options file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Mount(args) => mount_command(args).await,
        Commands::Tree { config } => tree_command(config.as_deref(), &mut io::stdout().lock()),
        Commands::Config { config } => config_command(config.as_deref(), &mut io::stdout().lock()),
    }
}
