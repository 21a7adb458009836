//! xtask automation tool for runhost
//!
//! Development tasks that don't belong in the shipped crates.

#![allow(unused_crate_dependencies)]

mod gen_schemas;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development automation tool for runhost")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write JSON schemas for the wire types
    GenSchemas {
        /// Output directory
        #[arg(long, default_value = "schemas")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::GenSchemas { out } => gen_schemas::run(&out),
    }
}
