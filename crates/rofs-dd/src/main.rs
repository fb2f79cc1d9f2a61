#![warn(missing_docs)]
//! Buffered block copy command.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rofs-dd")]
#[command(about = "Copy all bytes from one file to another", long_about = None)]
struct Cli {
    /// Input file.
    #[arg(long = "if")]
    input: PathBuf,

    /// Output file (must exist; bytes are appended).
    #[arg(long = "of")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let copied = rofs_dd::copy_blocks(&cli.input, &cli.output)?;
    println!("copied {} bytes", copied);
    Ok(())
}
