#![warn(missing_docs)]
//! ROFS mount daemon: expose one file through a read-only FUSE mount.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rofs_fuse::backing::BackingFile;
use rofs_fuse::config::RofsConfig;
use rofs_fuse::filesystem::SingleFileTree;
use rofs_fuse::mount::{options_to_fuser, parse_mount_options, validate_mountpoint};
use rofs_fuse::pipe_pool::PipePool;
use rofs_fuse::responder::ReadStrategy;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rofs")]
#[command(about = "Read-only single-file FUSE passthrough", long_about = None)]
struct Cli {
    /// Mount point directory.
    #[arg(long)]
    mount: PathBuf,

    /// Backing data file to expose.
    #[arg(long)]
    data: PathBuf,

    /// Read-serving strategy: passthrough or overlay.
    #[arg(long, default_value = "overlay")]
    strategy: ReadStrategy,

    /// Comma-separated mount options (allow_other, allow_root,
    /// auto_unmount).
    #[arg(short, long, default_value = "")]
    options: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    validate_mountpoint(&cli.mount).context("invalid mount point")?;
    let mount_opts = parse_mount_options(&cli.options)?;

    // Mount-time fatal class: backing file, pipe pool, then the mount
    // itself. No retry on any of these.
    let backing = Arc::new(BackingFile::open(&cli.data).context("cannot open data file")?);
    let config = RofsConfig {
        strategy: cli.strategy,
        ..Default::default()
    };
    let pipes = PipePool::new(config.pool_size, config.pipe_capacity)
        .context("cannot create pipe pool")?;

    tracing::info!(
        "mounting {} at {} (strategy {:?})",
        cli.data.display(),
        cli.mount.display(),
        cli.strategy
    );

    let tree = SingleFileTree::new(backing, pipes, config);
    let session = fuser::spawn_mount2(tree, &cli.mount, &options_to_fuser(&mount_opts))
        .context("fuse mount failed")?;

    tokio::signal::ctrl_c().await.context("signal handler")?;
    tracing::info!("unmounting {}", cli.mount.display());

    // Dropping the session unmounts; join surfaces unmount errors once.
    session.join();
    Ok(())
}
