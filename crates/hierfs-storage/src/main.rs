#![warn(missing_docs)]

//! HierFS storage node

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use hierfs_storage::{StorageConfig, StorageServer};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hierfs-storage", about = "HierFS storage node", version)]
struct Args {
    /// Configuration file (.toml or .json).
    #[arg(short, long, env = "HIERFS_STORAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Local directory holding the files.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Address of the Client interface.
    #[arg(long)]
    client_addr: Option<SocketAddr>,

    /// Address of the Command interface.
    #[arg(long)]
    command_addr: Option<SocketAddr>,

    /// Registration interface of the naming node.
    #[arg(long)]
    naming_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => StorageConfig::from_file(path)?,
        None => StorageConfig::default(),
    };
    if let Some(root) = args.root {
        config.root = root;
    }
    if let Some(addr) = args.client_addr {
        config.client_addr = addr;
    }
    if let Some(addr) = args.command_addr {
        config.command_addr = addr;
    }
    if let Some(addr) = args.naming_addr {
        config.naming_addr = addr;
    }
    config.validate()?;

    tracing::info!("HierFS storage node starting...");
    let server = StorageServer::start(&config).await?;

    tokio::signal::ctrl_c().await?;
    server.stop();
    Ok(())
}
