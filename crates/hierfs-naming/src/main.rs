#![warn(missing_docs)]

//! HierFS naming node

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use hierfs_naming::{NamingConfig, NamingServer};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hierfs-naming", about = "HierFS naming node", version)]
struct Args {
    /// Configuration file (.toml or .json).
    #[arg(short, long, env = "HIERFS_NAMING_CONFIG")]
    config: Option<PathBuf>,

    /// Address of the client Service interface.
    #[arg(long)]
    service_addr: Option<SocketAddr>,

    /// Address of the storage Registration interface.
    #[arg(long)]
    registration_addr: Option<SocketAddr>,

    /// Shared locks of a file between two replications.
    #[arg(long)]
    replication_threshold: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => NamingConfig::from_file(path)?,
        None => NamingConfig::default(),
    };
    if let Some(addr) = args.service_addr {
        config.service_addr = addr;
    }
    if let Some(addr) = args.registration_addr {
        config.registration_addr = addr;
    }
    if let Some(threshold) = args.replication_threshold {
        config.replication_threshold = threshold;
    }
    config.validate()?;

    tracing::info!("HierFS naming node starting...");
    let server = NamingServer::start(&config).await?;

    tokio::signal::ctrl_c().await?;
    server.stop();
    Ok(())
}
