//! CLI module for dialpool
//!
//! Exercises a managed pool against a line-protocol backend (Redis-style
//! `PING` / `AUTH` / `ECHO`) from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Fill the pool and show endpoint health
//! dialpool --config pools.yaml --cluster cache check
//!
//! # 10k PINGs from 32 concurrent workers, JSON report
//! dialpool --config pools.yaml bench -n 10000 --concurrency 32 --format json
//!
//! # Configure from the environment instead of a file
//! DIALPOOL_ADDRS=10.0.0.1:6379,10.0.0.2:6379 dialpool check
//! ```

pub mod args;
pub mod commands;

use crate::config;
use crate::core::Manager;
use crate::net::LineConnector;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use args::{Cli, Commands};

/// Initialize logging to stderr
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the CLI application
pub async fn run(cli: Cli) -> Result<()> {
    cli.validate().context("Invalid arguments")?;
    debug!("CLI arguments: {:?}", cli);

    let config = config::load_config(cli.config.as_deref(), cli.cluster.as_deref())?;
    let (name, cluster) = config
        .get_cluster(cli.cluster.as_deref())
        .ok_or_else(|| anyhow::anyhow!("No cluster found in configuration"))?;

    let manager = Manager::builder(cluster.addrs.iter().cloned(), LineConnector)
        .name(name)
        .config(cluster.pool_config())
        .build()
        .await
        .with_context(|| format!("Failed to start connection pool for cluster '{}'", name))?;
    let manager = Arc::new(manager);

    match cli.command {
        Commands::Check => {
            commands::cmd_check(&manager, cli.format).await?;
        }
        Commands::Bench {
            requests,
            concurrency,
            command,
        } => {
            commands::cmd_bench(
                Arc::clone(&manager),
                requests,
                concurrency,
                &command,
                cli.format,
            )
            .await?;
        }
    }

    manager.shutdown();
    info!("Command completed successfully");
    Ok(())
}
