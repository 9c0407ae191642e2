use clap::{Parser, Subcommand};

/// dialpool - Managed connection pool with endpoint failover
#[derive(Parser, Debug)]
#[command(name = "dialpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path (falls back to DIALPOOL_* environment variables)
    #[arg(long, global = true, env = "DIALPOOL_CONFIG")]
    pub config: Option<String>,

    /// Cluster to use from config
    #[arg(long, global = true, env = "DIALPOOL_CLUSTER")]
    pub cluster: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fill the pool and report endpoint health and pool statistics
    Check,

    /// Send commands through the pool from concurrent workers
    Bench {
        /// Total number of commands to send
        #[arg(short = 'n', long, default_value = "1000")]
        requests: usize,

        /// Number of concurrent workers
        #[arg(short, long, default_value = "8")]
        concurrency: usize,

        /// Command line sent for every request
        #[arg(long, default_value = "PING")]
        command: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Commands::Bench {
            requests,
            concurrency,
            command,
        } = &self.command
        {
            if *requests == 0 {
                anyhow::bail!("Request count must be greater than 0");
            }
            if *concurrency == 0 {
                anyhow::bail!("Concurrency must be greater than 0");
            }
            if command.trim().is_empty() {
                anyhow::bail!("Command cannot be empty");
            }
        }

        Ok(())
    }
}
