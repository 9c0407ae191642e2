use anyhow::Result;
use dialpool::cli::{self, args::Cli};

fn main() -> Result<()> {
    // Pick up a local .env before clap reads DIALPOOL_* defaults
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();

    // Initialize logging
    cli::init_logging(&cli.log_level);

    // Workers in `bench` share the pool across threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(cli::run(cli))
}
