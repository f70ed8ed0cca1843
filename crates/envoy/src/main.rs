mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A local .env may carry PARLEY_SERVER_URL; read it before parsing args.
    dotenvy::dotenv().ok();

    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    cli::run(args).await
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "parley_envoy=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
