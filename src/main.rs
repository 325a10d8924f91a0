use clap::Parser;
use tracing_subscriber::EnvFilter;

use chronod::cli::{self, Cli};
use chronod::config::Config;

fn main() {
    let cli = Cli::parse();
    let config = Config::from_env();

    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    rt.block_on(async {
        if let Err(e) = cli::dispatch(&cli, config).await {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    });
}
