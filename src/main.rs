//! Fairdeck command line
//!
//! Runs pool maintenance, inspects and fills the commitment pool, and
//! replays revealed outcomes.

use clap::{Parser, Subcommand, ValueEnum};
use fairdeck::{
    shuffle::FairnessVersion, ConfigLoader, FairdeckConfig, FairnessFactory, Verifier,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fairdeck")]
#[command(about = "Provably-fair commitment pool and session fairness engine", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Preset used when no configuration file is given
    #[arg(long, value_enum, default_value = "development")]
    preset: Preset,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    Development,
    Testing,
    Production,
}

impl Preset {
    fn config(self) -> FairdeckConfig {
        match self {
            Preset::Development => FairdeckConfig::development(),
            Preset::Testing => FairdeckConfig::testing(),
            Preset::Production => FairdeckConfig::production(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep the pool filled and swept until Ctrl-C
    Serve,

    /// Print pool status as JSON
    Status,

    /// Forge and anchor seeds now
    Mint {
        #[arg(long, default_value = "10")]
        count: u64,
    },

    /// Replay an outcome from a revealed server seed
    Verify {
        #[arg(long)]
        server_seed: String,

        /// Published commitment hash
        #[arg(long)]
        hash: String,

        #[arg(long)]
        client_seed: String,

        #[arg(long)]
        nonce: u64,

        #[arg(long, default_value = "52")]
        items: usize,

        /// Algorithm tag (v1 or v2); missing means v1
        #[arg(long)]
        version: Option<String>,

        /// Produced deal to compare against, comma-separated
        #[arg(long, value_delimiter = ',')]
        outcome: Option<Vec<usize>>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_base(args.preset.config());
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("fairdeck={}", config.monitoring.log_level.as_filter()).into()),
        )
        .init();

    match args.command {
        Command::Verify {
            server_seed,
            hash,
            client_seed,
            nonce,
            items,
            version,
            outcome,
        } => {
            let version = FairnessVersion::from_tag(version.as_deref());
            let report = match outcome {
                Some(produced) => {
                    Verifier::verify_outcome(&server_seed, &hash, &client_seed, nonce, version, &produced)?
                }
                None => Verifier::verify(&server_seed, &hash, &client_seed, nonce, items, version),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Status => {
            let services = FairnessFactory::build(config, None)?;
            println!("{}", serde_json::to_string_pretty(&services.pool.status()?)?);
        }
        Command::Mint { count } => {
            let services = FairnessFactory::build(config, None)?;
            let report = services.pool.refill(count).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve => {
            let services = FairnessFactory::build(config, None)?;
            let maintenance = services.spawn_maintenance();

            tracing::info!("Fairness engine running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;

            maintenance.stop();
            let status = services.pool.status()?;
            tracing::info!(
                available = status.available,
                claimed = status.claimed,
                healthy = status.healthy,
                "Shutting down"
            );
            if services.config.monitoring.enable_metrics {
                println!("{}", services.metrics.to_prometheus_format());
            }
        }
    }

    Ok(())
}
