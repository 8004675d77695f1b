//! pgrepo - PostgreSQL database provisioning and pool checks.

use clap::Parser;
use pgrepo::config::{Command, Config};
use pgrepo::{PgResult, Provisioner, Repository, Settings};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(command: Command, settings: Settings) -> PgResult<()> {
    match command {
        Command::Create {
            database,
            advisory_lock,
        } => {
            let created = Provisioner::new(settings)
                .with_advisory_lock(advisory_lock)
                .create_db(&database)
                .await?;
            info!(database = %database, created, "create finished");
            println!("{}", if created { "created" } else { "exists" });
        }
        Command::Drop {
            database,
            advisory_lock,
        } => {
            let dropped = Provisioner::new(settings)
                .with_advisory_lock(advisory_lock)
                .drop_db(&database)
                .await?;
            info!(database = %database, dropped, "drop finished");
            println!("{}", if dropped { "dropped" } else { "absent" });
        }
        Command::Ensure { database } => {
            let mut ensured = Provisioner::new(settings).ensure_db(&database).await?;
            let health = ensured.repository.health_check().await;
            ensured.repository.stop().await?;
            health?;
            println!("{}", if ensured.created { "created" } else { "exists" });
        }
        Command::Check { alias } => {
            let mut repository = Repository::new(&alias, &settings);
            repository.start().await?;
            let health = repository.health_check().await;
            repository.stop().await?;
            health?;
            println!("ok");
        }
        Command::ShowConfig { alias } => {
            let doc = settings.describe(&alias);
            let rendered = serde_json::to_string_pretty(&doc)
                .map_err(|e| pgrepo::PgError::internal(e.to_string()))?;
            println!("{}", rendered);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    let settings = match config.settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Failed to load settings");
            return Err(e.into());
        }
    };

    if let Err(e) = run(config.command.clone(), settings).await {
        error!(error = %e, auth = e.is_auth(), "Command failed");
        return Err(e.into());
    }

    Ok(())
}
