use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use petlog::{
    config::AppConfig,
    db,
    state::{AppState, Collaborators, Stores},
    Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 2,
        waiting_interval_secs = config.recap_waiting_interval.as_secs(),
        monthly_hour = config.recap_monthly_hour,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 2)?;
    let migration_pool = pool.clone();
    tokio::task::spawn_blocking(move || db::run_migrations(&migration_pool))
        .await
        .context("migration task panicked")??;

    let collaborators = Collaborators::from_config(&config)?;
    let state = AppState::new(config, Stores::postgres(pool), collaborators);
    let worker = Worker::from_state(&state, Duration::from_secs(2));
    let scheduler = state.scheduler();

    tokio::select! {
        _ = worker.run() => {}
        _ = scheduler.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
