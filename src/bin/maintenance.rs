use std::env;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;

use petlog::{
    config::AppConfig,
    db,
    jobs::{IndexDiaryPayload, JOB_INDEX_DIARY},
    services::{recap::month_bounds, today},
    state::{AppState, Collaborators, Stores},
};

const USAGE: &str = "Usage: maintenance <reindex-diaries | promote-waiting | generate-monthly [YYYY-MM]>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).compact().init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("reindex-diaries") => reindex_diaries(&load_state()?).await?,
        Some("promote-waiting") => {
            let report = load_state()?.scheduler().promote_waiting().await?;
            println!(
                "Processed {} waiting recaps: {} generated, {} skipped, {} failed.",
                report.processed, report.succeeded, report.skipped, report.failed
            );
        }
        Some("generate-monthly") => {
            let reference = match args.next() {
                Some(month) => day_after_month(&month)?,
                None => today(),
            };
            let report = load_state()?
                .scheduler()
                .generate_monthly(reference)
                .await?;
            println!(
                "Processed {} pets: {} recaps generated, {} skipped, {} failed.",
                report.processed, report.succeeded, report.skipped, report.failed
            );
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_state() -> Result<AppState> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let collaborators = Collaborators::from_config(&config)?;
    Ok(AppState::new(config, Stores::postgres(pool), collaborators))
}

/// The monthly batch covers the month before its reference date.
fn day_after_month(raw: &str) -> Result<chrono::NaiveDate> {
    let (year, month) = raw
        .split_once('-')
        .ok_or_else(|| anyhow!("month must look like YYYY-MM"))?;
    let year: i32 = year.parse().context("invalid year")?;
    let month: u32 = month.parse().context("invalid month")?;
    let (_, end) = month_bounds(year, month).ok_or_else(|| anyhow!("invalid month: {raw}"))?;
    end.succ_opt().ok_or_else(|| anyhow!("month out of range: {raw}"))
}

async fn reindex_diaries(state: &AppState) -> Result<()> {
    let ids = state.stores.diaries.diary_ids().await?;
    if ids.is_empty() {
        println!("No diaries found.");
        return Ok(());
    }
    if state.collaborators.vector.is_none() {
        bail!("MILVUS_ENDPOINT is not configured; nothing would be indexed");
    }

    println!("Queueing {} diaries for reindexing…", ids.len());
    for diary_id in ids {
        state
            .stores
            .jobs
            .enqueue(JOB_INDEX_DIARY, json!(IndexDiaryPayload { diary_id }))
            .await
            .with_context(|| format!("failed to enqueue diary {diary_id}"))?;
    }
    println!("Reindex jobs queued.");
    Ok(())
}
