//! One-time seeding of the partner collection.
//!
//! Writes the default partner set into the configured store and exits with status 0
//! on success or 1 on failure. Uses the same configuration and environment as the
//! server (`APP_STORE__*`, `FIREBASE_CREDENTIALS`).

use anyhow::Result;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_relay_backend::config::{AppConfig, Secrets};
use voice_relay_backend::store::{build_store, default_partners};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seed_partners=info,voice_relay_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match seed().await {
        Ok(count) => {
            info!(count, "Partners seeded");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Seeding failed");
            ExitCode::FAILURE
        }
    }
}

async fn seed() -> Result<usize> {
    let secrets = Secrets::from_env();
    let config = AppConfig::load()?;

    let client = reqwest::Client::new();
    let store = build_store(
        &config.store,
        secrets.firebase_credentials.as_deref(),
        client,
    )
    .await?;

    info!(
        store = store.name(),
        collection = %config.store.collection,
        "Seeding partner collection"
    );

    let records = store.seed(&config.store.collection, &default_partners()).await?;
    for record in &records {
        info!(id = %record.id, name = %record.name, expertise = %record.expertise, "Stored partner");
    }

    Ok(records.len())
}
