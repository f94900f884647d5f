use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use redis::Msg;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info};

use tasklane_payouts::{BatchWindow, WeeklyBatch};
use tasklane_platform::{
    HttpMailer, RedisBus, ServiceConfig, StripeClient, connect_database, load_fee_config,
};
use tasklane_store::{PgNotifier, PgPaymentLog, PgPayoutStore};

/// Payload of a `payouts.run` message. An empty body runs the default
/// window.
#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    window: BatchWindow,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tasklane_payouts=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let batch = WeeklyBatch {
        store: Arc::new(PgPayoutStore::new(pool.clone())),
        audit: Arc::new(PgPaymentLog::new(pool.clone())),
        notifier: Arc::new(PgNotifier::new(pool.clone(), redis.clone())),
        mailer: Arc::new(HttpMailer::from_env()?),
        processor: Arc::new(StripeClient::new(&config.stripe)?),
    };

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe("payouts.run").await?;
    let mut messages = pubsub.on_message();

    info!("payouts worker subscribed to payouts.run");

    loop {
        let msg = messages
            .next()
            .await
            .context("payouts.run stream ended unexpectedly")?;
        if let Err(err) = handle_message(&batch, &pool, &redis, msg).await {
            error!("failed to process run request: {err:#}");
        }
    }
}

async fn handle_message(
    batch: &WeeklyBatch,
    pool: &PgPool,
    redis: &RedisBus,
    msg: Msg,
) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let request: RunRequest = if payload.trim().is_empty() {
        RunRequest::default()
    } else {
        serde_json::from_str(&payload).context("invalid payouts.run payload")?
    };

    let config = load_fee_config(pool).await;
    let outcome = batch
        .run(request.window, &config, Utc::now().date_naive())
        .await?;

    info!(
        "payouts run finished: {} processed, {} error(s)",
        outcome.processed.len(),
        outcome.errors.len()
    );
    redis.publish_json("payouts.completed", &outcome).await?;

    Ok(())
}
