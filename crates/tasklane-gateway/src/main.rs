use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde_json::{Value, json};
use sqlx::PgPool;
use tracing::{error, info, warn};

use tasklane_ledger::PaymentPipeline;
use tasklane_platform::{
    HttpMailer, HttpOfflineAlerts, HttpPaymentProtection, RedisBus, ServiceConfig, StripeClient,
    connect_database, load_fee_config, parse_event, verify_signature,
};
use tasklane_store::{PgLedgerStore, PgNotifier, PgPaymentLog, PgPayoutStore};

#[derive(Clone)]
struct AppState {
    pipeline: PaymentPipeline,
    pool: PgPool,
    webhook_secret: String,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tasklane_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let pipeline = PaymentPipeline {
        store: Arc::new(PgLedgerStore::new(pool.clone())),
        payouts: Arc::new(PgPayoutStore::new(pool.clone())),
        audit: Arc::new(PgPaymentLog::new(pool.clone())),
        notifier: Arc::new(PgNotifier::new(pool.clone(), redis.clone())),
        mailer: Arc::new(HttpMailer::from_env()?),
        alerts: Arc::new(HttpOfflineAlerts::from_env()?),
        realtime: Arc::new(redis.clone()),
        processor: Arc::new(StripeClient::new(&config.stripe)?),
        protection: Arc::new(HttpPaymentProtection::from_env()?),
    };

    let state = AppState {
        pipeline,
        pool,
        webhook_secret: config.stripe.webhook_secret.clone(),
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/webhooks/stripe", post(stripe_webhook))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Webhook entry point. Rejections (bad signature, unparseable body) return
/// 400 so the processor stops retrying; a storage failure returns 500 so it
/// redelivers later.
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| bad_request("missing stripe-signature header"))?;

    if let Err(err) = verify_signature(&body, signature, &state.webhook_secret) {
        warn!("webhook signature rejected: {err}");
        return Err(bad_request("invalid signature"));
    }

    let event = parse_event(&body).map_err(|err| {
        warn!("webhook body rejected: {err:#}");
        bad_request("invalid event payload")
    })?;

    info!(
        "webhook {} ({}) for {}",
        event.id, event.event_type, event.payment_intent.id
    );

    let config = load_fee_config(&state.pool).await;
    state
        .pipeline
        .handle_event(&event.event_type, &event.payment_intent, &config)
        .await
        .map_err(|err| {
            error!("webhook {} failed: {err:#}", event.id);
            internal_error(&err)
        })?;

    Ok(Json(json!({"received": true})))
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
}

fn internal_error(err: &anyhow::Error) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "event processing failed",
            "details": format!("{err:#}"),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_carry_details() {
        let err = anyhow::anyhow!("pool timed out").context("storing the transaction failed");
        let (status, Json(body)) = internal_error(&err);

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "event processing failed");
        let details = body["details"].as_str().unwrap();
        assert!(details.contains("storing the transaction failed"));
        assert!(details.contains("pool timed out"));
    }
}
