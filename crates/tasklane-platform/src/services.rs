//! HTTP clients for the internal services the payments core delegates to:
//! receipt email, offline SMS alerts, and payment protection. Each client is
//! optional; when its URL is not configured the call reports "not delivered"
//! instead of failing the caller.

use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use tasklane_core::{OfflineAlerts, PaymentProtection, Receipt, ReceiptMailer, WeeklyChargeContext};

const SERVICE_TIMEOUT_MS: u64 = 10_000;

fn service_client() -> Result<Client> {
    Client::builder()
        .timeout(std::time::Duration::from_millis(SERVICE_TIMEOUT_MS))
        .build()
        .context("failed to build service http client")
}

async fn post_json(http: &Client, url: &str, body: &Value) -> Result<Value> {
    let response = http
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        bail!("{url} returned {status}: {body}");
    }
    Ok(body)
}

/// Posts receipts to the email service. `EMAIL_SERVICE_URL` unset means
/// receipts are skipped (reported as not sent, never as an error).
pub struct HttpMailer {
    http: Client,
    base_url: Option<String>,
}

impl HttpMailer {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("EMAIL_SERVICE_URL").ok();
        if base_url.is_none() {
            warn!("EMAIL_SERVICE_URL not set, receipt emails disabled");
        }
        Ok(Self {
            http: service_client()?,
            base_url,
        })
    }
}

#[async_trait::async_trait]
impl ReceiptMailer for HttpMailer {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<bool> {
        let Some(base_url) = &self.base_url else {
            return Ok(false);
        };
        let url = format!("{base_url}/send-receipt");
        let body = post_json(&self.http, &url, &serde_json::to_value(receipt)?).await?;
        Ok(body
            .get("sent")
            .and_then(Value::as_bool)
            .unwrap_or(true))
    }
}

/// Asks the SMS service to text a user who is not online. The service owns
/// the presence check; we only hand it the message.
pub struct HttpOfflineAlerts {
    http: Client,
    base_url: Option<String>,
}

impl HttpOfflineAlerts {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("SMS_SERVICE_URL").ok();
        if base_url.is_none() {
            warn!("SMS_SERVICE_URL not set, offline alerts disabled");
        }
        Ok(Self {
            http: service_client()?,
            base_url,
        })
    }
}

#[async_trait::async_trait]
impl OfflineAlerts for HttpOfflineAlerts {
    async fn check_and_send(
        &self,
        user_id: Uuid,
        name: &str,
        phone: &str,
        message: &str,
        task_id: Uuid,
    ) -> Result<bool> {
        let Some(base_url) = &self.base_url else {
            return Ok(false);
        };
        let url = format!("{base_url}/check-and-alert");
        let body = post_json(
            &self.http,
            &url,
            &json!({
                "user_id": user_id,
                "name": name,
                "phone": phone,
                "message": message,
                "task_id": task_id,
            }),
        )
        .await?;
        Ok(body.get("sent").and_then(Value::as_bool).unwrap_or(false))
    }
}

/// Client for the payment-protection service that decides whether the
/// platform covers a failed weekly charge. No URL configured means no
/// coverage.
pub struct HttpPaymentProtection {
    http: Client,
    base_url: Option<String>,
}

impl HttpPaymentProtection {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("PAYMENT_PROTECTION_URL").ok();
        if base_url.is_none() {
            warn!("PAYMENT_PROTECTION_URL not set, payment protection disabled");
        }
        Ok(Self {
            http: service_client()?,
            base_url,
        })
    }
}

#[async_trait::async_trait]
impl PaymentProtection for HttpPaymentProtection {
    async fn cover_failed_charge(&self, context: &WeeklyChargeContext) -> Result<bool> {
        let Some(base_url) = &self.base_url else {
            return Ok(false);
        };
        let url = format!("{base_url}/cover-failed-charge");
        let body = post_json(&self.http, &url, &serde_json::to_value(context)?).await?;
        Ok(body
            .get("covered")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}
