use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Notification, PaymentIntent, Task};

/// Persists an in-app notification for a user. Delivery beyond the row (the
/// notification feed UI) is outside the payments core.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn create(
        &self,
        user_id: Uuid,
        kind: &str,
        message: &str,
        task_id: Option<Uuid>,
    ) -> anyhow::Result<Notification>;
}

/// Everything the receipt email needs, assembled by the caller so the mailer
/// stays a dumb transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_id: Uuid,
    pub payment_intent_id: String,
    pub buyer_name: String,
    pub buyer_email: String,
    pub worker_name: Option<String>,
    pub task_title: String,
    pub task_id: Uuid,
    pub amount: Decimal,
    pub base_amount: Decimal,
    pub platform_fee: Decimal,
    pub processor_fee: Decimal,
    pub date: DateTime<Utc>,
    pub status: String,
}

#[async_trait]
pub trait ReceiptMailer: Send + Sync {
    /// Returns true when the mail was handed off to the provider.
    async fn send_receipt(&self, receipt: &Receipt) -> anyhow::Result<bool>;
}

/// SMS fallback for workers who are not online to see the in-app
/// notification.
#[async_trait]
pub trait OfflineAlerts: Send + Sync {
    async fn check_and_send(
        &self,
        user_id: Uuid,
        name: &str,
        phone: &str,
        message: &str,
        task_id: Uuid,
    ) -> anyhow::Result<bool>;
}

/// Realtime fan-out of ledger events to connected clients.
#[async_trait]
pub trait Realtime: Send + Sync {
    async fn publish_task_created(&self, task: &Task) -> anyhow::Result<()>;
}

/// The payment processor's API surface as the core consumes it. Amounts
/// cross this boundary only as integer minor units.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn retrieve_payment_intent(&self, id: &str) -> anyhow::Result<PaymentIntent>;

    async fn capture_payment_intent(&self, id: &str) -> anyhow::Result<PaymentIntent>;

    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: Value,
    ) -> anyhow::Result<PaymentIntent>;
}

/// Context handed to the payment-protection fallback when a weekly charge
/// fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyChargeContext {
    pub weekly_payment_id: Uuid,
    pub task_id: Uuid,
    pub buyer_id: Uuid,
    pub worker_id: Uuid,
    pub amount: Decimal,
    pub payment_intent_id: Option<String>,
}

/// Platform-covered payout when the buyer's scheduled charge fails.
/// Returns true when the fallback covered the shortfall and the worker was
/// paid by the platform.
#[async_trait]
pub trait PaymentProtection: Send + Sync {
    async fn cover_failed_charge(&self, context: &WeeklyChargeContext) -> anyhow::Result<bool>;
}
