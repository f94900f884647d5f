use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentLogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl PaymentLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentLogLevel::Info => "info",
            PaymentLogLevel::Warning => "warning",
            PaymentLogLevel::Error => "error",
            PaymentLogLevel::Critical => "critical",
        }
    }
}

/// One row of the append-only payment audit trail. This log is the only
/// record operators have of money movement, so every state transition in the
/// webhook intake and the weekly batch emits at least one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLogEvent {
    pub payment_intent_id: Option<String>,
    pub event_type: String,
    pub level: PaymentLogLevel,
    pub message: String,
    pub source: String,
    pub task_id: Option<Uuid>,
    pub buyer_id: Option<Uuid>,
    pub worker_id: Option<Uuid>,
    pub amount: Option<Decimal>,
    pub details: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentLogEvent {
    pub fn new(
        source: &str,
        event_type: &str,
        level: PaymentLogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            payment_intent_id: None,
            event_type: event_type.to_string(),
            level,
            message: message.into(),
            source: source.to_string(),
            task_id: None,
            buyer_id: None,
            worker_id: None,
            amount: None,
            details: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn payment_intent(mut self, id: &str) -> Self {
        self.payment_intent_id = Some(id.to_string());
        self
    }

    pub fn task(mut self, id: Uuid) -> Self {
        self.task_id = Some(id);
        self
    }

    pub fn buyer(mut self, id: Uuid) -> Self {
        self.buyer_id = Some(id);
        self
    }

    pub fn worker(mut self, id: Uuid) -> Self {
        self.worker_id = Some(id);
        self
    }

    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}
