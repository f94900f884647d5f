use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskKind {
    Virtual,
    InPerson,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Virtual => "virtual",
            TaskKind::InPerson => "in_person",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "virtual" => Ok(TaskKind::Virtual),
            "in_person" => Ok(TaskKind::InPerson),
            other => Err(DomainError::InvalidStatus {
                entity: "task_kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Open,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
    Disputed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Disputed => "disputed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "open" => Ok(TaskStatus::Open),
            "assigned" => Ok(TaskStatus::Assigned),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "disputed" => Ok(TaskStatus::Disputed),
            other => Err(DomainError::InvalidStatus {
                entity: "task",
                value: other.to_string(),
            }),
        }
    }
}

/// A unit of work between one buyer and one worker. At most one task may
/// reference a given payment intent; the unique constraint on
/// `payment_intent_id` is the idempotency anchor for webhook materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub buyer_id: Uuid,
    pub worker_id: Option<Uuid>,
    pub price: Decimal,
    pub estimated_hours: Option<Decimal>,
    pub weekly_hour_limit: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub address: Option<String>,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Authorized,
    Captured,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Authorized => "authorized",
            TransactionStatus::Captured => "captured",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "pending" => Ok(TransactionStatus::Pending),
            "authorized" => Ok(TransactionStatus::Authorized),
            "captured" => Ok(TransactionStatus::Captured),
            "failed" => Ok(TransactionStatus::Failed),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(DomainError::InvalidStatus {
                entity: "transaction",
                value: other.to_string(),
            }),
        }
    }
}

/// Financial record of a single charge. Exactly one transaction exists per
/// payment intent; mutated only to advance status or mark the receipt sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub payment_intent_id: String,
    pub buyer_id: Uuid,
    pub worker_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub amount: Decimal,
    pub base_amount: Decimal,
    pub platform_fee: Decimal,
    pub processor_fee: Decimal,
    pub status: TransactionStatus,
    pub capture_method: String,
    pub metadata: Value,
    pub receipt_sent: bool,
    pub receipt_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WeeklyPaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WeeklyPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeeklyPaymentStatus::Pending => "pending",
            WeeklyPaymentStatus::Processing => "processing",
            WeeklyPaymentStatus::Completed => "completed",
            WeeklyPaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "pending" => Ok(WeeklyPaymentStatus::Pending),
            "processing" => Ok(WeeklyPaymentStatus::Processing),
            "completed" => Ok(WeeklyPaymentStatus::Completed),
            "failed" => Ok(WeeklyPaymentStatus::Failed),
            other => Err(DomainError::InvalidStatus {
                entity: "weekly_payment",
                value: other.to_string(),
            }),
        }
    }
}

/// Pay period record linking an approved time report to its charge.
/// Status advances monotonically pending -> processing -> completed|failed;
/// immutable once completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyPayment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub time_report_id: Uuid,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub hours_worked: Decimal,
    pub hourly_rate: Decimal,
    pub base_amount: Decimal,
    pub platform_fee: Decimal,
    pub processor_fee: Decimal,
    pub total_amount: Decimal,
    pub worker_payout: Decimal,
    pub payment_intent_id: Option<String>,
    pub status: WeeklyPaymentStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lightweight view of a marketplace user, resolved from the account store.
/// `hourly_rate` is only set for workers who configured one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyRef {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub hourly_rate: Option<Decimal>,
    pub wallet_balance: Decimal,
}

/// Approved time report awaiting payment; owned by the time-tracking side,
/// the payments core only flips `payment_processed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedTimeReport {
    pub id: Uuid,
    pub task_id: Uuid,
    pub buyer_id: Uuid,
    pub worker_id: Uuid,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub hours_worked: Decimal,
}

/// Offer a worker made on an open task, resolved when materializing an
/// offer-purchase payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRef {
    pub id: Uuid,
    pub task_title: String,
    pub task_description: String,
    pub category: String,
    pub kind: TaskKind,
    pub price: Decimal,
    pub estimated_hours: Option<Decimal>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub message: String,
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    RequiresCapture,
    Processing,
    Succeeded,
    Canceled,
}

impl PaymentIntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentIntentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentIntentStatus::RequiresConfirmation => "requires_confirmation",
            PaymentIntentStatus::RequiresAction => "requires_action",
            PaymentIntentStatus::RequiresCapture => "requires_capture",
            PaymentIntentStatus::Processing => "processing",
            PaymentIntentStatus::Succeeded => "succeeded",
            PaymentIntentStatus::Canceled => "canceled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "requires_payment_method" => Ok(PaymentIntentStatus::RequiresPaymentMethod),
            "requires_confirmation" => Ok(PaymentIntentStatus::RequiresConfirmation),
            "requires_action" => Ok(PaymentIntentStatus::RequiresAction),
            "requires_capture" => Ok(PaymentIntentStatus::RequiresCapture),
            "processing" => Ok(PaymentIntentStatus::Processing),
            "succeeded" => Ok(PaymentIntentStatus::Succeeded),
            "canceled" => Ok(PaymentIntentStatus::Canceled),
            other => Err(DomainError::InvalidStatus {
                entity: "payment_intent",
                value: other.to_string(),
            }),
        }
    }
}

/// Processor-side view of a charge, as returned by the payment processor
/// collaborator. Amounts are integer minor units; conversion happens at the
/// fee-engine boundary and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: PaymentIntentStatus,
    pub amount_minor: i64,
    pub currency: String,
    pub capture_method: String,
    pub metadata: Value,
}
