use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::TaskKind;

/// Classified purpose of a payment, decoded once at webhook entry from the
/// processor's flat string-map metadata. Downstream code dispatches on this
/// union instead of re-inspecting raw metadata keys.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentPurpose {
    /// Buyer accepted a worker's offer on an open task; the offer carries the
    /// task details and agreed price.
    OfferPurchase {
        offer_id: Uuid,
        buyer_id: Uuid,
        worker_id: Uuid,
    },
    /// Buyer booked a worker directly; all task details ride in the metadata.
    DirectBooking(BookingRequest),
    /// Payment for a task that already exists (task + offer pair in the
    /// metadata): only the transaction status moves, no new task.
    TaskStatusUpdate { task_id: Uuid, offer_id: Uuid },
    /// Recurring weekly charge raised by the batch processor.
    WeeklyCharge { weekly_payment_id: Uuid },
}

/// Task details a direct booking carries through the processor metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub buyer_id: Uuid,
    pub worker_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub kind: TaskKind,
    pub base_amount: Decimal,
    pub estimated_hours: Option<Decimal>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub address: Option<String>,
    pub weekly_hour_limit: Option<i32>,
}

impl PaymentPurpose {
    /// Decode from the processor metadata blob. Values arrive as strings
    /// regardless of their logical type.
    pub fn from_metadata(metadata: &Value) -> Result<Self, DomainError> {
        // A pre-existing task + offer pair always means status-update-only,
        // whatever the declared type says.
        if metadata.get("task_id").is_some() && metadata.get("offer_id").is_some() {
            return Ok(PaymentPurpose::TaskStatusUpdate {
                task_id: uuid_field(metadata, "task_id")?,
                offer_id: uuid_field(metadata, "offer_id")?,
            });
        }

        let purpose = str_field(metadata, "type")?;
        match purpose {
            "offer_purchase" => Ok(PaymentPurpose::OfferPurchase {
                offer_id: uuid_field(metadata, "offer_id")?,
                buyer_id: uuid_field(metadata, "buyer_id")?,
                worker_id: uuid_field(metadata, "worker_id")?,
            }),
            "direct_booking" => Ok(PaymentPurpose::DirectBooking(BookingRequest {
                buyer_id: uuid_field(metadata, "buyer_id")?,
                worker_id: uuid_field(metadata, "worker_id")?,
                title: str_field(metadata, "title")?.to_string(),
                description: opt_str_field(metadata, "description").unwrap_or_default(),
                category: str_field(metadata, "category")?.to_string(),
                kind: TaskKind::parse(str_field(metadata, "task_kind")?)?,
                base_amount: decimal_field(metadata, "base_amount")?,
                estimated_hours: opt_decimal_field(metadata, "estimated_hours")?,
                scheduled_at: opt_datetime_field(metadata, "scheduled_at")?,
                address: opt_str_field(metadata, "address"),
                weekly_hour_limit: opt_int_field(metadata, "weekly_hour_limit")?,
            })),
            "weekly_payment" => Ok(PaymentPurpose::WeeklyCharge {
                weekly_payment_id: uuid_field(metadata, "weekly_payment_id")?,
            }),
            other => Err(DomainError::UnknownPaymentPurpose(other.to_string())),
        }
    }

    /// True for charges raised by the weekly batch; failure of these routes
    /// through the payment-protection fallback rather than plain failure.
    pub fn is_recurring(&self) -> bool {
        matches!(self, PaymentPurpose::WeeklyCharge { .. })
    }
}

fn str_field<'a>(metadata: &'a Value, field: &'static str) -> Result<&'a str, DomainError> {
    metadata
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(DomainError::MissingMetadata(field))
}

fn opt_str_field(metadata: &Value, field: &str) -> Option<String> {
    metadata
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn uuid_field(metadata: &Value, field: &'static str) -> Result<Uuid, DomainError> {
    let raw = str_field(metadata, field)?;
    raw.parse().map_err(|_| DomainError::InvalidMetadata {
        field,
        value: raw.to_string(),
    })
}

fn decimal_field(metadata: &Value, field: &'static str) -> Result<Decimal, DomainError> {
    let raw = str_field(metadata, field)?;
    raw.parse().map_err(|_| DomainError::InvalidMetadata {
        field,
        value: raw.to_string(),
    })
}

fn opt_decimal_field(metadata: &Value, field: &'static str) -> Result<Option<Decimal>, DomainError> {
    match metadata.get(field).and_then(Value::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| DomainError::InvalidMetadata {
                field,
                value: raw.to_string(),
            }),
    }
}

fn opt_int_field(metadata: &Value, field: &'static str) -> Result<Option<i32>, DomainError> {
    match metadata.get(field).and_then(Value::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| DomainError::InvalidMetadata {
                field,
                value: raw.to_string(),
            }),
    }
}

fn opt_datetime_field(
    metadata: &Value,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, DomainError> {
    match metadata.get(field).and_then(Value::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(|_| DomainError::InvalidMetadata {
                field,
                value: raw.to_string(),
            }),
    }
}
