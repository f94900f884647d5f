use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{role} {id} not found")]
    MissingParty { role: &'static str, id: Uuid },

    #[error("offer {0} not found")]
    OfferNotFound(Uuid),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("unknown payment purpose '{0}' in metadata")]
    UnknownPaymentPurpose(String),

    #[error("metadata field '{0}' is missing")]
    MissingMetadata(&'static str),

    #[error("metadata field '{field}' is invalid: {value}")]
    InvalidMetadata { field: &'static str, value: String },

    #[error("invalid {entity} status '{value}'")]
    InvalidStatus { entity: &'static str, value: String },

    #[error("base amount must be positive, got {0}")]
    NonPositiveAmount(rust_decimal::Decimal),

    #[error("worker {0} has no hourly rate configured")]
    MissingHourlyRate(Uuid),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
