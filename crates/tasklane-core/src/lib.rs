pub mod audit;
pub mod collaborators;
pub mod error;
pub mod metadata;
pub mod models;
pub mod storage;

pub use audit::{PaymentLogEvent, PaymentLogLevel};
pub use collaborators::{
    Notifier, OfflineAlerts, PaymentProcessor, PaymentProtection, Realtime, Receipt,
    ReceiptMailer, WeeklyChargeContext,
};
pub use error::DomainError;
pub use metadata::{BookingRequest, PaymentPurpose};
pub use models::{
    ApprovedTimeReport, Notification, OfferRef, PartyRef, PaymentIntent, PaymentIntentStatus,
    Task, TaskKind, TaskStatus, Transaction, TransactionStatus, WeeklyPayment,
    WeeklyPaymentStatus,
};
pub use storage::{LedgerStore, MaterializeOutcome, NewLedgerEntry, PaymentLog, PayoutStore};
