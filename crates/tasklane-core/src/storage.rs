use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::audit::PaymentLogEvent;
use crate::models::{
    ApprovedTimeReport, OfferRef, PartyRef, Task, Transaction, TransactionStatus, WeeklyPayment,
    WeeklyPaymentStatus,
};

/// Outcome of an idempotent task + transaction insert. A unique-constraint
/// hit on the payment intent id is reported as `AlreadyExists`, never as an
/// error: duplicate webhook delivery is expected traffic.
#[derive(Debug, Clone)]
pub enum MaterializeOutcome {
    Created(Task),
    AlreadyExists(Task),
}

impl MaterializeOutcome {
    pub fn into_task(self) -> Task {
        match self {
            MaterializeOutcome::Created(task) | MaterializeOutcome::AlreadyExists(task) => task,
        }
    }
}

/// One atomic ledger write: the task, its transaction, and optionally the
/// accepted offer flip, committed together or not at all.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub task: Task,
    pub transaction: Transaction,
    pub accept_offer_id: Option<Uuid>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn task_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> anyhow::Result<Option<Task>>;

    async fn transaction_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> anyhow::Result<Option<Transaction>>;

    async fn party(&self, id: Uuid) -> anyhow::Result<Option<PartyRef>>;

    async fn offer(&self, id: Uuid) -> anyhow::Result<Option<OfferRef>>;

    /// Insert task and transaction atomically. Implementations must treat a
    /// duplicate payment intent id as `AlreadyExists` and return the row that
    /// won the race.
    async fn insert_task_with_transaction(
        &self,
        entry: NewLedgerEntry,
    ) -> anyhow::Result<MaterializeOutcome>;

    async fn set_transaction_status(
        &self,
        payment_intent_id: &str,
        status: TransactionStatus,
    ) -> anyhow::Result<()>;

    async fn mark_receipt_sent(
        &self,
        payment_intent_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Approved, still-unpaid time reports. `window` bounds week_start when
    /// the batch runs with a fixed look-back; `None` means any age.
    async fn approved_unpaid_reports(
        &self,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> anyhow::Result<Vec<ApprovedTimeReport>>;

    async fn party(&self, id: Uuid) -> anyhow::Result<Option<PartyRef>>;

    async fn task(&self, id: Uuid) -> anyhow::Result<Option<Task>>;

    async fn weekly_payment(&self, id: Uuid) -> anyhow::Result<Option<WeeklyPayment>>;

    /// The WeeklyPayment already raised for a time report, if any. One row
    /// per report is an invariant; callers reuse the row instead of
    /// inserting a second one.
    async fn weekly_payment_for_report(
        &self,
        time_report_id: Uuid,
    ) -> anyhow::Result<Option<WeeklyPayment>>;

    /// Idempotent on time report id; a duplicate insert is a no-op.
    async fn insert_weekly_payment(&self, payment: WeeklyPayment) -> anyhow::Result<()>;

    async fn update_weekly_payment(
        &self,
        id: Uuid,
        status: WeeklyPaymentStatus,
        payment_intent_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;

    /// Idempotent on payment intent id; a duplicate insert is a no-op.
    async fn insert_transaction(&self, transaction: Transaction) -> anyhow::Result<()>;

    /// Atomic increment. Never read-modify-write: concurrent completions for
    /// the same worker must not lose updates.
    async fn credit_wallet(&self, worker_id: Uuid, amount: Decimal) -> anyhow::Result<()>;

    async fn mark_report_processed(&self, report_id: Uuid, at: DateTime<Utc>)
    -> anyhow::Result<()>;
}

/// Append-only audit log. `append` is infallible from the caller's view:
/// implementations swallow store errors and report them out of band, because
/// payment processing must not fail because logging failed.
#[async_trait]
pub trait PaymentLog: Send + Sync {
    async fn append(&self, event: PaymentLogEvent);
}
