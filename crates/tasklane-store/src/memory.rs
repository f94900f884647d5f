use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use tasklane_core::{
    ApprovedTimeReport, LedgerStore, MaterializeOutcome, NewLedgerEntry, PartyRef, OfferRef,
    PaymentLog, PaymentLogEvent, PayoutStore, Task, Transaction, TransactionStatus, WeeklyPayment,
    WeeklyPaymentStatus,
};

/// In-memory implementation of the storage traits, for tests and local
/// runs. Idempotency semantics match the Postgres store: a duplicate
/// payment intent id on insert is reported as `AlreadyExists`.
#[derive(Default)]
pub struct InMemoryStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    transactions: RwLock<HashMap<String, Transaction>>,
    parties: RwLock<HashMap<Uuid, PartyRef>>,
    offers: RwLock<HashMap<Uuid, OfferRef>>,
    reports: RwLock<HashMap<Uuid, ApprovedTimeReport>>,
    processed_reports: RwLock<HashMap<Uuid, DateTime<Utc>>>,
    weekly_payments: RwLock<HashMap<Uuid, WeeklyPayment>>,
    log: RwLock<Vec<PaymentLogEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_party(&self, party: PartyRef) {
        self.parties.write().await.insert(party.id, party);
    }

    pub async fn add_offer(&self, offer: OfferRef) {
        self.offers.write().await.insert(offer.id, offer);
    }

    pub async fn add_task(&self, task: Task) {
        self.tasks.write().await.insert(task.id, task);
    }

    pub async fn add_report(&self, report: ApprovedTimeReport) {
        self.reports.write().await.insert(report.id, report);
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.transactions.read().await.values().cloned().collect()
    }

    pub async fn transaction(&self, payment_intent_id: &str) -> Option<Transaction> {
        self.transactions.read().await.get(payment_intent_id).cloned()
    }

    pub async fn weekly_payments(&self) -> Vec<WeeklyPayment> {
        self.weekly_payments.read().await.values().cloned().collect()
    }

    pub async fn wallet_balance(&self, user_id: Uuid) -> Decimal {
        self.parties
            .read()
            .await
            .get(&user_id)
            .map(|party| party.wallet_balance)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn offer_status(&self, offer_id: Uuid) -> Option<String> {
        self.offers
            .read()
            .await
            .get(&offer_id)
            .map(|offer| offer.status.clone())
    }

    pub async fn report_processed(&self, report_id: Uuid) -> bool {
        self.processed_reports.read().await.contains_key(&report_id)
    }

    pub async fn log_events(&self) -> Vec<PaymentLogEvent> {
        self.log.read().await.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn task_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .find(|task| task.payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn transaction_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Transaction>> {
        Ok(self.transactions.read().await.get(payment_intent_id).cloned())
    }

    async fn party(&self, id: Uuid) -> Result<Option<PartyRef>> {
        Ok(self.parties.read().await.get(&id).cloned())
    }

    async fn offer(&self, id: Uuid) -> Result<Option<OfferRef>> {
        Ok(self.offers.read().await.get(&id).cloned())
    }

    async fn insert_task_with_transaction(
        &self,
        entry: NewLedgerEntry,
    ) -> Result<MaterializeOutcome> {
        // One write lock across check and insert stands in for the database
        // unique constraint.
        let mut tasks = self.tasks.write().await;
        let payment_intent_id = entry.task.payment_intent_id.clone();
        if let Some(existing) = tasks
            .values()
            .find(|task| task.payment_intent_id == payment_intent_id)
        {
            return Ok(MaterializeOutcome::AlreadyExists(existing.clone()));
        }

        tasks.insert(entry.task.id, entry.task.clone());

        let mut transactions = self.transactions.write().await;
        transactions
            .entry(entry.transaction.payment_intent_id.clone())
            .or_insert_with(|| entry.transaction.clone());

        if let Some(offer_id) = entry.accept_offer_id {
            if let Some(offer) = self.offers.write().await.get_mut(&offer_id) {
                offer.status = "accepted".to_string();
            }
        }

        Ok(MaterializeOutcome::Created(entry.task))
    }

    async fn set_transaction_status(
        &self,
        payment_intent_id: &str,
        status: TransactionStatus,
    ) -> Result<()> {
        if let Some(txn) = self.transactions.write().await.get_mut(payment_intent_id) {
            txn.status = status;
            txn.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_receipt_sent(&self, payment_intent_id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(txn) = self.transactions.write().await.get_mut(payment_intent_id) {
            txn.receipt_sent = true;
            txn.receipt_sent_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl PayoutStore for InMemoryStore {
    async fn approved_unpaid_reports(
        &self,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<ApprovedTimeReport>> {
        let processed = self.processed_reports.read().await;
        let reports = self.reports.read().await;

        let mut unpaid: Vec<ApprovedTimeReport> = reports
            .values()
            .filter(|report| !processed.contains_key(&report.id))
            .filter(|report| match window {
                Some((from, to)) => report.week_start >= from && report.week_start <= to,
                None => true,
            })
            .cloned()
            .collect();
        unpaid.sort_by_key(|report| (report.week_start, report.id));
        Ok(unpaid)
    }

    async fn party(&self, id: Uuid) -> Result<Option<PartyRef>> {
        Ok(self.parties.read().await.get(&id).cloned())
    }

    async fn task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn weekly_payment(&self, id: Uuid) -> Result<Option<WeeklyPayment>> {
        Ok(self.weekly_payments.read().await.get(&id).cloned())
    }

    async fn weekly_payment_for_report(
        &self,
        time_report_id: Uuid,
    ) -> Result<Option<WeeklyPayment>> {
        Ok(self
            .weekly_payments
            .read()
            .await
            .values()
            .find(|payment| payment.time_report_id == time_report_id)
            .cloned())
    }

    async fn insert_weekly_payment(&self, payment: WeeklyPayment) -> Result<()> {
        let mut payments = self.weekly_payments.write().await;
        // Mirrors the unique constraint on time_report_id.
        if payments
            .values()
            .any(|existing| existing.time_report_id == payment.time_report_id)
        {
            return Ok(());
        }
        payments.insert(payment.id, payment);
        Ok(())
    }

    async fn update_weekly_payment(
        &self,
        id: Uuid,
        status: WeeklyPaymentStatus,
        payment_intent_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(payment) = self.weekly_payments.write().await.get_mut(&id) {
            payment.status = status;
            if let Some(intent) = payment_intent_id {
                payment.payment_intent_id = Some(intent.to_string());
            }
            if processed_at.is_some() {
                payment.processed_at = processed_at;
            }
        }
        Ok(())
    }

    async fn insert_transaction(&self, txn: Transaction) -> Result<()> {
        self.transactions
            .write()
            .await
            .entry(txn.payment_intent_id.clone())
            .or_insert(txn);
        Ok(())
    }

    async fn credit_wallet(&self, worker_id: Uuid, amount: Decimal) -> Result<()> {
        if let Some(party) = self.parties.write().await.get_mut(&worker_id) {
            party.wallet_balance += amount;
        }
        Ok(())
    }

    async fn mark_report_processed(&self, report_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.processed_reports.write().await.insert(report_id, at);
        Ok(())
    }
}

#[async_trait]
impl PaymentLog for InMemoryStore {
    async fn append(&self, event: PaymentLogEvent) {
        self.log.write().await.push(event);
    }
}
