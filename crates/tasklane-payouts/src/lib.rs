//! Weekly payment batch: turns approved time reports into charges, wallet
//! credits, and pay-period records. One report failing never aborts the run;
//! the report simply stays unprocessed and the outcome carries the error.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Datelike, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tasklane_core::{
    ApprovedTimeReport, Notifier, PaymentIntentStatus, PaymentLog, PaymentLogEvent,
    PaymentLogLevel, PaymentProcessor, PayoutStore, Receipt, ReceiptMailer, Transaction,
    TransactionStatus, WeeklyPayment, WeeklyPaymentStatus,
};
use tasklane_fees::{FeeConfig, calculate_fees, to_minor_units};

const SOURCE_BATCH: &str = "weekly_batch";

/// Which reports a run picks up. The fixed one-week look-back mirrors the
/// original schedule; `AllUnprocessed` exists because a report approved
/// after its window passed would otherwise never be paid. The choice is the
/// operator's, per run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchWindow {
    #[default]
    PriorWeek,
    AllUnprocessed,
}

/// Monday through Sunday of the week before the one containing `today`.
pub fn prior_week_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let days_into_week = today.weekday().num_days_from_monday() as u64;
    let this_monday = today - Days::new(days_into_week);
    let prior_monday = this_monday - Days::new(7);
    let prior_sunday = this_monday - Days::new(1);
    (prior_monday, prior_sunday)
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedReport {
    pub time_report_id: Uuid,
    pub weekly_payment_id: Uuid,
    pub payment_intent_id: String,
    pub worker_payout: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub time_report_id: Uuid,
    pub message: String,
}

/// Aggregate result of one run, so the scheduler can alert on partial
/// failure without treating the whole run as failed.
#[derive(Debug, Clone, Serialize, Default)]
pub struct BatchOutcome {
    pub processed: Vec<ProcessedReport>,
    pub errors: Vec<BatchError>,
}

#[derive(Clone)]
pub struct WeeklyBatch {
    pub store: Arc<dyn PayoutStore>,
    pub audit: Arc<dyn PaymentLog>,
    pub notifier: Arc<dyn Notifier>,
    pub mailer: Arc<dyn ReceiptMailer>,
    pub processor: Arc<dyn PaymentProcessor>,
}

impl WeeklyBatch {
    pub async fn run(
        &self,
        window: BatchWindow,
        config: &FeeConfig,
        today: NaiveDate,
    ) -> anyhow::Result<BatchOutcome> {
        let bounds = match window {
            BatchWindow::PriorWeek => Some(prior_week_bounds(today)),
            BatchWindow::AllUnprocessed => None,
        };
        let reports = self.store.approved_unpaid_reports(bounds).await?;
        info!(
            "weekly batch starting: {} approved report(s), window {window:?}",
            reports.len()
        );

        let mut outcome = BatchOutcome::default();
        for report in reports {
            match self.process_report(&report, config).await {
                Ok(processed) => outcome.processed.push(processed),
                Err(err) => {
                    warn!("time report {} not processed: {err:#}", report.id);
                    self.audit
                        .append(
                            PaymentLogEvent::new(
                                SOURCE_BATCH,
                                "report_failed",
                                PaymentLogLevel::Error,
                                format!("time report {} not processed: {err:#}", report.id),
                            )
                            .task(report.task_id)
                            .buyer(report.buyer_id)
                            .worker(report.worker_id),
                        )
                        .await;
                    outcome.errors.push(BatchError {
                        time_report_id: report.id,
                        message: format!("{err:#}"),
                    });
                }
            }
        }

        info!(
            "weekly batch finished: {} processed, {} error(s)",
            outcome.processed.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }

    async fn process_report(
        &self,
        report: &ApprovedTimeReport,
        config: &FeeConfig,
    ) -> anyhow::Result<ProcessedReport> {
        let worker = self
            .store
            .party(report.worker_id)
            .await?
            .with_context(|| format!("worker {} not found", report.worker_id))?;
        let buyer = self
            .store
            .party(report.buyer_id)
            .await?
            .with_context(|| format!("buyer {} not found", report.buyer_id))?;

        let hourly_rate = worker
            .hourly_rate
            .with_context(|| format!("worker {} has no hourly rate configured", worker.id))?;
        anyhow::ensure!(
            report.hours_worked > Decimal::ZERO,
            "time report {} has non-positive hours",
            report.id
        );

        let base_amount = report.hours_worked * hourly_rate;
        let fees = calculate_fees(base_amount, config);
        let now = Utc::now();

        // One WeeklyPayment per time report. A prior run may have left a row
        // behind: a charge still awaiting settlement belongs to the webhook,
        // a failed charge retries on the same row.
        let weekly_payment_id = match self.store.weekly_payment_for_report(report.id).await? {
            Some(existing) => match existing.status {
                WeeklyPaymentStatus::Completed => {
                    // Settled already; only the report flag lagged behind.
                    self.store.mark_report_processed(report.id, now).await?;
                    return Ok(ProcessedReport {
                        time_report_id: report.id,
                        weekly_payment_id: existing.id,
                        payment_intent_id: existing.payment_intent_id.unwrap_or_default(),
                        worker_payout: existing.worker_payout,
                    });
                }
                WeeklyPaymentStatus::Processing if existing.payment_intent_id.is_some() => {
                    anyhow::bail!(
                        "weekly payment {} still awaiting charge {}",
                        existing.id,
                        existing.payment_intent_id.as_deref().unwrap_or("-")
                    );
                }
                _ => existing.id,
            },
            None => {
                let weekly_payment = WeeklyPayment {
                    id: Uuid::new_v4(),
                    task_id: report.task_id,
                    time_report_id: report.id,
                    week_start: report.week_start,
                    week_end: report.week_end,
                    hours_worked: report.hours_worked,
                    hourly_rate,
                    base_amount,
                    platform_fee: fees.platform_fee,
                    processor_fee: fees.processor_fee,
                    total_amount: fees.total_amount,
                    worker_payout: fees.worker_payout,
                    payment_intent_id: None,
                    status: WeeklyPaymentStatus::Pending,
                    processed_at: None,
                    created_at: now,
                };
                let id = weekly_payment.id;
                self.store.insert_weekly_payment(weekly_payment).await?;
                id
            }
        };
        self.store
            .update_weekly_payment(weekly_payment_id, WeeklyPaymentStatus::Processing, None, None)
            .await?;

        let metadata = json!({
            "type": "weekly_payment",
            "weekly_payment_id": weekly_payment_id.to_string(),
            "time_report_id": report.id.to_string(),
            "task_id": report.task_id.to_string(),
        });
        let intent = match self
            .processor
            .create_payment_intent(to_minor_units(fees.total_amount)?, "usd", metadata)
            .await
        {
            Ok(intent) => intent,
            Err(err) => {
                self.store
                    .update_weekly_payment(
                        weekly_payment_id,
                        WeeklyPaymentStatus::Failed,
                        None,
                        None,
                    )
                    .await?;
                self.notify_payment_required(&report.buyer_id, report.task_id).await;
                return Err(err.context("charge creation failed"));
            }
        };

        let transaction_status = match intent.status {
            PaymentIntentStatus::Succeeded => TransactionStatus::Captured,
            PaymentIntentStatus::RequiresCapture => TransactionStatus::Authorized,
            PaymentIntentStatus::Canceled => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        };
        let transaction = Transaction {
            id: Uuid::new_v4(),
            payment_intent_id: intent.id.clone(),
            buyer_id: buyer.id,
            worker_id: Some(worker.id),
            task_id: Some(report.task_id),
            amount: fees.total_amount,
            base_amount,
            platform_fee: fees.platform_fee,
            processor_fee: fees.processor_fee,
            status: transaction_status,
            capture_method: intent.capture_method.clone(),
            metadata: intent.metadata.clone(),
            receipt_sent: false,
            receipt_sent_at: None,
            created_at: now,
            updated_at: now,
        };
        let transaction_id = transaction.id;
        self.store.insert_transaction(transaction).await?;

        if intent.status != PaymentIntentStatus::Succeeded {
            // The webhook failure path owns what happens next; the report
            // stays unprocessed so a later run can pick it up.
            self.store
                .update_weekly_payment(
                    weekly_payment_id,
                    WeeklyPaymentStatus::Processing,
                    Some(&intent.id),
                    None,
                )
                .await?;
            self.notify_payment_required(&report.buyer_id, report.task_id).await;
            self.audit
                .append(
                    PaymentLogEvent::new(
                        SOURCE_BATCH,
                        "charge_incomplete",
                        PaymentLogLevel::Warning,
                        format!(
                            "weekly charge {} for report {} ended in status {}",
                            intent.id,
                            report.id,
                            intent.status.as_str()
                        ),
                    )
                    .payment_intent(&intent.id)
                    .task(report.task_id)
                    .buyer(buyer.id)
                    .worker(worker.id)
                    .amount(fees.total_amount),
                )
                .await;
            anyhow::bail!(
                "charge {} did not complete immediately (status {})",
                intent.id,
                intent.status.as_str()
            );
        }

        self.store.credit_wallet(worker.id, fees.worker_payout).await?;
        self.store.mark_report_processed(report.id, now).await?;
        self.store
            .update_weekly_payment(
                weekly_payment_id,
                WeeklyPaymentStatus::Completed,
                Some(&intent.id),
                Some(now),
            )
            .await?;

        self.announce(report, &worker, &buyer, &fees, &intent.id, transaction_id)
            .await;

        self.audit
            .append(
                PaymentLogEvent::new(
                    SOURCE_BATCH,
                    "weekly_payment_completed",
                    PaymentLogLevel::Info,
                    format!(
                        "weekly payment {weekly_payment_id} completed, {} paid out to worker {}",
                        fees.worker_payout, worker.id
                    ),
                )
                .payment_intent(&intent.id)
                .task(report.task_id)
                .buyer(buyer.id)
                .worker(worker.id)
                .amount(fees.total_amount),
            )
            .await;

        Ok(ProcessedReport {
            time_report_id: report.id,
            weekly_payment_id,
            payment_intent_id: intent.id,
            worker_payout: fees.worker_payout,
        })
    }

    /// Post-success notifications and receipt. Best effort, logged, never
    /// propagated: the money already moved.
    async fn announce(
        &self,
        report: &ApprovedTimeReport,
        worker: &tasklane_core::PartyRef,
        buyer: &tasklane_core::PartyRef,
        fees: &tasklane_fees::FeeCalculation,
        payment_intent_id: &str,
        transaction_id: Uuid,
    ) {
        let worker_message = format!(
            "Your weekly payout of {} for the week of {} is in your wallet.",
            fees.worker_payout, report.week_start
        );
        if let Err(err) = self
            .notifier
            .create(worker.id, "weekly_payout", &worker_message, Some(report.task_id))
            .await
        {
            warn!("worker payout notification failed: {err:#}");
        }

        let buyer_message = format!(
            "Your weekly payment of {} for the week of {} was processed.",
            fees.total_amount, report.week_start
        );
        if let Err(err) = self
            .notifier
            .create(buyer.id, "weekly_charge", &buyer_message, Some(report.task_id))
            .await
        {
            warn!("buyer charge notification failed: {err:#}");
        }

        let task_title = match self.store.task(report.task_id).await {
            Ok(Some(task)) => task.title,
            Ok(None) => format!("task {}", report.task_id),
            Err(err) => {
                warn!("task lookup for receipt failed: {err:#}");
                format!("task {}", report.task_id)
            }
        };
        let receipt = Receipt {
            transaction_id,
            payment_intent_id: payment_intent_id.to_string(),
            buyer_name: buyer.name.clone(),
            buyer_email: buyer.email.clone(),
            worker_name: Some(worker.name.clone()),
            task_title,
            task_id: report.task_id,
            amount: fees.total_amount,
            base_amount: fees.base_amount,
            platform_fee: fees.platform_fee,
            processor_fee: fees.processor_fee,
            date: Utc::now(),
            status: TransactionStatus::Captured.as_str().to_string(),
        };
        if let Err(err) = self.mailer.send_receipt(&receipt).await {
            warn!("weekly receipt email failed: {err:#}");
            self.audit
                .append(
                    PaymentLogEvent::new(
                        SOURCE_BATCH,
                        "receipt_email_failed",
                        PaymentLogLevel::Warning,
                        format!("weekly receipt for report {} failed: {err:#}", report.id),
                    )
                    .payment_intent(payment_intent_id)
                    .task(report.task_id),
                )
                .await;
        }
    }

    async fn notify_payment_required(&self, buyer_id: &Uuid, task_id: Uuid) {
        let message = "Your weekly payment could not be completed. Please update your payment \
                       method to pay your worker."
            .to_string();
        if let Err(err) = self
            .notifier
            .create(*buyer_id, "payment_required", &message, Some(task_id))
            .await
        {
            warn!("payment-required notification failed: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::Value;
    use tokio::sync::Mutex;

    use tasklane_core::{Notification, PartyRef, PaymentIntent};
    use tasklane_store::InMemoryStore;

    use super::*;

    struct FakeBatchProcessor {
        status: PaymentIntentStatus,
        created: Mutex<Vec<(i64, Value)>>,
        next_id: Mutex<u32>,
    }

    impl FakeBatchProcessor {
        fn new(status: PaymentIntentStatus) -> Self {
            Self {
                status,
                created: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl PaymentProcessor for FakeBatchProcessor {
        async fn retrieve_payment_intent(&self, id: &str) -> anyhow::Result<PaymentIntent> {
            anyhow::bail!("unexpected retrieve of {id}")
        }

        async fn capture_payment_intent(&self, id: &str) -> anyhow::Result<PaymentIntent> {
            anyhow::bail!("unexpected capture of {id}")
        }

        async fn create_payment_intent(
            &self,
            amount_minor: i64,
            _currency: &str,
            metadata: Value,
        ) -> anyhow::Result<PaymentIntent> {
            self.created.lock().await.push((amount_minor, metadata.clone()));
            let mut next_id = self.next_id.lock().await;
            *next_id += 1;
            Ok(PaymentIntent {
                id: format!("pi_weekly_{}", *next_id),
                status: self.status,
                amount_minor,
                currency: "usd".to_string(),
                capture_method: "automatic".to_string(),
                metadata,
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(Uuid, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn create(
            &self,
            user_id: Uuid,
            kind: &str,
            message: &str,
            task_id: Option<Uuid>,
        ) -> anyhow::Result<Notification> {
            self.sent.lock().await.push((user_id, kind.to_string()));
            Ok(Notification {
                id: Uuid::new_v4(),
                user_id,
                kind: kind.to_string(),
                message: message.to_string(),
                task_id,
                created_at: Utc::now(),
            })
        }
    }

    struct OkMailer;

    #[async_trait]
    impl ReceiptMailer for OkMailer {
        async fn send_receipt(&self, _receipt: &Receipt) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dec(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    async fn seed_worker(store: &InMemoryStore, rate: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        store
            .add_party(PartyRef {
                id,
                name: "Worker".to_string(),
                email: "worker@example.com".to_string(),
                phone: None,
                hourly_rate: rate.map(|r| r.parse().unwrap()),
                wallet_balance: Decimal::ZERO,
            })
            .await;
        id
    }

    async fn seed_buyer(store: &InMemoryStore) -> Uuid {
        let id = Uuid::new_v4();
        store
            .add_party(PartyRef {
                id,
                name: "Buyer".to_string(),
                email: "buyer@example.com".to_string(),
                phone: None,
                hourly_rate: None,
                wallet_balance: Decimal::ZERO,
            })
            .await;
        id
    }

    fn report(
        buyer_id: Uuid,
        worker_id: Uuid,
        week_start: NaiveDate,
        hours: &str,
    ) -> ApprovedTimeReport {
        ApprovedTimeReport {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            buyer_id,
            worker_id,
            week_start,
            week_end: week_start + Days::new(6),
            hours_worked: hours.parse().unwrap(),
        }
    }

    fn batch(store: &Arc<InMemoryStore>, status: PaymentIntentStatus) -> WeeklyBatch {
        WeeklyBatch {
            store: store.clone(),
            audit: store.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
            mailer: Arc::new(OkMailer),
            processor: Arc::new(FakeBatchProcessor::new(status)),
        }
    }

    #[test]
    fn prior_week_runs_monday_through_sunday() {
        // 2026-03-11 is a Wednesday.
        let (start, end) = prior_week_bounds(date(2026, 3, 11));
        assert_eq!(start, date(2026, 3, 2));
        assert_eq!(end, date(2026, 3, 8));

        // A Monday looks back at the week that just ended.
        let (start, end) = prior_week_bounds(date(2026, 3, 9));
        assert_eq!(start, date(2026, 3, 2));
        assert_eq!(end, date(2026, 3, 8));
    }

    #[tokio::test]
    async fn successful_run_pays_the_worker_and_closes_the_report() {
        let store = Arc::new(InMemoryStore::new());
        let buyer = seed_buyer(&store).await;
        let worker = seed_worker(&store, Some("25.00")).await;
        let r = report(buyer, worker, date(2026, 3, 2), "32");
        store.add_report(r.clone()).await;

        let batch = batch(&store, PaymentIntentStatus::Succeeded);
        let outcome = batch
            .run(BatchWindow::PriorWeek, &FeeConfig::default(), date(2026, 3, 9))
            .await
            .unwrap();

        assert_eq!(outcome.processed.len(), 1);
        assert!(outcome.errors.is_empty());

        // 32h * 25.00 = 800.00 base, payout 800 - 15% = 680.00
        assert_eq!(outcome.processed[0].worker_payout, dec("680.00"));
        assert_eq!(store.wallet_balance(worker).await, dec("680.00"));
        assert!(store.report_processed(r.id).await);

        let payments = store.weekly_payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, WeeklyPaymentStatus::Completed);
        assert_eq!(payments[0].base_amount, dec("800.00"));
        assert!(payments[0].payment_intent_id.is_some());
        assert!(payments[0].processed_at.is_some());

        let transactions = store.transactions().await;
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].status, TransactionStatus::Captured);
        assert_eq!(transactions[0].amount, dec("943.50"));
    }

    #[tokio::test]
    async fn missing_hourly_rate_skips_only_that_report() {
        let store = Arc::new(InMemoryStore::new());
        let buyer = seed_buyer(&store).await;
        let worker_a = seed_worker(&store, Some("20.00")).await;
        let worker_no_rate = seed_worker(&store, None).await;
        let worker_b = seed_worker(&store, Some("30.00")).await;

        let monday = date(2026, 3, 2);
        let bad = report(buyer, worker_no_rate, monday, "10");
        store.add_report(report(buyer, worker_a, monday, "10")).await;
        store.add_report(bad.clone()).await;
        store.add_report(report(buyer, worker_b, monday, "10")).await;

        let batch = batch(&store, PaymentIntentStatus::Succeeded);
        let outcome = batch
            .run(BatchWindow::PriorWeek, &FeeConfig::default(), date(2026, 3, 9))
            .await
            .unwrap();

        assert_eq!(outcome.processed.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].time_report_id, bad.id);
        assert!(outcome.errors[0].message.contains("hourly rate"));

        // Both workers with rates were paid whatever the ordering.
        assert_eq!(store.wallet_balance(worker_a).await, dec("170.00"));
        assert_eq!(store.wallet_balance(worker_b).await, dec("255.00"));
        assert!(!store.report_processed(bad.id).await);
    }

    #[tokio::test]
    async fn incomplete_charge_leaves_the_report_open() {
        let store = Arc::new(InMemoryStore::new());
        let buyer = seed_buyer(&store).await;
        let worker = seed_worker(&store, Some("25.00")).await;
        let r = report(buyer, worker, date(2026, 3, 2), "8");
        store.add_report(r.clone()).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let batch = WeeklyBatch {
            store: store.clone(),
            audit: store.clone(),
            notifier: notifier.clone(),
            mailer: Arc::new(OkMailer),
            processor: Arc::new(FakeBatchProcessor::new(PaymentIntentStatus::RequiresAction)),
        };
        let outcome = batch
            .run(BatchWindow::PriorWeek, &FeeConfig::default(), date(2026, 3, 9))
            .await
            .unwrap();

        assert!(outcome.processed.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(store.wallet_balance(worker).await, Decimal::ZERO);
        assert!(!store.report_processed(r.id).await);

        let payments = store.weekly_payments().await;
        assert_eq!(payments.len(), 1);
        assert_ne!(payments[0].status, WeeklyPaymentStatus::Completed);
        assert!(payments[0].payment_intent_id.is_some());

        let sent = notifier.sent.lock().await;
        assert!(sent.iter().any(|(id, kind)| *id == buyer && kind == "payment_required"));
    }

    #[tokio::test]
    async fn rerun_reuses_the_open_weekly_payment_row() {
        let store = Arc::new(InMemoryStore::new());
        let buyer = seed_buyer(&store).await;
        let worker = seed_worker(&store, Some("25.00")).await;
        let r = report(buyer, worker, date(2026, 3, 2), "8");
        store.add_report(r.clone()).await;

        let processor = Arc::new(FakeBatchProcessor::new(PaymentIntentStatus::RequiresAction));
        let batch = WeeklyBatch {
            store: store.clone(),
            audit: store.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
            mailer: Arc::new(OkMailer),
            processor: processor.clone(),
        };

        batch
            .run(BatchWindow::PriorWeek, &FeeConfig::default(), date(2026, 3, 9))
            .await
            .unwrap();
        let outcome = batch
            .run(BatchWindow::AllUnprocessed, &FeeConfig::default(), date(2026, 3, 9))
            .await
            .unwrap();

        assert!(outcome.processed.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].message.contains("awaiting charge"));

        // One row per approved time report, and the buyer is charged once:
        // the second run must not raise a new intent while the first is live.
        assert_eq!(store.weekly_payments().await.len(), 1);
        assert_eq!(processor.created.lock().await.len(), 1);
        assert!(!store.report_processed(r.id).await);
        assert_eq!(store.wallet_balance(worker).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn prior_week_window_excludes_stale_reports() {
        let store = Arc::new(InMemoryStore::new());
        let buyer = seed_buyer(&store).await;
        let worker = seed_worker(&store, Some("25.00")).await;
        let stale = report(buyer, worker, date(2026, 2, 9), "8");
        store.add_report(stale.clone()).await;
        store.add_report(report(buyer, worker, date(2026, 3, 2), "8")).await;

        let batch = batch(&store, PaymentIntentStatus::Succeeded);
        let outcome = batch
            .run(BatchWindow::PriorWeek, &FeeConfig::default(), date(2026, 3, 9))
            .await
            .unwrap();
        assert_eq!(outcome.processed.len(), 1);
        assert!(!store.report_processed(stale.id).await);

        // The widened window picks the stale report up.
        let outcome = batch
            .run(BatchWindow::AllUnprocessed, &FeeConfig::default(), date(2026, 3, 9))
            .await
            .unwrap();
        assert_eq!(outcome.processed.len(), 1);
        assert!(store.report_processed(stale.id).await);
    }

    #[tokio::test]
    async fn concurrent_payouts_never_lose_a_wallet_update() {
        let store = Arc::new(InMemoryStore::new());
        let worker = seed_worker(&store, Some("25.00")).await;

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.credit_wallet(worker, dec("680.00")).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.credit_wallet(worker, dec("212.50")).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(store.wallet_balance(worker).await, dec("892.50"));
    }
}

