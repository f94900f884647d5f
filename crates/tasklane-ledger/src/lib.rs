//! The payment-event-to-ledger pipeline: webhook event dispatch and
//! idempotent task/transaction materialization.

pub mod intake;
pub mod materialize;

pub use materialize::PaymentPipeline;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use chrono::NaiveDate;
    use tasklane_core::{
        Notification, Notifier, OfferRef, OfflineAlerts, PartyRef, PaymentIntent,
        PaymentIntentStatus, PaymentLogLevel, PaymentProcessor, PaymentProtection, PayoutStore,
        Realtime, Receipt, ReceiptMailer, Task, TaskKind, Transaction, TransactionStatus,
        WeeklyChargeContext, WeeklyPayment, WeeklyPaymentStatus,
    };
    use tasklane_fees::FeeConfig;
    use tasklane_store::InMemoryStore;

    use super::PaymentPipeline;

    struct FakeProcessor {
        fail_capture: bool,
        captured: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PaymentProcessor for FakeProcessor {
        async fn retrieve_payment_intent(&self, id: &str) -> anyhow::Result<PaymentIntent> {
            Ok(intent(id, PaymentIntentStatus::Succeeded, Value::Null))
        }

        async fn capture_payment_intent(&self, id: &str) -> anyhow::Result<PaymentIntent> {
            if self.fail_capture {
                anyhow::bail!("card network timeout");
            }
            self.captured.lock().await.push(id.to_string());
            Ok(intent(id, PaymentIntentStatus::Succeeded, Value::Null))
        }

        async fn create_payment_intent(
            &self,
            amount_minor: i64,
            _currency: &str,
            metadata: Value,
        ) -> anyhow::Result<PaymentIntent> {
            let mut created = intent("pi_created", PaymentIntentStatus::Succeeded, metadata);
            created.amount_minor = amount_minor;
            Ok(created)
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

    struct FakeMailer {
        fail: bool,
    }

    #[async_trait]
    impl ReceiptMailer for FakeMailer {
        async fn send_receipt(&self, _receipt: &Receipt) -> anyhow::Result<bool> {
            if self.fail {
                anyhow::bail!("smtp relay refused connection");
            }
            Ok(true)
        }
    }

    #[derive(Default)]
    struct NoopAlerts;

    #[async_trait]
    impl OfflineAlerts for NoopAlerts {
        async fn check_and_send(
            &self,
            _user_id: Uuid,
            _name: &str,
            _phone: &str,
            _message: &str,
            _task_id: Uuid,
        ) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct NoopRealtime;

    #[async_trait]
    impl Realtime for NoopRealtime {
        async fn publish_task_created(&self, _task: &Task) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FakeProtection {
        cover: bool,
        requests: Mutex<Vec<WeeklyChargeContext>>,
    }

    #[async_trait]
    impl PaymentProtection for FakeProtection {
        async fn cover_failed_charge(
            &self,
            context: &WeeklyChargeContext,
        ) -> anyhow::Result<bool> {
            self.requests.lock().await.push(context.clone());
            Ok(self.cover)
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        notifier: Arc<RecordingNotifier>,
        protection: Arc<FakeProtection>,
        pipeline: PaymentPipeline,
        buyer_id: Uuid,
        worker_id: Uuid,
        offer_id: Uuid,
    }

    async fn harness(fail_capture: bool, fail_mail: bool, cover: bool) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let protection = Arc::new(FakeProtection {
            cover,
            requests: Mutex::new(Vec::new()),
        });

        let buyer_id = Uuid::new_v4();
        let worker_id = Uuid::new_v4();
        let offer_id = Uuid::new_v4();

        store
            .add_party(PartyRef {
                id: buyer_id,
                name: "Ada Buyer".to_string(),
                email: "ada@example.com".to_string(),
                phone: None,
                hourly_rate: None,
                wallet_balance: Decimal::ZERO,
            })
            .await;
        store
            .add_party(PartyRef {
                id: worker_id,
                name: "Wes Worker".to_string(),
                email: "wes@example.com".to_string(),
                phone: Some("+15550100".to_string()),
                hourly_rate: Some(Decimal::new(2500, 2)),
                wallet_balance: Decimal::ZERO,
            })
            .await;
        store
            .add_offer(OfferRef {
                id: offer_id,
                task_title: "Assemble bookshelf".to_string(),
                task_description: "Two shelves, tools provided".to_string(),
                category: "handywork".to_string(),
                kind: TaskKind::InPerson,
                price: Decimal::new(10000, 2),
                estimated_hours: Some(Decimal::new(300, 2)),
                status: "pending".to_string(),
            })
            .await;

        let pipeline = PaymentPipeline {
            store: store.clone(),
            payouts: store.clone(),
            audit: store.clone(),
            notifier: notifier.clone(),
            mailer: Arc::new(FakeMailer { fail: fail_mail }),
            alerts: Arc::new(NoopAlerts),
            realtime: Arc::new(NoopRealtime),
            processor: Arc::new(FakeProcessor {
                fail_capture,
                captured: Mutex::new(Vec::new()),
            }),
            protection: protection.clone(),
        };

        Harness {
            store,
            notifier,
            protection,
            pipeline,
            buyer_id,
            worker_id,
            offer_id,
        }
    }

    fn intent(id: &str, status: PaymentIntentStatus, metadata: Value) -> PaymentIntent {
        PaymentIntent {
            id: id.to_string(),
            status,
            amount_minor: 11820,
            currency: "usd".to_string(),
            capture_method: "manual".to_string(),
            metadata,
        }
    }

    fn purchase_metadata(h: &Harness) -> Value {
        json!({
            "type": "offer_purchase",
            "offer_id": h.offer_id.to_string(),
            "buyer_id": h.buyer_id.to_string(),
            "worker_id": h.worker_id.to_string(),
        })
    }

    #[tokio::test]
    async fn replaying_the_same_event_is_idempotent() {
        let h = harness(false, false, false).await;
        let pi = intent("pi_1", PaymentIntentStatus::Succeeded, purchase_metadata(&h));
        let config = FeeConfig::default();

        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &config)
            .await
            .unwrap();
        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &config)
            .await
            .unwrap();

        assert_eq!(h.store.tasks().await.len(), 1);
        assert_eq!(h.store.transactions().await.len(), 1);

        // The duplicate returns the existing task unchanged.
        let first = h.store.tasks().await.remove(0);
        let again = h
            .pipeline
            .materialize_purchase(&pi, h.offer_id, h.buyer_id, h.worker_id, &config)
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
    }

    #[tokio::test]
    async fn out_of_order_capturable_update_creates_no_second_task() {
        let h = harness(false, false, false).await;
        let config = FeeConfig::default();

        let succeeded = intent("pi_2", PaymentIntentStatus::Succeeded, purchase_metadata(&h));
        h.pipeline
            .handle_event("payment_intent.succeeded", &succeeded, &config)
            .await
            .unwrap();

        let late = intent(
            "pi_2",
            PaymentIntentStatus::RequiresCapture,
            purchase_metadata(&h),
        );
        h.pipeline
            .handle_event("payment_intent.amount_capturable_updated", &late, &config)
            .await
            .unwrap();

        assert_eq!(h.store.tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn capture_failure_does_not_block_materialization() {
        let h = harness(true, false, false).await;
        let pi = intent(
            "pi_3",
            PaymentIntentStatus::RequiresCapture,
            purchase_metadata(&h),
        );

        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &FeeConfig::default())
            .await
            .unwrap();

        assert_eq!(h.store.tasks().await.len(), 1);
        let events = h.store.log_events().await;
        assert!(events.iter().any(|e| e.event_type == "capture_failed"));
        assert!(events.iter().any(|e| e.event_type == "task_materialized"));
    }

    #[tokio::test]
    async fn purchase_applies_fees_and_accepts_the_offer() {
        let h = harness(false, false, false).await;
        let pi = intent("pi_4", PaymentIntentStatus::Succeeded, purchase_metadata(&h));

        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &FeeConfig::default())
            .await
            .unwrap();

        let txn = h.store.transaction("pi_4").await.unwrap();
        assert_eq!(txn.base_amount, Decimal::new(10000, 2));
        assert_eq!(txn.platform_fee, "15.0000".parse().unwrap());
        assert_eq!(txn.amount, "118.2000".parse().unwrap());
        assert_eq!(txn.status, TransactionStatus::Captured);
        assert!(txn.receipt_sent);

        assert_eq!(
            h.store.offer_status(h.offer_id).await.as_deref(),
            Some("accepted")
        );

        let sent = h.notifier.sent.lock().await;
        assert!(sent.iter().any(|(id, kind)| *id == h.buyer_id && kind == "payment_received"));
        assert!(sent.iter().any(|(id, kind)| *id == h.worker_id && kind == "task_assigned"));
    }

    #[tokio::test]
    async fn direct_booking_materializes_from_metadata() {
        let h = harness(false, false, false).await;
        let metadata = json!({
            "type": "direct_booking",
            "buyer_id": h.buyer_id.to_string(),
            "worker_id": h.worker_id.to_string(),
            "title": "Weekly dog walking",
            "category": "pets",
            "task_kind": "in_person",
            "base_amount": "45.00",
            "address": "3 Oak Ave",
        });
        let pi = intent("pi_5", PaymentIntentStatus::Succeeded, metadata);

        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &FeeConfig::default())
            .await
            .unwrap();

        let tasks = h.store.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Weekly dog walking");
        assert_eq!(tasks[0].price, Decimal::new(4500, 2));
        assert_eq!(tasks[0].address.as_deref(), Some("3 Oak Ave"));
    }

    #[tokio::test]
    async fn missing_party_aborts_without_writes() {
        let h = harness(false, false, false).await;
        let metadata = json!({
            "type": "offer_purchase",
            "offer_id": h.offer_id.to_string(),
            "buyer_id": h.buyer_id.to_string(),
            "worker_id": Uuid::new_v4().to_string(),
        });
        let pi = intent("pi_6", PaymentIntentStatus::Succeeded, metadata);

        // Domain problem: resolved locally, not surfaced to the processor.
        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &FeeConfig::default())
            .await
            .unwrap();

        assert!(h.store.tasks().await.is_empty());
        assert!(h.store.transactions().await.is_empty());
        let events = h.store.log_events().await;
        assert!(
            events
                .iter()
                .any(|e| e.event_type == "missing_party" && e.level == PaymentLogLevel::Error)
        );
    }

    #[tokio::test]
    async fn receipt_failure_never_undoes_the_ledger() {
        let h = harness(false, true, false).await;
        let pi = intent("pi_7", PaymentIntentStatus::Succeeded, purchase_metadata(&h));

        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &FeeConfig::default())
            .await
            .unwrap();

        let txn = h.store.transaction("pi_7").await.unwrap();
        assert_eq!(txn.status, TransactionStatus::Captured);
        assert!(!txn.receipt_sent);
        let events = h.store.log_events().await;
        assert!(events.iter().any(|e| e.event_type == "receipt_email_failed"));
    }

    #[tokio::test]
    async fn one_off_failure_marks_the_transaction_failed() {
        let h = harness(false, false, false).await;
        let pi = intent("pi_8", PaymentIntentStatus::Succeeded, purchase_metadata(&h));
        let config = FeeConfig::default();

        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &config)
            .await
            .unwrap();
        let failed = intent(
            "pi_8",
            PaymentIntentStatus::RequiresPaymentMethod,
            purchase_metadata(&h),
        );
        h.pipeline
            .handle_event("payment_intent.payment_failed", &failed, &config)
            .await
            .unwrap();

        let txn = h.store.transaction("pi_8").await.unwrap();
        assert_eq!(txn.status, TransactionStatus::Failed);
        let sent = h.notifier.sent.lock().await;
        assert!(sent.iter().any(|(id, kind)| *id == h.buyer_id && kind == "payment_failed"));
    }

    async fn seed_weekly_transaction(h: &Harness, payment_intent_id: &str) -> Uuid {
        let task_id = Uuid::new_v4();
        let now = Utc::now();
        h.store
            .insert_transaction(Transaction {
                id: Uuid::new_v4(),
                payment_intent_id: payment_intent_id.to_string(),
                buyer_id: h.buyer_id,
                worker_id: Some(h.worker_id),
                task_id: Some(task_id),
                amount: "236.40".parse().unwrap(),
                base_amount: "200.00".parse().unwrap(),
                platform_fee: "30.00".parse().unwrap(),
                processor_fee: "6.10".parse().unwrap(),
                status: TransactionStatus::Pending,
                capture_method: "automatic".to_string(),
                metadata: Value::Null,
                receipt_sent: false,
                receipt_sent_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        task_id
    }

    async fn seed_open_weekly_payment(
        h: &Harness,
        task_id: Uuid,
        payment_intent_id: &str,
    ) -> (Uuid, Uuid) {
        let weekly_payment_id = Uuid::new_v4();
        let report_id = Uuid::new_v4();
        let week_start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        h.store
            .insert_weekly_payment(WeeklyPayment {
                id: weekly_payment_id,
                task_id,
                time_report_id: report_id,
                week_start,
                week_end: NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
                hours_worked: Decimal::new(800, 2),
                hourly_rate: Decimal::new(2500, 2),
                base_amount: "200.00".parse().unwrap(),
                platform_fee: "30.00".parse().unwrap(),
                processor_fee: "6.10".parse().unwrap(),
                total_amount: "236.40".parse().unwrap(),
                worker_payout: "170.00".parse().unwrap(),
                payment_intent_id: Some(payment_intent_id.to_string()),
                status: WeeklyPaymentStatus::Processing,
                processed_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        (weekly_payment_id, report_id)
    }

    #[tokio::test]
    async fn delayed_weekly_charge_success_completes_the_weekly_payment() {
        let h = harness(false, false, false).await;
        let task_id = seed_weekly_transaction(&h, "pi_12").await;
        let (weekly_payment_id, report_id) = seed_open_weekly_payment(&h, task_id, "pi_12").await;

        let metadata = json!({
            "type": "weekly_payment",
            "weekly_payment_id": weekly_payment_id.to_string(),
        });
        let pi = intent("pi_12", PaymentIntentStatus::Succeeded, metadata);
        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &FeeConfig::default())
            .await
            .unwrap();

        let txn = h.store.transaction("pi_12").await.unwrap();
        assert_eq!(txn.status, TransactionStatus::Captured);
        assert_eq!(
            h.store.wallet_balance(h.worker_id).await,
            "170.00".parse().unwrap()
        );
        assert!(h.store.report_processed(report_id).await);

        let payments = h.store.weekly_payments().await;
        assert_eq!(payments[0].status, WeeklyPaymentStatus::Completed);
        assert!(payments[0].processed_at.is_some());
    }

    #[tokio::test]
    async fn replayed_weekly_charge_success_credits_the_wallet_once() {
        let h = harness(false, false, false).await;
        let task_id = seed_weekly_transaction(&h, "pi_13").await;
        let (weekly_payment_id, _) = seed_open_weekly_payment(&h, task_id, "pi_13").await;

        let metadata = json!({
            "type": "weekly_payment",
            "weekly_payment_id": weekly_payment_id.to_string(),
        });
        let pi = intent("pi_13", PaymentIntentStatus::Succeeded, metadata);
        let config = FeeConfig::default();

        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &config)
            .await
            .unwrap();
        h.pipeline
            .handle_event("payment_intent.succeeded", &pi, &config)
            .await
            .unwrap();

        assert_eq!(
            h.store.wallet_balance(h.worker_id).await,
            "170.00".parse().unwrap()
        );
    }

    #[tokio::test]
    async fn failed_weekly_charge_covered_by_protection_stays_unfailed() {
        let h = harness(false, false, true).await;
        seed_weekly_transaction(&h, "pi_9").await;
        let weekly_payment_id = Uuid::new_v4();
        let metadata = json!({
            "type": "weekly_payment",
            "weekly_payment_id": weekly_payment_id.to_string(),
        });
        let pi = intent("pi_9", PaymentIntentStatus::RequiresPaymentMethod, metadata);

        h.pipeline
            .handle_event("payment_intent.payment_failed", &pi, &FeeConfig::default())
            .await
            .unwrap();

        let txn = h.store.transaction("pi_9").await.unwrap();
        assert_eq!(txn.status, TransactionStatus::Pending);

        let requests = h.protection.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].weekly_payment_id, weekly_payment_id);
        assert_eq!(requests[0].worker_id, h.worker_id);

        let events = h.store.log_events().await;
        assert!(events.iter().any(|e| e.event_type == "payment_protection_applied"));
    }

    #[tokio::test]
    async fn failed_weekly_charge_without_protection_fails_the_transaction() {
        let h = harness(false, false, false).await;
        seed_weekly_transaction(&h, "pi_10").await;
        let metadata = json!({
            "type": "weekly_payment",
            "weekly_payment_id": Uuid::new_v4().to_string(),
        });
        let pi = intent("pi_10", PaymentIntentStatus::RequiresPaymentMethod, metadata);

        h.pipeline
            .handle_event("payment_intent.payment_failed", &pi, &FeeConfig::default())
            .await
            .unwrap();

        let txn = h.store.transaction("pi_10").await.unwrap();
        assert_eq!(txn.status, TransactionStatus::Failed);
        let sent = h.notifier.sent.lock().await;
        assert!(sent.iter().any(|(id, kind)| *id == h.buyer_id && kind == "payment_failed"));
    }

    #[tokio::test]
    async fn unknown_events_are_acknowledged_and_ignored() {
        let h = harness(false, false, false).await;
        let pi = intent("pi_11", PaymentIntentStatus::Processing, Value::Null);

        h.pipeline
            .handle_event("charge.refund.updated", &pi, &FeeConfig::default())
            .await
            .unwrap();

        assert!(h.store.tasks().await.is_empty());
        let events = h.store.log_events().await;
        assert!(events.iter().any(|e| e.event_type == "event_ignored"));
    }
}
