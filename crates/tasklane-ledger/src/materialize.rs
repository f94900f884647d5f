use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use tasklane_core::{
    BookingRequest, DomainError, LedgerStore, MaterializeOutcome, NewLedgerEntry, Notifier,
    OfflineAlerts, PartyRef, PaymentIntent, PaymentLog, PaymentLogEvent, PaymentLogLevel,
    PaymentProcessor, PaymentProtection, PayoutStore, Realtime, Receipt, ReceiptMailer, Task,
    TaskStatus, Transaction, TransactionStatus,
};
use tasklane_fees::{FeeCalculation, FeeConfig, calculate_fees};

pub(crate) const SOURCE_WEBHOOK: &str = "webhook";

/// The payment-event-to-ledger pipeline. Owns every collaborator the webhook
/// intake and the materializer touch; all state lives behind the trait
/// objects, so the pipeline itself is cheap to clone per request.
#[derive(Clone)]
pub struct PaymentPipeline {
    pub store: Arc<dyn LedgerStore>,
    pub payouts: Arc<dyn PayoutStore>,
    pub audit: Arc<dyn PaymentLog>,
    pub notifier: Arc<dyn Notifier>,
    pub mailer: Arc<dyn ReceiptMailer>,
    pub alerts: Arc<dyn OfflineAlerts>,
    pub realtime: Arc<dyn Realtime>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub protection: Arc<dyn PaymentProtection>,
}

impl PaymentPipeline {
    /// Offer-purchase materialization: the buyer accepted a worker's offer
    /// and the payment for it is now authorized. Returns the task, existing
    /// or new; duplicate delivery is a successful no-op.
    pub async fn materialize_purchase(
        &self,
        intent: &PaymentIntent,
        offer_id: Uuid,
        buyer_id: Uuid,
        worker_id: Uuid,
        config: &FeeConfig,
    ) -> Result<Task, DomainError> {
        if let Some(existing) = self.store.task_by_payment_intent(&intent.id).await? {
            self.log_duplicate(intent, existing.id).await;
            return Ok(existing);
        }

        let buyer = self.require_party(buyer_id, "buyer", intent).await?;
        let worker = self.require_party(worker_id, "worker", intent).await?;

        let Some(offer) = self.store.offer(offer_id).await? else {
            self.audit
                .append(
                    PaymentLogEvent::new(
                        SOURCE_WEBHOOK,
                        "offer_missing",
                        PaymentLogLevel::Error,
                        format!("offer {offer_id} not found while materializing purchase"),
                    )
                    .payment_intent(&intent.id)
                    .buyer(buyer_id)
                    .worker(worker_id),
                )
                .await;
            return Err(DomainError::OfferNotFound(offer_id));
        };

        if offer.price <= Decimal::ZERO {
            self.log_bad_amount(intent, offer.price).await;
            return Err(DomainError::NonPositiveAmount(offer.price));
        }

        let fees = calculate_fees(offer.price, config);
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: offer.task_title.clone(),
            description: offer.task_description.clone(),
            category: offer.category.clone(),
            kind: offer.kind,
            status: TaskStatus::Assigned,
            buyer_id,
            worker_id: Some(worker_id),
            price: offer.price,
            estimated_hours: offer.estimated_hours,
            weekly_hour_limit: None,
            scheduled_at: None,
            address: None,
            payment_intent_id: Some(intent.id.clone()),
            created_at: now,
            updated_at: now,
        };

        self.commit_and_announce(intent, task, &fees, &buyer, &worker, Some(offer_id))
            .await
    }

    /// Direct-booking materialization: the buyer hired a worker without an
    /// offer, so the task details ride in the payment metadata.
    pub async fn materialize_booking(
        &self,
        intent: &PaymentIntent,
        booking: &BookingRequest,
        config: &FeeConfig,
    ) -> Result<Task, DomainError> {
        if let Some(existing) = self.store.task_by_payment_intent(&intent.id).await? {
            self.log_duplicate(intent, existing.id).await;
            return Ok(existing);
        }

        let buyer = self.require_party(booking.buyer_id, "buyer", intent).await?;
        let worker = self
            .require_party(booking.worker_id, "worker", intent)
            .await?;

        if booking.base_amount <= Decimal::ZERO {
            self.log_bad_amount(intent, booking.base_amount).await;
            return Err(DomainError::NonPositiveAmount(booking.base_amount));
        }

        let fees = calculate_fees(booking.base_amount, config);
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: booking.title.clone(),
            description: booking.description.clone(),
            category: booking.category.clone(),
            kind: booking.kind,
            status: TaskStatus::Assigned,
            buyer_id: booking.buyer_id,
            worker_id: Some(booking.worker_id),
            price: booking.base_amount,
            estimated_hours: booking.estimated_hours,
            weekly_hour_limit: booking.weekly_hour_limit,
            scheduled_at: booking.scheduled_at,
            address: booking.address.clone(),
            payment_intent_id: Some(intent.id.clone()),
            created_at: now,
            updated_at: now,
        };

        self.commit_and_announce(intent, task, &fees, &buyer, &worker, None)
            .await
    }

    async fn commit_and_announce(
        &self,
        intent: &PaymentIntent,
        task: Task,
        fees: &FeeCalculation,
        buyer: &PartyRef,
        worker: &PartyRef,
        accept_offer_id: Option<Uuid>,
    ) -> Result<Task, DomainError> {
        let now = task.created_at;
        let transaction = Transaction {
            id: Uuid::new_v4(),
            payment_intent_id: intent.id.clone(),
            buyer_id: buyer.id,
            worker_id: Some(worker.id),
            task_id: Some(task.id),
            amount: fees.total_amount,
            base_amount: fees.base_amount,
            platform_fee: fees.platform_fee,
            processor_fee: fees.processor_fee,
            status: TransactionStatus::Captured,
            capture_method: intent.capture_method.clone(),
            metadata: intent.metadata.clone(),
            receipt_sent: false,
            receipt_sent_at: None,
            created_at: now,
            updated_at: now,
        };

        let entry = NewLedgerEntry {
            task,
            transaction: transaction.clone(),
            accept_offer_id,
        };

        match self.store.insert_task_with_transaction(entry).await? {
            MaterializeOutcome::AlreadyExists(existing) => {
                self.log_duplicate(intent, existing.id).await;
                Ok(existing)
            }
            MaterializeOutcome::Created(task) => {
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "task_materialized",
                            PaymentLogLevel::Info,
                            format!("task '{}' created from payment {}", task.title, intent.id),
                        )
                        .payment_intent(&intent.id)
                        .task(task.id)
                        .buyer(buyer.id)
                        .worker(worker.id)
                        .amount(fees.total_amount),
                    )
                    .await;

                self.announce(&task, &transaction, fees, buyer, worker).await;
                Ok(task)
            }
        }
    }

    /// Post-commit side effects. Each one is best effort: a notification or
    /// receipt failure must never undo the financial record, so every arm is
    /// caught, payment-logged, and dropped.
    async fn announce(
        &self,
        task: &Task,
        transaction: &Transaction,
        fees: &FeeCalculation,
        buyer: &PartyRef,
        worker: &PartyRef,
    ) {
        let buyer_message = format!(
            "Your payment for '{}' was received and {} is on the job.",
            task.title, worker.name
        );
        if let Err(err) = self
            .notifier
            .create(buyer.id, "payment_received", &buyer_message, Some(task.id))
            .await
        {
            self.log_side_effect_failure(task, "notification_failed", "buyer notification", &err)
                .await;
        }

        let worker_message = format!("You were hired for '{}'.", task.title);
        if let Err(err) = self
            .notifier
            .create(worker.id, "task_assigned", &worker_message, Some(task.id))
            .await
        {
            self.log_side_effect_failure(task, "notification_failed", "worker notification", &err)
                .await;
        }

        let receipt = Receipt {
            transaction_id: transaction.id,
            payment_intent_id: transaction.payment_intent_id.clone(),
            buyer_name: buyer.name.clone(),
            buyer_email: buyer.email.clone(),
            worker_name: Some(worker.name.clone()),
            task_title: task.title.clone(),
            task_id: task.id,
            amount: fees.total_amount,
            base_amount: fees.base_amount,
            platform_fee: fees.platform_fee,
            processor_fee: fees.processor_fee,
            date: transaction.created_at,
            status: transaction.status.as_str().to_string(),
        };
        match self.mailer.send_receipt(&receipt).await {
            Ok(true) => {
                if let Err(err) = self
                    .store
                    .mark_receipt_sent(&transaction.payment_intent_id, Utc::now())
                    .await
                {
                    self.log_side_effect_failure(task, "receipt_flag_failed", "receipt flag", &err)
                        .await;
                }
            }
            Ok(false) => {
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "receipt_not_sent",
                            PaymentLogLevel::Warning,
                            format!("receipt for task {} was not accepted by the mailer", task.id),
                        )
                        .payment_intent(&transaction.payment_intent_id)
                        .task(task.id),
                    )
                    .await;
            }
            Err(err) => {
                self.log_side_effect_failure(task, "receipt_email_failed", "receipt email", &err)
                    .await;
            }
        }

        if let Some(phone) = &worker.phone {
            let sms = format!("Tasklane: you were hired for '{}'.", task.title);
            if let Err(err) = self
                .alerts
                .check_and_send(worker.id, &worker.name, phone, &sms, task.id)
                .await
            {
                self.log_side_effect_failure(task, "offline_alert_failed", "offline alert", &err)
                    .await;
            }
        }

        if let Err(err) = self.realtime.publish_task_created(task).await {
            self.log_side_effect_failure(task, "realtime_publish_failed", "realtime publish", &err)
                .await;
        }
    }

    async fn require_party(
        &self,
        id: Uuid,
        role: &'static str,
        intent: &PaymentIntent,
    ) -> Result<PartyRef, DomainError> {
        match self.store.party(id).await? {
            Some(party) => Ok(party),
            None => {
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "missing_party",
                            PaymentLogLevel::Error,
                            format!("{role} {id} not found for payment {}", intent.id),
                        )
                        .payment_intent(&intent.id),
                    )
                    .await;
                Err(DomainError::MissingParty { role, id })
            }
        }
    }

    async fn log_duplicate(&self, intent: &PaymentIntent, task_id: Uuid) {
        self.audit
            .append(
                PaymentLogEvent::new(
                    SOURCE_WEBHOOK,
                    "duplicate_event",
                    PaymentLogLevel::Info,
                    format!("payment {} already materialized as task {task_id}", intent.id),
                )
                .payment_intent(&intent.id)
                .task(task_id),
            )
            .await;
    }

    async fn log_bad_amount(&self, intent: &PaymentIntent, amount: Decimal) {
        self.audit
            .append(
                PaymentLogEvent::new(
                    SOURCE_WEBHOOK,
                    "invalid_amount",
                    PaymentLogLevel::Error,
                    format!("payment {} carries non-positive base amount {amount}", intent.id),
                )
                .payment_intent(&intent.id)
                .amount(amount),
            )
            .await;
    }

    async fn log_side_effect_failure(
        &self,
        task: &Task,
        event_type: &str,
        what: &str,
        err: &anyhow::Error,
    ) {
        warn!("{what} failed for task {}: {err:#}", task.id);
        self.audit
            .append(
                PaymentLogEvent::new(
                    SOURCE_WEBHOOK,
                    event_type,
                    PaymentLogLevel::Warning,
                    format!("{what} failed for task {}: {err:#}", task.id),
                )
                .task(task.id),
            )
            .await;
    }
}
