use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use tasklane_core::{
    DomainError, PaymentIntent, PaymentIntentStatus, PaymentLogEvent, PaymentLogLevel,
    PaymentPurpose, TransactionStatus, WeeklyChargeContext, WeeklyPaymentStatus,
};
use tasklane_fees::FeeConfig;

use crate::materialize::{PaymentPipeline, SOURCE_WEBHOOK};

impl PaymentPipeline {
    /// Entry point for a verified webhook event. Domain-level problems
    /// (missing party, bad metadata) are resolved here - logged and dropped,
    /// since the processor redelivering them cannot help. Only storage
    /// failures propagate, so the processor retries exactly the events a
    /// retry can fix.
    pub async fn handle_event(
        &self,
        event_type: &str,
        intent: &PaymentIntent,
        config: &FeeConfig,
    ) -> anyhow::Result<()> {
        match event_type {
            "payment_intent.succeeded" => self.handle_authorized(intent, config).await,
            "payment_intent.amount_capturable_updated" => {
                if intent.status == PaymentIntentStatus::RequiresCapture {
                    self.handle_authorized(intent, config).await
                } else {
                    self.log_ignored(event_type, intent).await;
                    Ok(())
                }
            }
            "payment_intent.payment_failed" => self.handle_failed(intent).await,
            _ => {
                self.log_ignored(event_type, intent).await;
                Ok(())
            }
        }
    }

    async fn handle_authorized(
        &self,
        intent: &PaymentIntent,
        config: &FeeConfig,
    ) -> anyhow::Result<()> {
        if intent.status == PaymentIntentStatus::RequiresCapture {
            self.capture(intent).await;
        }

        let purpose = match PaymentPurpose::from_metadata(&intent.metadata) {
            Ok(purpose) => purpose,
            Err(err) => {
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "invalid_metadata",
                            PaymentLogLevel::Error,
                            format!("cannot classify payment {}: {err}", intent.id),
                        )
                        .payment_intent(&intent.id),
                    )
                    .await;
                return Ok(());
            }
        };

        let result = match &purpose {
            PaymentPurpose::OfferPurchase {
                offer_id,
                buyer_id,
                worker_id,
            } => self
                .materialize_purchase(intent, *offer_id, *buyer_id, *worker_id, config)
                .await
                .map(|_| ()),
            PaymentPurpose::DirectBooking(booking) => self
                .materialize_booking(intent, booking, config)
                .await
                .map(|_| ()),
            PaymentPurpose::TaskStatusUpdate { task_id, .. } => {
                self.store
                    .set_transaction_status(&intent.id, TransactionStatus::Captured)
                    .await?;
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "transaction_captured",
                            PaymentLogLevel::Info,
                            format!("payment {} captured for existing task {task_id}", intent.id),
                        )
                        .payment_intent(&intent.id)
                        .task(*task_id),
                    )
                    .await;
                Ok(())
            }
            PaymentPurpose::WeeklyCharge { weekly_payment_id } => {
                self.store
                    .set_transaction_status(&intent.id, TransactionStatus::Captured)
                    .await?;
                self.settle_weekly_payment(intent, *weekly_payment_id).await?;
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "transaction_captured",
                            PaymentLogLevel::Info,
                            format!(
                                "weekly charge {} captured for weekly payment {weekly_payment_id}",
                                intent.id
                            ),
                        )
                        .payment_intent(&intent.id),
                    )
                    .await;
                Ok(())
            }
        };

        match result {
            Ok(()) => Ok(()),
            // Redelivery cannot fix a domain problem; an operator has the
            // audit trail. Storage errors are the retriable ones.
            Err(DomainError::Storage(err)) => Err(err),
            Err(_) => Ok(()),
        }
    }

    /// Capture-on-authorization. Capture failure is non-fatal: the payment
    /// stays authorized-but-uncaptured and a later event or an operator
    /// reconciles it.
    async fn capture(&self, intent: &PaymentIntent) {
        self.audit
            .append(
                PaymentLogEvent::new(
                    SOURCE_WEBHOOK,
                    "capture_attempted",
                    PaymentLogLevel::Info,
                    format!("capturing authorized payment {}", intent.id),
                )
                .payment_intent(&intent.id),
            )
            .await;

        match self.processor.capture_payment_intent(&intent.id).await {
            Ok(_) => {
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "payment_captured",
                            PaymentLogLevel::Info,
                            format!("payment {} captured", intent.id),
                        )
                        .payment_intent(&intent.id),
                    )
                    .await;
            }
            Err(err) => {
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "capture_failed",
                            PaymentLogLevel::Error,
                            format!("capture of payment {} failed: {err:#}", intent.id),
                        )
                        .payment_intent(&intent.id),
                    )
                    .await;
            }
        }
    }

    /// A weekly charge that did not settle inside the batch run settles
    /// here: the batch leaves the WeeklyPayment open and this event closes
    /// it, crediting the worker and retiring the report. Replays are no-ops
    /// once the row is completed.
    async fn settle_weekly_payment(
        &self,
        intent: &PaymentIntent,
        weekly_payment_id: Uuid,
    ) -> anyhow::Result<()> {
        let Some(payment) = self.payouts.weekly_payment(weekly_payment_id).await? else {
            self.audit
                .append(
                    PaymentLogEvent::new(
                        SOURCE_WEBHOOK,
                        "weekly_payment_missing",
                        PaymentLogLevel::Warning,
                        format!(
                            "charge {} succeeded but weekly payment {weekly_payment_id} has no \
                             record",
                            intent.id
                        ),
                    )
                    .payment_intent(&intent.id),
                )
                .await;
            return Ok(());
        };
        if payment.status == WeeklyPaymentStatus::Completed {
            return Ok(());
        }

        let Some(worker_id) = self
            .store
            .transaction_by_payment_intent(&intent.id)
            .await?
            .and_then(|txn| txn.worker_id)
        else {
            self.audit
                .append(
                    PaymentLogEvent::new(
                        SOURCE_WEBHOOK,
                        "weekly_payment_unsettled",
                        PaymentLogLevel::Critical,
                        format!(
                            "charge {} succeeded but no transaction names a worker to pay for \
                             weekly payment {weekly_payment_id}, manual intervention required",
                            intent.id
                        ),
                    )
                    .payment_intent(&intent.id)
                    .task(payment.task_id),
                )
                .await;
            return Ok(());
        };

        let now = Utc::now();
        self.payouts
            .credit_wallet(worker_id, payment.worker_payout)
            .await?;
        self.payouts
            .mark_report_processed(payment.time_report_id, now)
            .await?;
        self.payouts
            .update_weekly_payment(
                weekly_payment_id,
                WeeklyPaymentStatus::Completed,
                Some(&intent.id),
                Some(now),
            )
            .await?;

        self.audit
            .append(
                PaymentLogEvent::new(
                    SOURCE_WEBHOOK,
                    "weekly_payment_completed",
                    PaymentLogLevel::Info,
                    format!(
                        "weekly payment {weekly_payment_id} completed, {} paid out to worker \
                         {worker_id}",
                        payment.worker_payout
                    ),
                )
                .payment_intent(&intent.id)
                .task(payment.task_id)
                .worker(worker_id)
                .amount(payment.worker_payout),
            )
            .await;

        Ok(())
    }

    async fn handle_failed(&self, intent: &PaymentIntent) -> anyhow::Result<()> {
        let transaction = self.store.transaction_by_payment_intent(&intent.id).await?;
        let purpose = PaymentPurpose::from_metadata(&intent.metadata).ok();

        let covered = match &purpose {
            Some(PaymentPurpose::WeeklyCharge { weekly_payment_id }) => {
                self.apply_payment_protection(intent, *weekly_payment_id, transaction.as_ref())
                    .await
            }
            _ => false,
        };

        if !covered {
            self.store
                .set_transaction_status(&intent.id, TransactionStatus::Failed)
                .await?;
            self.audit
                .append(
                    PaymentLogEvent::new(
                        SOURCE_WEBHOOK,
                        "transaction_failed",
                        PaymentLogLevel::Error,
                        format!("payment {} failed", intent.id),
                    )
                    .payment_intent(&intent.id),
                )
                .await;
        }

        // The buyer always hears about a failed charge, whichever way it was
        // resolved internally.
        let buyer_id = transaction.as_ref().map(|txn| txn.buyer_id).or_else(|| {
            match &purpose {
                Some(PaymentPurpose::OfferPurchase { buyer_id, .. }) => Some(*buyer_id),
                Some(PaymentPurpose::DirectBooking(booking)) => Some(booking.buyer_id),
                _ => None,
            }
        });
        if let Some(buyer_id) = buyer_id {
            let message = if covered {
                "Your weekly payment failed, but the worker was paid by Tasklane payment \
                 protection. Please update your payment method."
                    .to_string()
            } else {
                "Your payment failed. Please try again or update your payment method.".to_string()
            };
            let task_id = transaction.as_ref().and_then(|txn| txn.task_id);
            if let Err(err) = self
                .notifier
                .create(buyer_id, "payment_failed", &message, task_id)
                .await
            {
                warn!("buyer notification for failed payment {} failed: {err:#}", intent.id);
            }
        }

        Ok(())
    }

    /// Route a failed weekly charge through the payment-protection fallback.
    /// Returns true when the fallback covered the shortfall.
    async fn apply_payment_protection(
        &self,
        intent: &PaymentIntent,
        weekly_payment_id: uuid::Uuid,
        transaction: Option<&tasklane_core::Transaction>,
    ) -> bool {
        let Some(transaction) = transaction else {
            self.audit
                .append(
                    PaymentLogEvent::new(
                        SOURCE_WEBHOOK,
                        "protection_skipped",
                        PaymentLogLevel::Critical,
                        format!(
                            "weekly charge {} failed with no transaction record, manual \
                             intervention required",
                            intent.id
                        ),
                    )
                    .payment_intent(&intent.id),
                )
                .await;
            return false;
        };
        let (Some(task_id), Some(worker_id)) = (transaction.task_id, transaction.worker_id) else {
            self.audit
                .append(
                    PaymentLogEvent::new(
                        SOURCE_WEBHOOK,
                        "protection_skipped",
                        PaymentLogLevel::Critical,
                        format!(
                            "weekly charge {} failed but its transaction lacks task or worker",
                            intent.id
                        ),
                    )
                    .payment_intent(&intent.id),
                )
                .await;
            return false;
        };

        let context = WeeklyChargeContext {
            weekly_payment_id,
            task_id,
            buyer_id: transaction.buyer_id,
            worker_id,
            amount: transaction.amount,
            payment_intent_id: Some(intent.id.clone()),
        };

        match self.protection.cover_failed_charge(&context).await {
            Ok(true) => {
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "payment_protection_applied",
                            PaymentLogLevel::Info,
                            format!(
                                "worker {worker_id} paid by payment protection for weekly \
                                 payment {weekly_payment_id}"
                            ),
                        )
                        .payment_intent(&intent.id)
                        .task(task_id)
                        .buyer(transaction.buyer_id)
                        .worker(worker_id)
                        .amount(transaction.amount),
                    )
                    .await;
                true
            }
            Ok(false) => {
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "payment_protection_declined",
                            PaymentLogLevel::Warning,
                            format!(
                                "payment protection declined weekly payment {weekly_payment_id}"
                            ),
                        )
                        .payment_intent(&intent.id)
                        .task(task_id),
                    )
                    .await;
                false
            }
            Err(err) => {
                self.audit
                    .append(
                        PaymentLogEvent::new(
                            SOURCE_WEBHOOK,
                            "payment_protection_failed",
                            PaymentLogLevel::Critical,
                            format!(
                                "payment protection errored for weekly payment \
                                 {weekly_payment_id}: {err:#}"
                            ),
                        )
                        .payment_intent(&intent.id)
                        .task(task_id),
                    )
                    .await;
                false
            }
        }
    }

    async fn log_ignored(&self, event_type: &str, intent: &PaymentIntent) {
        self.audit
            .append(
                PaymentLogEvent::new(
                    SOURCE_WEBHOOK,
                    "event_ignored",
                    PaymentLogLevel::Info,
                    format!(
                        "event {event_type} for payment {} in status {} not processed",
                        intent.id,
                        intent.status.as_str()
                    ),
                )
                .payment_intent(&intent.id)
                .amount(Decimal::new(intent.amount_minor, 2)),
            )
            .await;
    }
}
