use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::error;
use uuid::Uuid;

use tasklane_core::{
    ApprovedTimeReport, LedgerStore, MaterializeOutcome, NewLedgerEntry, Notification, Notifier,
    OfferRef, PartyRef, PaymentLog, PaymentLogEvent, PayoutStore, Task, TaskKind, TaskStatus,
    Transaction, TransactionStatus, WeeklyPayment, WeeklyPaymentStatus,
};
use tasklane_platform::RedisBus;

fn task_from_row(row: &PgRow) -> Result<Task> {
    let kind_raw: String = row.try_get("kind")?;
    let status_raw: String = row.try_get("status")?;

    Ok(Task {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        kind: TaskKind::parse(&kind_raw)?,
        status: TaskStatus::parse(&status_raw)?,
        buyer_id: row.try_get("buyer_id")?,
        worker_id: row.try_get("worker_id")?,
        price: row.try_get("price")?,
        estimated_hours: row.try_get("estimated_hours")?,
        weekly_hour_limit: row.try_get("weekly_hour_limit")?,
        scheduled_at: row.try_get("scheduled_at")?,
        address: row.try_get("address")?,
        payment_intent_id: row.try_get("payment_intent_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const TASK_COLUMNS: &str = "id, title, description, category, kind, status, buyer_id, worker_id, \
     price, estimated_hours, weekly_hour_limit, scheduled_at, address, payment_intent_id, \
     created_at, updated_at";

fn weekly_payment_from_row(row: &PgRow) -> Result<WeeklyPayment> {
    let status_raw: String = row.try_get("status")?;

    Ok(WeeklyPayment {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        time_report_id: row.try_get("time_report_id")?,
        week_start: row.try_get("week_start")?,
        week_end: row.try_get("week_end")?,
        hours_worked: row.try_get("hours_worked")?,
        hourly_rate: row.try_get("hourly_rate")?,
        base_amount: row.try_get("base_amount")?,
        platform_fee: row.try_get("platform_fee")?,
        processor_fee: row.try_get("processor_fee")?,
        total_amount: row.try_get("total_amount")?,
        worker_payout: row.try_get("worker_payout")?,
        payment_intent_id: row.try_get("payment_intent_id")?,
        status: WeeklyPaymentStatus::parse(&status_raw)?,
        processed_at: row.try_get("processed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const WEEKLY_PAYMENT_COLUMNS: &str = "id, task_id, time_report_id, week_start, week_end, \
     hours_worked, hourly_rate, base_amount, platform_fee, processor_fee, total_amount, \
     worker_payout, payment_intent_id, status, processed_at, created_at";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_task_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE payment_intent_id = $1"
        ))
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn task_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Task>> {
        self.fetch_task_by_payment_intent(payment_intent_id).await
    }

    async fn transaction_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, payment_intent_id, buyer_id, worker_id, task_id, amount, base_amount,
                   platform_fee, processor_fee, status, capture_method, metadata,
                   receipt_sent, receipt_sent_at, created_at, updated_at
            FROM transactions
            WHERE payment_intent_id = $1
            "#,
        )
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_raw: String = row.try_get("status")?;
        Ok(Some(Transaction {
            id: row.try_get("id")?,
            payment_intent_id: row.try_get("payment_intent_id")?,
            buyer_id: row.try_get("buyer_id")?,
            worker_id: row.try_get("worker_id")?,
            task_id: row.try_get("task_id")?,
            amount: row.try_get("amount")?,
            base_amount: row.try_get("base_amount")?,
            platform_fee: row.try_get("platform_fee")?,
            processor_fee: row.try_get("processor_fee")?,
            status: TransactionStatus::parse(&status_raw)?,
            capture_method: row.try_get("capture_method")?,
            metadata: row.try_get("metadata")?,
            receipt_sent: row.try_get("receipt_sent")?,
            receipt_sent_at: row.try_get("receipt_sent_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn party(&self, id: Uuid) -> Result<Option<PartyRef>> {
        fetch_party(&self.pool, id).await
    }

    async fn offer(&self, id: Uuid) -> Result<Option<OfferRef>> {
        let row = sqlx::query(
            r#"
            SELECT id, task_title, task_description, category, kind, price, estimated_hours, status
            FROM offers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind_raw: String = row.try_get("kind")?;
        Ok(Some(OfferRef {
            id: row.try_get("id")?,
            task_title: row.try_get("task_title")?,
            task_description: row.try_get("task_description")?,
            category: row.try_get("category")?,
            kind: TaskKind::parse(&kind_raw)?,
            price: row.try_get("price")?,
            estimated_hours: row.try_get("estimated_hours")?,
            status: row.try_get("status")?,
        }))
    }

    async fn insert_task_with_transaction(
        &self,
        entry: NewLedgerEntry,
    ) -> Result<MaterializeOutcome> {
        let task = &entry.task;
        let txn = &entry.transaction;
        let mut tx = self.pool.begin().await?;

        // The unique constraint on payment_intent_id, not the earlier
        // existence check, is what makes concurrent duplicate delivery safe.
        let inserted = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, title, description, category, kind, status, buyer_id, worker_id,
                price, estimated_hours, weekly_hour_limit, scheduled_at, address,
                payment_intent_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
            ON CONFLICT (payment_intent_id) DO NOTHING
            "#,
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.category)
        .bind(task.kind.as_str())
        .bind(task.status.as_str())
        .bind(task.buyer_id)
        .bind(task.worker_id)
        .bind(task.price)
        .bind(task.estimated_hours)
        .bind(task.weekly_hour_limit)
        .bind(task.scheduled_at)
        .bind(&task.address)
        .bind(&task.payment_intent_id)
        .bind(task.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            let payment_intent_id = task
                .payment_intent_id
                .as_deref()
                .unwrap_or_default()
                .to_string();
            let existing = self
                .fetch_task_by_payment_intent(&payment_intent_id)
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!("task for payment intent {payment_intent_id} vanished")
                })?;
            return Ok(MaterializeOutcome::AlreadyExists(existing));
        }

        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, payment_intent_id, buyer_id, worker_id, task_id, amount, base_amount,
                platform_fee, processor_fee, status, capture_method, metadata,
                receipt_sent, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, FALSE, $13, $13)
            ON CONFLICT (payment_intent_id) DO NOTHING
            "#,
        )
        .bind(txn.id)
        .bind(&txn.payment_intent_id)
        .bind(txn.buyer_id)
        .bind(txn.worker_id)
        .bind(txn.task_id)
        .bind(txn.amount)
        .bind(txn.base_amount)
        .bind(txn.platform_fee)
        .bind(txn.processor_fee)
        .bind(txn.status.as_str())
        .bind(&txn.capture_method)
        .bind(&txn.metadata)
        .bind(txn.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(offer_id) = entry.accept_offer_id {
            sqlx::query("UPDATE offers SET status = 'accepted', updated_at = $2 WHERE id = $1")
                .bind(offer_id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(MaterializeOutcome::Created(entry.task))
    }

    async fn set_transaction_status(
        &self,
        payment_intent_id: &str,
        status: TransactionStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transactions SET status = $2, updated_at = $3 WHERE payment_intent_id = $1",
        )
        .bind(payment_intent_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_receipt_sent(&self, payment_intent_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET receipt_sent = TRUE, receipt_sent_at = $2, updated_at = $2
            WHERE payment_intent_id = $1
            "#,
        )
        .bind(payment_intent_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn fetch_party(pool: &PgPool, id: Uuid) -> Result<Option<PartyRef>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, email, phone, hourly_rate, wallet_balance
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(PartyRef {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        hourly_rate: row.try_get("hourly_rate")?,
        wallet_balance: row.try_get("wallet_balance")?,
    }))
}

#[derive(Clone)]
pub struct PgPayoutStore {
    pool: PgPool,
}

impl PgPayoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayoutStore for PgPayoutStore {
    async fn approved_unpaid_reports(
        &self,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<ApprovedTimeReport>> {
        let (from, to) = match window {
            Some((from, to)) => (Some(from), Some(to)),
            None => (None, None),
        };

        let rows = sqlx::query(
            r#"
            SELECT tr.id, tr.task_id, t.buyer_id, tr.worker_id, tr.week_start, tr.week_end,
                   tr.hours_worked
            FROM time_reports tr
            JOIN tasks t ON t.id = tr.task_id
            WHERE tr.status = 'approved'
              AND tr.payment_processed = FALSE
              AND ($1::date IS NULL OR tr.week_start >= $1)
              AND ($2::date IS NULL OR tr.week_start <= $2)
            ORDER BY tr.week_start ASC, tr.id ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            reports.push(ApprovedTimeReport {
                id: row.try_get("id")?,
                task_id: row.try_get("task_id")?,
                buyer_id: row.try_get("buyer_id")?,
                worker_id: row.try_get("worker_id")?,
                week_start: row.try_get("week_start")?,
                week_end: row.try_get("week_end")?,
                hours_worked: row.try_get("hours_worked")?,
            });
        }
        Ok(reports)
    }

    async fn party(&self, id: Uuid) -> Result<Option<PartyRef>> {
        fetch_party(&self.pool, id).await
    }

    async fn task(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn weekly_payment(&self, id: Uuid) -> Result<Option<WeeklyPayment>> {
        let row = sqlx::query(&format!(
            "SELECT {WEEKLY_PAYMENT_COLUMNS} FROM weekly_payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(weekly_payment_from_row).transpose()
    }

    async fn weekly_payment_for_report(
        &self,
        time_report_id: Uuid,
    ) -> Result<Option<WeeklyPayment>> {
        let row = sqlx::query(&format!(
            "SELECT {WEEKLY_PAYMENT_COLUMNS} FROM weekly_payments WHERE time_report_id = $1"
        ))
        .bind(time_report_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(weekly_payment_from_row).transpose()
    }

    async fn insert_weekly_payment(&self, payment: WeeklyPayment) -> Result<()> {
        // The unique constraint on time_report_id enforces the one-row-per-
        // report invariant against concurrent runs.
        sqlx::query(
            r#"
            INSERT INTO weekly_payments (
                id, task_id, time_report_id, week_start, week_end, hours_worked, hourly_rate,
                base_amount, platform_fee, processor_fee, total_amount, worker_payout,
                payment_intent_id, status, processed_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (time_report_id) DO NOTHING
            "#,
        )
        .bind(payment.id)
        .bind(payment.task_id)
        .bind(payment.time_report_id)
        .bind(payment.week_start)
        .bind(payment.week_end)
        .bind(payment.hours_worked)
        .bind(payment.hourly_rate)
        .bind(payment.base_amount)
        .bind(payment.platform_fee)
        .bind(payment.processor_fee)
        .bind(payment.total_amount)
        .bind(payment.worker_payout)
        .bind(&payment.payment_intent_id)
        .bind(payment.status.as_str())
        .bind(payment.processed_at)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_weekly_payment(
        &self,
        id: Uuid,
        status: WeeklyPaymentStatus,
        payment_intent_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE weekly_payments
            SET status = $2,
                payment_intent_id = COALESCE($3, payment_intent_id),
                processed_at = COALESCE($4, processed_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(payment_intent_id)
        .bind(processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_transaction(&self, txn: Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, payment_intent_id, buyer_id, worker_id, task_id, amount, base_amount,
                platform_fee, processor_fee, status, capture_method, metadata,
                receipt_sent, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, FALSE, $13, $13)
            ON CONFLICT (payment_intent_id) DO NOTHING
            "#,
        )
        .bind(txn.id)
        .bind(&txn.payment_intent_id)
        .bind(txn.buyer_id)
        .bind(txn.worker_id)
        .bind(txn.task_id)
        .bind(txn.amount)
        .bind(txn.base_amount)
        .bind(txn.platform_fee)
        .bind(txn.processor_fee)
        .bind(txn.status.as_str())
        .bind(&txn.capture_method)
        .bind(&txn.metadata)
        .bind(txn.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn credit_wallet(&self, worker_id: Uuid, amount: Decimal) -> Result<()> {
        // Single-statement increment; concurrent completions for the same
        // worker serialize on the row, no read-modify-write.
        sqlx::query("UPDATE users SET wallet_balance = wallet_balance + $2 WHERE id = $1")
            .bind(worker_id)
            .bind(amount)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_report_processed(&self, report_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE time_reports
            SET payment_processed = TRUE, payment_processed_at = $2
            WHERE id = $1
            "#,
        )
        .bind(report_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgPaymentLog {
    pool: PgPool,
}

impl PgPaymentLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentLog for PgPaymentLog {
    async fn append(&self, event: PaymentLogEvent) {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_logs (
                id, payment_intent_id, event_type, level, message, source,
                task_id, buyer_id, worker_id, amount, details, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.payment_intent_id)
        .bind(&event.event_type)
        .bind(event.level.as_str())
        .bind(&event.message)
        .bind(&event.source)
        .bind(event.task_id)
        .bind(event.buyer_id)
        .bind(event.worker_id)
        .bind(event.amount)
        .bind(&event.details)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await;

        // The audit trail must never take payment processing down with it.
        if let Err(err) = result {
            error!(
                event_type = %event.event_type,
                payment_intent = event.payment_intent_id.as_deref().unwrap_or("-"),
                "failed to append payment log event: {err:#}"
            );
        }
    }
}

/// Persists the in-app notification row and fans it out over the realtime
/// bus. The publish is best effort.
#[derive(Clone)]
pub struct PgNotifier {
    pool: PgPool,
    bus: RedisBus,
}

impl PgNotifier {
    pub fn new(pool: PgPool, bus: RedisBus) -> Self {
        Self { pool, bus }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn create(
        &self,
        user_id: Uuid,
        kind: &str,
        message: &str,
        task_id: Option<Uuid>,
    ) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            kind: kind.to_string(),
            message: message.to_string(),
            task_id,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, message, task_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(&notification.kind)
        .bind(&notification.message)
        .bind(notification.task_id)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        let channel = format!("notifications.{user_id}");
        if let Err(err) = self.bus.publish_json(&channel, &notification).await {
            error!("realtime notification publish failed for {user_id}: {err:#}");
        }

        Ok(notification)
    }
}
