//! PostgreSQL store for payment-reconciliation-service.

use crate::models::{
    ComponentScores, Invoice, InvoicePatch, MatchRecord, NewPaymentEvent, PaymentEvent,
    ProcessingStatus, ReviewItem, ReviewItemDraft, ReviewStatus, StoredEvent, UnknownVariant,
};
use crate::services::error::ReconciliationError;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    EventUpdate, InvoiceStore, PaymentEventStore, ReconciliationStore, ReviewResolution,
    StoreResult, UnitOfWork,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, customer_id, customer_phone, \
     total_amount, amount_paid, due_date, status, version";

const EVENT_COLUMNS: &str = "payment_event_id, gateway, amount, payer_phone, payer_reference, \
     gateway_receipt_number, occurred_at, processing_status, received_utc, updated_utc";

const MATCH_COLUMNS: &str = "payment_event_id, gateway_receipt_number, invoice_id, score, \
     amount_score, phone_score, reference_score, decision, allocated_amount, matched_by, created_utc";

const REVIEW_COLUMNS: &str = "review_item_id, payment_event_id, best_candidate_invoice_id, \
     score, reason, assignee, status, resolution, resolved_by, created_utc, updated_utc, resolved_utc";

#[derive(FromRow)]
struct InvoiceRow {
    invoice_id: Uuid,
    invoice_number: String,
    customer_id: Uuid,
    customer_phone: Option<String>,
    total_amount: Decimal,
    amount_paid: Decimal,
    due_date: Option<NaiveDate>,
    status: String,
    version: i64,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = UnknownVariant;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            invoice_id: row.invoice_id,
            invoice_number: row.invoice_number,
            customer_id: row.customer_id,
            customer_phone: row.customer_phone,
            total_amount: row.total_amount,
            amount_paid: row.amount_paid,
            due_date: row.due_date,
            status: row.status.parse()?,
            version: row.version,
        })
    }
}

#[derive(FromRow)]
struct EventRow {
    payment_event_id: Uuid,
    gateway: String,
    amount: Decimal,
    payer_phone: Option<String>,
    payer_reference: Option<String>,
    gateway_receipt_number: String,
    occurred_at: DateTime<Utc>,
    processing_status: String,
    received_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<EventRow> for PaymentEvent {
    type Error = UnknownVariant;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(PaymentEvent {
            payment_event_id: row.payment_event_id,
            gateway: row.gateway.parse()?,
            amount: row.amount,
            payer_phone: row.payer_phone,
            payer_reference: row.payer_reference,
            gateway_receipt_number: row.gateway_receipt_number,
            occurred_at: row.occurred_at,
            processing_status: row.processing_status.parse()?,
            received_utc: row.received_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct MatchRow {
    payment_event_id: Uuid,
    gateway_receipt_number: String,
    invoice_id: Option<Uuid>,
    score: i16,
    amount_score: i16,
    phone_score: i16,
    reference_score: i16,
    decision: String,
    allocated_amount: Decimal,
    matched_by: String,
    created_utc: DateTime<Utc>,
}

fn score_from_db(value: i16) -> u8 {
    value.clamp(0, 100) as u8
}

impl TryFrom<MatchRow> for MatchRecord {
    type Error = UnknownVariant;

    fn try_from(row: MatchRow) -> Result<Self, Self::Error> {
        Ok(MatchRecord {
            payment_event_id: row.payment_event_id,
            gateway_receipt_number: row.gateway_receipt_number,
            invoice_id: row.invoice_id,
            score: score_from_db(row.score),
            component_scores: ComponentScores {
                amount: score_from_db(row.amount_score),
                phone: score_from_db(row.phone_score),
                reference: score_from_db(row.reference_score),
            },
            decision: row.decision.parse()?,
            allocated_amount: row.allocated_amount,
            matched_by: row.matched_by,
            created_utc: row.created_utc,
        })
    }
}

#[derive(FromRow)]
struct ReviewRow {
    review_item_id: Uuid,
    payment_event_id: Uuid,
    best_candidate_invoice_id: Option<Uuid>,
    score: i16,
    reason: String,
    assignee: Option<String>,
    status: String,
    resolution: Option<String>,
    resolved_by: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    resolved_utc: Option<DateTime<Utc>>,
}

impl TryFrom<ReviewRow> for ReviewItem {
    type Error = UnknownVariant;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(ReviewItem {
            review_item_id: row.review_item_id,
            payment_event_id: row.payment_event_id,
            best_candidate_invoice_id: row.best_candidate_invoice_id,
            score: score_from_db(row.score),
            reason: row.reason,
            assignee: row.assignee,
            status: row.status.parse()?,
            resolution: row.resolution,
            resolved_by: row.resolved_by,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
            resolved_utc: row.resolved_utc,
        })
    }
}

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> ReconciliationError {
    move |e| ReconciliationError::persistence(context, e)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "payment-reconciliation-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl InvoiceStore for PgStore {
    #[instrument(skip(self))]
    async fn get_open_invoices(&self, customer_phone: Option<&str>) -> StoreResult<Vec<Invoice>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_open_invoices"])
            .start_timer();

        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE status IN ('open', 'partially_paid')
              AND total_amount > amount_paid
              AND ($1::TEXT IS NULL OR customer_phone = $1)
            ORDER BY due_date ASC NULLS LAST, invoice_number ASC
            "#
        ))
        .bind(customer_phone)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list open invoices"))?;

        timer.observe_duration();
        Ok(rows
            .into_iter()
            .map(Invoice::try_from)
            .collect::<Result<_, _>>()?)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get invoice"))?;

        timer.observe_duration();
        Ok(row.map(Invoice::try_from).transpose()?)
    }
}

#[async_trait]
impl PaymentEventStore for PgStore {
    #[instrument(skip(self, event), fields(receipt = %event.gateway_receipt_number))]
    async fn store_event(&self, event: NewPaymentEvent) -> StoreResult<StoredEvent> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["store_event"])
            .start_timer();

        let inserted = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            INSERT INTO payment_events (payment_event_id, gateway, amount, payer_phone, payer_reference,
                                        gateway_receipt_number, occurred_at, processing_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (gateway_receipt_number) DO NOTHING
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(event.gateway.as_str())
        .bind(event.amount)
        .bind(&event.payer_phone)
        .bind(&event.payer_reference)
        .bind(&event.gateway_receipt_number)
        .bind(event.occurred_at)
        .bind(ProcessingStatus::Received.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to store payment event"))?;

        let stored = match inserted {
            Some(row) => StoredEvent {
                event: row.try_into()?,
                created: true,
            },
            None => {
                // Another delivery of the same receipt won the insert.
                let existing = self
                    .get_event_by_receipt(&event.gateway_receipt_number)
                    .await?
                    .ok_or_else(|| {
                        ReconciliationError::Conflict(format!(
                            "Receipt {} vanished after conflicting insert",
                            event.gateway_receipt_number
                        ))
                    })?;
                StoredEvent {
                    event: existing,
                    created: false,
                }
            }
        };

        timer.observe_duration();
        info!(
            payment_event_id = %stored.event.payment_event_id,
            created = stored.created,
            "Payment event stored"
        );
        Ok(stored)
    }

    #[instrument(skip(self), fields(payment_event_id = %payment_event_id))]
    async fn get_event(&self, payment_event_id: Uuid) -> StoreResult<Option<PaymentEvent>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events WHERE payment_event_id = $1"
        ))
        .bind(payment_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get payment event"))?;
        Ok(row.map(PaymentEvent::try_from).transpose()?)
    }

    #[instrument(skip(self))]
    async fn get_event_by_receipt(&self, receipt: &str) -> StoreResult<Option<PaymentEvent>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events WHERE gateway_receipt_number = $1"
        ))
        .bind(receipt)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get payment event by receipt"))?;
        Ok(row.map(PaymentEvent::try_from).transpose()?)
    }

    #[instrument(skip(self, statuses))]
    async fn list_events(
        &self,
        statuses: &[ProcessingStatus],
        updated_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<PaymentEvent>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_events"])
            .start_timer();

        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM payment_events
            WHERE processing_status = ANY($1)
              AND ($2::TIMESTAMPTZ IS NULL OR updated_utc < $2)
            ORDER BY received_utc ASC, payment_event_id ASC
            LIMIT $3
            "#
        ))
        .bind(&statuses)
        .bind(updated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list payment events"))?;

        timer.observe_duration();
        Ok(rows
            .into_iter()
            .map(PaymentEvent::try_from)
            .collect::<Result<_, _>>()?)
    }

    #[instrument(skip(self), fields(payment_event_id = %payment_event_id))]
    async fn mark_scored(&self, payment_event_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_events
            SET processing_status = 'scored', updated_utc = NOW()
            WHERE payment_event_id = $1 AND processing_status = 'received'
            "#,
        )
        .bind(payment_event_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to mark payment event scored"))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(payment_event_id = %payment_event_id))]
    async fn get_match_record(&self, payment_event_id: Uuid) -> StoreResult<Option<MatchRecord>> {
        let row = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM match_records WHERE payment_event_id = $1"
        ))
        .bind(payment_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get match record"))?;
        Ok(row.map(MatchRecord::try_from).transpose()?)
    }

    #[instrument(skip(self), fields(review_item_id = %review_item_id))]
    async fn get_review_item(&self, review_item_id: Uuid) -> StoreResult<Option<ReviewItem>> {
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM review_items WHERE review_item_id = $1"
        ))
        .bind(review_item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get review item"))?;
        Ok(row.map(ReviewItem::try_from).transpose()?)
    }

    #[instrument(skip(self), fields(payment_event_id = %payment_event_id))]
    async fn pending_review_item(&self, payment_event_id: Uuid) -> StoreResult<Option<ReviewItem>> {
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM review_items WHERE payment_event_id = $1 AND status = $2"
        ))
        .bind(payment_event_id)
        .bind(ReviewStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get pending review item"))?;
        Ok(row.map(ReviewItem::try_from).transpose()?)
    }

    #[instrument(skip(self))]
    async fn list_review_items(
        &self,
        status: ReviewStatus,
        assignee: Option<&str>,
    ) -> StoreResult<Vec<ReviewItem>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_review_items"])
            .start_timer();

        let rows = sqlx::query_as::<_, ReviewRow>(&format!(
            r#"
            SELECT {REVIEW_COLUMNS}
            FROM review_items
            WHERE status = $1 AND ($2::TEXT IS NULL OR assignee = $2)
            ORDER BY created_utc ASC, review_item_id ASC
            "#
        ))
        .bind(status.as_str())
        .bind(assignee)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list review items"))?;

        timer.observe_duration();
        Ok(rows
            .into_iter()
            .map(ReviewItem::try_from)
            .collect::<Result<_, _>>()?)
    }

    #[instrument(skip(self), fields(review_item_id = %review_item_id))]
    async fn assign_review_item(
        &self,
        review_item_id: Uuid,
        assignee: &str,
    ) -> StoreResult<Option<ReviewItem>> {
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            r#"
            UPDATE review_items
            SET assignee = $2, updated_utc = NOW()
            WHERE review_item_id = $1 AND status = 'pending'
            RETURNING {REVIEW_COLUMNS}
            "#
        ))
        .bind(review_item_id)
        .bind(assignee)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to assign review item"))?;
        Ok(row.map(ReviewItem::try_from).transpose()?)
    }
}

#[async_trait]
impl ReconciliationStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StoreResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Health check failed"))?;

        timer.observe_duration();
        Ok(())
    }
}

/// A database transaction. Dropping it without `commit` rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_event(&mut self, payment_event_id: Uuid) -> StoreResult<Option<PaymentEvent>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM payment_events WHERE payment_event_id = $1 FOR UPDATE"
        ))
        .bind(payment_event_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to lock payment event"))?;
        Ok(row.map(PaymentEvent::try_from).transpose()?)
    }

    async fn match_record(&mut self, payment_event_id: Uuid) -> StoreResult<Option<MatchRecord>> {
        let row = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM match_records WHERE payment_event_id = $1"
        ))
        .bind(payment_event_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to get match record"))?;
        Ok(row.map(MatchRecord::try_from).transpose()?)
    }

    async fn lock_invoice(&mut self, invoice_id: Uuid) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1 FOR UPDATE"
        ))
        .bind(invoice_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to lock invoice"))?;
        Ok(row.map(Invoice::try_from).transpose()?)
    }

    async fn update_invoice(&mut self, invoice_id: Uuid, patch: InvoicePatch) -> StoreResult<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET amount_paid = $2, status = $3, version = version + 1, updated_utc = NOW()
            WHERE invoice_id = $1 AND version = $4
            "#,
        )
        .bind(invoice_id)
        .bind(patch.amount_paid)
        .bind(patch.status.as_str())
        .bind(patch.expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to update invoice"))?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    async fn update_event(
        &mut self,
        payment_event_id: Uuid,
        update: EventUpdate,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_events
            SET processing_status = $2, updated_utc = NOW()
            WHERE payment_event_id = $1
            "#,
        )
        .bind(payment_event_id)
        .bind(update.processing_status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to update payment event"))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        if let Some(record) = update.match_record {
            // Final records are never overwritten; provisional ones are refreshed.
            sqlx::query(
                r#"
                INSERT INTO match_records (payment_event_id, gateway_receipt_number, invoice_id, score,
                                           amount_score, phone_score, reference_score, decision,
                                           allocated_amount, matched_by, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (payment_event_id) DO UPDATE
                SET invoice_id = EXCLUDED.invoice_id,
                    score = EXCLUDED.score,
                    amount_score = EXCLUDED.amount_score,
                    phone_score = EXCLUDED.phone_score,
                    reference_score = EXCLUDED.reference_score,
                    decision = EXCLUDED.decision,
                    allocated_amount = EXCLUDED.allocated_amount,
                    matched_by = EXCLUDED.matched_by,
                    created_utc = EXCLUDED.created_utc
                WHERE match_records.decision IN ('flagged_for_review', 'unmatched')
                "#,
            )
            .bind(record.payment_event_id)
            .bind(&record.gateway_receipt_number)
            .bind(record.invoice_id)
            .bind(i16::from(record.score))
            .bind(i16::from(record.component_scores.amount))
            .bind(i16::from(record.component_scores.phone))
            .bind(i16::from(record.component_scores.reference))
            .bind(record.decision.as_str())
            .bind(record.allocated_amount)
            .bind(&record.matched_by)
            .bind(record.created_utc)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("Failed to write match record"))?;
        }

        Ok(true)
    }

    async fn upsert_review_item(&mut self, draft: ReviewItemDraft) -> StoreResult<ReviewItem> {
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            r#"
            INSERT INTO review_items (review_item_id, payment_event_id, best_candidate_invoice_id,
                                      score, reason, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (payment_event_id) WHERE status = 'pending' DO UPDATE
            SET best_candidate_invoice_id = EXCLUDED.best_candidate_invoice_id,
                score = EXCLUDED.score,
                reason = EXCLUDED.reason,
                updated_utc = NOW()
            RETURNING {REVIEW_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(draft.payment_event_id)
        .bind(draft.best_candidate_invoice_id)
        .bind(i16::from(draft.score))
        .bind(&draft.reason)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error("Failed to upsert review item"))?;
        Ok(row.try_into()?)
    }

    async fn resolve_review_items(
        &mut self,
        payment_event_id: Uuid,
        resolution: ReviewResolution,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE review_items
            SET status = 'resolved', resolution = $2, resolved_by = $3,
                resolved_utc = NOW(), updated_utc = NOW()
            WHERE payment_event_id = $1 AND status = 'pending'
            "#,
        )
        .bind(payment_event_id)
        .bind(&resolution.resolution)
        .bind(&resolution.resolved_by)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to resolve review items"))?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(db_error("Failed to commit transaction"))
    }
}
