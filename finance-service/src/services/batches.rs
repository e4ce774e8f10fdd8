//! Batch engine: payment batch lifecycle and membership.
//!
//! A batch moves `draft -> approved -> paid`. Membership changes lock the
//! batch row and recompute totals from the association inside the same
//! transaction, so `total_amount`/`entries_count` always match the linked
//! entries.

use crate::models::{
    check_payment_reference, Actor, AuditAction, BatchDetails, BatchFilter, BatchStatus,
    BatchSummary, CreateBatch, EntityType, EntryDetails, EntryStatus, Page, Pagination,
    PaymentBatch, UpdateBatch,
};
use crate::services::audit::AuditTrail;
use crate::services::clock::Clock;
use crate::services::database::{db_error, write_error, Database};
use crate::services::entries::{DETAIL_COLUMNS, DETAIL_JOINS, ENTRY_COLUMNS};
use crate::services::metrics::record_batch_transition;
use chrono::{DateTime, Utc};
use serde_json::json;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

const BATCH_COLUMNS: &str = "b.id, b.name, b.description, b.technician_id, b.status, \
     b.period_start, b.period_end, b.total_amount, b.entries_count, b.created_by, \
     b.approved_by, b.approved_at, b.paid_at, b.payment_reference, b.created_at, b.updated_at";

const BATCH_DETAIL_COLUMNS: &str = "bt.name AS technician_name, cu.name AS created_by_name, \
     au.name AS approved_by_name";

const BATCH_DETAIL_JOINS: &str = "LEFT JOIN technicians bt ON bt.id = b.technician_id \
     LEFT JOIN users cu ON cu.id = b.created_by \
     LEFT JOIN users au ON au.id = b.approved_by";

/// Listing predicate; binds `$1..$4`.
const LIST_FILTER: &str = r#"
    ($1::varchar IS NULL OR b.status = $1)
    AND ($2::uuid IS NULL OR b.technician_id = $2)
    AND ($3::date IS NULL OR b.period_end >= $3)
    AND ($4::date IS NULL OR b.period_start <= $4)
"#;

// -----------------------------------------------------------------------------
// Shared helpers (also used by the entry store)
// -----------------------------------------------------------------------------

/// Recompute a batch's totals from its current links and persist them. The
/// caller holds the batch row lock, so this statement sees every committed
/// link.
pub(crate) async fn recompute_totals(
    conn: &mut PgConnection,
    batch_id: Uuid,
    now: DateTime<Utc>,
) -> Result<PaymentBatch, AppError> {
    let sql = format!(
        r#"
        UPDATE payment_batches AS b
        SET total_amount = agg.total, entries_count = agg.linked, updated_at = $2
        FROM (
            SELECT COALESCE(SUM(e.amount), 0) AS total, COUNT(e.id)::int AS linked
            FROM payment_batch_entries pbe
            JOIN financial_entries e ON e.id = pbe.entry_id
            WHERE pbe.batch_id = $1
        ) agg
        WHERE b.id = $1
        RETURNING {BATCH_COLUMNS}
        "#
    );
    sqlx::query_as::<_, PaymentBatch>(&sql)
        .bind(batch_id)
        .bind(now)
        .fetch_one(conn)
        .await
        .map_err(db_error("Failed to recompute batch totals"))
}

/// Lock every unpaid batch linking `entry_id`, in id order, and return
/// their ids. Taken before the entry row lock so entry edits and
/// membership changes acquire locks in the same order.
pub(crate) async fn lock_batches_linking(
    conn: &mut PgConnection,
    entry_id: Uuid,
) -> Result<Vec<Uuid>, AppError> {
    let batch_ids: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT b.id
        FROM payment_batches b
        JOIN payment_batch_entries pbe ON pbe.batch_id = b.id
        WHERE pbe.entry_id = $1 AND b.status <> 'paid'
        ORDER BY b.id
        FOR UPDATE OF b
        "#,
    )
    .bind(entry_id)
    .fetch_all(conn)
    .await
    .map_err(db_error("Failed to lock linked batches"))?;

    Ok(batch_ids.into_iter().map(|(id,)| id).collect())
}

/// Lock a batch row for a membership change and check it still accepts one.
async fn lock_for_membership(conn: &mut PgConnection, batch_id: Uuid) -> Result<(), AppError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT status FROM payment_batches WHERE id = $1 FOR UPDATE")
            .bind(batch_id)
            .fetch_optional(conn)
            .await
            .map_err(db_error("Failed to lock batch"))?;

    let Some((status,)) = row else {
        return Err(AppError::NotFound(anyhow::anyhow!("Payment batch {} not found", batch_id)));
    };
    let status: BatchStatus = status
        .parse()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("{}", e)))?;

    if !status.accepts_membership_changes() {
        return Err(AppError::InvalidTransition(anyhow::anyhow!(
            "Payment batch {} is {}; its entries can no longer change",
            batch_id,
            status
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct BatchEngine {
    db: Database,
    clock: Arc<dyn Clock>,
    audit: AuditTrail,
}

impl BatchEngine {
    pub fn new(db: Database, clock: Arc<dyn Clock>, audit: AuditTrail) -> Self {
        Self { db, clock, audit }
    }

    // -------------------------------------------------------------------------
    // Batch CRUD
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input, actor), fields(name = %input.name))]
    pub async fn create(
        &self,
        input: &CreateBatch,
        actor: &Actor,
    ) -> Result<PaymentBatch, AppError> {
        input.validate()?;

        let id = Uuid::new_v4();
        let now = self.clock.now();

        let result = self
            .db
            .run("create_batch", async {
                let sql = format!(
                    r#"
                    INSERT INTO payment_batches AS b (
                        id, name, description, technician_id, status,
                        period_start, period_end, total_amount, entries_count,
                        created_by, created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, 'draft', $5, $6, 0, 0, $7, $8, $8)
                    RETURNING {BATCH_COLUMNS}
                    "#
                );
                sqlx::query_as::<_, PaymentBatch>(&sql)
                    .bind(id)
                    .bind(&input.name)
                    .bind(&input.description)
                    .bind(input.technician_id)
                    .bind(input.period_start)
                    .bind(input.period_end)
                    .bind(actor.user_id)
                    .bind(now)
                    .fetch_one(self.db.pool())
                    .await
                    .map_err(write_error("Failed to create payment batch"))
            })
            .await;

        record_batch_transition("create", result.is_ok());
        let batch = result?;

        info!(batch_id = %batch.id, "Payment batch created");

        self.audit
            .record_best_effort(
                EntityType::PaymentBatch,
                batch.id,
                AuditAction::Create,
                &batch,
                Some(actor),
            )
            .await;

        Ok(batch)
    }

    /// Batch with resolved names and its linked entries, read from one
    /// snapshot.
    #[instrument(skip(self), fields(batch_id = %id))]
    pub async fn get(&self, id: Uuid) -> Result<BatchDetails, AppError> {
        self.db
            .run("get_batch", async {
                let mut tx = self.db.begin_snapshot().await?;

                let summary_sql = format!(
                    r#"
                    SELECT {BATCH_COLUMNS}, {BATCH_DETAIL_COLUMNS}
                    FROM payment_batches b
                    {BATCH_DETAIL_JOINS}
                    WHERE b.id = $1
                    "#
                );
                let summary = sqlx::query_as::<_, BatchSummary>(&summary_sql)
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error("Failed to get payment batch"))?
                    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment batch {} not found", id)))?;

                let entries_sql = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS}, {DETAIL_COLUMNS}
                    FROM payment_batch_entries pbe
                    JOIN financial_entries e ON e.id = pbe.entry_id
                    {DETAIL_JOINS}
                    WHERE pbe.batch_id = $1
                    ORDER BY e.entry_date, e.created_at, e.id
                    "#
                );
                let entries = sqlx::query_as::<_, EntryDetails>(&entries_sql)
                    .bind(id)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(db_error("Failed to get batch entries"))?;

                tx.commit()
                    .await
                    .map_err(db_error("Failed to close read snapshot"))?;

                Ok(BatchDetails { summary, entries })
            })
            .await
    }

    /// Edit a draft batch. Totals are never touched here.
    #[instrument(skip(self, input, actor), fields(batch_id = %id))]
    pub async fn update(
        &self,
        id: Uuid,
        input: &UpdateBatch,
        actor: &Actor,
    ) -> Result<PaymentBatch, AppError> {
        input.validate()?;

        let now = self.clock.now();

        let result = self
            .db
            .run("update_batch", async {
                let sql = format!(
                    r#"
                    UPDATE payment_batches AS b
                    SET name = $2, description = $3, technician_id = $4,
                        period_start = $5, period_end = $6, updated_at = $7
                    WHERE b.id = $1 AND b.status = 'draft'
                    RETURNING {BATCH_COLUMNS}
                    "#
                );
                let updated = sqlx::query_as::<_, PaymentBatch>(&sql)
                    .bind(id)
                    .bind(&input.name)
                    .bind(&input.description)
                    .bind(input.technician_id)
                    .bind(input.period_start)
                    .bind(input.period_end)
                    .bind(now)
                    .fetch_optional(self.db.pool())
                    .await
                    .map_err(write_error("Failed to update payment batch"))?;

                match updated {
                    Some(batch) => Ok(batch),
                    None => Err(self.not_draft(id, "edited").await),
                }
            })
            .await;

        record_batch_transition("update", result.is_ok());
        let batch = result?;

        info!(batch_id = %batch.id, "Payment batch updated");

        self.audit
            .record_best_effort(
                EntityType::PaymentBatch,
                batch.id,
                AuditAction::Update,
                &batch,
                Some(actor),
            )
            .await;

        Ok(batch)
    }

    /// Delete a draft batch. Links cascade; entries are untouched.
    #[instrument(skip(self, actor), fields(batch_id = %id))]
    pub async fn delete(&self, id: Uuid, actor: &Actor) -> Result<(), AppError> {
        let result = self
            .db
            .run("delete_batch", async {
                let sql = format!(
                    "DELETE FROM payment_batches AS b WHERE b.id = $1 AND b.status = 'draft' \
                     RETURNING {BATCH_COLUMNS}"
                );
                let deleted = sqlx::query_as::<_, PaymentBatch>(&sql)
                    .bind(id)
                    .fetch_optional(self.db.pool())
                    .await
                    .map_err(db_error("Failed to delete payment batch"))?;

                match deleted {
                    Some(batch) => Ok(batch),
                    None => Err(self.not_draft(id, "deleted").await),
                }
            })
            .await;

        record_batch_transition("delete", result.is_ok());
        let batch = result?;

        info!(batch_id = %batch.id, "Payment batch deleted");

        self.audit
            .record_best_effort(
                EntityType::PaymentBatch,
                batch.id,
                AuditAction::Delete,
                &batch,
                Some(actor),
            )
            .await;

        Ok(())
    }

    #[instrument(skip(self, filter))]
    pub async fn list(
        &self,
        filter: &BatchFilter,
        pagination: Pagination,
    ) -> Result<Page<PaymentBatch>, AppError> {
        let pagination = pagination.normalized();

        self.db
            .run("list_batches", async {
                let count_sql =
                    format!("SELECT COUNT(*) FROM payment_batches b WHERE {LIST_FILTER}");
                let (total,): (i64,) = sqlx::query_as(&count_sql)
                    .bind(filter.status.map(|s| s.as_str()))
                    .bind(filter.technician_id)
                    .bind(filter.period_from)
                    .bind(filter.period_to)
                    .fetch_one(self.db.pool())
                    .await
                    .map_err(db_error("Failed to count payment batches"))?;

                let list_sql = format!(
                    r#"
                    SELECT {BATCH_COLUMNS}
                    FROM payment_batches b
                    WHERE {LIST_FILTER}
                    ORDER BY b.period_end DESC, b.created_at DESC, b.id DESC
                    LIMIT $5 OFFSET $6
                    "#
                );
                let items = sqlx::query_as::<_, PaymentBatch>(&list_sql)
                    .bind(filter.status.map(|s| s.as_str()))
                    .bind(filter.technician_id)
                    .bind(filter.period_from)
                    .bind(filter.period_to)
                    .bind(pagination.limit)
                    .bind(pagination.offset())
                    .fetch_all(self.db.pool())
                    .await
                    .map_err(db_error("Failed to list payment batches"))?;

                Ok(Page::new(items, total, pagination))
            })
            .await
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Link entries to a batch. Re-adding an already linked entry is a no-op.
    /// New entries must be open (`pending`/`overdue`) and not linked to any
    /// other batch.
    #[instrument(skip(self, entry_ids, actor), fields(batch_id = %batch_id, count = entry_ids.len()))]
    pub async fn add_entries(
        &self,
        batch_id: Uuid,
        entry_ids: &[Uuid],
        actor: &Actor,
    ) -> Result<PaymentBatch, AppError> {
        let requested: Vec<Uuid> = entry_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if requested.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "At least one entry id is required"
            )));
        }

        let now = self.clock.now();

        let result = self
            .db
            .run("add_batch_entries", async {
                let mut tx = self.db.begin().await?;

                lock_for_membership(&mut tx, batch_id).await?;

                // Row locks serialize with entry deletes and with other
                // batches claiming the same entries.
                let found: Vec<(Uuid, String)> = sqlx::query_as(
                    r#"
                    SELECT id, status FROM financial_entries
                    WHERE id = ANY($1) AND deleted_at IS NULL
                    ORDER BY id
                    FOR UPDATE
                    "#,
                )
                .bind(&requested)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error("Failed to load entries"))?;

                let found_ids: BTreeSet<Uuid> = found.iter().map(|(id, _)| *id).collect();
                let missing: Vec<String> = requested
                    .iter()
                    .filter(|id| !found_ids.contains(id))
                    .map(Uuid::to_string)
                    .collect();
                if !missing.is_empty() {
                    return Err(AppError::NotFound(anyhow::anyhow!(
                        "Entries not found: {}",
                        missing.join(", ")
                    )));
                }

                let links: Vec<(Uuid, Uuid)> = sqlx::query_as(
                    "SELECT entry_id, batch_id FROM payment_batch_entries WHERE entry_id = ANY($1)",
                )
                .bind(&requested)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error("Failed to load batch links"))?;

                let already_here: BTreeSet<Uuid> = links
                    .iter()
                    .filter(|(_, b)| *b == batch_id)
                    .map(|(e, _)| *e)
                    .collect();
                let elsewhere: Vec<String> = links
                    .iter()
                    .filter(|(e, b)| *b != batch_id && !already_here.contains(e))
                    .map(|(e, b)| format!("{} (batch {})", e, b))
                    .collect();
                if !elsewhere.is_empty() {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Entries already belong to another payment batch: {}",
                        elsewhere.join(", ")
                    )));
                }

                let mut not_open = Vec::new();
                let mut added = Vec::new();
                for (id, status) in &found {
                    if already_here.contains(id) {
                        continue;
                    }
                    let open = status
                        .parse::<EntryStatus>()
                        .map(EntryStatus::is_batchable)
                        .unwrap_or(false);
                    if open {
                        added.push(*id);
                    } else {
                        not_open.push(format!("{} ({})", id, status));
                    }
                }
                if !not_open.is_empty() {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Only pending or overdue entries can be batched: {}",
                        not_open.join(", ")
                    )));
                }

                sqlx::query(
                    r#"
                    INSERT INTO payment_batch_entries (batch_id, entry_id, created_at)
                    SELECT $1, ids.id, $3 FROM UNNEST($2::uuid[]) AS ids(id)
                    ON CONFLICT (batch_id, entry_id) DO NOTHING
                    "#,
                )
                .bind(batch_id)
                .bind(&added)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to link entries"))?;

                let batch = recompute_totals(&mut tx, batch_id, now).await?;

                tx.commit()
                    .await
                    .map_err(db_error("Failed to commit batch membership"))?;
                Ok((batch, added))
            })
            .await;

        record_batch_transition("add_entries", result.is_ok());
        let (batch, added) = result?;

        info!(
            batch_id = %batch.id,
            added = added.len(),
            total_amount = %batch.total_amount,
            entries_count = batch.entries_count,
            "Entries added to payment batch"
        );

        self.audit
            .record_best_effort(
                EntityType::PaymentBatch,
                batch.id,
                AuditAction::AddEntries,
                &json!({
                    "entry_ids": added,
                    "total_amount": batch.total_amount,
                    "entries_count": batch.entries_count,
                }),
                Some(actor),
            )
            .await;

        Ok(batch)
    }

    /// Unlink one entry. Unlinking an entry that is not in the batch still
    /// recomputes and returns the batch.
    #[instrument(skip(self, actor), fields(batch_id = %batch_id, entry_id = %entry_id))]
    pub async fn remove_entry(
        &self,
        batch_id: Uuid,
        entry_id: Uuid,
        actor: &Actor,
    ) -> Result<PaymentBatch, AppError> {
        let now = self.clock.now();

        let result = self
            .db
            .run("remove_batch_entry", async {
                let mut tx = self.db.begin().await?;

                lock_for_membership(&mut tx, batch_id).await?;

                let removed = sqlx::query(
                    "DELETE FROM payment_batch_entries WHERE batch_id = $1 AND entry_id = $2",
                )
                .bind(batch_id)
                .bind(entry_id)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to unlink entry"))?
                .rows_affected();

                let batch = recompute_totals(&mut tx, batch_id, now).await?;

                tx.commit()
                    .await
                    .map_err(db_error("Failed to commit batch membership"))?;
                Ok((batch, removed > 0))
            })
            .await;

        record_batch_transition("remove_entry", result.is_ok());
        let (batch, removed) = result?;

        info!(
            batch_id = %batch.id,
            removed = removed,
            total_amount = %batch.total_amount,
            entries_count = batch.entries_count,
            "Entry removed from payment batch"
        );

        if removed {
            self.audit
                .record_best_effort(
                    EntityType::PaymentBatch,
                    batch.id,
                    AuditAction::RemoveEntry,
                    &json!({
                        "entry_id": entry_id,
                        "total_amount": batch.total_amount,
                        "entries_count": batch.entries_count,
                    }),
                    Some(actor),
                )
                .await;
        }

        Ok(batch)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// `draft -> approved`.
    #[instrument(skip(self, approver), fields(batch_id = %batch_id, approver = %approver.user_id))]
    pub async fn approve(
        &self,
        batch_id: Uuid,
        approver: &Actor,
    ) -> Result<PaymentBatch, AppError> {
        let now = self.clock.now();

        let result = self
            .db
            .run("approve_batch", async {
                let sql = format!(
                    r#"
                    UPDATE payment_batches AS b
                    SET status = 'approved', approved_by = $2, approved_at = $3, updated_at = $3
                    WHERE b.id = $1 AND b.status = 'draft'
                    RETURNING {BATCH_COLUMNS}
                    "#
                );
                let approved = sqlx::query_as::<_, PaymentBatch>(&sql)
                    .bind(batch_id)
                    .bind(approver.user_id)
                    .bind(now)
                    .fetch_optional(self.db.pool())
                    .await
                    .map_err(db_error("Failed to approve payment batch"))?;

                match approved {
                    Some(batch) => Ok(batch),
                    None => Err(self
                        .transition_refused(batch_id, BatchStatus::Draft, BatchStatus::Approved)
                        .await),
                }
            })
            .await;

        record_batch_transition("approve", result.is_ok());
        let batch = result?;

        info!(batch_id = %batch.id, "Payment batch approved");

        self.audit
            .record_best_effort(
                EntityType::PaymentBatch,
                batch.id,
                AuditAction::Approve,
                &json!({ "status": batch.status, "approved_at": batch.approved_at }),
                Some(approver),
            )
            .await;

        Ok(batch)
    }

    /// `approved -> paid`, settling every linked entry in the same
    /// transaction. If any linked entry is no longer open, nothing changes.
    #[instrument(skip(self, actor), fields(batch_id = %batch_id))]
    pub async fn pay(
        &self,
        batch_id: Uuid,
        payment_reference: &str,
        actor: &Actor,
    ) -> Result<PaymentBatch, AppError> {
        let payment_reference = payment_reference.trim();
        if payment_reference.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment reference is required"
            )));
        }
        check_payment_reference(payment_reference)?;

        let now = self.clock.now();

        let result = self
            .db
            .run("pay_batch", async {
                let mut tx = self.db.begin().await?;

                let sql = format!(
                    r#"
                    UPDATE payment_batches AS b
                    SET status = 'paid', paid_at = $2, payment_reference = $3, updated_at = $2
                    WHERE b.id = $1 AND b.status = 'approved'
                    RETURNING {BATCH_COLUMNS}
                    "#
                );
                let paid = sqlx::query_as::<_, PaymentBatch>(&sql)
                    .bind(batch_id)
                    .bind(now)
                    .bind(payment_reference)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(write_error("Failed to pay payment batch"))?;

                let Some(batch) = paid else {
                    if let Err(e) = tx.rollback().await {
                        warn!(batch_id = %batch_id, error = %e, "Failed to roll back refused payment");
                    }
                    return Err(self
                        .transition_refused(batch_id, BatchStatus::Approved, BatchStatus::Paid)
                        .await);
                };

                let settled: Vec<(Uuid,)> = sqlx::query_as(
                    r#"
                    UPDATE financial_entries AS e
                    SET status = 'paid', payment_date = $2, payment_reference = $3,
                        updated_by = $4, updated_at = $5, version = e.version + 1
                    FROM payment_batch_entries pbe
                    WHERE pbe.batch_id = $1
                      AND pbe.entry_id = e.id
                      AND e.status IN ('pending', 'overdue')
                    RETURNING e.id
                    "#,
                )
                .bind(batch_id)
                .bind(now.date_naive())
                .bind(payment_reference)
                .bind(actor.user_id)
                .bind(now)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error("Failed to settle batch entries"))?;

                let settled: Vec<Uuid> = settled.into_iter().map(|(id,)| id).collect();

                let blocked: Vec<(Uuid, String)> = sqlx::query_as(
                    r#"
                    SELECT e.id, e.status
                    FROM payment_batch_entries pbe
                    JOIN financial_entries e ON e.id = pbe.entry_id
                    WHERE pbe.batch_id = $1 AND NOT (e.id = ANY($2))
                    "#,
                )
                .bind(batch_id)
                .bind(&settled)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error("Failed to check batch entries"))?;

                if !blocked.is_empty() {
                    if let Err(e) = tx.rollback().await {
                        warn!(batch_id = %batch_id, error = %e, "Failed to roll back refused payment");
                    }
                    let listed: Vec<String> = blocked
                        .iter()
                        .map(|(id, status)| format!("{} ({})", id, status))
                        .collect();
                    warn!(batch_id = %batch_id, blocked = blocked.len(), "Batch payment refused");
                    return Err(AppError::InvalidTransition(anyhow::anyhow!(
                        "Payment batch {} has entries that cannot be paid: {}",
                        batch_id,
                        listed.join(", ")
                    )));
                }

                tx.commit()
                    .await
                    .map_err(db_error("Failed to commit batch payment"))?;
                Ok((batch, settled))
            })
            .await;

        record_batch_transition("pay", result.is_ok());
        let (batch, settled) = result?;

        info!(
            batch_id = %batch.id,
            entries_paid = settled.len(),
            total_amount = %batch.total_amount,
            "Payment batch paid"
        );

        self.audit
            .record_best_effort(
                EntityType::PaymentBatch,
                batch.id,
                AuditAction::Pay,
                &json!({
                    "status": batch.status,
                    "paid_at": batch.paid_at,
                    "payment_reference": batch.payment_reference,
                    "entry_ids": settled,
                }),
                Some(actor),
            )
            .await;

        self.audit
            .record_many_best_effort(
                EntityType::FinancialEntry,
                &settled,
                AuditAction::Pay,
                &json!({
                    "status": EntryStatus::Paid,
                    "payment_reference": batch.payment_reference,
                    "batch_id": batch.id,
                }),
                Some(actor),
            )
            .await;

        Ok(batch)
    }

    // -------------------------------------------------------------------------
    // Error helpers
    // -------------------------------------------------------------------------

    async fn current_status(&self, id: Uuid) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM payment_batches WHERE id = $1")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await
                .map_err(db_error("Failed to read batch status"))?;
        Ok(row.map(|(status,)| status))
    }

    /// Error for a draft-only edit that matched no row.
    async fn not_draft(&self, id: Uuid, verb: &str) -> AppError {
        match self.current_status(id).await {
            Ok(Some(status)) => AppError::InvalidTransition(anyhow::anyhow!(
                "Payment batch {} is {}; only draft batches can be {}",
                id,
                status,
                verb
            )),
            Ok(None) => AppError::NotFound(anyhow::anyhow!("Payment batch {} not found", id)),
            Err(e) => e,
        }
    }

    /// Error for a lifecycle step whose precondition did not hold.
    async fn transition_refused(&self, id: Uuid, from: BatchStatus, to: BatchStatus) -> AppError {
        match self.current_status(id).await {
            Ok(Some(status)) => AppError::InvalidTransition(anyhow::anyhow!(
                "Payment batch {} is {}; only {} batches can become {}",
                id,
                status,
                from,
                to
            )),
            Ok(None) => AppError::InvalidTransition(anyhow::anyhow!(
                "Payment batch {} not found; cannot become {}",
                id,
                to
            )),
            Err(e) => e,
        }
    }
}
