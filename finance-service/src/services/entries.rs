//! Entry store: CRUD, status machine and the overdue sweep for
//! `financial_entries`.

use crate::models::{
    check_payment_reference, Actor, AuditAction, CreateEntry, EntityType, EntryDetails,
    EntryFilter, EntryStatus, FinancialEntry, Page, Pagination, UpdateEntry,
};
use crate::services::audit::AuditTrail;
use crate::services::batches::{lock_batches_linking, recompute_totals};
use crate::services::clock::Clock;
use crate::services::database::{db_error, write_error, Database};
use crate::services::metrics::{record_entry_operation, OVERDUE_SWEPT_TOTAL};
use chrono::NaiveDate;
use serde_json::json;
use service_core::error::AppError;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::Postgres;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Entry columns under the `e` alias.
pub(crate) const ENTRY_COLUMNS: &str = "e.id, e.entry_type, e.category, e.subcategory, \
     e.description, e.amount, e.entry_date, e.due_date, e.payment_date, e.status, \
     e.ticket_id, e.technician_id, e.client_id, e.payment_method, e.payment_reference, \
     e.attachments, e.created_by, e.updated_by, e.created_at, e.updated_at, e.version";

/// Resolved reference names for [`EntryDetails`]; pairs with [`DETAIL_JOINS`].
pub(crate) const DETAIL_COLUMNS: &str = "t.title AS ticket_title, tech.name AS technician_name, \
     c.name AS client_name, u.name AS created_by_name";

pub(crate) const DETAIL_JOINS: &str = "LEFT JOIN tickets t ON t.id = e.ticket_id \
     LEFT JOIN technicians tech ON tech.id = e.technician_id \
     LEFT JOIN clients c ON c.id = e.client_id \
     LEFT JOIN users u ON u.id = e.created_by";

/// Listing predicate; binds `$1..$8` in [`bind_filter`] order.
const LIST_FILTER: &str = r#"
    e.deleted_at IS NULL
    AND ($1::varchar IS NULL OR e.entry_type = $1)
    AND ($2::varchar IS NULL OR e.status = $2)
    AND ($3::varchar IS NULL OR e.category = $3)
    AND ($4::date IS NULL OR e.entry_date >= $4)
    AND ($5::date IS NULL OR e.entry_date <= $5)
    AND ($6::uuid IS NULL OR e.technician_id = $6)
    AND ($7::uuid IS NULL OR e.client_id = $7)
    AND ($8::uuid IS NULL OR e.ticket_id = $8)
"#;

fn bind_filter<'q, O>(
    query: QueryAs<'q, Postgres, O, PgArguments>,
    filter: &'q EntryFilter,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    query
        .bind(filter.entry_type.map(|t| t.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.category.as_deref())
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.technician_id)
        .bind(filter.client_id)
        .bind(filter.ticket_id)
}

/// Stamp today's date on entries marked paid without an explicit date.
fn effective_payment_date(
    status: EntryStatus,
    supplied: Option<NaiveDate>,
    today: NaiveDate,
) -> Option<NaiveDate> {
    match (status, supplied) {
        (EntryStatus::Paid, None) => Some(today),
        (_, date) => date,
    }
}

#[derive(Clone)]
pub struct EntryStore {
    db: Database,
    clock: Arc<dyn Clock>,
    audit: AuditTrail,
}

impl EntryStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>, audit: AuditTrail) -> Self {
        Self { db, clock, audit }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input, actor), fields(entry_type = %input.entry_type, category = %input.category))]
    pub async fn create(
        &self,
        input: &CreateEntry,
        actor: &Actor,
    ) -> Result<FinancialEntry, AppError> {
        input.validate()?;

        let id = Uuid::new_v4();
        let now = self.clock.now();
        let status = input.status.unwrap_or(EntryStatus::Pending);
        let payment_date = effective_payment_date(status, input.payment_date, self.clock.today());

        let result = self
            .db
            .run("create_entry", async {
                let sql = format!(
                    r#"
                    INSERT INTO financial_entries AS e (
                        id, entry_type, category, subcategory, description, amount,
                        entry_date, due_date, payment_date, status,
                        ticket_id, technician_id, client_id,
                        payment_method, payment_reference, attachments,
                        created_by, created_at, updated_at, version
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                            $11, $12, $13, $14, $15, $16, $17, $18, $18, 1)
                    RETURNING {ENTRY_COLUMNS}
                    "#
                );
                sqlx::query_as::<_, FinancialEntry>(&sql)
                    .bind(id)
                    .bind(input.entry_type.as_str())
                    .bind(&input.category)
                    .bind(&input.subcategory)
                    .bind(&input.description)
                    .bind(input.amount)
                    .bind(input.entry_date)
                    .bind(input.due_date)
                    .bind(payment_date)
                    .bind(status.as_str())
                    .bind(input.ticket_id)
                    .bind(input.technician_id)
                    .bind(input.client_id)
                    .bind(&input.payment_method)
                    .bind(&input.payment_reference)
                    .bind(&input.attachments)
                    .bind(actor.user_id)
                    .bind(now)
                    .fetch_one(self.db.pool())
                    .await
                    .map_err(write_error("Failed to create entry"))
            })
            .await;

        record_entry_operation("create", result.is_ok());
        let entry = result?;

        info!(entry_id = %entry.id, amount = %entry.amount, status = %entry.status, "Entry created");

        self.audit
            .record_best_effort(
                EntityType::FinancialEntry,
                entry.id,
                AuditAction::Create,
                &entry,
                Some(actor),
            )
            .await;

        Ok(entry)
    }

    /// Full update under optimistic concurrency.
    ///
    /// Lands only if the row still carries `input.version` and its status may
    /// move to `input.status`. A paid entry's amount is frozen. Batches that
    /// link the entry and are not yet paid get their totals refreshed in the
    /// same transaction.
    #[instrument(skip(self, input, actor), fields(entry_id = %id, version = input.version))]
    pub async fn update(
        &self,
        id: Uuid,
        input: &UpdateEntry,
        actor: &Actor,
    ) -> Result<FinancialEntry, AppError> {
        input.validate()?;

        let now = self.clock.now();
        let payment_date = effective_payment_date(input.status, input.payment_date, self.clock.today());

        let result = self
            .db
            .run("update_entry", async {
                let mut tx = self.db.begin().await?;

                // Batch locks come before the entry row, as in add_entries.
                lock_batches_linking(&mut tx, id).await?;

                let sql = format!(
                    r#"
                    UPDATE financial_entries AS e
                    SET entry_type = $3, category = $4, subcategory = $5, description = $6,
                        amount = $7, entry_date = $8, due_date = $9, payment_date = $10,
                        status = $11, ticket_id = $12, technician_id = $13, client_id = $14,
                        payment_method = $15, payment_reference = $16, attachments = $17,
                        updated_by = $18, updated_at = $19, version = e.version + 1
                    WHERE e.id = $1
                      AND e.version = $2
                      AND e.deleted_at IS NULL
                      AND e.status = ANY($20)
                      AND (e.status <> 'paid' OR e.amount = $7)
                    RETURNING {ENTRY_COLUMNS}
                    "#
                );
                let updated = sqlx::query_as::<_, FinancialEntry>(&sql)
                    .bind(id)
                    .bind(input.version)
                    .bind(input.entry_type.as_str())
                    .bind(&input.category)
                    .bind(&input.subcategory)
                    .bind(&input.description)
                    .bind(input.amount)
                    .bind(input.entry_date)
                    .bind(input.due_date)
                    .bind(payment_date)
                    .bind(input.status.as_str())
                    .bind(input.ticket_id)
                    .bind(input.technician_id)
                    .bind(input.client_id)
                    .bind(&input.payment_method)
                    .bind(&input.payment_reference)
                    .bind(&input.attachments)
                    .bind(actor.user_id)
                    .bind(now)
                    .bind(input.status.predecessor_labels())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(write_error("Failed to update entry"))?;

                let Some(entry) = updated else {
                    let current: Option<(String, i32)> = sqlx::query_as(
                        "SELECT status, version FROM financial_entries WHERE id = $1 AND deleted_at IS NULL",
                    )
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error("Failed to read entry"))?;

                    return Err(match current {
                        Some((status, version)) if version == input.version => {
                            if status == EntryStatus::Paid.as_str() && input.status == EntryStatus::Paid {
                                AppError::InvalidTransition(anyhow::anyhow!(
                                    "Entry {} is paid; its amount can no longer change",
                                    id
                                ))
                            } else {
                                AppError::InvalidTransition(anyhow::anyhow!(
                                    "Entry {} cannot move from {} to {}",
                                    id,
                                    status,
                                    input.status
                                ))
                            }
                        }
                        Some((_, version)) => AppError::Conflict(anyhow::anyhow!(
                            "Entry {} was modified concurrently (read version {}, current {})",
                            id,
                            input.version,
                            version
                        )),
                        None => AppError::Conflict(anyhow::anyhow!(
                            "Entry {} does not exist or was modified concurrently",
                            id
                        )),
                    });
                };

                // Re-read under the entry row lock: a link committed while the
                // CAS waited on that lock is only visible from here on.
                for batch_id in lock_batches_linking(&mut tx, id).await? {
                    recompute_totals(&mut tx, batch_id, now).await?;
                }

                tx.commit()
                    .await
                    .map_err(db_error("Failed to commit entry update"))?;
                Ok(entry)
            })
            .await;

        record_entry_operation("update", result.is_ok());
        let entry = result?;

        info!(entry_id = %entry.id, version = entry.version, "Entry updated");

        self.audit
            .record_best_effort(
                EntityType::FinancialEntry,
                entry.id,
                AuditAction::Update,
                &entry,
                Some(actor),
            )
            .await;

        Ok(entry)
    }

    /// Status-only update. No version precondition; the status machine still
    /// applies. `payment_date` and `payment_reference` are only overwritten
    /// when supplied.
    #[instrument(skip(self, payment_reference, actor), fields(entry_id = %id, status = %status))]
    pub async fn update_status(
        &self,
        id: Uuid,
        status: EntryStatus,
        payment_date: Option<NaiveDate>,
        payment_reference: Option<&str>,
        actor: &Actor,
    ) -> Result<FinancialEntry, AppError> {
        if let Some(reference) = payment_reference {
            check_payment_reference(reference)?;
        }

        let now = self.clock.now();
        let payment_date = effective_payment_date(status, payment_date, self.clock.today());

        let result = self
            .db
            .run("update_entry_status", async {
                let sql = format!(
                    r#"
                    UPDATE financial_entries AS e
                    SET status = $2,
                        payment_date = COALESCE($3, e.payment_date),
                        payment_reference = COALESCE($4, e.payment_reference),
                        updated_by = $5, updated_at = $6, version = e.version + 1
                    WHERE e.id = $1 AND e.deleted_at IS NULL AND e.status = ANY($7)
                    RETURNING {ENTRY_COLUMNS}
                    "#
                );
                let updated = sqlx::query_as::<_, FinancialEntry>(&sql)
                    .bind(id)
                    .bind(status.as_str())
                    .bind(payment_date)
                    .bind(payment_reference)
                    .bind(actor.user_id)
                    .bind(now)
                    .bind(status.predecessor_labels())
                    .fetch_optional(self.db.pool())
                    .await
                    .map_err(write_error("Failed to update entry status"))?;

                match updated {
                    Some(entry) => Ok(entry),
                    None => match self.current_status(id).await? {
                        Some(current) => Err(AppError::InvalidTransition(anyhow::anyhow!(
                            "Entry {} cannot move from {} to {}",
                            id,
                            current,
                            status
                        ))),
                        None => Err(AppError::NotFound(anyhow::anyhow!("Entry {} not found", id))),
                    },
                }
            })
            .await;

        record_entry_operation("update_status", result.is_ok());
        let entry = result?;

        info!(entry_id = %entry.id, status = %entry.status, "Entry status updated");

        self.audit
            .record_best_effort(
                EntityType::FinancialEntry,
                entry.id,
                AuditAction::StatusUpdate,
                &json!({
                    "status": entry.status,
                    "payment_date": entry.payment_date,
                    "payment_reference": entry.payment_reference,
                    "version": entry.version,
                }),
                Some(actor),
            )
            .await;

        Ok(entry)
    }

    /// Soft delete. Entries still linked to a batch must be removed from it
    /// first.
    #[instrument(skip(self, actor), fields(entry_id = %id))]
    pub async fn delete(&self, id: Uuid, actor: &Actor) -> Result<(), AppError> {
        let now = self.clock.now();

        let result = self
            .db
            .run("delete_entry", async {
                let mut tx = self.db.begin().await?;

                // Row lock serializes with add_entries, which locks the same rows.
                let found: Option<(Uuid,)> = sqlx::query_as(
                    "SELECT id FROM financial_entries WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error("Failed to lock entry"))?;

                if found.is_none() {
                    return Err(AppError::NotFound(anyhow::anyhow!("Entry {} not found", id)));
                }

                let linked: Vec<(Uuid,)> = sqlx::query_as(
                    "SELECT batch_id FROM payment_batch_entries WHERE entry_id = $1",
                )
                .bind(id)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error("Failed to check batch links"))?;

                if let Some((batch_id,)) = linked.first() {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Entry {} is linked to payment batch {}; remove it from the batch first",
                        id,
                        batch_id
                    )));
                }

                sqlx::query(
                    r#"
                    UPDATE financial_entries
                    SET deleted_at = $2, updated_at = $2, updated_by = $3, version = version + 1
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(now)
                .bind(actor.user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to delete entry"))?;

                tx.commit()
                    .await
                    .map_err(db_error("Failed to commit entry delete"))?;
                Ok(())
            })
            .await;

        record_entry_operation("delete", result.is_ok());
        result?;

        info!(entry_id = %id, "Entry deleted");

        self.audit
            .record_best_effort(
                EntityType::FinancialEntry,
                id,
                AuditAction::Delete,
                &json!({ "deleted_at": now }),
                Some(actor),
            )
            .await;

        Ok(())
    }

    /// Move many entries to `status` in one statement. Rows whose current
    /// status cannot move there, or that already hold it, are left alone.
    /// No per-row version check; versions are still bumped.
    #[instrument(skip(self, ids, actor), fields(count = ids.len(), status = %status))]
    pub async fn bulk_update_status(
        &self,
        ids: &[Uuid],
        status: EntryStatus,
        payment_date: Option<NaiveDate>,
        actor: &Actor,
    ) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = self.clock.now();
        let payment_date = effective_payment_date(status, payment_date, self.clock.today());

        let result = self
            .db
            .run("bulk_update_entry_status", async {
                let rows: Vec<(Uuid,)> = sqlx::query_as(
                    r#"
                    UPDATE financial_entries AS e
                    SET status = $2,
                        payment_date = COALESCE($3, e.payment_date),
                        updated_by = $4, updated_at = $5, version = e.version + 1
                    WHERE e.id = ANY($1)
                      AND e.deleted_at IS NULL
                      AND e.status <> $2
                      AND e.status = ANY($6)
                    RETURNING e.id
                    "#,
                )
                .bind(ids)
                .bind(status.as_str())
                .bind(payment_date)
                .bind(actor.user_id)
                .bind(now)
                .bind(status.predecessor_labels())
                .fetch_all(self.db.pool())
                .await
                .map_err(db_error("Failed to bulk update entry status"))?;
                Ok(rows.into_iter().map(|(id,)| id).collect::<Vec<_>>())
            })
            .await;

        record_entry_operation("bulk_update_status", result.is_ok());
        let affected = result?;

        info!(requested = ids.len(), affected = affected.len(), status = %status, "Bulk status update applied");

        self.audit
            .record_many_best_effort(
                EntityType::FinancialEntry,
                &affected,
                AuditAction::BulkStatusUpdate,
                &json!({ "status": status, "payment_date": payment_date }),
                Some(actor),
            )
            .await;

        Ok(affected.len() as u64)
    }

    /// Mark every pending entry whose due date is before today as overdue.
    /// Idempotent; concurrent sweeps never double-apply.
    #[instrument(skip(self))]
    pub async fn sweep_overdue(&self) -> Result<u64, AppError> {
        let now = self.clock.now();
        let today = self.clock.today();

        let result = self
            .db
            .run("sweep_overdue", async {
                let rows: Vec<(Uuid,)> = sqlx::query_as(
                    r#"
                    UPDATE financial_entries AS e
                    SET status = 'overdue', updated_at = $1, version = e.version + 1
                    WHERE e.status = 'pending'
                      AND e.due_date IS NOT NULL
                      AND e.due_date < $2
                      AND e.deleted_at IS NULL
                    RETURNING e.id
                    "#,
                )
                .bind(now)
                .bind(today)
                .fetch_all(self.db.pool())
                .await
                .map_err(db_error("Failed to sweep overdue entries"))?;
                Ok(rows.into_iter().map(|(id,)| id).collect::<Vec<_>>())
            })
            .await;

        record_entry_operation("sweep_overdue", result.is_ok());
        let swept = result?;

        if !swept.is_empty() {
            OVERDUE_SWEPT_TOTAL.inc_by(swept.len() as u64);
            info!(count = swept.len(), today = %today, "Marked entries overdue");

            self.audit
                .record_many_best_effort(
                    EntityType::FinancialEntry,
                    &swept,
                    AuditAction::Overdue,
                    &json!({ "status": EntryStatus::Overdue, "due_before": today }),
                    None,
                )
                .await;
        }

        Ok(swept.len() as u64)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(entry_id = %id))]
    pub async fn get_by_id(&self, id: Uuid) -> Result<EntryDetails, AppError> {
        self.db
            .run("get_entry", async {
                let sql = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS}, {DETAIL_COLUMNS}
                    FROM financial_entries e
                    {DETAIL_JOINS}
                    WHERE e.id = $1 AND e.deleted_at IS NULL
                    "#
                );
                sqlx::query_as::<_, EntryDetails>(&sql)
                    .bind(id)
                    .fetch_optional(self.db.pool())
                    .await
                    .map_err(db_error("Failed to get entry"))?
                    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Entry {} not found", id)))
            })
            .await
    }

    /// Unordered bulk fetch; deleted and unknown ids are skipped.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn get_by_ids(&self, ids: &[Uuid]) -> Result<Vec<FinancialEntry>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.db
            .run("get_entries_by_ids", async {
                let sql = format!(
                    "SELECT {ENTRY_COLUMNS} FROM financial_entries e \
                     WHERE e.id = ANY($1) AND e.deleted_at IS NULL"
                );
                sqlx::query_as::<_, FinancialEntry>(&sql)
                    .bind(ids)
                    .fetch_all(self.db.pool())
                    .await
                    .map_err(db_error("Failed to get entries"))
            })
            .await
    }

    #[instrument(skip(self, filter))]
    pub async fn list(
        &self,
        filter: &EntryFilter,
        pagination: Pagination,
    ) -> Result<Page<EntryDetails>, AppError> {
        let pagination = pagination.normalized();

        self.db
            .run("list_entries", async {
                let count_sql =
                    format!("SELECT COUNT(*) FROM financial_entries e WHERE {LIST_FILTER}");
                let (total,): (i64,) = bind_filter(sqlx::query_as(&count_sql), filter)
                    .fetch_one(self.db.pool())
                    .await
                    .map_err(db_error("Failed to count entries"))?;

                let list_sql = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS}, {DETAIL_COLUMNS}
                    FROM financial_entries e
                    {DETAIL_JOINS}
                    WHERE {LIST_FILTER}
                    ORDER BY e.entry_date DESC, e.created_at DESC, e.id DESC
                    LIMIT $9 OFFSET $10
                    "#
                );
                let items = bind_filter(sqlx::query_as::<_, EntryDetails>(&list_sql), filter)
                    .bind(pagination.limit)
                    .bind(pagination.offset())
                    .fetch_all(self.db.pool())
                    .await
                    .map_err(db_error("Failed to list entries"))?;

                Ok(Page::new(items, total, pagination))
            })
            .await
    }

    async fn current_status(&self, id: Uuid) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM financial_entries WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(db_error("Failed to read entry status"))?;
        Ok(row.map(|(status,)| status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn paid_without_date_is_stamped_today() {
        let today = date(2024, 3, 1);
        assert_eq!(
            effective_payment_date(EntryStatus::Paid, None, today),
            Some(today)
        );
    }

    #[test]
    fn supplied_payment_date_wins() {
        let today = date(2024, 3, 1);
        let paid_on = date(2024, 2, 27);
        assert_eq!(
            effective_payment_date(EntryStatus::Paid, Some(paid_on), today),
            Some(paid_on)
        );
    }

    #[test]
    fn open_statuses_keep_missing_date() {
        let today = date(2024, 3, 1);
        assert_eq!(effective_payment_date(EntryStatus::Pending, None, today), None);
        assert_eq!(effective_payment_date(EntryStatus::Cancelled, None, today), None);
    }

    #[test]
    fn list_filter_binds_match_placeholders() {
        for n in 1..=8 {
            assert!(LIST_FILTER.contains(&format!("${}", n)));
        }
        assert!(!LIST_FILTER.contains("$9"));
    }
}
