//! Database service for finance-service.

use crate::config::DatabaseConfig;
use crate::services::metrics::{record_error, DB_QUERY_DURATION};
use service_core::error::AppError;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Database connection pool wrapper.
///
/// Every store operation goes through [`Database::run`], which times it and
/// bounds it by the configured operation timeout. A future that hits the
/// deadline is dropped; an open [`Transaction`] inside it is dropped
/// uncommitted and Postgres rolls it back.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    operation_timeout: Duration,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(config), fields(service = "finance-service"))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, AppError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            statement_timeout_ms = config.statement_timeout.as_millis() as u64,
            "Connecting to PostgreSQL"
        );

        let options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid DATABASE_URL: {}", e)))?
            .options([(
                "statement_timeout",
                config.statement_timeout.as_millis().to_string(),
            )]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self {
            pool,
            operation_timeout: config.operation_timeout,
        })
    }

    /// Wrap an existing pool (tests, embedding).
    pub fn from_pool(pool: PgPool, operation_timeout: Duration) -> Self {
        Self {
            pool,
            operation_timeout,
        }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
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

    /// Begin a read-write transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))
    }

    /// Begin a read-only transaction on a single snapshot, so multi-query
    /// reads see one consistent state of the ledger.
    pub async fn begin_snapshot(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        let mut tx = self.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to open read snapshot"))?;
        Ok(tx)
    }

    /// Run one store operation under the default deadline.
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        self.with_deadline(operation, self.operation_timeout, fut)
            .await
    }

    /// Run one store operation under a caller-supplied deadline.
    pub async fn with_deadline<T, F>(
        &self,
        operation: &'static str,
        deadline: Duration,
        fut: F,
    ) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let result = match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation = operation,
                    deadline_ms = deadline.as_millis() as u64,
                    "Operation deadline exceeded, rolled back"
                );
                Err(AppError::Timeout(anyhow::anyhow!(
                    "{} exceeded deadline of {}ms",
                    operation,
                    deadline.as_millis()
                )))
            }
        };

        timer.observe_duration();

        if let Err(ref e) = result {
            record_error(e.label());
        }

        result
    }
}

// SQLSTATEs for transactions Postgres aborts to break a serialization
// anomaly or a lock cycle.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
/// `value too long for type character varying(n)`.
const STRING_DATA_RIGHT_TRUNCATION: &str = "22001";

fn is_concurrency_abort(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db_err)
            if matches!(db_err.code().as_deref(), Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED))
    )
}

/// Map a sqlx error to a storage error with context. Transactions Postgres
/// aborted for concurrency reasons surface as a retryable conflict.
pub(crate) fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        if is_concurrency_abort(&e) {
            AppError::Conflict(anyhow::anyhow!("{}: {}", context, e))
        } else {
            AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
        }
    }
}

/// Like [`db_error`], but surfaces broken references (unknown ticket,
/// technician, client) and oversized values as bad input rather than a
/// storage failure.
pub(crate) fn write_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
            AppError::BadRequest(anyhow::anyhow!(
                "{}: referenced record does not exist ({})",
                context,
                db_err.constraint().unwrap_or("foreign key")
            ))
        }
        sqlx::Error::Database(ref db_err) if db_err.is_check_violation() => {
            AppError::BadRequest(anyhow::anyhow!(
                "{}: value rejected by {}",
                context,
                db_err.constraint().unwrap_or("check constraint")
            ))
        }
        sqlx::Error::Database(ref db_err)
            if db_err.code().as_deref() == Some(STRING_DATA_RIGHT_TRUNCATION) =>
        {
            AppError::BadRequest(anyhow::anyhow!("{}: {}", context, db_err.message()))
        }
        e => db_error(context)(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::error::ErrorKind;

    fn lazy_db(operation_timeout: Duration) -> Database {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://finance@localhost/finance_unused")
            .unwrap();
        Database::from_pool(pool, operation_timeout)
    }

    #[tokio::test]
    async fn slow_operation_times_out() {
        let db = lazy_db(Duration::from_millis(20));

        let err = db
            .run("slow_op", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn caller_deadline_overrides_default() {
        let db = lazy_db(Duration::from_secs(60));

        let err = db
            .with_deadline("tight_op", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("tight_op"));
    }

    #[tokio::test]
    async fn results_pass_through_untouched() {
        let db = lazy_db(Duration::from_secs(1));

        assert_eq!(db.run("fast_op", async { Ok(7) }).await.unwrap(), 7);

        let err = db
            .run::<(), _>("failing_op", async {
                Err(AppError::Conflict(anyhow::anyhow!("stale")))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
