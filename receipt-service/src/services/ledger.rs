//! Ledger persistence: bank transactions and expense records.
//!
//! The [`LedgerStore`] trait is the seam between the reconciliation logic and
//! Postgres; tests run against an in-memory implementation.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{
    BankTransaction, CanonicalDraft, DocumentType, ExpenseRecord, ReceiptDocument,
};
use crate::services::metrics::DB_QUERY_DURATION;

/// Result of an atomic link attempt against a bank row.
#[derive(Debug)]
pub enum LinkOutcome {
    /// The row was unresolved and is now matched to a fresh expense record.
    Linked {
        transaction: BankTransaction,
        record: ExpenseRecord,
    },
    /// No such row in this workspace.
    Missing,
    /// The row exists but is already matched or ignored.
    AlreadyResolved,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Unresolved rows whose absolute amount falls in `[amount_min,
    /// amount_max]`, optionally restricted to a date range.
    async fn query_candidates(
        &self,
        workspace_id: Uuid,
        amount_min: Decimal,
        amount_max: Decimal,
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<BankTransaction>, AppError>;

    async fn get_transaction(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<BankTransaction>, AppError>;

    /// Atomically mark a bank row matched and create the expense record it
    /// links to. The status check and the update happen in one transaction,
    /// so two concurrent links to the same row produce exactly one winner.
    async fn link_receipt(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
        draft: &CanonicalDraft,
        receipt: &ReceiptDocument,
    ) -> Result<LinkOutcome, AppError>;

    /// Create a new ledger row from a draft, already matched to a
    /// draft-derived record but with no receipt attached yet. The row amount
    /// is signed per the draft direction.
    async fn create_transaction(
        &self,
        workspace_id: Uuid,
        draft: &CanonicalDraft,
    ) -> Result<BankTransaction, AppError>;

    async fn attach_receipt_to_transaction(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
        receipt: &ReceiptDocument,
    ) -> Result<BankTransaction, AppError>;

    /// Mark a half-committed ledger row for operator attention.
    async fn flag_transaction_inconsistent(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), AppError>;

    async fn find_transaction_by_receipt_key(
        &self,
        workspace_id: Uuid,
        receipt_key: &str,
    ) -> Result<Option<BankTransaction>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

pub struct PgLedgerStore {
    pool: PgPool,
}

const INSERT_RECORD_SQL: &str = r#"
    INSERT INTO expense_records (
        record_id, workspace_id, title, description, amount, currency,
        category, payment_method, record_date, vendor, vendor_vat_number,
        invoice_number, tax_amount, tax_rate, document_type,
        receipt_key, receipt_url, needs_attention, created_utc
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, false, NOW())
    RETURNING *
"#;

impl PgLedgerStore {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
        info!("Database migrations applied");
        Ok(())
    }

    async fn insert_record<'e, E>(
        executor: E,
        workspace_id: Uuid,
        draft: &CanonicalDraft,
        receipt: Option<&ReceiptDocument>,
    ) -> Result<ExpenseRecord, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query_as::<_, ExpenseRecord>(INSERT_RECORD_SQL)
            .bind(Uuid::new_v4())
            .bind(workspace_id)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(draft.amount)
            .bind(&draft.currency)
            .bind(draft.category.as_str())
            .bind(draft.payment_method.as_str())
            .bind(draft.date)
            .bind(&draft.vendor)
            .bind(&draft.vendor_vat_number)
            .bind(&draft.invoice_number)
            .bind(draft.tax_amount)
            .bind(draft.tax_rate)
            .bind(draft.document_type.as_str())
            .bind(receipt.map(|r| r.key.clone()))
            .bind(receipt.map(|r| r.url.clone()))
            .fetch_one(executor)
            .await
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self))]
    async fn query_candidates(
        &self,
        workspace_id: Uuid,
        amount_min: Decimal,
        amount_max: Decimal,
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<BankTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["query_candidates"])
            .start_timer();

        let rows = match date_range {
            Some((from, to)) => {
                sqlx::query_as::<_, BankTransaction>(
                    r#"
                    SELECT * FROM bank_transactions
                    WHERE workspace_id = $1
                      AND reconciliation_status IN ('unmatched', 'suggested')
                      AND ABS(amount) BETWEEN $2 AND $3
                      AND transaction_date BETWEEN $4 AND $5
                    ORDER BY transaction_date DESC
                    LIMIT 50
                    "#,
                )
                .bind(workspace_id)
                .bind(amount_min)
                .bind(amount_max)
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, BankTransaction>(
                    r#"
                    SELECT * FROM bank_transactions
                    WHERE workspace_id = $1
                      AND reconciliation_status IN ('unmatched', 'suggested')
                      AND ABS(amount) BETWEEN $2 AND $3
                    ORDER BY transaction_date DESC
                    LIMIT 50
                    "#,
                )
                .bind(workspace_id)
                .bind(amount_min)
                .bind(amount_max)
                .fetch_all(&self.pool)
                .await?
            }
        };

        timer.observe_duration();
        Ok(rows)
    }

    async fn get_transaction(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<BankTransaction>, AppError> {
        let row = sqlx::query_as::<_, BankTransaction>(
            "SELECT * FROM bank_transactions WHERE workspace_id = $1 AND transaction_id = $2",
        )
        .bind(workspace_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self, draft, receipt))]
    async fn link_receipt(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
        draft: &CanonicalDraft,
        receipt: &ReceiptDocument,
    ) -> Result<LinkOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["link_receipt"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let record = Self::insert_record(&mut *tx, workspace_id, draft, Some(receipt)).await?;

        // Compare-and-swap on the status so a concurrently-resolved row is
        // never overwritten. Purchase invoices link through the invoice
        // column, everything else through the expense column.
        let (expense_id, invoice_id) = match draft.document_type {
            DocumentType::Invoice => (None, Some(record.record_id)),
            _ => (Some(record.record_id), None),
        };

        let updated = sqlx::query_as::<_, BankTransaction>(
            r#"
            UPDATE bank_transactions
            SET reconciliation_status = 'matched',
                linked_expense_id = $1,
                linked_invoice_id = $2,
                receipt_key = $3,
                receipt_url = $4,
                reconciliation_date = NOW()
            WHERE workspace_id = $5
              AND transaction_id = $6
              AND reconciliation_status IN ('unmatched', 'suggested')
            RETURNING *
            "#,
        )
        .bind(expense_id)
        .bind(invoice_id)
        .bind(&receipt.key)
        .bind(&receipt.url)
        .bind(workspace_id)
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match updated {
            Some(transaction) => {
                tx.commit().await?;
                LinkOutcome::Linked {
                    transaction,
                    record,
                }
            }
            None => {
                // Drop the speculative record and find out why the CAS missed.
                tx.rollback().await?;
                match self.get_transaction(workspace_id, transaction_id).await? {
                    Some(_) => LinkOutcome::AlreadyResolved,
                    None => LinkOutcome::Missing,
                }
            }
        };

        timer.observe_duration();
        Ok(outcome)
    }

    #[instrument(skip(self, draft))]
    async fn create_transaction(
        &self,
        workspace_id: Uuid,
        draft: &CanonicalDraft,
    ) -> Result<BankTransaction, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_transaction"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let record = Self::insert_record(&mut *tx, workspace_id, draft, None).await?;
        let (expense_id, invoice_id) = match draft.document_type {
            DocumentType::Invoice => (None, Some(record.record_id)),
            _ => (Some(record.record_id), None),
        };

        // Receipt-only transactions have no bank-feed date; fall back to
        // today so the row stays queryable.
        let transaction_date = draft.date.unwrap_or_else(|| Utc::now().date_naive());
        let description = draft
            .description
            .clone()
            .unwrap_or_else(|| draft.title.clone());

        let transaction = sqlx::query_as::<_, BankTransaction>(
            r#"
            INSERT INTO bank_transactions (
                transaction_id, workspace_id, transaction_date, amount, vendor,
                description, reconciliation_status, linked_expense_id,
                linked_invoice_id, reconciliation_date, needs_attention, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'matched', $7, $8, NOW(), false, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workspace_id)
        .bind(transaction_date)
        .bind(draft.signed_amount())
        .bind(&draft.vendor)
        .bind(description)
        .bind(expense_id)
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.observe_duration();
        Ok(transaction)
    }

    async fn attach_receipt_to_transaction(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
        receipt: &ReceiptDocument,
    ) -> Result<BankTransaction, AppError> {
        let updated = sqlx::query_as::<_, BankTransaction>(
            r#"
            UPDATE bank_transactions
            SET receipt_key = $1, receipt_url = $2, needs_attention = false
            WHERE workspace_id = $3 AND transaction_id = $4
            RETURNING *
            "#,
        )
        .bind(&receipt.key)
        .bind(&receipt.url)
        .bind(workspace_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("bank transaction {transaction_id} not found"))
        })
    }

    async fn flag_transaction_inconsistent(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE bank_transactions SET needs_attention = true WHERE workspace_id = $1 AND transaction_id = $2",
        )
        .bind(workspace_id)
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_transaction_by_receipt_key(
        &self,
        workspace_id: Uuid,
        receipt_key: &str,
    ) -> Result<Option<BankTransaction>, AppError> {
        let row = sqlx::query_as::<_, BankTransaction>(
            "SELECT * FROM bank_transactions WHERE workspace_id = $1 AND receipt_key = $2",
        )
        .bind(workspace_id)
        .bind(receipt_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
