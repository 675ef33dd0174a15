//! In-memory collaborators for integration tests: no Postgres, filesystem or
//! OCR service required.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use service_core::error::AppError;

use receipt_service::models::{
    BankTransaction, CanonicalDraft, DocumentType, ExpenseRecord, RawOcrExtraction,
    ReceiptDocument, ReconciliationStatus,
};
use receipt_service::services::ledger::{LedgerStore, LinkOutcome};
use receipt_service::services::lifecycle::FileLifecycle;
use receipt_service::services::ocr::{OcrEngine, OcrInput};
use receipt_service::services::storage::ObjectStore;
use receipt_service::startup::AppState;

// ----------------------------------------------------------------------------
// Ledger fake
// ----------------------------------------------------------------------------

#[derive(Default)]
struct LedgerData {
    transactions: HashMap<Uuid, BankTransaction>,
    records: HashMap<Uuid, ExpenseRecord>,
}

/// Ledger backed by hash maps under a single lock, so the compare-and-swap
/// on link matches what the SQL transaction guarantees.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: Mutex<LedgerData>,
    /// When set, `attach_receipt_to_transaction` fails, simulating a crash
    /// between the two CREATE_NEW writes.
    pub fail_attach: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerData>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("ledger lock poisoned")))
    }

    pub fn seed_transaction(&self, transaction: BankTransaction) {
        let mut data = self.inner.lock().unwrap();
        data.transactions
            .insert(transaction.transaction_id, transaction);
    }

    pub fn transaction(&self, id: Uuid) -> Option<BankTransaction> {
        self.inner.lock().unwrap().transactions.get(&id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.lock().unwrap().transactions.len()
    }

    pub fn record(&self, id: Uuid) -> Option<ExpenseRecord> {
        self.inner.lock().unwrap().records.get(&id).cloned()
    }

    fn build_record(
        workspace_id: Uuid,
        draft: &CanonicalDraft,
        receipt: Option<&ReceiptDocument>,
    ) -> ExpenseRecord {
        ExpenseRecord {
            record_id: Uuid::new_v4(),
            workspace_id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            amount: draft.amount,
            currency: draft.currency.clone(),
            category: draft.category.as_str().to_string(),
            payment_method: draft.payment_method.as_str().to_string(),
            record_date: draft.date,
            vendor: draft.vendor.clone(),
            vendor_vat_number: draft.vendor_vat_number.clone(),
            invoice_number: draft.invoice_number.clone(),
            tax_amount: draft.tax_amount,
            tax_rate: draft.tax_rate,
            document_type: draft.document_type.as_str().to_string(),
            receipt_key: receipt.map(|r| r.key.clone()),
            receipt_url: receipt.map(|r| r.url.clone()),
            needs_attention: false,
            created_utc: Utc::now(),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn query_candidates(
        &self,
        workspace_id: Uuid,
        amount_min: Decimal,
        amount_max: Decimal,
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<BankTransaction>, AppError> {
        let data = self.lock()?;
        Ok(data
            .transactions
            .values()
            .filter(|tx| tx.workspace_id == workspace_id)
            .filter(|tx| tx.status().is_linkable())
            .filter(|tx| tx.amount.abs() >= amount_min && tx.amount.abs() <= amount_max)
            .filter(|tx| match date_range {
                Some((from, to)) => tx.transaction_date >= from && tx.transaction_date <= to,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_transaction(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<BankTransaction>, AppError> {
        let data = self.lock()?;
        Ok(data
            .transactions
            .get(&transaction_id)
            .filter(|tx| tx.workspace_id == workspace_id)
            .cloned())
    }

    async fn link_receipt(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
        draft: &CanonicalDraft,
        receipt: &ReceiptDocument,
    ) -> Result<LinkOutcome, AppError> {
        let mut data = self.lock()?;

        let Some(existing) = data
            .transactions
            .get(&transaction_id)
            .filter(|tx| tx.workspace_id == workspace_id)
        else {
            return Ok(LinkOutcome::Missing);
        };
        if !existing.status().is_linkable() {
            return Ok(LinkOutcome::AlreadyResolved);
        }

        let record = Self::build_record(workspace_id, draft, Some(receipt));
        data.records.insert(record.record_id, record.clone());

        let transaction = data
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("row vanished")))?;
        transaction.reconciliation_status = ReconciliationStatus::Matched.as_str().to_string();
        match draft.document_type {
            DocumentType::Invoice => transaction.linked_invoice_id = Some(record.record_id),
            _ => transaction.linked_expense_id = Some(record.record_id),
        }
        transaction.receipt_key = Some(receipt.key.clone());
        transaction.receipt_url = Some(receipt.url.clone());
        transaction.reconciliation_date = Some(Utc::now());

        Ok(LinkOutcome::Linked {
            transaction: transaction.clone(),
            record,
        })
    }

    async fn create_transaction(
        &self,
        workspace_id: Uuid,
        draft: &CanonicalDraft,
    ) -> Result<BankTransaction, AppError> {
        let mut data = self.lock()?;
        let record = Self::build_record(workspace_id, draft, None);
        let (linked_expense_id, linked_invoice_id) = match draft.document_type {
            DocumentType::Invoice => (None, Some(record.record_id)),
            _ => (Some(record.record_id), None),
        };
        let transaction = BankTransaction {
            transaction_id: Uuid::new_v4(),
            workspace_id,
            transaction_date: draft.date.unwrap_or_else(|| Utc::now().date_naive()),
            amount: draft.signed_amount(),
            vendor: draft.vendor.clone(),
            description: draft
                .description
                .clone()
                .unwrap_or_else(|| draft.title.clone()),
            reconciliation_status: ReconciliationStatus::Matched.as_str().to_string(),
            linked_expense_id,
            linked_invoice_id,
            receipt_key: None,
            receipt_url: None,
            reconciliation_date: Some(Utc::now()),
            needs_attention: false,
            created_utc: Utc::now(),
        };
        data.records.insert(record.record_id, record);
        data.transactions
            .insert(transaction.transaction_id, transaction.clone());
        Ok(transaction)
    }

    async fn attach_receipt_to_transaction(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
        receipt: &ReceiptDocument,
    ) -> Result<BankTransaction, AppError> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "simulated attach failure"
            )));
        }
        let mut data = self.lock()?;
        let transaction = data
            .transactions
            .get_mut(&transaction_id)
            .filter(|tx| tx.workspace_id == workspace_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "bank transaction {transaction_id} not found"
                ))
            })?;
        transaction.receipt_key = Some(receipt.key.clone());
        transaction.receipt_url = Some(receipt.url.clone());
        transaction.needs_attention = false;
        Ok(transaction.clone())
    }

    async fn flag_transaction_inconsistent(
        &self,
        workspace_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        let mut data = self.lock()?;
        if let Some(transaction) = data
            .transactions
            .get_mut(&transaction_id)
            .filter(|tx| tx.workspace_id == workspace_id)
        {
            transaction.needs_attention = true;
        }
        Ok(())
    }

    async fn find_transaction_by_receipt_key(
        &self,
        workspace_id: Uuid,
        receipt_key: &str,
    ) -> Result<Option<BankTransaction>, AppError> {
        let data = self.lock()?;
        Ok(data
            .transactions
            .values()
            .find(|tx| {
                tx.workspace_id == workspace_id && tx.receipt_key.as_deref() == Some(receipt_key)
            })
            .cloned())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Object store fake
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), AppError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, AppError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("object not found: {key}")))
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn promote(&self, temp_key: &str, permanent_key: &str) -> Result<(), AppError> {
        let mut objects = self.objects.lock().unwrap();
        let data = objects.remove(temp_key).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("object not found: {temp_key}"))
        })?;
        objects.insert(permanent_key.to_string(), data);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// OCR fake
// ----------------------------------------------------------------------------

pub struct StubOcrEngine {
    pub response: RawOcrExtraction,
}

impl StubOcrEngine {
    pub fn returning(response: RawOcrExtraction) -> Self {
        Self { response }
    }
}

#[async_trait]
impl OcrEngine for StubOcrEngine {
    async fn extract(&self, _input: OcrInput) -> Result<RawOcrExtraction, AppError> {
        Ok(self.response.clone())
    }
}

// ----------------------------------------------------------------------------
// Builders
// ----------------------------------------------------------------------------

pub const FILES_BASE_URL: &str = "http://files.test";

pub fn test_state_with(
    ledger: Arc<InMemoryLedger>,
    ocr: Arc<StubOcrEngine>,
) -> (AppState, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let lifecycle = FileLifecycle::new(store.clone(), FILES_BASE_URL);
    (AppState::new(ledger, ocr, lifecycle), store)
}

pub fn lifecycle_with_store() -> (FileLifecycle, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    (FileLifecycle::new(store.clone(), FILES_BASE_URL), store)
}

pub fn unmatched_transaction(
    workspace_id: Uuid,
    amount: &str,
    date: NaiveDate,
    vendor: Option<&str>,
) -> BankTransaction {
    BankTransaction {
        transaction_id: Uuid::new_v4(),
        workspace_id,
        transaction_date: date,
        amount: amount.parse().unwrap(),
        vendor: vendor.map(str::to_string),
        description: String::new(),
        reconciliation_status: ReconciliationStatus::Unmatched.as_str().to_string(),
        linked_expense_id: None,
        linked_invoice_id: None,
        receipt_key: None,
        receipt_url: None,
        reconciliation_date: None,
        needs_attention: false,
        created_utc: Utc::now(),
    }
}

pub fn permanent_receipt(key: &str) -> ReceiptDocument {
    ReceiptDocument {
        key: key.to_string(),
        url: format!("{FILES_BASE_URL}/{key}"),
        content_type: "application/pdf".to_string(),
        size_bytes: 4,
        location: receipt_service::models::ReceiptLocation::Permanent,
    }
}

pub fn draft_with(amount: &str, date: Option<NaiveDate>, vendor: Option<&str>) -> CanonicalDraft {
    CanonicalDraft {
        amount: amount.parse().unwrap(),
        date,
        vendor: vendor.map(str::to_string),
        ..Default::default()
    }
}
