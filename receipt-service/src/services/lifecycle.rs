//! Receipt file lifecycle: validated upload to a TEMP key, then a one-way,
//! idempotent promotion to a PERMANENT key once the user commits.

use service_core::error::AppError;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::models::{
    CanonicalDraft, ReceiptDocument, ReceiptLocation, ReconciliationAction,
    ReconciliationDecision,
};
use crate::services::storage::ObjectStore;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const TEMP_PREFIX: &str = "tmp/";
const PERMANENT_PREFIX: &str = "receipts/";

/// Content types accepted for receipt uploads, with the file extension used
/// in object keys.
const ALLOWED_CONTENT_TYPES: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
];

fn extension_for(content_type: &str) -> Option<&'static str> {
    ALLOWED_CONTENT_TYPES
        .iter()
        .find(|(ct, _)| *ct == content_type)
        .map(|(_, ext)| *ext)
}

fn content_type_for_key(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().unwrap_or("");
    ALLOWED_CONTENT_TYPES
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(ct, _)| *ct)
        .unwrap_or("application/octet-stream")
}

pub struct FileLifecycle {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl FileLifecycle {
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into(),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base_url.trim_end_matches('/'))
    }

    /// Validate and store an uploaded receipt under a fresh TEMP key.
    pub async fn store_upload(
        &self,
        data: &[u8],
        content_type: &str,
    ) -> Result<ReceiptDocument, AppError> {
        let Some(ext) = extension_for(content_type) else {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "unsupported content type: {content_type}"
            )));
        };
        if data.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("empty upload")));
        }
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "upload exceeds {MAX_UPLOAD_BYTES} bytes"
            )));
        }

        let key = format!("{TEMP_PREFIX}{}.{ext}", Uuid::new_v4());
        self.store.put(&key, data).await?;

        Ok(ReceiptDocument {
            url: self.url_for(&key),
            key,
            content_type: content_type.to_string(),
            size_bytes: data.len() as i64,
            location: ReceiptLocation::Temp,
        })
    }

    /// Promote a TEMP object to its PERMANENT key.
    ///
    /// The permanent key is derived deterministically from the temp key, so
    /// a retried promotion of an already-promoted file returns the same
    /// document without moving anything.
    pub async fn promote_temporary_file(
        &self,
        temp_key: &str,
    ) -> Result<ReceiptDocument, AppError> {
        let Some(suffix) = temp_key.strip_prefix(TEMP_PREFIX) else {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "not a temporary key: {temp_key}"
            )));
        };
        let permanent_key = format!("{PERMANENT_PREFIX}{suffix}");

        if !self.store.exists(&permanent_key).await? {
            if !self.store.exists(temp_key).await? {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "no object for key: {temp_key}"
                )));
            }
            self.store.promote(temp_key, &permanent_key).await?;
        }

        let size_bytes = self.store.get(&permanent_key).await?.len() as i64;
        Ok(ReceiptDocument {
            url: self.url_for(&permanent_key),
            content_type: content_type_for_key(&permanent_key).to_string(),
            key: permanent_key,
            size_bytes,
            location: ReceiptLocation::Permanent,
        })
    }
}

/// A normalized draft whose receipt still sits under a TEMP key, waiting for
/// the user to pick a match (or none). Deliberately not `Clone`: a pending
/// reconciliation is consumed exactly once, by value.
#[derive(Debug)]
pub struct PendingReconciliation {
    pub workspace_id: Uuid,
    pub draft: CanonicalDraft,
    pub temp_receipt: ReceiptDocument,
}

impl PendingReconciliation {
    /// Promote the receipt and turn the pending state into a committable
    /// decision. Consumes `self`: a pending reconciliation resolves once.
    pub async fn resolve(
        self,
        lifecycle: &FileLifecycle,
        action: ReconciliationAction,
        target_transaction_id: Option<Uuid>,
    ) -> Result<ReconciliationDecision, AppError> {
        let receipt = lifecycle
            .promote_temporary_file(&self.temp_receipt.key)
            .await?;
        Ok(ReconciliationDecision {
            action,
            workspace_id: self.workspace_id,
            target_transaction_id,
            draft: self.draft,
            receipt,
            resume_transaction_id: None,
        })
    }
}

/// Single-occupancy holder for an in-flight reconciliation. Starting a second
/// one while the first is unresolved is a conflict.
///
/// The HTTP surface is stateless (a commit arrives as a complete decision),
/// so the slot is not wired into the router; embedding callers that hold a
/// pending reconciliation across user interaction use it directly.
#[derive(Default)]
pub struct PendingSlot {
    inner: Mutex<Option<PendingReconciliation>>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, pending: PendingReconciliation) -> Result<(), AppError> {
        let mut slot = self.inner.lock().map_err(|_| {
            AppError::InternalError(anyhow::anyhow!("pending slot lock poisoned"))
        })?;
        if slot.is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "a reconciliation is already in progress"
            )));
        }
        *slot = Some(pending);
        Ok(())
    }

    pub fn take(&self) -> Result<Option<PendingReconciliation>, AppError> {
        let mut slot = self.inner.lock().map_err(|_| {
            AppError::InternalError(anyhow::anyhow!("pending slot lock poisoned"))
        })?;
        Ok(slot.take())
    }
}
