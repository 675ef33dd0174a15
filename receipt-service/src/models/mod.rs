//! Domain models for receipt-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// OCR Extraction Models
// ============================================================================

/// Raw output of the external OCR engine: plain text plus an opaque
/// financial-analysis payload which may arrive as a JSON string, an object,
/// or garbage. The canonicalizer is the only consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOcrExtraction {
    #[serde(default)]
    pub extracted_text: String,
    #[serde(default)]
    pub financial_analysis: serde_json::Value,
}

// ============================================================================
// Canonical Draft Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Travel,
    Meals,
    OfficeSupplies,
    Services,
    Fuel,
    Software,
    Lodging,
    Other,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Travel => "travel",
            Self::Meals => "meals",
            Self::OfficeSupplies => "office_supplies",
            Self::Services => "services",
            Self::Fuel => "fuel",
            Self::Software => "software",
            Self::Lodging => "lodging",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "travel" => Self::Travel,
            "meals" => Self::Meals,
            "office_supplies" => Self::OfficeSupplies,
            "services" => Self::Services,
            "fuel" => Self::Fuel,
            "software" => Self::Software,
            "lodging" => Self::Lodging,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Transfer,
    Cash,
    Check,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Transfer => "transfer",
            Self::Cash => "cash",
            Self::Check => "check",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "transfer" => Self::Transfer,
            "cash" => Self::Cash,
            "check" => Self::Check,
            _ => Self::Card,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    Receipt,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Receipt => "receipt",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "invoice" => Self::Invoice,
            "receipt" => Self::Receipt,
            _ => Self::Other,
        }
    }
}

/// Direction of the money flow described by a draft. Purchase receipts are
/// expenses; credit notes and incoming payments are income.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionDirection {
    Expense,
    Income,
}

/// Fully-defaulted transaction record derived from OCR output.
///
/// Invariant: every field is populated (with a default where the OCR payload
/// gave nothing); no optional-soup ever leaves the canonicalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalDraft {
    pub amount: Decimal,
    pub currency: String,
    /// Parsed transaction date; `None` when the OCR date was absent or in a
    /// shape we do not understand.
    pub date: Option<NaiveDate>,
    /// The unparsed date text, preserved for display when parsing failed.
    pub date_raw: Option<String>,
    pub vendor: Option<String>,
    pub category: ExpenseCategory,
    pub payment_method: PaymentMethod,
    pub description: Option<String>,
    pub document_type: DocumentType,
    pub direction: TransactionDirection,
    pub title: String,
    pub vendor_vat_number: Option<String>,
    pub invoice_number: Option<String>,
    pub tax_amount: Decimal,
    pub tax_rate: Decimal,
    /// Extraction confidence reported by the OCR engine, when present.
    pub confidence: Option<f64>,
}

impl Default for CanonicalDraft {
    fn default() -> Self {
        Self {
            amount: Decimal::ZERO,
            currency: "EUR".to_string(),
            date: None,
            date_raw: None,
            vendor: None,
            category: ExpenseCategory::Other,
            payment_method: PaymentMethod::Card,
            description: None,
            document_type: DocumentType::Other,
            direction: TransactionDirection::Expense,
            title: "Facture Inconnue".to_string(),
            vendor_vat_number: None,
            invoice_number: None,
            tax_amount: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            confidence: None,
        }
    }
}

impl CanonicalDraft {
    /// Ledger-signed amount: expenses negative, income positive.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            TransactionDirection::Expense => -self.amount,
            TransactionDirection::Income => self.amount,
        }
    }
}

// ============================================================================
// Bank Transaction Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Unmatched,
    Suggested,
    Matched,
    Ignored,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::Suggested => "suggested",
            Self::Matched => "matched",
            Self::Ignored => "ignored",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "suggested" => Self::Suggested,
            "matched" => Self::Matched,
            "ignored" => Self::Ignored,
            _ => Self::Unmatched,
        }
    }

    /// Whether a receipt may still be linked to a row in this status.
    pub fn is_linkable(&self) -> bool {
        matches!(self, Self::Unmatched | Self::Suggested)
    }
}

/// A row of the external bank ledger. `amount` is signed: expenses negative,
/// income positive.
///
/// Invariant: at most one of `linked_expense_id`/`linked_invoice_id` is set,
/// and status `matched` implies one of them is.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BankTransaction {
    pub transaction_id: Uuid,
    pub workspace_id: Uuid,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub vendor: Option<String>,
    pub description: String,
    pub reconciliation_status: String,
    pub linked_expense_id: Option<Uuid>,
    pub linked_invoice_id: Option<Uuid>,
    pub receipt_key: Option<String>,
    pub receipt_url: Option<String>,
    pub reconciliation_date: Option<DateTime<Utc>>,
    pub needs_attention: bool,
    pub created_utc: DateTime<Utc>,
}

impl BankTransaction {
    pub fn status(&self) -> ReconciliationStatus {
        ReconciliationStatus::from_str(&self.reconciliation_status)
    }

    pub fn link_target(&self) -> Option<Uuid> {
        self.linked_expense_id.or(self.linked_invoice_id)
    }
}

// ============================================================================
// Expense Record Models
// ============================================================================

/// A receipt-derived expense (or purchase invoice) record, created either as
/// the link target of a reconciled bank transaction or as a standalone new
/// expense when no bank row matched.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExpenseRecord {
    pub record_id: Uuid,
    pub workspace_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub payment_method: String,
    pub record_date: Option<NaiveDate>,
    pub vendor: Option<String>,
    pub vendor_vat_number: Option<String>,
    pub invoice_number: Option<String>,
    pub tax_amount: Decimal,
    pub tax_rate: Decimal,
    pub document_type: String,
    pub receipt_key: Option<String>,
    pub receipt_url: Option<String>,
    pub needs_attention: bool,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Match Candidate Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
}

impl MatchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Sort rank, best first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

/// Derived comparison between a draft and one ledger row. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub transaction_id: Uuid,
    pub confidence: MatchConfidence,
    pub amount_delta: Decimal,
    /// Days between draft and row dates; `None` when the draft has no
    /// usable date.
    pub date_delta_days: Option<i64>,
    pub vendor_score: f64,
}

// ============================================================================
// Receipt Document Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptLocation {
    Temp,
    Permanent,
}

/// An uploaded receipt file. Created under a TEMP key, promoted to a
/// PERMANENT key exactly once, then attached to a ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptDocument {
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub location: ReceiptLocation,
}

// ============================================================================
// Reconciliation Decision Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationAction {
    Link,
    CreateNew,
}

/// The caller's resolution of a matching round, consumed exactly once by the
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationDecision {
    pub action: ReconciliationAction,
    pub workspace_id: Uuid,
    pub target_transaction_id: Option<Uuid>,
    pub draft: CanonicalDraft,
    pub receipt: ReceiptDocument,
    /// Set on retry after an `inconsistent_state` error: resume the
    /// CREATE_NEW commit from this already-created ledger row instead of
    /// inserting a duplicate.
    #[serde(default)]
    pub resume_transaction_id: Option<Uuid>,
}

/// Result of a committed decision.
#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub status: ReconciliationStatus,
    /// The linked bank transaction (LINK commits only).
    pub transaction_id: Option<Uuid>,
    /// The expense record carrying the receipt.
    pub expense_record_id: Uuid,
}
