//! OCR output canonicalization.
//!
//! Turns the loosely-structured payload returned by the OCR engine into a
//! [`CanonicalDraft`] with every field populated. Normalization is total: any
//! input, including garbage, produces a draft (with defaults) rather than an
//! error.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::models::{
    CanonicalDraft, DocumentType, ExpenseCategory, PaymentMethod, RawOcrExtraction,
    TransactionDirection,
};

/// First-match-wins keyword rules for expense categories. Checked against the
/// diacritics-folded, lowercased vendor name and extracted text. Order
/// matters: more specific keywords come first.
const CATEGORY_RULES: &[(&[&str], ExpenseCategory)] = &[
    (
        &["essence", "carburant", "station", "total energies", "gazole", "diesel"],
        ExpenseCategory::Fuel,
    ),
    (
        &["sncf", "ratp", "uber", "taxi", "peage", "autoroute", "parking", "air france", "transport"],
        ExpenseCategory::Travel,
    ),
    (
        &["hotel", "ibis", "airbnb", "booking.com", "novotel", "mercure"],
        ExpenseCategory::Lodging,
    ),
    (
        &["restaurant", "brasserie", "boulangerie", "cafe", "repas", "dejeuner", "traiteur", "mcdonald", "carrefour", "auchan", "leclerc", "monoprix", "franprix"],
        ExpenseCategory::Meals,
    ),
    (
        &["abonnement", "saas", "licence", "logiciel", "software", "github", "microsoft 365", "adobe", "ovh", "hebergement"],
        ExpenseCategory::Software,
    ),
    (
        &["fourniture", "papeterie", "bureau vallee", "bureau", "imprimante", "toner"],
        ExpenseCategory::OfficeSupplies,
    ),
    (
        &["prestation", "honoraires", "consulting", "conseil", "freelance", "maintenance"],
        ExpenseCategory::Services,
    ),
];

/// Direct category labels as emitted by the OCR engine itself.
const CATEGORY_LABELS: &[(&str, ExpenseCategory)] = &[
    ("transport", ExpenseCategory::Travel),
    ("travel", ExpenseCategory::Travel),
    ("repas", ExpenseCategory::Meals),
    ("meals", ExpenseCategory::Meals),
    ("bureau", ExpenseCategory::OfficeSupplies),
    ("office_supplies", ExpenseCategory::OfficeSupplies),
    ("prestation", ExpenseCategory::Services),
    ("services", ExpenseCategory::Services),
    ("carburant", ExpenseCategory::Fuel),
    ("fuel", ExpenseCategory::Fuel),
    ("logiciel", ExpenseCategory::Software),
    ("software", ExpenseCategory::Software),
    ("hebergement", ExpenseCategory::Lodging),
    ("lodging", ExpenseCategory::Lodging),
    ("autre", ExpenseCategory::Other),
    ("other", ExpenseCategory::Other),
];

const PAYMENT_RULES: &[(&[&str], PaymentMethod)] = &[
    (&["virement", "transfer", "sepa"], PaymentMethod::Transfer),
    (&["especes", "espece", "cash", "liquide"], PaymentMethod::Cash),
    (&["cheque", "check"], PaymentMethod::Check),
    (&["carte", "card", "cb", "visa", "mastercard"], PaymentMethod::Card),
];

/// Fold the accented characters common in French receipts to ASCII so rule
/// matching is accent-insensitive. The table covers lowercase only; callers
/// lowercase first, which also folds the all-caps OCR case ('É' → 'é' → 'e').
pub(crate) fn fold_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'à' | 'â' | 'ä' => 'a',
            'ç' => 'c',
            'ô' | 'ö' => 'o',
            'î' | 'ï' => 'i',
            'û' | 'ù' | 'ü' => 'u',
            _ => c,
        })
        .collect()
}

/// Parse the date shapes OCR engines emit for French receipts: ISO
/// `YYYY-MM-DD` passes through; `D/M/YYYY` and `D/M/YY` are day-first, with
/// two-digit years read as 20YY. Anything else is `None`.
pub fn french_date_to_iso(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }

    let mut parts = trimmed.split(['/', '.', '-']);
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let year_part = parts.next()?.trim();
    if parts.next().is_some() {
        return None;
    }
    let year: i32 = match year_part.len() {
        2 => 2000 + year_part.parse::<i32>().ok()?,
        4 => year_part.parse().ok()?,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Coerce whatever the OCR payload put in an amount field into a
/// non-negative `Decimal`. Unparseable input becomes zero.
fn coerce_amount(value: &Value) -> Decimal {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap_or(Decimal::ZERO),
        Value::String(s) => {
            let cleaned: String = s
                .replace(',', ".")
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            Decimal::from_str(&cleaned).unwrap_or(Decimal::ZERO)
        }
        _ => Decimal::ZERO,
    }
    .abs()
}

/// The financial-analysis payload sometimes arrives as a JSON string wrapping
/// the actual object. Unwrap one level before reading fields.
fn unwrap_analysis(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn first_str<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn first_value<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn classify_category(label: Option<&str>, haystack: &str) -> ExpenseCategory {
    if let Some(label) = label {
        let folded = fold_diacritics(&label.to_lowercase());
        for (name, category) in CATEGORY_LABELS {
            if folded == *name {
                return *category;
            }
        }
    }
    for (keywords, category) in CATEGORY_RULES {
        if keywords.iter().any(|kw| haystack.contains(kw)) {
            return *category;
        }
    }
    ExpenseCategory::Other
}

fn classify_payment(label: Option<&str>) -> PaymentMethod {
    let Some(label) = label else {
        return PaymentMethod::Card;
    };
    let folded = fold_diacritics(&label.to_lowercase());
    for (keywords, method) in PAYMENT_RULES {
        if keywords.iter().any(|kw| folded.contains(kw)) {
            return *method;
        }
    }
    PaymentMethod::Card
}

fn classify_document_type(label: Option<&str>, haystack: &str) -> DocumentType {
    if let Some(label) = label {
        let folded = fold_diacritics(&label.to_lowercase());
        if folded.contains("invoice") || folded.contains("facture") {
            return DocumentType::Invoice;
        }
        if folded.contains("receipt") || folded.contains("recu") || folded.contains("ticket") {
            return DocumentType::Receipt;
        }
    }
    if haystack.contains("facture") {
        DocumentType::Invoice
    } else if haystack.contains("ticket") || haystack.contains("recu") {
        DocumentType::Receipt
    } else {
        DocumentType::Other
    }
}

/// Normalize a raw OCR extraction into a fully-defaulted draft.
///
/// The engine nests line items under `transaction_data`, with SIRET and
/// confidence living in sibling `extracted_fields`/`document_analysis`
/// objects; flat payloads keep everything at the top level. Both shapes are
/// read.
pub fn normalize(raw: &RawOcrExtraction) -> CanonicalDraft {
    let analysis = unwrap_analysis(&raw.financial_analysis);
    let transaction = match analysis.get("transaction_data") {
        Some(nested) if nested.is_object() => nested,
        _ => &analysis,
    };
    let mut draft = CanonicalDraft::default();

    if let Some(amount) = first_value(transaction, &["amount", "total", "totalAmount", "total_ttc"])
    {
        draft.amount = coerce_amount(amount);
    }
    if let Some(tax) = first_value(transaction, &["taxAmount", "tax_amount", "tva", "vat_amount"]) {
        draft.tax_amount = coerce_amount(tax);
    }
    if let Some(rate) = first_value(transaction, &["taxRate", "tax_rate", "vat_rate"]) {
        draft.tax_rate = coerce_amount(rate);
    }
    if let Some(currency) = first_str(transaction, &["currency", "devise"]) {
        draft.currency = currency.to_uppercase();
    }

    if let Some(date_raw) = first_str(
        transaction,
        &["date", "transactionDate", "transaction_date", "invoiceDate"],
    ) {
        draft.date = french_date_to_iso(date_raw);
        draft.date_raw = Some(date_raw.to_string());
    }

    draft.vendor = first_str(
        transaction,
        &["vendor", "vendor_name", "merchant", "supplier", "fournisseur"],
    )
    .map(str::to_string);
    draft.description = first_str(transaction, &["description", "summary"]).map(str::to_string);
    draft.vendor_vat_number = first_str(transaction, &["vatNumber", "siret", "vendorVatNumber"])
        .or_else(|| {
            analysis
                .pointer("/extracted_fields/vendor_siret")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .map(str::to_string);
    draft.invoice_number = first_str(
        transaction,
        &["invoiceNumber", "document_number", "numeroFacture"],
    )
    .map(str::to_string);
    draft.confidence = first_value(transaction, &["confidence", "confidenceScore"])
        .or_else(|| analysis.pointer("/document_analysis/confidence"))
        .and_then(Value::as_f64)
        .filter(|c| (0.0..=1.0).contains(c));

    let haystack = fold_diacritics(
        &format!(
            "{} {} {}",
            draft.vendor.as_deref().unwrap_or(""),
            draft.description.as_deref().unwrap_or(""),
            raw.extracted_text
        )
        .to_lowercase(),
    );

    draft.category =
        classify_category(first_str(transaction, &["category", "categorie"]), &haystack);
    draft.payment_method = classify_payment(first_str(
        transaction,
        &["paymentMethod", "payment_method", "moyenPaiement"],
    ));
    let document_label = first_str(transaction, &["documentType", "type"]).or_else(|| {
        analysis
            .pointer("/document_analysis/document_type")
            .and_then(Value::as_str)
    });
    draft.document_type = classify_document_type(document_label, &haystack);
    draft.direction = TransactionDirection::Expense;

    draft.title = match (&draft.vendor, first_str(transaction, &["title", "titre"])) {
        (_, Some(title)) => title.to_string(),
        (Some(vendor), None) => format!("Facture {vendor}"),
        (None, None) => "Facture Inconnue".to_string(),
    };

    draft
}
