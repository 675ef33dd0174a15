//! Candidate matching between canonical drafts and bank ledger rows.
//!
//! Scoring is pure; only the candidate query touches the ledger. Confidence
//! tiers:
//! - HIGH: exact amount and the dates are at most one day apart.
//! - MEDIUM: exact amount with a weaker date, or a tolerated amount delta
//!   backed by vendor evidence.
//! - LOW: everything else inside the query band, including drafts with no
//!   usable date.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::sync::Arc;

use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{BankTransaction, CanonicalDraft, MatchCandidate, MatchConfidence};
use crate::services::canonicalizer::fold_diacritics;
use crate::services::ledger::LedgerStore;
use crate::services::metrics;

/// Vendor score when either side has no vendor text: no evidence either way.
pub const VENDOR_NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Days around the draft date considered for candidates.
    pub date_window_days: i64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            date_window_days: 5,
        }
    }
}

impl MatcherConfig {
    /// Absolute amount tolerance: 1% of the draft amount, floored at one
    /// cent so tiny receipts still get a band.
    pub fn amount_tolerance(&self, amount: Decimal) -> Decimal {
        let one_percent = amount.abs() * Decimal::new(1, 2);
        one_percent.max(Decimal::new(1, 2))
    }
}

fn tokenize(s: &str) -> Vec<String> {
    fold_diacritics(&s.to_lowercase())
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Token-overlap similarity between two vendor strings, in [0, 1].
/// Returns [`VENDOR_NEUTRAL_SCORE`] when either side is absent.
pub fn vendor_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return VENDOR_NEUTRAL_SCORE;
    };
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return VENDOR_NEUTRAL_SCORE;
    }

    let shared = tokens_a.iter().filter(|t| tokens_b.contains(t)).count();
    let union = tokens_a.len() + tokens_b.len() - shared;
    let mut score = shared as f64 / union as f64;

    // Bank labels often wrap the vendor name in extra noise
    // ("CARREFOUR MARKET PARIS 11"), so containment counts for something.
    let joined_a = tokens_a.join(" ");
    let joined_b = tokens_b.join(" ");
    if joined_a.contains(&joined_b) || joined_b.contains(&joined_a) {
        score += 0.25;
    }
    if tokens_a[0] == tokens_b[0] {
        score += 0.25;
    }
    score.min(1.0)
}

/// Score one ledger row against a draft.
pub fn score_candidate(
    draft: &CanonicalDraft,
    transaction: &BankTransaction,
    config: &MatcherConfig,
) -> MatchCandidate {
    let amount_delta = (transaction.amount.abs() - draft.amount.abs()).abs();
    let date_delta_days = draft
        .date
        .map(|d| (transaction.transaction_date - d).num_days().abs());
    let vendor_score = vendor_similarity(draft.vendor.as_deref(), transaction.vendor.as_deref());

    let within_window = date_delta_days.is_some_and(|d| d <= config.date_window_days);
    let within_tolerance = amount_delta <= config.amount_tolerance(draft.amount);
    let exact_amount = amount_delta == Decimal::ZERO;

    let confidence = if !within_window || !within_tolerance {
        MatchConfidence::Low
    } else if exact_amount && date_delta_days.is_some_and(|d| d <= 1) {
        MatchConfidence::High
    } else if exact_amount || vendor_score > VENDOR_NEUTRAL_SCORE {
        MatchConfidence::Medium
    } else {
        MatchConfidence::Low
    };

    MatchCandidate {
        transaction_id: transaction.transaction_id,
        confidence,
        amount_delta,
        date_delta_days,
        vendor_score,
    }
}

pub struct CandidateMatcher {
    ledger: Arc<dyn LedgerStore>,
    config: MatcherConfig,
}

impl CandidateMatcher {
    pub fn new(ledger: Arc<dyn LedgerStore>, config: MatcherConfig) -> Self {
        Self { ledger, config }
    }

    /// Query the ledger for unresolved rows near the draft and score each
    /// one. Results are ordered best-first: confidence tier, then date
    /// proximity, then amount proximity.
    pub async fn find_matches(
        &self,
        workspace_id: Uuid,
        draft: &CanonicalDraft,
    ) -> Result<Vec<MatchCandidate>, AppError> {
        let tolerance = self.config.amount_tolerance(draft.amount);
        let amount_min = draft.amount.abs() - tolerance;
        let amount_max = draft.amount.abs() + tolerance;
        let date_range = draft.date.map(|d| {
            (
                d - chrono::Duration::days(self.config.date_window_days),
                d + chrono::Duration::days(self.config.date_window_days),
            )
        });

        let rows = self
            .ledger
            .query_candidates(workspace_id, amount_min, amount_max, date_range)
            .await?;

        let mut candidates: Vec<MatchCandidate> = rows
            .iter()
            .map(|tx| score_candidate(draft, tx, &self.config))
            .collect();

        candidates.sort_by(|a, b| {
            a.confidence
                .rank()
                .cmp(&b.confidence.rank())
                .then_with(|| match (a.date_delta_days, b.date_delta_days) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
                .then_with(|| a.amount_delta.cmp(&b.amount_delta))
        });

        for candidate in &candidates {
            metrics::MATCH_CONFIDENCE
                .with_label_values(&[candidate.confidence.as_str()])
                .inc();
        }
        Ok(candidates)
    }
}
