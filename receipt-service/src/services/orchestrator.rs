//! Commit orchestration: turns a resolved reconciliation decision into
//! ledger writes, with idempotent replay and explicit partial-failure
//! recovery.

use std::sync::Arc;

use service_core::error::AppError;
use tracing::{error, info, instrument, warn};

use crate::models::{
    CommitOutcome, ReceiptLocation, ReconciliationAction, ReconciliationDecision,
    ReconciliationStatus,
};
use crate::services::ledger::{LedgerStore, LinkOutcome};
use crate::services::metrics;

pub struct Orchestrator {
    ledger: Arc<dyn LedgerStore>,
}

impl Orchestrator {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Commit a decision.
    ///
    /// Replaying a commit whose receipt key already landed in the ledger
    /// returns the original outcome instead of writing twice. A LINK against
    /// a row that was resolved in the meantime is a conflict; the row is
    /// never overwritten.
    #[instrument(skip(self, decision), fields(workspace_id = %decision.workspace_id, action = ?decision.action))]
    pub async fn commit(
        &self,
        decision: ReconciliationDecision,
    ) -> Result<CommitOutcome, AppError> {
        let outcome = self.commit_inner(decision).await;
        match &outcome {
            Ok(_) => metrics::record_operation("commit", "success"),
            Err(e) => {
                metrics::record_operation("commit", e.kind());
                metrics::record_error(e.kind());
            }
        }
        outcome
    }

    async fn commit_inner(
        &self,
        decision: ReconciliationDecision,
    ) -> Result<CommitOutcome, AppError> {
        if decision.receipt.location != ReceiptLocation::Permanent {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "receipt must be promoted before commit"
            )));
        }

        if let Some(outcome) = self.replay_by_receipt_key(&decision).await? {
            info!(receipt_key = %decision.receipt.key, "Commit replayed idempotently");
            return Ok(outcome);
        }

        match decision.action {
            ReconciliationAction::Link => self.commit_link(decision).await,
            ReconciliationAction::CreateNew => self.commit_create_new(decision).await,
        }
    }

    /// A receipt key appears on a ledger row exactly once; finding it means
    /// this decision (or an equivalent one) already committed.
    async fn replay_by_receipt_key(
        &self,
        decision: &ReconciliationDecision,
    ) -> Result<Option<CommitOutcome>, AppError> {
        let Some(transaction) = self
            .ledger
            .find_transaction_by_receipt_key(decision.workspace_id, &decision.receipt.key)
            .await?
        else {
            return Ok(None);
        };

        let record_id =
            transaction
                .link_target()
                .ok_or_else(|| AppError::InconsistentState {
                    record_id: transaction.transaction_id,
                    message: "matched transaction has no linked record".to_string(),
                })?;
        Ok(Some(CommitOutcome {
            status: transaction.status(),
            transaction_id: Some(transaction.transaction_id),
            expense_record_id: record_id,
        }))
    }

    async fn commit_link(
        &self,
        decision: ReconciliationDecision,
    ) -> Result<CommitOutcome, AppError> {
        let Some(target) = decision.target_transaction_id else {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "LINK requires a target transaction"
            )));
        };

        let outcome = self
            .ledger
            .link_receipt(
                decision.workspace_id,
                target,
                &decision.draft,
                &decision.receipt,
            )
            .await?;

        match outcome {
            LinkOutcome::Linked {
                transaction,
                record,
            } => {
                info!(
                    transaction_id = %transaction.transaction_id,
                    record_id = %record.record_id,
                    "Receipt linked to bank transaction"
                );
                Ok(CommitOutcome {
                    status: ReconciliationStatus::Matched,
                    transaction_id: Some(transaction.transaction_id),
                    expense_record_id: record.record_id,
                })
            }
            LinkOutcome::Missing => Err(AppError::NotFound(anyhow::anyhow!(
                "bank transaction {target} not found"
            ))),
            LinkOutcome::AlreadyResolved => Err(AppError::Conflict(anyhow::anyhow!(
                "bank transaction {target} is already reconciled"
            ))),
        }
    }

    /// CREATE_NEW is two writes: create the ledger row (amount signed per
    /// the draft direction), then attach the receipt. If the attach fails
    /// the row is flagged and the caller gets its id back, so a retry with
    /// `resume_transaction_id` finishes the job instead of duplicating the
    /// row.
    async fn commit_create_new(
        &self,
        decision: ReconciliationDecision,
    ) -> Result<CommitOutcome, AppError> {
        let transaction = match decision.resume_transaction_id {
            Some(transaction_id) => self
                .ledger
                .get_transaction(decision.workspace_id, transaction_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!(
                        "bank transaction {transaction_id} not found"
                    ))
                })?,
            None => {
                self.ledger
                    .create_transaction(decision.workspace_id, &decision.draft)
                    .await?
            }
        };

        match self
            .ledger
            .attach_receipt_to_transaction(
                decision.workspace_id,
                transaction.transaction_id,
                &decision.receipt,
            )
            .await
        {
            Ok(transaction) => {
                let record_id =
                    transaction
                        .link_target()
                        .ok_or_else(|| AppError::InconsistentState {
                            record_id: transaction.transaction_id,
                            message: "created transaction has no linked record".to_string(),
                        })?;
                info!(
                    transaction_id = %transaction.transaction_id,
                    record_id = %record_id,
                    "New ledger row created from receipt"
                );
                Ok(CommitOutcome {
                    status: ReconciliationStatus::Matched,
                    transaction_id: Some(transaction.transaction_id),
                    expense_record_id: record_id,
                })
            }
            Err(attach_err) => {
                error!(
                    transaction_id = %transaction.transaction_id,
                    error = %attach_err,
                    "Receipt attach failed after row creation"
                );
                if let Err(flag_err) = self
                    .ledger
                    .flag_transaction_inconsistent(
                        decision.workspace_id,
                        transaction.transaction_id,
                    )
                    .await
                {
                    warn!(
                        transaction_id = %transaction.transaction_id,
                        error = %flag_err,
                        "Could not flag half-committed row"
                    );
                }
                Err(AppError::InconsistentState {
                    record_id: transaction.transaction_id,
                    message:
                        "ledger row created but receipt attach failed; retry with resume_transaction_id"
                            .to_string(),
                })
            }
        }
    }
}
