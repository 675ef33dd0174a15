//! HTTP handlers for the receipt pipeline.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use service_core::error::AppError;
use tracing::{info, instrument};
use validator::Validate;

use crate::dtos::receipts::{
    MatchQueryRequest, MatchQueryResponse, PromoteRequest, UploadQuery, UploadResponse,
};
use crate::dtos::ApiResponse;
use crate::models::{
    CanonicalDraft, CommitOutcome, RawOcrExtraction, ReceiptDocument, ReconciliationDecision,
};
use crate::services::canonicalizer;
use crate::services::metrics;
use crate::services::ocr::OcrInput;
use crate::startup::AppState;

/// POST /receipts — multipart upload. Stores the file under a temp key, runs
/// OCR on it and returns the normalized draft alongside the temp receipt.
#[instrument(skip(state, multipart), fields(workspace_id = %query.workspace_id))]
pub async fn upload_receipt(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<UploadResponse>>, AppError> {
    let mut file: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!("unreadable upload: {e}")))?;
            file = Some((data.to_vec(), content_type));
        }
    }

    let Some((data, content_type)) = file else {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "multipart field 'file' is required"
        )));
    };

    let receipt = state.lifecycle.store_upload(&data, &content_type).await?;
    metrics::record_operation("upload", "success");

    let raw = state
        .ocr
        .extract(OcrInput::Bytes { data, content_type })
        .await?;
    let draft = canonicalizer::normalize(&raw);
    let candidates = state
        .matcher
        .find_matches(query.workspace_id, &draft)
        .await?;

    info!(
        receipt_key = %receipt.key,
        vendor = draft.vendor.as_deref().unwrap_or("<unknown>"),
        candidates = candidates.len(),
        "Receipt uploaded and normalized"
    );
    Ok(Json(ApiResponse::new(UploadResponse {
        receipt,
        draft,
        candidates,
    })))
}

/// POST /receipts/normalize — canonicalize a raw OCR payload without
/// touching storage. Normalization is total; this endpoint never rejects a
/// well-formed JSON body.
pub async fn normalize_receipt(
    Json(raw): Json<RawOcrExtraction>,
) -> Json<ApiResponse<CanonicalDraft>> {
    Json(ApiResponse::new(canonicalizer::normalize(&raw)))
}

/// POST /receipts/matches — score ledger rows against a draft.
#[instrument(skip(state, request), fields(workspace_id = %request.workspace_id))]
pub async fn query_matches(
    State(state): State<AppState>,
    Json(request): Json<MatchQueryRequest>,
) -> Result<Json<ApiResponse<MatchQueryResponse>>, AppError> {
    let candidates = state
        .matcher
        .find_matches(request.workspace_id, &request.draft)
        .await?;
    Ok(Json(ApiResponse::new(MatchQueryResponse { candidates })))
}

/// POST /receipts/promote — move a temp receipt to its permanent key.
/// Idempotent: promoting an already-promoted key returns the same document.
pub async fn promote_receipt(
    State(state): State<AppState>,
    Json(request): Json<PromoteRequest>,
) -> Result<Json<ApiResponse<ReceiptDocument>>, AppError> {
    request.validate()?;
    let receipt = state
        .lifecycle
        .promote_temporary_file(&request.temp_key)
        .await?;
    metrics::record_operation("promote", "success");
    Ok(Json(ApiResponse::new(receipt)))
}

/// POST /reconciliation/commit — commit a LINK or CREATE_NEW decision.
pub async fn commit_reconciliation(
    State(state): State<AppState>,
    Json(decision): Json<ReconciliationDecision>,
) -> Result<Json<ApiResponse<CommitOutcome>>, AppError> {
    let outcome = state.orchestrator.commit(decision).await?;
    Ok(Json(ApiResponse::new(outcome)))
}
