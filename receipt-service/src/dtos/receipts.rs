//! Request/response DTOs for the receipt endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{CanonicalDraft, MatchCandidate, ReceiptDocument};

/// Query parameters for the multipart upload endpoint.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub workspace_id: Uuid,
}

/// Upload result: the stored temp receipt, the draft extracted from it and
/// the ledger rows it might reconcile against.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub receipt: ReceiptDocument,
    pub draft: CanonicalDraft,
    pub candidates: Vec<MatchCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct MatchQueryRequest {
    pub workspace_id: Uuid,
    pub draft: CanonicalDraft,
}

#[derive(Debug, Serialize)]
pub struct MatchQueryResponse {
    pub candidates: Vec<MatchCandidate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PromoteRequest {
    #[validate(length(min = 1, message = "temp_key must not be empty"))]
    pub temp_key: String,
}
