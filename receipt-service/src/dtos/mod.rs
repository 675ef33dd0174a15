pub mod receipts;

use serde::Serialize;

/// Uniform success envelope; errors use the mirror shape with
/// `success: false` (see `service_core::error`).
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
