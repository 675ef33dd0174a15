//! Client for the external OCR engine.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use service_core::http::retry::{retry_http_call, RetryConfig};
use std::time::Duration;
use tracing::debug;

use crate::models::RawOcrExtraction;

/// A document handed to the OCR engine: inline bytes or a fetchable URL.
#[derive(Debug, Clone)]
pub enum OcrInput {
    Bytes { data: Vec<u8>, content_type: String },
    Url(String),
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract(&self, input: OcrInput) -> Result<RawOcrExtraction, AppError>;
}

#[derive(Debug, Clone)]
pub struct OcrClientConfig {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_config: RetryConfig,
}

impl OcrClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(5),
            // OCR on a multi-page PDF can take a while.
            request_timeout: Duration::from_secs(120),
            retry_config: RetryConfig::default(),
        }
    }
}

pub struct HttpOcrEngine {
    client: reqwest::Client,
    config: OcrClientConfig,
}

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    data: RawOcrExtraction,
}

impl HttpOcrEngine {
    pub fn new(config: OcrClientConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("OCR client build failed: {e}")))?;
        Ok(Self { client, config })
    }

    fn payload_for(input: &OcrInput) -> serde_json::Value {
        match input {
            OcrInput::Bytes { data, content_type } => json!({
                "document": base64::engine::general_purpose::STANDARD.encode(data),
                "contentType": content_type,
            }),
            OcrInput::Url(url) => json!({ "documentUrl": url }),
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn extract(&self, input: OcrInput) -> Result<RawOcrExtraction, AppError> {
        let url = format!("{}/v1/extract", self.config.endpoint.trim_end_matches('/'));
        let payload = Self::payload_for(&input);

        let response = retry_http_call(&self.config.retry_config, "ocr_extract", || {
            let client = self.client.clone();
            let url = url.clone();
            let payload = payload.clone();
            async move {
                let response = client.post(&url).json(&payload).send().await.map_err(|e| {
                    AppError::ExternalService(anyhow::anyhow!("OCR request failed: {e}"))
                })?;

                let status = response.status();
                if status.is_server_error() {
                    return Err(AppError::ExternalService(anyhow::anyhow!(
                        "OCR engine returned {status}"
                    )));
                }
                if !status.is_success() {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "OCR engine rejected document: {status}"
                    )));
                }
                response.json::<ExtractResponse>().await.map_err(|e| {
                    AppError::ExternalService(anyhow::anyhow!("OCR response unreadable: {e}"))
                })
            }
        })
        .await?;

        debug!(
            text_len = response.data.extracted_text.len(),
            "OCR extraction complete"
        );
        Ok(response.data)
    }
}
