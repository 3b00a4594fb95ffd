pub mod gemini;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub use gemini::GeminiBackend;

/// One structured-output call to a vision model.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub image: Option<AnalysisImage>,
    /// JSON schema the response must follow.
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct AnalysisImage {
    pub data: Bytes,
    pub mime_type: &'static str,
}

/// External, fallible and possibly slow model call. Each assistant owns a
/// handle; failures stay local to that assistant and that frame.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn generate(&self, request: AnalysisRequest) -> Result<serde_json::Value>;
}
