pub mod explanation;
pub mod fallback;
pub mod llm;
pub mod prompts;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AnalysisResult, FilingData};

pub use llm::LlmAnalyzer;

/// Turns collected filings into red flags, insider patterns and a raw score.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, data: &FilingData, include_explanation: bool) -> Result<AnalysisResult>;

    fn provider_name(&self) -> String;
}
