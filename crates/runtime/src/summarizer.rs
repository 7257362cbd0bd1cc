//! Stage-5 summarizer backed by the cheapest credentialed model.

use async_trait::async_trait;
use std::sync::Arc;
use switchyard_core::{cheapest_model, Credentials, Message, Role, FALLBACK_MODEL};
use switchyard_memory::{Summarizer, SummaryError, SUMMARY_INSTRUCTION};
use switchyard_providers::{ProviderClient, ProviderRequest};
use tracing::debug;

const SUMMARY_MAX_TOKENS: u32 = 1_024;

pub struct ProviderSummarizer {
    provider: Arc<dyn ProviderClient>,
    model: String,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn ProviderClient>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Use the cheapest model any configured provider serves.
    pub fn cheapest(provider: Arc<dyn ProviderClient>, credentials: &Credentials) -> Self {
        let model = cheapest_model(credentials)
            .map(|spec| spec.id)
            .unwrap_or(FALLBACK_MODEL);
        Self::new(provider, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Flatten turns into a plain transcript the summary model can read.
fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            format!("{}: {}", role, m.text())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummaryError> {
        debug!("Summarizing {} messages with {}", messages.len(), self.model);
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(SUMMARY_INSTRUCTION),
                Message::user(transcript(messages)),
            ],
            tools: Vec::new(),
            max_tokens: SUMMARY_MAX_TOKENS,
            thinking: None,
        };
        let response = self
            .provider
            .call(&request, None)
            .await
            .map_err(|e| SummaryError(e.to_string()))?;
        Ok(response.content.trim().to_string())
    }
}
