use crate::openai_compatible::OpenAICompatibleProvider;
use crate::traits::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{Credentials, Provider};
use tracing::info;

/// Routes each request to the client of the model's provider.
#[derive(Clone, Default)]
pub struct ProviderSet {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: Provider, client: Arc<dyn ProviderClient>) {
        self.clients.insert(provider, client);
    }

    pub fn with(mut self, provider: Provider, client: Arc<dyn ProviderClient>) -> Self {
        self.insert(provider, client);
        self
    }

    /// One HTTP client per provider whose key `lookup` returns.
    pub fn from_lookup<F>(lookup: F, timeout: Duration) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut set = Self::new();
        for provider in switchyard_core::routing::PROVIDER_PREFERENCE {
            if let Some(key) = lookup(provider.env_key()).filter(|k| !k.trim().is_empty()) {
                info!("Provider {} configured", provider.as_str());
                set.insert(
                    provider,
                    Arc::new(OpenAICompatibleProvider::for_provider(provider, key, timeout)),
                );
            }
        }
        set
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.clients.keys().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn client_for(&self, model: &str) -> Result<&Arc<dyn ProviderClient>, ProviderError> {
        let provider = Provider::of_model(model)
            .ok_or_else(|| ProviderError::Unavailable(format!("unknown provider for model {}", model)))?;
        self.clients
            .get(&provider)
            .ok_or_else(|| ProviderError::Unavailable(format!("no credential for {}", provider.as_str())))
    }
}

#[async_trait]
impl ProviderClient for ProviderSet {
    async fn call(
        &self,
        request: &ProviderRequest,
        on_token: Option<&TokenSender>,
    ) -> Result<ProviderResponse, ProviderError> {
        self.client_for(&request.model)?.call(request, on_token).await
    }

    fn name(&self) -> &str {
        "provider-set"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use switchyard_core::Message;

    struct Echo(&'static str);

    #[async_trait]
    impl ProviderClient for Echo {
        async fn call(
            &self,
            request: &ProviderRequest,
            on_token: Option<&TokenSender>,
        ) -> Result<ProviderResponse, ProviderError> {
            if let Some(tx) = on_token {
                tx.send(self.0.to_string()).unwrap();
            }
            Ok(ProviderResponse {
                content: format!("{}:{}", self.0, request.model),
                ..ProviderResponse::default()
            })
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    fn request(model: &str) -> ProviderRequest {
        ProviderRequest {
            model: model.to_string(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            max_tokens: 64,
            thinking: None,
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_model_provider() {
        let set = ProviderSet::new()
            .with(Provider::Anthropic, Arc::new(Echo("a")))
            .with(Provider::Google, Arc::new(Echo("g")));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let out = set.call(&request("gemini-2.5-flash"), Some(&tx)).await.unwrap();
        assert_eq!(out.content, "g:gemini-2.5-flash");
        assert_eq!(rx.recv().await.unwrap(), "g");

        let err = set.call(&request("gpt-4.1"), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_from_lookup_builds_credentials() {
        let set = ProviderSet::from_lookup(
            |key| (key == "DEEPSEEK_API_KEY").then(|| "k".to_string()),
            Duration::from_secs(5),
        );
        assert!(set.credentials().has(Provider::DeepSeek));
        assert!(!set.credentials().has(Provider::Anthropic));
    }
}
