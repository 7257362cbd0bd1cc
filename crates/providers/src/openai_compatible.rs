use crate::traits::*;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use switchyard_core::routing::bare_model_id;
use switchyard_core::{ContentBlock, Message, MessageContent, Provider, Role, ToolCall, Usage};
use tracing::debug;

const ANTHROPIC_MIN_THINKING: u32 = 1_024;

/// Chat-completions client for any provider exposing the OpenAI wire format.
pub struct OpenAICompatibleProvider {
    client: Client,
    provider: Provider,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(provider: Provider, base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Client for a provider's public OpenAI-compatible endpoint.
    pub fn for_provider(provider: Provider, api_key: String, timeout: Duration) -> Self {
        Self::new(provider, default_base_url(provider).to_string(), Some(api_key), timeout)
    }

    fn build_body(&self, request: &ProviderRequest) -> Value {
        let model = bare_model_id(&request.model);
        let mut body = json!({
            "model": model,
            "messages": to_wire_messages(&request.messages),
            "max_tokens": request.max_tokens,
        });

        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }

        if let Some(budget) = request.thinking {
            match self.provider {
                Provider::Anthropic => {
                    // max_tokens covers thinking plus the visible reply and must exceed the budget.
                    let budget = budget.max(ANTHROPIC_MIN_THINKING);
                    body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
                    body["max_tokens"] = json!(budget.saturating_add(request.max_tokens.max(1)));
                }
                Provider::OpenAi if model.starts_with('o') => {
                    body["reasoning_effort"] = json!(reasoning_effort(budget));
                }
                Provider::Google => {
                    body["reasoning_effort"] = json!(reasoning_effort(budget));
                }
                _ => {}
            }
        }
        body
    }
}

pub fn default_base_url(provider: Provider) -> &'static str {
    match provider {
        Provider::Anthropic => "https://api.anthropic.com/v1",
        Provider::OpenAi => "https://api.openai.com/v1",
        Provider::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
        Provider::DeepSeek => "https://api.deepseek.com/v1",
    }
}

fn reasoning_effort(budget: u32) -> &'static str {
    match budget {
        0..=5_000 => "low",
        5_001..=16_000 => "medium",
        _ => "high",
    }
}

#[async_trait]
impl ProviderClient for OpenAICompatibleProvider {
    async fn call(
        &self,
        request: &ProviderRequest,
        on_token: Option<&TokenSender>,
    ) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request);

        let mut http = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            http = http.bearer_auth(api_key);
        }

        debug!("POST {} model={}", url, request.model);
        let response = http.send().await.map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let parsed = parse_response(&json)?;
        if let Some(sender) = on_token {
            if !parsed.content.is_empty() {
                // Receiver may have gone away; tokens are best-effort.
                let _ = sender.send(parsed.content.clone());
            }
        }
        Ok(parsed)
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Connection(err.to_string())
    }
}

/// Parse a chat-completions response body.
pub fn parse_response(json: &Value) -> Result<ProviderResponse, ProviderError> {
    if let Some(error) = json.get("error") {
        let text = error.to_string();
        if is_overflow_text(&text) {
            return Err(ProviderError::TokenOverflow(text));
        }
        return Err(ProviderError::BadRequest(text));
    }

    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

    let message = &choice["message"];
    let content = message["content"].as_str().unwrap_or_default().to_string();
    let stop_reason = choice["finish_reason"]
        .as_str()
        .map(StopReason::from_finish_reason);

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(index, call)| {
                    let name = call["function"]["name"].as_str()?.to_string();
                    let id = call["id"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{}", index));
                    let arguments = parse_arguments(&call["function"]["arguments"]);
                    Some(ToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = Usage {
        input: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };

    Ok(ProviderResponse {
        content,
        tool_calls,
        usage,
        stop_reason,
    })
}

/// Arguments arrive as a JSON string; anything that is not an object is kept
/// under `_invalid_arguments` so validation can report it.
fn parse_arguments(raw: &Value) -> Map<String, Value> {
    let parsed = match raw {
        Value::Null => Value::Object(Map::new()),
        Value::String(text) if text.trim().is_empty() => Value::Object(Map::new()),
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| json!(text)),
        other => other.clone(),
    };
    match parsed {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("_invalid_arguments".to_string(), other);
            map
        }
    }
}

/// Convert session messages to the chat-completions wire format. Tool
/// results whose call is no longer in the history are sent as plain text.
pub fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len());
    let mut open_calls: HashSet<String> = HashSet::new();

    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let blocks = match &message.content {
            MessageContent::Text(text) => {
                let role = if role == "tool" { "user" } else { role };
                wire.push(json!({"role": role, "content": text}));
                continue;
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let mut text_parts: Vec<Value> = Vec::new();
        let mut calls: Vec<Value> = Vec::new();
        let mut results: Vec<Value> = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::Text { text } => {
                    text_parts.push(json!({"type": "text", "text": text}));
                }
                ContentBlock::Image { media_type, data } => {
                    text_parts.push(json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:{};base64,{}", media_type, data)},
                    }));
                }
                ContentBlock::ToolUse { id, name, input } => {
                    open_calls.insert(id.clone());
                    calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": Value::Object(input.clone()).to_string(),
                        },
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    if open_calls.remove(tool_use_id) {
                        results.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        }));
                    } else {
                        text_parts.push(json!({"type": "text", "text": content}));
                    }
                }
            }
        }

        let only_text = text_parts.iter().all(|p| p["type"] == "text");
        let content = if text_parts.is_empty() {
            Value::Null
        } else if only_text {
            let joined = text_parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n");
            Value::String(joined)
        } else {
            Value::Array(text_parts)
        };

        if !calls.is_empty() {
            wire.push(json!({"role": "assistant", "content": content, "tool_calls": calls}));
        } else if !content.is_null() {
            let role = if role == "tool" { "user" } else { role };
            wire.push(json!({"role": role, "content": content}));
        }
        wire.extend(results);
    }
    wire
}
