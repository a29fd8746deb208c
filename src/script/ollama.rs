//! Ollama backend via the native `/api/chat` endpoint, non-streaming.
//!
//! With `stream: false` Ollama answers with one object:
//! ```json
//! {"message":{"role":"assistant","content":"..."},"done":true,"prompt_eval_count":26,"eval_count":298}
//! ```

use super::interface::{Completion, CompletionRequest, ScriptBackend, TokenUsage};
use crate::utils::http::{build_client, check_response, ProviderError, DEFAULT_REQUEST_TIMEOUT};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";

#[derive(Debug, Clone, Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessageResponse>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct OllamaMessageResponse {
    content: Option<String>,
}

pub struct OllamaScriptBackend {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaScriptBackend {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }
}

#[async_trait]
impl ScriptBackend for OllamaScriptBackend {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut options = serde_json::Map::new();
        if let Some(t) = request.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(n) = request.max_tokens {
            options.insert("num_predict".into(), json!(n));
        }

        let body = OllamaChatRequest {
            model: &self.model,
            messages: vec![
                OllamaMessage {
                    role: "system",
                    content: &request.system,
                },
                OllamaMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            stream: false,
            format: request.json_mode.then_some("json"),
            options: (!options.is_empty()).then_some(serde_json::Value::Object(options)),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let parsed: OllamaChatResponse = check_response(response).await?.json().await?;

        Ok(Completion {
            text: parsed
                .message
                .and_then(|m| m.content)
                .unwrap_or_default(),
            usage: TokenUsage {
                input_tokens: parsed.prompt_eval_count,
                output_tokens: parsed.eval_count,
            },
        })
    }
}
