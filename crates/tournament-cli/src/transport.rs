//! HTTP judge transports
//!
//! Both transports are thin: one POST per call, no retries and no
//! timeout of their own. The judge client wraps them with per-kind
//! timeouts and backoff.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tournament::{JudgeTransport, TransportError};

use crate::config::{LlmSection, Provider};

/// Build the transport selected by `llm.provider`.
pub fn build_transport(llm: &LlmSection) -> anyhow::Result<Arc<dyn JudgeTransport>> {
    let http = reqwest::Client::builder().build()?;
    let base_url = llm.base_url().trim_end_matches('/').to_string();
    let transport: Arc<dyn JudgeTransport> = match llm.provider {
        Provider::Ollama => Arc::new(OllamaTransport::new(http, base_url, llm.temperature)),
        Provider::Openai => Arc::new(OpenAiTransport::new(
            http,
            base_url,
            llm.api_key.clone(),
            llm.temperature,
        )),
    };
    Ok(transport)
}

async fn post_json<B: Serialize, R: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    body: &B,
) -> Result<R, TransportError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| TransportError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| TransportError::Decode(e.to_string()))
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama `POST {base_url}/api/generate`, non-streaming.
#[derive(Clone)]
pub struct OllamaTransport {
    http: reqwest::Client,
    base_url: String,
    temperature: f32,
}

impl OllamaTransport {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, temperature: f32) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            temperature,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl JudgeTransport for OllamaTransport {
    async fn call(&self, model: &str, prompt: &str) -> Result<String, TransportError> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };
        debug!(model, prompt_len = prompt.len(), "ollama generate");
        let reply: GenerateResponse = post_json(self.http.post(self.endpoint()), &request).await?;
        Ok(reply.response)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible `POST {base_url}/chat/completions`.
#[derive(Clone)]
pub struct OpenAiTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiTransport {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        temperature: f32,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
            temperature,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl JudgeTransport for OpenAiTransport {
    async fn call(&self, model: &str, prompt: &str) -> Result<String, TransportError> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };
        let mut builder = self.http.post(self.endpoint());
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        debug!(model, prompt_len = prompt.len(), "chat completion");

        let reply: ChatResponse = post_json(builder, &request).await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TransportError::Decode("response has no message content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_shape() {
        let request = GenerateRequest {
            model: "phi4",
            prompt: "judge this",
            stream: false,
            options: GenerateOptions { temperature: 0.5 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "phi4");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["temperature"], 0.5);
    }

    #[test]
    fn test_chat_response_without_content() {
        let reply: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"role": "assistant"}}]}"#).unwrap();
        assert!(reply.choices[0].message.content.is_none());
    }

    #[test]
    fn test_endpoints_and_provider_selection() {
        let http = reqwest::Client::new();
        assert_eq!(
            OllamaTransport::new(http.clone(), "http://host:11434", 0.1).endpoint(),
            "http://host:11434/api/generate"
        );
        assert_eq!(
            OpenAiTransport::new(http, "http://host/v1", None, 0.1).endpoint(),
            "http://host/v1/chat/completions"
        );

        let llm = LlmSection {
            base_url: Some("http://host:11434/".into()),
            ..LlmSection::default()
        };
        assert!(build_transport(&llm).is_ok());
    }
}
