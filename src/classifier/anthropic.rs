// Anthropic messages backend

use super::{check_status, transport_error, LlmBackend, Prompt, Provider};
use crate::error::{ClassifierFailure, DetectionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicBackend {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str, base_url: &str) -> Self {
        AnthropicBackend {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn messages_request<'a>(model: &'a str, prompt: &'a Prompt) -> MessagesRequest<'a> {
    MessagesRequest {
        model,
        max_tokens: MAX_TOKENS,
        temperature: 0.0,
        system: &prompt.system,
        messages: vec![Message {
            role: "user",
            content: &prompt.user,
        }],
    }
}

fn reply_text(response: MessagesResponse) -> Result<String> {
    response
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
        .ok_or_else(|| {
            DetectionError::external(
                ClassifierFailure::MalformedResponse,
                "anthropic reply has no text block",
            )
        })
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&messages_request(&self.model, prompt))
            .send()
            .await
            .map_err(|e| transport_error(Provider::Anthropic, e))?;

        let response = check_status(Provider::Anthropic, response).await?;

        let body: MessagesResponse = response.json().await.map_err(|e| {
            DetectionError::external(
                ClassifierFailure::MalformedResponse,
                format!("anthropic envelope: {}", e),
            )
        })?;

        reply_text(body)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}
