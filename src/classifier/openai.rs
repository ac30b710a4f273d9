// OpenAI chat completions backend

use super::{check_status, transport_error, LlmBackend, Prompt, Provider};
use crate::error::{ClassifierFailure, DetectionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str, base_url: &str) -> Self {
        OpenAiBackend {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn chat_request<'a>(model: &'a str, prompt: &'a Prompt) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: &prompt.system,
            },
            ChatMessage {
                role: "user",
                content: &prompt.user,
            },
        ],
        temperature: 0.0,
        response_format: ResponseFormat {
            kind: "json_object",
        },
    }
}

fn reply_text(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| {
            DetectionError::external(
                ClassifierFailure::MalformedResponse,
                "openai reply has no message content",
            )
        })
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&chat_request(&self.model, prompt))
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

        let response = check_status(Provider::OpenAi, response).await?;

        let body: ChatResponse = response.json().await.map_err(|e| {
            DetectionError::external(
                ClassifierFailure::MalformedResponse,
                format!("openai envelope: {}", e),
            )
        })?;

        reply_text(body)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> Provider {
        Provider::OpenAi
    }
}
