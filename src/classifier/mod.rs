//! External classifier: generative-model backends behind one trait
//!
//! The pipeline only sees [`ExternalClassifier`]. Which provider answers is decided once,
//! in [`build_backend`], and nothing downstream branches on it.

pub mod anthropic;
pub mod openai;
pub mod prompt;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;
pub use prompt::Prompt;

use crate::config::Settings;
use crate::error::{ClassifierFailure, DetectionError, Result};
use crate::models::{clamp_confidence, Category, Transaction};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Supported generative-model providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completion call against a provider. Implementations return the raw reply text;
/// parsing and validation live in [`ExternalClassifier`].
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String>;

    fn model(&self) -> &str;

    fn provider(&self) -> Provider;
}

/// Pick the backend named by configuration
pub fn build_backend(settings: &Settings) -> Result<Arc<dyn LlmBackend>> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(settings.llm_timeout_ms))
        .build()
        .map_err(|e| DetectionError::Configuration(format!("HTTP client: {}", e)))?;

    let backend: Arc<dyn LlmBackend> = match settings.llm_provider {
        Provider::OpenAi => Arc::new(OpenAiBackend::new(
            client,
            &settings.openai_api_key,
            &settings.openai_model,
            &settings.openai_base_url,
        )),
        Provider::Anthropic => Arc::new(AnthropicBackend::new(
            client,
            &settings.anthropic_api_key,
            &settings.anthropic_model,
            &settings.anthropic_base_url,
        )),
    };

    Ok(backend)
}

// ============================================================================
// REPLY SCHEMAS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MerchantReply {
    pub merchant: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct CategoryReply {
    category: String,
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Category reply after vocabulary validation
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryVerdict {
    pub category: Category,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// Strictly parse a reply. A single surrounding markdown code fence is tolerated.
pub fn parse_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(strip_code_fence(raw)).map_err(|e| {
        DetectionError::external(
            ClassifierFailure::MalformedResponse,
            format!("reply does not match the expected schema: {}", e),
        )
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    match inner.find('\n') {
        Some(newline) => inner[newline + 1..].trim(),
        None => inner.trim(),
    }
}

// ============================================================================
// EXTERNAL CLASSIFIER
// ============================================================================

pub struct ExternalClassifier {
    backend: Arc<dyn LlmBackend>,
    timeout: Duration,
}

impl ExternalClassifier {
    pub fn new(backend: Arc<dyn LlmBackend>, timeout: Duration) -> Self {
        ExternalClassifier { backend, timeout }
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn provider(&self) -> Provider {
        self.backend.provider()
    }

    /// Ask the model for the merchant behind a description
    pub async fn classify_merchant(&self, tx: &Transaction) -> Result<MerchantReply> {
        let mut reply: MerchantReply = self.request(&prompt::merchant_prompt(tx)).await?;
        reply.confidence = clamp_confidence(reply.confidence);
        Ok(reply)
    }

    /// Ask the model for a category, constrained to the fixed vocabulary
    pub async fn classify_category(
        &self,
        tx: &Transaction,
        merchant: &str,
    ) -> Result<CategoryVerdict> {
        let reply: CategoryReply = self.request(&prompt::category_prompt(tx, merchant)).await?;

        let category = reply.category.parse::<Category>().map_err(|e| {
            DetectionError::external(ClassifierFailure::VocabularyViolation, e.to_string())
        })?;

        Ok(CategoryVerdict {
            category,
            confidence: clamp_confidence(reply.confidence),
            reasoning: reply.reasoning,
        })
    }

    async fn request<T: DeserializeOwned>(&self, prompt: &Prompt) -> Result<T> {
        let raw = tokio::time::timeout(self.timeout, self.backend.complete(prompt))
            .await
            .map_err(|_| {
                DetectionError::external(
                    ClassifierFailure::Timeout,
                    format!(
                        "{} gave no reply within {}ms",
                        self.backend.provider(),
                        self.timeout.as_millis()
                    ),
                )
            })??;

        debug!(
            provider = %self.backend.provider(),
            model = self.backend.model(),
            reply_len = raw.len(),
            "llm_reply_received"
        );

        parse_reply(&raw)
    }
}

// ============================================================================
// TRANSPORT HELPERS (shared by backends)
// ============================================================================

pub(crate) fn transport_error(provider: Provider, err: reqwest::Error) -> DetectionError {
    let failure = if err.is_timeout() {
        ClassifierFailure::Timeout
    } else {
        ClassifierFailure::Transport
    };
    DetectionError::external(failure, format!("{} request failed: {}", provider, err))
}

/// Turn non-success statuses into errors, keeping a bounded slice of the body
pub(crate) async fn check_status(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(DetectionError::external(
        ClassifierFailure::Status,
        format!("{} returned {}: {}", provider, status, snippet),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    struct CannedBackend {
        reply: String,
        delay: Duration,
    }

    impl CannedBackend {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(CannedBackend {
                reply: reply.to_string(),
                delay: Duration::ZERO,
            })
        }

        fn slow(reply: &str, delay: Duration) -> Arc<Self> {
            Arc::new(CannedBackend {
                reply: reply.to_string(),
                delay,
            })
        }
    }

    #[async_trait]
    impl LlmBackend for CannedBackend {
        async fn complete(&self, _prompt: &Prompt) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        }

        fn model(&self) -> &str {
            "canned-model"
        }

        fn provider(&self) -> Provider {
            Provider::OpenAi
        }
    }

    fn tx() -> Transaction {
        Transaction::new(
            "tx-1",
            "SQ *BLUE BOTTLE",
            -6.5,
            NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
        )
    }

    fn classifier(backend: Arc<dyn LlmBackend>) -> ExternalClassifier {
        ExternalClassifier::new(backend, Duration::from_millis(200))
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(serde_json::to_string(&Provider::OpenAi).unwrap(), "\"openai\"");
        assert_eq!(
            serde_json::from_str::<Provider>("\"anthropic\"").unwrap(),
            Provider::Anthropic
        );
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{\"a\": 1}```"), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_reply_requires_fields() {
        let ok: MerchantReply =
            parse_reply(r#"{"merchant": "blue_bottle", "confidence": 0.8}"#).unwrap();
        assert_eq!(ok.merchant, "blue_bottle");
        assert!(ok.reasoning.is_none());

        let missing = parse_reply::<MerchantReply>(r#"{"merchant": "blue_bottle"}"#).unwrap_err();
        assert_eq!(
            missing.classifier_failure(),
            Some(ClassifierFailure::MalformedResponse)
        );

        let wrong_type =
            parse_reply::<MerchantReply>(r#"{"merchant": "x", "confidence": "high"}"#).unwrap_err();
        assert_eq!(
            wrong_type.classifier_failure(),
            Some(ClassifierFailure::MalformedResponse)
        );

        let prose = parse_reply::<MerchantReply>("The merchant is Blue Bottle.").unwrap_err();
        assert_eq!(
            prose.classifier_failure(),
            Some(ClassifierFailure::MalformedResponse)
        );
    }

    #[tokio::test]
    async fn test_merchant_confidence_is_clamped() {
        let classifier = classifier(CannedBackend::new(
            r#"{"merchant": "blue_bottle", "confidence": 1.4, "reasoning": "name in text"}"#,
        ));

        let reply = classifier.classify_merchant(&tx()).await.unwrap();
        assert_eq!(reply.confidence, 1.0);
        assert_eq!(reply.reasoning.as_deref(), Some("name in text"));
    }

    #[tokio::test]
    async fn test_category_outside_vocabulary() {
        let classifier = classifier(CannedBackend::new(
            r#"{"category": "coffee", "confidence": 0.9}"#,
        ));

        let err = classifier
            .classify_category(&tx(), "blue_bottle")
            .await
            .unwrap_err();
        assert_eq!(
            err.classifier_failure(),
            Some(ClassifierFailure::VocabularyViolation)
        );
    }

    #[tokio::test]
    async fn test_category_inside_vocabulary() {
        let classifier = classifier(CannedBackend::new(
            r#"```json
{"category": "Cafe", "confidence": 0.87, "reasoning": "coffee shop"}
```"#,
        ));

        let verdict = classifier
            .classify_category(&tx(), "blue_bottle")
            .await
            .unwrap();
        assert_eq!(verdict.category, Category::Cafe);
        assert_eq!(verdict.confidence, 0.87);
    }

    #[tokio::test]
    async fn test_timeout_is_classification_failure() {
        let classifier = classifier(CannedBackend::slow(
            r#"{"merchant": "late", "confidence": 0.9}"#,
            Duration::from_secs(5),
        ));

        let err = classifier.classify_merchant(&tx()).await.unwrap_err();
        assert_eq!(err.kind(), "external_classification_error");
        assert_eq!(err.classifier_failure(), Some(ClassifierFailure::Timeout));
    }

    #[test]
    fn test_build_backend_follows_configuration() {
        let mut settings = Settings::default();
        settings.llm_provider = Provider::Anthropic;

        let backend = build_backend(&settings).unwrap();
        assert_eq!(backend.provider(), Provider::Anthropic);
        assert_eq!(backend.model(), "claude-3-sonnet-20240229");
    }
}
