// 🏪 Merchant Detector - rules first, model fallback
//
// "STARBUCKS #1234 SEATTLE WA" → starbucks (rule, no external call)
// "SQ *BLUE BOTTLE OAKLAND"    → blue_bottle (model)

use crate::classifier::ExternalClassifier;
use crate::error::{ClassifierFailure, DetectionError, Result};
use crate::models::{clamp_confidence, MerchantResult, Method, Transaction};
use crate::rules::RuleTable;
use crate::schema::{normalize_merchant_token, validate_transaction};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct MerchantDetector {
    rules: Arc<RuleTable>,
    classifier: Arc<ExternalClassifier>,
    /// Rule hits below this confidence are not trusted
    threshold: f64,
}

impl MerchantDetector {
    pub fn new(rules: Arc<RuleTable>, classifier: Arc<ExternalClassifier>, threshold: f64) -> Self {
        MerchantDetector {
            rules,
            classifier,
            threshold,
        }
    }

    pub async fn detect(&self, tx: &Transaction) -> Result<MerchantResult> {
        validate_transaction(tx)?;

        info!(transaction_id = %tx.id, "merchant_detection_started");

        if let Some(result) = self.detect_with_rules(tx) {
            info!(
                transaction_id = %tx.id,
                merchant = %result.merchant,
                "merchant_detection_rule_match"
            );
            return Ok(result);
        }

        info!(transaction_id = %tx.id, "merchant_detection_llm_fallback");

        match self.detect_with_model(tx).await {
            Ok(result) => {
                info!(
                    transaction_id = %tx.id,
                    merchant = %result.merchant,
                    confidence = result.confidence,
                    "merchant_detection_completed"
                );
                Ok(result)
            }
            Err(e) => {
                error!(transaction_id = %tx.id, error = %e, "merchant_detection_failed");
                Err(e)
            }
        }
    }

    /// Rule path only. Deterministic: same transaction, same result.
    pub fn detect_with_rules(&self, tx: &Transaction) -> Option<MerchantResult> {
        let hit = self.rules.match_merchant(&tx.description)?;

        if hit.confidence < self.threshold {
            return None;
        }

        Some(MerchantResult {
            transaction_id: tx.id.clone(),
            merchant: hit.merchant,
            confidence: clamp_confidence(hit.confidence),
            method: Method::Rule,
            model: None,
            reasoning: Some(format!("Description matches pattern '{}'", hit.pattern)),
        })
    }

    async fn detect_with_model(&self, tx: &Transaction) -> Result<MerchantResult> {
        let reply = self.classifier.classify_merchant(tx).await?;

        let merchant = normalize_merchant_token(&reply.merchant).ok_or_else(|| {
            DetectionError::external(
                ClassifierFailure::MalformedResponse,
                "model returned an empty merchant label",
            )
        })?;

        if reply.confidence < self.threshold {
            warn!(
                transaction_id = %tx.id,
                merchant = %merchant,
                confidence = reply.confidence,
                threshold = self.threshold,
                "merchant_detection_low_confidence"
            );
        }

        Ok(MerchantResult {
            transaction_id: tx.id.clone(),
            merchant,
            confidence: reply.confidence,
            method: Method::Model,
            model: Some(self.classifier.model().to_string()),
            reasoning: reply.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testing::{tx, ScriptedBackend};
    use crate::rules::MerchantPattern;
    use std::time::Duration;

    fn detector(backend: Arc<ScriptedBackend>, rules: RuleTable) -> MerchantDetector {
        let classifier = ExternalClassifier::new(backend, Duration::from_secs(1));
        MerchantDetector::new(Arc::new(rules), Arc::new(classifier), 0.70)
    }

    #[tokio::test]
    async fn test_rule_hit_skips_model() {
        let backend = ScriptedBackend::always(r#"{"merchant": "wrong", "confidence": 0.1}"#);
        let detector = detector(backend.clone(), RuleTable::with_defaults());

        let result = detector.detect(&tx("tx-1", "STARBUCKS #1234")).await.unwrap();

        assert_eq!(result.merchant, "starbucks");
        assert_eq!(result.method, Method::Rule);
        assert!(result.confidence >= 0.90);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_calls_model_once() {
        let backend = ScriptedBackend::always(
            r#"{"merchant": "Blue Bottle", "confidence": 0.82, "reasoning": "coffee roaster"}"#,
        );
        let detector = detector(backend.clone(), RuleTable::with_defaults());

        let result = detector
            .detect(&tx("tx-2", "SQ *BLUE BOTTLE OAKLAND"))
            .await
            .unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(result.method, Method::Model);
        assert_eq!(result.merchant, "blue_bottle");
        assert_eq!(result.confidence, 0.82);
        assert_eq!(result.model.as_deref(), Some("scripted-model"));
        assert_eq!(result.reasoning.as_deref(), Some("coffee roaster"));
    }

    #[tokio::test]
    async fn test_weak_rule_falls_through_to_model() {
        let mut rules = RuleTable::new();
        let mut weak = MerchantPattern::new("SQ *", "square");
        weak.confidence = 0.40;
        rules.add_pattern(weak);

        let backend = ScriptedBackend::always(r#"{"merchant": "blue_bottle", "confidence": 0.9}"#);
        let detector = detector(backend.clone(), rules);

        let result = detector.detect(&tx("tx-3", "SQ *BLUE BOTTLE")).await.unwrap();

        assert_eq!(result.merchant, "blue_bottle");
        assert_eq!(result.method, Method::Model);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let backend = ScriptedBackend::always("not json at all");
        let detector = detector(backend, RuleTable::with_defaults());

        let err = detector.detect(&tx("tx-4", "CORNER DELI")).await.unwrap_err();
        assert_eq!(
            err.classifier_failure(),
            Some(ClassifierFailure::MalformedResponse)
        );
    }

    #[tokio::test]
    async fn test_blank_model_label_is_failure() {
        let backend = ScriptedBackend::always(r#"{"merchant": "   ", "confidence": 0.9}"#);
        let detector = detector(backend, RuleTable::with_defaults());

        let err = detector.detect(&tx("tx-5", "CORNER DELI")).await.unwrap_err();
        assert_eq!(err.kind(), "external_classification_error");
    }

    #[tokio::test]
    async fn test_invalid_transaction_rejected_before_model() {
        let backend = ScriptedBackend::always(r#"{"merchant": "x", "confidence": 0.9}"#);
        let detector = detector(backend.clone(), RuleTable::with_defaults());

        let err = detector.detect(&tx("", "CORNER DELI")).await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_rule_path_is_idempotent() {
        let backend = ScriptedBackend::always("{}");
        let detector = detector(backend, RuleTable::with_defaults());
        let transaction = tx("tx-6", "AMAZON MKTPLACE PMTS");

        let first = serde_json::to_vec(&detector.detect(&transaction).await.unwrap()).unwrap();
        let second = serde_json::to_vec(&detector.detect(&transaction).await.unwrap()).unwrap();

        assert_eq!(first, second);
    }
}
