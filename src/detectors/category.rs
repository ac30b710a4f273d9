// 🗂️ Category Detector - merchant rule first, model fallback
// The model may only answer with a category from the fixed vocabulary.

use crate::classifier::ExternalClassifier;
use crate::error::Result;
use crate::models::{clamp_confidence, CategoryResult, Method, Transaction};
use crate::rules::RuleTable;
use crate::schema::validate_transaction;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct CategoryDetector {
    rules: Arc<RuleTable>,
    classifier: Arc<ExternalClassifier>,
    threshold: f64,
}

impl CategoryDetector {
    pub fn new(rules: Arc<RuleTable>, classifier: Arc<ExternalClassifier>, threshold: f64) -> Self {
        CategoryDetector {
            rules,
            classifier,
            threshold,
        }
    }

    /// Categorize a transaction whose merchant is already resolved
    pub async fn detect(&self, tx: &Transaction, merchant: &str) -> Result<CategoryResult> {
        validate_transaction(tx)?;

        info!(
            transaction_id = %tx.id,
            merchant = merchant,
            "category_detection_started"
        );

        if let Some(result) = self.detect_with_rules(tx, merchant) {
            info!(
                transaction_id = %tx.id,
                rule_id = result.rule_id.as_deref().unwrap_or_default(),
                "category_detection_rule_match"
            );
            return Ok(result);
        }

        info!(transaction_id = %tx.id, "category_detection_llm_fallback");

        match self.detect_with_model(tx, merchant).await {
            Ok(result) => {
                info!(
                    transaction_id = %tx.id,
                    category = %result.category,
                    method = %result.method,
                    "category_detection_completed"
                );
                Ok(result)
            }
            Err(e) => {
                error!(transaction_id = %tx.id, error = %e, "category_detection_failed");
                Err(e)
            }
        }
    }

    pub fn detect_with_rules(&self, tx: &Transaction, merchant: &str) -> Option<CategoryResult> {
        let rule = self.rules.lookup_category(merchant)?;

        if rule.confidence < self.threshold {
            return None;
        }

        Some(CategoryResult {
            transaction_id: tx.id.clone(),
            category: rule.category,
            confidence: clamp_confidence(rule.confidence),
            method: Method::Rule,
            reasoning: Some(format!(
                "Merchant '{}' matches rule {}",
                merchant, rule.rule_id
            )),
            rule_id: Some(rule.rule_id),
            model: None,
        })
    }

    async fn detect_with_model(&self, tx: &Transaction, merchant: &str) -> Result<CategoryResult> {
        let verdict = self.classifier.classify_category(tx, merchant).await?;

        if verdict.confidence < self.threshold {
            warn!(
                transaction_id = %tx.id,
                category = %verdict.category,
                confidence = verdict.confidence,
                threshold = self.threshold,
                "category_detection_low_confidence"
            );
        }

        Ok(CategoryResult {
            transaction_id: tx.id.clone(),
            category: verdict.category,
            confidence: verdict.confidence,
            method: Method::Model,
            rule_id: None,
            model: Some(self.classifier.model().to_string()),
            reasoning: verdict.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testing::{tx, ScriptedBackend};
    use crate::error::ClassifierFailure;
    use crate::models::Category;
    use std::time::Duration;

    fn detector(backend: Arc<ScriptedBackend>) -> CategoryDetector {
        let classifier = ExternalClassifier::new(backend, Duration::from_secs(1));
        CategoryDetector::new(
            Arc::new(RuleTable::with_defaults()),
            Arc::new(classifier),
            0.70,
        )
    }

    #[tokio::test]
    async fn test_starbucks_is_cafe_by_rule() {
        let backend = ScriptedBackend::always(r#"{"category": "dining", "confidence": 0.5}"#);
        let detector = detector(backend.clone());

        let result = detector
            .detect(&tx("tx-1", "STARBUCKS #1234"), "starbucks")
            .await
            .unwrap();

        assert_eq!(result.category, Category::Cafe);
        assert_eq!(result.method, Method::Rule);
        assert_eq!(result.rule_id.as_deref(), Some("starbucks-rule"));
        assert!(result.model.is_none());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_merchant_uses_model() {
        let backend = ScriptedBackend::always(
            r#"{"category": "cafe", "confidence": 0.88, "reasoning": "coffee roaster"}"#,
        );
        let detector = detector(backend.clone());

        let result = detector
            .detect(&tx("tx-2", "SQ *BLUE BOTTLE"), "blue_bottle")
            .await
            .unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(result.category, Category::Cafe);
        assert_eq!(result.method, Method::Model);
        assert_eq!(result.model.as_deref(), Some("scripted-model"));
        assert!(result.rule_id.is_none());

        // The prompt carried the merchant and the vocabulary
        let prompt = backend.last_prompt().unwrap();
        assert!(prompt.contains("Merchant: blue_bottle"));
        assert!(prompt.contains(&Category::vocabulary()));
    }

    #[tokio::test]
    async fn test_label_outside_vocabulary_is_failure() {
        let backend = ScriptedBackend::always(r#"{"category": "coffee", "confidence": 0.95}"#);
        let detector = detector(backend);

        let err = detector
            .detect(&tx("tx-3", "SQ *BLUE BOTTLE"), "blue_bottle")
            .await
            .unwrap_err();

        assert_eq!(
            err.classifier_failure(),
            Some(ClassifierFailure::VocabularyViolation)
        );
    }

    #[tokio::test]
    async fn test_low_model_confidence_is_still_returned() {
        let backend = ScriptedBackend::always(r#"{"category": "other", "confidence": 0.2}"#);
        let detector = detector(backend);

        let result = detector
            .detect(&tx("tx-4", "XJ7 PAYMENT"), "unknown_merchant")
            .await
            .unwrap();

        assert_eq!(result.category, Category::Other);
        assert_eq!(result.confidence, 0.2);
    }
}
