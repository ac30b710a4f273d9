// Detection pipeline
//
// Each detector is built once at startup with its configuration and shared by
// reference afterwards. None of them hold mutable state.

pub mod anomaly;
pub mod batch;
pub mod category;
pub mod merchant;

pub use anomaly::StatisticalAnomalyScorer;
pub use batch::{BatchFailure, BatchOrchestrator, BatchOutcome};
pub use category::CategoryDetector;
pub use merchant::MerchantDetector;

use crate::classifier::{build_backend, ExternalClassifier, LlmBackend};
use crate::config::Settings;
use crate::error::{DetectionError, Result};
use crate::models::{
    BatchDetectionResponse, BatchItemError, CategoryResult, MerchantResult, Transaction,
};
use crate::rules::RuleTable;
use crate::schema::validate_batch;
use anyhow::Context;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Pipeline stage a batch item failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Merchant,
    Category,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Merchant => "merchant",
            Stage::Category => "category",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: Stage,
    pub error: DetectionError,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage: {}", self.stage.as_str(), self.error)
    }
}

pub struct Detectors {
    pub merchant: MerchantDetector,
    pub category: CategoryDetector,
    pub anomaly: StatisticalAnomalyScorer,
    pub batch: BatchOrchestrator,
    rules: Arc<RuleTable>,
    classifier: Arc<ExternalClassifier>,
}

impl Detectors {
    /// Build the whole pipeline from settings (rule file, backend, thresholds)
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let rules = match &settings.rules_path {
            Some(path) => RuleTable::from_file(path)
                .with_context(|| format!("Failed to load rule table from {}", path))?,
            None => RuleTable::with_defaults(),
        };

        let backend = build_backend(settings).context("Failed to build LLM backend")?;

        info!(
            provider = %backend.provider(),
            model = backend.model(),
            patterns = rules.pattern_count(),
            category_rules = rules.rule_count(),
            "detectors_initialized"
        );

        Ok(Detectors::new(Arc::new(rules), backend, settings))
    }

    /// Build the pipeline around an already-constructed backend
    pub fn new(rules: Arc<RuleTable>, backend: Arc<dyn LlmBackend>, settings: &Settings) -> Self {
        let classifier = Arc::new(ExternalClassifier::new(
            backend,
            Duration::from_millis(settings.llm_timeout_ms),
        ));

        Detectors {
            merchant: MerchantDetector::new(
                rules.clone(),
                classifier.clone(),
                settings.merchant_confidence_threshold,
            ),
            category: CategoryDetector::new(
                rules.clone(),
                classifier.clone(),
                settings.category_confidence_threshold,
            ),
            anomaly: StatisticalAnomalyScorer::new(settings.anomaly_threshold),
            batch: BatchOrchestrator::new(settings.batch_concurrency),
            rules,
            classifier,
        }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn classifier(&self) -> &ExternalClassifier {
        &self.classifier
    }

    /// Category for a transaction; the merchant is inferred when not supplied
    pub async fn detect_category(
        &self,
        tx: &Transaction,
        merchant: Option<&str>,
    ) -> Result<CategoryResult> {
        match merchant.map(str::trim).filter(|m| !m.is_empty()) {
            Some(merchant) => self.category.detect(tx, merchant).await,
            None => {
                let resolved = self.merchant.detect(tx).await?;
                self.category.detect(tx, &resolved.merchant).await
            }
        }
    }

    /// Merchant then category for one transaction
    pub async fn classify(
        &self,
        tx: &Transaction,
    ) -> std::result::Result<(MerchantResult, CategoryResult), StageError> {
        let merchant = self.merchant.detect(tx).await.map_err(|error| StageError {
            stage: Stage::Merchant,
            error,
        })?;

        let category = self
            .category
            .detect(tx, &merchant.merchant)
            .await
            .map_err(|error| StageError {
                stage: Stage::Category,
                error,
            })?;

        Ok((merchant, category))
    }

    /// Merchant detection over many transactions
    pub async fn detect_merchants_batch(
        &self,
        transactions: &[Transaction],
    ) -> Result<BatchOutcome<MerchantResult>> {
        validate_batch(transactions)?;
        Ok(self
            .batch
            .detect_batch(transactions, |tx| self.merchant.detect(tx))
            .await)
    }

    /// Merchant + category over many transactions, one failing item never sinks the batch
    pub async fn classify_batch(
        &self,
        transactions: &[Transaction],
    ) -> Result<BatchDetectionResponse> {
        validate_batch(transactions)?;

        let outcome = self
            .batch
            .detect_batch(transactions, |tx| self.classify(tx))
            .await;

        let mut response = BatchDetectionResponse {
            processed_count: outcome.successes.len(),
            failed_count: outcome.failures.len(),
            ..Default::default()
        };

        for (merchant, category) in outcome.successes {
            response.merchant_detections.push(merchant);
            response.category_detections.push(category);
        }

        response.errors = outcome
            .failures
            .into_iter()
            .map(|failure| BatchItemError {
                transaction_id: failure.transaction_id,
                stage: failure.error.stage.as_str().to_string(),
                error: failure.error.error.to_string(),
            })
            .collect();

        Ok(response)
    }
}
