// 📈 Anomaly Scorer - z-score against the caller's historical amounts
//
// Conventions:
// - standard deviation is the SAMPLE estimator (n - 1 denominator)
// - anomaly_score is the raw z-score, not normalized into [0, 1]
// - a cohort whose amounts are all identical has zero variance; any other amount is
//   anomalous and scores ZERO_VARIANCE_SCORE
// - statistics are computed on values divided by the largest magnitude involved; the
//   z-score is scale-free, so this only keeps sums of huge amounts from overflowing

use crate::error::Result;
use crate::models::{clamp_confidence, AnomalyResult, Transaction};
use crate::schema::{validate_history, validate_transaction, ValidationError};
use tracing::debug;

/// Fewer historical points than this and the scorer refuses to judge
pub const MIN_HISTORY: usize = 3;

/// Cohorts at least this large earn a confidence bonus
pub const LARGE_SAMPLE: usize = 10;

/// Score reported for a differing amount in a zero-variance cohort
pub const ZERO_VARIANCE_SCORE: f64 = 10.0;

pub const DEFAULT_THRESHOLD: f64 = 2.5;

const INSUFFICIENT_CONFIDENCE: f64 = 0.10;
const ZERO_VARIANCE_CONFIDENCE: f64 = 0.60;
const MAX_CONFIDENCE: f64 = 0.99;
const SMALL_SAMPLE_CAP: f64 = 0.85;
const LARGE_SAMPLE_BONUS: f64 = 0.10;

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation. Needs at least two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Cohort statistics in the scaled domain, plus the factor to undo it
struct Scaled {
    scale: f64,
    amount: f64,
    mean: f64,
    std_dev: f64,
}

impl Scaled {
    fn new(amount: f64, history: &[f64]) -> Self {
        let scale = history
            .iter()
            .fold(amount.abs(), |acc, v| acc.max(v.abs()))
            .max(f64::MIN_POSITIVE);
        let values: Vec<f64> = history.iter().map(|v| v / scale).collect();

        Scaled {
            scale,
            amount: amount / scale,
            mean: mean(&values),
            std_dev: sample_std_dev(&values),
        }
    }

    fn z(&self) -> f64 {
        (self.amount - self.mean).abs() / self.std_dev
    }

    fn mean_amount(&self) -> f64 {
        self.mean * self.scale
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatisticalAnomalyScorer {
    threshold: f64,
}

impl Default for StatisticalAnomalyScorer {
    fn default() -> Self {
        StatisticalAnomalyScorer::new(DEFAULT_THRESHOLD)
    }
}

impl StatisticalAnomalyScorer {
    pub fn new(threshold: f64) -> Self {
        StatisticalAnomalyScorer { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Validate inputs, then score
    pub fn detect(&self, tx: &Transaction, historical_amounts: &[f64]) -> Result<AnomalyResult> {
        validate_transaction(tx)?;
        validate_history(historical_amounts)?;

        let result = self.score(&tx.id, tx.amount, historical_amounts);
        if !result.anomaly_score.is_finite() {
            return Err(vec![ValidationError::new(
                "historical_amounts",
                "Amounts are too extreme to score",
                "AnomalyRequest",
            )]
            .into());
        }

        debug!(
            transaction_id = %tx.id,
            historical_count = historical_amounts.len(),
            is_anomaly = result.is_anomaly,
            score = result.anomaly_score,
            "anomaly_detection_completed"
        );

        Ok(result)
    }

    pub fn score(&self, transaction_id: &str, amount: f64, history: &[f64]) -> AnomalyResult {
        let n = history.len();

        if n < MIN_HISTORY {
            return AnomalyResult {
                transaction_id: transaction_id.to_string(),
                is_anomaly: false,
                anomaly_score: 0.0,
                confidence: INSUFFICIENT_CONFIDENCE,
                reasons: vec![format!(
                    "Insufficient historical data (need >= {} transactions, got {})",
                    MIN_HISTORY, n
                )],
            };
        }

        if history.iter().all(|v| *v == history[0]) {
            return self.score_zero_variance(transaction_id, amount, history[0], n);
        }

        let stats = Scaled::new(amount, history);
        let z = stats.z();
        let is_anomaly = z > self.threshold;

        let mut reasons = Vec::new();
        if is_anomaly {
            reasons.push(format!(
                "Amount ${:.2} is {:.1} std devs from mean ${:.2}",
                amount,
                z,
                stats.mean_amount()
            ));
            if stats.amount > stats.mean {
                reasons.push(format!(
                    "Unusually HIGH amount (threshold: {} std devs)",
                    self.threshold
                ));
            } else {
                reasons.push(format!(
                    "Unusually LOW amount (threshold: {} std devs)",
                    self.threshold
                ));
            }
        }

        AnomalyResult {
            transaction_id: transaction_id.to_string(),
            is_anomaly,
            anomaly_score: z,
            confidence: confidence_for(z, n),
            reasons,
        }
    }

    fn score_zero_variance(
        &self,
        transaction_id: &str,
        amount: f64,
        constant: f64,
        n: usize,
    ) -> AnomalyResult {
        let is_anomaly = amount != constant;

        let reasons = if is_anomaly {
            let direction = if amount > constant { "HIGH" } else { "LOW" };
            vec![
                format!(
                    "Amount ${:.2} differs from constant historical amount ${:.2}",
                    amount, constant
                ),
                format!(
                    "Unusually {} amount (all {} historical amounts are identical)",
                    direction, n
                ),
            ]
        } else {
            vec!["All historical amounts are identical".to_string()]
        };

        AnomalyResult {
            transaction_id: transaction_id.to_string(),
            is_anomaly,
            anomaly_score: if is_anomaly { ZERO_VARIANCE_SCORE } else { 0.0 },
            confidence: ZERO_VARIANCE_CONFIDENCE,
            reasons,
        }
    }
}

/// Grows with z; large cohorts get a bonus, small ones a lower cap
fn confidence_for(z: f64, n: usize) -> f64 {
    if !z.is_finite() {
        return 0.0;
    }
    let base = 0.5 + z / 10.0;
    let confidence = if n >= LARGE_SAMPLE {
        (base + LARGE_SAMPLE_BONUS).min(MAX_CONFIDENCE)
    } else {
        base.min(SMALL_SAMPLE_CAP)
    };
    clamp_confidence(confidence)
}
