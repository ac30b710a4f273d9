// 📦 Data Model - Values in, values out
// Transactions arrive from the caller, detections go back. Nothing is stored.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// TRANSACTION (input value)
// ============================================================================

/// Transaction sent by the caller for classification.
///
/// Detectors only ever borrow it; nothing in the pipeline mutates a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Caller-assigned identifier, unique within one request
    pub id: String,

    /// Raw description as printed on the statement
    pub description: String,

    /// Signed amount, currency-agnostic
    pub amount: f64,

    /// Calendar date (YYYY-MM-DD)
    pub date: NaiveDate,

    /// Bank tag (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<String>,
}

impl Transaction {
    pub fn new(id: &str, description: &str, amount: f64, date: NaiveDate) -> Self {
        Transaction {
            id: id.to_string(),
            description: description.to_string(),
            amount,
            date,
            bank: None,
        }
    }

    pub fn with_bank(mut self, bank: &str) -> Self {
        self.bank = Some(bank.to_string());
        self
    }
}

/// Read transactions from CSV with header `id,description,amount,date,bank`
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Transaction>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut transactions = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let transaction: Transaction =
            result.with_context(|| format!("Failed to deserialize transaction on row {}", line + 1))?;
        transactions.push(transaction);
    }

    Ok(transactions)
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<Transaction>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;
    read_csv(file)
}

// ============================================================================
// METHOD + CATEGORY VOCABULARY
// ============================================================================

/// Which strategy produced a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Deterministic rule table hit
    Rule,
    /// External generative model
    Model,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Rule => "rule",
            Method::Model => "model",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed category vocabulary. Anything outside it is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cafe,
    Groceries,
    Shopping,
    Transportation,
    Utilities,
    Dining,
    Entertainment,
    Healthcare,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Cafe,
        Category::Groceries,
        Category::Shopping,
        Category::Transportation,
        Category::Utilities,
        Category::Dining,
        Category::Entertainment,
        Category::Healthcare,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cafe => "cafe",
            Category::Groceries => "groceries",
            Category::Shopping => "shopping",
            Category::Transportation => "transportation",
            Category::Utilities => "utilities",
            Category::Dining => "dining",
            Category::Entertainment => "entertainment",
            Category::Healthcare => "healthcare",
            Category::Other => "other",
        }
    }

    /// Comma separated vocabulary, in declaration order (used in prompts)
    pub fn vocabulary() -> String {
        Category::ALL
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not one of: {}", self.0, Category::vocabulary())
    }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Clamp a confidence into [0, 1]. NaN collapses to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// DETECTION RESULTS (output values)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantResult {
    pub transaction_id: String,

    /// Canonical merchant token (lowercase, no whitespace)
    pub merchant: String,

    pub confidence: f64,
    pub method: Method,

    /// Model identifier when the model produced the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub transaction_id: String,
    pub category: Category,
    pub confidence: f64,
    pub method: Method,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub transaction_id: String,
    pub is_anomaly: bool,

    /// Raw z-score (non-negative, higher = more anomalous)
    pub anomaly_score: f64,

    pub confidence: f64,

    /// Human-readable reasons, most important first
    pub reasons: Vec<String>,
}

// ============================================================================
// REQUEST / RESPONSE ENVELOPES
// ============================================================================

/// Category request: either `{transaction, merchant}` or a bare transaction
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CategoryRequest {
    WithMerchant {
        transaction: Transaction,
        #[serde(default)]
        merchant: Option<String>,
    },
    Bare(Transaction),
}

impl CategoryRequest {
    pub fn into_parts(self) -> (Transaction, Option<String>) {
        match self {
            CategoryRequest::WithMerchant { transaction, merchant } => (transaction, merchant),
            CategoryRequest::Bare(transaction) => (transaction, None),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyRequest {
    pub transaction: Transaction,
    #[serde(default)]
    pub historical_amounts: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchTransactionRequest {
    pub transactions: Vec<Transaction>,
}

/// One failed item inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemError {
    pub transaction_id: String,
    pub stage: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchDetectionResponse {
    pub merchant_detections: Vec<MerchantResult>,
    pub category_detections: Vec<CategoryResult>,
    pub anomaly_detections: Vec<AnomalyResult>,

    /// Transactions classified successfully
    pub processed_count: usize,

    /// Transactions that failed at some stage
    pub failed_count: usize,

    pub errors: Vec<BatchItemError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub llm_provider: String,
    pub llm_available: bool,
    pub timestamp: String,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_json_shape() {
        let json = r#"{
            "id": "tx-12345",
            "description": "STARBUCKS #1234 SEATTLE WA",
            "amount": 4.99,
            "date": "2024-03-20",
            "bank": "bofa"
        }"#;

        let tx: Transaction = serde_json::from_str(json).unwrap();

        assert_eq!(tx.id, "tx-12345");
        assert_eq!(tx.date, NaiveDate::from_ymd_opt(2024, 3, 20).unwrap());
        assert_eq!(tx.bank.as_deref(), Some("bofa"));
    }

    #[test]
    fn test_transaction_rejects_bad_date() {
        let json = r#"{"id": "1", "description": "X", "amount": 1.0, "date": "03/20/2024"}"#;
        assert!(serde_json::from_str::<Transaction>(json).is_err());
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("cafe".parse::<Category>(), Ok(Category::Cafe));
        assert_eq!(" Groceries ".parse::<Category>(), Ok(Category::Groceries));
        assert!("restaurants".parse::<Category>().is_err());
        assert_eq!(Category::vocabulary().split(", ").count(), Category::ALL.len());
    }

    #[test]
    fn test_method_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Method::Rule).unwrap(), "\"rule\"");
        assert_eq!(serde_json::to_string(&Method::Model).unwrap(), "\"model\"");
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn test_category_request_shapes() {
        let wrapped = r#"{"transaction": {"id": "1", "description": "X", "amount": 1.0, "date": "2024-01-01"}, "merchant": "starbucks"}"#;
        let (tx, merchant) = serde_json::from_str::<CategoryRequest>(wrapped)
            .unwrap()
            .into_parts();
        assert_eq!(tx.id, "1");
        assert_eq!(merchant.as_deref(), Some("starbucks"));

        let bare = r#"{"id": "2", "description": "X", "amount": 1.0, "date": "2024-01-01"}"#;
        let (tx, merchant) = serde_json::from_str::<CategoryRequest>(bare)
            .unwrap()
            .into_parts();
        assert_eq!(tx.id, "2");
        assert!(merchant.is_none());
    }

    #[test]
    fn test_read_csv() {
        let data = "id,description,amount,date,bank\n\
                    tx-1,STARBUCKS #1234,-4.99,2024-03-20,bofa\n\
                    tx-2,LOCAL BAKERY,-12.50,2024-03-21,\n";

        let transactions = read_csv(data.as_bytes()).unwrap();

        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].bank.as_deref(), Some("bofa"));
        assert_eq!(transactions[1].bank, None);
        assert_eq!(transactions[1].amount, -12.50);
    }

    #[test]
    fn test_health_status_is_two_state() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            r#""degraded""#
        );
        assert_eq!(
            serde_json::from_str::<HealthStatus>(r#""healthy""#).unwrap(),
            HealthStatus::Healthy
        );
        assert!(serde_json::from_str::<HealthStatus>(r#""unhealthy""#).is_err());
    }
}
