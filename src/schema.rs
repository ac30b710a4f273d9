// 📐 Shape Layer - Request Validation
// Validates transactions, history samples, and canonical tokens before detection

use crate::models::Transaction;
use std::collections::HashSet;

// ============================================================================
// VALIDATION ERROR
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>, context: &str) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
            context: context.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

fn finish(errors: Vec<ValidationError>) -> ValidationResult {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// Validate the required transaction fields
pub fn validate_transaction(tx: &Transaction) -> ValidationResult {
    let mut errors = Vec::new();

    if tx.id.trim().is_empty() {
        errors.push(ValidationError::new("id", "Required field is empty", "Transaction"));
    }

    if tx.description.trim().is_empty() {
        errors.push(ValidationError::new(
            "description",
            "Required field is empty",
            "Transaction",
        ));
    }

    if !tx.amount.is_finite() {
        errors.push(ValidationError::new(
            "amount",
            format!("Must be a finite number, got {}", tx.amount),
            "Transaction",
        ));
    }

    finish(errors)
}

/// Validate a whole request: every transaction plus id uniqueness
pub fn validate_batch(transactions: &[Transaction]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for tx in transactions {
        if !tx.id.is_empty() && !seen.insert(tx.id.as_str()) {
            errors.push(ValidationError::new(
                "id",
                format!("Duplicate transaction id '{}'", tx.id),
                "Batch",
            ));
        }
    }

    finish(errors)
}

// ============================================================================
// HISTORY
// ============================================================================

/// Historical amounts must all be finite numbers
pub fn validate_history(amounts: &[f64]) -> ValidationResult {
    let errors = amounts
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.is_finite())
        .map(|(i, a)| {
            ValidationError::new(
                "historical_amounts",
                format!("Entry {} must be a finite number, got {}", i, a),
                "Anomaly",
            )
        })
        .collect();

    finish(errors)
}

// ============================================================================
// CANONICAL TOKENS
// ============================================================================

/// True if the token is lowercase and contains no whitespace
pub fn is_canonical_token(token: &str) -> bool {
    !token.is_empty()
        && !token.chars().any(|c| c.is_whitespace() || c.is_uppercase())
}

/// Normalize a free-form merchant label into a canonical token.
///
/// "Whole Foods" → "whole_foods". Returns None when nothing is left.
pub fn normalize_merchant_token(label: &str) -> Option<String> {
    let token = label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase();

    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

// ============================================================================
// TESTS
// ============================================================================
