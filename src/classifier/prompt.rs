// Prompt rendering. Pure functions of the transaction: the same input always
// renders the same text.

use crate::models::{Category, Transaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// System instruction (backends without a system slot prepend it)
    pub system: String,
    pub user: String,
}

const MERCHANT_SYSTEM: &str = "You are a financial transaction analyzer. Extract the merchant name \
from transaction descriptions and provide a canonical merchant name (lowercase, no spaces). \
Respond with a single JSON object and nothing else.";

const CATEGORY_SYSTEM: &str = "You are a transaction categorization expert. \
Respond with a single JSON object and nothing else.";

pub fn merchant_prompt(tx: &Transaction) -> Prompt {
    let user = format!(
        r##"Extract the merchant from this transaction description and return JSON:

Transaction:
- Description: "{description}"
- Amount: ${amount:.2}
- Date: {date}

Return JSON with this exact structure:
{{
  "merchant": "canonical_merchant_name",
  "confidence": 0.95,
  "reasoning": "Why you chose this merchant"
}}

Rules:
1. merchant should be lowercase, no spaces (use underscore)
2. confidence is 0.0-1.0 (how sure you are)
3. Common merchants: starbucks, amazon, walmart, target, apple, uber, etc.
4. If unknown, use "unknown_merchant" with low confidence
5. Be consistent: "STARBUCKS #1234" → "starbucks"

Examples:
- "STARBUCKS #1234 SEATTLE WA" → {{"merchant": "starbucks", "confidence": 0.98}}
- "AMAZON MKTPLACE" → {{"merchant": "amazon", "confidence": 0.95}}
- "SQ *COFFEE SHOP" → {{"merchant": "unknown_merchant", "confidence": 0.30}}

Now extract the merchant from the transaction above:"##,
        description = tx.description,
        amount = tx.amount,
        date = tx.date.format("%Y-%m-%d"),
    );

    Prompt {
        system: MERCHANT_SYSTEM.to_string(),
        user,
    }
}

pub fn category_prompt(tx: &Transaction, merchant: &str) -> Prompt {
    let user = format!(
        r##"Classify this transaction into a category:

Transaction:
- Merchant: {merchant}
- Description: {description}
- Amount: ${amount:.2}

Return JSON:
{{
  "category": "category_name",
  "confidence": 0.85,
  "reasoning": "Why this category"
}}

Categories: {vocabulary}

Only use categories from the list above."##,
        merchant = merchant,
        description = tx.description,
        amount = tx.amount,
        vocabulary = Category::vocabulary(),
    );

    Prompt {
        system: CATEGORY_SYSTEM.to_string(),
        user,
    }
}
