// 🏷️ Classification Rules - Rules as Data
// Description patterns → canonical merchant, canonical merchant → category

use crate::models::Category;
use crate::schema::is_canonical_token;
use anyhow::{bail, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Confidence of a description pattern hit unless the pattern overrides it
pub const PATTERN_MATCH_CONFIDENCE: f64 = 0.95;

fn default_pattern_confidence() -> f64 {
    PATTERN_MATCH_CONFIDENCE
}

// ============================================================================
// RULE DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantPattern {
    /// Pattern to match (substring, or anchored wildcard with *)
    pub pattern: String,

    /// Canonical merchant token
    pub merchant: String,

    /// Confidence score (0.0 - 1.0)
    #[serde(default = "default_pattern_confidence")]
    pub confidence: f64,

    /// Priority (higher = checked first, ties keep list order)
    #[serde(default)]
    pub priority: i32,
}

impl MerchantPattern {
    pub fn new(pattern: &str, merchant: &str) -> Self {
        MerchantPattern {
            pattern: pattern.to_string(),
            merchant: merchant.to_string(),
            confidence: PATTERN_MATCH_CONFIDENCE,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Case-insensitive match against a description
    pub fn matches(&self, text: &str) -> bool {
        let pattern = self.pattern.to_uppercase();
        let text = text.to_uppercase();

        if !pattern.contains('*') {
            return text.contains(&pattern);
        }

        // Wildcard matching: first part anchors the start, last part anchors the end
        let parts: Vec<&str> = pattern.split('*').collect();
        let first = parts[0];
        let last = parts[parts.len() - 1];

        if !text.starts_with(first) {
            return false;
        }

        let mut pos = first.len();
        for part in &parts[1..parts.len() - 1] {
            if part.is_empty() {
                continue;
            }
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }

        text.len() >= pos + last.len() && text.ends_with(last)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Rule ID for tracking
    pub id: String,

    /// Canonical merchant this rule applies to
    pub merchant: String,

    pub category: Category,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    /// Description/notes about this rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CategoryRule {
    pub fn new(merchant: &str, category: Category, confidence: f64) -> Self {
        CategoryRule {
            id: format!("{}-rule", merchant),
            merchant: merchant.to_string(),
            category,
            confidence,
            description: None,
        }
    }
}

/// On-disk shape of a rule table (JSON)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub merchant_patterns: Vec<MerchantPattern>,

    #[serde(default)]
    pub category_rules: Vec<CategoryRule>,
}

// ============================================================================
// MATCH RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MerchantMatch {
    pub merchant: String,
    pub confidence: f64,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMatch {
    pub category: Category,
    pub confidence: f64,
    pub rule_id: String,
}

// ============================================================================
// RULE TABLE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    /// Sorted by priority (higher first); ties keep insertion order
    patterns: Vec<MerchantPattern>,

    /// Keyed by lowercase merchant token
    categories: HashMap<String, CategoryRule>,
}

impl RuleTable {
    /// Create a new empty rule table
    pub fn new() -> Self {
        RuleTable::default()
    }

    /// Built-in table of well-known merchants
    pub fn with_defaults() -> Self {
        let mut table = RuleTable::new();

        for (pattern, merchant) in [
            ("STARBUCKS", "starbucks"),
            ("AMAZON", "amazon"),
            ("UBER", "uber"),
            ("NETFLIX", "netflix"),
            ("SPOTIFY", "spotify"),
            ("TARGET", "target"),
            ("WALMART", "walmart"),
        ] {
            table.add_pattern(MerchantPattern::new(pattern, merchant));
        }

        for (merchant, category, confidence) in [
            ("starbucks", Category::Cafe, 0.98),
            ("amazon", Category::Shopping, 0.95),
            ("uber", Category::Transportation, 0.95),
            ("walmart", Category::Groceries, 0.90),
            ("netflix", Category::Entertainment, 0.95),
            ("spotify", Category::Entertainment, 0.95),
            ("target", Category::Shopping, 0.90),
        ] {
            table.add_category_rule(CategoryRule::new(merchant, category, confidence));
        }

        table
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: RuleSet =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        RuleTable::from_rule_set(rules)
    }

    /// Create table from a rule set, rejecting rules that could never be valid output
    pub fn from_rule_set(rules: RuleSet) -> Result<Self> {
        let mut table = RuleTable::new();

        for pattern in rules.merchant_patterns {
            if pattern.pattern.trim().is_empty() {
                bail!("Merchant pattern for '{}' is empty", pattern.merchant);
            }
            if !is_canonical_token(&pattern.merchant) {
                bail!(
                    "Merchant '{}' (pattern '{}') is not a canonical token",
                    pattern.merchant,
                    pattern.pattern
                );
            }
            check_confidence(pattern.confidence, &pattern.pattern)?;
            table.add_pattern(pattern);
        }

        for rule in rules.category_rules {
            check_confidence(rule.confidence, &rule.id)?;
            if table.categories.contains_key(&rule.merchant.trim().to_lowercase()) {
                bail!("Merchant '{}' has more than one category rule", rule.merchant);
            }
            table.add_category_rule(rule);
        }

        Ok(table)
    }

    /// Add a single pattern
    pub fn add_pattern(&mut self, pattern: MerchantPattern) {
        self.patterns.push(pattern);
        // Stable sort keeps list position as the tie-break
        self.patterns.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Add (or replace) the category rule for a merchant
    pub fn add_category_rule(&mut self, rule: CategoryRule) {
        self.categories
            .insert(rule.merchant.trim().to_lowercase(), rule);
    }

    /// First pattern (in priority order) contained in the description
    pub fn match_merchant(&self, description: &str) -> Option<MerchantMatch> {
        let upper = description.to_uppercase();

        self.patterns
            .iter()
            .find(|p| p.matches(&upper))
            .map(|p| MerchantMatch {
                merchant: p.merchant.clone(),
                confidence: p.confidence,
                pattern: p.pattern.clone(),
            })
    }

    /// Exact, case-normalized lookup of a merchant's category rule
    pub fn lookup_category(&self, merchant: &str) -> Option<CategoryMatch> {
        self.categories
            .get(&merchant.trim().to_lowercase())
            .map(|rule| CategoryMatch {
                category: rule.category,
                confidence: rule.confidence,
                rule_id: rule.id.clone(),
            })
    }

    /// Get number of description patterns loaded
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Get number of category rules loaded
    pub fn rule_count(&self) -> usize {
        self.categories.len()
    }

    /// Snapshot of the table, patterns in match order, rules sorted by merchant
    pub fn rule_set(&self) -> RuleSet {
        let mut category_rules: Vec<CategoryRule> = self.categories.values().cloned().collect();
        category_rules.sort_by(|a, b| a.merchant.cmp(&b.merchant));

        RuleSet {
            merchant_patterns: self.patterns.clone(),
            category_rules,
        }
    }
}

fn check_confidence(confidence: f64, rule: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        bail!("Rule '{}' has confidence {} outside [0, 1]", rule, confidence);
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_pattern_match() {
        let pattern = MerchantPattern::new("STARBUCKS", "starbucks");

        assert!(pattern.matches("STARBUCKS #1234 SEATTLE WA"));
        assert!(pattern.matches("pos purchase starbucks"));
        assert!(!pattern.matches("AMAZON"));
    }

    #[test]
    fn test_wildcard_pattern() {
        let pattern = MerchantPattern::new("SQ *BLUE BOTTLE*", "blue_bottle");

        assert!(pattern.matches("SQ *BLUE BOTTLE OAKLAND"));
        assert!(pattern.matches("sq *blue bottle"));
        assert!(!pattern.matches("BLUE BOTTLE SQ *"));

        // End anchor may not overlap the start anchor
        let anchored = MerchantPattern::new("AB*BA", "abba");
        assert!(anchored.matches("ABBA"));
        assert!(!anchored.matches("ABA"));
    }

    #[test]
    fn test_default_merchant_match() {
        let table = RuleTable::with_defaults();
        let result = table.match_merchant("Starbucks #1234").unwrap();

        assert_eq!(result.merchant, "starbucks");
        assert_eq!(result.confidence, PATTERN_MATCH_CONFIDENCE);
        assert_eq!(result.pattern, "STARBUCKS");
    }

    #[test]
    fn test_pattern_priority_then_position() {
        let mut table = RuleTable::new();

        // Same priority: list position decides
        table.add_pattern(MerchantPattern::new("AMAZON", "amazon"));
        table.add_pattern(MerchantPattern::new("PRIME", "amazon_prime"));
        assert_eq!(
            table.match_merchant("AMAZON PRIME VIDEO").unwrap().merchant,
            "amazon"
        );

        // Higher priority wins regardless of position
        table.add_pattern(MerchantPattern::new("PRIME VIDEO", "prime_video").with_priority(10));
        assert_eq!(
            table.match_merchant("AMAZON PRIME VIDEO").unwrap().merchant,
            "prime_video"
        );
    }

    #[test]
    fn test_category_lookup_is_case_normalized() {
        let table = RuleTable::with_defaults();
        let result = table.lookup_category(" Starbucks ").unwrap();

        assert_eq!(result.category, Category::Cafe);
        assert_eq!(result.confidence, 0.98);
        assert_eq!(result.rule_id, "starbucks-rule");
    }

    #[test]
    fn test_no_match() {
        let table = RuleTable::with_defaults();

        assert!(table.match_merchant("SQ *COFFEE SHOP").is_none());
        assert!(table.lookup_category("blue_bottle").is_none());
        assert!(RuleTable::new().match_merchant("STARBUCKS").is_none());
    }

    #[test]
    fn test_rule_set_from_json() {
        let json = r#"{
            "merchant_patterns": [
                {"pattern": "TRADER JOE", "merchant": "trader_joes", "priority": 5}
            ],
            "category_rules": [
                {"id": "tj-groceries", "merchant": "trader_joes", "category": "groceries", "confidence": 0.9}
            ]
        }"#;

        let rules: RuleSet = serde_json::from_str(json).unwrap();
        let table = RuleTable::from_rule_set(rules).unwrap();

        let merchant = table.match_merchant("TRADER JOE'S #552").unwrap();
        assert_eq!(merchant.merchant, "trader_joes");
        assert_eq!(merchant.confidence, PATTERN_MATCH_CONFIDENCE);

        let category = table.lookup_category("trader_joes").unwrap();
        assert_eq!(category.category, Category::Groceries);
        assert_eq!(category.rule_id, "tj-groceries");
    }

    #[test]
    fn test_rule_set_rejects_invalid_rules() {
        let bad_token = RuleSet {
            merchant_patterns: vec![MerchantPattern::new("WHOLE FOODS", "Whole Foods")],
            category_rules: vec![],
        };
        assert!(RuleTable::from_rule_set(bad_token).is_err());

        let bad_confidence = RuleSet {
            merchant_patterns: vec![],
            category_rules: vec![CategoryRule::new("uber", Category::Transportation, 1.5)],
        };
        assert!(RuleTable::from_rule_set(bad_confidence).is_err());

        let bad_category = r#"{"category_rules": [{"id": "x", "merchant": "x", "category": "restaurants", "confidence": 0.9}]}"#;
        assert!(serde_json::from_str::<RuleSet>(bad_category).is_err());
    }

    #[test]
    fn test_rule_set_snapshot() {
        let table = RuleTable::with_defaults();
        let snapshot = table.rule_set();

        assert_eq!(snapshot.merchant_patterns.len(), table.pattern_count());
        assert_eq!(snapshot.category_rules.len(), table.rule_count());
        assert_eq!(snapshot.category_rules[0].merchant, "amazon");
    }
}
