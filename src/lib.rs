// Finance ML Service - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod models;     // Data model: transactions in, detections out
pub mod schema;     // Input validation + merchant token shape
pub mod error;      // Error kinds surfaced to callers
pub mod config;     // Settings: defaults → TOML file → environment
pub mod logging;    // tracing subscriber setup
pub mod rules;      // Rule table: description patterns + category rules
pub mod classifier; // External generative-model classifier
pub mod detectors;  // Merchant, category, anomaly, batch

#[cfg(feature = "server")]
pub mod api;        // HTTP surface (axum)

// Re-export commonly used types
pub use models::{
    Transaction, Category, Method,
    MerchantResult, CategoryResult, AnomalyResult,
    CategoryRequest, AnomalyRequest, BatchTransactionRequest,
    BatchDetectionResponse, BatchItemError,
    HealthStatus, HealthResponse,
    load_csv, read_csv,
};
pub use schema::{ValidationError, ValidationResult};
pub use error::{ClassifierFailure, DetectionError};
pub use config::{Settings, LogFormat};
pub use rules::{MerchantPattern, CategoryRule, RuleSet, RuleTable};
pub use classifier::{ExternalClassifier, LlmBackend, Prompt, Provider, build_backend};
pub use detectors::{
    Detectors, MerchantDetector, CategoryDetector, StatisticalAnomalyScorer,
    BatchOrchestrator, BatchOutcome, BatchFailure,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
