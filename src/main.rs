// Finance ML Service - CLI
//
//   finance-ml classify <transactions.csv>   batch merchant + category, JSON on stdout
//   finance-ml rules                         active rule table as JSON

use anyhow::{bail, Context, Result};
use finance_ml::{load_csv, logging, Detectors, RuleTable, Settings};
use std::env;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let settings = Settings::load().context("Failed to load settings")?;
    logging::init(&settings.log_level, settings.log_format)?;

    match args.get(1).map(String::as_str) {
        Some("classify") => {
            let Some(csv_path) = args.get(2) else {
                print_usage();
                bail!("classify needs a CSV path");
            };
            run_classify(&settings, Path::new(csv_path)).await?;
        }
        Some("rules") => run_rules(&settings)?,
        _ => {
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    eprintln!("🧾 finance-ml {}", finance_ml::VERSION);
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("Usage:");
    eprintln!("  finance-ml classify <transactions.csv>");
    eprintln!("  finance-ml rules");
}

async fn run_classify(settings: &Settings, csv_path: &Path) -> Result<()> {
    eprintln!("🧾 Classify - merchant + category");
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load CSV
    eprintln!("\n📂 Loading CSV...");
    let transactions = load_csv(csv_path)?;
    eprintln!("✓ Loaded {} transactions from {:?}", transactions.len(), csv_path);

    if !settings.llm_available() {
        eprintln!(
            "⚠️  No API key for {}: transactions without a rule match will fail",
            settings.llm_provider
        );
    }

    // 2. Classify
    eprintln!("\n🔍 Classifying...");
    let detectors = Detectors::from_settings(settings)?;
    let response = detectors.classify_batch(&transactions).await?;

    // 3. Report
    println!("{}", serde_json::to_string_pretty(&response)?);

    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("✅ Processed: {}", response.processed_count);
    if response.failed_count > 0 {
        eprintln!("❌ Failed:    {}", response.failed_count);
    }

    Ok(())
}

fn run_rules(settings: &Settings) -> Result<()> {
    let table = match &settings.rules_path {
        Some(path) => RuleTable::from_file(path)?,
        None => RuleTable::with_defaults(),
    };

    eprintln!(
        "🏷️  {} description patterns, {} category rules",
        table.pattern_count(),
        table.rule_count()
    );
    println!("{}", serde_json::to_string_pretty(&table.rule_set())?);

    Ok(())
}
