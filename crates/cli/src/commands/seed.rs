use procura_core::config::AppConfig;
use procura_db::DemoSeedDataset;

use crate::commands::{connect_migrated, execute, CommandFailure, CommandResult, GlobalOptions};

pub fn run(options: &GlobalOptions) -> CommandResult {
    execute("seed", options, seed)
}

async fn seed(config: AppConfig) -> Result<CommandResult, CommandFailure> {
    let pool = connect_migrated(&config).await?;

    let seeded = DemoSeedDataset::load(&pool)
        .await
        .map_err(|error| CommandFailure::new("seed_execution", error.to_string(), 5))?;
    let verification = DemoSeedDataset::verify(&pool)
        .await
        .map_err(|error| CommandFailure::new("seed_verification", error.to_string(), 6))?;
    pool.close().await;

    if !verification.all_present {
        return Err(CommandFailure::new(
            "seed_verification",
            verification_message(&verification.failed_checks()),
            6,
        ));
    }

    let quotes: Vec<String> = seeded
        .quotes_seeded
        .iter()
        .map(|quote| format!("  - {} ({})", quote.quote_id, quote.supplier_name))
        .collect();
    Ok(CommandResult::success(
        "seed",
        format!(
            "demo RFQ {} loaded with {} line items and {} supplier quotes:\n{}",
            seeded.rfq_id,
            seeded.line_items.len(),
            seeded.quotes_seeded.len(),
            quotes.join("\n")
        ),
    ))
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
