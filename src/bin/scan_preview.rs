//! Runs one scan against the configured providers and scorer without a
//! database, printing the NDJSON stream to stdout.
//!
//! Usage: `scan_preview <query> <location> [max_results]`

use dotenvy::dotenv;
use rust_lead_scout::config::{PipelineConfig, ProviderSettings, ScorerConfig};
use rust_lead_scout::models::ScanRequest;
use rust_lead_scout::pipeline::{LeadPipeline, ScanParams};
use rust_lead_scout::providers::ProviderSelector;
use rust_lead_scout::quota::{MemoryQuotaStore, QuotaEnforcer};
use rust_lead_scout::scorer::LeadScorer;
use rust_lead_scout::storage::{LeadGate, MemoryLeadStore};
use rust_lead_scout::stream;
use std::env;
use std::io::Write;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_scout=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 2 {
        anyhow::bail!("Usage: scan_preview <query> <location> [max_results]");
    }
    let max_results = match args.get(2) {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| anyhow::anyhow!("max_results must be a number"))?,
        ),
        None => None,
    };

    let settings = ProviderSettings::from_env()?;
    let scorer_config = ScorerConfig::from_env()?;
    let pipeline_config = PipelineConfig::from_env()?;

    let params = ScanParams::from_request(
        &ScanRequest {
            search_query: Some(args[0].clone()),
            location: Some(args[1].clone()),
            max_results,
        },
        &pipeline_config,
    )?;

    // Unlimited local pass so every accepted lead is shown
    let user_id = Uuid::new_v4();
    let quota_store = Arc::new(MemoryQuotaStore::new());
    quota_store.grant(user_id, 0, i32::MAX);

    let pipeline = Arc::new(LeadPipeline::new(
        ProviderSelector::from_settings(&settings)?,
        Arc::new(LeadScorer::new(scorer_config)?),
        Arc::new(LeadGate::new(Arc::new(MemoryLeadStore::new()))),
        Arc::new(QuotaEnforcer::new(quota_store)),
        pipeline_config,
    ));

    let mut scan = pipeline.start(user_id, params).await?;
    let mut stdout = std::io::stdout().lock();
    let mut accepted = 0usize;
    while let Some(message) = scan.next_message().await {
        if !message.is_meta() {
            accepted += 1;
        }
        stdout.write_all(stream::to_ndjson_line(&message)?.as_bytes())?;
        stdout.flush()?;
    }

    eprintln!("{} lead(s) accepted", accepted);
    Ok(())
}
