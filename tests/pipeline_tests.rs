/// End-to-end scan pipeline tests
/// Runs the full quota -> acquire -> score -> reserve -> persist -> stream flow
/// against in-memory stores, the synthetic provider and a mocked scorer
use async_trait::async_trait;
use rust_lead_scout::config::{PipelineConfig, ProviderSettings, ScorerConfig};
use rust_lead_scout::errors::AppError;
use rust_lead_scout::models::Lead;
use rust_lead_scout::pipeline::{LeadPipeline, ScanParams};
use rust_lead_scout::providers::{synthetic, ProviderSelector};
use rust_lead_scout::quota::{MemoryQuotaStore, QuotaEnforcer};
use rust_lead_scout::scorer::{fallback_score, LeadScorer};
use rust_lead_scout::storage::{LeadFilter, LeadGate, LeadStore, MemoryLeadStore};
use rust_lead_scout::stream::StreamMessage;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    pipeline: Arc<LeadPipeline>,
    quota: Arc<MemoryQuotaStore>,
    user: Uuid,
}

fn build(
    lead_store: Arc<dyn LeadStore>,
    scorer: ScorerConfig,
    pipeline_config: PipelineConfig,
    synthetic_enabled: bool,
) -> Harness {
    let settings = ProviderSettings {
        synthetic_enabled,
        ..ProviderSettings::default()
    };
    let quota = Arc::new(MemoryQuotaStore::new());
    let pipeline = LeadPipeline::new(
        ProviderSelector::from_settings(&settings).unwrap(),
        Arc::new(LeadScorer::new(scorer).unwrap()),
        Arc::new(LeadGate::new(lead_store)),
        Arc::new(QuotaEnforcer::new(quota.clone())),
        pipeline_config,
    );

    Harness {
        pipeline: Arc::new(pipeline),
        quota,
        user: Uuid::new_v4(),
    }
}

/// Scorer pointed at a mock that always answers with `score`.
async fn fixed_score_server(score: i32) -> (MockServer, ScorerConfig) {
    let server = MockServer::start().await;
    let content = format!(
        r#"{{"score": {}, "reasoning": "fixed", "keyFactors": ["a", "b"]}}"#,
        score
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": content}}]
        })))
        .mount(&server)
        .await;

    let config = ScorerConfig {
        api_key: Some("test-key".to_string()),
        base_url: server.uri(),
        retry_base_delay: Duration::from_millis(5),
        ..ScorerConfig::default()
    };
    (server, config)
}

fn params(query: &str, location: &str, max_results: usize) -> ScanParams {
    ScanParams {
        query: query.to_string(),
        location: location.to_string(),
        max_results,
    }
}

fn emitted_leads(messages: &[StreamMessage]) -> Vec<(Lead, Vec<String>)> {
    messages
        .iter()
        .filter_map(|m| match m {
            StreamMessage::Lead { data } => Some((data.lead.clone(), data.scoring_factors.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_synthetic_scan_with_fallback_scoring() {
    let store = Arc::new(MemoryLeadStore::new());
    let h = build(
        store.clone(),
        ScorerConfig::default(),
        PipelineConfig::default(),
        true,
    );
    h.quota.grant(h.user, 0, 100);

    let scan = h
        .pipeline
        .start(h.user, params("plumber", "Miami, FL", 15))
        .await
        .unwrap();
    let messages = scan.collect().await;

    match &messages[0] {
        StreamMessage::Meta {
            total_scraped,
            scraping_method,
        } => {
            assert_eq!(*total_scraped, 15);
            assert_eq!(scraping_method, "mock");
        }
        other => panic!("expected meta first, got {:?}", other),
    }
    assert_eq!(messages.iter().filter(|m| m.is_meta()).count(), 1);

    let expected = synthetic::generate("plumber", "Miami, FL", 15)
        .iter()
        .map(fallback_score)
        .filter(|s| s.score >= 75)
        .count();

    let leads = emitted_leads(&messages);
    assert_eq!(leads.len(), expected);
    for (lead, factors) in &leads {
        assert!(lead.ai_score >= 75);
        assert_eq!(lead.status, "NEW");
        assert_eq!(factors.len(), 3);
        assert!(factors[0] == "Has website" || factors[0] == "No website");
        assert!(factors[1] == "Phone available" || factors[1] == "No phone");
        assert!(factors[2].starts_with("Rating: ") || factors[2] == "No rating");
    }
    assert_eq!(h.quota.get(h.user).unwrap().leads_used, expected as i32);
}

#[tokio::test]
async fn test_quota_caps_a_single_batch() {
    let (_server, scorer) = fixed_score_server(90).await;
    let store = Arc::new(MemoryLeadStore::new());
    let h = build(store.clone(), scorer, PipelineConfig::default(), true);
    h.quota.grant(h.user, 14, 15);

    let scan = h
        .pipeline
        .start(h.user, params("plumber", "Miami, FL", 3))
        .await
        .unwrap();
    let messages = scan.collect().await;

    assert_eq!(emitted_leads(&messages).len(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(h.quota.get(h.user).unwrap().leads_used, 15);
}

#[tokio::test]
async fn test_quota_boundary_across_batches() {
    let (_server, scorer) = fixed_score_server(90).await;
    let store = Arc::new(MemoryLeadStore::new());
    let h = build(
        store.clone(),
        scorer,
        PipelineConfig {
            batch_size: 1,
            ..PipelineConfig::default()
        },
        true,
    );
    h.quota.grant(h.user, 14, 15);

    let messages = h
        .pipeline
        .start(h.user, params("roofer", "Tampa, FL", 4))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(emitted_leads(&messages).len(), 1);
    let state = h.quota.get(h.user).unwrap();
    assert_eq!(state.leads_used, state.leads_limit);
}

#[tokio::test]
async fn test_threshold_score_is_accepted() {
    let (_server, scorer) = fixed_score_server(75).await;
    let store = Arc::new(MemoryLeadStore::new());
    let h = build(store.clone(), scorer, PipelineConfig::default(), true);
    h.quota.grant(h.user, 0, 15);

    let messages = h
        .pipeline
        .start(h.user, params("cafe", "Austin, TX", 1))
        .await
        .unwrap()
        .collect()
        .await;

    let leads = emitted_leads(&messages);
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].0.ai_score, 75);
    assert_eq!(leads[0].1, vec!["a", "b"]);
}

#[tokio::test]
async fn test_below_threshold_is_never_persisted() {
    let (_server, scorer) = fixed_score_server(74).await;
    let store = Arc::new(MemoryLeadStore::new());
    let h = build(store.clone(), scorer, PipelineConfig::default(), true);
    h.quota.grant(h.user, 0, 15);

    let messages = h
        .pipeline
        .start(h.user, params("cafe", "Austin, TX", 5))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_meta());
    assert!(store.is_empty());
    assert_eq!(h.quota.get(h.user).unwrap().leads_used, 0);
}

#[tokio::test]
async fn test_rescan_updates_existing_leads() {
    let (_server, scorer) = fixed_score_server(88).await;
    let store = Arc::new(MemoryLeadStore::new());
    let h = build(store.clone(), scorer, PipelineConfig::default(), true);
    h.quota.grant(h.user, 0, 100);

    let first = h
        .pipeline
        .start(h.user, params("dentist", "Denver, CO", 5))
        .await
        .unwrap()
        .collect()
        .await;
    let rows_after_first = store.len();
    let first_ids: Vec<Uuid> = store
        .list(&LeadFilter::default(), 100)
        .await
        .unwrap()
        .iter()
        .map(|l| l.id)
        .collect();

    let second = h
        .pipeline
        .start(h.user, params("dentist", "Denver, CO", 5))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(emitted_leads(&first).len(), emitted_leads(&second).len());
    assert_eq!(store.len(), rows_after_first);
    for (lead, _) in emitted_leads(&second) {
        assert!(first_ids.contains(&lead.id));
    }
}

#[tokio::test]
async fn test_no_pass_aborts_before_acquisition() {
    let store = Arc::new(MemoryLeadStore::new());
    let h = build(
        store,
        ScorerConfig::default(),
        PipelineConfig::default(),
        true,
    );

    let err = h
        .pipeline
        .start(h.user, params("plumber", "Miami, FL", 5))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AppError::NoActivePass));
}

#[tokio::test]
async fn test_exhausted_pass_aborts() {
    let store = Arc::new(MemoryLeadStore::new());
    let h = build(
        store,
        ScorerConfig::default(),
        PipelineConfig::default(),
        true,
    );
    h.quota.grant(h.user, 15, 15);

    let err = h
        .pipeline
        .start(h.user, params("plumber", "Miami, FL", 5))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AppError::QuotaExhausted { .. }));
}

#[tokio::test]
async fn test_no_provider_results_aborts_before_streaming() {
    let store = Arc::new(MemoryLeadStore::new());
    let h = build(
        store,
        ScorerConfig::default(),
        PipelineConfig::default(),
        false,
    );
    h.quota.grant(h.user, 0, 15);

    let err = h
        .pipeline
        .start(h.user, params("plumber", "Miami, FL", 5))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AppError::NoLeadsFound));
    assert_eq!(h.quota.get(h.user).unwrap().leads_used, 0);
}

#[tokio::test]
async fn test_disconnected_client_stops_processing() {
    let store = Arc::new(MemoryLeadStore::new());
    let (_server, scorer) = fixed_score_server(90).await;
    let h = build(
        store.clone(),
        scorer,
        PipelineConfig {
            batch_size: 1,
            ..PipelineConfig::default()
        },
        true,
    );
    h.quota.grant(h.user, 0, 100);

    let scan = h
        .pipeline
        .start(h.user, params("plumber", "Miami, FL", 10))
        .await
        .unwrap();
    drop(scan);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.is_empty());
    assert_eq!(h.quota.get(h.user).unwrap().leads_used, 0);
}

/// Store whose writes always fail.
struct FailingLeadStore;

#[async_trait]
impl LeadStore for FailingLeadStore {
    async fn find_by_key(&self, _: &str, _: &str) -> Result<Option<Lead>, AppError> {
        Ok(None)
    }

    async fn insert(&self, _: &Lead) -> Result<Lead, AppError> {
        Err(AppError::InternalError("disk full".to_string()))
    }

    async fn update(&self, _: &Lead) -> Result<Lead, AppError> {
        Err(AppError::InternalError("disk full".to_string()))
    }

    async fn list(&self, _: &LeadFilter, _: i64) -> Result<Vec<Lead>, AppError> {
        Ok(vec![])
    }

    async fn update_notes(&self, _: Uuid, _: Option<String>) -> Result<Option<Lead>, AppError> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_persistence_failure_drops_candidate_and_refunds_quota() {
    let (_server, scorer) = fixed_score_server(90).await;
    let h = build(
        Arc::new(FailingLeadStore),
        scorer,
        PipelineConfig::default(),
        true,
    );
    h.quota.grant(h.user, 0, 15);

    let messages = h
        .pipeline
        .start(h.user, params("plumber", "Miami, FL", 5))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_meta());
    assert_eq!(h.quota.get(h.user).unwrap().leads_used, 0);
}
