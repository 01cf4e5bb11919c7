//! Scan orchestration: quota check, acquisition, then batched
//! score / reserve / persist / emit over a streamed response.

use crate::config::PipelineConfig;
use crate::errors::AppError;
use crate::models::{RawCandidate, ScanRequest};
use crate::providers::ProviderSelector;
use crate::quota::QuotaEnforcer;
use crate::scorer::LeadScorer;
use crate::storage::LeadGate;
use crate::stream::{self, LeadWithFactors, ScanStream, StreamEmitter, StreamMessage};
use futures::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

/// Validated scan input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanParams {
    pub query: String,
    pub location: String,
    pub max_results: usize,
}

impl ScanParams {
    pub fn from_request(request: &ScanRequest, config: &PipelineConfig) -> Result<Self, AppError> {
        let query = request
            .search_query
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let location = request
            .location
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let (query, location) = match (query, location) {
            (Some(q), Some(l)) => (q.to_string(), l.to_string()),
            (None, None) => {
                return Err(AppError::MissingInput("searchQuery, location".to_string()))
            }
            (None, _) => return Err(AppError::MissingInput("searchQuery".to_string())),
            (_, None) => return Err(AppError::MissingInput("location".to_string())),
        };

        let cap = config.max_results_cap.max(1);
        let max_results = match request.max_results {
            Some(n) => n.clamp(1, cap as i64) as usize,
            None => config.default_max_results.clamp(1, cap),
        };

        Ok(Self {
            query,
            location,
            max_results,
        })
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Emitted,
    BelowThreshold,
    QuotaDenied,
    PersistenceDropped,
    Disconnected,
}

#[derive(Debug, Default)]
struct Tally {
    emitted: usize,
    below_threshold: usize,
    quota_denied: usize,
    persistence_dropped: usize,
}

impl Tally {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Emitted => self.emitted += 1,
            Outcome::BelowThreshold => self.below_threshold += 1,
            Outcome::QuotaDenied => self.quota_denied += 1,
            Outcome::PersistenceDropped => self.persistence_dropped += 1,
            Outcome::Disconnected => {}
        }
    }
}

pub struct LeadPipeline {
    selector: ProviderSelector,
    scorer: Arc<LeadScorer>,
    gate: Arc<LeadGate>,
    quota: Arc<QuotaEnforcer>,
    config: PipelineConfig,
}

impl LeadPipeline {
    pub fn new(
        selector: ProviderSelector,
        scorer: Arc<LeadScorer>,
        gate: Arc<LeadGate>,
        quota: Arc<QuotaEnforcer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            selector,
            scorer,
            gate,
            quota,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the pre-stream steps synchronously. Quota and acquisition
    /// failures come back as errors before any message is produced; on
    /// success the `meta` message is already queued and the batches run in a
    /// background task feeding the returned stream.
    pub async fn start(
        self: &Arc<Self>,
        user_id: Uuid,
        params: ScanParams,
    ) -> Result<ScanStream, AppError> {
        self.quota.check_can_start(user_id).await?;

        tracing::info!(
            "Starting scan for user {}: '{}' in '{}' (max {})",
            user_id,
            params.query,
            params.location,
            params.max_results
        );

        let acquisition = self
            .selector
            .acquire(&params.query, &params.location, params.max_results)
            .await?;

        let (emitter, scan_stream) = stream::channel();
        emitter
            .emit(StreamMessage::Meta {
                total_scraped: acquisition.candidates.len(),
                scraping_method: acquisition.provider.to_string(),
            })
            .await;

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline
                .process_candidates(user_id, acquisition.candidates, emitter)
                .await;
        });

        Ok(scan_stream)
    }

    async fn process_candidates(
        &self,
        user_id: Uuid,
        candidates: Vec<RawCandidate>,
        emitter: StreamEmitter,
    ) {
        let total = candidates.len();
        let batch_size = self.config.batch_size.max(1);
        let mut tally = Tally::default();

        for (index, batch) in candidates.chunks(batch_size).enumerate() {
            if emitter.is_closed() {
                tracing::info!(
                    "Client disconnected, stopping scan for user {} after {} batch(es)",
                    user_id,
                    index
                );
                break;
            }

            let outcomes = join_all(
                batch
                    .iter()
                    .map(|candidate| self.process_candidate(user_id, candidate, &emitter)),
            )
            .await;

            for outcome in outcomes {
                tally.record(outcome);
            }
        }

        tracing::info!(
            "Scan finished for user {}: {} scraped, {} emitted, {} below threshold, {} over quota, {} dropped on persistence",
            user_id,
            total,
            tally.emitted,
            tally.below_threshold,
            tally.quota_denied,
            tally.persistence_dropped
        );
    }

    async fn process_candidate(
        &self,
        user_id: Uuid,
        candidate: &RawCandidate,
        emitter: &StreamEmitter,
    ) -> Outcome {
        let scored = self.scorer.score(candidate).await;

        if scored.score < self.config.acceptance_threshold {
            tracing::debug!(
                "Dropping '{}' (score {} < {})",
                candidate.business_name,
                scored.score,
                self.config.acceptance_threshold
            );
            return Outcome::BelowThreshold;
        }

        if !self.quota.try_reserve(user_id).await {
            return Outcome::QuotaDenied;
        }

        let lead = match self.gate.upsert(&scored, Some(user_id)).await {
            Ok(lead) => lead,
            Err(e) => {
                tracing::error!(
                    "Failed to persist lead '{}', dropping: {}",
                    candidate.business_name,
                    e
                );
                self.quota.release(user_id).await;
                return Outcome::PersistenceDropped;
            }
        };

        let delivered = emitter
            .emit(StreamMessage::Lead {
                data: LeadWithFactors {
                    lead,
                    scoring_factors: scored.factors,
                },
            })
            .await;

        if delivered {
            Outcome::Emitted
        } else {
            Outcome::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: Option<&str>, location: Option<&str>, max: Option<i64>) -> ScanRequest {
        ScanRequest {
            search_query: query.map(str::to_string),
            location: location.map(str::to_string),
            max_results: max,
        }
    }

    #[test]
    fn test_params_default_and_clamp() {
        let config = PipelineConfig::default();

        let params =
            ScanParams::from_request(&request(Some("plumber"), Some("Miami, FL"), None), &config)
                .unwrap();
        assert_eq!(params.max_results, 15);

        let params = ScanParams::from_request(
            &request(Some("plumber"), Some("Miami, FL"), Some(500)),
            &config,
        )
        .unwrap();
        assert_eq!(params.max_results, 60);

        let params = ScanParams::from_request(
            &request(Some("plumber"), Some("Miami, FL"), Some(-4)),
            &config,
        )
        .unwrap();
        assert_eq!(params.max_results, 1);
    }

    #[test]
    fn test_params_trim_input() {
        let params = ScanParams::from_request(
            &request(Some("  plumber "), Some(" Miami, FL "), Some(5)),
            &PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(params.query, "plumber");
        assert_eq!(params.location, "Miami, FL");
    }

    #[test]
    fn test_params_missing_input() {
        let config = PipelineConfig::default();
        for req in [
            request(None, Some("Miami, FL"), None),
            request(Some("plumber"), Some("   "), None),
            request(None, None, None),
        ] {
            assert!(matches!(
                ScanParams::from_request(&req, &config),
                Err(AppError::MissingInput(_))
            ));
        }
    }

    #[test]
    fn test_tally_ignores_disconnects() {
        let mut tally = Tally::default();
        for outcome in [
            Outcome::Emitted,
            Outcome::Emitted,
            Outcome::BelowThreshold,
            Outcome::QuotaDenied,
            Outcome::Disconnected,
        ] {
            tally.record(outcome);
        }
        assert_eq!(tally.emitted, 2);
        assert_eq!(tally.below_threshold, 1);
        assert_eq!(tally.quota_denied, 1);
        assert_eq!(tally.persistence_dropped, 0);
    }
}
