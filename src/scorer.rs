//! Lead quality scoring.
//!
//! The primary path asks a remote chat-completion model for a 0-100 score;
//! anything that goes wrong there degrades to a deterministic local formula,
//! so `LeadScorer::score` never fails.

use crate::circuit_breaker::{create_scorer_circuit_breaker, ScorerBreaker};
use crate::config::ScorerConfig;
use crate::errors::AppError;
use crate::models::{RawCandidate, ScoredCandidate};
use failsafe::CircuitBreaker;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

pub const FALLBACK_RATIONALE: &str = "Fallback scoring based on available data points";

/// Why the remote path could not produce a score.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreError {
    /// Network failure, rate limiting or a 5xx; worth retrying.
    Transient(String),
    /// The model answered but not with a usable score; not retried.
    Malformed(String),
    /// The remote refused the call outright (bad credentials, 4xx).
    Unavailable(String),
}

impl fmt::Display for ScoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreError::Transient(msg) => write!(f, "transient scorer failure: {}", msg),
            ScoreError::Malformed(msg) => write!(f, "malformed scorer response: {}", msg),
            ScoreError::Unavailable(msg) => write!(f, "scorer unavailable: {}", msg),
        }
    }
}

/// Parsed remote answer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteScore {
    pub score: i32,
    pub reasoning: String,
    pub key_factors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct LeadScorer {
    client: Client,
    config: ScorerConfig,
    breaker: ScorerBreaker,
}

impl LeadScorer {
    pub fn new(config: ScorerConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create scorer client: {}", e))
            })?;

        Ok(Self {
            client,
            config,
            breaker: create_scorer_circuit_breaker(),
        })
    }

    /// Scores one candidate. Remote failures are absorbed into the fallback.
    pub async fn score(&self, candidate: &RawCandidate) -> ScoredCandidate {
        if self.config.api_key.is_none() {
            return fallback_score(candidate);
        }

        if !self.breaker.is_call_permitted() {
            tracing::warn!(
                "Scorer circuit open, using fallback score for '{}'",
                candidate.business_name
            );
            return fallback_score(candidate);
        }

        let outcome =
            match tokio::time::timeout(self.config.total_timeout, self.score_remote(candidate))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ScoreError::Transient(format!(
                    "no answer within {:?}",
                    self.config.total_timeout
                ))),
            };

        // An unusable reply still means the remote is up
        if let Err(ScoreError::Malformed(reason)) = &outcome {
            tracing::warn!(
                "Unusable score for '{}' ({}), using fallback",
                candidate.business_name,
                reason
            );
            let _ = self.breaker.call(|| Ok::<(), ScoreError>(()));
            return fallback_score(candidate);
        }

        match self.breaker.call(|| outcome) {
            Ok(remote) => ScoredCandidate {
                candidate: candidate.clone(),
                score: remote.score,
                rationale: remote.reasoning,
                factors: remote.key_factors,
            },
            Err(failsafe::Error::Inner(e)) => {
                tracing::warn!(
                    "Scoring degraded for '{}' ({}), using fallback",
                    candidate.business_name,
                    e
                );
                fallback_score(candidate)
            }
            Err(failsafe::Error::Rejected) => fallback_score(candidate),
        }
    }

    /// Remote path with bounded retry. Only `Transient` failures are retried,
    /// waiting `retry_base_delay * attempt` between attempts.
    pub async fn score_remote(&self, candidate: &RawCandidate) -> Result<RemoteScore, ScoreError> {
        let prompt = build_prompt(candidate);
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.request_score(&prompt).await {
                Ok(score) => return Ok(score),
                Err(ScoreError::Transient(msg)) if attempt < max_attempts => {
                    tracing::warn!(
                        "Scorer attempt {}/{} failed: {}",
                        attempt,
                        max_attempts,
                        msg
                    );
                    tokio::time::sleep(self.config.retry_base_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_score(&self, prompt: &str) -> Result<RemoteScore, ScoreError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ScoreError::Unavailable("no API key configured".to_string()))?;

        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
            "max_tokens": 200,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScoreError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ScoreError::Transient(format!("scorer returned {}", status)));
        }
        if !status.is_success() {
            return Err(ScoreError::Unavailable(format!("scorer returned {}", status)));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ScoreError::Malformed(format!("invalid completion body: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ScoreError::Malformed("completion has no content".to_string()))?;

        parse_remote_score(&content)
    }
}

/// Compact projection sent to the model; never the whole record.
pub fn build_prompt(candidate: &RawCandidate) -> String {
    let details = json!({
        "name": candidate.business_name,
        "cat": candidate.category,
        "loc": format!("{}, {}", candidate.city, candidate.state),
        "phone": candidate.phone,
        "web": candidate.website,
        "rating": candidate.rating,
        "reviews": candidate.review_count,
    });

    format!(
        "Score this business lead (0-100) based on quality and completeness.\n\
         Details: {}\n\n\
         Criteria:\n\
         - >90: Excellent (High rating, website, phone, established)\n\
         - >75: Good (Contactable, decent rating)\n\
         - <50: Poor (Missing info)\n\
         Weigh presence of phone and website, rating, review count and completeness.\n\n\
         JSON Response: {{ \"score\": number, \"reasoning\": \"string\", \"keyFactors\": string[] }}",
        details
    )
}

/// Parses the model's JSON answer. A missing or non-numeric score is
/// malformed; fractional scores are rounded and every score is clamped.
pub fn parse_remote_score(content: &str) -> Result<RemoteScore, ScoreError> {
    let value: Value = serde_json::from_str(content.trim())
        .map_err(|e| ScoreError::Malformed(format!("not JSON: {}", e)))?;

    let raw_score = match value.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| ScoreError::Malformed("missing score".to_string()))?;

    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Unable to score lead")
        .to_string();

    let key_factors = value
        .get("keyFactors")
        .and_then(|v| v.as_array())
        .map(|factors| {
            factors
                .iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(RemoteScore {
        score: clamp_score(raw_score),
        reasoning,
        key_factors,
    })
}

pub fn clamp_score(raw: f64) -> i32 {
    raw.round().clamp(0.0, 100.0) as i32
}

/// Deterministic local score used whenever the remote path is unavailable.
///
/// Base 50; +15 website; +10 phone; rating >=4.5 +15, >=4.0 +10, >=3.5 +5,
/// otherwise -10 (only when a rating exists); reviews >=100 +10, >=50 +5.
pub fn fallback_score(candidate: &RawCandidate) -> ScoredCandidate {
    let mut score: i32 = 50;

    let has_website = candidate
        .website
        .as_deref()
        .is_some_and(|w| !w.trim().is_empty());
    let has_phone = candidate
        .phone
        .as_deref()
        .is_some_and(|p| !p.trim().is_empty());
    let rating = candidate.rating.filter(|r| *r > 0.0);

    if has_website {
        score += 15;
    }
    if has_phone {
        score += 10;
    }

    if let Some(rating) = rating {
        score += if rating >= 4.5 {
            15
        } else if rating >= 4.0 {
            10
        } else if rating >= 3.5 {
            5
        } else {
            -10
        };
    }

    match candidate.review_count {
        Some(reviews) if reviews >= 100 => score += 10,
        Some(reviews) if reviews >= 50 => score += 5,
        _ => {}
    }

    ScoredCandidate {
        candidate: candidate.clone(),
        score: score.clamp(0, 100),
        rationale: FALLBACK_RATIONALE.to_string(),
        factors: vec![
            if has_website { "Has website" } else { "No website" }.to_string(),
            if has_phone { "Phone available" } else { "No phone" }.to_string(),
            match rating {
                Some(r) => format!("Rating: {}", r),
                None => "No rating".to_string(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> RawCandidate {
        RawCandidate {
            business_name: "Acme Plumbing".to_string(),
            category: "plumber".to_string(),
            address: "1 Main St".to_string(),
            city: "Miami".to_string(),
            state: "FL".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_fallback_base_score() {
        let scored = fallback_score(&candidate());
        assert_eq!(scored.score, 50);
        assert_eq!(scored.rationale, FALLBACK_RATIONALE);
        assert_eq!(scored.factors, vec!["No website", "No phone", "No rating"]);
    }

    #[test]
    fn test_fallback_full_profile_is_capped() {
        let mut c = candidate();
        c.website = Some("https://acme.test".to_string());
        c.phone = Some("(305) 555-0100".to_string());
        c.rating = Some(4.8);
        c.review_count = Some(320);
        // 50 + 15 + 10 + 15 + 10 = 100
        let scored = fallback_score(&c);
        assert_eq!(scored.score, 100);
        assert_eq!(
            scored.factors,
            vec!["Has website", "Phone available", "Rating: 4.8"]
        );
    }

    #[test]
    fn test_fallback_rating_tiers() {
        let mut c = candidate();
        for (rating, expected) in [(4.5, 65), (4.0, 60), (3.5, 55), (3.4, 40)] {
            c.rating = Some(rating);
            assert_eq!(fallback_score(&c).score, expected, "rating {}", rating);
        }
    }

    #[test]
    fn test_fallback_review_tiers() {
        let mut c = candidate();
        c.review_count = Some(100);
        assert_eq!(fallback_score(&c).score, 60);
        c.review_count = Some(50);
        assert_eq!(fallback_score(&c).score, 55);
        c.review_count = Some(49);
        assert_eq!(fallback_score(&c).score, 50);
    }

    #[test]
    fn test_fallback_contactable_without_rating_hits_threshold() {
        let mut c = candidate();
        c.website = Some("https://acme.test".to_string());
        c.phone = Some("(305) 555-0100".to_string());
        assert_eq!(fallback_score(&c).score, 75);
    }

    #[test]
    fn test_whole_number_rating_factor() {
        let mut c = candidate();
        c.rating = Some(4.0);
        assert_eq!(fallback_score(&c).factors[2], "Rating: 4");
    }

    #[test]
    fn test_parse_remote_score() {
        let parsed = parse_remote_score(
            r#"{"score": 88, "reasoning": "Strong presence", "keyFactors": ["Has website", "4.8 rating"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.score, 88);
        assert_eq!(parsed.reasoning, "Strong presence");
        assert_eq!(parsed.key_factors.len(), 2);
    }

    #[test]
    fn test_parse_remote_score_clamps_and_rounds() {
        assert_eq!(parse_remote_score(r#"{"score": 140}"#).unwrap().score, 100);
        assert_eq!(parse_remote_score(r#"{"score": -3}"#).unwrap().score, 0);
        assert_eq!(parse_remote_score(r#"{"score": 74.6}"#).unwrap().score, 75);
        assert_eq!(parse_remote_score(r#"{"score": "81"}"#).unwrap().score, 81);
    }

    #[test]
    fn test_parse_remote_score_rejects_malformed() {
        assert!(matches!(
            parse_remote_score("Sure! Here is the score: 80"),
            Err(ScoreError::Malformed(_))
        ));
        assert!(matches!(
            parse_remote_score(r#"{"reasoning": "no score"}"#),
            Err(ScoreError::Malformed(_))
        ));
    }

    #[test]
    fn test_prompt_is_compact_projection() {
        let prompt = build_prompt(&candidate());
        assert!(prompt.contains("\"name\":\"Acme Plumbing\""));
        assert!(prompt.contains("\"loc\":\"Miami, FL\""));
        assert!(!prompt.contains("1 Main St"));
    }

    #[tokio::test]
    async fn test_score_without_key_uses_fallback() {
        let scorer = LeadScorer::new(ScorerConfig::default()).unwrap();
        let scored = scorer.score(&candidate()).await;
        assert_eq!(scored.score, 50);
        assert_eq!(scored.rationale, FALLBACK_RATIONALE);
    }
}
