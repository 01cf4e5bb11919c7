use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============ Pipeline Models ============

/// Unscored business record as returned by an acquisition provider.
///
/// Has no identity beyond its field values and is never persisted directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCandidate {
    pub business_name: String,
    pub category: String,
    /// Street segment of the address; half of the dedup key.
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    /// 0.0 to 5.0
    pub rating: Option<f64>,
    pub review_count: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A candidate after scoring. Lives only for the duration of one scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub candidate: RawCandidate,
    /// Always within `0..=100`.
    pub score: i32,
    pub rationale: String,
    pub factors: Vec<String>,
}

// ============ Database Models ============

/// Lifecycle status of a persisted lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "NEW",
            LeadStatus::Contacted => "CONTACTED",
            LeadStatus::Qualified => "QUALIFIED",
            LeadStatus::Converted => "CONVERTED",
            LeadStatus::Lost => "LOST",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "NEW" => Some(LeadStatus::New),
            "CONTACTED" => Some(LeadStatus::Contacted),
            "QUALIFIED" => Some(LeadStatus::Qualified),
            "CONVERTED" => Some(LeadStatus::Converted),
            "LOST" => Some(LeadStatus::Lost),
            _ => None,
        }
    }
}

/// The persisted, scored business record.
///
/// `(business_name, address)` is the natural key the persistence gate
/// deduplicates on; it is a lookup convention, not a table constraint.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub business_name: String,
    pub category: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub ai_score: i32,
    pub ai_reasoning: String,
    /// One of the `LeadStatus` names.
    pub status: String,
    /// Owner-editable; never touched by the scan pipeline.
    pub notes: Option<String>,
    /// Set by the CRM push collaborator.
    pub pushed_to_crm: bool,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Builds a fresh `NEW` lead from a scored candidate.
    pub fn from_scored(scored: &ScoredCandidate, owner_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        let mut lead = Self {
            id: Uuid::new_v4(),
            business_name: String::new(),
            category: String::new(),
            address: String::new(),
            city: String::new(),
            state: String::new(),
            zip_code: String::new(),
            phone: None,
            website: None,
            rating: None,
            review_count: None,
            latitude: None,
            longitude: None,
            ai_score: 0,
            ai_reasoning: String::new(),
            status: LeadStatus::New.as_str().to_string(),
            notes: None,
            pushed_to_crm: false,
            owner_id,
            created_at: now,
            updated_at: now,
        };
        lead.apply_scan(scored);
        lead
    }

    /// Overwrites scraped attributes and scoring, resetting status to `NEW`.
    /// Identity, notes, owner and CRM flag are preserved.
    pub fn apply_scan(&mut self, scored: &ScoredCandidate) {
        let c = &scored.candidate;
        self.business_name = c.business_name.clone();
        self.category = c.category.clone();
        self.address = c.address.clone();
        self.city = c.city.clone();
        self.state = c.state.clone();
        self.zip_code = c.zip_code.clone();
        self.phone = c.phone.clone();
        self.website = c.website.clone();
        self.rating = c.rating;
        self.review_count = c.review_count;
        self.latitude = c.latitude;
        self.longitude = c.longitude;
        self.ai_score = scored.score;
        self.ai_reasoning = scored.rationale.clone();
        self.status = LeadStatus::New.as_str().to_string();
        self.updated_at = Utc::now();
    }
}

/// Per-user day pass counters.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    #[serde(skip)]
    pub user_id: Uuid,
    #[serde(rename = "dayPassActive")]
    pub active: bool,
    #[serde(rename = "dayPassExpiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "dayPassLeadsUsed")]
    pub leads_used: i32,
    #[serde(rename = "dayPassLeadsLimit")]
    pub leads_limit: i32,
}

impl QuotaState {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }

    pub fn has_remaining(&self) -> bool {
        self.leads_used < self.leads_limit
    }
}

/// Authenticated principal resolved from the request credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
}

// ============ Request/Response Models ============

/// Body of `POST /api/leads/scrape`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub search_query: Option<String>,
    pub location: Option<String>,
    pub max_results: Option<i64>,
}

/// Query parameters for `GET /api/leads`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadQueryParams {
    pub status: Option<String>,
    pub min_score: Option<i32>,
}

/// Body of `PATCH /api/leads/:id/note`.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteUpdate {
    pub notes: Option<String>,
}

/// Response of `GET /api/user/day-pass`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPassStatus {
    #[serde(flatten)]
    pub quota: QuotaState,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(name: &str, address: &str, score: i32) -> ScoredCandidate {
        ScoredCandidate {
            candidate: RawCandidate {
                business_name: name.to_string(),
                address: address.to_string(),
                city: "Miami".to_string(),
                state: "FL".to_string(),
                ..Default::default()
            },
            score,
            rationale: "test".to_string(),
            factors: vec![],
        }
    }

    #[test]
    fn test_apply_scan_preserves_identity_and_notes() {
        let mut lead = Lead::from_scored(&scored("Acme", "1 Main St", 80), None);
        let id = lead.id;
        lead.notes = Some("call back monday".to_string());
        lead.pushed_to_crm = true;
        lead.status = LeadStatus::Contacted.as_str().to_string();

        lead.apply_scan(&scored("Acme", "1 Main St", 91));

        assert_eq!(lead.id, id);
        assert_eq!(lead.ai_score, 91);
        assert_eq!(lead.notes.as_deref(), Some("call back monday"));
        assert!(lead.pushed_to_crm);
        assert_eq!(lead.status, "NEW");
    }

    #[test]
    fn test_lead_serializes_camel_case() {
        let lead = Lead::from_scored(&scored("Acme", "1 Main St", 80), None);
        let value = serde_json::to_value(&lead).unwrap();
        assert_eq!(value["businessName"], "Acme");
        assert_eq!(value["aiScore"], 80);
        assert_eq!(value["status"], "NEW");
        assert!(value.get("zipCode").is_some());
    }

    #[test]
    fn test_lead_status_parse() {
        assert_eq!(LeadStatus::parse("contacted"), Some(LeadStatus::Contacted));
        assert_eq!(LeadStatus::parse("bogus"), None);
    }

    #[test]
    fn test_quota_expiry() {
        let now = Utc::now();
        let quota = QuotaState {
            user_id: Uuid::new_v4(),
            active: true,
            expires_at: Some(now - chrono::Duration::minutes(1)),
            leads_used: 0,
            leads_limit: 10,
        };
        assert!(quota.is_expired(now));
        assert!(quota.has_remaining());
    }
}
