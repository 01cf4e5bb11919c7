use crate::errors::{AppError, ResultExt};
use crate::models::{Lead, LeadStatus, ScoredCandidate};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// Filter for lead listings.
#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub min_score: Option<i32>,
}

/// Durable lead storage.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Exact match on the `(business_name, address)` natural key.
    async fn find_by_key(&self, business_name: &str, address: &str)
        -> Result<Option<Lead>, AppError>;

    async fn insert(&self, lead: &Lead) -> Result<Lead, AppError>;

    async fn update(&self, lead: &Lead) -> Result<Lead, AppError>;

    /// Highest score first, then newest first.
    async fn list(&self, filter: &LeadFilter, limit: i64) -> Result<Vec<Lead>, AppError>;

    /// Returns `None` when no lead has this id.
    async fn update_notes(&self, id: Uuid, notes: Option<String>)
        -> Result<Option<Lead>, AppError>;
}

const LEAD_COLUMNS: &str = "id, business_name, category, address, city, state, zip_code, \
     phone, website, rating, review_count, latitude, longitude, ai_score, ai_reasoning, \
     status, notes, pushed_to_crm, owner_id, created_at, updated_at";

pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn find_by_key(
        &self,
        business_name: &str,
        address: &str,
    ) -> Result<Option<Lead>, AppError> {
        sqlx::query_as::<_, Lead>(&format!(
            "SELECT {} FROM leads WHERE business_name = $1 AND address = $2 \
             ORDER BY created_at ASC LIMIT 1",
            LEAD_COLUMNS
        ))
        .bind(business_name)
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up lead by name and address")
    }

    async fn insert(&self, lead: &Lead) -> Result<Lead, AppError> {
        sqlx::query_as::<_, Lead>(&format!(
            r#"
            INSERT INTO leads (
                id, business_name, category, address, city, state, zip_code,
                phone, website, rating, review_count, latitude, longitude,
                ai_score, ai_reasoning, status, notes, pushed_to_crm, owner_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21)
            RETURNING {}
            "#,
            LEAD_COLUMNS
        ))
        .bind(lead.id)
        .bind(&lead.business_name)
        .bind(&lead.category)
        .bind(&lead.address)
        .bind(&lead.city)
        .bind(&lead.state)
        .bind(&lead.zip_code)
        .bind(&lead.phone)
        .bind(&lead.website)
        .bind(lead.rating)
        .bind(lead.review_count)
        .bind(lead.latitude)
        .bind(lead.longitude)
        .bind(lead.ai_score)
        .bind(&lead.ai_reasoning)
        .bind(&lead.status)
        .bind(&lead.notes)
        .bind(lead.pushed_to_crm)
        .bind(lead.owner_id)
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to insert lead '{}'", lead.business_name))
    }

    async fn update(&self, lead: &Lead) -> Result<Lead, AppError> {
        // notes, pushed_to_crm, owner_id and created_at belong to other writers
        sqlx::query_as::<_, Lead>(&format!(
            r#"
            UPDATE leads SET
                business_name = $2, category = $3, address = $4, city = $5,
                state = $6, zip_code = $7, phone = $8, website = $9,
                rating = $10, review_count = $11, latitude = $12, longitude = $13,
                ai_score = $14, ai_reasoning = $15, status = $16, updated_at = $17
            WHERE id = $1
            RETURNING {}
            "#,
            LEAD_COLUMNS
        ))
        .bind(lead.id)
        .bind(&lead.business_name)
        .bind(&lead.category)
        .bind(&lead.address)
        .bind(&lead.city)
        .bind(&lead.state)
        .bind(&lead.zip_code)
        .bind(&lead.phone)
        .bind(&lead.website)
        .bind(lead.rating)
        .bind(lead.review_count)
        .bind(lead.latitude)
        .bind(lead.longitude)
        .bind(lead.ai_score)
        .bind(&lead.ai_reasoning)
        .bind(&lead.status)
        .bind(lead.updated_at)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to update lead {}", lead.id))
    }

    async fn list(&self, filter: &LeadFilter, limit: i64) -> Result<Vec<Lead>, AppError> {
        sqlx::query_as::<_, Lead>(&format!(
            r#"
            SELECT {} FROM leads
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::int IS NULL OR ai_score >= $2)
            ORDER BY ai_score DESC, created_at DESC
            LIMIT $3
            "#,
            LEAD_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.min_score)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list leads")
    }

    async fn update_notes(
        &self,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<Option<Lead>, AppError> {
        sqlx::query_as::<_, Lead>(&format!(
            "UPDATE leads SET notes = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            LEAD_COLUMNS
        ))
        .bind(id)
        .bind(notes)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to update notes for lead {}", id))
    }
}

/// In-process store for tests and database-less demo runs.
#[derive(Default)]
pub struct MemoryLeadStore {
    leads: Mutex<HashMap<Uuid, Lead>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Lead>> {
        self.leads.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn find_by_key(
        &self,
        business_name: &str,
        address: &str,
    ) -> Result<Option<Lead>, AppError> {
        Ok(self
            .lock()
            .values()
            .filter(|l| l.business_name == business_name && l.address == address)
            .min_by_key(|l| l.created_at)
            .cloned())
    }

    async fn insert(&self, lead: &Lead) -> Result<Lead, AppError> {
        self.lock().insert(lead.id, lead.clone());
        Ok(lead.clone())
    }

    async fn update(&self, lead: &Lead) -> Result<Lead, AppError> {
        let mut leads = self.lock();
        let stored = leads
            .get_mut(&lead.id)
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead.id)))?;

        let notes = stored.notes.take();
        let pushed_to_crm = stored.pushed_to_crm;
        let owner_id = stored.owner_id;
        let created_at = stored.created_at;

        *stored = Lead {
            notes,
            pushed_to_crm,
            owner_id,
            created_at,
            ..lead.clone()
        };
        Ok(stored.clone())
    }

    async fn list(&self, filter: &LeadFilter, limit: i64) -> Result<Vec<Lead>, AppError> {
        let mut leads: Vec<Lead> = self
            .lock()
            .values()
            .filter(|l| filter.status.map_or(true, |s| l.status == s.as_str()))
            .filter(|l| filter.min_score.map_or(true, |min| l.ai_score >= min))
            .cloned()
            .collect();
        leads.sort_by(|a, b| {
            b.ai_score
                .cmp(&a.ai_score)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        leads.truncate(limit.max(0) as usize);
        Ok(leads)
    }

    async fn update_notes(
        &self,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<Option<Lead>, AppError> {
        let mut leads = self.lock();
        let updated = leads.get_mut(&id).map(|lead| {
            lead.notes = notes;
            lead.updated_at = Utc::now();
            lead.clone()
        });
        Ok(updated)
    }
}

/// Per-key async locks. An entry lives only while some task holds or waits
/// on it, so a lock in use is never replaced by a fresh one.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn acquire(&self, key: String) -> KeyGuard<'_> {
        let lock = self.map().entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map holds the last reference if nobody waits
        self.guard.take();
        let mut map = self.locks.map();
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.key);
        }
    }
}

/// Deduplication & persistence gate.
///
/// Looks a candidate up by `(business_name, address)` right before writing and
/// either refreshes the existing row or inserts a new one. Candidates sharing a
/// key are serialised through a per-key async lock; different keys proceed
/// concurrently.
pub struct LeadGate {
    store: Arc<dyn LeadStore>,
    key_locks: KeyLocks,
}

impl LeadGate {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self {
            store,
            key_locks: KeyLocks::default(),
        }
    }

    pub async fn upsert(
        &self,
        scored: &ScoredCandidate,
        owner_id: Option<Uuid>,
    ) -> Result<Lead, AppError> {
        let candidate = &scored.candidate;
        let _guard = self
            .key_locks
            .acquire(dedup_key(&candidate.business_name, &candidate.address))
            .await;

        match self
            .store
            .find_by_key(&candidate.business_name, &candidate.address)
            .await?
        {
            Some(mut existing) => {
                existing.apply_scan(scored);
                let updated = self.store.update(&existing).await?;
                tracing::debug!(
                    "Refreshed existing lead {} ('{}')",
                    updated.id,
                    updated.business_name
                );
                Ok(updated)
            }
            None => {
                let lead = Lead::from_scored(scored, owner_id);
                let inserted = self.store.insert(&lead).await?;
                tracing::debug!(
                    "Inserted new lead {} ('{}')",
                    inserted.id,
                    inserted.business_name
                );
                Ok(inserted)
            }
        }
    }
}

fn dedup_key(business_name: &str, address: &str) -> String {
    format!("{}\u{1f}{}", business_name, address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawCandidate;

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

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_natural_key() {
        let store = Arc::new(MemoryLeadStore::new());
        let gate = LeadGate::new(store.clone());

        let first = gate.upsert(&scored("Acme", "1 Main St", 80), None).await.unwrap();
        let second = gate.upsert(&scored("Acme", "1 Main St", 92), None).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.ai_score, 92);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_preserves_notes_and_resets_status() {
        let store = Arc::new(MemoryLeadStore::new());
        let gate = LeadGate::new(store.clone());

        let lead = gate.upsert(&scored("Acme", "1 Main St", 80), None).await.unwrap();
        store
            .update_notes(lead.id, Some("left voicemail".to_string()))
            .await
            .unwrap();

        let refreshed = gate.upsert(&scored("Acme", "1 Main St", 85), None).await.unwrap();
        assert_eq!(refreshed.notes.as_deref(), Some("left voicemail"));
        assert_eq!(refreshed.status, "NEW");
    }

    #[tokio::test]
    async fn test_different_address_is_a_new_lead() {
        let store = Arc::new(MemoryLeadStore::new());
        let gate = LeadGate::new(store.clone());

        gate.upsert(&scored("Acme", "1 Main St", 80), None).await.unwrap();
        gate.upsert(&scored("Acme", "2 Oak Ave", 80), None).await.unwrap();

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_candidates_share_one_row() {
        let store = Arc::new(MemoryLeadStore::new());
        let gate = Arc::new(LeadGate::new(store.clone()));

        let tasks = (0..5).map(|i| {
            let gate = gate.clone();
            async move { gate.upsert(&scored("Acme", "1 Main St", 75 + i), None).await }
        });
        let results = futures::future::join_all(tasks).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(store.len(), 1);
        assert_eq!(gate.key_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_held_key_lock_is_never_replaced() {
        let locks = KeyLocks::default();
        let held = locks.acquire("Acme\u{1f}1 Main St".to_string()).await;

        // A second taker for the same key waits on the same lock
        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            locks.acquire("Acme\u{1f}1 Main St".to_string()),
        )
        .await;
        assert!(waiting.is_err());
        assert_eq!(locks.len(), 1);

        // Other keys are independent
        drop(locks.acquire("Other\u{1f}2 Main St".to_string()).await);

        drop(held);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_list_orders_and_filters() {
        let store = MemoryLeadStore::new();
        for (name, score) in [("A", 80), ("B", 95), ("C", 76)] {
            store
                .insert(&Lead::from_scored(&scored(name, "x", score), None))
                .await
                .unwrap();
        }

        let all = store.list(&LeadFilter::default(), 100).await.unwrap();
        let names: Vec<_> = all.iter().map(|l| l.business_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "C"]);

        let filtered = store
            .list(
                &LeadFilter {
                    status: Some(LeadStatus::New),
                    min_score: Some(80),
                },
                100,
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 2);

        assert_eq!(store.list(&LeadFilter::default(), 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_notes_unknown_id() {
        let store = MemoryLeadStore::new();
        let result = store.update_notes(Uuid::new_v4(), None).await.unwrap();
        assert!(result.is_none());
    }
}
