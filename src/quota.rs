use crate::errors::{AppError, ResultExt};
use crate::models::{DayPassStatus, QuotaState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Durable day-pass counters.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Result<Option<QuotaState>, AppError>;

    /// Marks the pass inactive and resets usage to zero.
    async fn deactivate(&self, user_id: Uuid) -> Result<(), AppError>;

    /// Increments `leads_used` only while it is below `leads_limit`, in a
    /// single step. Returns the new state, or `None` when no slot was left.
    async fn reserve_one(&self, user_id: Uuid) -> Result<Option<QuotaState>, AppError>;

    /// Gives back a slot taken by `reserve_one`.
    async fn release_one(&self, user_id: Uuid) -> Result<(), AppError>;
}

const QUOTA_COLUMNS: &str = "id AS user_id, day_pass_active AS active, \
     day_pass_expires_at AS expires_at, day_pass_leads_used AS leads_used, \
     day_pass_leads_limit AS leads_limit";

pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<QuotaState>, AppError> {
        sqlx::query_as::<_, QuotaState>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            QUOTA_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load day pass for user {}", user_id))
    }

    async fn deactivate(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET day_pass_active = FALSE, day_pass_leads_used = 0 WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to deactivate day pass for user {}", user_id))?;
        Ok(())
    }

    async fn reserve_one(&self, user_id: Uuid) -> Result<Option<QuotaState>, AppError> {
        sqlx::query_as::<_, QuotaState>(&format!(
            r#"
            UPDATE users
            SET day_pass_leads_used = day_pass_leads_used + 1
            WHERE id = $1
              AND day_pass_active
              AND day_pass_leads_used < day_pass_leads_limit
            RETURNING {}
            "#,
            QUOTA_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to reserve lead slot for user {}", user_id))
    }

    async fn release_one(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET day_pass_leads_used = GREATEST(day_pass_leads_used - 1, 0) \
             WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to release lead slot for user {}", user_id))?;
        Ok(())
    }
}

/// In-process counters for tests and demo runs.
#[derive(Default)]
pub struct MemoryQuotaStore {
    users: Mutex<HashMap<Uuid, QuotaState>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, state: QuotaState) {
        self.lock().insert(state.user_id, state);
    }

    /// Seeds an active pass with the given usage, expiring in 24 hours.
    pub fn grant(&self, user_id: Uuid, leads_used: i32, leads_limit: i32) {
        self.put(QuotaState {
            user_id,
            active: true,
            expires_at: Some(Utc::now() + chrono::Duration::hours(24)),
            leads_used,
            leads_limit,
        });
    }

    pub fn get(&self, user_id: Uuid) -> Option<QuotaState> {
        self.lock().get(&user_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, QuotaState>> {
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<QuotaState>, AppError> {
        Ok(self.get(user_id))
    }

    async fn deactivate(&self, user_id: Uuid) -> Result<(), AppError> {
        if let Some(state) = self.lock().get_mut(&user_id) {
            state.active = false;
            state.leads_used = 0;
        }
        Ok(())
    }

    async fn reserve_one(&self, user_id: Uuid) -> Result<Option<QuotaState>, AppError> {
        let mut users = self.lock();
        let reserved = users
            .get_mut(&user_id)
            .filter(|state| state.active && state.has_remaining())
            .map(|state| {
                state.leads_used += 1;
                state.clone()
            });
        Ok(reserved)
    }

    async fn release_one(&self, user_id: Uuid) -> Result<(), AppError> {
        if let Some(state) = self.lock().get_mut(&user_id) {
            state.leads_used = (state.leads_used - 1).max(0);
        }
        Ok(())
    }
}

/// Gatekeeper for the per-user day pass.
pub struct QuotaEnforcer {
    store: Arc<dyn QuotaStore>,
}

impl QuotaEnforcer {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self { store }
    }

    /// Fails the run up front when there is no usable pass or nothing left.
    pub async fn check_can_start(&self, user_id: Uuid) -> Result<QuotaState, AppError> {
        let state = self.current(user_id, Utc::now()).await?.quota;

        if !state.active {
            tracing::info!("User {} has no active day pass", user_id);
            return Err(AppError::NoActivePass);
        }
        if !state.has_remaining() {
            tracing::info!(
                "User {} day pass exhausted ({}/{})",
                user_id,
                state.leads_used,
                state.leads_limit
            );
            return Err(AppError::QuotaExhausted {
                used: state.leads_used,
                limit: state.leads_limit,
            });
        }

        Ok(state)
    }

    /// Claims one lead slot for an accepted candidate. A store failure counts
    /// as "no slot" so the candidate is dropped rather than the run aborted.
    pub async fn try_reserve(&self, user_id: Uuid) -> bool {
        match self.store.reserve_one(user_id).await {
            Ok(Some(state)) => {
                tracing::debug!(
                    "Reserved lead slot for user {} ({}/{})",
                    user_id,
                    state.leads_used,
                    state.leads_limit
                );
                true
            }
            Ok(None) => {
                tracing::debug!("Quota reached for user {}, dropping candidate", user_id);
                false
            }
            Err(e) => {
                tracing::error!("Quota reservation failed for user {}: {}", user_id, e);
                false
            }
        }
    }

    /// Refunds a slot whose lead could not be persisted.
    pub async fn release(&self, user_id: Uuid) {
        if let Err(e) = self.store.release_one(user_id).await {
            tracing::error!("Failed to release lead slot for user {}: {}", user_id, e);
        }
    }

    pub async fn day_pass_status(&self, user_id: Uuid) -> Result<DayPassStatus, AppError> {
        self.current(user_id, Utc::now()).await
    }

    /// Loads the pass, deactivating it first when it has expired.
    async fn current(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<DayPassStatus, AppError> {
        let mut state = self
            .store
            .load(user_id)
            .await?
            .ok_or(AppError::NoActivePass)?;

        let expired = state.active && state.is_expired(now);
        if expired {
            tracing::info!("Day pass for user {} expired, deactivating", user_id);
            self.store.deactivate(user_id).await?;
            state.active = false;
            state.leads_used = 0;
        }

        Ok(DayPassStatus {
            quota: state,
            expired,
        })
    }
}
