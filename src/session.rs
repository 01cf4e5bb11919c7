//! Resolves the acting user for a request.
//!
//! The `users` table is the source of truth; a short-lived `moka` cache keyed
//! by the credential's SHA-256 fingerprint sits in front of it. Only
//! successful lookups are cached.

use crate::errors::{AppError, ResultExt};
use crate::models::Session;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const AUTH_COOKIE: &str = "ghl-auth-token";

/// A credential presented by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Bearer header or auth cookie.
    Token(String),
    /// Development fallback: `locationId` / `companyId` query parameter.
    ResourceId(String),
}

impl Credential {
    /// Extracts a credential, preferring the `Authorization` header over the
    /// cookie, and the query parameters only when `allow_query` is set.
    pub fn from_request(
        headers: &HeaderMap,
        query: &HashMap<String, String>,
        allow_query: bool,
    ) -> Option<Self> {
        if let Some(token) = bearer_token(headers) {
            return Some(Credential::Token(token));
        }
        if let Some(token) = cookie_value(headers, AUTH_COOKIE) {
            return Some(Credential::Token(token));
        }
        if allow_query {
            return ["locationId", "companyId"]
                .iter()
                .filter_map(|key| query.get(*key))
                .map(|v| v.trim())
                .find(|v| !v.is_empty())
                .map(|v| Credential::ResourceId(v.to_string()));
        }
        None
    }

    /// Cache key; the raw credential never leaves this module.
    pub fn fingerprint(&self) -> String {
        let (kind, value) = match self {
            Credential::Token(t) => ("token", t),
            Credential::ResourceId(r) => ("resource", r),
        };
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Durable user lookup.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_token(&self, token: &str) -> Result<Option<Uuid>, AppError>;

    async fn find_by_resource_id(&self, resource_id: &str) -> Result<Option<Uuid>, AppError>;
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_token(&self, token: &str) -> Result<Option<Uuid>, AppError> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE access_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to resolve session token")
    }

    async fn find_by_resource_id(&self, resource_id: &str) -> Result<Option<Uuid>, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM users WHERE location_id = $1 OR company_id = $1 \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve session resource id")
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    tokens: Mutex<HashMap<String, Uuid>>,
    resources: Mutex<HashMap<String, Uuid>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&self, token: &str, user_id: Uuid) {
        self.tokens
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(token.to_string(), user_id);
    }

    pub fn add_resource(&self, resource_id: &str, user_id: Uuid) {
        self.resources
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(resource_id.to_string(), user_id);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_token(&self, token: &str) -> Result<Option<Uuid>, AppError> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(token)
            .copied())
    }

    async fn find_by_resource_id(&self, resource_id: &str) -> Result<Option<Uuid>, AppError> {
        Ok(self
            .resources
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(resource_id)
            .copied())
    }
}

pub struct SessionResolver {
    directory: Arc<dyn UserDirectory>,
    cache: Cache<String, Session>,
    allow_query_auth: bool,
}

impl SessionResolver {
    pub fn new(directory: Arc<dyn UserDirectory>, ttl: Duration, allow_query_auth: bool) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(10_000)
            .build();
        Self {
            directory,
            cache,
            allow_query_auth,
        }
    }

    /// Resolves the caller or fails with `AuthRequired`.
    pub async fn require(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<Session, AppError> {
        let credential = Credential::from_request(headers, query, self.allow_query_auth)
            .ok_or(AppError::AuthRequired)?;
        self.resolve(&credential)
            .await?
            .ok_or(AppError::AuthRequired)
    }

    pub async fn resolve(&self, credential: &Credential) -> Result<Option<Session>, AppError> {
        let key = credential.fingerprint();
        if let Some(session) = self.cache.get(&key).await {
            return Ok(Some(session));
        }

        let user_id = match credential {
            Credential::Token(token) => self.directory.find_by_token(token).await?,
            Credential::ResourceId(id) => self.directory.find_by_resource_id(id).await?,
        };

        match user_id {
            Some(user_id) => {
                let session = Session { user_id };
                self.cache.insert(key, session).await;
                tracing::debug!("Resolved session for user {}", user_id);
                Ok(Some(session))
            }
            None => {
                tracing::debug!("No user matches credential {}...", &key[..12]);
                Ok(None)
            }
        }
    }
}
