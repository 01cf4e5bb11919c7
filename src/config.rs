use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_SERPAPI_BASE_URL: &str = "https://serpapi.com";
pub const DEFAULT_OUTSCRAPER_BASE_URL: &str = "https://api.app.outscraper.com";
pub const DEFAULT_PLACES_BASE_URL: &str = "https://maps.googleapis.com";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";
pub const DEFAULT_SCORER_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_SCORER_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub providers: ProviderSettings,
    pub scorer: ScorerConfig,
    pub pipeline: PipelineConfig,
    pub session_cache_ttl_secs: u64,
    /// Development-only: resolve users from `locationId`/`companyId` query params.
    pub allow_query_auth: bool,
}

/// Credentials and endpoints for the acquisition chain.
///
/// A provider is enabled exactly when its credential (or flag) is present.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    pub serpapi_key: Option<String>,
    pub serpapi_base_url: String,
    pub outscraper_api_key: Option<String>,
    pub outscraper_base_url: String,
    pub google_places_api_key: Option<String>,
    pub google_places_base_url: String,
    pub headless_browser: bool,
    pub webdriver_url: String,
    pub synthetic_enabled: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            serpapi_key: None,
            serpapi_base_url: DEFAULT_SERPAPI_BASE_URL.to_string(),
            outscraper_api_key: None,
            outscraper_base_url: DEFAULT_OUTSCRAPER_BASE_URL.to_string(),
            google_places_api_key: None,
            google_places_base_url: DEFAULT_PLACES_BASE_URL.to_string(),
            headless_browser: false,
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            synthetic_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScorerConfig {
    /// Without a key every candidate is scored by the local fallback.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_attempts: u32,
    /// Delay before retry `n` is `retry_base_delay * n`.
    pub retry_base_delay: Duration,
    pub request_timeout: Duration,
    /// Ceiling on one candidate's remote scoring, retries included.
    pub total_timeout: Duration,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_SCORER_BASE_URL.to_string(),
            model: DEFAULT_SCORER_MODEL.to_string(),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(2),
            total_timeout: Duration::from_secs(6),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub acceptance_threshold: i32,
    pub batch_size: usize,
    pub default_max_results: usize,
    pub max_results_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 75,
            batch_size: 5,
            default_max_results: 15,
            max_results_cap: 60,
        }
    }
}

impl ProviderSettings {
    /// Reads provider credentials and endpoints; no credential is required.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            serpapi_key: optional_secret("SERPAPI_KEY"),
            serpapi_base_url: http_url("SERPAPI_BASE_URL", DEFAULT_SERPAPI_BASE_URL)?,
            outscraper_api_key: optional_secret("OUTSCRAPER_API_KEY"),
            outscraper_base_url: http_url("OUTSCRAPER_BASE_URL", DEFAULT_OUTSCRAPER_BASE_URL)?,
            google_places_api_key: optional_secret("GOOGLE_PLACES_API_KEY"),
            google_places_base_url: http_url("GOOGLE_PLACES_BASE_URL", DEFAULT_PLACES_BASE_URL)?,
            headless_browser: flag("USE_HEADLESS_BROWSER", false),
            webdriver_url: http_url("WEBDRIVER_URL", DEFAULT_WEBDRIVER_URL)?,
            synthetic_enabled: flag("ENABLE_SYNTHETIC_PROVIDER", true),
        })
    }
}

impl ScorerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            api_key: optional_secret("GROQ_API_KEY"),
            base_url: http_url("SCORER_BASE_URL", DEFAULT_SCORER_BASE_URL)?,
            model: std::env::var("SCORER_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SCORER_MODEL.to_string()),
            ..Self::default()
        })
    }
}

impl PipelineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let pipeline_defaults = Self::default();

        Ok(Self {
            acceptance_threshold: number("ACCEPTANCE_THRESHOLD", 75)
                .and_then(|t: i32| {
                    if !(0..=100).contains(&t) {
                        anyhow::bail!("ACCEPTANCE_THRESHOLD must be between 0 and 100");
                    }
                    Ok(t)
                })?,
            batch_size: number("SCAN_BATCH_SIZE", pipeline_defaults.batch_size).and_then(
                |size: usize| {
                    if size == 0 {
                        anyhow::bail!("SCAN_BATCH_SIZE must be at least 1");
                    }
                    Ok(size)
                },
            )?,
            default_max_results: number(
                "DEFAULT_MAX_RESULTS",
                pipeline_defaults.default_max_results,
            )?,
            max_results_cap: number("MAX_RESULTS_CAP", pipeline_defaults.max_results_cap)?,
        })
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            providers: ProviderSettings::from_env()?,
            scorer: ScorerConfig::from_env()?,
            pipeline: PipelineConfig::from_env()?,
            session_cache_ttl_secs: number("SESSION_CACHE_TTL_SECS", 300)?,
            allow_query_auth: flag("ALLOW_QUERY_AUTH", false),
        };

        // Log what is enabled, never the credentials themselves
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::info!(
            "Providers enabled: serpapi={}, outscraper={}, google_places={}, headless={}, synthetic={}",
            config.providers.serpapi_key.is_some(),
            config.providers.outscraper_api_key.is_some(),
            config.providers.google_places_api_key.is_some(),
            config.providers.headless_browser,
            config.providers.synthetic_enabled
        );
        if config.scorer.api_key.is_none() {
            tracing::warn!("GROQ_API_KEY not set - all leads will use fallback scoring");
        }
        if config.allow_query_auth {
            tracing::warn!("ALLOW_QUERY_AUTH enabled - do not use in production");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn optional_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn number<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
        _ => Ok(default),
    }
}

fn http_url(name: &str, default: &str) -> anyhow::Result<String> {
    let url = std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string());
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}
