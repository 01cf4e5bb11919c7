//! Acquisition providers and the fallback chain that selects between them.
//!
//! Providers form a closed set of tagged implementations behind one
//! capability (`acquire`). The selector walks them in a fixed priority order
//! and stops at the first configured provider that yields at least one
//! candidate.

pub mod browser;
pub mod outscraper;
pub mod places;
pub mod serpapi;
pub mod synthetic;

use crate::config::ProviderSettings;
use crate::errors::AppError;
use crate::models::RawCandidate;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use browser::{BrowserLauncher, BrowserProvider, BrowserTimings, PageDriver};
pub use outscraper::OutscraperProvider;
pub use places::PlacesProvider;
pub use serpapi::SerpApiProvider;
pub use synthetic::SyntheticProvider;

/// Identifier attached to a run's `meta` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    SerpApi,
    Outscraper,
    GooglePlaces,
    HeadlessBrowser,
    Synthetic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::SerpApi => "serpapi",
            ProviderKind::Outscraper => "outscraper",
            ProviderKind::GooglePlaces => "google_places",
            ProviderKind::HeadlessBrowser => "headless_browser",
            ProviderKind::Synthetic => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single provider's failure. Always recovered by falling through to the
/// next provider; never surfaced to the caller.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: ProviderKind,
    pub reason: String,
}

impl ProviderError {
    pub fn new(provider: ProviderKind, reason: impl Into<String>) -> Self {
        Self {
            provider,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} provider failed: {}", self.provider, self.reason)
    }
}

impl std::error::Error for ProviderError {}

pub enum Provider {
    SerpApi(SerpApiProvider),
    Outscraper(OutscraperProvider),
    GooglePlaces(PlacesProvider),
    HeadlessBrowser(BrowserProvider),
    Synthetic(SyntheticProvider),
}

impl Provider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::SerpApi(_) => ProviderKind::SerpApi,
            Provider::Outscraper(_) => ProviderKind::Outscraper,
            Provider::GooglePlaces(_) => ProviderKind::GooglePlaces,
            Provider::HeadlessBrowser(_) => ProviderKind::HeadlessBrowser,
            Provider::Synthetic(_) => ProviderKind::Synthetic,
        }
    }

    /// Whether the credential or flag gating this provider is present.
    pub fn is_configured(&self) -> bool {
        match self {
            Provider::SerpApi(p) => p.is_configured(),
            Provider::Outscraper(p) => p.is_configured(),
            Provider::GooglePlaces(p) => p.is_configured(),
            Provider::HeadlessBrowser(p) => p.is_configured(),
            Provider::Synthetic(p) => p.is_configured(),
        }
    }

    pub async fn acquire(
        &self,
        query: &str,
        location: &str,
        cap: usize,
    ) -> Result<Vec<RawCandidate>, ProviderError> {
        let mut candidates = match self {
            Provider::SerpApi(p) => p.acquire(query, location, cap).await?,
            Provider::Outscraper(p) => p.acquire(query, location, cap).await?,
            Provider::GooglePlaces(p) => p.acquire(query, location, cap).await?,
            Provider::HeadlessBrowser(p) => p.acquire(query, location, cap).await?,
            Provider::Synthetic(p) => p.acquire(query, location, cap).await?,
        };
        candidates.truncate(cap);
        Ok(candidates)
    }
}

/// Result of a successful walk of the provider chain.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub candidates: Vec<RawCandidate>,
    pub provider: ProviderKind,
    /// Configured providers tried, in order, including the winner.
    pub attempted: Vec<ProviderKind>,
}

/// Walks the providers in priority order.
pub struct ProviderSelector {
    providers: Vec<Provider>,
}

impl ProviderSelector {
    /// Providers must be given in priority order.
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    /// Builds the standard five-provider chain from configuration.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create provider HTTP client: {}", e))
            })?;

        let launcher: Option<Arc<dyn BrowserLauncher>> = if settings.headless_browser {
            // No overall timeout: navigation may legitimately run past 30s
            let webdriver_client = reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| {
                    AppError::InternalError(format!("Failed to create WebDriver client: {}", e))
                })?;
            Some(Arc::new(browser::WebDriverLauncher::new(
                webdriver_client,
                settings.webdriver_url.clone(),
            )))
        } else {
            None
        };

        Ok(Self::new(vec![
            Provider::SerpApi(SerpApiProvider::new(
                client.clone(),
                settings.serpapi_key.clone(),
                settings.serpapi_base_url.clone(),
            )),
            Provider::Outscraper(OutscraperProvider::new(
                client.clone(),
                settings.outscraper_api_key.clone(),
                settings.outscraper_base_url.clone(),
            )),
            Provider::GooglePlaces(PlacesProvider::new(
                client,
                settings.google_places_api_key.clone(),
                settings.google_places_base_url.clone(),
            )),
            Provider::HeadlessBrowser(BrowserProvider::new(launcher, BrowserTimings::default())),
            Provider::Synthetic(SyntheticProvider::new(settings.synthetic_enabled)),
        ]))
    }

    /// Tries each configured provider in turn. A provider that errors or
    /// returns nothing is logged and the next one is tried.
    pub async fn acquire(
        &self,
        query: &str,
        location: &str,
        cap: usize,
    ) -> Result<Acquisition, AppError> {
        let mut attempted = Vec::new();

        for provider in &self.providers {
            let kind = provider.kind();
            if !provider.is_configured() {
                tracing::debug!("Skipping {} provider (not configured)", kind);
                continue;
            }

            attempted.push(kind);
            tracing::info!("Acquiring candidates via {} provider", kind);

            match provider.acquire(query, location, cap).await {
                Ok(candidates) if !candidates.is_empty() => {
                    tracing::info!(
                        "{} provider returned {} candidate(s) for '{}' in '{}'",
                        kind,
                        candidates.len(),
                        query,
                        location
                    );
                    return Ok(Acquisition {
                        candidates,
                        provider: kind,
                        attempted,
                    });
                }
                Ok(_) => {
                    tracing::warn!("{} provider returned no results, trying next", kind);
                }
                Err(e) => {
                    tracing::warn!("{}, trying next", e);
                }
            }
        }

        tracing::error!(
            "No provider produced candidates for '{}' in '{}' (tried: {:?})",
            query,
            location,
            attempted
        );
        Err(AppError::NoLeadsFound)
    }
}

/// Street / city / state / zip split of a free-text address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

/// Splits `"street, city, STATE ZIP"` on commas. Any sub-field that cannot be
/// read falls back to the caller's `"City, ST"` location; never fails.
pub fn split_address(full_address: &str, location: &str) -> AddressParts {
    let segment = |parts: &[&str], index: usize| -> Option<String> {
        parts
            .get(index)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let parts: Vec<&str> = full_address.split(',').collect();
    let location_parts: Vec<&str> = location.split(',').collect();

    let mut state_zip = parts
        .get(2)
        .map(|s| s.split_whitespace().collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter();

    AddressParts {
        street: segment(&parts, 0).unwrap_or_default(),
        city: segment(&parts, 1)
            .or_else(|| segment(&location_parts, 0))
            .unwrap_or_default(),
        state: state_zip
            .next()
            .map(str::to_string)
            .or_else(|| segment(&location_parts, 1))
            .unwrap_or_default(),
        zip_code: state_zip.next().map(str::to_string).unwrap_or_default(),
    }
}

/// Normalizes a US phone number to national format when it parses as valid;
/// anything else is kept verbatim. Blank input becomes `None`.
pub fn normalize_phone(raw: Option<&str>) -> Option<String> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;

    match phonenumber::parse(Some(CountryId::US), raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::National).to_string())
        }
        _ => {
            tracing::debug!("Keeping unparsed phone verbatim: {}", raw);
            Some(raw.to_string())
        }
    }
}

/// Reads a JSON number or numeric string as `f64`.
pub(crate) fn lenient_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Reads a JSON number or numeric string as `i32`.
pub(crate) fn lenient_i32(value: Option<&Value>) -> Option<i32> {
    lenient_f64(value).map(|v| v.max(0.0).min(i32::MAX as f64) as i32)
}

/// Reads a non-empty JSON string.
pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_full_address() {
        let parts = split_address("123 Main St, Miami, FL 33101", "Orlando, FL");
        assert_eq!(parts.street, "123 Main St");
        assert_eq!(parts.city, "Miami");
        assert_eq!(parts.state, "FL");
        assert_eq!(parts.zip_code, "33101");
    }

    #[test]
    fn test_split_address_falls_back_to_location() {
        let parts = split_address("123 Main St", "Miami, FL");
        assert_eq!(parts.street, "123 Main St");
        assert_eq!(parts.city, "Miami");
        assert_eq!(parts.state, "FL");
        assert_eq!(parts.zip_code, "");
    }

    #[test]
    fn test_split_empty_address() {
        let parts = split_address("", "Austin");
        assert_eq!(parts.street, "");
        assert_eq!(parts.city, "Austin");
        assert_eq!(parts.state, "");
    }

    #[test]
    fn test_split_address_blank_segments() {
        let parts = split_address(" , , ", "Tampa, FL");
        assert_eq!(parts.city, "Tampa");
        assert_eq!(parts.state, "FL");
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(
            normalize_phone(Some("+1 650-253-0000")).as_deref(),
            Some("(650) 253-0000")
        );
        assert_eq!(normalize_phone(Some("call us")).as_deref(), Some("call us"));
        assert_eq!(normalize_phone(Some("   ")), None);
        assert_eq!(normalize_phone(None), None);
    }

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(lenient_f64(Some(&json!(4.5))), Some(4.5));
        assert_eq!(lenient_f64(Some(&json!("4.2"))), Some(4.2));
        assert_eq!(lenient_i32(Some(&json!("1,204"))), Some(1204));
        assert_eq!(lenient_i32(Some(&json!(null))), None);
        assert_eq!(lenient_i32(None), None);
    }

    #[test]
    fn test_provider_identifiers() {
        assert_eq!(ProviderKind::Synthetic.as_str(), "mock");
        assert_eq!(ProviderKind::GooglePlaces.to_string(), "google_places");
    }
}
