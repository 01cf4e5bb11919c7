use super::{lenient_f64, lenient_i32, normalize_phone, split_address, text};
use super::{ProviderError, ProviderKind};
use crate::models::RawCandidate;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;

/// Search-engine-proxy provider (SerpAPI Google Maps engine).
///
/// Cheapest source with a generous free tier, so it is tried first.
pub struct SerpApiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    retry_base_delay: Duration,
}

impl SerpApiProvider {
    pub fn new(client: Client, api_key: Option<String>, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
            retry_base_delay: Duration::from_millis(1000),
        }
    }

    /// Overrides the retry backoff unit (tests use a few milliseconds).
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn acquire(
        &self,
        query: &str,
        location: &str,
        cap: usize,
    ) -> Result<Vec<RawCandidate>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::new(ProviderKind::SerpApi, "SERPAPI_KEY not set"))?;

        let search = format!("{} in {}", query, location);
        let url = reqwest::Url::parse_with_params(
            &format!("{}/search.json", self.base_url),
            &[
                ("engine", "google_maps"),
                ("q", search.as_str()),
                ("type", "search"),
                ("num", cap.to_string().as_str()),
                ("api_key", api_key),
            ],
        )
        .map_err(|e| {
            ProviderError::new(ProviderKind::SerpApi, format!("Failed to build URL: {}", e))
        })?;

        tracing::info!("[SerpAPI] Searching for: {}", search);
        // Redact key from logs
        tracing::debug!(
            "SerpAPI URL: {}/search.json?engine=google_maps&q={}&api_key=[REDACTED]",
            self.base_url,
            search
        );

        let response = self.fetch_with_retry(url).await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::new(
                ProviderKind::SerpApi,
                format!("SerpAPI returned status {}: {}", status, error_text),
            ));
        }

        let data: Value = response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderKind::SerpApi,
                format!("Failed to parse SerpAPI response: {}", e),
            )
        })?;

        if let Some(error) = text(data.get("error")) {
            return Err(ProviderError::new(
                ProviderKind::SerpApi,
                format!("SerpAPI error: {}", error),
            ));
        }

        let candidates: Vec<RawCandidate> = data
            .get("local_results")
            .and_then(|v| v.as_array())
            .map(|results| {
                results
                    .iter()
                    .take(cap)
                    .map(|place| parse_place(place, query, location))
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!("[SerpAPI] Extracted {} candidate(s)", candidates.len());
        Ok(candidates)
    }

    /// Up to three attempts: 429 backs off `2 * unit * attempt`, transport
    /// errors back off `unit * attempt`; any other status goes to the caller.
    async fn fetch_with_retry(&self, url: reqwest::Url) -> Result<Response, ProviderError> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.get(url.clone()).send().await {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    tracing::warn!(
                        "[SerpAPI] Rate limited (attempt {}/{})",
                        attempt,
                        MAX_ATTEMPTS
                    );
                    if attempt == MAX_ATTEMPTS {
                        return Ok(response);
                    }
                    tokio::time::sleep(self.retry_base_delay * 2 * attempt).await;
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt == MAX_ATTEMPTS {
                        return Err(ProviderError::new(
                            ProviderKind::SerpApi,
                            format!("SerpAPI request failed: {}", e),
                        ));
                    }
                    tracing::warn!(
                        "[SerpAPI] Request failed (attempt {}/{}): {}",
                        attempt,
                        MAX_ATTEMPTS,
                        e
                    );
                    tokio::time::sleep(self.retry_base_delay * attempt).await;
                }
            }
        }

        Err(ProviderError::new(
            ProviderKind::SerpApi,
            "SerpAPI fetch failed after retries",
        ))
    }
}

fn parse_place(place: &Value, query: &str, location: &str) -> RawCandidate {
    let full_address = text(place.get("address")).unwrap_or_default();
    let address = split_address(&full_address, location);
    let coordinates = place.get("gps_coordinates");

    RawCandidate {
        business_name: text(place.get("title")).unwrap_or_else(|| "Unknown Business".to_string()),
        category: text(place.get("type")).unwrap_or_else(|| query.to_string()),
        address: address.street,
        city: address.city,
        state: address.state,
        zip_code: address.zip_code,
        phone: normalize_phone(place.get("phone").and_then(|v| v.as_str())),
        website: text(place.get("website")),
        rating: lenient_f64(place.get("rating")),
        review_count: lenient_i32(place.get("reviews")),
        latitude: coordinates.and_then(|c| c.get("latitude")).and_then(|v| v.as_f64()),
        longitude: coordinates
            .and_then(|c| c.get("longitude"))
            .and_then(|v| v.as_f64()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_place_maps_fields() {
        let place = json!({
            "title": "Joe's Plumbing",
            "type": "Plumber",
            "address": "12 Ocean Dr, Miami Beach, FL 33139",
            "phone": "+1 650-253-0000",
            "website": "https://joes.test",
            "rating": 4.7,
            "reviews": 231,
            "gps_coordinates": {"latitude": 25.78, "longitude": -80.13}
        });

        let candidate = parse_place(&place, "plumber", "Miami, FL");
        assert_eq!(candidate.business_name, "Joe's Plumbing");
        assert_eq!(candidate.category, "Plumber");
        assert_eq!(candidate.address, "12 Ocean Dr");
        assert_eq!(candidate.city, "Miami Beach");
        assert_eq!(candidate.zip_code, "33139");
        assert_eq!(candidate.rating, Some(4.7));
        assert_eq!(candidate.review_count, Some(231));
        assert_eq!(candidate.latitude, Some(25.78));
    }

    #[test]
    fn test_parse_place_defaults() {
        let candidate = parse_place(&json!({}), "plumber", "Miami, FL");
        assert_eq!(candidate.business_name, "Unknown Business");
        assert_eq!(candidate.category, "plumber");
        assert_eq!(candidate.city, "Miami");
        assert_eq!(candidate.state, "FL");
        assert!(candidate.phone.is_none());
    }
}
