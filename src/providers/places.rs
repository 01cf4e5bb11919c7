use super::{lenient_f64, lenient_i32, normalize_phone, split_address, text};
use super::{ProviderError, ProviderKind};
use crate::models::RawCandidate;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Official geo-places provider (Google Places text search + details).
///
/// Requires a billing-enabled API key. Each result costs one extra details
/// lookup for phone and website.
pub struct PlacesProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    detail_delay: Duration,
}

impl PlacesProvider {
    pub fn new(client: Client, api_key: Option<String>, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
            detail_delay: Duration::from_millis(100),
        }
    }

    /// Overrides the pause between details lookups.
    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
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
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::new(ProviderKind::GooglePlaces, "GOOGLE_PLACES_API_KEY not set")
        })?;

        let search = format!("{} in {}", query, location);
        tracing::info!("[Places API] Searching for: {}", search);

        let data = self
            .get_json(
                "/maps/api/place/textsearch/json",
                &[("query", search.as_str()), ("key", api_key)],
            )
            .await?;

        match data.get("status").and_then(|v| v.as_str()).unwrap_or("") {
            "OK" => {}
            "ZERO_RESULTS" => {
                tracing::info!("[Places API] Zero results for: {}", search);
                return Ok(Vec::new());
            }
            "REQUEST_DENIED" => {
                let message = text(data.get("error_message")).unwrap_or_default();
                return Err(ProviderError::new(
                    ProviderKind::GooglePlaces,
                    format!("Places API request denied: {}", message),
                ));
            }
            other => {
                return Err(ProviderError::new(
                    ProviderKind::GooglePlaces,
                    format!("Places API status: {}", other),
                ));
            }
        }

        let results: Vec<&Value> = data
            .get("results")
            .and_then(|v| v.as_array())
            .map(|r| r.iter().take(cap).collect())
            .unwrap_or_default();

        tracing::info!("[Places API] Found {} result(s)", results.len());

        let mut candidates = Vec::with_capacity(results.len());
        for (index, result) in results.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.detail_delay).await;
            }

            let name = text(result.get("name")).unwrap_or_default();
            let Some(place_id) = text(result.get("place_id")) else {
                tracing::warn!("[Places API] Result '{}' has no place_id, skipping", name);
                continue;
            };

            match self
                .get_json(
                    "/maps/api/place/details/json",
                    &[
                        ("place_id", place_id.as_str()),
                        ("fields", "formatted_phone_number,website"),
                        ("key", api_key),
                    ],
                )
                .await
            {
                Ok(details) => {
                    let empty = Value::Null;
                    let details = details.get("result").unwrap_or(&empty);
                    candidates.push(build_candidate(result, details, query, location));
                }
                Err(e) => {
                    tracing::warn!("[Places API] Details lookup for '{}' failed: {}", name, e);
                }
            }
        }

        tracing::info!("[Places API] Extracted {} candidate(s)", candidates.len());
        Ok(candidates)
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let url = reqwest::Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| {
                ProviderError::new(
                    ProviderKind::GooglePlaces,
                    format!("Failed to build URL: {}", e),
                )
            })?;

        let response = self.client.get(url).send().await.map_err(|e| {
            ProviderError::new(
                ProviderKind::GooglePlaces,
                format!("Places API request failed: {}", e),
            )
        })?;

        if !response.status().is_success() {
            return Err(ProviderError::new(
                ProviderKind::GooglePlaces,
                format!("Places API returned status {}", response.status()),
            ));
        }

        response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderKind::GooglePlaces,
                format!("Failed to parse Places API response: {}", e),
            )
        })
    }
}

fn build_candidate(result: &Value, details: &Value, query: &str, location: &str) -> RawCandidate {
    let full_address = text(result.get("formatted_address")).unwrap_or_default();
    let address = split_address(&full_address, location);
    let position = result.get("geometry").and_then(|g| g.get("location"));

    RawCandidate {
        business_name: text(result.get("name")).unwrap_or_else(|| "Unknown Business".to_string()),
        category: result
            .get("types")
            .and_then(|t| t.get(0))
            .and_then(|v| v.as_str())
            .map(|t| t.replace('_', " "))
            .unwrap_or_else(|| query.to_string()),
        address: address.street,
        city: address.city,
        state: address.state,
        zip_code: address.zip_code,
        phone: normalize_phone(
            details
                .get("formatted_phone_number")
                .and_then(|v| v.as_str()),
        ),
        website: text(details.get("website")),
        rating: lenient_f64(result.get("rating")),
        review_count: lenient_i32(result.get("user_ratings_total")),
        latitude: position.and_then(|p| p.get("lat")).and_then(|v| v.as_f64()),
        longitude: position.and_then(|p| p.get("lng")).and_then(|v| v.as_f64()),
    }
}
