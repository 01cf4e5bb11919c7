use super::{lenient_f64, lenient_i32, normalize_phone, split_address, text};
use super::{ProviderError, ProviderKind};
use crate::models::RawCandidate;
use reqwest::Client;
use serde_json::Value;

/// Paid scraping-aggregator provider (Outscraper Maps search).
pub struct OutscraperProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OutscraperProvider {
    pub fn new(client: Client, api_key: Option<String>, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url,
        }
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
            ProviderError::new(ProviderKind::Outscraper, "OUTSCRAPER_API_KEY not set")
        })?;

        let search = format!("{} in {}", query, location);
        let url = reqwest::Url::parse_with_params(
            &format!("{}/maps/search-v3", self.base_url),
            &[
                ("query", search.as_str()),
                ("limit", cap.to_string().as_str()),
                ("language", "en"),
                ("region", "us"),
            ],
        )
        .map_err(|e| {
            ProviderError::new(
                ProviderKind::Outscraper,
                format!("Failed to build URL: {}", e),
            )
        })?;

        tracing::info!("[Outscraper] Searching for: {}", search);

        let response = self
            .client
            .get(url)
            .header("X-API-KEY", api_key)
            .send()
            .await
            .map_err(|e| {
                ProviderError::new(
                    ProviderKind::Outscraper,
                    format!("Outscraper request failed: {}", e),
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::new(
                ProviderKind::Outscraper,
                format!("Outscraper returned status {}: {}", status, error_text),
            ));
        }

        let data: Value = response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderKind::Outscraper,
                format!("Failed to parse Outscraper response: {}", e),
            )
        })?;

        // Results come back grouped per query: {"data": [[place, ...]]}
        let groups = data
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ProviderError::new(ProviderKind::Outscraper, "Invalid response from Outscraper")
            })?;

        let candidates: Vec<RawCandidate> = groups
            .first()
            .and_then(|group| group.as_array())
            .map(|places| {
                places
                    .iter()
                    .take(cap)
                    .map(|place| parse_place(place, query, location))
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!("[Outscraper] Extracted {} candidate(s)", candidates.len());
        Ok(candidates)
    }
}

fn parse_place(place: &Value, query: &str, location: &str) -> RawCandidate {
    let full_address = text(place.get("full_address")).unwrap_or_default();
    let address = split_address(&full_address, location);

    RawCandidate {
        business_name: text(place.get("name")).unwrap_or_else(|| "Unknown Business".to_string()),
        category: text(place.get("category")).unwrap_or_else(|| query.to_string()),
        address: address.street,
        city: address.city,
        state: address.state,
        zip_code: address.zip_code,
        phone: normalize_phone(place.get("phone").and_then(|v| v.as_str())),
        website: text(place.get("site")),
        rating: lenient_f64(place.get("rating")),
        review_count: lenient_i32(place.get("reviews")),
        latitude: lenient_f64(place.get("latitude")),
        longitude: lenient_f64(place.get("longitude")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_place_uses_site_for_website() {
        let place = json!({
            "name": "Sunset Electric",
            "category": "Electrician",
            "full_address": "800 Sunset Blvd, Miami, FL 33143",
            "site": "https://sunset.test",
            "rating": "4.1",
            "reviews": 57,
            "latitude": 25.7,
            "longitude": -80.3
        });

        let candidate = parse_place(&place, "electrician", "Miami, FL");
        assert_eq!(candidate.website.as_deref(), Some("https://sunset.test"));
        assert_eq!(candidate.rating, Some(4.1));
        assert_eq!(candidate.review_count, Some(57));
        assert_eq!(candidate.state, "FL");
        assert_eq!(candidate.zip_code, "33143");
    }
}
