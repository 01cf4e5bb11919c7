//! Headless-browser provider.
//!
//! The most fragile source: it renders the public maps results page and reads
//! listings out of the DOM, so it has to survive anti-bot interstitials,
//! markup drift and slow navigation. Browser control goes through the
//! `PageDriver` seam; production uses a W3C WebDriver endpoint over HTTP.

use super::{split_address, ProviderError, ProviderKind};
use crate::models::RawCandidate;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const FEED_SELECTOR: &str = r#"div[role="feed"]"#;
const ARTICLE_SELECTOR: &str = r#"div[role="article"]"#;
const MAX_SCROLL_ATTEMPTS: usize = 10;
/// Upper bound for any WebDriver command other than navigation.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Navigation waits this long past the page-load timeout for the driver to answer.
const NAVIGATION_GRACE: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One listing as read from the results page, before parsing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSnapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub address: String,
    /// `aria-label` of the stars element, e.g. `"4.6 stars 120 Reviews"`.
    #[serde(default)]
    pub rating_label: String,
}

/// Minimal control surface over one browser page.
#[async_trait]
pub trait PageDriver: Send {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), String>;
    async fn element_present(&mut self, selector: &str) -> Result<bool, String>;
    async fn count_elements(&mut self, selector: &str) -> Result<usize, String>;
    async fn scroll_height(&mut self, selector: &str) -> Result<u64, String>;
    async fn scroll_to_bottom(&mut self, selector: &str) -> Result<(), String>;
    async fn extract_listings(&mut self, max: usize) -> Result<Vec<ListingSnapshot>, String>;
    async fn close(&mut self) -> Result<(), String>;
}

/// Opens fresh browser pages.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, String>;
}

#[derive(Debug, Clone)]
pub struct BrowserTimings {
    pub navigation_timeout: Duration,
    pub navigation_retry_timeout: Duration,
    pub settle: Duration,
    pub feed_timeout: Duration,
    pub article_timeout: Duration,
    pub poll_interval: Duration,
    pub scroll_pause: Duration,
}

impl Default for BrowserTimings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(90),
            navigation_retry_timeout: Duration::from_secs(60),
            settle: Duration::from_secs(3),
            feed_timeout: Duration::from_secs(30),
            article_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
            scroll_pause: Duration::from_secs(2),
        }
    }
}

pub struct BrowserProvider {
    launcher: Option<Arc<dyn BrowserLauncher>>,
    timings: BrowserTimings,
}

impl BrowserProvider {
    /// `None` leaves the provider unconfigured.
    pub fn new(launcher: Option<Arc<dyn BrowserLauncher>>, timings: BrowserTimings) -> Self {
        Self { launcher, timings }
    }

    pub fn is_configured(&self) -> bool {
        self.launcher.is_some()
    }

    pub async fn acquire(
        &self,
        query: &str,
        location: &str,
        cap: usize,
    ) -> Result<Vec<RawCandidate>, ProviderError> {
        let launcher = self.launcher.as_ref().ok_or_else(|| {
            ProviderError::new(ProviderKind::HeadlessBrowser, "headless browser disabled")
        })?;

        tracing::info!("[Browser] Launching headless session");
        let mut page = launcher
            .launch()
            .await
            .map_err(|e| fail(format!("Failed to launch browser: {}", e)))?;

        let result = self.scrape(page.as_mut(), query, location, cap).await;

        // The session is released whatever happened above
        if let Err(e) = page.close().await {
            tracing::warn!("[Browser] Failed to close session: {}", e);
        }

        result
    }

    async fn scrape(
        &self,
        page: &mut dyn PageDriver,
        query: &str,
        location: &str,
        cap: usize,
    ) -> Result<Vec<RawCandidate>, ProviderError> {
        let search = format!("{} in {}", query, location);
        let url = reqwest::Url::parse("https://www.google.com/maps/search/")
            .and_then(|base| base.join(&urlencode(&search)))
            .map_err(|e| fail(format!("Failed to build URL: {}", e)))?;

        tracing::info!("[Browser] Navigating to: {}", url);
        if let Err(e) = page
            .navigate(url.as_str(), self.timings.navigation_timeout)
            .await
        {
            tracing::warn!("[Browser] Navigation failed ({}), retrying with shorter timeout", e);
            page.navigate(url.as_str(), self.timings.navigation_retry_timeout)
                .await
                .map_err(|e| fail(format!("Navigation failed: {}", e)))?;
        }

        tokio::time::sleep(self.timings.settle).await;

        // Either the results feed or at least one listing counts as ready
        if !self
            .wait_for(page, FEED_SELECTOR, self.timings.feed_timeout)
            .await?
        {
            tracing::info!("[Browser] Results feed not found, trying listing selector");
            if !self
                .wait_for(page, ARTICLE_SELECTOR, self.timings.article_timeout)
                .await?
            {
                return Err(fail("Results never rendered (blocked or markup changed)"));
            }
        }

        self.scroll_results(page, cap).await?;

        let listings = page
            .extract_listings(cap)
            .await
            .map_err(|e| fail(format!("Extraction failed: {}", e)))?;

        let candidates: Vec<RawCandidate> = listings
            .into_iter()
            .filter_map(|listing| listing_to_candidate(listing, query, location))
            .take(cap)
            .collect();

        tracing::info!("[Browser] Extracted {} candidate(s)", candidates.len());
        Ok(candidates)
    }

    async fn wait_for(
        &self,
        page: &mut dyn PageDriver,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, ProviderError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if page
                .element_present(selector)
                .await
                .map_err(|e| fail(format!("Selector check failed: {}", e)))?
            {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.timings.poll_interval).await;
        }
    }

    /// Scrolls the feed until it stops growing, enough listings are loaded,
    /// or the attempt cap is hit. Returns the number of scrolls performed.
    async fn scroll_results(
        &self,
        page: &mut dyn PageDriver,
        target: usize,
    ) -> Result<usize, ProviderError> {
        let mut previous_height = 0;
        let mut scrolls = 0;

        while scrolls < MAX_SCROLL_ATTEMPTS {
            let height = page
                .scroll_height(FEED_SELECTOR)
                .await
                .map_err(|e| fail(format!("Scroll failed: {}", e)))?;
            if height == previous_height {
                break;
            }

            page.scroll_to_bottom(FEED_SELECTOR)
                .await
                .map_err(|e| fail(format!("Scroll failed: {}", e)))?;
            tokio::time::sleep(self.timings.scroll_pause).await;
            previous_height = height;
            scrolls += 1;

            let loaded = page
                .count_elements(ARTICLE_SELECTOR)
                .await
                .map_err(|e| fail(format!("Count failed: {}", e)))?;
            if loaded >= target {
                break;
            }
        }

        tracing::debug!("[Browser] Scrolled {} time(s)", scrolls);
        Ok(scrolls)
    }
}

fn fail(reason: impl Into<String>) -> ProviderError {
    ProviderError::new(ProviderKind::HeadlessBrowser, reason)
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn rating_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+\.?\d*) stars").expect("valid rating regex"))
}

/// Parses a listing; listings without a name are skipped.
pub fn listing_to_candidate(
    listing: ListingSnapshot,
    query: &str,
    location: &str,
) -> Option<RawCandidate> {
    let business_name = listing.name.trim().to_string();
    if business_name.is_empty() {
        return None;
    }

    let address = split_address(&listing.address, location);
    let rating = rating_pattern()
        .captures(&listing.rating_label)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    let category = listing.category.trim();

    Some(RawCandidate {
        business_name,
        category: if category.is_empty() {
            query.to_string()
        } else {
            category.to_string()
        },
        address: address.street,
        city: address.city,
        state: address.state,
        zip_code: address.zip_code,
        phone: None,
        website: None,
        rating,
        review_count: None,
        latitude: None,
        longitude: None,
    })
}

// ============ WebDriver implementation ============

const EXTRACT_SCRIPT: &str = r#"
const max = arguments[0];
const results = [];
const elements = document.querySelectorAll('div[role="article"]');
for (let i = 0; i < Math.min(elements.length, max); i++) {
  const el = elements[i];
  const name = el.querySelector('div.fontHeadlineSmall');
  const category = el.querySelector('span.fontBodyMedium > span');
  const address = el.querySelectorAll('div.fontBodyMedium')[1];
  const rating = el.querySelector('span[role="img"]');
  results.push({
    name: name && name.textContent ? name.textContent.trim() : '',
    category: category && category.textContent ? category.textContent.trim() : '',
    address: address && address.textContent ? address.textContent.trim() : '',
    ratingLabel: rating ? (rating.getAttribute('aria-label') || '') : ''
  });
}
return results;
"#;

/// Launches Chrome sessions on a W3C WebDriver endpoint.
///
/// Every command carries its own timeout, so the client's overall timeout
/// never cuts a navigation short.
pub struct WebDriverLauncher {
    client: Client,
    endpoint: String,
}

impl WebDriverLauncher {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, String> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--no-sandbox",
                            "--disable-setuid-sandbox",
                            "--disable-dev-shm-usage",
                            "--disable-gpu",
                            "--disable-blink-features=AutomationControlled",
                            "--window-size=1920,1080",
                            format!("--user-agent={}", USER_AGENT),
                        ]
                    }
                }
            }
        });

        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .timeout(COMMAND_TIMEOUT)
            .json(&capabilities)
            .send()
            .await
            .map_err(|e| format!("WebDriver unreachable: {}", e))?;

        let body = webdriver_value(response).await?;
        let session_id = body
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "WebDriver response missing sessionId".to_string())?
            .to_string();

        tracing::debug!("[Browser] WebDriver session {} started", session_id);

        Ok(Box::new(WebDriverPage {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.endpoint, session_id),
        }))
    }
}

struct WebDriverPage {
    client: Client,
    session_url: String,
}

impl WebDriverPage {
    async fn execute(&self, script: &str, args: Value) -> Result<Value, String> {
        let response = self
            .client
            .post(format!("{}/execute/sync", self.session_url))
            .timeout(COMMAND_TIMEOUT)
            .json(&json!({ "script": script, "args": args }))
            .send()
            .await
            .map_err(|e| format!("execute failed: {}", e))?;
        webdriver_value(response).await
    }
}

#[async_trait]
impl PageDriver for WebDriverPage {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), String> {
        let response = self
            .client
            .post(format!("{}/timeouts", self.session_url))
            .timeout(COMMAND_TIMEOUT)
            .json(&json!({ "pageLoad": timeout.as_millis() as u64 }))
            .send()
            .await
            .map_err(|e| format!("set timeouts failed: {}", e))?;
        webdriver_value(response).await?;

        let response = self
            .client
            .post(format!("{}/url", self.session_url))
            .timeout(timeout + NAVIGATION_GRACE)
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(|e| format!("navigate failed: {}", e))?;
        webdriver_value(response).await.map(|_| ())
    }

    async fn element_present(&mut self, selector: &str) -> Result<bool, String> {
        let value = self
            .execute(
                "return document.querySelector(arguments[0]) !== null;",
                json!([selector]),
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn count_elements(&mut self, selector: &str) -> Result<usize, String> {
        let value = self
            .execute(
                "return document.querySelectorAll(arguments[0]).length;",
                json!([selector]),
            )
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn scroll_height(&mut self, selector: &str) -> Result<u64, String> {
        let value = self
            .execute(
                "const el = document.querySelector(arguments[0]); return el ? el.scrollHeight : 0;",
                json!([selector]),
            )
            .await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    async fn scroll_to_bottom(&mut self, selector: &str) -> Result<(), String> {
        self.execute(
            "const el = document.querySelector(arguments[0]); if (el) { el.scrollTop = el.scrollHeight; }",
            json!([selector]),
        )
        .await
        .map(|_| ())
    }

    async fn extract_listings(&mut self, max: usize) -> Result<Vec<ListingSnapshot>, String> {
        let value = self.execute(EXTRACT_SCRIPT, json!([max])).await?;
        serde_json::from_value(value).map_err(|e| format!("unexpected listing shape: {}", e))
    }

    async fn close(&mut self) -> Result<(), String> {
        let response = self
            .client
            .delete(&self.session_url)
            .timeout(COMMAND_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("delete session failed: {}", e))?;
        webdriver_value(response).await.map(|_| ())
    }
}

/// Unwraps the `{"value": ...}` envelope, turning WebDriver errors into text.
async fn webdriver_value(response: reqwest::Response) -> Result<Value, String> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| format!("invalid WebDriver response: {}", e))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let error = value
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        let message = value.get("message").and_then(|v| v.as_str()).unwrap_or("");
        return Err(format!("WebDriver {} ({}): {}", status, error, message));
    }

    Ok(value)
}
