// src/utils/http.rs

//! HTTP client utilities.
//!
//! One shared client is built from the `[http]` config section; individual
//! fetches override the timeout with the polled target's own interval.

use std::time::Duration;

use reqwest::header::{COOKIE, HeaderMap, HeaderValue, REFERER};
use scraper::Html;

use crate::config::HttpConfig;
use crate::error::{AppError, Result};

/// Create the shared asynchronous HTTP client.
pub fn create_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch a URL as text, failing on non-success status codes.
pub async fn fetch_text(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<String> {
    fetch_text_with(client, url, timeout, None, None).await
}

/// Fetch a URL as text with an optional referer header and cookie pair.
pub async fn fetch_text_with(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    referer: Option<&str>,
    cookie: Option<(&str, &str)>,
) -> Result<String> {
    let mut headers = HeaderMap::new();
    if let Some(referer) = referer {
        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert(REFERER, value);
        }
    }
    if let Some((name, value)) = cookie {
        if let Ok(value) = HeaderValue::from_str(&format!("{name}={value}")) {
            headers.insert(COOKIE, value);
        }
    }

    let response = client
        .get(url)
        .headers(headers)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| AppError::fetch(url, e))?;

    let response = response
        .error_for_status()
        .map_err(|e| AppError::fetch(url, e))?;

    response.text().await.map_err(|e| AppError::fetch(url, e))
}

/// Fetch a page and parse it as HTML.
pub async fn fetch_html(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Html> {
    let text = fetch_text(client, url, timeout).await?;
    Ok(Html::parse_document(&text))
}

/// Fetch a URL and parse it as loose JSON.
pub async fn fetch_json(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let text = fetch_text(client, url, timeout).await?;
    serde_json::from_str(&text).map_err(|e| AppError::parse(url, e))
}
