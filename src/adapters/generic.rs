//! Generic page adapter.
//!
//! Fetches a URL, optionally narrows to a CSS selector, and uses the
//! normalized text as the comparison string.

use std::time::Duration;

use scraper::Html;

use super::{Observation, element_text, parse_selector};
use crate::error::Result;
use crate::utils::http;

/// Summary attached when the watched region has content.
const CHANGE_SUMMARY: &str = "変更を検出しました";

pub async fn check(
    client: &reqwest::Client,
    url: &str,
    selector: Option<&str>,
    timeout: Duration,
) -> Result<Observation> {
    let html = http::fetch_html(client, url, timeout).await?;
    let text = extract_text(&html, selector, url)?;
    Ok(observe(text))
}

/// Narrow the document to the selector, or take the whole page text.
///
/// A selector that matches nothing yields an empty string: the region being
/// absent is a legitimate "no condition" observation, not a fetch failure.
fn extract_text(html: &Html, selector: Option<&str>, url: &str) -> Result<String> {
    match selector {
        Some(selector) if !selector.is_empty() => {
            let parsed = parse_selector(selector)?;
            match html.select(&parsed).next() {
                Some(element) => Ok(element_text(&element)),
                None => {
                    log::warn!("No element matches selector {selector} ({url})");
                    Ok(String::new())
                }
            }
        }
        _ => Ok(element_text(&html.root_element())),
    }
}

fn observe(text: String) -> Observation {
    if text.is_empty() {
        Observation::quiet("")
    } else {
        let summary = CHANGE_SUMMARY.to_string();
        Observation::alerting(text, summary)
    }
}
