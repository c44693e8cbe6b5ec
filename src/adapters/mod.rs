//! Source adapters.
//!
//! One adapter per target kind reduces a remote source to an [`Observation`]:
//! the canonical text used for change comparison, a human-readable summary
//! (empty when there is nothing to report), and an alert severity. Adapters
//! are total: network failures, missing fields, and malformed payloads
//! propagate as typed errors so the scheduler can tell "no change" from
//! "could not look".

pub mod generic;
pub mod incident;
pub mod status_feed;
pub mod threshold;

use async_trait::async_trait;
use scraper::{ElementRef, Selector};

use crate::config::HttpConfig;
use crate::error::{AppError, Result};
use crate::models::{Severity, Target, TargetKind};
use crate::utils::http;

/// What one poll of a source observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Canonical text whose equality defines "unchanged"
    pub comparison_text: String,

    /// Human-readable report; empty when there is nothing to announce
    pub summary: String,

    pub severity: Severity,
}

impl Observation {
    /// An observation with nothing to report.
    pub fn quiet(comparison_text: impl Into<String>) -> Self {
        Self {
            comparison_text: comparison_text.into(),
            summary: String::new(),
            severity: Severity::None,
        }
    }

    /// An alerting observation.
    pub fn alerting(comparison_text: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            comparison_text: comparison_text.into(),
            summary: summary.into(),
            severity: Severity::Alert,
        }
    }

    pub fn has_summary(&self) -> bool {
        !self.summary.is_empty()
    }
}

/// Seam between the scheduler and the adapters.
#[async_trait]
pub trait SourceProbe: Send + Sync {
    /// Fetch and reduce one target.
    async fn probe(&self, target: &Target) -> Result<Observation>;
}

/// Production probe: one shared HTTP client, dispatching on the target kind.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_client(config)?,
        })
    }
}

#[async_trait]
impl SourceProbe for HttpProbe {
    async fn probe(&self, target: &Target) -> Result<Observation> {
        // The fetch timeout follows the target's own cadence.
        let timeout = target.interval();

        match &target.kind {
            TargetKind::Generic { url, selector } => {
                generic::check(&self.client, url, selector.as_deref(), timeout).await
            }
            TargetKind::StatusFeed {
                url,
                detail_base_url,
                selector,
                detail_selector,
                alert_statuses,
                ambiguous_markers,
            } => {
                status_feed::check(
                    &self.client,
                    url,
                    detail_base_url,
                    selector,
                    detail_selector,
                    alert_statuses,
                    ambiguous_markers,
                    timeout,
                )
                .await
            }
            TargetKind::ThresholdWarning {
                warning_url,
                area_url,
                warning_codes,
            } => {
                threshold::check(&self.client, warning_url, area_url, warning_codes, timeout)
                    .await
            }
            TargetKind::IncidentCount {
                base_url,
                auth_token,
                cookie_name,
                referer,
                area_code,
                threshold,
            } => {
                incident::check(
                    &self.client,
                    base_url,
                    auth_token.as_deref(),
                    cookie_name,
                    referer,
                    area_code,
                    *threshold,
                    timeout,
                )
                .await
            }
        }
    }
}

/// Parse a CSS selector, surfacing the selector string in the error.
pub(crate) fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Concatenated, per-node-stripped text of an element.
pub(crate) fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
