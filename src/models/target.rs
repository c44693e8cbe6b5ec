//! Target descriptors and the night-stop window.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One monitored external source, loaded from the watch config.
///
/// Descriptors are immutable from the scheduler's point of view: the config
/// provider owns their lifecycle and the loop re-reads them on a fixed
/// cadence so edits take effect without a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique key for this target
    pub name: String,

    /// Disabled targets are skipped but keep their polling cadence
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Polling interval in seconds (clamped to >= 1)
    #[serde(default = "defaults::interval")]
    pub interval_seconds: u64,

    /// Re-alert on every cycle even when the condition is unchanged
    #[serde(default)]
    pub repeat_alert: bool,

    /// Comparison mode recorded in emitted events
    #[serde(default)]
    pub detect_mode: DetectMode,

    /// Regex patterns stripped from the comparison text before diffing
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Adapter variant plus its kind-specific parameters
    #[serde(flatten)]
    pub kind: TargetKind,
}

impl Target {
    /// Effective polling interval, never below one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    /// URL attributed to this target in events and dashboards.
    pub fn display_url(&self) -> &str {
        self.kind.display_url()
    }
}

/// Adapter variant tag plus kind-specific parameters.
///
/// A closed union: a config naming an unknown kind fails deserialization
/// instead of silently polling nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    /// Fetch a URL, optionally narrow to a CSS selector, compare its text.
    Generic {
        url: String,

        /// Optional CSS selector isolating the watched region
        #[serde(default)]
        selector: Option<String>,
    },

    /// Disruption board listing per-line statuses, with detail pages.
    StatusFeed {
        url: String,

        /// Base for resolving relative detail links
        #[serde(default = "defaults::detail_base_url")]
        detail_base_url: String,

        /// Selector for the trouble listing container
        #[serde(default = "defaults::status_selector")]
        selector: String,

        /// Selector for the service-status block on detail pages
        #[serde(default = "defaults::detail_selector")]
        detail_selector: String,

        /// Status phrases that make a row alert-worthy
        #[serde(default = "defaults::alert_statuses")]
        alert_statuses: Vec<String>,

        /// Status phrases that trigger a detail-page check before deciding
        #[serde(default = "defaults::ambiguous_markers")]
        ambiguous_markers: Vec<String>,
    },

    /// Warning feed filtered by code, grouped by resolved region.
    ThresholdWarning {
        warning_url: String,
        area_url: String,

        /// Warning codes that are alert-worthy
        #[serde(default = "defaults::warning_codes")]
        warning_codes: Vec<String>,
    },

    /// Outage board with per-area incident counts and drill-down feeds.
    IncidentCount {
        base_url: String,

        /// Cookie value for authenticated feeds, if required
        #[serde(default)]
        auth_token: Option<String>,

        #[serde(default = "defaults::cookie_name")]
        cookie_name: String,

        #[serde(default = "defaults::referer")]
        referer: String,

        /// Root area feed code
        #[serde(default = "defaults::area_code")]
        area_code: String,

        /// Counts above this fire an alert; below it they are informational
        #[serde(default = "defaults::threshold")]
        threshold: u64,
    },
}

impl TargetKind {
    /// URL attributed to events and dashboards for this kind.
    pub fn display_url(&self) -> &str {
        match self {
            TargetKind::Generic { url, .. } => url,
            TargetKind::StatusFeed { url, .. } => url,
            TargetKind::ThresholdWarning { warning_url, .. } => warning_url,
            TargetKind::IncidentCount { base_url, .. } => base_url,
        }
    }

    /// Kind tag as written in config and logs.
    pub fn label(&self) -> &'static str {
        match self {
            TargetKind::Generic { .. } => "generic",
            TargetKind::StatusFeed { .. } => "status_feed",
            TargetKind::ThresholdWarning { .. } => "threshold_warning",
            TargetKind::IncidentCount { .. } => "incident_count",
        }
    }

    /// Whether this kind's persisted state is cleaned up on shutdown.
    ///
    /// Transient kinds track live conditions; a stale baseline from a prior
    /// run would suppress the first alert after a restart.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TargetKind::Generic { .. })
    }
}

/// Snapshot comparison mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectMode {
    /// Byte-for-byte comparison of the processed text
    #[default]
    TextChange,
    /// Changed only when the processed text grew
    ElementAdded,
    /// Keyword targets compare like text_change
    Keyword,
}

impl DetectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectMode::TextChange => "text_change",
            DetectMode::ElementAdded => "element_added",
            DetectMode::Keyword => "keyword",
        }
    }
}

/// Quiet window during which polling pauses and state is purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NightStop {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub start_hour: u32,

    #[serde(default = "defaults::end_hour")]
    pub end_hour: u32,
}

impl Default for NightStop {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: 0,
            end_hour: defaults::end_hour(),
        }
    }
}

impl NightStop {
    /// Whether the given local hour falls inside the quiet window.
    pub fn is_active(&self, hour: u32) -> bool {
        self.enabled && self.start_hour <= hour && hour < self.end_hour
    }
}

mod defaults {
    pub fn enabled() -> bool {
        true
    }
    pub fn interval() -> u64 {
        30
    }
    pub fn end_hour() -> u32 {
        4
    }

    // StatusFeed defaults
    pub fn detail_base_url() -> String {
        "https://transit.yahoo.co.jp".into()
    }
    pub fn status_selector() -> String {
        "#mdStatusTroubleLine".into()
    }
    pub fn detail_selector() -> String {
        "#mdServiceStatus".into()
    }
    pub fn alert_statuses() -> Vec<String> {
        vec!["運転見合わせ".into(), "運転再開".into()]
    }
    pub fn ambiguous_markers() -> Vec<String> {
        vec!["他".into(), "運転計画".into()]
    }

    // ThresholdWarning defaults
    pub fn warning_codes() -> Vec<String> {
        vec!["03".into()]
    }

    // IncidentCount defaults
    pub fn cookie_name() -> String {
        "teideninfo-auth".into()
    }
    pub fn referer() -> String {
        "https://teideninfo.tepco.co.jp/".into()
    }
    pub fn area_code() -> String {
        "00000000000".into()
    }
    pub fn threshold() -> u64 {
        1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_target_from_toml() {
        let target: Target = toml::from_str(
            r##"
            name = "docs-page"
            kind = "generic"
            url = "https://example.com/docs"
            selector = "#content"
            "##,
        )
        .unwrap();

        assert_eq!(target.name, "docs-page");
        assert!(target.enabled);
        assert_eq!(target.interval_seconds, 30);
        assert!(!target.repeat_alert);
        assert_eq!(target.detect_mode, DetectMode::TextChange);
        assert_eq!(target.display_url(), "https://example.com/docs");
    }

    #[test]
    fn test_status_feed_defaults() {
        let target: Target = toml::from_str(
            r#"
            name = "train-lines"
            kind = "status_feed"
            url = "https://transit.example.com/diainfo"
            interval_seconds = 120
            "#,
        )
        .unwrap();

        match &target.kind {
            TargetKind::StatusFeed {
                alert_statuses,
                ambiguous_markers,
                selector,
                ..
            } => {
                assert_eq!(alert_statuses, &["運転見合わせ", "運転再開"]);
                assert_eq!(ambiguous_markers, &["他", "運転計画"]);
                assert_eq!(selector, "#mdStatusTroubleLine");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert_eq!(target.interval(), Duration::from_secs(120));
    }

    #[test]
    fn test_incident_count_defaults() {
        let target: Target = toml::from_str(
            r#"
            name = "outage-tokyo"
            kind = "incident_count"
            base_url = "https://outage.example.com/data"
            threshold = 500
            "#,
        )
        .unwrap();

        match &target.kind {
            TargetKind::IncidentCount {
                threshold,
                area_code,
                auth_token,
                ..
            } => {
                assert_eq!(*threshold, 500);
                assert_eq!(area_code, "00000000000");
                assert!(auth_token.is_none());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert!(target.kind.is_transient());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result: std::result::Result<Target, _> = toml::from_str(
            r#"
            name = "mystery"
            kind = "carrier_pigeon"
            url = "https://example.com"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_interval_clamped_to_one_second() {
        let target: Target = toml::from_str(
            r#"
            name = "fast"
            kind = "generic"
            url = "https://example.com"
            interval_seconds = 0
            "#,
        )
        .unwrap();
        assert_eq!(target.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_night_stop_window() {
        let night_stop = NightStop {
            enabled: true,
            start_hour: 0,
            end_hour: 4,
        };
        assert!(night_stop.is_active(0));
        assert!(night_stop.is_active(3));
        assert!(!night_stop.is_active(4));
        assert!(!night_stop.is_active(23));

        let disabled = NightStop {
            enabled: false,
            start_hour: 0,
            end_hour: 24,
        };
        assert!(!disabled.is_active(2));
    }
}
