//! Alert event documents.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::utils::target_hash;

/// Alert level reported by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Condition crossed the alerting bar
    Alert,
    /// Condition present but demoted to informational
    Info,
    /// Nothing to report
    None,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Alert => "alert",
            Severity::Info => "info",
            Severity::None => "none",
        }
    }
}

/// An immutable alert event.
///
/// Written once when an alert condition fires; consumed and deleted by the
/// external alert sink. There is no update operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Name of the target that fired
    pub target_name: String,

    /// URL attributed to the target
    pub url: String,

    /// Local detection time, ISO-8601 to the second
    #[serde(with = "iso_seconds")]
    pub detected_at: NaiveDateTime,

    /// Comparison mode in effect when the change was detected
    pub detect_mode: String,

    /// Alert level reported by the adapter
    pub severity: Severity,

    /// Human-readable description of the condition
    pub summary: String,
}

impl ChangeEvent {
    /// Document filename: timestamp prefix for lexicographic time ordering,
    /// target hash suffix for per-target uniqueness within a second.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.json",
            self.detected_at.format("%Y%m%d%H%M%S"),
            target_hash(&self.target_name)
        )
    }
}

/// ISO-8601 seconds precision without an offset, e.g. `2026-08-06T14:03:05`.
mod iso_seconds {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_event() -> ChangeEvent {
        ChangeEvent {
            target_name: "outage-tokyo".to_string(),
            url: "https://outage.example.com/data".to_string(),
            detected_at: NaiveDate::from_ymd_opt(2026, 8, 6)
                .unwrap()
                .and_hms_opt(14, 3, 5)
                .unwrap(),
            detect_mode: "text_change".to_string(),
            severity: Severity::Alert,
            summary: "  東京 : 1500軒".to_string(),
        }
    }

    #[test]
    fn test_file_name_is_time_ordered_and_unique_per_target() {
        let event = sample_event();
        let name = event.file_name();
        assert!(name.starts_with("20260806140305_"));
        assert!(name.ends_with(".json"));
        assert_eq!(name, format!("20260806140305_{}.json", target_hash("outage-tokyo")));
    }

    #[test]
    fn test_serialization_round_trip() {
        let event = sample_event();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"detected_at\":\"2026-08-06T14:03:05\""));
        assert!(json.contains("\"severity\":\"alert\""));

        let back: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
