//! The mutable status index.
//!
//! One document summarizing the latest per-target status, read by dashboards
//! and by the scheduler's own dedup logic. The scheduler's loop is the only
//! writer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Content hash of an alert summary (16 hex characters).
///
/// Wrapping the digest keeps "no active alert" (`None`) structurally distinct
/// from an alert whose summary happens to hash to anything in particular.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertHash(pub String);

/// Poll outcome recorded in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    #[default]
    Ok,
    Error,
}

/// Alert bookkeeping for one successful poll with a non-empty summary.
#[derive(Debug, Clone)]
pub struct ActiveAlert {
    pub hash: AlertHash,
    pub summary: String,
    /// Whether an event document was written this cycle
    pub fired: bool,
}

/// Latest status of one target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,

    /// Time of the latest poll attempt, success or failure
    #[serde(default)]
    pub last_checked: String,

    /// Time of the latest detected change
    #[serde(default)]
    pub last_changed: String,

    #[serde(default)]
    pub status: TargetStatus,

    #[serde(default)]
    pub alert_active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_alert_hash: Option<AlertHash>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_alert_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_alert_summary: Option<String>,
}

impl IndexEntry {
    fn clear_alert(&mut self) {
        self.alert_active = false;
        self.last_alert_hash = None;
        self.last_alert_at = None;
        self.last_alert_summary = None;
    }
}

/// The index document: `{last_run, targets: {target_hash: IndexEntry}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchIndex {
    #[serde(default)]
    pub last_run: String,

    #[serde(default)]
    pub targets: BTreeMap<String, IndexEntry>,
}

impl WatchIndex {
    pub fn entry(&self, target_hash: &str) -> Option<&IndexEntry> {
        self.targets.get(target_hash)
    }

    /// Stored alert hash for dedup lookups.
    pub fn last_alert_hash(&self, target_hash: &str) -> Option<&AlertHash> {
        self.targets
            .get(target_hash)
            .and_then(|e| e.last_alert_hash.as_ref())
    }

    fn entry_mut(&mut self, target_hash: &str, name: &str) -> &mut IndexEntry {
        let entry = self.targets.entry(target_hash.to_string()).or_default();
        entry.name = name.to_string();
        entry
    }

    /// Record a successful poll.
    ///
    /// `alert` is `Some` exactly when the adapter summary was non-empty;
    /// `None` clears the alert bookkeeping fields. `last_alert_at` and the
    /// stored summary only move when an event actually fired, so a
    /// persistently alerting but unchanged condition keeps its original
    /// detection time.
    pub fn record_success(
        &mut self,
        target_hash: &str,
        name: &str,
        now: &str,
        changed: bool,
        alert: Option<ActiveAlert>,
    ) {
        self.last_run = now.to_string();
        let entry = self.entry_mut(target_hash, name);
        entry.last_checked = now.to_string();
        entry.status = TargetStatus::Ok;
        if changed {
            entry.last_changed = now.to_string();
        }

        match alert {
            Some(alert) => {
                entry.alert_active = true;
                entry.last_alert_hash = Some(alert.hash);
                if alert.fired {
                    entry.last_alert_at = Some(now.to_string());
                    entry.last_alert_summary = Some(alert.summary);
                }
            }
            None => entry.clear_alert(),
        }
    }

    /// Record a failed poll. The snapshot is untouched by the caller and the
    /// alert bookkeeping is cleared to uphold the `alert_active` invariant.
    pub fn record_error(&mut self, target_hash: &str, name: &str, now: &str) {
        self.last_run = now.to_string();
        let entry = self.entry_mut(target_hash, name);
        entry.last_checked = now.to_string();
        entry.status = TargetStatus::Error;
        entry.clear_alert();
    }

    /// Drop entries belonging to the named targets. Returns how many were
    /// removed.
    pub fn remove_targets(&mut self, names: &[String]) -> usize {
        let before = self.targets.len();
        self.targets.retain(|_, entry| !names.contains(&entry.name));
        before - self.targets.len()
    }
}
