// src/scheduler.rs

//! The polling control loop.
//!
//! One loop owns all mutable scheduling state: per-target due-times, the
//! last-known-good config, and the night-stop flag. Targets are checked
//! sequentially; a slow source delays the rest of the cycle, which is an
//! accepted tradeoff at tens-of-seconds intervals. Cancellation is
//! cooperative: the token is checked between targets and raced against
//! every sleep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, Timelike};
use tokio_util::sync::CancellationToken;

use crate::adapters::SourceProbe;
use crate::config::{ConfigProvider, WatchConfig};
use crate::detector::{Detection, detect_change};
use crate::error::Result;
use crate::models::{ActiveAlert, AlertHash, ChangeEvent, Target};
use crate::store::StateStore;
use crate::utils::{summary_hash, target_hash};

/// Sleep bound when no targets are configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum age of the in-memory config before it is re-read.
const CONFIG_RELOAD_INTERVAL: Duration = Duration::from_secs(5);

/// Wake cadence while inside the quiet window.
const NIGHT_STOP_WAIT: Duration = Duration::from_secs(60);

/// Per-target due-time bookkeeping.
#[derive(Debug, Default)]
struct DueSchedule {
    next_run: HashMap<String, Instant>,
}

impl DueSchedule {
    /// A target with no recorded due-time is due immediately.
    fn is_due(&self, name: &str, now: Instant) -> bool {
        match self.next_run.get(name) {
            Some(due) => now >= *due,
            None => true,
        }
    }

    fn advance(&mut self, name: &str, due: Instant) {
        self.next_run.insert(name.to_string(), due);
    }

    /// Make every target due immediately (leaving the quiet window).
    fn reset_all(&mut self, now: Instant) {
        for due in self.next_run.values_mut() {
            *due = now;
        }
    }

    /// Drop due-times for targets no longer configured.
    fn retain(&mut self, targets: &[Target]) {
        self.next_run
            .retain(|name, _| targets.iter().any(|t| t.name == *name));
    }

    fn earliest(&self) -> Option<Instant> {
        self.next_run.values().min().copied()
    }
}

/// The monitoring scheduler.
pub struct Scheduler {
    provider: Box<dyn ConfigProvider>,
    store: Arc<dyn StateStore>,
    probe: Arc<dyn SourceProbe>,
}

impl Scheduler {
    pub fn new(
        provider: Box<dyn ConfigProvider>,
        store: Arc<dyn StateStore>,
        probe: Arc<dyn SourceProbe>,
    ) -> Self {
        Self {
            provider,
            store,
            probe,
        }
    }

    /// Run the control loop until the token is cancelled.
    ///
    /// The initial config load is the only fatal failure; later re-reads
    /// keep the last-known-good document.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut config = self.provider.load()?;
        let mut last_reload = Instant::now();
        let mut night_stopped = false;
        let mut schedule = DueSchedule::default();

        log::info!("Watcher started ({} targets)", config.targets.len());

        while !cancel.is_cancelled() {
            if last_reload.elapsed() >= CONFIG_RELOAD_INTERVAL {
                match self.provider.load() {
                    Ok(fresh) => {
                        config = fresh;
                        schedule.retain(&config.targets);
                    }
                    Err(e) => {
                        log::warn!("Config reload failed, keeping last-known-good: {e}");
                    }
                }
                last_reload = Instant::now();
            }

            if config.night_stop.is_active(Local::now().hour()) {
                if !night_stopped {
                    self.enter_night_stop().await;
                    night_stopped = true;
                }
                log::info!("Inside night-stop window, polling paused");
                if sleep_or_cancelled(&cancel, NIGHT_STOP_WAIT).await {
                    break;
                }
                continue;
            }
            if night_stopped {
                // Poll everything immediately instead of waiting out intervals.
                schedule.reset_all(Instant::now());
                night_stopped = false;
                log::info!("Night-stop window ended, resuming all targets");
            }

            let now = Instant::now();
            for target in &config.targets {
                if cancel.is_cancelled() {
                    break;
                }
                if !schedule.is_due(&target.name, now) {
                    continue;
                }
                if !target.enabled {
                    // Advancing anyway avoids a backlog poll on re-enable.
                    schedule.advance(&target.name, now + target.interval());
                    continue;
                }

                self.poll_target(target).await;
                schedule.advance(&target.name, now + target.interval());
            }

            if cancel.is_cancelled() {
                break;
            }

            let wait = match schedule.earliest() {
                Some(due) => due
                    .saturating_duration_since(Instant::now())
                    .max(Duration::from_secs(1)),
                None => DEFAULT_INTERVAL,
            };
            if sleep_or_cancelled(&cancel, wait).await {
                break;
            }
        }

        self.shutdown_cleanup(&config).await;
        log::info!("Watcher stopped");
        Ok(())
    }

    /// Poll one target, isolating every failure to this target.
    pub async fn poll_target(&self, target: &Target) {
        log::debug!("Polling {} ({})", target.name, target.kind.label());
        if let Err(e) = self.check_target(target).await {
            log::error!("Check failed: {} - {e}", target.name);
            self.record_error(target).await;
        }
    }

    async fn check_target(&self, target: &Target) -> Result<()> {
        let observation = self.probe.probe(target).await?;

        let detection = detect_change(
            self.store.as_ref(),
            &target.name,
            &observation.comparison_text,
            target.detect_mode,
            &target.ignore_patterns,
        )
        .await?;

        let now = local_now();
        let now_str = format_timestamp(&now);
        let hash = target_hash(&target.name);
        let mut index = self.store.load_index().await?;

        let alert = if observation.has_summary() {
            let alert_hash = AlertHash(summary_hash(&observation.summary));
            let fired = should_alert(
                &detection,
                target.repeat_alert,
                &alert_hash,
                index.last_alert_hash(&hash),
            );

            if fired {
                let event = ChangeEvent {
                    target_name: target.name.clone(),
                    url: target.display_url().to_string(),
                    detected_at: now,
                    detect_mode: target.detect_mode.as_str().to_string(),
                    severity: observation.severity,
                    summary: observation.summary.clone(),
                };
                // Best effort: a lost event may re-fire later, a crashed
                // loop never recovers.
                match self.store.write_event(&event).await {
                    Ok(file_name) => {
                        log::info!("Event written: {file_name} ({})", event.severity.as_str())
                    }
                    Err(e) => log::warn!("Event write failed: {} - {e}", target.name),
                }
            }

            Some(ActiveAlert {
                hash: alert_hash,
                summary: observation.summary,
                fired,
            })
        } else {
            None
        };

        index.record_success(&hash, &target.name, &now_str, detection.changed, alert);
        self.store.save_index(&index).await?;
        Ok(())
    }

    /// Best-effort `"error"` index entry after a failed check.
    async fn record_error(&self, target: &Target) {
        let now_str = format_timestamp(&local_now());
        match self.store.load_index().await {
            Ok(mut index) => {
                index.record_error(&target_hash(&target.name), &target.name, &now_str);
                if let Err(e) = self.store.save_index(&index).await {
                    log::warn!("Index update failed: {} - {e}", target.name);
                }
            }
            Err(e) => log::warn!("Index load failed: {} - {e}", target.name),
        }
    }

    /// Entering the quiet window forgets all state so no alert fires off
    /// pre-window data after resume.
    async fn enter_night_stop(&self) {
        match self.store.reset().await {
            Ok(()) => log::info!("Night-stop entered, watcher state purged"),
            Err(e) => log::warn!("Night-stop state purge failed: {e}"),
        }
    }

    /// Drop state for transient targets so a restart starts from a fresh
    /// baseline instead of a stale one.
    async fn shutdown_cleanup(&self, config: &WatchConfig) {
        let transient: Vec<String> = config
            .targets
            .iter()
            .filter(|t| t.kind.is_transient())
            .map(|t| t.name.clone())
            .collect();
        if transient.is_empty() {
            return;
        }

        match self.store.cleanup_targets(&transient).await {
            Ok(stats) => log::info!(
                "Shutdown cleanup: snapshots={}, events={}, index={}",
                stats.snapshots,
                stats.events,
                stats.index_entries
            ),
            Err(e) => log::warn!("Shutdown cleanup failed: {e}"),
        }
    }
}

/// The alert decision.
///
/// Callers guarantee the summary is non-empty; an event fires on the first
/// observation, on a detected change, on request, or when the summary hash
/// differs from the last recorded alert. An unchanged hash suppresses the
/// event, which is what keeps a persistently alerting source from storming.
fn should_alert(
    detection: &Detection,
    repeat_alert: bool,
    alert_hash: &AlertHash,
    last_alert_hash: Option<&AlertHash>,
) -> bool {
    detection.changed
        || detection.first_observation
        || repeat_alert
        || last_alert_hash != Some(alert_hash)
}

/// Race a sleep against cancellation; true when cancelled.
async fn sleep_or_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn format_timestamp(now: &NaiveDateTime) -> String {
    now.format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Observation;
    use crate::config::{ConfigProvider, WatchConfig};
    use crate::error::AppError;
    use crate::models::{Severity, TargetStatus};
    use crate::store::{LocalStateStore, StateStore};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StaticProvider {
        config: WatchConfig,
    }

    impl ConfigProvider for StaticProvider {
        fn load(&self) -> Result<WatchConfig> {
            Ok(self.config.clone())
        }
    }

    /// Probe that replays a scripted sequence of observations.
    struct ScriptedProbe {
        script: Mutex<VecDeque<Result<Observation>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(script: Vec<Result<Observation>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceProbe for ScriptedProbe {
        async fn probe(&self, _target: &Target) -> Result<Observation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Observation::quiet("no_data")))
        }
    }

    fn target(name: &str, toml_extra: &str) -> Target {
        toml::from_str(&format!(
            r#"
            name = "{name}"
            kind = "generic"
            url = "https://example.com/{name}"
            {toml_extra}
            "#
        ))
        .unwrap()
    }

    fn scheduler_with(
        tmp: &TempDir,
        targets: Vec<Target>,
        script: Vec<Result<Observation>>,
    ) -> (Scheduler, Arc<ScriptedProbe>, Arc<LocalStateStore>) {
        let store = Arc::new(LocalStateStore::new(tmp.path()));
        let probe = Arc::new(ScriptedProbe::new(script));
        let provider = Box::new(StaticProvider {
            config: WatchConfig {
                targets,
                ..WatchConfig::default()
            },
        });
        let scheduler = Scheduler::new(provider, store.clone(), probe.clone());
        (scheduler, probe, store)
    }

    fn alerting(text: &str, summary: &str) -> Result<Observation> {
        Ok(Observation::alerting(text, summary))
    }

    #[test]
    fn test_should_alert_conditions() {
        let hash = AlertHash("abcd".into());
        let same = AlertHash("abcd".into());
        let other = AlertHash("ef01".into());
        let steady = Detection {
            changed: false,
            first_observation: false,
        };
        let changed = Detection {
            changed: true,
            first_observation: false,
        };
        let first = Detection {
            changed: false,
            first_observation: true,
        };

        // Identical hash, nothing new: suppressed.
        assert!(!should_alert(&steady, false, &hash, Some(&same)));
        // Any single trigger fires.
        assert!(should_alert(&changed, false, &hash, Some(&same)));
        assert!(should_alert(&first, false, &hash, None));
        assert!(should_alert(&steady, true, &hash, Some(&same)));
        assert!(should_alert(&steady, false, &hash, Some(&other)));
        assert!(should_alert(&steady, false, &hash, None));
    }

    #[test]
    fn test_due_schedule() {
        let mut schedule = DueSchedule::default();
        let now = Instant::now();

        // Unknown targets are due immediately.
        assert!(schedule.is_due("a", now));

        schedule.advance("a", now + Duration::from_secs(30));
        assert!(!schedule.is_due("a", now));
        assert!(schedule.is_due("a", now + Duration::from_secs(30)));

        schedule.advance("b", now + Duration::from_secs(10));
        assert_eq!(schedule.earliest(), Some(now + Duration::from_secs(10)));

        // Leaving the quiet window makes everything due.
        schedule.reset_all(now);
        assert!(schedule.is_due("a", now));
        assert!(schedule.is_due("b", now));

        schedule.retain(&[target("a", "")]);
        assert_eq!(schedule.next_run.len(), 1);
        assert!(schedule.next_run.contains_key("a"));
    }

    #[tokio::test]
    async fn test_identical_alert_is_deduplicated() {
        let tmp = TempDir::new().unwrap();
        let t = target("steady", "");
        let script = (0..3).map(|_| alerting("cond", "line down")).collect();
        let (scheduler, _probe, store) = scheduler_with(&tmp, vec![t.clone()], script);

        for _ in 0..3 {
            scheduler.poll_target(&t).await;
        }

        // First observation fires; the two identical follow-ups do not.
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.events.file_count, 1);

        let index = store.load_index().await.unwrap();
        let entry = index.entry(&target_hash("steady")).unwrap();
        assert_eq!(entry.status, TargetStatus::Ok);
        assert!(entry.alert_active);
        assert_eq!(entry.last_alert_summary.as_deref(), Some("line down"));
    }

    #[tokio::test]
    async fn test_outage_scenario_fires_once_per_condition() {
        let tmp = TempDir::new().unwrap();
        let t = target("outage-tokyo", "");
        let script = vec![
            Ok(Observation::quiet("no_outage")),
            alerting("東京:1500", "  東京 : 1500軒"),
            alerting("東京:1500", "  東京 : 1500軒"),
        ];
        let (scheduler, _probe, store) = scheduler_with(&tmp, vec![t.clone()], script);
        let hash = target_hash("outage-tokyo");

        // First poll: baseline, no event.
        scheduler.poll_target(&t).await;
        assert_eq!(store.stats().await.unwrap().events.file_count, 0);
        let entry = store.load_index().await.unwrap();
        let entry = entry.entry(&hash).unwrap();
        assert_eq!(entry.status, TargetStatus::Ok);
        assert!(!entry.alert_active);

        // Second poll: condition appears, event fires.
        scheduler.poll_target(&t).await;
        assert_eq!(store.stats().await.unwrap().events.file_count, 1);
        let index = store.load_index().await.unwrap();
        let entry = index.entry(&hash).unwrap();
        assert!(entry.alert_active);
        assert_eq!(entry.status, TargetStatus::Ok);
        let first_alert_at = entry.last_alert_at.clone();
        assert!(first_alert_at.is_some());

        // Third poll: identical summary, no new event, detection time kept.
        scheduler.poll_target(&t).await;
        assert_eq!(store.stats().await.unwrap().events.file_count, 1);
        let index = store.load_index().await.unwrap();
        let entry = index.entry(&hash).unwrap();
        assert_eq!(entry.last_alert_at, first_alert_at);
    }

    #[tokio::test]
    async fn test_changed_summary_fires_new_event() {
        let tmp = TempDir::new().unwrap();
        let t = target("feed", "");
        let script = vec![
            alerting("a", "first condition"),
            alerting("b", "second condition"),
        ];
        let (scheduler, _probe, store) = scheduler_with(&tmp, vec![t.clone()], script);

        scheduler.poll_target(&t).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        scheduler.poll_target(&t).await;

        assert_eq!(store.stats().await.unwrap().events.file_count, 2);
    }

    #[tokio::test]
    async fn test_failed_check_marks_error_and_keeps_snapshot() {
        let tmp = TempDir::new().unwrap();
        let t = target("flaky", "");
        let script = vec![
            alerting("baseline", "up"),
            Err(AppError::fetch("https://example.com/flaky", "timed out")),
        ];
        let (scheduler, _probe, store) = scheduler_with(&tmp, vec![t.clone()], script);
        let hash = target_hash("flaky");

        scheduler.poll_target(&t).await;
        scheduler.poll_target(&t).await;

        let index = store.load_index().await.unwrap();
        let entry = index.entry(&hash).unwrap();
        assert_eq!(entry.status, TargetStatus::Error);
        assert!(!entry.alert_active);

        // The snapshot from the successful poll is untouched by the failure.
        assert_eq!(
            store.load_snapshot(&hash).await.unwrap(),
            Some("baseline".to_string())
        );
    }

    #[tokio::test]
    async fn test_event_document_contents() {
        let tmp = TempDir::new().unwrap();
        let t = target("docs", "");
        let script = vec![alerting("text", "変更を検出しました")];
        let (scheduler, _probe, store) = scheduler_with(&tmp, vec![t.clone()], script);

        scheduler.poll_target(&t).await;

        let events_dir = tmp.path().join("events");
        let mut entries = std::fs::read_dir(&events_dir).unwrap();
        let path = entries.next().unwrap().unwrap().path();
        let event: ChangeEvent =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();

        assert_eq!(event.target_name, "docs");
        assert_eq!(event.url, "https://example.com/docs");
        assert_eq!(event.detect_mode, "text_change");
        assert_eq!(event.severity, Severity::Alert);
        assert_eq!(event.summary, "変更を検出しました");
        assert_eq!(store.stats().await.unwrap().events.file_count, 1);
    }

    #[tokio::test]
    async fn test_run_polls_enabled_and_skips_disabled() {
        let tmp = TempDir::new().unwrap();
        let enabled = target("on", "interval_seconds = 1");
        let disabled = target("off", "enabled = false\ninterval_seconds = 1");
        let (scheduler, probe, store) =
            scheduler_with(&tmp, vec![enabled, disabled], Vec::new());

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });

        scheduler.run(cancel).await.unwrap();
        handle.await.unwrap();

        // Only the enabled target was probed, and promptly.
        assert!(probe.calls() >= 1);
        let index = store.load_index().await.unwrap();
        assert!(index.entry(&target_hash("on")).is_some());
        assert!(index.entry(&target_hash("off")).is_none());
    }

    #[tokio::test]
    async fn test_run_fails_fast_without_initial_config() {
        struct FailingProvider;
        impl ConfigProvider for FailingProvider {
            fn load(&self) -> Result<WatchConfig> {
                Err(AppError::config("no config file"))
            }
        }

        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStateStore::new(tmp.path()));
        let probe = Arc::new(ScriptedProbe::new(Vec::new()));
        let scheduler = Scheduler::new(Box::new(FailingProvider), store, probe);

        let result = scheduler.run(CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_night_stop_entry_purges_state() {
        let tmp = TempDir::new().unwrap();
        let t = target("docs", "");
        let script = vec![alerting("text", "変更を検出しました")];
        let (scheduler, _probe, store) = scheduler_with(&tmp, vec![t.clone()], script);

        scheduler.poll_target(&t).await;
        assert_eq!(store.stats().await.unwrap().snapshots.file_count, 1);
        assert_eq!(store.stats().await.unwrap().events.file_count, 1);

        scheduler.enter_night_stop().await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.snapshots.file_count, 0);
        assert_eq!(stats.events.file_count, 0);
        let index = store.load_index().await.unwrap();
        assert!(index.targets.is_empty());
        assert_eq!(index.last_run, "");
    }

    #[tokio::test]
    async fn test_shutdown_cleanup_drops_transient_state() {
        let tmp = TempDir::new().unwrap();
        let transient: Target = toml::from_str(
            r#"
            name = "train"
            kind = "status_feed"
            url = "https://transit.example.com"
            interval_seconds = 1
            "#,
        )
        .unwrap();
        let script = vec![alerting("中央線:運転見合わせ:", "中央線   運転見合わせ\n")];
        let (scheduler, _probe, store) = scheduler_with(&tmp, vec![transient.clone()], script);

        scheduler.poll_target(&transient).await;
        assert_eq!(store.stats().await.unwrap().events.file_count, 1);

        let config = WatchConfig {
            targets: vec![transient],
            ..WatchConfig::default()
        };
        scheduler.shutdown_cleanup(&config).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.snapshots.file_count, 0);
        assert_eq!(stats.events.file_count, 0);
        let index = store.load_index().await.unwrap();
        assert!(index.targets.is_empty());
    }
}
