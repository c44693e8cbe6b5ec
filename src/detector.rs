// src/detector.rs

//! Snapshot-based change detection.
//!
//! Comparison is deliberately textual and deterministic: the processed text
//! either equals the stored snapshot or it doesn't. The snapshot is
//! overwritten on every call, so the next poll always compares against the
//! latest attempt even after a partial write.

use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::DetectMode;
use crate::store::StateStore;
use crate::utils::target_hash;

/// Outcome of one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Processed text differs from the stored snapshot
    pub changed: bool,
    /// No snapshot existed; this poll stored the baseline
    pub first_observation: bool,
}

/// Compare `current_text` against the stored snapshot for `target_name` and
/// overwrite the snapshot with the processed text.
///
/// Ignore patterns are stripped before both storing and comparing, so a
/// volatile substring (a timestamp, a request id) never registers as a
/// change. A baseline poll stores the processed text and reports unchanged.
pub async fn detect_change(
    store: &dyn StateStore,
    target_name: &str,
    current_text: &str,
    mode: DetectMode,
    ignore_patterns: &[String],
) -> Result<Detection> {
    let processed = strip_patterns(current_text, ignore_patterns)?;
    let hash = target_hash(target_name);

    let Some(previous) = store.load_snapshot(&hash).await? else {
        store.store_snapshot(&hash, &processed).await?;
        log::info!("Baseline snapshot stored: {target_name}");
        return Ok(Detection {
            changed: false,
            first_observation: true,
        });
    };

    let changed = match mode {
        DetectMode::TextChange | DetectMode::Keyword => processed != previous,
        DetectMode::ElementAdded => processed.len() > previous.len(),
    };

    if changed {
        log::info!("Change detected: {target_name} (mode={})", mode.as_str());
    }

    store.store_snapshot(&hash, &processed).await?;
    Ok(Detection {
        changed,
        first_observation: false,
    })
}

fn strip_patterns(text: &str, patterns: &[String]) -> Result<String> {
    let mut processed = text.to_string();
    for pattern in patterns {
        let regex = Regex::new(pattern)
            .map_err(|e| AppError::config(format!("invalid ignore pattern '{pattern}': {e}")))?;
        processed = regex.replace_all(&processed, "").into_owned();
    }
    Ok(processed)
}
