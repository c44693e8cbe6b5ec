//! Threshold-warning adapter for weather-style alert feeds.
//!
//! Combines a warning feed with an area-hierarchy feed: warnings are
//! filtered by code, their area codes resolved up the parent chain to a
//! top-level region, and the summary grouped per region.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use super::Observation;
use crate::error::Result;
use crate::utils::http;

/// Labels for the well-known warning codes.
const WARNING_CODE_LABELS: &[(&str, &str)] = &[
    ("02", "暴風雪警報"),
    ("03", "大雨警報"),
    ("04", "洪水警報"),
    ("05", "暴風警報"),
    ("06", "大雪警報"),
    ("07", "波浪警報"),
    ("08", "高潮警報"),
];

/// One warning entry lifted from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningHit {
    pub area_code: String,
    pub label: String,
    pub attention: Option<String>,
}

/// Area names resolved while walking up the hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AreaHierarchy {
    pub city: Option<String>,
    pub district: Option<String>,
    pub region: Option<String>,
    pub prefecture: Option<String>,
}

pub async fn check(
    client: &reqwest::Client,
    warning_url: &str,
    area_url: &str,
    warning_codes: &[String],
    timeout: Duration,
) -> Result<Observation> {
    let warning_data = http::fetch_json(client, warning_url, timeout).await?;
    let area_data = http::fetch_json(client, area_url, timeout).await?;
    Ok(evaluate(&warning_data, &area_data, warning_codes))
}

/// Filter, resolve and group; pure over the two fetched documents.
pub fn evaluate(warning_data: &Value, area_data: &Value, warning_codes: &[String]) -> Observation {
    let hits = extract_warnings(warning_data, warning_codes);
    if hits.is_empty() {
        return Observation::quiet("no_warning");
    }

    let resolved: Vec<(WarningHit, AreaHierarchy)> = hits
        .into_iter()
        .map(|hit| {
            let hierarchy = resolve_hierarchy(area_data, &hit.area_code);
            (hit, hierarchy)
        })
        .collect();

    render(&resolved)
}

/// Collect warnings whose code is configured, one entry per attention.
fn extract_warnings(warning_data: &Value, warning_codes: &[String]) -> Vec<WarningHit> {
    let mut hits = Vec::new();
    let Some(entries) = warning_data.as_array() else {
        return hits;
    };

    for entry in entries {
        for area_type in json_array(entry, "areaTypes") {
            for area in json_array(area_type, "areas") {
                for warning in json_array(area, "warnings") {
                    let Some(code) = warning.get("code").and_then(Value::as_str) else {
                        continue;
                    };
                    if !warning_codes.iter().any(|c| c == code) {
                        continue;
                    }

                    let label = label_for(warning, code);
                    let area_code = area
                        .get("code")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();

                    let attentions: Vec<Option<String>> = match warning.get("attentions") {
                        Some(Value::Array(list)) if !list.is_empty() => list
                            .iter()
                            .map(|v| v.as_str().map(str::to_string))
                            .collect(),
                        _ => vec![None],
                    };

                    for attention in attentions {
                        hits.push(WarningHit {
                            area_code: area_code.clone(),
                            label: label.clone(),
                            attention,
                        });
                    }
                }
            }
        }
    }
    hits
}

fn label_for(warning: &Value, code: &str) -> String {
    WARNING_CODE_LABELS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| label.to_string())
        .or_else(|| string_field(warning, "name"))
        .or_else(|| string_field(warning, "type"))
        .or_else(|| string_field(warning, "status"))
        .unwrap_or_else(|| "警報".to_string())
}

/// Walk an area code up the parent chain, filling in each hierarchy level.
///
/// Keys may differ in zero padding between feeds, so a direct lookup falls
/// back to numeric comparison. The walk is capped to avoid cycles in a
/// malformed feed.
pub fn resolve_hierarchy(area_data: &Value, code: &str) -> AreaHierarchy {
    const LEVELS: &[&str] = &["class20s", "class15s", "class10s", "offices", "centers"];

    let mut result = AreaHierarchy::default();
    let mut cur = code.to_string();

    for _ in 0..10 {
        let mut found: Option<(&str, &Value)> = None;

        'levels: for &level in LEVELS {
            let Some(area_map) = area_data.get(level).and_then(Value::as_object) else {
                continue;
            };
            if let Some(area) = area_map.get(&cur) {
                found = Some((level, area));
                break 'levels;
            }
            if let Ok(cur_num) = cur.parse::<u64>() {
                for (key, area) in area_map {
                    if key.parse::<u64>() == Ok(cur_num) {
                        cur = key.clone();
                        found = Some((level, area));
                        break 'levels;
                    }
                }
            }
        }

        let Some((level, area)) = found else { break };

        let name = string_field(area, "name");
        match level {
            "class20s" => result.city = name,
            "class15s" => result.district = name,
            "class10s" => {
                if result.region.is_none() {
                    result.region = name;
                }
            }
            "offices" => {
                if result.prefecture.is_none() {
                    result.prefecture = name;
                }
            }
            _ => {}
        }

        match area.get("parent") {
            Some(parent) => {
                cur = match parent {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
            }
            None => break,
        }
    }

    result
}

/// Group by prefecture (falling back to region) and format both the
/// comparison text and the summary.
fn render(resolved: &[(WarningHit, AreaHierarchy)]) -> Observation {
    let mut grouped: BTreeMap<String, Vec<&(WarningHit, AreaHierarchy)>> = BTreeMap::new();
    for item in resolved {
        let prefecture = item
            .1
            .prefecture
            .clone()
            .or_else(|| item.1.region.clone())
            .unwrap_or_else(|| "不明".to_string());
        grouped.entry(prefecture).or_default().push(item);
    }

    let mut blocks = Vec::new();
    for (prefecture, items) in &grouped {
        // Preserve first-seen label order within the prefecture.
        let mut by_label: Vec<(String, Vec<String>)> = Vec::new();
        for (hit, hierarchy) in items {
            let city = match &hierarchy.city {
                Some(city) if !city.is_empty() => city.clone(),
                _ => continue,
            };
            match by_label.iter_mut().find(|(label, _)| *label == hit.label) {
                Some((_, cities)) => cities.push(city),
                None => by_label.push((hit.label.clone(), vec![city])),
            }
        }

        let mut lines = vec![format!("<{prefecture}>")];
        for (label, cities) in &mut by_label {
            cities.sort();
            cities.dedup();
            let label = if label.is_empty() { "警報" } else { label.as_str() };
            lines.push(format!("  {}: {}", label, cities.join("、")));
        }
        blocks.push(lines.join("\n"));
    }

    let body = blocks.join("\n\n");
    let summary = format!("【警戒情報】\n{body}");
    Observation::alerting(body, summary)
}

fn json_array<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter())
        .into_iter()
        .flatten()
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
