//! Incident-count adapter for outage-style boards.
//!
//! The root feed lists per-area incident counts plus global notices. Areas
//! exceeding the configured threshold are drilled into: a per-prefecture
//! feed, then a per-city feed for every sub-area with a positive count.
//! Counts at or below the threshold demote the report to informational
//! instead of suppressing it.

use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;

use super::Observation;
use crate::error::{AppError, Result};
use crate::models::Severity;
use crate::utils::http;

/// Minimal element tree with namespace-free names.
///
/// The upstream feed mixes namespaced and plain elements, so all matching is
/// done on local names, the way the comparison keys are written in config.
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Depth-first walk including `self`.
    fn descendants(&self) -> Vec<&XmlNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    fn find_first(&self, name: &str) -> Option<&XmlNode> {
        self.descendants().into_iter().find(|n| n.name == name)
    }

    fn find_all(&self, name: &str) -> Vec<&XmlNode> {
        self.descendants()
            .into_iter()
            .filter(|n| n.name == name)
            .collect()
    }

    fn find_suffix(&self, suffix: &str) -> Option<&XmlNode> {
        self.descendants()
            .into_iter()
            .find(|n| n.name.ends_with(suffix))
    }

    fn attr_with_suffix(&self, suffix: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, value)| key.ends_with(suffix) && !value.is_empty())
            .map(|(_, value)| value.as_str())
    }

    fn text_trimmed(&self) -> &str {
        self.text.trim()
    }
}

/// Parse a feed into an element tree rooted at a synthetic document node.
pub fn parse_feed(input: &str) -> Result<XmlNode> {
    fn local_name(raw: &[u8]) -> String {
        let start = raw
            .iter()
            .rposition(|&b| b == b':')
            .map(|i| i + 1)
            .unwrap_or(0);
        String::from_utf8_lossy(&raw[start..]).into_owned()
    }

    fn make_node(e: &quick_xml::events::BytesStart) -> XmlNode {
        let attrs = e
            .attributes()
            .flatten()
            .map(|attr| {
                (
                    local_name(attr.key.as_ref()),
                    String::from_utf8_lossy(&attr.value).into_owned(),
                )
            })
            .collect();
        XmlNode {
            name: local_name(e.name().as_ref()),
            attrs,
            ..XmlNode::default()
        }
    }

    let mut reader = Reader::from_str(input);
    let mut stack = vec![XmlNode {
        name: "#document".to_string(),
        ..XmlNode::default()
    }];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(make_node(&e)),
            Ok(Event::Empty(e)) => {
                let node = make_node(&e);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| AppError::parse("xml text", e))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(text.trim());
                }
            }
            Ok(Event::CData(t)) => {
                let raw = t.into_inner();
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(String::from_utf8_lossy(&raw).trim());
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| {
                    AppError::parse("xml", "unbalanced closing tag")
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Err(AppError::parse("xml", "unbalanced closing tag")),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(AppError::parse("xml", e)),
        }
    }

    if stack.len() != 1 {
        return Err(AppError::parse("xml", "unclosed element at end of input"));
    }
    Ok(stack.remove(0))
}

/// One area row with its incident count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaCount {
    pub name: String,
    pub count: i64,
    pub code: String,
}

/// A drilled-into area above the threshold.
#[derive(Debug, Clone, Default)]
struct AffectedArea {
    name: String,
    count: i64,
    notices: Vec<String>,
    sub_areas: Vec<SubArea>,
}

#[derive(Debug, Clone, Default)]
struct SubArea {
    name: String,
    count: i64,
    detail: String,
}

#[derive(Debug, Clone, Default)]
struct PrefectureDetail {
    notices: Vec<String>,
    sub_areas: Vec<SubArea>,
}

#[allow(clippy::too_many_arguments)]
pub async fn check(
    client: &reqwest::Client,
    base_url: &str,
    auth_token: Option<&str>,
    cookie_name: &str,
    referer: &str,
    area_code: &str,
    threshold: u64,
    timeout: Duration,
) -> Result<Observation> {
    let fetcher = FeedFetcher {
        client,
        base_url,
        referer,
        cookie: auth_token.map(|token| (cookie_name, token)),
        timeout,
    };

    let root = fetcher.fetch(area_code).await?;
    let global_notices = notices(&root);
    let areas = area_counts(&root);
    if areas.is_empty() {
        log::debug!(
            "No area elements in outage feed: tags={:?}",
            sample_tags(&root)
        );
    }

    let threshold = threshold as i64;
    let mut affected = Vec::new();
    for area in areas {
        if area.count <= threshold {
            continue;
        }
        let detail = fetch_prefecture_detail(&fetcher, &area.code).await;
        affected.push(AffectedArea {
            name: area.name,
            count: area.count,
            notices: detail.notices,
            sub_areas: detail.sub_areas,
        });
    }

    Ok(render(&global_notices, &affected, threshold))
}

struct FeedFetcher<'a> {
    client: &'a reqwest::Client,
    base_url: &'a str,
    referer: &'a str,
    cookie: Option<(&'a str, &'a str)>,
    timeout: Duration,
}

impl FeedFetcher<'_> {
    async fn fetch(&self, code: &str) -> Result<XmlNode> {
        let url = format!("{}/{}.xml", self.base_url, code);
        let body = http::fetch_text_with(
            self.client,
            &url,
            self.timeout,
            Some(self.referer),
            self.cookie,
        )
        .await?;
        parse_feed(&body)
    }
}

/// Drill into a prefecture feed; failures degrade to an empty detail.
async fn fetch_prefecture_detail(fetcher: &FeedFetcher<'_>, pref_code: &str) -> PrefectureDetail {
    let mut result = PrefectureDetail::default();
    if pref_code.is_empty() {
        return result;
    }

    let pref_root = match fetcher.fetch(pref_code).await {
        Ok(root) => root,
        Err(e) => {
            log::warn!("Prefecture detail fetch failed: {pref_code} - {e}");
            return result;
        }
    };

    let areas = area_counts(&pref_root);
    if areas.is_empty() {
        log::debug!(
            "No area elements in prefecture feed: code={pref_code} tags={:?}",
            sample_tags(&pref_root)
        );
    }

    for area in areas {
        if area.count <= 0 {
            continue;
        }
        let detail = fetch_city_detail(fetcher, &area.code).await;
        result.sub_areas.push(SubArea {
            name: area.name,
            count: area.count,
            detail,
        });
    }

    result
}

/// Drill into a city feed; failures degrade to an empty string.
async fn fetch_city_detail(fetcher: &FeedFetcher<'_>, city_code: &str) -> String {
    if city_code.is_empty() {
        return String::new();
    }
    match fetcher.fetch(city_code).await {
        Ok(root) => city_detail_text(&root),
        Err(e) => {
            log::warn!("City detail fetch failed: {city_code} - {e}");
            String::new()
        }
    }
}

/// Global notice slots 1 through 13.
pub fn notices(root: &XmlNode) -> Vec<String> {
    (1..14)
        .filter_map(|i| {
            root.find_first(&format!("お知らせ{i}"))
                .map(|n| n.text_trimmed().to_string())
        })
        .filter(|text| !text.is_empty())
        .collect()
}

/// Per-area incident counts; rows missing a name or an unparsable count are
/// skipped.
pub fn area_counts(root: &XmlNode) -> Vec<AreaCount> {
    let mut counts = Vec::new();
    for area in root.find_all("エリア") {
        let Some(name_el) = area.find_first("名前") else {
            continue;
        };
        let Some(count_el) = area.find_first("停電軒数") else {
            continue;
        };
        let Ok(count) = count_el.text_trimmed().parse::<i64>() else {
            continue;
        };

        let code = area
            .find_first("コード")
            .or_else(|| area.find_suffix("コード"))
            .map(|el| el.text_trimmed().to_string())
            .filter(|code| !code.is_empty())
            .or_else(|| area.attr_with_suffix("コード").map(str::to_string))
            .unwrap_or_default();

        counts.push(AreaCount {
            name: name_el.text_trimmed().to_string(),
            count,
            code,
        });
    }
    counts
}

/// Reduce a city feed to its detail lines: the free-text block plus
/// per-block counts, preferring blocks that still have incidents.
pub fn city_detail_text(root: &XmlNode) -> String {
    let mut lines = Vec::new();

    if let Some(detail) = root.find_first("地域詳細情報") {
        let text = detail.text_trimmed();
        if !text.is_empty() {
            lines.push(text.to_string());
        }
    }

    let blocks = area_counts(root);
    if !blocks.is_empty() {
        let positive: Vec<&AreaCount> = blocks.iter().filter(|b| b.count > 0).collect();
        let chosen: Vec<&AreaCount> = if positive.is_empty() {
            blocks.iter().collect()
        } else {
            positive
        };
        for block in chosen {
            if block.name.is_empty() {
                continue;
            }
            lines.push(format!("{} : {}軒", block.name, block.count));
        }
    }

    lines.retain(|line| !line.trim().is_empty());
    lines.join("\n")
}

fn render(global_notices: &[String], affected: &[AffectedArea], threshold: i64) -> Observation {
    if affected.is_empty() && global_notices.is_empty() {
        return Observation::quiet("no_outage");
    }

    let info_only = affected.is_empty();
    let info_suffix = if info_only {
        format!("（{threshold}軒以下）")
    } else {
        String::new()
    };

    let mut text_parts = Vec::new();
    let mut summary_parts = Vec::new();

    for notice in global_notices {
        text_parts.push(format!("notice:{notice}{info_suffix}"));
        summary_parts.push(format!("{notice}{info_suffix}"));
    }

    for area in affected {
        text_parts.push(format!("{}:{}", area.name, area.count));
        summary_parts.push(format!("  {} : {}軒", area.name, area.count));

        for notice in &area.notices {
            summary_parts.push(format!("    {notice}"));
        }

        for sub in &area.sub_areas {
            text_parts.push(format!("  {}:{}", sub.name, sub.count));
            summary_parts.push(format!("    {} : {}軒", sub.name, sub.count));
            for line in sub.detail.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    summary_parts.push(format!("      {line}"));
                }
            }
        }
    }

    let severity = if info_only {
        Severity::Info
    } else {
        Severity::Alert
    };

    Observation {
        comparison_text: text_parts.join("\n"),
        summary: summary_parts.join("\n"),
        severity,
    }
}

/// First few distinct element names, for diagnostics on unexpected feeds.
fn sample_tags(root: &XmlNode) -> Vec<String> {
    let mut tags = Vec::new();
    for node in root.descendants() {
        if node.name != "#document" && !tags.contains(&node.name) {
            tags.push(node.name.clone());
        }
        if tags.len() >= 20 {
            break;
        }
    }
    tags
}
