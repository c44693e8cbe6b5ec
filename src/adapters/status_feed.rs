//! Status-feed adapter for transit-style disruption boards.
//!
//! The listing page carries one row per affected line. Rows whose status
//! matches a configured alert phrase are reported directly; rows with an
//! ambiguous status get a detail-page check which may upgrade them.

use std::time::Duration;

use scraper::Html;
use url::Url;

use super::{Observation, element_text, parse_selector};
use crate::error::Result;
use crate::utils::{http, resolve_url};

/// A row lifted from the listing page, before detail resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCandidate {
    pub line: String,
    pub status: String,
    pub detail_url: String,
}

/// A row confirmed as alert-worthy.
#[derive(Debug, Clone)]
struct TroubleRow {
    line: String,
    status: String,
    detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowClass {
    Alerting,
    Ambiguous,
    Quiet,
}

#[allow(clippy::too_many_arguments)]
pub async fn check(
    client: &reqwest::Client,
    url: &str,
    detail_base_url: &str,
    selector: &str,
    detail_selector: &str,
    alert_statuses: &[String],
    ambiguous_markers: &[String],
    timeout: Duration,
) -> Result<Observation> {
    // Parsed HTML is released before any further await so the probe future
    // stays Send.
    let candidates = {
        let html = http::fetch_html(client, url, timeout).await?;
        collect_rows(&html, selector, detail_base_url)?
    };
    let Some(candidates) = candidates else {
        // No trouble container at all: the board is clean.
        return Ok(Observation::quiet("no_trouble"));
    };

    let mut rows = Vec::new();
    for candidate in candidates {
        let class = classify(&candidate.status, alert_statuses, ambiguous_markers);
        if class == RowClass::Quiet {
            continue;
        }

        // Detail pages are only fetched for rows that might matter; a
        // failure there degrades to an empty detail rather than failing
        // the whole target.
        let detail =
            fetch_detail(client, &candidate.detail_url, detail_selector, timeout).await;

        let (status, alerting) = if class == RowClass::Alerting {
            (candidate.status.clone(), true)
        } else {
            match upgrade_status(&detail, alert_statuses) {
                Some(matched) => (matched.to_string(), true),
                None => (candidate.status.clone(), false),
            }
        };

        if alerting {
            rows.push(TroubleRow {
                line: candidate.line,
                status,
                detail,
            });
        }
    }

    Ok(render(&rows))
}

/// Lift candidate rows out of the trouble container.
///
/// Returns `None` when the container itself is absent.
fn collect_rows(
    html: &Html,
    selector: &str,
    detail_base_url: &str,
) -> Result<Option<Vec<RowCandidate>>> {
    let container_sel = parse_selector(selector)?;
    let row_sel = parse_selector("tr")?;
    let cell_sel = parse_selector("td")?;
    let link_sel = parse_selector("a")?;

    let Some(container) = html.select(&container_sel).next() else {
        return Ok(None);
    };

    let base = Url::parse(detail_base_url)?;
    let mut rows = Vec::new();

    for row in container.select(&row_sel) {
        let cells: Vec<_> = row.select(&cell_sel).collect();
        if cells.len() < 3 {
            continue;
        }
        let Some(link) = cells[0].select(&link_sel).next() else {
            continue;
        };

        let line = element_text(&link);
        let href = link.value().attr("href").unwrap_or("");
        let detail_url = resolve_url(&base, href);
        let status = element_text(&cells[1]);

        rows.push(RowCandidate {
            line,
            status,
            detail_url,
        });
    }

    Ok(Some(rows))
}

fn classify(status: &str, alert_statuses: &[String], ambiguous_markers: &[String]) -> RowClass {
    if alert_statuses.iter().any(|s| status.contains(s.as_str())) {
        RowClass::Alerting
    } else if ambiguous_markers.iter().any(|m| status.contains(m.as_str())) {
        RowClass::Ambiguous
    } else {
        RowClass::Quiet
    }
}

/// An ambiguous row alerts when its detail text names an alert status.
fn upgrade_status<'a>(detail: &str, alert_statuses: &'a [String]) -> Option<&'a str> {
    if detail.is_empty() {
        return None;
    }
    alert_statuses
        .iter()
        .map(String::as_str)
        .find(|s| detail.contains(s))
}

/// Fetch the service-status block from a detail page.
async fn fetch_detail(
    client: &reqwest::Client,
    detail_url: &str,
    selector: &str,
    timeout: Duration,
) -> String {
    match http::fetch_html(client, detail_url, timeout).await {
        Ok(html) => extract_detail(&html, selector).unwrap_or_default(),
        Err(e) => {
            log::warn!("Detail page fetch failed: {detail_url} - {e}");
            String::new()
        }
    }
}

/// Reduce the service-status block to a single line.
///
/// A `<dl>` yields `dt dd` pairs joined with " / "; without one, the bare
/// `<dd>` texts are used.
fn extract_detail(html: &Html, selector: &str) -> Result<String> {
    let block_sel = parse_selector(selector)?;
    let dl_sel = parse_selector("dl")?;
    let pair_sel = parse_selector("dt, dd")?;
    let dd_sel = parse_selector("dd")?;

    let Some(block) = html.select(&block_sel).next() else {
        return Ok(String::new());
    };

    let mut texts = Vec::new();
    if let Some(dl) = block.select(&dl_sel).next() {
        let mut current_title = String::new();
        for node in dl.select(&pair_sel) {
            let body = element_text(&node);
            match node.value().name() {
                "dt" => current_title = body,
                "dd" if !body.is_empty() => {
                    if current_title.is_empty() {
                        texts.push(body);
                    } else {
                        texts.push(format!("{current_title} {body}"));
                    }
                }
                _ => {}
            }
        }
    } else {
        texts = block
            .select(&dd_sel)
            .map(|dd| element_text(&dd))
            .filter(|t| !t.is_empty())
            .collect();
    }

    Ok(texts.join(" / "))
}

fn render(rows: &[TroubleRow]) -> Observation {
    if rows.is_empty() {
        return Observation::quiet("no_alert");
    }

    let mut text_parts = Vec::new();
    let mut summary_parts = Vec::new();
    for row in rows {
        text_parts.push(format!("{}:{}:{}", row.line, row.status, row.detail));
        let detail_str = if row.detail.is_empty() {
            String::new()
        } else {
            format!("   {}", row.detail)
        };
        summary_parts.push(format!("{}   {}\n{}", row.line, row.status, detail_str));
    }

    Observation::alerting(text_parts.join("\n"), summary_parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const LISTING: &str = r#"
        <div id="mdStatusTroubleLine">
          <table>
            <tr>
              <td><a href="/line/101">中央線</a></td>
              <td>運転見合わせ</td>
              <td>13:05</td>
            </tr>
            <tr>
              <td><a href="https://other.example.com/line/202">山手線</a></td>
              <td>列車遅延 他</td>
              <td>13:02</td>
            </tr>
            <tr>
              <td><a href="/line/303">京浜東北線</a></td>
              <td>平常運転</td>
              <td>12:58</td>
            </tr>
            <tr><td>malformed</td></tr>
          </table>
        </div>
    "#;

    #[test]
    fn test_collect_rows_resolves_links() {
        let html = Html::parse_document(LISTING);
        let rows = collect_rows(&html, "#mdStatusTroubleLine", "https://transit.example.com")
            .unwrap()
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].line, "中央線");
        assert_eq!(rows[0].status, "運転見合わせ");
        assert_eq!(rows[0].detail_url, "https://transit.example.com/line/101");
        assert_eq!(rows[1].detail_url, "https://other.example.com/line/202");
    }

    #[test]
    fn test_collect_rows_without_container() {
        let html = Html::parse_document("<div id='other'></div>");
        let rows = collect_rows(&html, "#mdStatusTroubleLine", "https://transit.example.com")
            .unwrap();
        assert!(rows.is_none());
    }

    #[test]
    fn test_classify_rows() {
        let alert = statuses(&["運転見合わせ", "運転再開"]);
        let ambiguous = statuses(&["他", "運転計画"]);

        assert_eq!(classify("運転見合わせ", &alert, &ambiguous), RowClass::Alerting);
        assert_eq!(classify("列車遅延 他", &alert, &ambiguous), RowClass::Ambiguous);
        assert_eq!(classify("運転計画あり", &alert, &ambiguous), RowClass::Ambiguous);
        assert_eq!(classify("平常運転", &alert, &ambiguous), RowClass::Quiet);
    }

    #[test]
    fn test_upgrade_from_detail_text() {
        let alert = statuses(&["運転見合わせ", "運転再開"]);
        assert_eq!(
            upgrade_status("大雨の影響で運転見合わせとなっています", &alert),
            Some("運転見合わせ")
        );
        assert_eq!(upgrade_status("通常通り運転しています", &alert), None);
        assert_eq!(upgrade_status("", &alert), None);
    }

    #[test]
    fn test_extract_detail_with_dl_pairs() {
        let html = Html::parse_document(
            r#"
            <div id="mdServiceStatus">
              <dl>
                <dt>運行状況</dt><dd>運転を見合わせています</dd>
                <dt>再開見込</dt><dd>15時頃</dd>
              </dl>
            </div>
            "#,
        );
        let detail = extract_detail(&html, "#mdServiceStatus").unwrap();
        assert_eq!(detail, "運行状況 運転を見合わせています / 再開見込 15時頃");
    }

    #[test]
    fn test_extract_detail_without_dl() {
        let html = Html::parse_document(
            r#"<div id="mdServiceStatus"><dd>一部列車に遅れ</dd><dd></dd></div>"#,
        );
        let detail = extract_detail(&html, "#mdServiceStatus").unwrap();
        assert_eq!(detail, "一部列車に遅れ");
    }

    #[test]
    fn test_render_rows() {
        let rows = vec![
            TroubleRow {
                line: "中央線".into(),
                status: "運転見合わせ".into(),
                detail: "再開見込 15時頃".into(),
            },
            TroubleRow {
                line: "山手線".into(),
                status: "運転再開".into(),
                detail: String::new(),
            },
        ];

        let observation = render(&rows);
        assert_eq!(
            observation.comparison_text,
            "中央線:運転見合わせ:再開見込 15時頃\n山手線:運転再開:"
        );
        assert!(observation.summary.contains("中央線   運転見合わせ\n   再開見込 15時頃"));
        assert!(observation.summary.contains("山手線   運転再開\n"));
    }

    #[test]
    fn test_render_empty_is_quiet() {
        let observation = render(&[]);
        assert_eq!(observation.comparison_text, "no_alert");
        assert!(!observation.has_summary());
    }
}
