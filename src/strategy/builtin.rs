use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::shared::html;
use crate::shared::models::Meeting;

use super::error::{Result, StrategyError};
use super::registry::{FetchingStrategy, Origin, Registration};

pub const DOCUMENT_LINKS_ON_PAGE: &str = "document_links_on_page";

const DEFAULT_LINK_PATTERN: &str = "(?i)agenda";

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-_.](\d{1,2})[-_.](\d{1,2})").expect("iso date pattern"));
static US_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/.-](\d{1,2})[/.-](\d{4}|\d{2})\b").expect("us date pattern"));
static MONTH_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})")
        .expect("month date pattern")
});
static COMPACT_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)((?:19|20)\d{2})(\d{2})(\d{2})(?:\D|$)").expect("compact date pattern"));

/// Strategies implemented natively.
pub fn registrations(http: reqwest::Client) -> Vec<Registration> {
    vec![Registration::new(DOCUMENT_LINKS_ON_PAGE, Origin::Builtin, move || {
        DocumentLinksOnPage::new(http.clone())
    })]
}

/// Every dated link on a single listing page whose text or target matches a
/// pattern.
///
/// Parameters: `page_url` (required), `link_pattern` (regex, default
/// `(?i)agenda`).
#[derive(Debug, Clone)]
pub struct DocumentLinksOnPage {
    http: reqwest::Client,
}

impl DocumentLinksOnPage {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FetchingStrategy for DocumentLinksOnPage {
    fn name(&self) -> &str {
        DOCUMENT_LINKS_ON_PAGE
    }

    async fn fetch(&self, params: &Map<String, Value>) -> Result<Vec<Meeting>> {
        let page_url = params
            .get("page_url")
            .and_then(Value::as_str)
            .ok_or_else(|| StrategyError::Fetch("missing string parameter 'page_url'".to_string()))?;
        let page_url = Url::parse(page_url)
            .map_err(|err| StrategyError::Fetch(format!("invalid page_url '{}': {}", page_url, err)))?;
        let pattern = params
            .get("link_pattern")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_LINK_PATTERN);
        let pattern = Regex::new(pattern)
            .map_err(|err| StrategyError::Fetch(format!("invalid link_pattern: {}", err)))?;

        let response = self.http.get(page_url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StrategyError::Fetch(format!("{} returned {}", page_url, status)));
        }
        let body = response.text().await?;
        let meetings = select_meetings(&body, &page_url, &pattern);
        debug!("{} found {} meetings on {}", DOCUMENT_LINKS_ON_PAGE, meetings.len(), page_url);
        Ok(meetings)
    }
}

/// Dated, pattern-matching links in page order, without repeats.
pub fn select_meetings(body: &str, page_url: &Url, pattern: &Regex) -> Vec<Meeting> {
    let mut seen = HashSet::new();
    html::extract_links(body, Some(page_url))
        .into_iter()
        .filter(|link| pattern.is_match(&link.text) || pattern.is_match(&link.url))
        .filter_map(|link| {
            let date = extract_date(&link.text).or_else(|| extract_date(&link.url))?;
            Some(Meeting {
                date: date.format("%Y-%m-%d").to_string(),
                agenda: link.url,
            })
        })
        .filter(|meeting| seen.insert(meeting.clone()))
        .collect()
}

/// First recognizable calendar date in `text`.
pub fn extract_date(text: &str) -> Option<NaiveDate> {
    if let Some(c) = ISO_DATE_RE.captures(text) {
        if let Some(date) = ymd(&c[1], &c[2], &c[3]) {
            return Some(date);
        }
    }
    if let Some(c) = MONTH_DATE_RE.captures(text) {
        let month = month_number(&c[1])?;
        let day: u32 = c[2].parse().ok()?;
        let year: i32 = c[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    if let Some(c) = US_DATE_RE.captures(text) {
        let year = if c[3].len() == 2 {
            format!("20{}", &c[3])
        } else {
            c[3].to_string()
        };
        if let Some(date) = ymd(&year, &c[1], &c[2]) {
            return Some(date);
        }
    }
    COMPACT_DATE_RE
        .captures(text)
        .and_then(|c| ymd(&c[1], &c[2], &c[3]))
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    let months = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];
    let prefix = name.to_ascii_lowercase();
    months
        .iter()
        .position(|m| prefix.starts_with(m))
        .map(|index| index as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_in_common_formats() {
        let expect = NaiveDate::from_ymd_opt(2024, 3, 11);
        for text in [
            "Agenda 2024-03-11",
            "agenda_2024_03_11.pdf",
            "Regular Meeting - March 11th, 2024",
            "Mar. 11 2024 agenda",
            "03/11/2024",
            "3-11-24 Agenda",
            "/files/PC_Agenda_20240311.pdf",
        ] {
            assert_eq!(extract_date(text), expect, "{text}");
        }
        assert_eq!(extract_date("Agenda archive"), None);
        assert_eq!(extract_date("13/45/2024"), None);
    }

    #[test]
    fn selects_dated_matching_links() {
        let page = Url::parse("https://town.gov/boards/planning/").unwrap();
        let body = r#"
            <a href="agendas/2024-01-08.pdf">Agenda - January 8, 2024</a>
            <a href="minutes/2024-01-08.pdf">Minutes - January 8, 2024</a>
            <a href="/docs/agenda-current.pdf">Current agenda</a>
            <a href="agendas/2024-02-12.pdf">Agenda 02/12/2024</a>
            <a href="agendas/2024-01-08.pdf">Agenda - January 8, 2024</a>
        "#;
        let pattern = Regex::new(DEFAULT_LINK_PATTERN).unwrap();

        let meetings = select_meetings(body, &page, &pattern);

        assert_eq!(
            meetings,
            vec![
                Meeting {
                    date: "2024-01-08".into(),
                    agenda: "https://town.gov/boards/planning/agendas/2024-01-08.pdf".into()
                },
                Meeting {
                    date: "2024-02-12".into(),
                    agenda: "https://town.gov/boards/planning/agendas/2024-02-12.pdf".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn parameters_are_checked_before_any_request() {
        let strategy = DocumentLinksOnPage::new(reqwest::Client::new());
        let err = strategy.fetch(&Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("page_url"));

        let mut params = Map::new();
        params.insert("page_url".into(), Value::String("https://town.gov".into()));
        params.insert("link_pattern".into(), Value::String("(unclosed".into()));
        let err = strategy.fetch(&params).await.unwrap_err();
        assert!(err.to_string().contains("link_pattern"));
    }
}
