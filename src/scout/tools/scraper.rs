use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::scout::error::{Result, ScoutError};
use crate::scout::toolkit::Tool;
use crate::shared::html::{self, Link};

pub const SCRAPE_WEBPAGE: &str = "scrape_webpage";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 agenda-scout";
const MIN_TEXT_BLOCK_CHARS: usize = 60;
const MAX_TEXT_BLOCKS: usize = 40;

#[derive(Debug, Deserialize)]
struct ScrapeArgs {
    url: String,
    #[serde(default)]
    extract_links: Option<Vec<String>>,
    #[serde(default)]
    extract_body_text: bool,
}

#[derive(Debug, Default)]
struct Seen {
    links: HashSet<String>,
    text: HashSet<String>,
}

/// Fetches a page and reports its title, filtered links and readable text.
///
/// Links and text blocks already returned by this instance are left out of
/// later results, so one task never sees the same navigation twice.
pub struct SiteScraperTool {
    http: reqwest::Client,
    seen: Mutex<Seen>,
}

impl SiteScraperTool {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            seen: Mutex::new(Seen::default()),
        }
    }

    async fn fetch(&self, url: &Url) -> std::result::Result<String, String> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("Error fetching webpage: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("Failed to access URL: HTTP {}", status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| format!("Error reading webpage: {}", e))
    }

    /// Build the tool result for a fetched page, recording what was returned.
    async fn summarize(
        &self,
        url: &Url,
        body: &str,
        link_filters: Option<&[String]>,
        extract_body_text: bool,
    ) -> Value {
        let mut seen = self.seen.lock().await;

        let links: Vec<Link> = match link_filters {
            Some(filters) => {
                let terms: Vec<String> = filters.iter().map(|t| t.to_lowercase()).collect();
                html::extract_links(body, Some(url))
                    .into_iter()
                    .filter(|link| matches_terms(link, &terms))
                    .filter(|link| seen.links.insert(link.url.clone()))
                    .collect()
            }
            None => Vec::new(),
        };

        let body_text: Vec<String> = if extract_body_text {
            html::text_blocks(body, MIN_TEXT_BLOCK_CHARS)
                .into_iter()
                .filter(|block| seen.text.insert(block.clone()))
                .take(MAX_TEXT_BLOCKS)
                .collect()
        } else {
            Vec::new()
        };

        debug!(
            "Scraped {}: {} new links, {} new text blocks",
            url,
            links.len(),
            body_text.len()
        );
        json!({
            "url": url.as_str(),
            "title": html::page_title(body).unwrap_or_else(|| "No title".to_string()),
            "links": links,
            "body_text": body_text,
        })
    }
}

fn matches_terms(link: &Link, terms: &[String]) -> bool {
    if terms.is_empty() {
        return true;
    }
    let text = link.text.to_lowercase();
    let url = link.url.to_lowercase();
    terms.iter().any(|term| text.contains(term) || url.contains(term))
}

#[async_trait]
impl Tool for SiteScraperTool {
    fn name(&self) -> &str {
        SCRAPE_WEBPAGE
    }

    fn description(&self) -> &str {
        "Fetch a webpage and extract its title, links and readable body text. \
         Links and text already returned earlier in this task are omitted."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to analyze"},
                "extract_links": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Return links whose text or URL contains any of these terms \
                                    (case-insensitive). An empty list returns every link. \
                                    Omit to skip link extraction."
                },
                "extract_body_text": {
                    "type": "boolean",
                    "description": "Whether to return the readable text of the page. Useful once the \
                                    right page is located, expensive otherwise."
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let args: ScrapeArgs = serde_json::from_value(args.clone())
            .map_err(|e| ScoutError::InvalidInput(format!("{}: {}", SCRAPE_WEBPAGE, e)))?;

        let url = match Url::parse(&args.url) {
            Ok(url) => url,
            Err(err) => return Ok(json!({ "error": format!("Invalid URL '{}': {}", args.url, err) })),
        };

        match self.fetch(&url).await {
            Ok(body) => Ok(self
                .summarize(&url, &body, args.extract_links.as_deref(), args.extract_body_text)
                .await),
            Err(message) => {
                warn!("Scrape of {} failed: {}", url, message);
                Ok(json!({ "error": message }))
            }
        }
    }
}
