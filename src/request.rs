use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::parse::page_text;
use crate::{Error, Result};

const SCRAPE_PATH: &str = "/v1/scrape";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
/// How much of an unparsable API response ends up in the error.
const BODY_PREVIEW_CHARS: usize = 200;

/// What the scraping API returns for a page. Any of the formats can be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScrapedPage {
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub metadata: Option<Value>,
}

impl ScrapedPage {
    pub fn is_empty(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.markdown) && blank(&self.html)
    }

    /// The page body as text: the markdown rendition, or the HTML's text when there is none.
    pub fn payload(&self) -> Result<Option<String>> {
        match (&self.markdown, &self.html) {
            (Some(md), _) if !md.trim().is_empty() => Ok(Some(md.clone())),
            (_, Some(html)) if !html.trim().is_empty() => page_text(html).map(Some),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapedPage>,
    error: Option<String>,
}

/// Everything the course pipeline needs from the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url` through the scraping API.
    async fn scrape(&self, url: &str) -> Result<ScrapedPage>;
    /// Fetches `url` directly, for files the API would mangle.
    async fn download(&self, url: &str) -> Result<String>;
}

/// Firecrawl-compatible scraping API client bound to a single API key.
#[derive(Clone)]
pub struct FirecrawlClient {
    client: Client,
    api_key: String,
    endpoint: String,
    download_timeout: Duration,
}

impl FirecrawlClient {
    pub fn new(client: Client, api_key: impl Into<String>, config: &Config) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}{SCRAPE_PATH}", config.api_base_url.trim_end_matches('/')),
            download_timeout: config.download_timeout(),
        }
    }
}

#[async_trait]
impl Fetcher for FirecrawlClient {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
        debug!(url, "scrape request");
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "url": url, "formats": ["markdown", "html"] }))
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        parse_scrape_response(url, status.as_u16(), &body)
    }

    async fn download(&self, url: &str) -> Result<String> {
        debug!(url, "raw download");
        let res = self
            .client
            .get(url)
            .header(header::USER_AGENT, BROWSER_USER_AGENT)
            .header(header::ACCEPT, "*/*")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .timeout(self.download_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.text().await?)
    }
}

fn parse_scrape_response(url: &str, status: u16, body: &str) -> Result<ScrapedPage> {
    let response: ScrapeResponse = serde_json::from_str(body).map_err(|_| Error::ScrapeFailed {
        url: url.to_string(),
        reason: format!(
            "HTTP {status}: {}",
            body.chars().take(BODY_PREVIEW_CHARS).collect::<String>()
        ),
    })?;
    if !response.success {
        return Err(Error::ScrapeFailed {
            url: url.to_string(),
            reason: response
                .error
                .unwrap_or_else(|| format!("HTTP {status}, success=false")),
        });
    }
    match response.data {
        Some(page) if !page.is_empty() => Ok(page),
        _ => Err(Error::ScrapeEmpty(url.to_string())),
    }
}
