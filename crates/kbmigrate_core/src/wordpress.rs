use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WordPressConfig;
use crate::error::MigrateError;
use crate::pagination::{NumberedPage, collect_numbered};

const TOTAL_PAGES_HEADER: &str = "x-wp-totalpages";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Rendered {
    #[serde(default)]
    pub rendered: String,
}

/// A page as served by the WordPress REST listing endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct WordPressPage {
    pub id: u64,
    #[serde(default)]
    pub title: Option<Rendered>,
    #[serde(default)]
    pub content: Option<Rendered>,
    #[serde(default)]
    pub modified_gmt: Option<String>,
    #[serde(default)]
    pub categories: Vec<u64>,
    #[serde(default)]
    pub guid: Option<Rendered>,
}

impl WordPressPage {
    /// Best label for log lines: guid, falling back to the numeric id.
    pub fn label(&self) -> String {
        self.guid
            .as_ref()
            .map(|guid| guid.rendered.trim())
            .filter(|guid| !guid.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("page {}", self.id))
    }
}

/// Article fields derived from a validated WordPress page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleDraft {
    pub title: String,
    pub body: String,
    pub modified_at: DateTime<Utc>,
}

impl ArticleDraft {
    pub fn from_page(page: &WordPressPage) -> Result<Self> {
        let title = rendered_text(page.title.as_ref())
            .ok_or_else(|| MigrateError::validation("page title missing"))?;
        let body = rendered_text(page.content.as_ref())
            .ok_or_else(|| MigrateError::validation("page content missing"))?;
        let modified = page
            .modified_gmt
            .as_deref()
            .ok_or_else(|| MigrateError::validation("page modification time missing"))?;
        let modified_at = parse_modified_gmt(modified).ok_or_else(|| {
            MigrateError::validation(format!("unparseable modification time: {modified}"))
        })?;
        Ok(Self {
            title,
            body,
            modified_at,
        })
    }

    pub fn title_key(&self) -> String {
        self.title.to_lowercase()
    }
}

/// Read side of the WordPress REST API.
pub trait SourceApi: Sync {
    fn fetch_pages(&self) -> Result<Vec<WordPressPage>>;
    /// Display name of a category, entity-decoded.
    fn fetch_category_name(&self, id: u64) -> Result<String>;
    fn request_count(&self) -> usize;
}

pub struct WordPressClient {
    client: Client,
    config: WordPressConfig,
    request_count: AtomicUsize,
}

impl WordPressClient {
    pub fn new(config: WordPressConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.http.timeout_ms))
            .build()
            .context("failed to build WordPress HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: AtomicUsize::new(0),
        })
    }

    fn pages_url(&self) -> String {
        format!("{}/{}", self.config.base_url, self.config.pages_path)
    }

    fn category_url(&self, id: u64) -> String {
        format!("{}/categories/{id}", self.config.base_url)
    }

    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Response> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.config.http.user_agent.clone())
            .header("cache-control", "no-cache")
            .query(query)
            .send()
            .with_context(|| format!("failed to call {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MigrateError::UnexpectedStatus {
                endpoint: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        Ok(response)
    }
}

impl SourceApi for WordPressClient {
    fn fetch_pages(&self) -> Result<Vec<WordPressPage>> {
        let url = self.pages_url();
        let per_page = self.config.per_page.to_string();
        collect_numbered(&url, self.config.max_pages, |page| {
            let response = self.get(
                &url,
                &[("page", page.to_string()), ("per_page", per_page.clone())],
            )?;
            let total_pages = response
                .headers()
                .get(TOTAL_PAGES_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<usize>().ok());
            let items: Vec<WordPressPage> = response
                .json()
                .with_context(|| format!("failed to decode page {page} of {url}"))?;
            debug!(page, count = items.len(), ?total_pages, "fetched WordPress pages");
            Ok(NumberedPage { items, total_pages })
        })
    }

    fn fetch_category_name(&self, id: u64) -> Result<String> {
        let url = self.category_url(id);
        let response = self.get(&url, &[])?;
        let category: CategoryResponse = response
            .json()
            .with_context(|| format!("failed to decode category {id}"))?;
        Ok(decode_category_name(&category.name))
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

/// Category names come back HTML-escaped; only `&amp;` is undone.
pub fn decode_category_name(raw: &str) -> String {
    raw.replace("&amp;", "&")
}

/// The last listed category is authoritative; uncategorized pages go to `default`.
pub fn derive_page_category(page: &WordPressPage, default: u64) -> u64 {
    page.categories.last().copied().unwrap_or(default)
}

/// `modified_gmt` carries no offset; it is UTC by definition. RFC 3339 input
/// is accepted too.
pub fn parse_modified_gmt(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn rendered_text(value: Option<&Rendered>) -> Option<String> {
    value
        .map(|value| value.rendered.as_str())
        .filter(|text| !text.trim().is_empty())
        .map(ToString::to_string)
}

#[derive(Debug, Deserialize)]
struct CategoryResponse {
    name: String,
}
