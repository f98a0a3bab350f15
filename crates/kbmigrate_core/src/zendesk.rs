use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::ZendeskConfig;
use crate::error::MigrateError;
use crate::pagination::{LinkedPage, collect_linked};
use crate::wordpress::ArticleDraft;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HelpCenterCategory {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HelpCenterSection {
    pub id: u64,
    pub name: String,
    pub category_id: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HelpCenterArticle {
    pub id: u64,
    pub section_id: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ArticleTranslation {
    pub id: u64,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Zendesk Help Center operations used by a migration run.
pub trait HelpCenterApi: Sync {
    fn list_categories(&self) -> Result<Vec<HelpCenterCategory>>;
    fn list_sections(&self) -> Result<Vec<HelpCenterSection>>;
    fn list_articles(&self) -> Result<Vec<HelpCenterArticle>>;
    fn create_category(&self, name: &str) -> Result<HelpCenterCategory>;
    fn create_section(&self, category_id: u64, name: &str) -> Result<HelpCenterSection>;
    fn create_article(&self, section_id: u64, draft: &ArticleDraft) -> Result<HelpCenterArticle>;
    fn update_article_translation(
        &self,
        article_id: u64,
        draft: &ArticleDraft,
    ) -> Result<ArticleTranslation>;
    fn request_count(&self) -> usize;
}

pub struct ZendeskClient {
    client: Client,
    config: ZendeskConfig,
    request_count: AtomicUsize,
}

impl ZendeskClient {
    pub fn new(config: ZendeskConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.http.timeout_ms))
            .build()
            .context("failed to build Zendesk HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: AtomicUsize::new(0),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    fn list_collection<T, F>(&self, kind: &str, pick: F) -> Result<Vec<T>>
    where
        F: Fn(&mut ListResponse) -> Vec<T>,
    {
        let first = self.endpoint(&format!("help_center/{kind}.json"));
        collect_linked(kind, first, self.config.max_pages, |url| {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            let response = self
                .client
                .get(url)
                .basic_auth(&self.config.username, Some(&self.config.api_token))
                .header("User-Agent", self.config.http.user_agent.clone())
                .header("cache-control", "no-cache")
                .send()
                .with_context(|| format!("failed to list Zendesk {kind}"))?;
            let status = response.status();
            if !status.is_success() {
                return Err(MigrateError::UnexpectedStatus {
                    endpoint: url.to_string(),
                    status: status.as_u16(),
                }
                .into());
            }
            let mut parsed: ListResponse = response
                .json()
                .with_context(|| format!("failed to decode Zendesk {kind} listing"))?;
            let items = pick(&mut parsed);
            debug!(kind, count = items.len(), "fetched Zendesk listing page");
            Ok(LinkedPage {
                items,
                next: parsed.next_page,
            })
        })
    }

    /// Issue one write. HTTP 429 waits `retry_delay_ms` and tries again, at
    /// most `max_write_retries` times.
    fn send_write(&self, method: Method, path: &str, payload: &Value) -> Result<Value> {
        let url = self.endpoint(path);
        let max_retries = self.config.max_write_retries;

        for attempt in 0..=max_retries {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            let response = self
                .client
                .request(method.clone(), &url)
                .basic_auth(&self.config.username, Some(&self.config.api_token))
                .header("User-Agent", self.config.http.user_agent.clone())
                .header("cache-control", "no-cache")
                .json(payload)
                .send()
                .with_context(|| format!("failed to call {method} {url}"))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < max_retries {
                    warn!(
                        endpoint = %url,
                        attempt = attempt + 1,
                        delay_ms = self.config.retry_delay_ms,
                        "rate limited by Zendesk; retrying after delay"
                    );
                    sleep(Duration::from_millis(self.config.retry_delay_ms));
                    continue;
                }
                return Err(MigrateError::RateLimited {
                    endpoint: url,
                    attempts: attempt + 1,
                }
                .into());
            }
            if !status.is_success() {
                return Err(MigrateError::UnexpectedStatus {
                    endpoint: url,
                    status: status.as_u16(),
                }
                .into());
            }
            return response
                .json()
                .with_context(|| format!("failed to decode response of {method} {url}"));
        }

        bail!("Zendesk write exhausted retry budget")
    }
}

impl HelpCenterApi for ZendeskClient {
    fn list_categories(&self) -> Result<Vec<HelpCenterCategory>> {
        self.list_collection("categories", |parsed| std::mem::take(&mut parsed.categories))
    }

    fn list_sections(&self) -> Result<Vec<HelpCenterSection>> {
        self.list_collection("sections", |parsed| std::mem::take(&mut parsed.sections))
    }

    fn list_articles(&self) -> Result<Vec<HelpCenterArticle>> {
        self.list_collection("articles", |parsed| std::mem::take(&mut parsed.articles))
    }

    fn create_category(&self, name: &str) -> Result<HelpCenterCategory> {
        let response = self.send_write(
            Method::POST,
            "help_center/categories.json",
            &category_payload(name),
        )?;
        unwrap_envelope(response, "category")
    }

    fn create_section(&self, category_id: u64, name: &str) -> Result<HelpCenterSection> {
        let response = self.send_write(
            Method::POST,
            &format!("help_center/categories/{category_id}/sections.json"),
            &section_payload(name),
        )?;
        unwrap_envelope(response, "section")
    }

    fn create_article(&self, section_id: u64, draft: &ArticleDraft) -> Result<HelpCenterArticle> {
        let response = self.send_write(
            Method::POST,
            &format!("help_center/sections/{section_id}/articles.json"),
            &article_payload(draft, &self.config.locale),
        )?;
        unwrap_envelope(response, "article")
    }

    fn update_article_translation(
        &self,
        article_id: u64,
        draft: &ArticleDraft,
    ) -> Result<ArticleTranslation> {
        let response = self.send_write(
            Method::PUT,
            &format!(
                "help_center/articles/{article_id}/translations/{}.json",
                self.config.locale
            ),
            &translation_payload(draft),
        )?;
        unwrap_envelope(response, "translation")
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

pub(crate) fn category_payload(name: &str) -> Value {
    json!({ "category": { "name": name } })
}

pub(crate) fn section_payload(name: &str) -> Value {
    json!({ "section": { "name": name } })
}

pub(crate) fn article_payload(draft: &ArticleDraft, locale: &str) -> Value {
    json!({
        "article": {
            "title": draft.title,
            "body": draft.body,
            "locale": locale,
        }
    })
}

pub(crate) fn translation_payload(draft: &ArticleDraft) -> Value {
    json!({
        "translation": {
            "title": draft.title,
            "body": draft.body,
        }
    })
}

fn unwrap_envelope<T: DeserializeOwned>(mut response: Value, key: &str) -> Result<T> {
    let inner = response
        .get_mut(key)
        .map(Value::take)
        .filter(|value| !value.is_null())
        .ok_or_else(|| anyhow::anyhow!("missing `{key}` in Zendesk response"))?;
    serde_json::from_value(inner).with_context(|| format!("failed to decode Zendesk {key}"))
}

#[derive(Debug, Deserialize, Default)]
struct ListResponse {
    #[serde(default)]
    categories: Vec<HelpCenterCategory>,
    #[serde(default)]
    sections: Vec<HelpCenterSection>,
    #[serde(default)]
    articles: Vec<HelpCenterArticle>,
    #[serde(default)]
    next_page: Option<String>,
}
