use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

pub const DEFAULT_CONFIG_FILENAME: &str = "kbmigrate.toml";
pub const DEFAULT_USER_AGENT: &str = "kbmigrate/0.2";
pub const DEFAULT_PAGES_PATH: &str = "ask-api";
pub const DEFAULT_PER_PAGE: u32 = 20;
pub const DEFAULT_CATEGORY_ID: u64 = 11;
pub const DEFAULT_MAX_PAGES: usize = 500;
pub const DEFAULT_LOCALE: &str = "en-us";
pub const DEFAULT_RETRY_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_WRITE_RETRIES: usize = 1;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONCURRENCY: usize = 8;

const ZENDESK_API_SUFFIX: &str = "/api/v2";

/// On-disk shape of `kbmigrate.toml`. Every key is optional.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub wordpress: WordPressSection,
    #[serde(default)]
    pub zendesk: ZendeskSection,
    #[serde(default)]
    pub migration: MigrationSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WordPressSection {
    pub url: Option<String>,
    pub pages_path: Option<String>,
    pub per_page: Option<u32>,
    pub default_category: Option<u64>,
    pub max_pages: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ZendeskSection {
    pub url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
    pub locale: Option<String>,
    pub retry_delay_ms: Option<u64>,
    pub max_write_retries: Option<usize>,
    pub max_pages: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSection {
    pub concurrency: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout_ms: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordPressConfig {
    pub base_url: String,
    pub pages_path: String,
    pub per_page: u32,
    pub default_category: u64,
    pub max_pages: usize,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZendeskConfig {
    /// Always ends in `/api/v2`.
    pub base_url: String,
    pub username: String,
    pub api_token: String,
    pub locale: String,
    pub retry_delay_ms: u64,
    pub max_write_retries: usize,
    pub max_pages: usize,
    pub http: HttpSettings,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateConfig {
    pub wordpress: WordPressConfig,
    pub zendesk: ZendeskConfig,
    pub concurrency: usize,
}

impl MigrateConfig {
    pub fn from_process_env(file: &FileConfig) -> Result<Self> {
        Self::resolve(file, |key| env::var(key).ok())
    }

    /// Merge `file` with environment values; the environment wins.
    ///
    /// Every missing required key is reported in a single error.
    pub fn resolve<F>(file: &FileConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_string = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let env_number = |key: &str| -> Result<Option<u64>> {
            match env_string(key) {
                Some(value) => value
                    .parse::<u64>()
                    .map(Some)
                    .with_context(|| format!("invalid {key}: {value}")),
                None => Ok(None),
            }
        };

        let wordpress_url = env_string("WORDPRESS_URL").or_else(|| non_empty(&file.wordpress.url));
        let zendesk_url = env_string("ZENDESK_URL").or_else(|| non_empty(&file.zendesk.url));
        let username =
            env_string("ZENDESK_USERNAME").or_else(|| non_empty(&file.zendesk.username));
        let api_token =
            env_string("ZENDESK_API_TOKEN").or_else(|| non_empty(&file.zendesk.api_token));

        let mut missing = Vec::new();
        for (key, value) in [
            ("WORDPRESS_URL", &wordpress_url),
            ("ZENDESK_URL", &zendesk_url),
            ("ZENDESK_USERNAME", &username),
            ("ZENDESK_API_TOKEN", &api_token),
        ] {
            if value.is_none() {
                missing.push(key.to_string());
            }
        }
        let (Some(wordpress_url), Some(zendesk_url), Some(username), Some(api_token)) =
            (wordpress_url, zendesk_url, username, api_token)
        else {
            return Err(MigrateError::MissingConfig(missing).into());
        };

        let http = HttpSettings {
            timeout_ms: env_number("KBMIGRATE_HTTP_TIMEOUT_MS")?
                .or(file.migration.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            user_agent: env_string("KBMIGRATE_USER_AGENT")
                .or_else(|| non_empty(&file.migration.user_agent))
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        };

        let concurrency = env_number("KBMIGRATE_CONCURRENCY")?
            .map(|value| value as usize)
            .or(file.migration.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            bail!("concurrency must be at least 1");
        }

        let per_page = file.wordpress.per_page.unwrap_or(DEFAULT_PER_PAGE);
        if per_page == 0 {
            bail!("wordpress.per_page must be at least 1");
        }

        Ok(Self {
            wordpress: WordPressConfig {
                base_url: wordpress_url.trim_end_matches('/').to_string(),
                pages_path: non_empty(&file.wordpress.pages_path)
                    .unwrap_or_else(|| DEFAULT_PAGES_PATH.to_string())
                    .trim_matches('/')
                    .to_string(),
                per_page,
                default_category: file
                    .wordpress
                    .default_category
                    .unwrap_or(DEFAULT_CATEGORY_ID),
                max_pages: file.wordpress.max_pages.unwrap_or(DEFAULT_MAX_PAGES),
                http: http.clone(),
            },
            zendesk: ZendeskConfig {
                base_url: normalize_zendesk_url(&zendesk_url),
                username,
                api_token,
                locale: non_empty(&file.zendesk.locale)
                    .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
                retry_delay_ms: env_number("KBMIGRATE_RETRY_DELAY_MS")?
                    .or(file.zendesk.retry_delay_ms)
                    .unwrap_or(DEFAULT_RETRY_DELAY_MS),
                max_write_retries: file
                    .zendesk
                    .max_write_retries
                    .unwrap_or(DEFAULT_MAX_WRITE_RETRIES),
                max_pages: file.zendesk.max_pages.unwrap_or(DEFAULT_MAX_PAGES),
                http,
            },
            concurrency,
        })
    }

    /// Human-readable dump with the API token redacted.
    pub fn diagnostics(&self) -> String {
        format!(
            "wordpress.url={}\nwordpress.pages_path={}\nwordpress.per_page={}\nwordpress.default_category={}\nwordpress.max_pages={}\nzendesk.url={}\nzendesk.username={}\nzendesk.api_token={}\nzendesk.locale={}\nzendesk.retry_delay_ms={}\nzendesk.max_write_retries={}\nzendesk.max_pages={}\nmigration.concurrency={}\nmigration.timeout_ms={}\nmigration.user_agent={}",
            self.wordpress.base_url,
            self.wordpress.pages_path,
            self.wordpress.per_page,
            self.wordpress.default_category,
            self.wordpress.max_pages,
            self.zendesk.base_url,
            self.zendesk.username,
            redact(&self.zendesk.api_token),
            self.zendesk.locale,
            self.zendesk.retry_delay_ms,
            self.zendesk.max_write_retries,
            self.zendesk.max_pages,
            self.concurrency,
            self.zendesk.http.timeout_ms,
            self.zendesk.http.user_agent,
        )
    }
}

/// Where the config file lives and whether the operator named it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub explicit: bool,
}

/// Pick the config file: explicit flag > `KBMIGRATE_CONFIG` > `./kbmigrate.toml`.
pub fn locate_config<F>(flag: Option<&Path>, lookup: F) -> ConfigLocation
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = flag {
        return ConfigLocation {
            path: path.to_path_buf(),
            explicit: true,
        };
    }
    if let Some(value) = lookup("KBMIGRATE_CONFIG") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return ConfigLocation {
                path: PathBuf::from(trimmed),
                explicit: true,
            };
        }
    }
    ConfigLocation {
        path: PathBuf::from(DEFAULT_CONFIG_FILENAME),
        explicit: false,
    }
}

/// Load the located config. Only the implicit default may be absent.
pub fn load_located_config(location: &ConfigLocation) -> Result<FileConfig> {
    if location.explicit && !location.path.exists() {
        bail!("config file not found: {}", location.path.display());
    }
    load_config(&location.path)
}

/// Load and parse a FileConfig from a TOML file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<FileConfig> {
    if !config_path.exists() {
        return Ok(FileConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: FileConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Zendesk Help Center endpoints all hang off `/api/v2`; accept the bare
/// account URL as well.
pub fn normalize_zendesk_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with(ZENDESK_API_SUFFIX) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{ZENDESK_API_SUFFIX}")
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn redact(secret: &str) -> String {
    if secret.len() <= 4 {
        return "****".to_string();
    }
    let tail = secret
        .char_indices()
        .rev()
        .nth(3)
        .map(|(index, _)| &secret[index..])
        .unwrap_or("");
    format!("****{tail}")
}
