//! Configuration layer: typed settings with layered precedence (files → env).
//!
//! Hosts that keep their settings in files or `INERTIA__*` environment
//! variables load them here and hand the result to
//! [`InertiaBuilder::with_settings`](crate::InertiaBuilder::with_settings).

use std::{collections::BTreeMap, path::Path, path::PathBuf, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::ssr::{
    DEFAULT_SSR_MAX_RETRIES, DEFAULT_SSR_RETRY_DELAY, DEFAULT_SSR_TIMEOUT, DEFAULT_SSR_URL,
    SsrConfig,
};
use crate::cache::{DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL};
use crate::domain::protocol::PROP_CSRF_TOKEN;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "inertia";
const ENV_PREFIX: &str = "INERTIA";
pub(crate) const DEFAULT_HOT_FILE: &str = "public/hot";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub ssr: SsrSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub base_url: String,
    pub asset_version: String,
    pub dev_mode: bool,
    pub hot_file: PathBuf,
    pub csrf_prop_name: String,
    pub precognition_vary: bool,
    pub encrypt_history: bool,
}

#[derive(Debug, Clone)]
pub struct SsrSettings {
    pub enabled: bool,
    pub url: String,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_statuses: Vec<u16>,
    pub disable_retries: bool,
    pub headers: BTreeMap<String, String>,
}

impl SsrSettings {
    /// Renderer configuration, or `None` when SSR is switched off.
    pub fn to_config(&self) -> Option<SsrConfig> {
        self.enabled.then(|| SsrConfig {
            url: self.url.clone(),
            timeout: self.timeout,
            headers: self.headers.clone(),
            cache_ttl: self.cache_ttl,
            cache_max_entries: self.cache_max_entries,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            retry_statuses: self.retry_statuses.clone(),
            disable_retries: self.disable_retries,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (default files → explicit
/// file → environment).
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("ssr.retry_statuses"),
    );

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { app, ssr, logging } = raw;

        Ok(Self {
            app: build_app_settings(app)?,
            ssr: build_ssr_settings(ssr)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    app: RawAppSettings,
    ssr: RawSsrSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAppSettings {
    base_url: Option<String>,
    asset_version: Option<String>,
    dev_mode: Option<bool>,
    hot_file: Option<PathBuf>,
    csrf_prop_name: Option<String>,
    precognition_vary: Option<bool>,
    encrypt_history: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSsrSettings {
    enabled: Option<bool>,
    url: Option<String>,
    timeout_ms: Option<u64>,
    cache_ttl_secs: Option<u64>,
    cache_max_entries: Option<usize>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    retry_statuses: Option<Vec<u16>>,
    disable_retries: Option<bool>,
    headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn build_app_settings(app: RawAppSettings) -> Result<AppSettings, LoadError> {
    let base_url = app
        .base_url
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .unwrap_or_default();
    if !base_url.is_empty() {
        let parsed = Url::parse(&base_url)
            .map_err(|err| LoadError::invalid("app.base_url", format!("failed to parse: {err}")))?;
        if parsed.host_str().is_none() {
            return Err(LoadError::invalid("app.base_url", "URL must include a host"));
        }
    }

    let hot_file = app
        .hot_file
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HOT_FILE));
    if hot_file.as_os_str().is_empty() {
        return Err(LoadError::invalid("app.hot_file", "path must not be empty"));
    }

    let csrf_prop_name = app
        .csrf_prop_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| PROP_CSRF_TOKEN.to_string());

    Ok(AppSettings {
        base_url,
        asset_version: app.asset_version.unwrap_or_default(),
        dev_mode: app.dev_mode.unwrap_or(false),
        hot_file,
        csrf_prop_name,
        precognition_vary: app.precognition_vary.unwrap_or(true),
        encrypt_history: app.encrypt_history.unwrap_or(false),
    })
}

fn build_ssr_settings(ssr: RawSsrSettings) -> Result<SsrSettings, LoadError> {
    let enabled = ssr.enabled.unwrap_or(false);
    let url = ssr
        .url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_SSR_URL.to_string());
    if enabled {
        Url::parse(&url)
            .map_err(|err| LoadError::invalid("ssr.url", format!("failed to parse: {err}")))?;
    }

    let retry_statuses = ssr.retry_statuses.unwrap_or_default();
    if let Some(status) = retry_statuses
        .iter()
        .find(|status| !(100..=599).contains(*status))
    {
        return Err(LoadError::invalid(
            "ssr.retry_statuses",
            format!("`{status}` is not an HTTP status code"),
        ));
    }

    Ok(SsrSettings {
        enabled,
        url,
        timeout: ssr
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SSR_TIMEOUT),
        cache_ttl: ssr
            .cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_TTL),
        cache_max_entries: ssr.cache_max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        max_retries: ssr.max_retries.unwrap_or(DEFAULT_SSR_MAX_RETRIES),
        retry_delay: ssr
            .retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SSR_RETRY_DELAY),
        retry_statuses,
        disable_retries: ssr.disable_retries.unwrap_or(false),
        headers: ssr.headers.unwrap_or_default(),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}
