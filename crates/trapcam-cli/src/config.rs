// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trapcam_app::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_MAX_ATTEMPTS, DEFAULT_PAGE_SIZE,
    DEFAULT_PREFETCH_PROXIMITY, DEFAULT_SCORE_THRESHOLD, EngineConfig, RetryPolicy,
};

pub const APP_NAME: &str = "trapcam";
const CONFIG_VERSION: i64 = 1;
const MAX_PAGE_SIZE: usize = 500;
const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v2";
const DEFAULT_TIMEOUT: &str = "10s";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub playback: Playback,
    #[serde(default)]
    pub fetch: Fetch,
    #[serde(default)]
    pub log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            api: Api::default(),
            playback: Playback::default(),
            fetch: Fetch::default(),
            log: Log::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Api {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub timeout: Option<String>,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: Some(DEFAULT_BASE_URL.to_owned()),
            token: None,
            timeout: Some(DEFAULT_TIMEOUT.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Playback {
    pub page_size: Option<usize>,
    pub prefetch_proximity: Option<usize>,
    pub score_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fetch {
    pub max_attempts: Option<u32>,
    pub backoff_base: Option<String>,
    pub backoff_max: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Log {
    pub level: Option<String>,
    pub file: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("TRAPCAM_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set TRAPCAM_CONFIG_PATH to the config file")
        })?;

        let app_dir = config_root.join(APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} is not versioned. Add `version = 1` and put values under [api], [playback], [fetch], and [log]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(base_url) = &self.api.base_url
            && base_url.trim().is_empty()
        {
            bail!("api.base_url in {} must not be empty", path.display());
        }

        if let Some(timeout) = &self.api.timeout
            && parse_duration(timeout)? <= Duration::ZERO
        {
            bail!(
                "api.timeout in {} must be positive, got {}",
                path.display(),
                timeout
            );
        }

        if let Some(page_size) = self.playback.page_size
            && !(1..=MAX_PAGE_SIZE).contains(&page_size)
        {
            bail!(
                "playback.page_size in {} must be between 1 and {MAX_PAGE_SIZE}, got {}",
                path.display(),
                page_size
            );
        }

        if let Some(threshold) = self.playback.score_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            bail!(
                "playback.score_threshold in {} must be between 0.0 and 1.0, got {}",
                path.display(),
                threshold
            );
        }

        if let Some(attempts) = self.fetch.max_attempts
            && attempts == 0
        {
            bail!(
                "fetch.max_attempts in {} must be at least 1",
                path.display()
            );
        }

        let base = self.backoff_base()?;
        let max = self.backoff_max()?;
        if base > max {
            bail!(
                "fetch.backoff_base ({}ms) in {} exceeds fetch.backoff_max ({}ms)",
                base.as_millis(),
                path.display(),
                max.as_millis()
            );
        }

        Ok(())
    }

    pub fn api_base_url(&self) -> &str {
        self.api
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn api_token(&self) -> Option<&str> {
        self.api.token.as_deref()
    }

    pub fn api_timeout(&self) -> Result<Duration> {
        parse_duration(self.api.timeout.as_deref().unwrap_or(DEFAULT_TIMEOUT))
    }

    fn backoff_base(&self) -> Result<Duration> {
        match &self.fetch.backoff_base {
            Some(raw) => parse_duration(raw),
            None => Ok(DEFAULT_BACKOFF_BASE),
        }
    }

    fn backoff_max(&self) -> Result<Duration> {
        match &self.fetch.backoff_max {
            Some(raw) => parse_duration(raw),
            None => Ok(DEFAULT_BACKOFF_MAX),
        }
    }

    pub fn engine(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            page_size: self.playback.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            prefetch_proximity: self
                .playback
                .prefetch_proximity
                .unwrap_or(DEFAULT_PREFETCH_PROXIMITY),
            retry: RetryPolicy {
                max_attempts: self.fetch.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
                backoff_base: self.backoff_base()?,
                backoff_max: self.backoff_max()?,
            },
            score_threshold: self
                .playback
                .score_threshold
                .unwrap_or(DEFAULT_SCORE_THRESHOLD),
        })
    }

    pub fn log_level(&self) -> &str {
        self.log.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.log
            .file
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# trapcam config\n# Place this file at: {}\n\nversion = 1\n\n[api]\nbase_url = \"{}\"\n# token = \"<api token>\"\ntimeout = \"{}\"\n\n[playback]\npage_size = {}\nprefetch_proximity = {}\nscore_threshold = {}\n\n[fetch]\nmax_attempts = {}\nbackoff_base = \"{}ms\"\nbackoff_max = \"{}s\"\n\n[log]\nlevel = \"{}\"\n# Logging is off unless a file is set; the viewer owns the terminal.\n# file = \"/tmp/trapcam.log\"\n",
            path.display(),
            DEFAULT_BASE_URL,
            DEFAULT_TIMEOUT,
            DEFAULT_PAGE_SIZE,
            DEFAULT_PREFETCH_PROXIMITY,
            DEFAULT_SCORE_THRESHOLD,
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_BACKOFF_BASE.as_millis(),
            DEFAULT_BACKOFF_MAX.as_secs(),
            DEFAULT_LOG_LEVEL,
        )
    }
}

pub fn parse_duration(raw: &str) -> Result<Duration> {
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        return Ok(Duration::from_secs(mins * 60));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 250ms or 5s)")
}
