use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "/config/evalmon.yaml";

/// Top-level configuration for the evalmon agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub windows: WindowConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Remote counter store connection settings. The API token is env-only.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "UpstreamConfig::default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "UpstreamConfig::default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "UpstreamConfig::default_page_size")]
    pub page_size: u32,
}

impl UpstreamConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:9400".to_string()
    }

    const fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }

    const fn default_page_size() -> u32 {
        500
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            api_token: String::new(),
            timeout: Self::default_timeout(),
            page_size: Self::default_page_size(),
        }
    }
}

/// Background refresh cadence for cached streams.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "RefreshConfig::default_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl RefreshConfig {
    const fn default_interval() -> Duration {
        Duration::from_secs(30)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Self::default_interval(),
        }
    }
}

/// Aggregation window durations.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Short rolling window shown on gauges.
    #[serde(default = "WindowConfig::default_rolling", with = "humantime_serde")]
    pub rolling: Duration,
}

impl WindowConfig {
    const fn default_rolling() -> Duration {
        Duration::from_secs(3_600)
    }

    pub fn rolling_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.rolling).unwrap_or_else(|_| chrono::Duration::minutes(60))
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            rolling: Self::default_rolling(),
        }
    }
}

/// Limits that keep per-query result counts bounded.
///
/// The defaults saturate together: seven days of the densest (1-minute)
/// granularity is exactly 10_080 records.
#[derive(Debug, Clone, Deserialize)]
pub struct Limits {
    #[serde(default = "Limits::default_max_lookback_days")]
    pub max_lookback_days: u32,
    #[serde(default = "Limits::default_max_records")]
    pub max_records: u32,
}

impl Limits {
    const fn default_max_lookback_days() -> u32 {
        7
    }

    const fn default_max_records() -> u32 {
        10_080
    }

    pub fn max_lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_lookback_days as i64)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_lookback_days: Self::default_max_lookback_days(),
            max_records: Self::default_max_records(),
        }
    }
}

/// HTTP listener configuration (bind address, dashboard bundle).
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_bind")]
    pub bind: String,
    #[serde(default = "HttpConfig::default_static_dir")]
    pub static_dir: String,
}

impl HttpConfig {
    fn default_bind() -> String {
        "0.0.0.0:8282".to_string()
    }

    fn default_static_dir() -> String {
        "dashboard/dist".to_string()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            static_dir: Self::default_static_dir(),
        }
    }
}

/// Load configuration from YAML disk file, falling back to defaults + env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("EVALMON_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let mut config = match try_parse_file(&target_path)? {
        Some(cfg) => {
            info!(path = %target_path.display(), "loaded configuration");
            cfg
        }
        None => {
            warn!(path = %target_path.display(), "config file not found; using built-in defaults");
            AppConfig::default()
        }
    };

    enforce_yaml_policy(&config)?;
    apply_env_overrides(&mut config)?;
    ensure_required_secrets(&config)?;
    Ok(config)
}

fn try_parse_file(path: &Path) -> Result<Option<AppConfig>> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let cfg = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse YAML config at {}", path.display()))?;
            Ok(Some(cfg))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
        }
    }
}

fn enforce_yaml_policy(config: &AppConfig) -> Result<()> {
    if !config.upstream.api_token.trim().is_empty() {
        bail!(
            "Remove `upstream.api_token` from evalmon YAML config; set the counter store token via the EVALMON_API_TOKEN environment variable (see .env.sample)."
        );
    }
    Ok(())
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    if let Ok(base_url) = env::var("EVALMON_UPSTREAM_URL") {
        if !base_url.is_empty() {
            config.upstream.base_url = base_url;
        }
    }

    match env::var("EVALMON_API_TOKEN") {
        Ok(token) => {
            if token.trim().is_empty() {
                bail!(
                    "Environment variable EVALMON_API_TOKEN is set but empty; populate it in your .env file."
                );
            }
            config.upstream.api_token = token;
        }
        Err(env::VarError::NotPresent) => {}
        Err(err) => return Err(err.into()),
    };

    Ok(())
}

fn ensure_required_secrets(config: &AppConfig) -> Result<()> {
    if config.upstream.api_token.trim().is_empty() {
        bail!(
            "Missing counter store token. Set the EVALMON_API_TOKEN environment variable (see .env.sample). Secrets must not be stored in YAML."
        );
    }
    Ok(())
}
