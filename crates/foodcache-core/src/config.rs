//! Runtime settings.
//!
//! [`Settings`] is resolved once at start-up (defaults, then config files,
//! then `CACHE_*` environment variables) and handed to each component by
//! value. Nothing reads the environment after that.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config_file::{self, ConfigFile};
use crate::source::openfoodfacts::DEFAULT_BASE_URL;

pub const DEFAULT_TTL_HOURS: i64 = 72;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
/// Open Food Facts' documented allowance for product reads.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 100;
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 50;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5100";
pub const DEFAULT_DATABASE_PATH: &str = "./food_cache.db";

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "CACHE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("failed to read config file {}: {reason}", path.display())]
    File { path: PathBuf, reason: String },
}

fn invalid(key: &str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.into(),
        reason: reason.into(),
    }
}

/// Configuration for the food cache service.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Records older than this are refreshed on lookup. `<= 0` disables expiry.
    pub cache_ttl_hours: i64,
    pub upstream_base_url: String,
    pub upstream_timeout_secs: u64,
    /// Upstream pacing. `0` disables the limiter.
    pub upstream_requests_per_minute: u32,
    pub user_agent: String,
    /// Shared secret for mutating operations. `None` leaves them open.
    pub service_api_key: Option<String>,
    pub allowed_origins: Vec<String>,
    pub bind_addr: SocketAddr,
    pub search_default_limit: usize,
    pub search_max_limit: usize,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("database_path", &self.database_path)
            .field("cache_ttl_hours", &self.cache_ttl_hours)
            .field("upstream_base_url", &self.upstream_base_url)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field(
                "upstream_requests_per_minute",
                &self.upstream_requests_per_minute,
            )
            .field("user_agent", &self.user_agent)
            .field(
                "service_api_key",
                &self.service_api_key.as_ref().map(|_| "***"),
            )
            .field("allowed_origins", &self.allowed_origins)
            .field("bind_addr", &self.bind_addr)
            .field("search_default_limit", &self.search_default_limit)
            .field("search_max_limit", &self.search_max_limit)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            cache_ttl_hours: DEFAULT_TTL_HOURS,
            upstream_base_url: DEFAULT_BASE_URL.to_string(),
            upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            upstream_requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            user_agent: default_user_agent(),
            service_api_key: None,
            allowed_origins: vec!["http://localhost:4200".to_string()],
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5100)),
            search_default_limit: DEFAULT_SEARCH_LIMIT,
            search_max_limit: MAX_SEARCH_LIMIT,
        }
    }
}

fn default_user_agent() -> String {
    format!(
        "foodcache/{} (+https://github.com/better-bites/foodcache)",
        env!("CARGO_PKG_VERSION")
    )
}

impl Settings {
    /// Resolve settings from config files and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = config_file::load_config()?;
        Self::from_file(&file)?.with_env(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever the config file sets. Cross-field
    /// checks wait for [`with_env`](Self::with_env), once every layer is in.
    pub fn from_file(file: &ConfigFile) -> Result<Self, ConfigError> {
        let mut s = Self::default();
        if let Some(ref cache) = file.cache {
            if let Some(ref path) = cache.database_path {
                s.database_path = PathBuf::from(path);
            }
            if let Some(ttl) = cache.ttl_hours {
                s.cache_ttl_hours = ttl;
            }
        }
        if let Some(ref upstream) = file.upstream {
            if let Some(ref url) = upstream.base_url {
                s.upstream_base_url = url.clone();
            }
            if let Some(t) = upstream.timeout_secs {
                s.upstream_timeout_secs = t;
            }
            if let Some(n) = upstream.requests_per_minute {
                s.upstream_requests_per_minute = n;
            }
            if let Some(ref ua) = upstream.user_agent {
                s.user_agent = ua.clone();
            }
        }
        if let Some(ref server) = file.server {
            if let Some(ref addr) = server.bind_addr {
                s.bind_addr = parse_addr("server.bind_addr", addr)?;
            }
            if let Some(ref origins) = server.allowed_origins {
                s.allowed_origins = origins.clone();
            }
            if let Some(n) = server.search_default_limit {
                s.search_default_limit = n;
            }
            if let Some(n) = server.search_max_limit {
                s.search_max_limit = n;
            }
        }
        if let Some(ref auth) = file.auth {
            s.service_api_key = non_empty(auth.service_api_key.clone());
        }
        Ok(s)
    }

    /// Apply `CACHE_*` variables on top. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|v| (key, v))
        };

        if let Some((_, v)) = var("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some((k, v)) = var("CACHE_TTL_HOURS") {
            self.cache_ttl_hours = parse_num(&k, &v)?;
        }
        if let Some((_, v)) = var("OPENFOODFACTS_BASE_URL") {
            self.upstream_base_url = v;
        }
        if let Some((k, v)) = var("UPSTREAM_TIMEOUT_SECS") {
            self.upstream_timeout_secs = parse_num(&k, &v)?;
        }
        if let Some((k, v)) = var("UPSTREAM_REQUESTS_PER_MINUTE") {
            self.upstream_requests_per_minute = parse_num(&k, &v)?;
        }
        if let Some((_, v)) = var("USER_AGENT") {
            self.user_agent = v;
        }
        if let Some((_, v)) = var("SERVICE_API_KEY") {
            self.service_api_key = non_empty(Some(v));
        }
        if let Some((k, v)) = var("ALLOWED_ORIGINS") {
            self.allowed_origins = parse_list(&k, &v)?;
        }
        if let Some((k, v)) = var("BIND_ADDR") {
            self.bind_addr = parse_addr(&k, &v)?;
        }
        if let Some((k, v)) = var("SEARCH_DEFAULT_LIMIT") {
            self.search_default_limit = parse_num(&k, &v)?;
        }
        if let Some((k, v)) = var("SEARCH_MAX_LIMIT") {
            self.search_max_limit = parse_num(&k, &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Cross-field checks, run after every layer is applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.upstream_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid(
                "upstream_base_url",
                url,
                "must be an http:// or https:// URL",
            ));
        }
        if self.upstream_timeout_secs == 0 {
            return Err(invalid("upstream_timeout_secs", "0", "must be positive"));
        }
        if self.search_max_limit == 0 {
            return Err(invalid("search_max_limit", "0", "must be positive"));
        }
        if self.search_default_limit == 0 || self.search_default_limit > self.search_max_limit {
            return Err(invalid(
                "search_default_limit",
                self.search_default_limit.to_string(),
                format!("must be between 1 and {}", self.search_max_limit),
            ));
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, value, e.to_string()))
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e: std::net::AddrParseError| invalid(key, value, e.to_string()))
}

/// Comma-separated list, or a JSON array for compatibility with deployments
/// that already set it that way.
fn parse_list(key: &str, value: &str) -> Result<Vec<String>, ConfigError> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| invalid(key, value, e.to_string()));
    }
    Ok(trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}
