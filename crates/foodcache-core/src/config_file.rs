use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub cache: Option<CacheConfig>,
    pub upstream: Option<UpstreamConfig>,
    pub server: Option<ServerConfig>,
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub database_path: Option<String>,
    pub ttl_hours: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub requests_per_minute: Option<u32>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: Option<String>,
    pub allowed_origins: Option<Vec<String>>,
    pub search_default_limit: Option<usize>,
    pub search_max_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub service_api_key: Option<String>,
}

/// Platform config directory path: `<config_dir>/foodcache/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("foodcache").join("config.toml"))
}

/// Load config by cascading CWD `.foodcache.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> Result<ConfigFile, ConfigError> {
    let platform = match config_path() {
        Some(p) => load_from_path(&p)?,
        None => None,
    };
    let cwd = load_from_path(Path::new(".foodcache.toml"))?;

    Ok(match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    })
}

/// Load a config from a specific path. Returns `Ok(None)` if the file doesn't
/// exist; a file that exists but doesn't parse is an error.
pub fn load_from_path(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::File {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let cache = match (base.cache, overlay.cache) {
        (Some(b), Some(o)) => Some(CacheConfig {
            database_path: o.database_path.or(b.database_path),
            ttl_hours: o.ttl_hours.or(b.ttl_hours),
        }),
        (b, o) => o.or(b),
    };
    let upstream = match (base.upstream, overlay.upstream) {
        (Some(b), Some(o)) => Some(UpstreamConfig {
            base_url: o.base_url.or(b.base_url),
            timeout_secs: o.timeout_secs.or(b.timeout_secs),
            requests_per_minute: o.requests_per_minute.or(b.requests_per_minute),
            user_agent: o.user_agent.or(b.user_agent),
        }),
        (b, o) => o.or(b),
    };
    let server = match (base.server, overlay.server) {
        (Some(b), Some(o)) => Some(ServerConfig {
            bind_addr: o.bind_addr.or(b.bind_addr),
            allowed_origins: o.allowed_origins.or(b.allowed_origins),
            search_default_limit: o.search_default_limit.or(b.search_default_limit),
            search_max_limit: o.search_max_limit.or(b.search_max_limit),
        }),
        (b, o) => o.or(b),
    };
    let auth = match (base.auth, overlay.auth) {
        (Some(b), Some(o)) => Some(AuthConfig {
            service_api_key: o.service_api_key.or(b.service_api_key),
        }),
        (b, o) => o.or(b),
    };
    ConfigFile {
        cache,
        upstream,
        server,
        auth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml() {
        let file: ConfigFile = toml::from_str(
            r#"
            [cache]
            ttl_hours = 24

            [server]
            allowed_origins = ["https://app.example"]
            "#,
        )
        .unwrap();
        assert_eq!(file.cache.unwrap().ttl_hours, Some(24));
        assert_eq!(
            file.server.unwrap().allowed_origins,
            Some(vec!["https://app.example".to_string()])
        );
        assert!(file.upstream.is_none());
    }

    #[test]
    fn overlay_wins_field_by_field() {
        let base = ConfigFile {
            cache: Some(CacheConfig {
                database_path: Some("/var/lib/food.db".into()),
                ttl_hours: Some(72),
            }),
            auth: Some(AuthConfig {
                service_api_key: Some("base-key".into()),
            }),
            ..ConfigFile::default()
        };
        let overlay = ConfigFile {
            cache: Some(CacheConfig {
                database_path: None,
                ttl_hours: Some(1),
            }),
            ..ConfigFile::default()
        };
        let merged = merge(base, overlay);
        let cache = merged.cache.unwrap();
        assert_eq!(cache.database_path.as_deref(), Some("/var/lib/food.db"));
        assert_eq!(cache.ttl_hours, Some(1));
        assert_eq!(
            merged.auth.unwrap().service_api_key.as_deref(),
            Some("base-key")
        );
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_from_path(&dir.path().join("nope.toml")).unwrap(), None);
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[cache\nttl_hours = ").unwrap();
        assert!(matches!(
            load_from_path(&path),
            Err(ConfigError::File { .. })
        ));
    }
}
