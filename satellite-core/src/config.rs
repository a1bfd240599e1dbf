//! On-disk configuration (spec §6). Discovered at one of three fixed
//! paths, in order; the first one found wins. Configuration *loading* is
//! explicitly out of scope for this system's core (spec §1), but the
//! shape and discovery order are still spelled out here since the rest of
//! the system depends on them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SslConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotFoundConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ManagementConfig {
    pub ip: String,
    pub path: String,
}

fn default_server_root() -> PathBuf {
    PathBuf::from("/var/www/html")
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_server_root")]
    pub server_root: PathBuf,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default)]
    pub not_found: NotFoundConfig,
    #[serde(default)]
    pub redirect_http: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geoip_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_conditions_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management: Option<ManagementConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_root: default_server_root(),
            listen: default_listen(),
            ssl: None,
            server_header: None,
            index: None,
            not_found: NotFoundConfig::default(),
            redirect_http: false,
            log_level: default_log_level(),
            geoip_path: None,
            global_conditions_path: None,
            management: None,
        }
    }
}

impl Config {
    /// `$HOME/.config/satellite/config.yml`, `$HOME/.satellite/config.yml`,
    /// then `/etc/satellite/config.yml`, in that order.
    pub fn discovery_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = dirs_home() {
            paths.push(home.join(".config/satellite/config.yml"));
            paths.push(home.join(".satellite/config.yml"));
        }
        paths.push(PathBuf::from("/etc/satellite/config.yml"));
        paths
    }

    pub fn discover() -> Result<Config, ConfigError> {
        let candidates = Self::discovery_paths();
        for path in &candidates {
            if path.is_file() {
                return Config::load(path);
            }
        }
        Err(ConfigError::NotFound(candidates))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// It is a configuration error to set both `not_found.redirect` and
    /// `not_found.render` (spec §6, invariant I6).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.not_found.redirect.is_some() && self.not_found.render.is_some() {
            return Err(ConfigError::ConflictingNotFound);
        }
        Ok(())
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        match self.log_level.as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            // The Go source has no distinct "panic" level in its logger and
            // treats it as the most severe level it has, same as "fatal".
            "error" | "fatal" | "panic" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        }
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_not_found_is_rejected() {
        let config = Config {
            not_found: NotFoundConfig {
                redirect: Some("https://example.com".into()),
                render: Some("/decoy".into()),
            },
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ConflictingNotFound)));
    }

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.server_root, PathBuf::from("/var/www/html"));
        assert_eq!(config.listen, "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn log_level_maps_panic_to_error() {
        let mut config = Config::default();
        config.log_level = "panic".to_string();
        assert_eq!(config.log_level_filter(), log::LevelFilter::Error);
    }

    #[test]
    fn yaml_roundtrip() {
        let mut config = Config::default();
        config.server_header = Some("nginx".into());
        let yaml = serde_yaml::to_string(&config).unwrap();
        let reparsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reparsed.server_header, config.server_header);
    }
}
