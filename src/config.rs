//! Plugin configuration: assembled from a string map the host hands us (reflective tag parsing is
//! out of scope) plus environment fallback, with defaults mirroring the original's `defaultConfig`.

use std::collections::HashMap;
use std::time::Duration;

use snafu::OptionExt;

use crate::error::{ConfigError, InvalidValueSnafu, MissingIngestUrlSnafu};

/// Destination mode: the default forwards to the central ingestion service; `log_analysis` routes
/// per-tenant based on a URL carried inline on each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteType {
    Central,
    LogAnalysis,
}

impl Default for RemoteType {
    fn default() -> Self {
        RemoteType::Central
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub remote_type: RemoteType,
    pub ingest_url: String,
    pub job_path: String,
    pub container_path: String,
    pub headers: HashMap<String, String>,
    pub basic_auth_username: Option<String>,
    pub basic_auth_password: Option<String>,
    pub request_timeout: Duration,
    pub keep_alive_idle_timeout: Duration,
    pub net_limit_bytes_per_second: u32,
    pub compress_level: u32,
    pub batch_event_limit: usize,
    pub batch_event_content_limit_bytes: usize,
    pub docker_container_metadata_enable: bool,
    pub docker_container_root_path: String,
    pub container_env_include: Vec<String>,
    pub docker_config_sync_interval: Duration,
    pub docker_config_max_expired_duration: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            remote_type: RemoteType::Central,
            ingest_url: String::new(),
            job_path: "/collect/logs/job".to_string(),
            container_path: "/collect/logs/container".to_string(),
            headers: HashMap::new(),
            basic_auth_username: None,
            basic_auth_password: None,
            request_timeout: Duration::from_secs(10),
            keep_alive_idle_timeout: Duration::from_secs(60),
            net_limit_bytes_per_second: 1024 * 1024,
            compress_level: 3,
            batch_event_limit: 5000,
            batch_event_content_limit_bytes: 3 * 1024 * 1024,
            docker_container_metadata_enable: true,
            docker_container_root_path: "/var/lib/docker/containers".to_string(),
            container_env_include: Vec::new(),
            docker_config_sync_interval: Duration::from_secs(10 * 60),
            docker_config_max_expired_duration: Duration::from_secs(60 * 60),
        }
    }
}

impl Config {
    /// Builds a `Config` from the host's resolved string map, falling back to defaults and then to
    /// environment variables for anything left unset.
    pub fn from_map(raw: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(v) = raw.get("remote_type") {
            config.remote_type = match v.as_str() {
                "log_analysis" => RemoteType::LogAnalysis,
                "" | "central" => RemoteType::Central,
                other => {
                    return InvalidValueSnafu {
                        field: "remote_type",
                        value: other.to_string(),
                    }
                    .fail()
                }
            };
        }

        if let Some(v) = raw.get("erda_ingest_url") {
            config.ingest_url = v.clone();
        }
        if config.ingest_url.is_empty() {
            config.ingest_url = derive_ingest_url_from_env();
        }
        if config.ingest_url.is_empty() {
            return MissingIngestUrlSnafu.fail();
        }

        if let Some(v) = raw.get("job_path") {
            config.job_path = v.clone();
        }
        if let Some(v) = raw.get("container_path") {
            config.container_path = v.clone();
        }

        if let Some(v) = raw.get("headers") {
            config.headers = parse_headers(v);
        }

        if let Some(v) = raw.get("basic_auth_username") {
            config.basic_auth_username = Some(v.clone());
        }
        if let Some(v) = raw.get("basic_auth_password") {
            config.basic_auth_password = Some(v.clone());
        }

        if let Some(v) = raw.get("request_timeout") {
            config.request_timeout = parse_duration_secs("request_timeout", v)?;
        }
        if let Some(v) = raw.get("keep_alive_idle_timeout") {
            config.keep_alive_idle_timeout = parse_duration_secs("keep_alive_idle_timeout", v)?;
        }

        if let Some(v) = raw.get("net_limit_bytes_per_second") {
            config.net_limit_bytes_per_second = parse_u32("net_limit_bytes_per_second", v)?;
        }
        if let Some(v) = raw.get("compress_level") {
            config.compress_level = parse_u32("compress_level", v)?;
        }
        if let Some(v) = raw.get("batch_event_limit") {
            config.batch_event_limit = parse_usize("batch_event_limit", v)?;
        }
        if let Some(v) = raw.get("batch_event_content_limit_bytes") {
            config.batch_event_content_limit_bytes =
                parse_usize("batch_event_content_limit_bytes", v)?;
        }

        if let Some(v) = raw.get("docker_container_metadata_enable") {
            config.docker_container_metadata_enable = parse_bool("docker_container_metadata_enable", v)?;
        }
        if let Some(v) = raw.get("docker_container_root_path") {
            config.docker_container_root_path = v.clone();
        }
        if let Some(v) = raw.get("container_env_include") {
            config.container_env_include =
                v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
        if let Some(v) = raw.get("docker_config_sync_interval") {
            config.docker_config_sync_interval = parse_duration_secs("docker_config_sync_interval", v)?;
        }
        if let Some(v) = raw.get("docker_config_max_expired_duration") {
            config.docker_config_max_expired_duration =
                parse_duration_secs("docker_config_max_expired_duration", v)?;
        }

        config.clamp_content_limit();
        Ok(config)
    }

    /// Prevents a batch's content bound from outpacing what the rate limiter can actually push:
    /// if a full content-limit batch at 4x headroom would exceed the per-second budget, the limit
    /// is pulled down to half of what the budget allows.
    fn clamp_content_limit(&mut self) {
        let content_limit = self.batch_event_content_limit_bytes as f64;
        let net_limit = self.net_limit_bytes_per_second as f64;
        if content_limit * 0.25 > net_limit {
            self.batch_event_content_limit_bytes = ((net_limit / 0.25) / 2.0) as usize;
        }
    }
}

fn derive_ingest_url_from_env() -> String {
    let is_edge = std::env::var("DICE_IS_EDGE")
        .map(|v| v == "true")
        .unwrap_or(false);

    if is_edge {
        if let Ok(v) = std::env::var("COLLECTOR_PUBLIC_URL") {
            if !v.is_empty() {
                return v;
            }
        }
    }
    std::env::var("COLLECTOR_ADDR").unwrap_or_default()
}

fn parse_headers(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn parse_duration_secs(field: &'static str, v: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = v.parse().map_err(|_| {
        InvalidValueSnafu {
            field,
            value: v.to_string(),
        }
        .build()
    })?;
    Ok(Duration::from_secs(secs))
}

fn parse_u32(field: &'static str, v: &str) -> Result<u32, ConfigError> {
    v.parse().map_err(|_| {
        InvalidValueSnafu {
            field,
            value: v.to_string(),
        }
        .build()
    })
}

fn parse_usize(field: &'static str, v: &str) -> Result<usize, ConfigError> {
    v.parse().map_err(|_| {
        InvalidValueSnafu {
            field,
            value: v.to_string(),
        }
        .build()
    })
}

fn parse_bool(field: &'static str, v: &str) -> Result<bool, ConfigError> {
    match v {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => InvalidValueSnafu {
            field,
            value: other.to_string(),
        }
        .fail(),
    }
}

/// Joins a base URL and a path suffix, trimming slashes on both sides first.
pub fn host_join_path(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn missing_ingest_url_fails_without_env_fallback() {
        std::env::remove_var("COLLECTOR_ADDR");
        std::env::remove_var("DICE_IS_EDGE");
        let err = Config::from_map(&map(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingIngestUrl));
    }

    #[test]
    fn defaults_match_original_constants() {
        let config = Config::from_map(&map(&[("erda_ingest_url", "http://collector.example")])).unwrap();
        assert_eq!(config.batch_event_limit, 5000);
        assert_eq!(config.net_limit_bytes_per_second, 1024 * 1024);
        assert_eq!(config.compress_level, 3);
        assert_eq!(config.docker_config_sync_interval, Duration::from_secs(600));
        assert_eq!(config.docker_config_max_expired_duration, Duration::from_secs(3600));
    }

    #[test]
    fn content_limit_is_clamped_relative_to_net_limit() {
        let config = Config::from_map(&map(&[
            ("erda_ingest_url", "http://collector.example"),
            ("net_limit_bytes_per_second", "100"),
            ("batch_event_content_limit_bytes", "1000"),
        ]))
        .unwrap();
        // content_limit * 0.25 = 250 > net_limit(100), so it's clamped to (100/0.25)/2 = 200.
        assert_eq!(config.batch_event_content_limit_bytes, 200);
    }

    #[test]
    fn headers_parse_as_comma_separated_pairs() {
        let config = Config::from_map(&map(&[
            ("erda_ingest_url", "http://collector.example"),
            ("headers", "X-A=1,X-B=2"),
        ]))
        .unwrap();
        assert_eq!(config.headers.get("X-A").unwrap(), "1");
        assert_eq!(config.headers.get("X-B").unwrap(), "2");
    }

    #[test]
    fn host_join_trims_slashes() {
        assert_eq!(host_join_path("http://x/", "/collect/job"), "http://x/collect/job");
        assert_eq!(host_join_path("http://x", "collect/job"), "http://x/collect/job");
    }

    #[test]
    fn invalid_remote_type_fails() {
        let err = Config::from_map(&map(&[
            ("erda_ingest_url", "http://collector.example"),
            ("remote_type", "nonsense"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
