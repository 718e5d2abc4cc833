use std::{collections::HashMap, fs, time::Duration};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            request_timeout_secs: 10,
            poll_interval_secs: 8,
            reconnect_delay_secs: 5,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("rideflow.toml") {
        apply_file_values(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("RIDEFLOW_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("RIDEFLOW_REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }
    if let Ok(v) = std::env::var("RIDEFLOW_POLL_INTERVAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.poll_interval_secs = parsed;
        }
    }
    if let Ok(v) = std::env::var("RIDEFLOW_RECONNECT_DELAY_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.reconnect_delay_secs = parsed;
        }
    }

    settings
}

fn apply_file_values(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("server_url").and_then(|v| v.as_str()) {
        settings.server_url = v.to_string();
    }
    if let Some(v) = file_cfg
        .get("request_timeout_secs")
        .and_then(|v| v.as_integer())
    {
        settings.request_timeout_secs = v as u64;
    }
    if let Some(v) = file_cfg
        .get("poll_interval_secs")
        .and_then(|v| v.as_integer())
    {
        settings.poll_interval_secs = v as u64;
    }
    if let Some(v) = file_cfg
        .get("reconnect_delay_secs")
        .and_then(|v| v.as_integer())
    {
        settings.reconnect_delay_secs = v as u64;
    }
}

/// Validate and normalize the backend base URL (scheme check, no trailing
/// slash).
pub fn normalize_server_url(raw: &str) -> anyhow::Result<String> {
    let parsed = url::Url::parse(raw.trim()).with_context(|| format!("invalid server url: {raw}"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => anyhow::bail!("server url must use http or https, got {other}://"),
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_conventions() {
        let settings = Settings::default();
        assert_eq!(settings.server_url, "http://127.0.0.1:8080");
        assert_eq!(settings.poll_interval(), Duration::from_secs(8));
        assert_eq!(settings.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut settings = Settings::default();
        apply_file_values(
            &mut settings,
            "server_url = \"https://rides.example.com\"\npoll_interval_secs = 3\n",
        );
        assert_eq!(settings.server_url, "https://rides.example.com");
        assert_eq!(settings.poll_interval_secs, 3);
        assert_eq!(settings.request_timeout_secs, 10);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let mut settings = Settings::default();
        apply_file_values(&mut settings, "not [valid toml");
        assert_eq!(settings.server_url, Settings::default().server_url);
    }

    #[test]
    fn normalize_rejects_non_http_schemes() {
        assert!(normalize_server_url("ftp://rides.example.com").is_err());
        assert!(normalize_server_url("not a url").is_err());
        assert_eq!(
            normalize_server_url("http://rides.example.com/").expect("normalize"),
            "http://rides.example.com"
        );
    }

    #[test]
    fn env_overrides_apply_last() {
        std::env::set_var("RIDEFLOW_POLL_INTERVAL_SECS", "2");
        let settings = load_settings();
        std::env::remove_var("RIDEFLOW_POLL_INTERVAL_SECS");
        assert_eq!(settings.poll_interval_secs, 2);
    }
}
