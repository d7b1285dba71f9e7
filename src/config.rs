//! Client configuration: backend endpoints, storage location and realtime tuning.
//!
//! Values come from an optional JSON file and are then overridden by `ECHO_*`
//! environment variables. Malformed values are ignored and the default is kept.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{invalid_url, AppResult};

pub const ENV_API_URL: &str = "ECHO_API_URL";
pub const ENV_WS_URL: &str = "ECHO_WS_URL";
pub const ENV_STORAGE_DIR: &str = "ECHO_STORAGE_DIR";
pub const ENV_UNREAD_POLL_SECS: &str = "ECHO_UNREAD_POLL_SECS";
pub const ENV_WS_MAX_RETRIES: &str = "ECHO_WS_MAX_RETRIES";
pub const ENV_WS_RETRY_DELAY_MS: &str = "ECHO_WS_RETRY_DELAY_MS";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "ECHO_HTTP_TIMEOUT_SECS";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST backend, e.g. `http://localhost:8000`.
    #[serde(default = "ClientConfig::default_api_base_url")]
    pub api_base_url: String,
    /// Realtime endpoint base. When unset it is derived from `api_base_url`.
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Directory holding the durable session file.
    #[serde(default = "ClientConfig::default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default = "ClientConfig::default_unread_poll_secs")]
    pub unread_poll_secs: u64,
    #[serde(default = "ClientConfig::default_ws_max_retries")]
    pub ws_max_retries: u32,
    #[serde(default = "ClientConfig::default_ws_retry_delay_ms")]
    pub ws_retry_delay_ms: u64,
    #[serde(default = "ClientConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ClientConfig {
    fn default_api_base_url() -> String { "http://localhost:8000".to_string() }
    fn default_storage_dir() -> PathBuf { PathBuf::from(".echo") }
    fn default_unread_poll_secs() -> u64 { 30 }
    fn default_ws_max_retries() -> u32 { 3 }
    fn default_ws_retry_delay_ms() -> u64 { 2_000 }
    fn default_request_timeout_secs() -> u64 { 30 }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg
    }

    /// Read `path` if it exists (missing file means defaults), then apply the environment.
    pub fn load(path: &Path) -> AppResult<Self> {
        let mut cfg = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<ClientConfig>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Apply overrides from a key lookup. Split out so tests need not touch the process env.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(v) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = v.trim().to_string();
        }
        if let Some(v) = lookup(ENV_WS_URL).filter(|v| !v.trim().is_empty()) {
            self.ws_url = Some(v.trim().to_string());
        }
        if let Some(v) = lookup(ENV_STORAGE_DIR).filter(|v| !v.trim().is_empty()) {
            self.storage_dir = PathBuf::from(v.trim());
        }
        parse_override(&lookup, ENV_UNREAD_POLL_SECS, &mut self.unread_poll_secs);
        parse_override(&lookup, ENV_WS_MAX_RETRIES, &mut self.ws_max_retries);
        parse_override(&lookup, ENV_WS_RETRY_DELAY_MS, &mut self.ws_retry_delay_ms);
        parse_override(&lookup, ENV_HTTP_TIMEOUT_SECS, &mut self.request_timeout_secs);
    }

    pub fn api_base(&self) -> AppResult<Url> {
        Url::parse(&self.api_base_url).map_err(invalid_url)
    }

    /// Realtime base URL: explicit `ws_url`, else the API base with http(s) mapped to ws(s).
    pub fn ws_base(&self) -> AppResult<Url> {
        if let Some(ws) = &self.ws_url {
            return Url::parse(ws).map_err(invalid_url);
        }
        let mut ws = self.api_base()?;
        let scheme = if ws.scheme() == "https" { "wss" } else { "ws" };
        ws.set_scheme(scheme).map_err(|_| invalid_url(format!("cannot derive realtime url from {}", self.api_base_url)))?;
        Ok(ws)
    }

    pub fn unread_poll_interval(&self) -> Duration { Duration::from_secs(self.unread_poll_secs.max(1)) }
    pub fn ws_retry_delay(&self) -> Duration { Duration::from_millis(self.ws_retry_delay_ms) }
    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs.max(1)) }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: Self::default_api_base_url(),
            ws_url: None,
            storage_dir: Self::default_storage_dir(),
            unread_poll_secs: Self::default_unread_poll_secs(),
            ws_max_retries: Self::default_ws_max_retries(),
            ws_retry_delay_ms: Self::default_ws_retry_delay_ms(),
            request_timeout_secs: Self::default_request_timeout_secs(),
        }
    }
}

fn parse_override<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else { return; };
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => warn!(target: "echo::config", "ignoring malformed {}='{}'", key, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn env_overrides_and_malformed_values() {
        let mut cfg = ClientConfig::default();
        cfg.apply_env(lookup_from(&[
            (ENV_API_URL, "https://api.echo.test"),
            (ENV_UNREAD_POLL_SECS, "10"),
            (ENV_WS_MAX_RETRIES, "many"),
        ]));
        assert_eq!(cfg.api_base_url, "https://api.echo.test");
        assert_eq!(cfg.unread_poll_secs, 10);
        assert_eq!(cfg.ws_max_retries, 3, "malformed value keeps the default");
    }

    #[test]
    fn ws_base_is_derived_from_api_scheme() {
        let mut cfg = ClientConfig::default();
        assert_eq!(cfg.ws_base().unwrap().scheme(), "ws");
        cfg.api_base_url = "https://learn.example.org".into();
        assert_eq!(cfg.ws_base().unwrap().as_str(), "wss://learn.example.org/");
        cfg.ws_url = Some("ws://rt.example.org:9000".into());
        assert_eq!(cfg.ws_base().unwrap().port(), Some(9000));
    }

    #[test]
    fn load_missing_file_yields_defaults_and_partial_file_fills_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.json");
        let cfg = ClientConfig::load(&missing).unwrap();
        assert_eq!(cfg.ws_retry_delay_ms, 2_000);

        let p = tmp.path().join("echo.json");
        std::fs::write(&p, br#"{"unread_poll_secs": 5}"#).unwrap();
        let cfg = ClientConfig::load(&p).unwrap();
        assert_eq!(cfg.unread_poll_secs, 5);
        assert_eq!(cfg.storage_dir, PathBuf::from(".echo"));
    }
}
