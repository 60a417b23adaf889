use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "KVSTORE";
pub const DEFAULT_CONFIG_FILE: &str = "kvstore.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// Required value of the `Authorization` header; empty disables the check.
    #[serde(default)]
    pub auth_key: Option<String>,
    /// Extra listener for `/healthz` and `/metrics` in TCP mode.
    #[serde(default)]
    pub admin_addr: Option<String>,
    /// PEM certificate chain; together with `private_key` it enables HTTPS on
    /// `tls_port` next to the plain HTTP listener.
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_tls_port")]
    pub tls_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8888,
            worker_threads: Some(4),
            auth_key: None,
            admin_addr: None,
            certificate: None,
            private_key: None,
            tls_port: default_tls_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Snapshot file; empty keeps everything in memory.
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub memory_only: bool,
    #[serde(default)]
    pub continuous_write: bool,
    #[serde(default)]
    pub write_interval_minutes: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            memory_only: false,
            continuous_write: false,
            write_interval_minutes: 0,
            queue_capacity: default_queue_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

fn default_tls_port() -> u16 { 8443 }
fn default_queue_capacity() -> usize { 2 }
fn default_drain_timeout_ms() -> u64 { 1500 }

/// Load `CONFIG_PATH` (or `kvstore.toml`); a missing file yields defaults.
pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    if !Path::new(&path).exists() {
        return Ok(AppConfig::default());
    }
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("cannot read config {path}: {e}"))?;
    let cfg: AppConfig = toml::from_str(&content)?;
    Ok(cfg)
}

impl AppConfig {
    /// File (or defaults), then `KVSTORE_*` environment overrides, then validation.
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = load_default()?;
        cfg.apply_env(|name| std::env::var(name).ok())?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}_{suffix}"));

        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT") {
            self.server.port = port.parse().map_err(|e| anyhow!("{ENV_PREFIX}_PORT: {e}"))?;
        }
        if let Some(threads) = var("WORKER_THREADS") {
            let threads = threads.parse().map_err(|e| anyhow!("{ENV_PREFIX}_WORKER_THREADS: {e}"))?;
            self.server.worker_threads = Some(threads);
        }
        if let Some(key) = var("KEY") {
            self.server.auth_key = Some(key);
        }
        if let Some(addr) = var("ADMIN_ADDR") {
            self.server.admin_addr = Some(addr);
        }
        if let Some(cert) = var("CERTIFICATE") {
            self.server.certificate = Some(cert);
        }
        if let Some(key) = var("PRIVATE_KEY") {
            self.server.private_key = Some(key);
        }
        if let Some(port) = var("TLS_PORT") {
            self.server.tls_port = port.parse().map_err(|e| anyhow!("{ENV_PREFIX}_TLS_PORT: {e}"))?;
        }
        if let Some(location) = var("LOCATION") {
            self.storage.location = location;
        }
        if let Some(memory) = var("MEMORY") {
            self.storage.memory_only = parse_bool("MEMORY", &memory)?;
        }
        if let Some(cw) = var("CONTINUOUS_WRITE") {
            self.storage.continuous_write = parse_bool("CONTINUOUS_WRITE", &cw)?;
        }
        if let Some(interval) = var("WRITE_INTERVAL") {
            self.storage.write_interval_minutes =
                interval.parse().map_err(|e| anyhow!("{ENV_PREFIX}_WRITE_INTERVAL: {e}"))?;
        }
        Ok(())
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        self.storage.validate()?;
        Ok(())
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("{ENV_PREFIX}_{name}: expected a boolean, got {other:?}")),
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be in 1..=65535"));
        }
        match self.worker_threads {
            Some(0) | None => self.worker_threads = Some(4),
            Some(_) => {}
        }
        if self.auth_key.as_deref().map(str::trim) == Some("") {
            self.auth_key = None;
        }
        if self.admin_addr.as_deref().map(str::trim) == Some("") {
            self.admin_addr = None;
        }
        for path in [&mut self.certificate, &mut self.private_key] {
            if path.as_deref().map(str::trim) == Some("") {
                *path = None;
            }
        }
        match (&self.certificate, &self.private_key) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(anyhow!("server.certificate and server.private_key must be set together"));
            }
            (Some(_), Some(_)) if self.tls_port == 0 || self.tls_port == self.port => {
                return Err(anyhow!("server.tls_port must be non-zero and differ from server.port"));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tls_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.tls_port)
    }

    /// Certificate and key paths when HTTPS is enabled.
    pub fn tls_files(&self) -> Option<(&str, &str)> {
        match (&self.certificate, &self.private_key) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(anyhow!("storage.queue_capacity must be >= 1"));
        }
        if self.drain_timeout_ms == 0 {
            return Err(anyhow!("storage.drain_timeout_ms must be a positive number of milliseconds"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn parses_toml_with_defaults() -> Result<()> {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9999

            [storage]
            location = "data/db.json"
            continuous_write = true
            "#,
        )?;
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.storage.location, "data/db.json");
        assert!(cfg.storage.continuous_write);
        assert_eq!(cfg.storage.queue_capacity, 2);
        assert_eq!(cfg.storage.drain_timeout_ms, 1500);
        Ok(())
    }

    #[test]
    fn env_overrides_file_values() -> Result<()> {
        let mut cfg = AppConfig::default();
        cfg.apply_env(env(&[
            ("KVSTORE_PORT", "7000"),
            ("KVSTORE_LOCATION", "/tmp/kv.json"),
            ("KVSTORE_MEMORY", "true"),
            ("KVSTORE_WRITE_INTERVAL", "5"),
            ("KVSTORE_KEY", "secret"),
        ]))?;
        assert_eq!(cfg.server.port, 7000);
        assert_eq!(cfg.storage.location, "/tmp/kv.json");
        assert!(cfg.storage.memory_only);
        assert_eq!(cfg.storage.write_interval_minutes, 5);
        assert_eq!(cfg.server.auth_key.as_deref(), Some("secret"));
        Ok(())
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        let mut cfg = AppConfig::default();
        assert!(cfg.apply_env(env(&[("KVSTORE_PORT", "http")])).is_err());
        assert!(cfg.apply_env(env(&[("KVSTORE_CONTINUOUS_WRITE", "maybe")])).is_err());
    }

    #[test]
    fn validation_normalizes_and_rejects() {
        let mut cfg = AppConfig::default();
        cfg.server.host = " ".into();
        cfg.server.worker_threads = Some(0);
        cfg.server.auth_key = Some("".into());
        assert!(cfg.normalize_and_validate().is_ok());
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.worker_threads, Some(4));
        assert!(cfg.server.auth_key.is_none());

        cfg.server.port = 0;
        assert!(cfg.normalize_and_validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.storage.queue_capacity = 0;
        assert!(cfg.normalize_and_validate().is_err());
    }

    #[test]
    fn tls_needs_both_files_and_its_own_port() -> Result<()> {
        let mut cfg = AppConfig::default();
        cfg.apply_env(env(&[("KVSTORE_CERTIFICATE", "cert.pem"), ("KVSTORE_TLS_PORT", "9443")]))?;
        assert!(cfg.normalize_and_validate().is_err());

        cfg.server.private_key = Some("key.pem".into());
        cfg.normalize_and_validate()?;
        assert_eq!(cfg.server.tls_files(), Some(("cert.pem", "key.pem")));
        assert_eq!(cfg.server.tls_bind_addr(), "127.0.0.1:9443");

        cfg.server.tls_port = cfg.server.port;
        assert!(cfg.normalize_and_validate().is_err());

        let mut plain = AppConfig::default();
        plain.server.certificate = Some(" ".into());
        plain.normalize_and_validate()?;
        assert!(plain.server.tls_files().is_none());
        assert_eq!(plain.server.tls_port, 8443);
        Ok(())
    }
}
