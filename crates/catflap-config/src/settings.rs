use crate::paths::AppPaths;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub ssh: SshDefaults,
    pub reconnect: ReconnectConfig,
    pub logging: LoggingConfig,
    pub keychain: KeychainConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AppConfigLayer {
    pub gateway: Option<GatewayConfigLayer>,
    pub ssh: Option<SshDefaultsLayer>,
    pub reconnect: Option<ReconnectConfigLayer>,
    pub logging: Option<LoggingConfigLayer>,
    pub keychain: Option<KeychainConfigLayer>,
}

impl AppConfigLayer {
    pub fn apply_to(self, cfg: &mut AppConfig) {
        if let Some(layer) = self.gateway {
            cfg.gateway.apply(layer);
        }
        if let Some(layer) = self.ssh {
            cfg.ssh.apply(layer);
        }
        if let Some(layer) = self.reconnect {
            cfg.reconnect.apply(layer);
        }
        if let Some(layer) = self.logging {
            cfg.logging.apply(layer);
        }
        if let Some(layer) = self.keychain {
            cfg.keychain.apply(layer);
        }
    }
}

/// Gateway endpoint and the client metadata sent in the connect handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub url: Option<String>,
    pub client_id: String,
    pub client_mode: String,
    pub display_name: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub connect_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            client_id: "openclaw-ios".to_string(),
            client_mode: "node".to_string(),
            display_name: "catflap".to_string(),
            role: "operator".to_string(),
            scopes: vec!["operator.admin".to_string()],
            min_protocol: 1,
            max_protocol: 1,
            connect_timeout_ms: 15000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct GatewayConfigLayer {
    pub url: Option<String>,
    pub client_id: Option<String>,
    pub client_mode: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub min_protocol: Option<u32>,
    pub max_protocol: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
}

impl GatewayConfig {
    fn apply(&mut self, layer: GatewayConfigLayer) {
        if layer.url.is_some() {
            self.url = layer.url;
        }
        if let Some(v) = layer.client_id {
            self.client_id = v;
        }
        if let Some(v) = layer.client_mode {
            self.client_mode = v;
        }
        if let Some(v) = layer.display_name {
            self.display_name = v;
        }
        if let Some(v) = layer.role {
            self.role = v;
        }
        if let Some(v) = layer.scopes {
            self.scopes = v;
        }
        if let Some(v) = layer.min_protocol {
            self.min_protocol = v;
        }
        if let Some(v) = layer.max_protocol {
            self.max_protocol = v;
        }
        if let Some(v) = layer.connect_timeout_ms {
            self.connect_timeout_ms = v;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SshDefaults {
    pub port: u16,
    pub remote_gateway_port: u16,
    pub connect_timeout_ms: u64,
    pub keepalive_interval_secs: u64,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            port: 22,
            remote_gateway_port: 18789,
            connect_timeout_ms: 15000,
            keepalive_interval_secs: 15,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SshDefaultsLayer {
    pub port: Option<u16>,
    pub remote_gateway_port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub keepalive_interval_secs: Option<u64>,
}

impl SshDefaults {
    fn apply(&mut self, layer: SshDefaultsLayer) {
        if let Some(v) = layer.port {
            self.port = v;
        }
        if let Some(v) = layer.remote_gateway_port {
            self.remote_gateway_port = v;
        }
        if let Some(v) = layer.connect_timeout_ms {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = layer.keepalive_interval_secs {
            self.keepalive_interval_secs = v;
        }
    }
}

/// Reconnect backoff and health-check tuning. The defaults are product
/// constants, not protocol requirements, so they stay configurable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub backoff_base_secs: f64,
    pub backoff_factor: f64,
    pub backoff_cap_secs: f64,
    pub health_interval_secs: u64,
    pub health_timeout_secs: u64,
    pub health_failure_threshold: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: 0.5,
            backoff_factor: 1.7,
            backoff_cap_secs: 8.0,
            health_interval_secs: 15,
            health_timeout_secs: 5,
            health_failure_threshold: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ReconnectConfigLayer {
    pub backoff_base_secs: Option<f64>,
    pub backoff_factor: Option<f64>,
    pub backoff_cap_secs: Option<f64>,
    pub health_interval_secs: Option<u64>,
    pub health_timeout_secs: Option<u64>,
    pub health_failure_threshold: Option<u32>,
}

impl ReconnectConfig {
    fn apply(&mut self, layer: ReconnectConfigLayer) {
        if let Some(v) = layer.backoff_base_secs {
            self.backoff_base_secs = v;
        }
        if let Some(v) = layer.backoff_factor {
            self.backoff_factor = v;
        }
        if let Some(v) = layer.backoff_cap_secs {
            self.backoff_cap_secs = v;
        }
        if let Some(v) = layer.health_interval_secs {
            self.health_interval_secs = v;
        }
        if let Some(v) = layer.health_timeout_secs {
            self.health_timeout_secs = v;
        }
        if let Some(v) = layer.health_failure_threshold {
            self.health_failure_threshold = v;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub stdout: bool,
    pub file_max_count: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            stdout: true,
            file_max_count: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct LoggingConfigLayer {
    pub level: Option<String>,
    pub json: Option<bool>,
    pub stdout: Option<bool>,
    pub file_max_count: Option<usize>,
}

impl LoggingConfig {
    fn apply(&mut self, layer: LoggingConfigLayer) {
        if let Some(v) = layer.level {
            self.level = v;
        }
        if let Some(v) = layer.json {
            self.json = v;
        }
        if let Some(v) = layer.stdout {
            self.stdout = v;
        }
        if let Some(v) = layer.file_max_count {
            self.file_max_count = v;
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeychainConfig {
    pub use_encrypted_file_fallback: bool,
}

impl Default for KeychainConfig {
    fn default() -> Self {
        Self {
            use_encrypted_file_fallback: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct KeychainConfigLayer {
    pub use_encrypted_file_fallback: Option<bool>,
}

impl KeychainConfig {
    fn apply(&mut self, layer: KeychainConfigLayer) {
        if let Some(v) = layer.use_encrypted_file_fallback {
            self.use_encrypted_file_fallback = v;
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConfigManager {
    pub paths: AppPaths,
}

impl ConfigManager {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }

    pub fn load(&self, cwd: Option<&Path>, overrides: Option<AppConfigLayer>) -> Result<AppConfig> {
        let mut cfg = AppConfig::default();

        if self.paths.config_file.exists() {
            let layer = Self::load_layer(&self.paths.config_file)?;
            layer.apply_to(&mut cfg);
        }

        if let Some(dir) = cwd {
            let project_path = AppPaths::project_config_path(dir);
            if project_path.exists() {
                let layer = Self::load_layer(&project_path)?;
                layer.apply_to(&mut cfg);
            }
        }

        if let Some(layer) = overrides {
            layer.apply_to(&mut cfg);
        }

        Ok(cfg)
    }

    pub fn load_layer(path: &Path) -> Result<AppConfigLayer> {
        let content = fs::read_to_string(path)?;
        let layer: AppConfigLayer = toml::from_str(&content)?;
        Ok(layer)
    }

    pub fn save_default(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let cfg = AppConfig::default();
        let content = toml::to_string_pretty(&cfg).map_err(|e| anyhow::anyhow!(e))?;
        fs::write(&self.paths.config_file, content)?;
        Ok(())
    }

    pub fn save_config(&self, cfg: &AppConfig) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(cfg).map_err(|e| anyhow::anyhow!(e))?;
        fs::write(&self.paths.config_file, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_layer_overrides() {
        let mut cfg = AppConfig::default();
        let layer = AppConfigLayer {
            logging: Some(LoggingConfigLayer {
                level: Some("debug".to_string()),
                json: Some(true),
                stdout: Some(false),
                file_max_count: Some(3),
            }),
            reconnect: Some(ReconnectConfigLayer {
                backoff_base_secs: Some(1.0),
                backoff_factor: Some(2.0),
                backoff_cap_secs: Some(30.0),
                health_interval_secs: Some(60),
                health_timeout_secs: Some(10),
                health_failure_threshold: Some(5),
            }),
            ..Default::default()
        };
        layer.apply_to(&mut cfg);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert!(!cfg.logging.stdout);
        assert_eq!(cfg.reconnect.health_interval_secs, 60);
        assert_eq!(cfg.reconnect.health_failure_threshold, 5);
        assert_eq!(cfg.reconnect.backoff_cap_secs, 30.0);
    }

    #[test]
    fn defaults_match_product_tuning() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.reconnect.health_interval_secs, 15);
        assert_eq!(cfg.reconnect.health_timeout_secs, 5);
        assert_eq!(cfg.reconnect.health_failure_threshold, 3);
        assert_eq!(cfg.reconnect.backoff_base_secs, 0.5);
        assert_eq!(cfg.reconnect.backoff_factor, 1.7);
        assert_eq!(cfg.reconnect.backoff_cap_secs, 8.0);
    }
}
