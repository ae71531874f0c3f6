// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Service Configuration Types
//
// Defines the configuration manifest for an ICMS node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - HTTP server and database settings
// - Hawk credentials shared with ICMS-HMRC
// - CHIEF sending, email delivery and document storage
// - Feature switches and observability settings
// - Users and organisations seeded at startup

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::user::{Organisation, User};

pub const API_VERSION: &str = "icms.trade.gov.uk/v1";
pub const KIND: &str = "IcmsConfig";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcmsConfigManifest {
    /// API version (must be "icms.trade.gov.uk/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "IcmsConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: IcmsConfigSpec,
}

pub type IcmsConfig = IcmsConfigManifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcmsConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL persistence; in-memory repositories when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub hawk: HawkConfig,

    #[serde(default)]
    pub chief: ChiefConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub documents: DocumentsConfig,

    #[serde(default)]
    pub features: FeaturesConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; supports `env:VAR`
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Credentials ICMS-HMRC uses to sign requests to us, and we use to sign ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HawkConfig {
    #[serde(default)]
    pub auth_id: String,

    /// Shared secret; supports `env:VAR`
    #[serde(default)]
    pub auth_key: String,

    #[serde(default = "default_timestamp_skew")]
    pub timestamp_skew_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChiefConfig {
    /// Send issued licences to CHIEF through ICMS-HMRC
    #[serde(default)]
    pub send_licence_to_chief: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_update_licence_endpoint")]
    pub update_licence_endpoint: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailBackend {
    Log,
    Notify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_email_backend")]
    pub backend: EmailBackend,

    #[serde(default = "default_email_from")]
    pub from: String,

    /// GOV.UK Notify API key; supports `env:VAR`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_template_id: Option<String>,

    #[serde(default = "default_notify_base_url")]
    pub notify_base_url: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Test-only shortcut that fakes CHIEF replies. Never enable in production.
    #[serde(default)]
    pub allow_bypass_chief: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Prometheus exporter port; disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub organisations: Vec<Organisation>,

    #[serde(default)]
    pub users: Vec<User>,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_connections() -> u32 {
    5
}

fn default_timestamp_skew() -> i64 {
    60
}

fn default_update_licence_endpoint() -> String {
    "/mail/update-licence/".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_email_backend() -> EmailBackend {
    EmailBackend::Log
}

fn default_email_from() -> String {
    "enquiries.ilb@example.gov.uk".to_string()
}

fn default_notify_base_url() -> String {
    "https://api.notifications.service.gov.uk".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./icms-documents")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for HawkConfig {
    fn default() -> Self {
        Self {
            auth_id: String::new(),
            auth_key: String::new(),
            timestamp_skew_seconds: default_timestamp_skew(),
        }
    }
}

impl Default for ChiefConfig {
    fn default() -> Self {
        Self {
            send_licence_to_chief: false,
            base_url: None,
            update_licence_endpoint: default_update_licence_endpoint(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            backend: default_email_backend(),
            from: default_email_from(),
            notify_api_key: None,
            notify_template_id: None,
            notify_base_url: default_notify_base_url(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for IcmsConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "icms-local".to_string(),
                version: None,
                labels: None,
            },
            spec: IcmsConfigSpec::default(),
        }
    }
}

/// Resolve `env:VAR` indirection; other values are returned unchanged.
pub fn resolve_secret(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var)
            .map_err(|_| anyhow::anyhow!("Environment variable '{}' referenced by configuration is not set", var)),
        None => Ok(value.to_string()),
    }
}

impl IcmsConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. ICMS_CONFIG_PATH environment variable
    /// 2. ./icms-config.yaml (working directory)
    /// 3. ~/.icms/config.yaml (user home)
    /// 4. /etc/icms/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ICMS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./icms-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".icms").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/icms/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, falling back to defaults
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ICMS_DATABASE_URL") {
            tracing::info!("Environment override: ICMS_DATABASE_URL");
            match self.spec.database.as_mut() {
                Some(db) => db.url = url,
                None => {
                    self.spec.database = Some(DatabaseConfig {
                        url,
                        max_connections: default_max_connections(),
                    })
                }
            }
        }

        if let Ok(id) = std::env::var("ICMS_HAWK_AUTH_ID") {
            tracing::info!("Environment override: ICMS_HAWK_AUTH_ID");
            self.spec.hawk.auth_id = id;
        }

        if let Ok(key) = std::env::var("ICMS_HAWK_AUTH_KEY") {
            tracing::info!("Environment override: ICMS_HAWK_AUTH_KEY");
            self.spec.hawk.auth_key = key;
        }

        if let Ok(port) = std::env::var("ICMS_PORT") {
            match port.parse() {
                Ok(port) => {
                    tracing::info!("Environment override: ICMS_PORT={}", port);
                    self.spec.server.port = port;
                }
                Err(_) => tracing::warn!("Invalid value for ICMS_PORT: '{}'. Ignoring.", port),
            }
        }

        for (var, target) in [
            ("ICMS_ALLOW_BYPASS_CHIEF", &mut self.spec.features.allow_bypass_chief),
            ("ICMS_SEND_LICENCE_TO_CHIEF", &mut self.spec.chief.send_licence_to_chief),
        ] {
            if let Ok(val) = std::env::var(var) {
                match val.to_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => {
                        tracing::info!("Environment override: {}=true", var);
                        *target = true;
                    }
                    "false" | "0" | "no" | "off" => {
                        tracing::info!("Environment override: {}=false", var);
                        *target = false;
                    }
                    _ => {
                        tracing::warn!("Invalid value for {}: '{}'. Expected true/false. Ignoring.", var, val);
                    }
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.hawk.auth_id.is_empty() || self.spec.hawk.auth_key.is_empty() {
            anyhow::bail!("spec.hawk.auth_id and spec.hawk.auth_key must be set");
        }

        if self.spec.hawk.timestamp_skew_seconds <= 0 {
            anyhow::bail!("spec.hawk.timestamp_skew_seconds must be positive");
        }

        if self.spec.chief.send_licence_to_chief && self.spec.chief.base_url.is_none() {
            anyhow::bail!("spec.chief.base_url is required when send_licence_to_chief is enabled");
        }

        if self.spec.email.backend == EmailBackend::Notify
            && (self.spec.email.notify_api_key.is_none() || self.spec.email.notify_template_id.is_none())
        {
            anyhow::bail!("spec.email.notify_api_key and notify_template_id are required for the notify backend");
        }

        if self.spec.email.max_attempts == 0 {
            anyhow::bail!("spec.email.max_attempts must be at least 1");
        }

        if let Some(db) = &self.spec.database {
            if db.url.is_empty() {
                anyhow::bail!("spec.database.url cannot be empty");
            }
        }

        Ok(())
    }
}
