use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use url::Url;
use utmbridge_crm::{CrmClientConfig, CustomFieldIds, OAuthClientConfig};

use crate::reconcile::ReconcilePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// CRM account settings (required)
    pub crm: CrmConfig,
    /// OAuth integration credentials. When absent the service runs in
    /// access-only mode and never refreshes tokens.
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if !self.server.webhook_path.starts_with('/') {
            return Err("server.webhook_path must start with '/'".into());
        }
        // CRM validations
        if !matches!(self.crm.base_url.scheme(), "http" | "https") {
            return Err("crm.base_url must be an http(s) URL".into());
        }
        if self.crm.request_timeout_ms == 0 {
            return Err("crm.request_timeout_ms must be > 0".into());
        }
        let names = [
            "utm_source",
            "utm_medium",
            "utm_campaign",
            "utm_content",
            "utm_placement",
        ];
        for (name, id) in names.iter().zip(self.crm.fields.ids()) {
            if id <= 0 {
                return Err(format!("crm.fields.{name} must be a positive field id"));
            }
        }
        // OAuth validation
        if let Some(ref oauth) = self.oauth {
            if oauth.client_id.trim().is_empty() {
                return Err("oauth.client_id must not be empty".into());
            }
            if oauth.client_secret.trim().is_empty() {
                return Err("oauth.client_secret must not be empty".into());
            }
            if oauth.redirect_uri.trim().is_empty() {
                return Err("oauth.redirect_uri must not be empty".into());
            }
        }
        if self.credentials.path.as_os_str().is_empty() {
            return Err("credentials.path must not be empty".into());
        }
        // Reconcile validations
        if self.reconcile.max_attempts == 0 {
            return Err("reconcile.max_attempts must be > 0".into());
        }
        if self.reconcile.max_refreshes == 0 {
            return Err("reconcile.max_refreshes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn refresh_enabled(&self) -> bool {
        self.oauth.is_some()
    }

    pub fn crm_client_config(&self) -> CrmClientConfig {
        CrmClientConfig {
            base_url: self.crm.base_url.clone(),
            fields: self.crm.fields,
            request_timeout: self.crm.request_timeout(),
            update_delay: Duration::from_millis(self.reconcile.update_delay_ms),
        }
    }

    pub fn oauth_client_config(&self) -> Option<OAuthClientConfig> {
        self.oauth.as_ref().map(|oauth| OAuthClientConfig {
            base_url: self.crm.base_url.clone(),
            client_id: oauth.client_id.clone(),
            client_secret: oauth.client_secret.clone(),
            redirect_uri: oauth.redirect_uri.clone(),
            request_timeout: self.crm.request_timeout(),
        })
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            max_attempts: self.reconcile.max_attempts,
            poll_interval: Duration::from_millis(self.reconcile.poll_interval_ms),
            max_refreshes: self.reconcile.max_refreshes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path the form provider posts submissions to.
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}
fn default_webhook_path() -> String {
    "/webhook/typeform".into()
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_path: default_webhook_path(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Account URL, e.g. `https://example.kommo.com`
    pub base_url: Url,
    /// Timeout for each outbound CRM request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Lead custom-field ids receiving the attribution values
    pub fields: CustomFieldIds,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl CrmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Prefer UTMBRIDGE__OAUTH__CLIENT_SECRET over writing it to the file
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// JSON file holding `access_token` and optionally `refresh_token`
    #[serde(default = "default_credentials_path")]
    pub path: PathBuf,
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("tokens.json")
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: default_credentials_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Contact searches before giving up on the lead
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait between searches that found nothing
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wait before writing to a freshly discovered lead
    #[serde(default = "default_update_delay_ms")]
    pub update_delay_ms: u64,
    /// Token refreshes allowed per reconciliation
    #[serde(default = "default_max_refreshes")]
    pub max_refreshes: u32,
}

fn default_max_attempts() -> u32 {
    10
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_update_delay_ms() -> u64 {
    1_000
}
fn default_max_refreshes() -> u32 {
    3
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            update_delay_ms: default_update_delay_ms(),
            max_refreshes: default_max_refreshes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("utmbridge.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., UTMBRIDGE__CRM__BASE_URL=https://acme.kommo.com
        builder = builder.add_source(
            Environment::with_prefix("UTMBRIDGE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
