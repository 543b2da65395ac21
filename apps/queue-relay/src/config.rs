use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

/// Environment variables with this prefix override the file, e.g.
/// `QUEUE_RELAY__ENDPOINT`.
pub const ENV_PREFIX: &str = "QUEUE_RELAY__";

const REDACTED: &str = "[REDACTED]";

/// Effective queue-relay configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Queue base URI, e.g. `https://ns.servicebus.windows.net/orders`
    pub endpoint: String,
    /// Value of the `Authorization` header (a shared-access signature)
    pub authorization: Option<String>,
    pub timeout_secs: u64,
    /// `http://host:port` proxy
    pub proxy: Option<String>,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    pub validate_certificates: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            authorization: None,
            timeout_secs: 30,
            proxy: None,
            log_level: "info".to_owned(),
            validate_certificates: true,
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("endpoint", &self.endpoint)
            .field("authorization", &self.authorization.as_ref().map(|_| REDACTED))
            .field("timeout_secs", &self.timeout_secs)
            .field("proxy", &self.proxy)
            .field("log_level", &self.log_level)
            .field("validate_certificates", &self.validate_certificates)
            .finish()
    }
}

/// Command-line overrides, the last configuration layer
#[derive(Debug, Default, Clone, clap::Args, Serialize)]
pub struct ConfigOverrides {
    /// Queue base URI
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// `Authorization` header value
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,

    /// Seconds to wait for response headers
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// `http://host:port` proxy
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Log filter (ignored when `RUST_LOG` is set)
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Verify server certificates
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate_certificates: Option<bool>,
}

impl RelayConfig {
    /// Layered load: defaults, then the YAML file (if any), then
    /// `QUEUE_RELAY__*` environment variables, then `overrides`.
    ///
    /// # Errors
    /// Returns an error if the file does not exist or a layer has values of
    /// the wrong type.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()
            .context("invalid queue-relay configuration")
    }

    /// Pretty JSON with the authorization value masked
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_redacted_json(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.authorization.is_some() {
            shown.authorization = Some(REDACTED.to_owned());
        }
        Ok(serde_json::to_string_pretty(&shown)?)
    }
}
