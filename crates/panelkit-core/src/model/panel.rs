// ── Panel configuration ──
//
// Owned by the persistence collaborator. Adapters receive an immutable copy
// and parse their own typed settings out of `extras` exactly once.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use strum::{Display, EnumIter, EnumString};
use url::Url;

use panelkit_api::{TlsMode, TransportConfig};

use crate::error::PanelError;

/// Supported backend families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
    Deserialize, serde::Serialize,
)]
#[strum(ascii_case_insensitive)]
pub enum PanelType {
    #[strum(to_string = "marzban")]
    #[serde(rename = "marzban")]
    Marzban,
    #[strum(to_string = "x-ui", serialize = "xui", serialize = "3x-ui")]
    #[serde(rename = "x-ui", alias = "xui", alias = "3x-ui")]
    XUi,
    #[strum(to_string = "s-ui", serialize = "sui")]
    #[serde(rename = "s-ui", alias = "sui")]
    SUi,
    #[strum(to_string = "wireguard", serialize = "wgdashboard", serialize = "wg-dashboard")]
    #[serde(rename = "wireguard", alias = "wgdashboard", alias = "wg-dashboard")]
    WireGuard,
    #[strum(to_string = "mikrotik", serialize = "routeros")]
    #[serde(rename = "mikrotik", alias = "routeros")]
    Mikrotik,
}

/// Login material. Which fields are required depends on the panel type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub api_token: Option<SecretString>,
}

/// Per-panel network limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub connect_secs: u64,
    pub request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Certificate handling for HTTPS panels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Verify against the system store. Off by default: self-signed panel
    /// certificates are the norm.
    pub verify: bool,
    /// PEM bundle to trust instead of the system store.
    pub ca_cert: Option<PathBuf>,
}

/// Everything an adapter needs to reach one panel.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub panel_type: PanelType,
    #[serde(default)]
    pub base_url: Option<Url>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub credentials: Credentials,
    /// Backend-specific settings, parsed by each adapter.
    #[serde(default)]
    pub extras: serde_json::Value,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub tls: TlsOptions,
}

impl PanelConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, panel_type: PanelType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            panel_type,
            base_url: None,
            host: None,
            port: None,
            credentials: Credentials::default(),
            extras: serde_json::Value::Null,
            timeouts: Timeouts::default(),
            tls: TlsOptions::default(),
        }
    }

    // ── Builders ─────────────────────────────────────────────────────

    pub fn with_base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.host = Some(host.into());
        self.port = port;
        self
    }

    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials.username = Some(username.into());
        self.credentials.password = Some(SecretString::from(password.into()));
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.credentials.api_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn with_extras(mut self, extras: serde_json::Value) -> Self {
        self.extras = extras;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    // ── Accessors used by adapters ───────────────────────────────────

    /// Base URL for HTTP panels: `base_url`, else `https://host[:port]/`.
    pub fn http_base(&self) -> Result<Url, PanelError> {
        if let Some(url) = &self.base_url {
            return Ok(url.clone());
        }
        let host = self.host.as_deref().ok_or_else(|| {
            PanelError::configuration(format!("panel {:?} needs base_url or host", self.name))
        })?;
        let raw = match self.port {
            Some(port) => format!("https://{host}:{port}/"),
            None => format!("https://{host}/"),
        };
        Url::parse(&raw).map_err(|e| PanelError::configuration(format!("invalid host {host:?}: {e}")))
    }

    /// Host name for socket panels: `host`, else the host of `base_url`.
    pub fn socket_host(&self) -> Result<String, PanelError> {
        self.host
            .clone()
            .or_else(|| {
                self.base_url
                    .as_ref()
                    .and_then(|u| u.host_str().map(str::to_owned))
            })
            .ok_or_else(|| {
                PanelError::configuration(format!("panel {:?} needs host", self.name))
            })
    }

    pub fn username(&self) -> Result<&str, PanelError> {
        self.credentials
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                PanelError::configuration(format!("panel {:?} needs a username", self.name))
            })
    }

    pub fn password(&self) -> Result<&SecretString, PanelError> {
        self.credentials.password.as_ref().ok_or_else(|| {
            PanelError::configuration(format!("panel {:?} needs a password", self.name))
        })
    }

    /// Parse `extras` into an adapter's typed settings. Absent extras
    /// yield the defaults.
    pub fn settings<T: DeserializeOwned + Default>(&self) -> Result<T, PanelError> {
        if self.extras.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.extras.clone()).map_err(|e| {
            PanelError::configuration(format!("invalid settings for panel {:?}: {e}", self.name))
        })
    }

    pub fn transport(&self) -> TransportConfig {
        let tls = match (&self.tls.ca_cert, self.tls.verify) {
            (Some(path), _) => TlsMode::CustomCa(path.clone()),
            (None, true) => TlsMode::System,
            (None, false) => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            connect_timeout: Duration::from_secs(self.timeouts.connect_secs),
            timeout: Duration::from_secs(self.timeouts.request_secs),
        }
    }

    /// Hash of every field that affects a live adapter. A cached adapter
    /// is rebuilt when this changes.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.id.hash(&mut hasher);
        self.panel_type.hash(&mut hasher);
        self.base_url.as_ref().map(Url::as_str).hash(&mut hasher);
        self.host.hash(&mut hasher);
        self.port.hash(&mut hasher);
        self.credentials.username.hash(&mut hasher);
        self.credentials
            .password
            .as_ref()
            .map(|s| s.expose_secret())
            .hash(&mut hasher);
        self.credentials
            .api_token
            .as_ref()
            .map(|s| s.expose_secret())
            .hash(&mut hasher);
        self.extras.to_string().hash(&mut hasher);
        self.timeouts.hash(&mut hasher);
        self.tls.hash(&mut hasher);
        hasher.finish()
    }
}
