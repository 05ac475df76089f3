//! Panel definitions for panelkit.
//!
//! A `panels.toml` file (merged with `PANELKIT_*` environment variables),
//! credential resolution (env var, then keyring, then plaintext), and
//! translation to `panelkit_core::PanelConfig`. [`ConfigRepository`] serves
//! the result as a `PanelRepository` for the provisioning façade.
//!
//! ```toml
//! [defaults]
//! timeout = 30
//! connect_timeout = 5
//!
//! [panels.berlin]
//! type = "marzban"
//! base_url = "https://panel.example.com:8000/"
//! username = "admin"
//! password_env = "BERLIN_PASSWORD"
//!
//! [panels.berlin.extras]
//! protocols = ["vless", "trojan"]
//! ```

mod repository;

pub use repository::ConfigRepository;

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use panelkit_core::{PanelConfig, PanelError, PanelType, Timeouts, TlsOptions};

/// Keyring service name. Accounts are `<panel>/<field>`.
pub const KEYRING_SERVICE: &str = "panelkit";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for panel '{panel}'")]
    NoCredentials { panel: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<ConfigError> for PanelError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level `panels.toml`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// Panels keyed by display name.
    #[serde(default)]
    pub panels: BTreeMap<String, PanelEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Accept invalid certificates. Self-signed panels are the norm.
    #[serde(default = "default_true")]
    pub insecure: bool,

    /// Consult the system keyring for secrets.
    #[serde(default = "default_true")]
    pub keyring: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            insecure: true,
            keyring: true,
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_true() -> bool {
    true
}

/// One `[panels.<name>]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PanelEntry {
    /// Stable id. Defaults to the table name.
    pub id: Option<String>,

    /// Backend family: "marzban", "x-ui", "s-ui", "wireguard" or "mikrotik".
    #[serde(rename = "type")]
    pub panel_type: PanelType,

    /// Panel URL for HTTP backends.
    pub base_url: Option<String>,

    /// Host (and optional port) when no URL is given; required for MikroTik.
    pub host: Option<String>,
    pub port: Option<u16>,

    pub username: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// API token (plaintext, prefer keyring or env var).
    pub api_token: Option<String>,

    /// Environment variable holding the API token.
    pub api_token_env: Option<String>,

    /// PEM bundle to trust instead of the system store.
    pub ca_cert: Option<PathBuf>,

    /// Override `defaults.insecure`.
    pub insecure: Option<bool>,

    /// Override `defaults.timeout`.
    pub timeout: Option<u64>,

    /// Override `defaults.connect_timeout`.
    pub connect_timeout: Option<u64>,

    /// Adapter-specific settings, handed through untouched.
    #[serde(default)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl PanelEntry {
    pub fn new(panel_type: PanelType) -> Self {
        Self {
            id: None,
            panel_type,
            base_url: None,
            host: None,
            port: None,
            username: None,
            password: None,
            password_env: None,
            api_token: None,
            api_token_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            connect_timeout: None,
            extras: serde_json::Map::new(),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "panelkit", "panelkit").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("panelkit");
            p.push("panels.toml");
            p
        },
        |dirs| dirs.config_dir().join("panels.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PANELKIT_").split("__"))
}

/// Load the config from the default path and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` and the environment.
///
/// A missing file is an empty config. Environment keys nest with a
/// double underscore: `PANELKIT_DEFAULTS__TIMEOUT`,
/// `PANELKIT_PANELS__BERLIN__PASSWORD`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading panel config");
    Ok(figment(path).extract()?)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent dirs.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(panel: &str, field: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{panel}/{field}"))
}

/// Look a secret up in order: named env var, keyring, plaintext.
fn resolve_secret(
    panel: &str,
    field: &str,
    env_name: Option<&str>,
    plaintext: Option<&str>,
    use_keyring: bool,
) -> Option<SecretString> {
    if let Some(val) = env_name.and_then(|name| std::env::var(name).ok()) {
        return Some(SecretString::from(val));
    }

    if use_keyring {
        if let Ok(secret) = keyring_entry(panel, field).and_then(|entry| entry.get_password()) {
            return Some(SecretString::from(secret));
        }
    }

    plaintext.map(|s| SecretString::from(s.to_owned()))
}

/// Store a secret in the keyring under `<panel>/<field>`.
///
/// `field` is `"password"` or `"api-token"`.
pub fn store_secret(panel: &str, field: &str, secret: &str) -> Result<(), ConfigError> {
    keyring_entry(panel, field)?.set_password(secret)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

fn invalid(name: &str, field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: format!("panels.{name}.{field}"),
        reason: reason.into(),
    }
}

/// Build a `PanelConfig` from one table, applying `defaults`.
pub fn entry_to_panel_config(
    name: &str,
    entry: &PanelEntry,
    defaults: &Defaults,
) -> Result<PanelConfig, ConfigError> {
    let id = entry.id.clone().unwrap_or_else(|| name.to_owned());
    let mut panel = PanelConfig::new(id, name, entry.panel_type);

    if let Some(raw) = &entry.base_url {
        let mut url = Url::parse(raw).map_err(|e| invalid(name, "base_url", e.to_string()))?;
        // Relative API paths join onto the last segment otherwise.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        panel = panel.with_base_url(url);
    }
    if let Some(host) = &entry.host {
        panel = panel.with_host(host, entry.port);
    }
    if panel.base_url.is_none() && panel.host.is_none() {
        return Err(invalid(name, "base_url", "either base_url or host is required"));
    }

    panel.credentials.username = entry.username.clone();
    panel.credentials.password = resolve_secret(
        name,
        "password",
        entry.password_env.as_deref(),
        entry.password.as_deref(),
        defaults.keyring,
    );
    panel.credentials.api_token = resolve_secret(
        name,
        "api-token",
        entry.api_token_env.as_deref(),
        entry.api_token.as_deref(),
        defaults.keyring,
    );
    if panel.credentials.password.is_none() && panel.credentials.api_token.is_none() {
        return Err(ConfigError::NoCredentials { panel: name.into() });
    }

    if !entry.extras.is_empty() {
        panel = panel.with_extras(serde_json::Value::Object(entry.extras.clone()));
    }

    panel.timeouts = Timeouts {
        connect_secs: entry.connect_timeout.unwrap_or(defaults.connect_timeout),
        request_secs: entry.timeout.unwrap_or(defaults.timeout),
    };
    panel.tls = TlsOptions {
        verify: !entry.insecure.unwrap_or(defaults.insecure),
        ca_cert: entry.ca_cert.clone(),
    };
    Ok(panel)
}

impl Config {
    /// Every panel, translated. Ids must be unique.
    pub fn panel_configs(&self) -> Result<Vec<PanelConfig>, ConfigError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.panels.len());
        for (name, entry) in &self.panels {
            let panel = entry_to_panel_config(name, entry, &self.defaults)?;
            if !seen.insert(panel.id.clone()) {
                return Err(invalid(name, "id", format!("duplicate panel id '{}'", panel.id)));
            }
            out.push(panel);
        }
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    const PANELS: &str = r#"
        [defaults]
        timeout = 20
        keyring = false

        [panels.berlin]
        type = "marzban"
        base_url = "https://panel.example.com:8000/dashboard"
        username = "admin"
        password = "plain"

        [panels.berlin.extras]
        protocols = ["vless", "trojan"]

        [panels.core]
        id = "r1"
        type = "routeros"
        host = "10.0.0.1"
        port = 8728
        username = "api"
        password = "pw"
        insecure = false
        connect_timeout = 2
    "#;

    fn load(jail: &Jail) -> Config {
        load_config_from(&jail.directory().join("panels.toml")).unwrap()
    }

    #[test]
    fn file_is_translated_with_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("panels.toml", PANELS)?;
            let panels = load(jail).panel_configs().unwrap();
            assert_eq!(panels.len(), 2);

            let berlin = &panels[0];
            assert_eq!(berlin.id, "berlin");
            assert_eq!(berlin.panel_type, PanelType::Marzban);
            assert_eq!(
                berlin.base_url.as_ref().unwrap().as_str(),
                "https://panel.example.com:8000/dashboard/"
            );
            assert_eq!(berlin.timeouts.request_secs, 20);
            assert_eq!(berlin.timeouts.connect_secs, 5);
            assert!(!berlin.tls.verify);
            assert_eq!(berlin.extras["protocols"][1], "trojan");

            let core = &panels[1];
            assert_eq!(core.id, "r1");
            assert_eq!(core.panel_type, PanelType::Mikrotik);
            assert_eq!(core.socket_host().unwrap(), "10.0.0.1");
            assert_eq!(core.port, Some(8728));
            assert_eq!(core.timeouts.connect_secs, 2);
            assert!(core.tls.verify);
            assert!(core.extras.is_null());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("panels.toml", PANELS)?;
            jail.set_env("PANELKIT_DEFAULTS__TIMEOUT", "45");
            let config = load(jail);
            assert_eq!(config.defaults.timeout, 45);
            Ok(())
        });
    }

    #[test]
    fn password_env_wins_over_plaintext() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "panels.toml",
                r#"
                [defaults]
                keyring = false

                [panels.edge]
                type = "x-ui"
                base_url = "https://edge.example.com/"
                username = "admin"
                password = "plain"
                password_env = "EDGE_PASSWORD"
                "#,
            )?;
            jail.set_env("EDGE_PASSWORD", "from-env");
            let panels = load(jail).panel_configs().unwrap();
            let password = panels[0].credentials.password.as_ref().unwrap();
            assert_eq!(password.expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn api_token_alone_is_enough() {
        let entry = PanelEntry {
            base_url: Some("https://wg.example.com/".into()),
            api_token: Some("key".into()),
            ..PanelEntry::new(PanelType::WireGuard)
        };
        let defaults = Defaults {
            keyring: false,
            ..Defaults::default()
        };
        let panel = entry_to_panel_config("wg", &entry, &defaults).unwrap();
        assert!(panel.credentials.password.is_none());
        assert_eq!(
            panel.credentials.api_token.as_ref().unwrap().expose_secret(),
            "key"
        );
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let entry = PanelEntry {
            base_url: Some("https://wg.example.com/".into()),
            ..PanelEntry::new(PanelType::WireGuard)
        };
        let defaults = Defaults {
            keyring: false,
            ..Defaults::default()
        };
        let err = entry_to_panel_config("wg", &entry, &defaults).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { ref panel } if panel == "wg"));
        assert!(matches!(PanelError::from(err), PanelError::Configuration { .. }));
    }

    #[test]
    fn address_is_required() {
        let entry = PanelEntry {
            password: Some("pw".into()),
            ..PanelEntry::new(PanelType::SUi)
        };
        let err = entry_to_panel_config("s", &entry, &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "panels.s.base_url"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let entry = PanelEntry {
            id: Some("same".into()),
            host: Some("10.0.0.1".into()),
            password: Some("pw".into()),
            ..PanelEntry::new(PanelType::Mikrotik)
        };
        let config = Config {
            defaults: Defaults {
                keyring: false,
                ..Defaults::default()
            },
            panels: BTreeMap::from([("a".into(), entry.clone()), ("b".into(), entry)]),
        };
        let err = config.panel_configs().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "panels.b.id"));
    }

    #[test]
    fn missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.panels.is_empty());
        assert_eq!(config.defaults.timeout, 30);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("panels.toml");
        let mut config = Config::default();
        config.panels.insert(
            "core".into(),
            PanelEntry {
                host: Some("10.0.0.1".into()),
                username: Some("api".into()),
                ..PanelEntry::new(PanelType::Mikrotik)
            },
        );
        save_config(&config, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[panels.core]"));
        assert!(written.contains("type = \"mikrotik\""));
    }
}
