// X-UI / 3x-ui API models
//
// Inbounds carry their client list as a JSON *string* in `settings`, so
// clients are modelled separately and (de)serialized through that string.
// Unknown client keys are preserved in `extra` so edits round-trip.

use serde::{Deserialize, Serialize};

use crate::error::Error;

fn default_true() -> bool {
    true
}

/// One inbound from `GET {api}/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub id: i64,
    #[serde(default)]
    pub up: u64,
    #[serde(default)]
    pub down: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub remark: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub expiry_time: i64,
    /// `null` on inbounds without clients.
    #[serde(default)]
    pub client_stats: Option<Vec<ClientTraffic>>,
    #[serde(default)]
    pub listen: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub protocol: String,
    /// JSON-encoded [`InboundSettings`].
    #[serde(default)]
    pub settings: String,
    /// JSON-encoded stream settings (network, security, transport options).
    #[serde(default)]
    pub stream_settings: String,
    #[serde(default)]
    pub tag: String,
}

impl Inbound {
    /// Decode the embedded settings string.
    pub fn parsed_settings(&self) -> Result<InboundSettings, Error> {
        if self.settings.trim().is_empty() {
            return Ok(InboundSettings::default());
        }
        serde_json::from_str(&self.settings).map_err(|e| Error::Deserialization {
            message: format!("inbound {} settings: {e}", self.id),
            body: self.settings.clone(),
        })
    }

    /// Decode the embedded stream settings, `Null` when absent or invalid.
    pub fn parsed_stream(&self) -> serde_json::Value {
        serde_json::from_str(&self.stream_settings).unwrap_or(serde_json::Value::Null)
    }

    /// Traffic counters for the client with this email, if reported.
    pub fn stats_for(&self, email: &str) -> Option<&ClientTraffic> {
        self.client_stats
            .as_deref()
            .and_then(|stats| stats.iter().find(|s| s.email == email))
    }
}

/// Decoded `Inbound::settings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(default)]
    pub clients: Vec<InboundClient>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// One client inside an inbound's settings.
///
/// `email` is the panel-wide unique client name. `id` is the UUID for
/// VLESS/VMess, `password` the secret for Trojan/Shadowsocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundClient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Bytes, despite the name. `0` = unlimited.
    #[serde(default, rename = "totalGB")]
    pub total_gb: u64,
    /// Unix milliseconds. `0` = never; negative = relative, starts on first use.
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub limit_ip: u32,
    #[serde(default)]
    pub flow: String,
    #[serde(default)]
    pub sub_id: String,
    #[serde(default)]
    pub reset: u32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InboundClient {
    /// The identifier the panel expects in `updateClient`/`delClient` paths.
    pub fn key(&self, protocol: &str) -> &str {
        match protocol {
            "trojan" => self.password.as_deref().unwrap_or(&self.email),
            "shadowsocks" => &self.email,
            _ => self.id.as_deref().unwrap_or(&self.email),
        }
    }
}

/// Per-client traffic row (`clientStats` / `getClientTraffics`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTraffic {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub inbound_id: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub up: u64,
    #[serde(default)]
    pub down: u64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub total: u64,
}

/// Body for `addClient` / `updateClient`: the inbound id and a settings
/// string holding exactly the affected clients.
#[derive(Debug, Clone, Serialize)]
pub struct ClientPayload {
    pub id: i64,
    pub settings: String,
}

impl ClientPayload {
    pub fn new(inbound_id: i64, clients: &[InboundClient]) -> Result<Self, Error> {
        let settings = serde_json::json!({ "clients": clients });
        Ok(Self {
            id: inbound_id,
            settings: serde_json::to_string(&settings).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: String::new(),
            })?,
        })
    }
}

/// `POST /server/status` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub mem: Usage,
    #[serde(default)]
    pub disk: Usage,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub xray: XrayState,
    #[serde(default)]
    pub net_traffic: NetTraffic,
    #[serde(default)]
    pub tcp_count: u64,
    #[serde(default)]
    pub udp_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XrayState {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetTraffic {
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub recv: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn client_round_trips_unknown_fields() {
        let raw = r#"{"id":"u-1","email":"alice","enable":true,"totalGB":1024,"expiryTime":0,"tgId":"","subId":"s1","comment":"vip"}"#;
        let client: InboundClient = serde_json::from_str(raw).unwrap();
        assert_eq!(client.total_gb, 1024);
        assert_eq!(client.extra["comment"], "vip");

        let back = serde_json::to_value(&client).unwrap();
        assert_eq!(back["totalGB"], 1024);
        assert_eq!(back["tgId"], "");
        assert!(back.get("password").is_none());
    }

    #[test]
    fn client_key_depends_on_protocol() {
        let client: InboundClient =
            serde_json::from_str(r#"{"id":"uuid-1","password":"pw","email":"a"}"#).unwrap();
        assert_eq!(client.key("vless"), "uuid-1");
        assert_eq!(client.key("trojan"), "pw");
        assert_eq!(client.key("shadowsocks"), "a");
    }

    #[test]
    fn payload_embeds_settings_string() {
        let client: InboundClient = serde_json::from_str(r#"{"id":"u","email":"a"}"#).unwrap();
        let payload = ClientPayload::new(3, &[client]).unwrap();
        let settings: InboundSettings = serde_json::from_str(&payload.settings).unwrap();
        assert_eq!(payload.id, 3);
        assert_eq!(settings.clients[0].email, "a");
    }
}
