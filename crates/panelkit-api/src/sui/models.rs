// S-UI API models
//
// S-UI stores one client across many inbounds. Its per-protocol credentials
// live in `config`, keyed by sing-box protocol name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// One client from `GET {api}/clients`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiClient {
    /// Assigned by the panel; `0` on create.
    #[serde(default)]
    pub id: u64,
    #[serde(default = "default_true")]
    pub enable: bool,
    pub name: String,
    /// Protocol name -> credential object (`uuid`, `password`, `flow`, ...).
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    /// Inbound ids this client is attached to.
    #[serde(default)]
    pub inbounds: Vec<u64>,
    #[serde(default)]
    pub links: Vec<ClientLink>,
    /// Bytes, `0` = unlimited.
    #[serde(default)]
    pub volume: u64,
    /// Unix seconds, `0` = never.
    #[serde(default)]
    pub expiry: i64,
    #[serde(default)]
    pub up: u64,
    #[serde(default)]
    pub down: u64,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub group: String,
}

/// A ready-made share link the panel renders for a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientLink {
    #[serde(default)]
    pub remark: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub uri: String,
}

/// `obj` of `GET {api}/clients`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientsPayload {
    #[serde(default)]
    pub clients: Vec<SuiClient>,
}

/// One inbound from `GET {api}/inbounds`.
#[derive(Debug, Clone, Deserialize)]
pub struct SuiInbound {
    pub id: u64,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub listen: String,
    #[serde(default)]
    pub listen_port: u16,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// `obj` of `GET {api}/inbounds`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundsPayload {
    #[serde(default)]
    pub inbounds: Vec<SuiInbound>,
}

/// `obj` of `GET {api}/status?r=cpu,mem,net,sys,sbd`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuiStatus {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub mem: MemUsage,
    #[serde(default)]
    pub net: NetCounters,
    #[serde(default)]
    pub sys: SysInfo,
    #[serde(default)]
    pub sbd: SingBoxState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemUsage {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetCounters {
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub recv: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SysInfo {
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub cpu_count: u32,
    /// Seconds since boot.
    #[serde(default)]
    pub uptime: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SingBoxState {
    #[serde(default)]
    pub running: bool,
}

/// `action` of `POST {api}/save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    New,
    Edit,
    Delete,
}

impl SaveAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Edit => "edit",
            Self::Delete => "del",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn client_decodes_panel_shape() {
        let raw = serde_json::json!({
            "id": 4, "enable": true, "name": "alice",
            "config": { "vless": { "name": "alice", "uuid": "u-1", "flow": "" } },
            "inbounds": [1, 2],
            "links": [{ "remark": "main", "type": "local", "uri": "vless://u-1@h:443" }],
            "volume": 1000, "expiry": 1_900_000_000, "up": 3, "down": 4,
            "desc": "", "group": "vip"
        });
        let client: SuiClient = serde_json::from_value(raw).unwrap();
        assert_eq!(client.inbounds, vec![1, 2]);
        assert_eq!(client.links[0].kind, "local");
        assert_eq!(client.config["vless"]["uuid"], "u-1");
    }

    #[test]
    fn status_tolerates_missing_sections() {
        let status: SuiStatus = serde_json::from_str(r#"{"cpu":12.5}"#).unwrap();
        assert!((status.cpu - 12.5).abs() < f64::EPSILON);
        assert!(!status.sbd.running);
    }
}
