// WGDashboard API models
//
// Responses use `{ status, message, data }`. Traffic counters are floats in
// gigabytes; peers are identified by their public key.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Bytes per gigabyte as WGDashboard counts them.
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Format expected in schedule-job `date` values.
pub const JOB_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// WGDashboard response envelope.
#[derive(Debug, Deserialize)]
pub struct WgEnvelope<T> {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> WgEnvelope<T> {
    pub fn into_result(self) -> Result<Option<T>, Error> {
        if self.status {
            Ok(self.data)
        } else {
            Err(Error::Panel {
                message: self.message.unwrap_or_else(|| "request failed".into()),
            })
        }
    }
}

/// One WireGuard interface from `getWireguardConfigurations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WgConfiguration {
    pub name: String,
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub address: String,
    /// String or number depending on version.
    #[serde(default)]
    pub listen_port: serde_json::Value,
    #[serde(default)]
    pub total_peers: u64,
    #[serde(default)]
    pub connected_peers: u64,
}

/// `data` of `getWireguardConfigurationInfo`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationInfo {
    #[serde(default)]
    pub configuration_peers: Vec<Peer>,
    #[serde(default)]
    pub configuration_restricted_peers: Vec<Peer>,
}

impl ConfigurationInfo {
    /// Every peer, with restricted ones flagged.
    pub fn all_peers(self) -> Vec<(Peer, bool)> {
        self.configuration_peers
            .into_iter()
            .map(|p| (p, false))
            .chain(
                self.configuration_restricted_peers
                    .into_iter()
                    .map(|p| (p, true)),
            )
            .collect()
    }
}

/// One peer. `id` is the peer's public key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Peer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub allowed_ip: String,
    #[serde(default, rename = "DNS")]
    pub dns: String,
    #[serde(default)]
    pub endpoint_allowed_ip: String,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub keepalive: Option<u32>,
    #[serde(default)]
    pub preshared_key: String,
    /// Gigabytes since the last interface restart.
    #[serde(default)]
    pub total_receive: f64,
    #[serde(default)]
    pub total_sent: f64,
    /// Cumulative gigabytes across restarts.
    #[serde(default)]
    pub cumu_receive: f64,
    #[serde(default)]
    pub cumu_sent: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub latest_handshake: String,
    #[serde(default)]
    pub jobs: Vec<ScheduleJob>,
}

impl Peer {
    /// Received bytes (peer upload), cumulative plus current.
    pub fn received_bytes(&self) -> u64 {
        gb_to_bytes(self.cumu_receive + self.total_receive)
    }

    /// Sent bytes (peer download), cumulative plus current.
    pub fn sent_bytes(&self) -> u64 {
        gb_to_bytes(self.cumu_sent + self.total_sent)
    }
}

/// `POST /api/addPeers/{configuration}` body. Empty keys and addresses are
/// filled in by the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct AddPeerRequest {
    pub name: String,
    #[serde(rename = "bulkAdd")]
    pub bulk_add: bool,
    pub allowed_ips: Vec<String>,
    pub private_key: String,
    pub public_key: String,
    pub preshared_key: String,
    #[serde(rename = "DNS", skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_allowed_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

impl AddPeerRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bulk_add: false,
            allowed_ips: Vec::new(),
            private_key: String::new(),
            public_key: String::new(),
            preshared_key: String::new(),
            dns: None,
            endpoint_allowed_ip: None,
            keepalive: None,
            mtu: None,
        }
    }
}

/// `POST /api/updatePeerSettings/{configuration}` body.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSettings {
    pub id: String,
    pub name: String,
    pub private_key: String,
    #[serde(rename = "DNS")]
    pub dns: String,
    pub allowed_ip: String,
    pub endpoint_allowed_ip: String,
    pub preshared_key: String,
    pub mtu: u32,
    pub keepalive: u32,
}

impl PeerSettings {
    /// Start from a peer's current settings.
    pub fn from_peer(peer: &Peer) -> Self {
        Self {
            id: peer.id.clone(),
            name: peer.name.clone(),
            private_key: peer.private_key.clone(),
            dns: peer.dns.clone(),
            allowed_ip: peer.allowed_ip.clone(),
            endpoint_allowed_ip: peer.endpoint_allowed_ip.clone(),
            preshared_key: peer.preshared_key.clone(),
            mtu: peer.mtu.unwrap_or(1420),
            keepalive: peer.keepalive.unwrap_or(21),
        }
    }
}

/// A peer schedule job. WGDashboard evaluates these periodically and runs
/// `Action` once `Field Operator Value` holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduleJob {
    #[serde(rename = "JobID")]
    pub job_id: String,
    pub configuration: String,
    pub peer: String,
    /// `total_data` (GB) or `date`.
    pub field: String,
    /// `lgt` (greater than) or `lst` (less than).
    pub operator: String,
    pub value: String,
    #[serde(default)]
    pub creation_date: String,
    #[serde(default)]
    pub expire_date: Option<String>,
    /// `restrict` or `delete`.
    pub action: String,
}

/// `data` of `downloadPeer`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerFile {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file: String,
}

/// `data` of `systemStatus`. Shapes vary between releases, so only the
/// commonly present fields are typed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemStatus {
    #[serde(default)]
    pub cpu: CpuStatus,
    #[serde(default)]
    pub memory: MemoryStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStatus {
    #[serde(default)]
    pub cpu_percent: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MemoryStatus {
    #[serde(default)]
    pub virtual_memory: VirtualMemory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VirtualMemory {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub available: u64,
    #[serde(default)]
    pub percent: f64,
}

pub fn gb_to_bytes(gb: f64) -> u64 {
    if gb.is_finite() && gb > 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bytes = (gb * BYTES_PER_GB).round() as u64;
        bytes
    } else {
        0
    }
}

#[allow(clippy::cast_precision_loss)]
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn peer_traffic_adds_cumulative_counters() {
        let peer: Peer = serde_json::from_value(serde_json::json!({
            "id": "pk=", "name": "alice",
            "total_receive": 0.5, "cumu_receive": 0.5,
            "total_sent": 1.0
        }))
        .unwrap();
        assert_eq!(peer.received_bytes(), 1024 * 1024 * 1024);
        assert_eq!(peer.sent_bytes(), 1024 * 1024 * 1024);
    }

    #[test]
    fn negative_or_nan_gigabytes_clamp_to_zero() {
        assert_eq!(gb_to_bytes(-1.0), 0);
        assert_eq!(gb_to_bytes(f64::NAN), 0);
    }

    #[test]
    fn memory_status_uses_pascal_case_section() {
        let status: SystemStatus = serde_json::from_value(serde_json::json!({
            "cpu": { "cpu_percent": 7.5 },
            "memory": { "VirtualMemory": { "total": 100, "available": 40, "percent": 60.0 } }
        }))
        .unwrap();
        assert_eq!(status.memory.virtual_memory.total, 100);
    }

    #[test]
    fn add_peer_request_omits_unset_options() {
        let body = serde_json::to_value(AddPeerRequest::named("alice")).unwrap();
        assert_eq!(body["bulkAdd"], false);
        assert!(body.get("DNS").is_none());
        assert_eq!(body["allowed_ips"], serde_json::json!([]));
    }
}
