// Marzban API models
//
// Field names follow the panel's snake_case JSON. Optional fields default
// liberally: Marzban versions differ in which keys they include.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// `POST /api/admin/token` response (OAuth2 password flow).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// User object as returned by `/api/user/{username}` and `/api/users`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarzbanUser {
    pub username: String,
    /// `active`, `disabled`, `limited`, `expired`, or `on_hold`.
    #[serde(default)]
    pub status: String,
    /// Combined up+down traffic in bytes; Marzban does not split directions.
    #[serde(default)]
    pub used_traffic: u64,
    #[serde(default)]
    pub lifetime_used_traffic: u64,
    /// Bytes; `null` or `0` means unlimited.
    #[serde(default)]
    pub data_limit: Option<u64>,
    /// Unix seconds; `null` or `0` means never.
    #[serde(default)]
    pub expire: Option<i64>,
    #[serde(default)]
    pub data_limit_reset_strategy: Option<String>,
    #[serde(default)]
    pub proxies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub inbounds: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub subscription_url: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub online_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// `GET /api/users` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsersResponse {
    #[serde(default)]
    pub users: Vec<MarzbanUser>,
    #[serde(default)]
    pub total: u64,
}

/// `POST /api/user` body.
#[derive(Debug, Clone, Serialize)]
pub struct UserCreate {
    pub username: String,
    pub proxies: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub inbounds: BTreeMap<String, Vec<String>>,
    /// `None` serializes as `null` (never expires).
    pub expire: Option<i64>,
    pub data_limit: u64,
    pub data_limit_reset_strategy: String,
    pub status: String,
    pub note: String,
}

/// `PUT /api/user/{username}` body. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserModify {
    /// `Some(0)` clears the expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// `GET /api/system` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemStats {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub mem_total: u64,
    #[serde(default)]
    pub mem_used: u64,
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub total_user: u64,
    #[serde(default)]
    pub users_active: u64,
    #[serde(default)]
    pub incoming_bandwidth: u64,
    #[serde(default)]
    pub outgoing_bandwidth: u64,
}

/// One entry of `GET /api/inbounds`, which is keyed by protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundInfo {
    pub tag: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub tls: Option<String>,
    /// Integer or string depending on version (`"443"`, `443`, `"2053,2083"`).
    #[serde(default)]
    pub port: serde_json::Value,
}

pub type InboundsByProtocol = HashMap<String, Vec<InboundInfo>>;

/// `GET /api/user/{username}/usage` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUsageResponse {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub usages: Vec<NodeUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeUsage {
    #[serde(default)]
    pub node_id: Option<i64>,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub used_traffic: u64,
}
