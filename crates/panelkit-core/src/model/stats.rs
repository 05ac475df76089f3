// ── Panel-level read models ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::PanelType;

/// Version, uptime and resource usage. Fields the backend did not report
/// stay `None`; `reachable == false` means nothing could be fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelInfo {
    pub panel_type: PanelType,
    pub reachable: bool,
    pub version: Option<String>,
    pub uptime_secs: Option<u64>,
    pub cpu_percent: Option<f64>,
    pub memory_used: Option<u64>,
    pub memory_total: Option<u64>,
    /// Backend-specific extras (router identity, core state, ...).
    pub details: BTreeMap<String, String>,
}

impl PanelInfo {
    pub fn unreachable(panel_type: PanelType) -> Self {
        Self {
            panel_type,
            reachable: false,
            version: None,
            uptime_secs: None,
            cpu_percent: None,
            memory_used: None,
            memory_total: None,
            details: BTreeMap::new(),
        }
    }

    pub(crate) fn reachable(panel_type: PanelType) -> Self {
        Self {
            reachable: true,
            ..Self::unreachable(panel_type)
        }
    }
}

/// Aggregate backend metrics for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_percent: Option<f64>,
    pub memory_used: Option<u64>,
    pub memory_total: Option<u64>,
    pub uptime_secs: Option<u64>,
    pub total_users: Option<u64>,
    pub active_users: Option<u64>,
    /// Bytes received by the backend since its counters were last reset.
    pub incoming_bytes: Option<u64>,
    pub outgoing_bytes: Option<u64>,
}

/// A traffic entry point users attach to: proxy inbound, WireGuard
/// interface, or RouterOS profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    pub id: String,
    pub tag: String,
    pub protocol: String,
    pub port: Option<u16>,
    pub enabled: bool,
}
