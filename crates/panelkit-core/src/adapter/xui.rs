// ── X-UI / 3x-ui adapter ──
//
// Clients live inside inbound settings, keyed by email. The panel has no
// lookup-by-email endpoint, so every user-scoped call lists all inbounds
// and scans their clients: O(total clients) per call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use panelkit_api::xui::{self, Inbound as XuiInbound, InboundClient, InboundSettings};
use panelkit_api::{XuiAuth, XuiClient};

use crate::adapter::links::share_link;
use crate::adapter::{PanelAdapter, degrade, log_degraded, random_token};
use crate::error::PanelError;
use crate::model::{
    BackendIdentity, Capability, CreatedUser, Expiry, Inbound, PanelConfig, PanelInfo, PanelType,
    ProvisionedUser, SystemStats, UsageStats, UserPatch, UserSpec,
};

/// Settings read from `PanelConfig::extras`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XuiSettings {
    /// Inbound new clients are added to. Required.
    pub inbound_id: Option<i64>,
    pub api_path: String,
    pub session_ttl_secs: u64,
    /// Host written into share links; defaults to the panel host.
    pub link_host: Option<String>,
    /// VLESS flow for new clients (`xtls-rprx-vision`).
    pub flow: String,
    /// Concurrent IP limit for new clients, `0` = unlimited.
    pub limit_ip: u32,
}

impl Default for XuiSettings {
    fn default() -> Self {
        Self {
            inbound_id: None,
            api_path: xui::DEFAULT_API_PATH.into(),
            session_ttl_secs: 600,
            link_host: None,
            flow: String::new(),
            limit_ip: 0,
        }
    }
}

/// `expiryTime` is epoch millis, `0` for never, or a negated duration
/// that starts counting at the client's first connection.
fn expiry_from_millis(millis: i64) -> Expiry {
    if millis < 0 {
        return Expiry::AfterFirstUse(Duration::from_millis(millis.unsigned_abs()));
    }
    Expiry::from_unix_millis(millis)
}

fn expiry_millis(expiry: Expiry) -> i64 {
    match expiry {
        Expiry::Never => 0,
        Expiry::At(at) => at.timestamp_millis(),
        Expiry::AfterFirstUse(d) => i64::try_from(d.as_millis()).map_or(i64::MIN, |ms| -ms),
    }
}

/// A client located by the listing scan.
struct Located {
    inbound: XuiInbound,
    settings: InboundSettings,
    client: InboundClient,
}

pub struct XuiAdapter {
    panel_id: String,
    client: XuiClient,
    inbound_id: i64,
    link_host: String,
    settings: XuiSettings,
}

impl XuiAdapter {
    fn to_user(inbound: &XuiInbound, client: &InboundClient) -> ProvisionedUser {
        let stats = inbound.stats_for(&client.email);
        let identity = client
            .id
            .clone()
            .or_else(|| client.password.clone())
            .map_or(BackendIdentity::None, BackendIdentity::ClientUuid);
        ProvisionedUser {
            username: client.email.clone(),
            data_limit_bytes: client.total_gb,
            expiry: expiry_from_millis(client.expiry_time),
            enabled: client.enable,
            used_upload: stats.map_or(0, |s| s.up),
            used_download: stats.map_or(0, |s| s.down),
            identity,
        }
    }

    /// Scan every inbound for the client with this email.
    async fn locate(&self, username: &str) -> Result<Option<Located>, PanelError> {
        for inbound in self.client.list_inbounds().await? {
            let settings = inbound.parsed_settings()?;
            if let Some(client) = settings.clients.iter().find(|c| c.email == username).cloned() {
                return Ok(Some(Located {
                    inbound,
                    settings,
                    client,
                }));
            }
        }
        Ok(None)
    }

    async fn require(&self, username: &str) -> Result<Located, PanelError> {
        self.locate(username)
            .await?
            .ok_or_else(|| PanelError::user_not_found(username))
    }

    async fn write_back(&self, found: &Located) -> Result<(), PanelError> {
        let key = found.client.key(&found.inbound.protocol).to_owned();
        self.client
            .update_client(found.inbound.id, &key, &found.client)
            .await?;
        Ok(())
    }

    /// A fresh client entry with the credential the protocol needs.
    fn new_client(&self, protocol: &str, spec: &UserSpec) -> InboundClient {
        let secret = uuid::Uuid::new_v4().to_string();
        let (id, password) = match protocol {
            "trojan" | "shadowsocks" => (None, Some(spec.password.clone().unwrap_or(secret))),
            _ => (Some(secret), None),
        };
        InboundClient {
            id,
            password,
            email: spec.username.clone(),
            enable: spec.enabled,
            total_gb: spec.data_limit_bytes,
            expiry_time: expiry_millis(spec.expiry),
            limit_ip: self.settings.limit_ip,
            flow: if protocol == "vless" {
                self.settings.flow.clone()
            } else {
                String::new()
            },
            sub_id: random_token(16),
            reset: 0,
            extra: serde_json::Map::new(),
        }
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<(), PanelError> {
        let mut found = self.require(username).await?;
        found.client.enable = enabled;
        self.write_back(&found).await
    }

    async fn try_list(&self) -> Result<Vec<ProvisionedUser>, PanelError> {
        let mut users = Vec::new();
        for inbound in self.client.list_inbounds().await? {
            let settings = inbound.parsed_settings()?;
            users.extend(settings.clients.iter().map(|c| Self::to_user(&inbound, c)));
        }
        Ok(users)
    }
}

#[async_trait]
impl PanelAdapter for XuiAdapter {
    fn configure(config: &PanelConfig) -> Result<Self, PanelError> {
        let settings: XuiSettings = config.settings()?;
        let inbound_id = settings
            .inbound_id
            .ok_or_else(|| PanelError::configuration("x-ui: inbound_id is required"))?;
        let base = config.http_base()?;
        let link_host = settings
            .link_host
            .clone()
            .or_else(|| base.host_str().map(str::to_owned))
            .ok_or_else(|| PanelError::configuration("x-ui: cannot derive link host"))?;

        let auth = XuiAuth::new(
            config.username()?,
            config.password()?.clone(),
            Duration::from_secs(settings.session_ttl_secs),
        );
        let client = XuiClient::new(&base, auth, &settings.api_path, &config.transport())?;
        Ok(Self {
            panel_id: config.id.clone(),
            client,
            inbound_id,
            link_host,
            settings,
        })
    }

    fn panel_type(&self) -> PanelType {
        PanelType::XUi
    }

    fn panel_id(&self) -> &str {
        &self.panel_id
    }

    async fn test_connection(&self) -> bool {
        self.client.list_inbounds().await.is_ok()
    }

    async fn panel_info(&self) -> PanelInfo {
        match self.client.server_status().await {
            Ok(status) => {
                let mut info = PanelInfo::reachable(PanelType::XUi);
                info.version = Some(status.xray.version.clone()).filter(|v| !v.is_empty());
                info.uptime_secs = Some(status.uptime);
                info.cpu_percent = Some(status.cpu);
                info.memory_used = Some(status.mem.current);
                info.memory_total = Some(status.mem.total);
                info.details.insert("xray_state".into(), status.xray.state);
                info
            }
            Err(e) => {
                log_degraded(&self.panel_id, Capability::GetPanelInfo, &PanelError::from(e));
                PanelInfo::unreachable(PanelType::XUi)
            }
        }
    }

    async fn inbounds(&self) -> Vec<Inbound> {
        let result = self.client.list_inbounds().await.map_err(PanelError::from).map(|list| {
            list.into_iter()
                .map(|i| Inbound {
                    id: i.id.to_string(),
                    tag: i.remark,
                    protocol: i.protocol,
                    port: Some(i.port),
                    enabled: i.enable,
                })
                .collect()
        });
        degrade(&self.panel_id, Capability::GetInbounds, result)
    }

    async fn system_stats(&self) -> SystemStats {
        let result = self.client.server_status().await.map_err(PanelError::from).map(|s| SystemStats {
            cpu_percent: Some(s.cpu),
            memory_used: Some(s.mem.current),
            memory_total: Some(s.mem.total),
            uptime_secs: Some(s.uptime),
            total_users: None,
            active_users: None,
            incoming_bytes: Some(s.net_traffic.recv),
            outgoing_bytes: Some(s.net_traffic.sent),
        });
        degrade(&self.panel_id, Capability::GetSystemStats, result)
    }

    async fn create_user(&self, spec: &UserSpec) -> Result<CreatedUser, PanelError> {
        let inbounds = self.client.list_inbounds().await?;

        for inbound in &inbounds {
            if inbound.parsed_settings()?.clients.iter().any(|c| c.email == spec.username) {
                return Err(PanelError::duplicate(&spec.username));
            }
        }
        let target = inbounds
            .into_iter()
            .find(|i| i.id == self.inbound_id)
            .ok_or_else(|| {
                PanelError::configuration(format!("x-ui: inbound {} does not exist", self.inbound_id))
            })?;

        let new_client = self.new_client(&target.protocol, spec);
        self.client
            .add_client(target.id, &new_client)
            .await
            .map_err(|e| {
                if e.backend_message().is_some_and(|m| m.contains("Duplicate email")) {
                    PanelError::duplicate(&spec.username)
                } else {
                    e.into()
                }
            })?;
        info!(panel = %self.panel_id, username = %spec.username, inbound = target.id, "x-ui client added");

        let settings = target.parsed_settings()?;
        Ok(CreatedUser {
            access_link: share_link(&target, &settings, &new_client, &self.link_host),
            user: Self::to_user(&target, &new_client),
            secret: None,
        })
    }

    async fn update_user(
        &self,
        username: &str,
        patch: &UserPatch,
    ) -> Result<ProvisionedUser, PanelError> {
        let mut found = self.require(username).await?;
        if patch.is_empty() {
            return Ok(Self::to_user(&found.inbound, &found.client));
        }
        if let Some(limit) = patch.data_limit_bytes {
            found.client.total_gb = limit;
        }
        if let Some(expiry) = patch.expiry {
            found.client.expiry_time = expiry_millis(expiry);
        }
        if let Some(enabled) = patch.enabled {
            found.client.enable = enabled;
        }
        if let Some(note) = &patch.note {
            found
                .client
                .extra
                .insert("comment".into(), serde_json::Value::String(note.clone()));
        }
        self.write_back(&found).await?;
        debug!(panel = %self.panel_id, username, "x-ui client updated");
        Ok(Self::to_user(&found.inbound, &found.client))
    }

    async fn delete_user(&self, username: &str) -> Result<bool, PanelError> {
        let Some(found) = self.locate(username).await? else {
            debug!(panel = %self.panel_id, username, "delete of absent user");
            return Ok(false);
        };
        let key = found.client.key(&found.inbound.protocol);
        self.client.delete_client(found.inbound.id, key).await?;
        info!(panel = %self.panel_id, username, "x-ui client deleted");
        Ok(true)
    }

    async fn enable_user(&self, username: &str) -> Result<(), PanelError> {
        self.set_enabled(username, true).await
    }

    async fn disable_user(&self, username: &str) -> Result<(), PanelError> {
        self.set_enabled(username, false).await
    }

    async fn reset_user_data(&self, username: &str) -> Result<(), PanelError> {
        let found = self.require(username).await?;
        self.client
            .reset_client_traffic(found.inbound.id, &found.client.email)
            .await?;
        Ok(())
    }

    async fn get_user(&self, username: &str) -> Option<ProvisionedUser> {
        let found = degrade(&self.panel_id, Capability::GetUser, self.locate(username).await)?;
        Some(Self::to_user(&found.inbound, &found.client))
    }

    async fn get_all_users(&self) -> Vec<ProvisionedUser> {
        degrade(&self.panel_id, Capability::GetAllUsers, self.try_list().await)
    }

    async fn user_config(&self, username: &str) -> Result<Option<String>, PanelError> {
        let found = self.require(username).await?;
        Ok(share_link(
            &found.inbound,
            &found.settings,
            &found.client,
            &self.link_host,
        ))
    }

    async fn user_stats(&self, username: &str) -> Result<UsageStats, PanelError> {
        let found = self.require(username).await?;
        Ok(UsageStats::from(&Self::to_user(&found.inbound, &found.client)))
    }

    async fn session_issued_at(&self) -> Option<DateTime<Utc>> {
        self.client.session_issued_at().await
    }

    async fn disconnect(&self) {
        self.client.disconnect().await;
    }
}
