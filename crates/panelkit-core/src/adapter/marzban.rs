// ── Marzban adapter ──
//
// Marzban has native per-user endpoints, so no listing scans are needed.
// Traffic is reported as one combined counter; it is surfaced as download.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use panelkit_api::marzban::{InboundInfo, MarzbanUser, UserCreate, UserModify};
use panelkit_api::{MarzbanAuth, MarzbanClient};

use crate::adapter::{PanelAdapter, count, degrade, log_degraded, user_error};
use crate::error::PanelError;
use crate::model::{
    BackendIdentity, Capability, CreatedUser, Expiry, Inbound, PanelConfig, PanelInfo, PanelType,
    ProvisionedUser, SystemStats, UsageStats, UserPatch, UserSpec,
};

const PAGE_SIZE: u64 = 500;

/// Settings read from `PanelConfig::extras`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarzbanSettings {
    /// Proxy protocols enabled for new users.
    pub protocols: Vec<String>,
    /// Inbound tags per protocol; empty means all inbounds.
    pub inbounds: BTreeMap<String, Vec<String>>,
    /// Session TTL when the token's `exp` claim is unreadable.
    pub token_ttl_secs: u64,
    pub data_limit_reset_strategy: String,
}

impl Default for MarzbanSettings {
    fn default() -> Self {
        Self {
            protocols: vec!["vless".into()],
            inbounds: BTreeMap::new(),
            token_ttl_secs: 600,
            data_limit_reset_strategy: "no_reset".into(),
        }
    }
}

pub struct MarzbanAdapter {
    panel_id: String,
    client: MarzbanClient,
    settings: MarzbanSettings,
}

impl MarzbanAdapter {
    fn to_user(user: &MarzbanUser) -> ProvisionedUser {
        let identity = user
            .proxies
            .values()
            .find_map(|proxy| proxy.get("id").and_then(serde_json::Value::as_str))
            .map_or(BackendIdentity::None, |id| {
                BackendIdentity::ClientUuid(id.to_owned())
            });
        ProvisionedUser {
            username: user.username.clone(),
            data_limit_bytes: user.data_limit.unwrap_or(0),
            expiry: Expiry::from_unix_secs(user.expire.unwrap_or(0)),
            enabled: user.status != "disabled",
            used_upload: 0,
            used_download: user.used_traffic,
            identity,
        }
    }

    /// Subscription URL made absolute, else the first share link.
    fn access_link(&self, user: &MarzbanUser) -> Option<String> {
        if let Some(sub) = user.subscription_url.as_deref().filter(|s| !s.is_empty()) {
            if Url::parse(sub).is_ok() {
                return Some(sub.to_owned());
            }
            if let Ok(url) = self.client.base_url().join(sub.trim_start_matches('/')) {
                return Some(url.to_string());
            }
        }
        user.links.first().cloned()
    }

    async fn fetch(&self, username: &str) -> Result<MarzbanUser, PanelError> {
        self.client
            .get_user(username)
            .await
            .map_err(user_error(username))
    }

    async fn modify(&self, username: &str, body: &UserModify) -> Result<MarzbanUser, PanelError> {
        self.client
            .modify_user(username, body)
            .await
            .map_err(user_error(username))
    }

    async fn try_list(&self) -> Result<Vec<ProvisionedUser>, PanelError> {
        let mut users = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.client.list_users(offset, PAGE_SIZE).await?;
            let fetched = count(page.users.len());
            users.extend(page.users.iter().map(Self::to_user));
            offset += fetched;
            if fetched < PAGE_SIZE || (page.total > 0 && offset >= page.total) {
                return Ok(users);
            }
        }
    }
}

fn inbound_port(info: &InboundInfo) -> Option<u16> {
    match &info.port {
        serde_json::Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        serde_json::Value::String(s) => s.split(',').next()?.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl PanelAdapter for MarzbanAdapter {
    fn configure(config: &PanelConfig) -> Result<Self, PanelError> {
        let settings: MarzbanSettings = config.settings()?;
        if settings.protocols.is_empty() {
            return Err(PanelError::configuration("marzban: at least one protocol is required"));
        }
        let auth = MarzbanAuth::new(
            config.username()?,
            config.password()?.clone(),
            Duration::from_secs(settings.token_ttl_secs),
        );
        let client = MarzbanClient::new(&config.http_base()?, auth, &config.transport())?;
        Ok(Self {
            panel_id: config.id.clone(),
            client,
            settings,
        })
    }

    fn panel_type(&self) -> PanelType {
        PanelType::Marzban
    }

    fn panel_id(&self) -> &str {
        &self.panel_id
    }

    async fn test_connection(&self) -> bool {
        self.client.get_system().await.is_ok()
    }

    async fn panel_info(&self) -> PanelInfo {
        match self.client.get_system().await {
            Ok(system) => {
                let mut info = PanelInfo::reachable(PanelType::Marzban);
                info.version = system.version;
                info.cpu_percent = Some(system.cpu_usage);
                info.memory_used = Some(system.mem_used);
                info.memory_total = Some(system.mem_total);
                info.details
                    .insert("total_users".into(), system.total_user.to_string());
                info.details
                    .insert("active_users".into(), system.users_active.to_string());
                info
            }
            Err(e) => {
                log_degraded(&self.panel_id, Capability::GetPanelInfo, &PanelError::from(e));
                PanelInfo::unreachable(PanelType::Marzban)
            }
        }
    }

    async fn inbounds(&self) -> Vec<Inbound> {
        let result = self.client.get_inbounds().await.map_err(PanelError::from).map(|by_protocol| {
            let mut inbounds: Vec<Inbound> = by_protocol
                .into_iter()
                .flat_map(|(protocol, infos)| {
                    infos.into_iter().map(move |info| Inbound {
                        id: info.tag.clone(),
                        port: inbound_port(&info),
                        tag: info.tag,
                        protocol: protocol.clone(),
                        enabled: true,
                    })
                })
                .collect();
            inbounds.sort_by(|a, b| a.tag.cmp(&b.tag));
            inbounds
        });
        degrade(&self.panel_id, Capability::GetInbounds, result)
    }

    async fn system_stats(&self) -> SystemStats {
        let result = self.client.get_system().await.map_err(PanelError::from).map(|s| SystemStats {
            cpu_percent: Some(s.cpu_usage),
            memory_used: Some(s.mem_used),
            memory_total: Some(s.mem_total),
            uptime_secs: None,
            total_users: Some(s.total_user),
            active_users: Some(s.users_active),
            incoming_bytes: Some(s.incoming_bandwidth),
            outgoing_bytes: Some(s.outgoing_bandwidth),
        });
        degrade(&self.panel_id, Capability::GetSystemStats, result)
    }

    async fn create_user(&self, spec: &UserSpec) -> Result<CreatedUser, PanelError> {
        let body = UserCreate {
            username: spec.username.clone(),
            proxies: self
                .settings
                .protocols
                .iter()
                .map(|p| (p.clone(), serde_json::json!({})))
                .collect(),
            inbounds: self.settings.inbounds.clone(),
            expire: spec.expiry.unix_secs(),
            data_limit: spec.data_limit_bytes,
            data_limit_reset_strategy: self.settings.data_limit_reset_strategy.clone(),
            status: if spec.enabled { "active" } else { "disabled" }.into(),
            note: spec.note.clone().unwrap_or_default(),
        };

        let created = self.client.create_user(&body).await.map_err(|e| {
            if e.is_conflict() {
                PanelError::duplicate(&spec.username)
            } else {
                e.into()
            }
        })?;

        info!(panel = %self.panel_id, username = %created.username, "marzban user created");
        Ok(CreatedUser {
            access_link: self.access_link(&created),
            user: Self::to_user(&created),
            secret: None,
        })
    }

    async fn update_user(
        &self,
        username: &str,
        patch: &UserPatch,
    ) -> Result<ProvisionedUser, PanelError> {
        if patch.is_empty() {
            return Ok(Self::to_user(&self.fetch(username).await?));
        }
        let body = UserModify {
            expire: patch.expiry.map(|e| e.unix_secs().unwrap_or(0)),
            data_limit: patch.data_limit_bytes,
            status: patch
                .enabled
                .map(|on| if on { "active" } else { "disabled" }.to_owned()),
            note: patch.note.clone(),
        };
        let updated = self.modify(username, &body).await?;
        debug!(panel = %self.panel_id, username, "marzban user updated");
        Ok(Self::to_user(&updated))
    }

    async fn delete_user(&self, username: &str) -> Result<bool, PanelError> {
        match self.client.delete_user(username).await {
            Ok(()) => {
                info!(panel = %self.panel_id, username, "marzban user deleted");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(panel = %self.panel_id, username, "delete of absent user");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn enable_user(&self, username: &str) -> Result<(), PanelError> {
        let body = UserModify {
            status: Some("active".into()),
            ..UserModify::default()
        };
        self.modify(username, &body).await.map(drop)
    }

    async fn disable_user(&self, username: &str) -> Result<(), PanelError> {
        let body = UserModify {
            status: Some("disabled".into()),
            ..UserModify::default()
        };
        self.modify(username, &body).await.map(drop)
    }

    async fn reset_user_data(&self, username: &str) -> Result<(), PanelError> {
        self.client
            .reset_user(username)
            .await
            .map(drop)
            .map_err(user_error(username))
    }

    async fn get_user(&self, username: &str) -> Option<ProvisionedUser> {
        match self.fetch(username).await {
            Ok(user) => Some(Self::to_user(&user)),
            Err(PanelError::UserNotFound { .. }) => None,
            Err(e) => degrade(&self.panel_id, Capability::GetUser, Err(e)),
        }
    }

    async fn get_all_users(&self) -> Vec<ProvisionedUser> {
        degrade(&self.panel_id, Capability::GetAllUsers, self.try_list().await)
    }

    async fn user_config(&self, username: &str) -> Result<Option<String>, PanelError> {
        let user = self.fetch(username).await?;
        Ok(self.access_link(&user))
    }

    async fn user_stats(&self, username: &str) -> Result<UsageStats, PanelError> {
        let user = self.fetch(username).await?;
        Ok(UsageStats::from(&Self::to_user(&user)))
    }

    async fn session_issued_at(&self) -> Option<DateTime<Utc>> {
        self.client.session_issued_at().await
    }

    async fn disconnect(&self) {
        self.client.disconnect().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn user(json: serde_json::Value) -> MarzbanUser {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn combined_traffic_is_download() {
        let u = MarzbanAdapter::to_user(&user(serde_json::json!({
            "username": "alice", "status": "limited", "used_traffic": 42,
            "data_limit": null, "expire": 0,
            "proxies": { "vless": { "id": "0b1c", "flow": "" } }
        })));
        assert_eq!(u.used_download, 42);
        assert_eq!(u.data_limit_bytes, 0);
        assert!(u.expiry.is_never());
        assert!(u.enabled);
        assert_eq!(u.identity, BackendIdentity::ClientUuid("0b1c".into()));
    }

    #[test]
    fn string_ports_take_first_entry() {
        let info: InboundInfo =
            serde_json::from_value(serde_json::json!({ "tag": "t", "port": "2053,2083" })).unwrap();
        assert_eq!(inbound_port(&info), Some(2053));
    }

    #[test]
    fn missing_credentials_fail_configuration() {
        let config = PanelConfig::new("m1", "edge", PanelType::Marzban)
            .with_base_url(Url::parse("https://m.example.com").unwrap());
        assert!(matches!(
            MarzbanAdapter::configure(&config),
            Err(PanelError::Configuration { .. })
        ));
    }
}
