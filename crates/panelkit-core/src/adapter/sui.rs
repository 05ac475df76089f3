// ── S-UI adapter ──
//
// S-UI has no lookup-by-name endpoint: user-scoped calls fetch the full
// client list and scan it, O(clients) per call. Writes replace the whole
// client object through the panel's `save` endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use panelkit_api::sui::{SaveAction, SuiClient};
use panelkit_api::{SuiApiClient, SuiAuth};

use crate::adapter::{PanelAdapter, count, degrade, log_degraded, random_token};
use crate::error::PanelError;
use crate::model::{
    BackendIdentity, Capability, CreatedUser, Expiry, Inbound, PanelConfig, PanelInfo, PanelType,
    ProvisionedUser, SystemStats, UsageStats, UserPatch, UserSpec,
};

/// Settings read from `PanelConfig::extras`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SuiSettings {
    /// Inbounds new clients join; empty means every inbound.
    pub inbound_ids: Vec<u64>,
    /// Overrides the API prefix (`api` for password login, `apiv2` for tokens).
    pub api_path: Option<String>,
    pub session_ttl_secs: u64,
    pub group: String,
}

impl Default for SuiSettings {
    fn default() -> Self {
        Self {
            inbound_ids: Vec::new(),
            api_path: None,
            session_ttl_secs: 600,
            group: String::new(),
        }
    }
}

pub struct SuiAdapter {
    panel_id: String,
    client: SuiApiClient,
    settings: SuiSettings,
}

impl SuiAdapter {
    fn to_user(client: &SuiClient) -> ProvisionedUser {
        ProvisionedUser {
            username: client.name.clone(),
            data_limit_bytes: client.volume,
            expiry: Expiry::from_unix_secs(client.expiry),
            enabled: client.enable,
            used_upload: client.up,
            used_download: client.down,
            identity: BackendIdentity::ClientId(client.id),
        }
    }

    /// Prefer the link rendered for the panel's own host.
    fn access_link(client: &SuiClient) -> Option<String> {
        client
            .links
            .iter()
            .find(|l| l.kind == "local")
            .or_else(|| client.links.first())
            .map(|l| l.uri.clone())
            .filter(|uri| !uri.is_empty())
    }

    /// Per-protocol credentials for a new client, one entry per sing-box
    /// inbound type S-UI knows.
    fn client_config(name: &str) -> BTreeMap<String, serde_json::Value> {
        let uuid = uuid::Uuid::new_v4().to_string();
        let password = random_token(16);
        let mut key = uuid::Uuid::new_v4().into_bytes().to_vec();
        key.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        let ss_password = STANDARD.encode(&key);

        BTreeMap::from([
            ("mixed".into(), json!({ "username": name, "password": password })),
            ("socks".into(), json!({ "username": name, "password": password })),
            ("http".into(), json!({ "username": name, "password": password })),
            ("shadowsocks".into(), json!({ "name": name, "password": ss_password })),
            ("vmess".into(), json!({ "name": name, "uuid": uuid, "alterId": 0 })),
            ("vless".into(), json!({ "name": name, "uuid": uuid, "flow": "" })),
            ("trojan".into(), json!({ "name": name, "password": password })),
            ("naive".into(), json!({ "username": name, "password": password })),
            ("hysteria2".into(), json!({ "name": name, "password": password })),
            ("tuic".into(), json!({ "name": name, "uuid": uuid, "password": password })),
        ])
    }

    async fn find(&self, username: &str) -> Result<Option<SuiClient>, PanelError> {
        Ok(self
            .client
            .list_clients()
            .await?
            .into_iter()
            .find(|c| c.name == username))
    }

    async fn require(&self, username: &str) -> Result<SuiClient, PanelError> {
        self.find(username)
            .await?
            .ok_or_else(|| PanelError::user_not_found(username))
    }

    async fn save(&self, action: SaveAction, client: &SuiClient) -> Result<(), PanelError> {
        self.client.save_client(action, client).await?;
        Ok(())
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<(), PanelError> {
        let mut client = self.require(username).await?;
        client.enable = enabled;
        self.save(SaveAction::Edit, &client).await
    }

    async fn target_inbounds(&self) -> Result<Vec<u64>, PanelError> {
        if !self.settings.inbound_ids.is_empty() {
            return Ok(self.settings.inbound_ids.clone());
        }
        Ok(self
            .client
            .list_inbounds()
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect())
    }
}

#[async_trait]
impl PanelAdapter for SuiAdapter {
    fn configure(config: &PanelConfig) -> Result<Self, PanelError> {
        let settings: SuiSettings = config.settings()?;
        let auth = match &config.credentials.api_token {
            Some(token) => SuiAuth::Token(token.clone()),
            None => SuiAuth::Password {
                username: config.username()?.to_owned(),
                password: config.password()?.clone(),
                ttl: Duration::from_secs(settings.session_ttl_secs),
            },
        };
        let client = SuiApiClient::new(
            &config.http_base()?,
            auth,
            settings.api_path.as_deref(),
            &config.transport(),
        )?;
        Ok(Self {
            panel_id: config.id.clone(),
            client,
            settings,
        })
    }

    fn panel_type(&self) -> PanelType {
        PanelType::SUi
    }

    fn panel_id(&self) -> &str {
        &self.panel_id
    }

    async fn test_connection(&self) -> bool {
        self.client.status().await.is_ok()
    }

    async fn panel_info(&self) -> PanelInfo {
        match self.client.status().await {
            Ok(status) => {
                let mut info = PanelInfo::reachable(PanelType::SUi);
                info.version = Some(status.sys.app_version).filter(|v| !v.is_empty());
                info.uptime_secs = Some(status.sys.uptime);
                info.cpu_percent = Some(status.cpu);
                info.memory_used = Some(status.mem.current);
                info.memory_total = Some(status.mem.total);
                info.details
                    .insert("sing_box_running".into(), status.sbd.running.to_string());
                if !status.sys.host_name.is_empty() {
                    info.details.insert("host_name".into(), status.sys.host_name);
                }
                info
            }
            Err(e) => {
                log_degraded(&self.panel_id, Capability::GetPanelInfo, &PanelError::from(e));
                PanelInfo::unreachable(PanelType::SUi)
            }
        }
    }

    async fn inbounds(&self) -> Vec<Inbound> {
        let result = self.client.list_inbounds().await.map_err(PanelError::from).map(|list| {
            list.into_iter()
                .map(|i| Inbound {
                    id: i.id.to_string(),
                    tag: i.tag,
                    protocol: i.kind,
                    port: Some(i.listen_port).filter(|p| *p != 0),
                    enabled: true,
                })
                .collect()
        });
        degrade(&self.panel_id, Capability::GetInbounds, result)
    }

    async fn system_stats(&self) -> SystemStats {
        let status = match self.client.status().await {
            Ok(status) => status,
            Err(e) => {
                log_degraded(&self.panel_id, Capability::GetSystemStats, &PanelError::from(e));
                return SystemStats::default();
            }
        };
        let clients = self.client.list_clients().await.ok();
        SystemStats {
            cpu_percent: Some(status.cpu),
            memory_used: Some(status.mem.current),
            memory_total: Some(status.mem.total),
            uptime_secs: Some(status.sys.uptime),
            total_users: clients.as_ref().map(|c| count(c.len())),
            active_users: clients.map(|c| count(c.iter().filter(|c| c.enable).count())),
            incoming_bytes: Some(status.net.recv),
            outgoing_bytes: Some(status.net.sent),
        }
    }

    async fn create_user(&self, spec: &UserSpec) -> Result<CreatedUser, PanelError> {
        if self.find(&spec.username).await?.is_some() {
            return Err(PanelError::duplicate(&spec.username));
        }

        let draft = SuiClient {
            id: 0,
            enable: spec.enabled,
            name: spec.username.clone(),
            config: Self::client_config(&spec.username),
            inbounds: self.target_inbounds().await?,
            links: Vec::new(),
            volume: spec.data_limit_bytes,
            expiry: spec.expiry.unix_secs().unwrap_or(0),
            up: 0,
            down: 0,
            desc: spec.note.clone().unwrap_or_default(),
            group: self.settings.group.clone(),
        };
        self.save(SaveAction::New, &draft).await?;
        info!(panel = %self.panel_id, username = %spec.username, "s-ui client created");

        // Re-read to pick up the assigned id and rendered links.
        let created = self.find(&spec.username).await?.unwrap_or(draft);
        Ok(CreatedUser {
            access_link: Self::access_link(&created),
            user: Self::to_user(&created),
            secret: None,
        })
    }

    async fn update_user(
        &self,
        username: &str,
        patch: &UserPatch,
    ) -> Result<ProvisionedUser, PanelError> {
        let mut client = self.require(username).await?;
        if patch.is_empty() {
            return Ok(Self::to_user(&client));
        }
        if let Some(limit) = patch.data_limit_bytes {
            client.volume = limit;
        }
        if let Some(expiry) = patch.expiry {
            client.expiry = expiry.unix_secs().unwrap_or(0);
        }
        if let Some(enabled) = patch.enabled {
            client.enable = enabled;
        }
        if let Some(note) = &patch.note {
            client.desc.clone_from(note);
        }
        self.save(SaveAction::Edit, &client).await?;
        debug!(panel = %self.panel_id, username, "s-ui client updated");
        Ok(Self::to_user(&client))
    }

    async fn delete_user(&self, username: &str) -> Result<bool, PanelError> {
        let Some(client) = self.find(username).await? else {
            debug!(panel = %self.panel_id, username, "delete of absent user");
            return Ok(false);
        };
        self.save(SaveAction::Delete, &client).await?;
        info!(panel = %self.panel_id, username, "s-ui client deleted");
        Ok(true)
    }

    async fn enable_user(&self, username: &str) -> Result<(), PanelError> {
        self.set_enabled(username, true).await
    }

    async fn disable_user(&self, username: &str) -> Result<(), PanelError> {
        self.set_enabled(username, false).await
    }

    async fn reset_user_data(&self, username: &str) -> Result<(), PanelError> {
        let mut client = self.require(username).await?;
        client.up = 0;
        client.down = 0;
        self.save(SaveAction::Edit, &client).await
    }

    async fn get_user(&self, username: &str) -> Option<ProvisionedUser> {
        degrade(&self.panel_id, Capability::GetUser, self.find(username).await)
            .as_ref()
            .map(Self::to_user)
    }

    async fn get_all_users(&self) -> Vec<ProvisionedUser> {
        let result = self.client.list_clients().await.map_err(PanelError::from);
        degrade(&self.panel_id, Capability::GetAllUsers, result)
            .iter()
            .map(Self::to_user)
            .collect()
    }

    async fn user_config(&self, username: &str) -> Result<Option<String>, PanelError> {
        Ok(Self::access_link(&self.require(username).await?))
    }

    async fn user_stats(&self, username: &str) -> Result<UsageStats, PanelError> {
        Ok(UsageStats::from(&Self::to_user(&self.require(username).await?)))
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

    #[test]
    fn generated_config_shares_one_uuid() {
        let config = SuiAdapter::client_config("alice");
        assert_eq!(config["vless"]["uuid"], config["vmess"]["uuid"]);
        assert_eq!(config["trojan"]["name"], "alice");
        assert_eq!(config["mixed"]["username"], "alice");
    }

    #[test]
    fn local_link_is_preferred() {
        let client: SuiClient = serde_json::from_value(json!({
            "name": "alice",
            "links": [
                { "type": "external", "uri": "vless://ext" },
                { "type": "local", "uri": "vless://local" }
            ]
        }))
        .unwrap();
        assert_eq!(SuiAdapter::access_link(&client).as_deref(), Some("vless://local"));
    }
}
