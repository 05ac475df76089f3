// ── WGDashboard adapter ──
//
// Users are peers of one WireGuard configuration, matched by peer name.
// Data limits and expiry live in WGDashboard schedule jobs that restrict
// the peer once the condition holds; "disabled" means restricted.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use panelkit_api::wgdashboard::{
    AddPeerRequest, JOB_DATE_FORMAT, Peer, ScheduleJob, bytes_to_gb, gb_to_bytes,
};
use panelkit_api::{WgAuth, WgDashboardClient};

use crate::adapter::{PanelAdapter, count, degrade, log_degraded};
use crate::error::PanelError;
use crate::model::{
    BackendIdentity, Capability, CreatedUser, Expiry, Inbound, PanelConfig, PanelInfo, PanelType,
    ProvisionedUser, SystemStats, UsageStats, UserPatch, UserSpec,
};

const FIELD_DATA: &str = "total_data";
const FIELD_DATE: &str = "date";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WgSettings {
    /// WireGuard interface peers are created on.
    pub configuration: String,
    pub dns: Option<String>,
    pub endpoint_allowed_ip: Option<String>,
    pub keepalive: Option<u32>,
    pub mtu: Option<u32>,
    pub session_ttl_secs: u64,
}

impl Default for WgSettings {
    fn default() -> Self {
        Self {
            configuration: "wg0".into(),
            dns: None,
            endpoint_allowed_ip: None,
            keepalive: None,
            mtu: None,
            session_ttl_secs: 600,
        }
    }
}

pub struct WireGuardAdapter {
    panel_id: String,
    client: WgDashboardClient,
    settings: WgSettings,
}

impl WireGuardAdapter {
    fn to_user(peer: &Peer, restricted: bool) -> ProvisionedUser {
        let limit = job_for(peer, FIELD_DATA)
            .and_then(|j| j.value.parse::<f64>().ok())
            .map_or(0, gb_to_bytes);
        let expiry = job_for(peer, FIELD_DATE)
            .and_then(|j| NaiveDateTime::parse_from_str(&j.value, JOB_DATE_FORMAT).ok())
            .map_or(Expiry::Never, |at| Expiry::At(at.and_utc()));
        ProvisionedUser {
            username: peer.name.clone(),
            data_limit_bytes: limit,
            expiry,
            enabled: !restricted,
            used_upload: peer.received_bytes(),
            used_download: peer.sent_bytes(),
            identity: BackendIdentity::PeerPublicKey(peer.id.clone()),
        }
    }

    async fn find(&self, username: &str) -> Result<Option<(Peer, bool)>, PanelError> {
        Ok(self
            .client
            .configuration_info(&self.settings.configuration)
            .await?
            .all_peers()
            .into_iter()
            .find(|(peer, _)| peer.name == username))
    }

    async fn require(&self, username: &str) -> Result<(Peer, bool), PanelError> {
        self.find(username)
            .await?
            .ok_or_else(|| PanelError::user_not_found(username))
    }

    fn job(&self, peer: &Peer, field: &str, value: String) -> ScheduleJob {
        ScheduleJob {
            job_id: uuid::Uuid::new_v4().to_string(),
            configuration: self.settings.configuration.clone(),
            peer: peer.id.clone(),
            field: field.to_owned(),
            operator: "lgt".into(),
            value,
            creation_date: String::new(),
            expire_date: None,
            action: "restrict".into(),
        }
    }

    /// Replace the peer's job on `field` with one for `value`; `None`
    /// removes it. The new job is saved before the old ones go, so a failed
    /// save leaves the previous limit in force.
    async fn replace_job(
        &self,
        peer: &Peer,
        field: &str,
        value: Option<String>,
    ) -> Result<(), PanelError> {
        if let Some(value) = value {
            self.client.save_job(&self.job(peer, field, value)).await?;
        }
        for existing in peer.jobs.iter().filter(|j| j.field == field) {
            self.client.delete_job(existing).await?;
        }
        Ok(())
    }

    async fn set_restricted(&self, username: &str, restricted: bool) -> Result<(), PanelError> {
        let (peer, _) = self.require(username).await?;
        let ids = [peer.id.as_str()];
        if restricted {
            self.client
                .restrict_peers(&self.settings.configuration, &ids)
                .await?;
        } else {
            self.client
                .allow_peers(&self.settings.configuration, &ids)
                .await?;
        }
        Ok(())
    }

    /// Everything after `add_peer`: read the generated keys back, attach
    /// limit jobs, apply the initial restriction and fetch the config file.
    async fn finish_create(&self, spec: &UserSpec) -> Result<CreatedUser, PanelError> {
        let (peer, _) = self.find(&spec.username).await?.ok_or_else(|| PanelError::Backend {
            message: format!("peer {:?} missing after add", spec.username),
            status: None,
        })?;
        info!(panel = %self.panel_id, username = %spec.username, peer = %peer.id, "wireguard peer created");

        if let Some(value) = limit_value(spec.data_limit_bytes) {
            self.client.save_job(&self.job(&peer, FIELD_DATA, value)).await?;
        }
        if let Some(value) = expiry_value(spec.expiry) {
            self.client.save_job(&self.job(&peer, FIELD_DATE, value)).await?;
        }
        if !spec.enabled {
            self.client
                .restrict_peers(&self.settings.configuration, &[peer.id.as_str()])
                .await?;
        }

        let config = self
            .client
            .download_peer(&self.settings.configuration, &peer.id)
            .await?;
        let (peer, restricted) = self.require(&spec.username).await?;
        Ok(CreatedUser {
            user: Self::to_user(&peer, restricted),
            access_link: Some(config.file).filter(|f| !f.is_empty()),
            secret: None,
        })
    }

    /// Remove a half-created peer. Failures are logged; the caller already
    /// has an error to report.
    async fn discard_peer(&self, username: &str) {
        let removed = match self.find(username).await {
            Ok(Some((peer, _))) => self
                .client
                .delete_peers(&self.settings.configuration, &[peer.id.as_str()])
                .await
                .map_err(PanelError::from),
            Ok(None) => return,
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => warn!(panel = %self.panel_id, username, "rolled back partially created peer"),
            Err(e) => warn!(panel = %self.panel_id, username, error = %e, "failed to roll back peer"),
        }
    }

    async fn try_list(&self) -> Result<Vec<ProvisionedUser>, PanelError> {
        Ok(self
            .client
            .configuration_info(&self.settings.configuration)
            .await?
            .all_peers()
            .iter()
            .map(|(peer, restricted)| Self::to_user(peer, *restricted))
            .collect())
    }
}

fn job_for<'a>(peer: &'a Peer, field: &str) -> Option<&'a ScheduleJob> {
    peer.jobs
        .iter()
        .find(|j| j.field == field && j.action == "restrict")
}

fn limit_value(bytes: u64) -> Option<String> {
    (bytes > 0).then(|| format!("{:.3}", bytes_to_gb(bytes)))
}

fn expiry_value(expiry: Expiry) -> Option<String> {
    match expiry {
        Expiry::Never | Expiry::AfterFirstUse(_) => None,
        Expiry::At(at) => Some(at.format(JOB_DATE_FORMAT).to_string()),
    }
}

#[async_trait]
impl PanelAdapter for WireGuardAdapter {
    fn configure(config: &PanelConfig) -> Result<Self, PanelError> {
        let settings: WgSettings = config.settings()?;
        if settings.configuration.is_empty() {
            return Err(PanelError::configuration(format!(
                "panel {:?} needs a WireGuard configuration name",
                config.name
            )));
        }
        let auth = match &config.credentials.api_token {
            Some(key) => WgAuth::ApiKey(key.clone()),
            None => WgAuth::Password {
                username: config.username()?.to_owned(),
                password: config.password()?.clone(),
                ttl: Duration::from_secs(settings.session_ttl_secs),
            },
        };
        let client = WgDashboardClient::new(&config.http_base()?, auth, &config.transport())?;
        Ok(Self {
            panel_id: config.id.clone(),
            client,
            settings,
        })
    }

    fn panel_type(&self) -> PanelType {
        PanelType::WireGuard
    }

    fn panel_id(&self) -> &str {
        &self.panel_id
    }

    async fn test_connection(&self) -> bool {
        self.client.version().await.is_ok()
    }

    async fn panel_info(&self) -> PanelInfo {
        let version = match self.client.version().await {
            Ok(version) => version,
            Err(e) => {
                log_degraded(&self.panel_id, Capability::GetPanelInfo, &PanelError::from(e));
                return PanelInfo::unreachable(PanelType::WireGuard);
            }
        };
        let mut info = PanelInfo::reachable(PanelType::WireGuard);
        info.version = Some(version).filter(|v| !v.is_empty());
        if let Ok(status) = self.client.system_status().await {
            let memory = status.memory.virtual_memory;
            info.cpu_percent = Some(status.cpu.cpu_percent);
            info.memory_total = Some(memory.total);
            info.memory_used = Some(memory.total.saturating_sub(memory.available));
        }
        info.details
            .insert("configuration".into(), self.settings.configuration.clone());
        info
    }

    async fn inbounds(&self) -> Vec<Inbound> {
        let result = self.client.configurations().await.map_err(PanelError::from).map(|list| {
            list.into_iter()
                .map(|c| Inbound {
                    port: match &c.listen_port {
                        serde_json::Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
                        serde_json::Value::String(s) => s.parse().ok(),
                        _ => None,
                    },
                    id: c.name.clone(),
                    tag: c.name,
                    protocol: "wireguard".into(),
                    enabled: c.status,
                })
                .collect()
        });
        degrade(&self.panel_id, Capability::GetInbounds, result)
    }

    async fn system_stats(&self) -> SystemStats {
        let status = match self.client.system_status().await {
            Ok(status) => status,
            Err(e) => {
                log_degraded(&self.panel_id, Capability::GetSystemStats, &PanelError::from(e));
                return SystemStats::default();
            }
        };
        let memory = status.memory.virtual_memory;
        let mut stats = SystemStats {
            cpu_percent: Some(status.cpu.cpu_percent),
            memory_used: Some(memory.total.saturating_sub(memory.available)),
            memory_total: Some(memory.total),
            ..SystemStats::default()
        };
        if let Ok(info) = self
            .client
            .configuration_info(&self.settings.configuration)
            .await
        {
            let peers = info.all_peers();
            stats.total_users = Some(count(peers.len()));
            stats.active_users = Some(count(peers.iter().filter(|(_, r)| !r).count()));
            stats.incoming_bytes = Some(peers.iter().map(|(p, _)| p.received_bytes()).sum());
            stats.outgoing_bytes = Some(peers.iter().map(|(p, _)| p.sent_bytes()).sum());
        }
        stats
    }

    async fn create_user(&self, spec: &UserSpec) -> Result<CreatedUser, PanelError> {
        if self.find(&spec.username).await?.is_some() {
            return Err(PanelError::duplicate(&spec.username));
        }

        let mut request = AddPeerRequest::named(&spec.username);
        request.dns.clone_from(&self.settings.dns);
        request
            .endpoint_allowed_ip
            .clone_from(&self.settings.endpoint_allowed_ip);
        request.keepalive = self.settings.keepalive;
        request.mtu = self.settings.mtu;
        self.client
            .add_peer(&self.settings.configuration, &request)
            .await?;

        match self.finish_create(spec).await {
            Ok(created) => Ok(created),
            Err(e) => {
                self.discard_peer(&spec.username).await;
                Err(e)
            }
        }
    }

    async fn update_user(
        &self,
        username: &str,
        patch: &UserPatch,
    ) -> Result<ProvisionedUser, PanelError> {
        let (peer, restricted) = self.require(username).await?;
        if patch.is_empty() {
            return Ok(Self::to_user(&peer, restricted));
        }
        if let Some(limit) = patch.data_limit_bytes {
            self.replace_job(&peer, FIELD_DATA, limit_value(limit)).await?;
        }
        if let Some(expiry) = patch.expiry {
            self.replace_job(&peer, FIELD_DATE, expiry_value(expiry)).await?;
        }
        // `enabled == restricted` means the state has to flip.
        if patch.enabled == Some(restricted) {
            self.set_restricted(username, !restricted).await?;
        }
        debug!(panel = %self.panel_id, username, "wireguard peer updated");
        let (peer, restricted) = self.require(username).await?;
        Ok(Self::to_user(&peer, restricted))
    }

    async fn delete_user(&self, username: &str) -> Result<bool, PanelError> {
        let Some((peer, _)) = self.find(username).await? else {
            debug!(panel = %self.panel_id, username, "delete of absent user");
            return Ok(false);
        };
        self.client
            .delete_peers(&self.settings.configuration, &[peer.id.as_str()])
            .await?;
        info!(panel = %self.panel_id, username, "wireguard peer deleted");
        Ok(true)
    }

    async fn enable_user(&self, username: &str) -> Result<(), PanelError> {
        self.set_restricted(username, false).await
    }

    async fn disable_user(&self, username: &str) -> Result<(), PanelError> {
        self.set_restricted(username, true).await
    }

    async fn get_user(&self, username: &str) -> Option<ProvisionedUser> {
        degrade(&self.panel_id, Capability::GetUser, self.find(username).await)
            .map(|(peer, restricted)| Self::to_user(&peer, restricted))
    }

    async fn get_all_users(&self) -> Vec<ProvisionedUser> {
        degrade(&self.panel_id, Capability::GetAllUsers, self.try_list().await)
    }

    async fn user_config(&self, username: &str) -> Result<Option<String>, PanelError> {
        let (peer, _) = self.require(username).await?;
        let file = self
            .client
            .download_peer(&self.settings.configuration, &peer.id)
            .await?;
        Ok(Some(file.file).filter(|f| !f.is_empty()))
    }

    async fn user_stats(&self, username: &str) -> Result<UsageStats, PanelError> {
        let (peer, restricted) = self.require(username).await?;
        Ok(UsageStats::from(&Self::to_user(&peer, restricted)))
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

    fn peer_with_jobs(jobs: serde_json::Value) -> Peer {
        serde_json::from_value(serde_json::json!({
            "id": "PUBKEY=", "name": "alice",
            "total_receive": 1.0, "total_sent": 2.0,
            "jobs": jobs
        }))
        .unwrap()
    }

    #[test]
    fn limits_and_expiry_come_from_jobs() {
        let peer = peer_with_jobs(serde_json::json!([
            { "JobID": "1", "Configuration": "wg0", "Peer": "PUBKEY=", "Field": "total_data",
              "Operator": "lgt", "Value": "10", "Action": "restrict" },
            { "JobID": "2", "Configuration": "wg0", "Peer": "PUBKEY=", "Field": "date",
              "Operator": "lgt", "Value": "2030-01-01 00:00:00", "Action": "restrict" }
        ]));
        let user = WireGuardAdapter::to_user(&peer, true);
        assert_eq!(user.data_limit_bytes, 10 * 1024 * 1024 * 1024);
        assert_eq!(user.expiry.unix_secs(), Some(1_893_456_000));
        assert!(!user.enabled);
        assert_eq!(user.used_upload, 1024 * 1024 * 1024);
        assert_eq!(user.used_download, 2 * 1024 * 1024 * 1024);
        assert_eq!(user.identity, BackendIdentity::PeerPublicKey("PUBKEY=".into()));
    }

    #[test]
    fn no_jobs_means_unlimited() {
        let user = WireGuardAdapter::to_user(&peer_with_jobs(serde_json::json!([])), false);
        assert_eq!(user.data_limit_bytes, 0);
        assert!(user.expiry.is_never());
        assert!(user.enabled);
    }

    #[test]
    fn job_values_render_in_dashboard_units() {
        assert_eq!(limit_value(0), None);
        assert_eq!(limit_value(1024 * 1024 * 1024).as_deref(), Some("1.000"));
        let at = Expiry::from_unix_secs(1_893_456_000);
        assert_eq!(expiry_value(at).as_deref(), Some("2030-01-01 00:00:00"));
    }
}
