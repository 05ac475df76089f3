// ── MikroTik RouterOS adapter ──
//
// Users are PPP secrets or hotspot users. Each operation opens its own API
// connection, runs a short command sequence and closes it; a per-adapter
// lease keeps operations on one router strictly sequential. Expiry (and the
// PPP data limit, which RouterOS has no field for) ride in the entry
// comment as `expires=<unix>` / `limit=<bytes>` tokens.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use panelkit_api::Error as ApiError;
use panelkit_api::routeros::{
    Attributes, Command, DEFAULT_API_PORT, LoginMethod, Response, parse_duration,
};
use panelkit_api::{RouterClient, RouterSession};

use crate::adapter::{PanelAdapter, count, degrade, log_degraded, random_token};
use crate::error::PanelError;
use crate::model::{
    BackendIdentity, Capability, CreatedUser, Expiry, Inbound, PanelConfig, PanelInfo, PanelType,
    ProvisionedUser, SystemStats, UsageStats, UserPatch, UserSpec,
};

const GENERATED_PASSWORD_LEN: usize = 12;

/// Which RouterOS table holds the accounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    #[default]
    Ppp,
    Hotspot,
}

impl Service {
    fn users(self) -> &'static str {
        match self {
            Self::Ppp => "/ppp/secret",
            Self::Hotspot => "/ip/hotspot/user",
        }
    }

    fn profiles(self) -> &'static str {
        match self {
            Self::Ppp => "/ppp/profile",
            Self::Hotspot => "/ip/hotspot/user/profile",
        }
    }

    fn active(self) -> &'static str {
        match self {
            Self::Ppp => "/ppp/active",
            Self::Hotspot => "/ip/hotspot/active",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Ppp => "ppp",
            Self::Hotspot => "hotspot",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MikrotikSettings {
    pub service: Service,
    /// Profile assigned to new users.
    pub profile: Option<String>,
    /// Hotspot server new hotspot users are bound to.
    pub server: Option<String>,
    pub login_method: LoginMethod,
}

/// Metadata kept in an entry's `comment`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Comment {
    expiry: Expiry,
    limit: u64,
    note: String,
}

impl Comment {
    /// Pull out `expires=` and `limit=` tokens. Everything else, spacing
    /// included, stays in the note as written.
    fn parse(text: &str) -> Self {
        let mut comment = Self::default();
        let mut note = Vec::new();
        for token in text.split(' ') {
            if let Some(secs) = token.strip_prefix("expires=").and_then(|v| v.parse().ok()) {
                comment.expiry = Expiry::from_unix_secs(secs);
            } else if let Some(bytes) = token.strip_prefix("limit=").and_then(|v| v.parse().ok()) {
                comment.limit = bytes;
            } else {
                note.push(token);
            }
        }
        comment.note = note.join(" ");
        comment
    }

    fn render(&self, service: Service) -> String {
        let mut parts = Vec::new();
        if !self.note.is_empty() {
            parts.push(self.note.clone());
        }
        if let Some(secs) = self.expiry.unix_secs() {
            parts.push(format!("expires={secs}"));
        }
        // Hotspot users carry the limit in `limit-bytes-total`.
        if service == Service::Ppp && self.limit > 0 {
            parts.push(format!("limit={}", self.limit));
        }
        parts.join(" ")
    }
}

/// Exclusive use of the router for one operation.
struct Lease<'a> {
    issued: MutexGuard<'a, Option<DateTime<Utc>>>,
    session: RouterSession,
}

impl Lease<'_> {
    async fn run(&mut self, cmd: &Command) -> Result<Response, ApiError> {
        self.session.run(cmd).await
    }

    async fn rows(&mut self, cmd: &Command) -> Result<Vec<Attributes>, ApiError> {
        self.session.rows(cmd).await
    }

    async fn finish(self) {
        let Self { issued, session } = self;
        session.close().await;
        drop(issued);
    }
}

pub struct MikrotikAdapter {
    panel_id: String,
    router: RouterClient,
    settings: MikrotikSettings,
    /// Held for the duration of every operation; records the last login.
    lease: Mutex<Option<DateTime<Utc>>>,
}

fn attr<'a>(row: &'a Attributes, key: &str) -> &'a str {
    row.get(key).map_or("", String::as_str)
}

fn number(row: &Attributes, key: &str) -> u64 {
    attr(row, key).parse().unwrap_or(0)
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

impl MikrotikAdapter {
    async fn lease(&self) -> Result<Lease<'_>, PanelError> {
        let mut issued = self.lease.lock().await;
        let session = self.router.connect().await?;
        *issued = Some(session.issued_at());
        Ok(Lease { issued, session })
    }

    fn to_user(&self, row: &Attributes, usage: (u64, u64)) -> ProvisionedUser {
        let comment = Comment::parse(attr(row, "comment"));
        let limit = match self.settings.service {
            Service::Ppp => comment.limit,
            Service::Hotspot => number(row, "limit-bytes-total"),
        };
        ProvisionedUser {
            username: attr(row, "name").to_owned(),
            data_limit_bytes: limit,
            expiry: comment.expiry,
            enabled: attr(row, "disabled") != "true",
            used_upload: usage.0,
            used_download: usage.1,
            identity: BackendIdentity::RouterId(attr(row, ".id").to_owned()),
        }
    }

    fn usage_of(&self, row: &Attributes, interfaces: &HashMap<String, (u64, u64)>) -> (u64, u64) {
        match self.settings.service {
            Service::Hotspot => (number(row, "bytes-in"), number(row, "bytes-out")),
            Service::Ppp => interfaces
                .get(attr(row, "name"))
                .copied()
                .unwrap_or_default(),
        }
    }

    /// Byte counters of connected PPP users, keyed by user name. The
    /// dynamic interface of a session is `<service-name>`; its rx is what
    /// the user uploaded.
    async fn ppp_usage(
        lease: &mut Lease<'_>,
        name: Option<&str>,
    ) -> Result<HashMap<String, (u64, u64)>, ApiError> {
        let mut active = Command::new("/ppp/active/print").proplist(&["name", "service"]);
        if let Some(name) = name {
            active = active.query("name", name);
        }
        let sessions = lease.rows(&active).await?;
        if sessions.is_empty() {
            return Ok(HashMap::new());
        }

        let counters: HashMap<String, (u64, u64)> = lease
            .rows(
                &Command::new("/interface/print")
                    .query("dynamic", "true")
                    .proplist(&["name", "rx-byte", "tx-byte"]),
            )
            .await?
            .iter()
            .map(|row| {
                (
                    attr(row, "name").to_owned(),
                    (number(row, "rx-byte"), number(row, "tx-byte")),
                )
            })
            .collect();

        Ok(sessions
            .iter()
            .filter_map(|s| {
                let user = attr(s, "name");
                let iface = format!("<{}-{user}>", attr(s, "service"));
                counters.get(&iface).map(|c| (user.to_owned(), *c))
            })
            .collect())
    }

    async fn find_row(
        &self,
        lease: &mut Lease<'_>,
        username: &str,
    ) -> Result<Option<Attributes>, PanelError> {
        let cmd = Command::new(format!("{}/print", self.settings.service.users()))
            .query("name", username);
        Ok(lease.rows(&cmd).await?.into_iter().next())
    }

    async fn require_row(
        &self,
        lease: &mut Lease<'_>,
        username: &str,
    ) -> Result<Attributes, PanelError> {
        self.find_row(lease, username)
            .await?
            .ok_or_else(|| PanelError::user_not_found(username))
    }

    async fn load_user(
        &self,
        lease: &mut Lease<'_>,
        username: &str,
    ) -> Result<Option<ProvisionedUser>, PanelError> {
        let Some(row) = self.find_row(lease, username).await? else {
            return Ok(None);
        };
        let interfaces = match self.settings.service {
            Service::Ppp => Self::ppp_usage(lease, Some(username)).await?,
            Service::Hotspot => HashMap::new(),
        };
        Ok(Some(self.to_user(&row, self.usage_of(&row, &interfaces))))
    }

    async fn set(
        &self,
        lease: &mut Lease<'_>,
        id: &str,
        attrs: &[(&str, String)],
    ) -> Result<(), PanelError> {
        let cmd = attrs.iter().fold(
            Command::new(format!("{}/set", self.settings.service.users())).attr(".id", id),
            |cmd, (key, value)| cmd.attr(key, value),
        );
        lease.run(&cmd).await?;
        Ok(())
    }

    async fn resource(lease: &mut Lease<'_>) -> Result<Attributes, PanelError> {
        Ok(lease
            .rows(&Command::new("/system/resource/print"))
            .await?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    // ── Operation bodies, run on a held lease ────────────────────────

    async fn fetch_user(&self, username: &str) -> Result<Option<ProvisionedUser>, PanelError> {
        let mut lease = self.lease().await?;
        let result = self.load_user(&mut lease, username).await;
        lease.finish().await;
        result
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<(), PanelError> {
        let mut lease = self.lease().await?;
        let result: Result<(), PanelError> = async {
            let row = self.require_row(&mut lease, username).await?;
            let disabled = [("disabled", yes_no(!enabled).to_owned())];
            self.set(&mut lease, attr(&row, ".id"), &disabled).await
        }
        .await;
        lease.finish().await;
        result?;
        debug!(panel = %self.panel_id, username, enabled, "router user toggled");
        Ok(())
    }

    async fn try_list(&self) -> Result<Vec<ProvisionedUser>, PanelError> {
        let mut lease = self.lease().await?;
        let result: Result<Vec<ProvisionedUser>, PanelError> = async {
            let print = Command::new(format!("{}/print", self.settings.service.users()));
            let rows = lease.rows(&print).await?;
            let interfaces = match self.settings.service {
                Service::Ppp => Self::ppp_usage(&mut lease, None).await?,
                Service::Hotspot => HashMap::new(),
            };
            Ok(rows
                .iter()
                .map(|row| self.to_user(row, self.usage_of(row, &interfaces)))
                .collect())
        }
        .await;
        lease.finish().await;
        result
    }

    async fn try_info(&self) -> Result<(Attributes, Attributes), PanelError> {
        let mut lease = self.lease().await?;
        let result: Result<(Attributes, Attributes), PanelError> = async {
            let resource = Self::resource(&mut lease).await?;
            let identity = lease
                .rows(&Command::new("/system/identity/print"))
                .await?
                .into_iter()
                .next()
                .unwrap_or_default();
            Ok((resource, identity))
        }
        .await;
        lease.finish().await;
        result
    }

    async fn try_profiles(&self) -> Result<Vec<Inbound>, PanelError> {
        let service = self.settings.service;
        let mut lease = self.lease().await?;
        let result = lease
            .rows(&Command::new(format!("{}/print", service.profiles())))
            .await;
        lease.finish().await;
        Ok(result?
            .iter()
            .map(|row| Inbound {
                id: attr(row, ".id").to_owned(),
                tag: attr(row, "name").to_owned(),
                protocol: service.name().to_owned(),
                port: None,
                enabled: true,
            })
            .collect())
    }

    async fn try_stats(&self) -> Result<SystemStats, PanelError> {
        let service = self.settings.service;
        let mut lease = self.lease().await?;
        let result: Result<SystemStats, PanelError> = async {
            let resource = Self::resource(&mut lease).await?;
            let users = lease
                .rows(&Command::new(format!("{}/print", service.users())).proplist(&["name"]))
                .await?
                .len();
            let active = lease
                .rows(&Command::new(format!("{}/print", service.active())).proplist(&["name"]))
                .await?
                .len();
            let total = number(&resource, "total-memory");
            Ok(SystemStats {
                cpu_percent: attr(&resource, "cpu-load").parse().ok(),
                memory_used: Some(total.saturating_sub(number(&resource, "free-memory"))),
                memory_total: Some(total),
                uptime_secs: parse_duration(attr(&resource, "uptime")),
                total_users: Some(count(users)),
                active_users: Some(count(active)),
                incoming_bytes: None,
                outgoing_bytes: None,
            })
        }
        .await;
        lease.finish().await;
        result
    }

    async fn add_user(
        &self,
        lease: &mut Lease<'_>,
        spec: &UserSpec,
        password: &str,
    ) -> Result<ProvisionedUser, PanelError> {
        let service = self.settings.service;
        if self.find_row(lease, &spec.username).await?.is_some() {
            return Err(PanelError::duplicate(&spec.username));
        }

        let comment = Comment {
            expiry: spec.expiry,
            limit: spec.data_limit_bytes,
            note: spec.note.clone().unwrap_or_default(),
        };
        let mut cmd = Command::new(format!("{}/add", service.users()))
            .attr("name", &spec.username)
            .attr("password", password)
            .attr("disabled", yes_no(!spec.enabled))
            .attr("comment", comment.render(service));
        if let Some(profile) = &self.settings.profile {
            cmd = cmd.attr("profile", profile);
        }
        if service == Service::Hotspot {
            if spec.data_limit_bytes > 0 {
                cmd = cmd.attr("limit-bytes-total", spec.data_limit_bytes.to_string());
            }
            if let Some(server) = &self.settings.server {
                cmd = cmd.attr("server", server);
            }
        }
        let done = lease.run(&cmd).await?.done;
        info!(
            panel = %self.panel_id,
            username = %spec.username,
            id = attr(&done, "ret"),
            "router user created"
        );

        self.load_user(lease, &spec.username)
            .await?
            .ok_or_else(|| PanelError::Backend {
                message: format!("user {:?} missing after add", spec.username),
                status: None,
            })
    }

    async fn patch_user(
        &self,
        lease: &mut Lease<'_>,
        username: &str,
        patch: &UserPatch,
    ) -> Result<ProvisionedUser, PanelError> {
        let service = self.settings.service;
        let row = self.require_row(lease, username).await?;
        if !patch.is_empty() {
            let mut comment = Comment::parse(attr(&row, "comment"));
            let mut attrs = Vec::new();
            if let Some(limit) = patch.data_limit_bytes {
                comment.limit = limit;
                if service == Service::Hotspot {
                    attrs.push(("limit-bytes-total", limit.to_string()));
                }
            }
            if let Some(expiry) = patch.expiry {
                comment.expiry = expiry;
            }
            if let Some(note) = &patch.note {
                comment.note.clone_from(note);
            }
            if let Some(enabled) = patch.enabled {
                attrs.push(("disabled", yes_no(!enabled).to_owned()));
            }
            attrs.push(("comment", comment.render(service)));
            self.set(lease, attr(&row, ".id"), &attrs).await?;
            debug!(panel = %self.panel_id, username, "router user updated");
        }
        self.load_user(lease, username)
            .await?
            .ok_or_else(|| PanelError::user_not_found(username))
    }

    async fn remove_user(&self, lease: &mut Lease<'_>, username: &str) -> Result<bool, PanelError> {
        let Some(row) = self.find_row(lease, username).await? else {
            return Ok(false);
        };
        let cmd = Command::new(format!("{}/remove", self.settings.service.users()))
            .attr(".id", attr(&row, ".id"));
        lease.run(&cmd).await?;
        Ok(true)
    }

    async fn reset_counters(
        &self,
        lease: &mut Lease<'_>,
        username: &str,
    ) -> Result<(), PanelError> {
        let row = self.require_row(lease, username).await?;
        let cmd = Command::new("/ip/hotspot/user/reset-counters").attr(".id", attr(&row, ".id"));
        lease.run(&cmd).await?;
        Ok(())
    }
}

#[async_trait]
impl PanelAdapter for MikrotikAdapter {
    fn configure(config: &PanelConfig) -> Result<Self, PanelError> {
        let settings: MikrotikSettings = config.settings()?;
        let router = RouterClient::new(
            config.socket_host()?,
            config.port.unwrap_or(DEFAULT_API_PORT),
            config.username()?,
            config.password()?.clone(),
            settings.login_method,
            &config.transport(),
        );
        Ok(Self {
            panel_id: config.id.clone(),
            router,
            settings,
            lease: Mutex::new(None),
        })
    }

    fn panel_type(&self) -> PanelType {
        PanelType::Mikrotik
    }

    fn panel_id(&self) -> &str {
        &self.panel_id
    }

    async fn test_connection(&self) -> bool {
        let Ok(mut lease) = self.lease().await else {
            return false;
        };
        let ok = lease
            .run(&Command::new("/system/identity/print"))
            .await
            .is_ok();
        lease.finish().await;
        ok
    }

    async fn panel_info(&self) -> PanelInfo {
        let (resource, identity) = match self.try_info().await {
            Ok(rows) => rows,
            Err(e) => {
                log_degraded(&self.panel_id, Capability::GetPanelInfo, &e);
                return PanelInfo::unreachable(PanelType::Mikrotik);
            }
        };
        let mut info = PanelInfo::reachable(PanelType::Mikrotik);
        info.version = Some(attr(&resource, "version").to_owned()).filter(|v| !v.is_empty());
        info.uptime_secs = parse_duration(attr(&resource, "uptime"));
        info.cpu_percent = attr(&resource, "cpu-load").parse().ok();
        let total = number(&resource, "total-memory");
        info.memory_total = Some(total);
        info.memory_used = Some(total.saturating_sub(number(&resource, "free-memory")));
        for (key, field) in [("board", "board-name"), ("architecture", "architecture-name")] {
            let value = attr(&resource, field);
            if !value.is_empty() {
                info.details.insert(key.into(), value.to_owned());
            }
        }
        let name = attr(&identity, "name");
        if !name.is_empty() {
            info.details.insert("identity".into(), name.to_owned());
        }
        info.details
            .insert("service".into(), self.settings.service.name().into());
        info
    }

    async fn inbounds(&self) -> Vec<Inbound> {
        degrade(&self.panel_id, Capability::GetInbounds, self.try_profiles().await)
    }

    async fn system_stats(&self) -> SystemStats {
        degrade(&self.panel_id, Capability::GetSystemStats, self.try_stats().await)
    }

    async fn create_user(&self, spec: &UserSpec) -> Result<CreatedUser, PanelError> {
        let generated = spec.password.is_none();
        let password = spec
            .password
            .clone()
            .unwrap_or_else(|| random_token(GENERATED_PASSWORD_LEN));

        let mut lease = self.lease().await?;
        let result = self.add_user(&mut lease, spec, &password).await;
        lease.finish().await;

        Ok(CreatedUser {
            user: result?,
            access_link: None,
            secret: generated.then_some(password),
        })
    }

    async fn update_user(
        &self,
        username: &str,
        patch: &UserPatch,
    ) -> Result<ProvisionedUser, PanelError> {
        let mut lease = self.lease().await?;
        let result = self.patch_user(&mut lease, username, patch).await;
        lease.finish().await;
        result
    }

    async fn delete_user(&self, username: &str) -> Result<bool, PanelError> {
        let mut lease = self.lease().await?;
        let result = self.remove_user(&mut lease, username).await;
        lease.finish().await;
        let removed = result?;
        if removed {
            info!(panel = %self.panel_id, username, "router user removed");
        } else {
            debug!(panel = %self.panel_id, username, "delete of absent user");
        }
        Ok(removed)
    }

    async fn enable_user(&self, username: &str) -> Result<(), PanelError> {
        self.set_enabled(username, true).await
    }

    async fn disable_user(&self, username: &str) -> Result<(), PanelError> {
        self.set_enabled(username, false).await
    }

    /// Hotspot counters can be reset; PPP counters live on the dynamic
    /// interface and reset only when the session reconnects.
    async fn reset_user_data(&self, username: &str) -> Result<(), PanelError> {
        if self.settings.service == Service::Ppp {
            return Err(self.unsupported(Capability::ResetUserData));
        }
        let mut lease = self.lease().await?;
        let result = self.reset_counters(&mut lease, username).await;
        lease.finish().await;
        result
    }

    async fn get_user(&self, username: &str) -> Option<ProvisionedUser> {
        degrade(&self.panel_id, Capability::GetUser, self.fetch_user(username).await)
    }

    async fn get_all_users(&self) -> Vec<ProvisionedUser> {
        degrade(&self.panel_id, Capability::GetAllUsers, self.try_list().await)
    }

    async fn user_stats(&self, username: &str) -> Result<UsageStats, PanelError> {
        let user = self
            .fetch_user(username)
            .await?
            .ok_or_else(|| PanelError::user_not_found(username))?;
        Ok(UsageStats::from(&user))
    }

    async fn session_issued_at(&self) -> Option<DateTime<Utc>> {
        *self.lease.lock().await
    }

    async fn disconnect(&self) {
        // Connections never outlive an operation; forget the last login.
        *self.lease.lock().await = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn comment_round_trips_metadata_and_note() {
        let comment = Comment::parse("vip customer expires=1893456000 limit=5000");
        assert_eq!(comment.note, "vip customer");
        assert_eq!(comment.expiry.unix_secs(), Some(1_893_456_000));
        assert_eq!(comment.limit, 5000);
        assert_eq!(
            comment.render(Service::Ppp),
            "vip customer expires=1893456000 limit=5000"
        );
        assert_eq!(comment.render(Service::Hotspot), "vip customer expires=1893456000");
    }

    #[test]
    fn foreign_comment_text_is_kept_verbatim() {
        let comment = Comment::parse("Café  Zürich\tbox 4 expires=1893456000");
        assert_eq!(comment.note, "Café  Zürich\tbox 4");
        assert_eq!(comment.expiry.unix_secs(), Some(1_893_456_000));

        let comment = Comment::parse("limit=abc  owner: ops");
        assert_eq!(comment.limit, 0);
        assert_eq!(comment.note, "limit=abc  owner: ops");
        assert_eq!(
            Comment::parse(&comment.render(Service::Ppp)).note,
            "limit=abc  owner: ops"
        );
    }

    #[test]
    fn empty_comment_is_unlimited() {
        let comment = Comment::parse("");
        assert!(comment.expiry.is_never());
        assert_eq!(comment.limit, 0);
        assert_eq!(comment.render(Service::Ppp), "");
    }

    #[test]
    fn settings_default_to_ppp() {
        let settings: MikrotikSettings = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(settings.service, Service::Ppp);
        assert_eq!(settings.login_method, LoginMethod::Auto);

        let hotspot: MikrotikSettings =
            serde_json::from_value(serde_json::json!({ "service": "hotspot", "server": "hs1" }))
                .unwrap();
        assert_eq!(hotspot.service, Service::Hotspot);
        assert_eq!(hotspot.server.as_deref(), Some("hs1"));
    }

    #[test]
    fn ppp_configuration_needs_credentials() {
        let config = PanelConfig::new("r1", "router", PanelType::Mikrotik).with_host("10.0.0.1", None);
        assert!(matches!(
            MikrotikAdapter::configure(&config),
            Err(PanelError::Configuration { .. })
        ));
    }
}
