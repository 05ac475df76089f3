// ── PanelAdapter contract ──
//
// One implementation per backend family. Reads degrade to empty/default
// values and log; writes return typed errors. Adapters authenticate lazily
// on first use and own their session exclusively.

pub mod links;
pub mod marzban;
pub mod mikrotik;
pub mod sui;
pub mod wireguard;
pub mod xui;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::PanelError;
use crate::model::{
    Capability, CapabilitySet, CreatedUser, Inbound, PanelConfig, PanelInfo, PanelType,
    ProvisionedUser, SystemStats, UsageStats, UserPatch, UserSpec,
};

pub use marzban::MarzbanAdapter;
pub use mikrotik::MikrotikAdapter;
pub use sui::SuiAdapter;
pub use wireguard::WireGuardAdapter;
pub use xui::XuiAdapter;

/// Uniform provisioning operations over one panel.
#[async_trait]
pub trait PanelAdapter: Send + Sync {
    /// Validate `config` and build an adapter. Performs no network I/O.
    fn configure(config: &PanelConfig) -> Result<Self, PanelError>
    where
        Self: Sized;

    fn panel_type(&self) -> PanelType;

    /// Id of the panel this adapter was configured for.
    fn panel_id(&self) -> &str;

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::for_type(self.panel_type())
    }

    // ── Panel ────────────────────────────────────────────────────────

    /// `false` on any failure, never an error.
    async fn test_connection(&self) -> bool;

    async fn panel_info(&self) -> PanelInfo;

    async fn inbounds(&self) -> Vec<Inbound>;

    async fn system_stats(&self) -> SystemStats;

    // ── Users: writes ────────────────────────────────────────────────

    async fn create_user(&self, spec: &UserSpec) -> Result<CreatedUser, PanelError>;

    async fn update_user(
        &self,
        username: &str,
        patch: &UserPatch,
    ) -> Result<ProvisionedUser, PanelError>;

    /// `Ok(true)` when removed, `Ok(false)` when the user was already absent.
    async fn delete_user(&self, username: &str) -> Result<bool, PanelError>;

    async fn enable_user(&self, username: &str) -> Result<(), PanelError>;

    async fn disable_user(&self, username: &str) -> Result<(), PanelError>;

    async fn reset_user_data(&self, _username: &str) -> Result<(), PanelError> {
        Err(self.unsupported(Capability::ResetUserData))
    }

    // ── Users: reads ─────────────────────────────────────────────────

    /// `None` when absent or unreachable.
    async fn get_user(&self, username: &str) -> Option<ProvisionedUser>;

    async fn get_all_users(&self) -> Vec<ProvisionedUser>;

    /// Connection string, share link or config file. `Ok(None)` when the
    /// user exists but the backend has nothing to hand out.
    async fn user_config(&self, _username: &str) -> Result<Option<String>, PanelError> {
        Err(self.unsupported(Capability::GetUserConfig))
    }

    async fn user_stats(&self, username: &str) -> Result<UsageStats, PanelError>;

    // ── Session ──────────────────────────────────────────────────────

    /// When the current credential was obtained, if one is live.
    async fn session_issued_at(&self) -> Option<DateTime<Utc>>;

    /// Drop any held credential or connection.
    async fn disconnect(&self);

    fn unsupported(&self, operation: Capability) -> PanelError {
        PanelError::UnsupportedOperation {
            operation,
            panel_type: self.panel_type(),
        }
    }
}

/// Fold a failed read into the type's default, logging why.
pub(crate) fn degrade<T: Default>(
    panel: &str,
    operation: Capability,
    result: Result<T, PanelError>,
) -> T {
    result.unwrap_or_else(|e| {
        log_degraded(panel, operation, &e);
        T::default()
    })
}

pub(crate) fn log_degraded(panel: &str, operation: Capability, error: &PanelError) {
    warn!(panel, %operation, %error, "read degraded to default");
}

/// Map a wire error on a user-scoped call: "not found" becomes
/// `UserNotFound`, everything else goes through the usual translation.
pub(crate) fn user_error(username: &str) -> impl FnOnce(panelkit_api::Error) -> PanelError + '_ {
    move |err| {
        if err.is_not_found() {
            PanelError::user_not_found(username)
        } else {
            err.into()
        }
    }
}

/// Widen a collection length for the stats types.
pub(crate) fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// A random secret suitable for proxy passwords and subscription ids.
pub(crate) fn random_token(len: usize) -> String {
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.push_str(&uuid::Uuid::new_v4().simple().to_string());
    token.truncate(len);
    token
}
