// ── Provisioning façade ──
//
// Resolves a panel reference through the repository, fetches the cached
// adapter, checks the capability and runs the operation under the caller's
// deadline and cancellation token. After each call the adapter's last login
// time is written back as session metadata.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::PanelAdapter;
use crate::error::PanelError;
use crate::factory::AdapterFactory;
use crate::model::{
    Capability, CapabilitySet, CreatedUser, Expiry, Inbound, PanelConfig, PanelInfo, PanelType,
    ProvisionedUser, SystemStats, UsageStats, UserPatch, UserSpec,
};
use crate::repository::{LAST_AUTH_AT, PanelRepository};

/// Only X-UI stores an expiry that starts at first use; elsewhere it would
/// be written as "never".
fn check_expiry(panel_type: PanelType, expiry: Option<Expiry>) -> Result<(), PanelError> {
    match expiry {
        Some(Expiry::AfterFirstUse(_)) if panel_type != PanelType::XUi => {
            Err(PanelError::configuration(format!(
                "{panel_type} panels cannot store an expiry that starts at first use"
            )))
        }
        _ => Ok(()),
    }
}

/// How a caller names a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelRef {
    Id(String),
    Name(String),
}

impl PanelRef {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

impl std::fmt::Display for PanelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {id:?}"),
            Self::Name(name) => write!(f, "name {name:?}"),
        }
    }
}

/// Deadline and cancellation for one façade call.
///
/// Cancelling drops the in-flight request; for RouterOS panels that closes
/// the socket.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fut` unless the token fires or the deadline passes first.
    pub async fn guard<T>(
        &self,
        fut: impl Future<Output = Result<T, PanelError>>,
    ) -> Result<T, PanelError> {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(PanelError::Cancelled),
            () = deadline => Err(PanelError::BackendUnavailable {
                message: "deadline exceeded".into(),
            }),
            result = fut => result,
        }
    }
}

/// Entry point for provisioning against any configured panel.
pub struct Provisioner<R> {
    repo: Arc<R>,
    factory: AdapterFactory,
}

impl<R: PanelRepository> Provisioner<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            factory: AdapterFactory::new(),
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn factory(&self) -> &AdapterFactory {
        &self.factory
    }

    /// Capability sets of every supported panel type.
    pub fn supported_types(&self) -> Vec<CapabilitySet> {
        AdapterFactory::supported_types()
    }

    async fn config(&self, panel: &PanelRef) -> Result<PanelConfig, PanelError> {
        let found = match panel {
            PanelRef::Id(id) => self.repo.find_by_id(id).await?,
            PanelRef::Name(name) => self.repo.find_by_name(name).await?,
        };
        found.ok_or_else(|| PanelError::configuration(format!("no panel with {panel}")))
    }

    /// The live adapter for `panel`.
    pub async fn adapter(&self, panel: &PanelRef) -> Result<Arc<dyn PanelAdapter>, PanelError> {
        let config = self.config(panel).await?;
        self.factory.get_or_create(&config).await
    }

    async fn record_session(&self, adapter: &dyn PanelAdapter) {
        let Some(issued_at) = adapter.session_issued_at().await else {
            return;
        };
        if let Err(e) = self
            .repo
            .store_session_metadata(adapter.panel_id(), LAST_AUTH_AT, issued_at.to_rfc3339())
            .await
        {
            warn!(panel = adapter.panel_id(), error = %e, "failed to store session metadata");
        }
    }

    /// Resolve, gate on `capability`, then run `op` under `ctx`.
    async fn run<T, F, Fut>(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        capability: Capability,
        op: F,
    ) -> Result<T, PanelError>
    where
        F: FnOnce(Arc<dyn PanelAdapter>) -> Fut,
        Fut: Future<Output = Result<T, PanelError>>,
    {
        let adapter = ctx.guard(self.adapter(panel)).await?;
        adapter.capabilities().require(capability)?;
        debug!(panel = adapter.panel_id(), operation = %capability, "dispatching");

        let result = ctx.guard(op(Arc::clone(&adapter))).await;
        if let Err(e) = &result {
            warn!(panel = adapter.panel_id(), operation = %capability, error = %e, "operation failed");
        }
        self.record_session(adapter.as_ref()).await;
        result
    }

    // ── Panel ────────────────────────────────────────────────────────

    pub async fn test_connection(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
    ) -> Result<bool, PanelError> {
        self.run(panel, ctx, Capability::TestConnection, |a| async move {
            Ok(a.test_connection().await)
        })
        .await
    }

    pub async fn panel_info(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
    ) -> Result<PanelInfo, PanelError> {
        self.run(panel, ctx, Capability::GetPanelInfo, |a| async move {
            Ok(a.panel_info().await)
        })
        .await
    }

    pub async fn capabilities(&self, panel: &PanelRef) -> Result<CapabilitySet, PanelError> {
        Ok(self.adapter(panel).await?.capabilities())
    }

    pub async fn inbounds(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
    ) -> Result<Vec<Inbound>, PanelError> {
        self.run(panel, ctx, Capability::GetInbounds, |a| async move {
            Ok(a.inbounds().await)
        })
        .await
    }

    pub async fn system_stats(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
    ) -> Result<SystemStats, PanelError> {
        self.run(panel, ctx, Capability::GetSystemStats, |a| async move {
            Ok(a.system_stats().await)
        })
        .await
    }

    // ── Users ────────────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        spec: &UserSpec,
    ) -> Result<CreatedUser, PanelError> {
        if spec.username.trim().is_empty() {
            return Err(PanelError::configuration("username must not be empty"));
        }
        self.run(panel, ctx, Capability::CreateUser, |a| async move {
            check_expiry(a.panel_type(), Some(spec.expiry))?;
            a.create_user(spec).await
        })
        .await
    }

    pub async fn update_user(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        username: &str,
        patch: &UserPatch,
    ) -> Result<ProvisionedUser, PanelError> {
        self.run(panel, ctx, Capability::UpdateUser, |a| async move {
            check_expiry(a.panel_type(), patch.expiry)?;
            a.update_user(username, patch).await
        })
        .await
    }

    /// `Ok(false)` when the user was already gone.
    pub async fn delete_user(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        username: &str,
    ) -> Result<bool, PanelError> {
        self.run(panel, ctx, Capability::DeleteUser, |a| async move {
            a.delete_user(username).await
        })
        .await
    }

    pub async fn enable_user(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        username: &str,
    ) -> Result<(), PanelError> {
        self.run(panel, ctx, Capability::EnableUser, |a| async move {
            a.enable_user(username).await
        })
        .await
    }

    pub async fn disable_user(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        username: &str,
    ) -> Result<(), PanelError> {
        self.run(panel, ctx, Capability::DisableUser, |a| async move {
            a.disable_user(username).await
        })
        .await
    }

    pub async fn reset_user_data(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        username: &str,
    ) -> Result<(), PanelError> {
        self.run(panel, ctx, Capability::ResetUserData, |a| async move {
            a.reset_user_data(username).await
        })
        .await
    }

    pub async fn get_user(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        username: &str,
    ) -> Result<Option<ProvisionedUser>, PanelError> {
        self.run(panel, ctx, Capability::GetUser, |a| async move {
            Ok(a.get_user(username).await)
        })
        .await
    }

    pub async fn get_all_users(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
    ) -> Result<Vec<ProvisionedUser>, PanelError> {
        self.run(panel, ctx, Capability::GetAllUsers, |a| async move {
            Ok(a.get_all_users().await)
        })
        .await
    }

    pub async fn user_config(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        username: &str,
    ) -> Result<Option<String>, PanelError> {
        self.run(panel, ctx, Capability::GetUserConfig, |a| async move {
            a.user_config(username).await
        })
        .await
    }

    pub async fn user_stats(
        &self,
        panel: &PanelRef,
        ctx: &CallContext,
        username: &str,
    ) -> Result<UsageStats, PanelError> {
        self.run(panel, ctx, Capability::GetUserStats, |a| async move {
            a.user_stats(username).await
        })
        .await
    }

    /// Close every cached session.
    pub async fn shutdown(&self) {
        self.factory.disconnect_all().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_token_wins_over_ready_future() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::new().with_cancellation(token);
        let result = ctx.guard(async { Ok(1) }).await;
        assert!(matches!(result, Err(PanelError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_unavailable() {
        let ctx = CallContext::new().with_timeout(Duration::from_secs(1));
        let result: Result<(), PanelError> = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(PanelError::BackendUnavailable { .. })));
    }

    #[tokio::test]
    async fn no_deadline_runs_to_completion() {
        assert_eq!(CallContext::new().guard(async { Ok(7) }).await.unwrap(), 7);
    }

    #[test]
    fn first_use_expiry_is_x_ui_only() {
        let week = Some(Expiry::AfterFirstUse(Duration::from_secs(604_800)));
        assert!(check_expiry(PanelType::XUi, week).is_ok());
        assert!(matches!(
            check_expiry(PanelType::Marzban, week),
            Err(PanelError::Configuration { .. })
        ));
        assert!(check_expiry(PanelType::Mikrotik, Some(Expiry::Never)).is_ok());
        assert!(check_expiry(PanelType::WireGuard, None).is_ok());
    }
}
