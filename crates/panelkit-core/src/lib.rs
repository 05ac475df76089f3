//! Backend-agnostic provisioning over VPN/proxy panels and MikroTik routers.
//!
//! Sits between `panelkit-api` (wire clients) and whatever drives
//! provisioning (a bot, a billing job, an admin tool):
//!
//! - **[`PanelAdapter`]**: the uniform contract. One implementation per
//!   backend family ([`MarzbanAdapter`], [`XuiAdapter`], [`SuiAdapter`],
//!   [`WireGuardAdapter`], [`MikrotikAdapter`]). Reads degrade to defaults and
//!   log; writes return a typed [`PanelError`]. Each adapter authenticates
//!   lazily and owns its session.
//!
//! - **[`AdapterFactory`]**: builds the adapter for a [`PanelType`] and
//!   caches one per panel id, rebuilding when the panel config changes.
//!   [`AdapterFactory::supported_types()`] lists each type's
//!   [`CapabilitySet`].
//!
//! - **[`Provisioner`]**: façade resolving panels through a
//!   [`PanelRepository`], gating on capabilities and running every call under
//!   a [`CallContext`] deadline and cancellation token.
//!
//! - **Domain model** ([`model`]): [`PanelConfig`], [`UserSpec`],
//!   [`ProvisionedUser`], [`UsageStats`], [`Expiry`] and friends.

pub mod adapter;
pub mod error;
pub mod facade;
pub mod factory;
pub mod model;
pub mod repository;

pub use adapter::{
    MarzbanAdapter, MikrotikAdapter, PanelAdapter, SuiAdapter, WireGuardAdapter, XuiAdapter,
};
pub use error::PanelError;
pub use facade::{CallContext, PanelRef, Provisioner};
pub use factory::AdapterFactory;
pub use repository::{InMemoryRepository, LAST_AUTH_AT, PanelRepository};

pub use model::{
    BackendIdentity, Capability, CapabilitySet, CreatedUser, Credentials, Expiry, Inbound,
    PanelConfig, PanelInfo, PanelType, ProvisionedUser, SystemStats, Timeouts, TlsOptions,
    UsageStats, UserPatch, UserSpec,
};
