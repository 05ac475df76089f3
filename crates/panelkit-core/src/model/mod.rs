// Domain model shared by every adapter.

mod capability;
mod panel;
mod stats;
mod user;

pub use capability::{Capability, CapabilitySet};
pub use panel::{Credentials, PanelConfig, PanelType, Timeouts, TlsOptions};
pub use stats::{Inbound, PanelInfo, SystemStats};
pub use user::{
    BackendIdentity, CreatedUser, Expiry, ProvisionedUser, UsageStats, UserPatch, UserSpec,
};
