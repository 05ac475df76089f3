// ── Capabilities ──
//
// Static per panel type. The façade checks these before dispatching, so an
// unsupported operation fails without touching the network.

use std::collections::BTreeSet;

use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::error::PanelError;
use crate::model::PanelType;

/// One operation of the adapter contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, Serialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    TestConnection,
    GetPanelInfo,
    CreateUser,
    UpdateUser,
    DeleteUser,
    GetUser,
    GetAllUsers,
    EnableUser,
    DisableUser,
    ResetUserData,
    GetUserConfig,
    GetUserStats,
    GetInbounds,
    GetSystemStats,
}

/// The operations one panel type genuinely supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    pub panel_type: PanelType,
    pub operations: BTreeSet<Capability>,
}

impl CapabilitySet {
    pub fn for_type(panel_type: PanelType) -> Self {
        let missing: &[Capability] = match panel_type {
            PanelType::Marzban | PanelType::XUi | PanelType::SUi => &[],
            PanelType::WireGuard => &[Capability::ResetUserData],
            PanelType::Mikrotik => &[Capability::GetUserConfig],
        };
        Self {
            panel_type,
            operations: Capability::iter().filter(|c| !missing.contains(c)).collect(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.operations.contains(&capability)
    }

    /// `Err(UnsupportedOperation)` when `capability` is absent.
    pub fn require(&self, capability: Capability) -> Result<(), PanelError> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(PanelError::UnsupportedOperation {
                operation: capability,
                panel_type: self.panel_type,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wireguard_cannot_reset() {
        let caps = CapabilitySet::for_type(PanelType::WireGuard);
        assert!(!caps.supports(Capability::ResetUserData));
        assert!(caps.supports(Capability::GetUserConfig));
        assert!(matches!(
            caps.require(Capability::ResetUserData),
            Err(PanelError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn mikrotik_has_no_user_config() {
        let caps = CapabilitySet::for_type(PanelType::Mikrotik);
        assert!(!caps.supports(Capability::GetUserConfig));
        assert!(caps.supports(Capability::ResetUserData));
    }

    #[test]
    fn http_panels_support_everything() {
        for panel_type in [PanelType::Marzban, PanelType::XUi, PanelType::SUi] {
            let caps = CapabilitySet::for_type(panel_type);
            assert_eq!(caps.operations.len(), Capability::iter().count());
        }
    }
}
