// ── Adapter factory ──
//
// Maps a panel type to its adapter and keeps one live adapter per panel id
// so sessions survive between calls. A cached adapter is rebuilt when the
// panel's configuration fingerprint changes.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use strum::IntoEnumIterator;
use tracing::{debug, info};

use crate::adapter::{
    MarzbanAdapter, MikrotikAdapter, PanelAdapter, SuiAdapter, WireGuardAdapter, XuiAdapter,
};
use crate::error::PanelError;
use crate::model::{CapabilitySet, PanelConfig, PanelType};

struct CachedAdapter {
    fingerprint: u64,
    adapter: Arc<dyn PanelAdapter>,
}

/// Builds adapters and caches them by panel id.
#[derive(Default)]
pub struct AdapterFactory {
    cache: DashMap<String, CachedAdapter>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh, uncached adapter for `config`. No network I/O.
    pub fn create(config: &PanelConfig) -> Result<Arc<dyn PanelAdapter>, PanelError> {
        let adapter: Arc<dyn PanelAdapter> = match config.panel_type {
            PanelType::Marzban => Arc::new(MarzbanAdapter::configure(config)?),
            PanelType::XUi => Arc::new(XuiAdapter::configure(config)?),
            PanelType::SUi => Arc::new(SuiAdapter::configure(config)?),
            PanelType::WireGuard => Arc::new(WireGuardAdapter::configure(config)?),
            PanelType::Mikrotik => Arc::new(MikrotikAdapter::configure(config)?),
        };
        info!(panel = %config.id, panel_type = %config.panel_type, "adapter created");
        Ok(adapter)
    }

    /// The cached adapter for `config.id`, built on first use and rebuilt
    /// if the config changed since. A replaced adapter is disconnected.
    pub async fn get_or_create(
        &self,
        config: &PanelConfig,
    ) -> Result<Arc<dyn PanelAdapter>, PanelError> {
        let fingerprint = config.fingerprint();
        let (adapter, stale) = match self.cache.entry(config.id.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().fingerprint == fingerprint {
                    return Ok(Arc::clone(&slot.get().adapter));
                }
                debug!(panel = %config.id, "panel config changed, rebuilding adapter");
                let adapter = Self::create(config)?;
                let old = slot.insert(CachedAdapter {
                    fingerprint,
                    adapter: Arc::clone(&adapter),
                });
                (adapter, Some(old.adapter))
            }
            Entry::Vacant(slot) => {
                let adapter = Self::create(config)?;
                slot.insert(CachedAdapter {
                    fingerprint,
                    adapter: Arc::clone(&adapter),
                });
                (adapter, None)
            }
        };

        // The shard lock is released once the entry goes out of scope.
        if let Some(stale) = stale {
            stale.disconnect().await;
        }
        Ok(adapter)
    }

    /// Capability sets of every supported panel type.
    pub fn supported_types() -> Vec<CapabilitySet> {
        PanelType::iter().map(CapabilitySet::for_type).collect()
    }

    /// Drop the cached adapter for `panel_id`, closing its session.
    pub async fn evict(&self, panel_id: &str) -> bool {
        let Some((_, cached)) = self.cache.remove(panel_id) else {
            return false;
        };
        cached.adapter.disconnect().await;
        true
    }

    /// Disconnect and drop every cached adapter.
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.evict(&id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Capability;

    fn marzban(url: &str) -> PanelConfig {
        PanelConfig::new("m1", "main", PanelType::Marzban)
            .with_base_url(url.parse().unwrap())
            .with_login("admin", "secret")
    }

    #[test]
    fn every_type_is_supported() {
        let types = AdapterFactory::supported_types();
        assert_eq!(types.len(), 5);
        let wireguard = types
            .iter()
            .find(|c| c.panel_type == PanelType::WireGuard)
            .unwrap();
        assert!(!wireguard.supports(Capability::ResetUserData));
        assert!(wireguard.supports(Capability::CreateUser));
    }

    #[test]
    fn create_dispatches_on_type() {
        let adapter = AdapterFactory::create(&marzban("https://panel.example.com/")).unwrap();
        assert_eq!(adapter.panel_type(), PanelType::Marzban);
        assert_eq!(adapter.panel_id(), "m1");
    }

    #[test]
    fn missing_credentials_fail_configuration() {
        let config = PanelConfig::new("x1", "xui", PanelType::XUi)
            .with_base_url("https://x.example.com/".parse().unwrap());
        assert!(matches!(
            AdapterFactory::create(&config),
            Err(PanelError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn cache_is_keyed_by_fingerprint() {
        let factory = AdapterFactory::new();
        let first = factory
            .get_or_create(&marzban("https://a.example.com/"))
            .await
            .unwrap();
        let again = factory
            .get_or_create(&marzban("https://a.example.com/"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let moved = factory
            .get_or_create(&marzban("https://b.example.com/"))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &moved));
        assert_eq!(factory.len(), 1);

        assert!(factory.evict("m1").await);
        assert!(!factory.evict("m1").await);
        assert!(factory.is_empty());
    }
}
