// ── Persistence collaborator ──
//
// Where panel definitions come from and where per-panel session metadata
// goes. The provisioning layer never owns storage; callers plug in their
// own store or use `InMemoryRepository`.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::PanelError;
use crate::model::PanelConfig;

/// Session metadata key holding the RFC 3339 time of the last login.
pub const LAST_AUTH_AT: &str = "last_auth_at";

#[async_trait]
pub trait PanelRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<PanelConfig>, PanelError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<PanelConfig>, PanelError>;

    async fn list(&self) -> Result<Vec<PanelConfig>, PanelError>;

    /// Opaque value previously stored for `panel_id`.
    async fn session_metadata(&self, panel_id: &str, key: &str)
    -> Result<Option<String>, PanelError>;

    async fn store_session_metadata(
        &self,
        panel_id: &str,
        key: &str,
        value: String,
    ) -> Result<(), PanelError>;
}

/// Process-local repository.
#[derive(Default)]
pub struct InMemoryRepository {
    panels: DashMap<String, PanelConfig>,
    metadata: DashMap<(String, String), String>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_panels(panels: impl IntoIterator<Item = PanelConfig>) -> Self {
        let repo = Self::new();
        for panel in panels {
            repo.insert(panel);
        }
        repo
    }

    /// Add or replace a panel, keyed by id.
    pub fn insert(&self, panel: PanelConfig) {
        self.panels.insert(panel.id.clone(), panel);
    }

    pub fn remove(&self, id: &str) -> Option<PanelConfig> {
        self.panels.remove(id).map(|(_, panel)| panel)
    }

    /// Drop every panel for which `keep` returns false. Session metadata
    /// is left alone.
    pub fn retain(&self, mut keep: impl FnMut(&PanelConfig) -> bool) {
        self.panels.retain(|_, panel| keep(panel));
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }
}

#[async_trait]
impl PanelRepository for InMemoryRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<PanelConfig>, PanelError> {
        Ok(self.panels.get(id).map(|p| p.clone()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<PanelConfig>, PanelError> {
        Ok(self
            .panels
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.clone()))
    }

    async fn list(&self) -> Result<Vec<PanelConfig>, PanelError> {
        let mut panels: Vec<PanelConfig> = self.panels.iter().map(|p| p.clone()).collect();
        panels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(panels)
    }

    async fn session_metadata(
        &self,
        panel_id: &str,
        key: &str,
    ) -> Result<Option<String>, PanelError> {
        Ok(self
            .metadata
            .get(&(panel_id.to_owned(), key.to_owned()))
            .map(|v| v.clone()))
    }

    async fn store_session_metadata(
        &self,
        panel_id: &str,
        key: &str,
        value: String,
    ) -> Result<(), PanelError> {
        self.metadata
            .insert((panel_id.to_owned(), key.to_owned()), value);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::PanelType;

    #[tokio::test]
    async fn lookups_by_id_and_name() {
        let repo = InMemoryRepository::with_panels([
            PanelConfig::new("1", "berlin", PanelType::Marzban),
            PanelConfig::new("2", "amsterdam", PanelType::XUi),
        ]);
        assert_eq!(repo.find_by_id("2").await.unwrap().unwrap().name, "amsterdam");
        assert_eq!(repo.find_by_name("berlin").await.unwrap().unwrap().id, "1");
        assert!(repo.find_by_name("paris").await.unwrap().is_none());

        let names: Vec<String> = repo.list().await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["amsterdam", "berlin"]);
    }

    #[tokio::test]
    async fn metadata_is_scoped_per_panel() {
        let repo = InMemoryRepository::new();
        repo.store_session_metadata("1", LAST_AUTH_AT, "t1".into())
            .await
            .unwrap();
        assert_eq!(
            repo.session_metadata("1", LAST_AUTH_AT).await.unwrap().as_deref(),
            Some("t1")
        );
        assert!(repo.session_metadata("2", LAST_AUTH_AT).await.unwrap().is_none());
    }
}
