use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use panelkit_core::{InMemoryRepository, PanelConfig, PanelError, PanelRepository};

use crate::{ConfigError, load_config_from};

/// Panels from a `panels.toml`, with session metadata kept in memory.
pub struct ConfigRepository {
    path: PathBuf,
    panels: InMemoryRepository,
}

impl ConfigRepository {
    /// Load `path` (plus environment overrides) and resolve every secret.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let repo = Self {
            path: path.into(),
            panels: InMemoryRepository::new(),
        };
        repo.reload()?;
        Ok(repo)
    }

    /// Open the file at [`crate::config_path`].
    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(crate::config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file. Panels that disappeared are dropped; stored
    /// session metadata survives. On error the current panels stay.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        let panels = load_config_from(&self.path)?.panel_configs()?;
        let ids: Vec<String> = panels.iter().map(|p| p.id.clone()).collect();
        self.panels.retain(|p| ids.contains(&p.id));
        for panel in panels {
            self.panels.insert(panel);
        }
        info!(path = %self.path.display(), panels = ids.len(), "panel config loaded");
        Ok(ids.len())
    }
}

#[async_trait]
impl PanelRepository for ConfigRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<PanelConfig>, PanelError> {
        self.panels.find_by_id(id).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<PanelConfig>, PanelError> {
        self.panels.find_by_name(name).await
    }

    async fn list(&self) -> Result<Vec<PanelConfig>, PanelError> {
        self.panels.list().await
    }

    async fn session_metadata(
        &self,
        panel_id: &str,
        key: &str,
    ) -> Result<Option<String>, PanelError> {
        self.panels.session_metadata(panel_id, key).await
    }

    async fn store_session_metadata(
        &self,
        panel_id: &str,
        key: &str,
        value: String,
    ) -> Result<(), PanelError> {
        self.panels.store_session_metadata(panel_id, key, value).await
    }
}
