//! Project configuration loaded from `.gantry/config.toml`.

use crate::core::error::GantryError;
use crate::core::state::LogIntegrityMode;
use crate::plugins::policy::SupervisorPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding config, definition, and state under the project root.
pub const GANTRY_DIR: &str = ".gantry";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub state_file: String,
    pub definition_file: String,
    /// Hold a cross-process advisory lock for each write transaction.
    pub lock: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_file: "state.json".to_string(),
            definition_file: "definition.json".to_string(),
            lock: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    /// Mode stamped on a freshly created state document.
    pub default_mode: LogIntegrityMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloseoutConfig {
    /// Require the assessment file to exist and carry the drift sections.
    pub verify_assessment: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GantryConfig {
    pub store: StoreConfig,
    pub supervisor: SupervisorPolicy,
    pub audit: AuditConfig,
    pub closeout: CloseoutConfig,
}

impl GantryConfig {
    pub fn gantry_dir(root: &Path) -> PathBuf {
        root.join(GANTRY_DIR)
    }

    pub fn state_path(&self, root: &Path) -> PathBuf {
        Self::gantry_dir(root).join(&self.store.state_file)
    }

    pub fn definition_path(&self, root: &Path) -> PathBuf {
        Self::gantry_dir(root).join(&self.store.definition_file)
    }

    pub fn from_toml(content: &str) -> Result<Self, GantryError> {
        toml::from_str(content).map_err(|e| GantryError::ConfigError(e.to_string()))
    }
}

/// Load `<root>/.gantry/config.toml`. A missing file means defaults.
pub fn load_config(root: &Path) -> Result<GantryConfig, GantryError> {
    let config_path = GantryConfig::gantry_dir(root).join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(GantryConfig::default());
    }
    let content = fs::read_to_string(&config_path).map_err(GantryError::IoError)?;
    let config = GantryConfig::from_toml(&content)?;
    tracing::debug!(path = %config_path.display(), "loaded config");
    Ok(config)
}
