use crate::descriptor::StorageArea;
use crate::error::ResourceError;
use serde::{Deserialize, Serialize};

/// Loader settings, usually read from a TOML file:
///
/// ```toml
/// agent_count = 4
/// read_only_path = "data/packages"
/// read_write_path = "cache/packages"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoaderConfig {
    /// Number of load agents, i.e. tasks that may be in flight at once.
    pub agent_count: usize,
    pub read_only_path: String,
    pub read_write_path: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            agent_count: 4,
            read_only_path: String::new(),
            read_write_path: String::new(),
        }
    }
}

impl LoaderConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ResourceError> {
        let config: LoaderConfig =
            toml::from_str(content).map_err(|e| ResourceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ResourceError> {
        toml::to_string(self).map_err(|e| ResourceError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ResourceError> {
        if self.agent_count == 0 {
            return Err(ResourceError::ConfigInvalid(
                "Agent count must be at least 1.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn storage_path(&self, storage: StorageArea) -> &str {
        match storage {
            StorageArea::ReadOnly => &self.read_only_path,
            StorageArea::ReadWrite => &self.read_write_path,
        }
    }
}

/// Joins a storage base and a relative entry, normalizing separators to `/`.
pub(crate) fn regular_path(base: &str, entry: &str) -> String {
    let joined = if base.is_empty() {
        entry.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches(['/', '\\']), entry)
    };
    joined.replace('\\', "/")
}
