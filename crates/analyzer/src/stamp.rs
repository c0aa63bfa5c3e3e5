use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Failed to parse stamps: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to format stamps: {0}")]
    Format(#[from] toml::ser::Error),
    #[error("Stamp {0} has an empty asset name")]
    EmptyName(usize),
}

/// A static reference from `host` to `dependency`, as found by scanning
/// asset sources. Not the runtime dependency list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stamp {
    pub host: String,
    pub dependency: String,
}

impl Stamp {
    pub fn new(host: impl Into<String>, dependency: impl Into<String>) -> Self {
        Stamp {
            host: host.into(),
            dependency: dependency.into(),
        }
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.host, self.dependency)
    }
}

/// On-disk form of an edge list:
///
/// ```toml
/// [[stamp]]
/// host = "Assets/Hero.prefab"
/// dependency = "Assets/Hero.mat"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StampList {
    #[serde(default, rename = "stamp")]
    pub stamps: Vec<Stamp>,
}

impl StampList {
    pub fn from_toml_str(content: &str) -> Result<Self, AnalyzerError> {
        let list: StampList = toml::from_str(content)?;
        if let Some(index) = list
            .stamps
            .iter()
            .position(|stamp| stamp.host.is_empty() || stamp.dependency.is_empty())
        {
            return Err(AnalyzerError::EmptyName(index));
        }
        Ok(list)
    }

    pub fn to_toml_string(&self) -> Result<String, AnalyzerError> {
        Ok(toml::to_string(self)?)
    }
}
