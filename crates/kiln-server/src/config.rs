use crate::RegistryError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/kiln/server.toml";

/// Contents of the daemon's TOML config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub registry_host: Option<String>,
    /// Parent directory for clone and overlay scratch space.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| RegistryError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Load `path` if it exists; a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, RegistryError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// The registry host, preferring `flag` over the file. Refuses to
    /// continue without one.
    pub fn resolve_registry(&self, flag: Option<&str>) -> Result<String, RegistryError> {
        flag.or(self.registry_host.as_deref())
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| r.trim_end_matches('/').to_owned())
            .ok_or_else(|| {
                RegistryError::Config(
                    "no registry host configured (set registry_host or pass --registry)".to_owned(),
                )
            })
    }
}
