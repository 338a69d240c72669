use std::path::PathBuf;

use crate::core::{OverlayError, Result};

/// Filesystem and platform configuration for the overlay service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Canonical path of the persisted state document.
    pub state_file: PathBuf,

    /// Directory holding generated idmap files.
    pub idmap_cache_dir: PathBuf,

    /// Path of the external idmap generator binary.
    pub idmap_binary: PathBuf,

    /// Package whose resources every application implicitly loads.
    pub framework_package: String,
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self {
            state_file: PathBuf::from("/data/system/overlays.json"),
            idmap_cache_dir: PathBuf::from("/data/resource-cache"),
            idmap_binary: PathBuf::from("/system/bin/idmap"),
            framework_package: "android".to_string(),
        }
    }

    /// Set the state document path
    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = path.into();
        self
    }

    /// Set the idmap cache directory
    pub fn idmap_cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.idmap_cache_dir = path.into();
        self
    }

    /// Set the idmap generator binary
    pub fn idmap_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.idmap_binary = path.into();
        self
    }

    /// Set the framework package name
    pub fn framework_package(mut self, package: &str) -> Self {
        self.framework_package = package.to_string();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.state_file.as_os_str().is_empty() {
            return Err(OverlayError::BadArgument(
                "state_file cannot be empty".to_string(),
            ));
        }
        if self.idmap_cache_dir.as_os_str().is_empty() {
            return Err(OverlayError::BadArgument(
                "idmap_cache_dir cannot be empty".to_string(),
            ));
        }
        if self.framework_package.is_empty() {
            return Err(OverlayError::BadArgument(
                "framework_package cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}
