//! Finding config files and stacking them.
//!
//! Two layers, lowest precedence first:
//! 1. the user file, `<config dir>/config.toml`, where the config dir is
//!    an explicit override, then `TOOLBRIDGE_CONFIG_DIR`, then the
//!    platform default (`~/.config/toolbridge` on Linux)
//! 2. the project file, `toolbridge.toml` in the working directory
//!
//! Command-line flags sit on top of both and are applied by the CLI.

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, ToolbridgeConfig};

const USER_CONFIG_FILE: &str = "config.toml";
const PROJECT_CONFIG_FILE: &str = "toolbridge.toml";
const APP_DIR: &str = "toolbridge";
const CONFIG_DIR_ENV: &str = "TOOLBRIDGE_CONFIG_DIR";

/// Which layer a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    User,
    Project,
}

/// One candidate config file and what happened to it.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub kind: LayerKind,
    pub path: PathBuf,
    /// The file existed and was merged.
    pub applied: bool,
}

/// The merged configuration plus a record of how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ToolbridgeConfig,
    /// Every file that was considered, in merge order.
    pub layers: Vec<ConfigLayer>,
    /// Problems that were tolerated: unreadable or invalid files are skipped.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the files that actually contributed.
    pub fn applied_paths(&self) -> impl Iterator<Item = &Path> {
        self.layers
            .iter()
            .filter(|layer| layer.applied)
            .map(|layer| layer.path.as_path())
    }
}

/// Builder for a layered load.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config_dir: Option<PathBuf>,
    project_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this directory for the user layer instead of the environment/platform default.
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Look for the project file here instead of the working directory.
    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Read and merge every layer. Never fails: unreadable or invalid
    /// layers are skipped and reported in [`LoadedConfig::warnings`].
    pub fn load(&self) -> LoadedConfig {
        let mut candidates = Vec::with_capacity(2);
        if let Some(dir) = self.config_dir.clone().or_else(user_config_dir) {
            candidates.push((LayerKind::User, dir.join(USER_CONFIG_FILE)));
        }
        let project = match &self.project_dir {
            Some(dir) => dir.join(PROJECT_CONFIG_FILE),
            None => PathBuf::from(PROJECT_CONFIG_FILE),
        };
        candidates.push((LayerKind::Project, project));

        let mut config = ToolbridgeConfig::new();
        let mut warnings = Vec::new();
        let layers = candidates
            .into_iter()
            .map(|(kind, path)| {
                let applied = match read_layer(&path) {
                    Ok(Some(layer)) => {
                        config.merge(layer);
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        warnings.push(format!("skipped {}: {}", path.display(), e));
                        false
                    }
                };
                ConfigLayer { kind, path, applied }
            })
            .collect();

        // Each file validated alone; the combination can still conflict.
        if let Err(e) = config.validate() {
            warnings.push(format!("combined configuration is invalid: {}", e));
        }

        LoadedConfig {
            config,
            layers,
            warnings,
        }
    }
}

/// Parse and validate one file.
pub fn load_config_file(path: &Path) -> Result<ToolbridgeConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    ToolbridgeConfig::from_toml(&text)
}

/// The user config directory: `TOOLBRIDGE_CONFIG_DIR` if set and non-empty,
/// otherwise `toolbridge/` under the platform config dir.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|base| base.join(APP_DIR)),
    }
}

/// `Ok(None)` when the file does not exist.
fn read_layer(path: &Path) -> Result<Option<ToolbridgeConfig>> {
    if !path.is_file() {
        return Ok(None);
    }
    load_config_file(path).map(Some)
}
