//! Configuration system for toolbridge.
//!
//! Provides TOML-based configuration with:
//! - Client settings (`[client]`): timeouts, development mode, HTTP headers,
//!   environment for spawned endpoint processes
//! - Named endpoints (`[[server]]`) the CLI can connect to by name
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigLayer, ConfigLoader, LayerKind, LoadedConfig, load_config_file, user_config_dir,
};
pub use error::{ConfigError, Result};
pub use types::*;
