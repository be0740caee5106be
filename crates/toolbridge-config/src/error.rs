//! Errors from loading and validating configuration.

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[error("not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Well-formed, but the value cannot be used.
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("no server named '{0}' is configured")]
    ServerNotFound(String),
}
