//! CLI error types.

use crate::config::ConfigError;
use thiserror::Error;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No principal is registered under the given name.
    #[error("no principal named '{name}'. Run 'grantctl principal add {name}' first")]
    PrincipalNotFound { name: String },

    /// An `--expires` value is neither a timestamp nor a duration.
    #[error("invalid expiry '{value}': expected an RFC 3339 timestamp or a duration like 30m, 12h, 7d")]
    InvalidExpiry { value: String },

    /// Configuration is invalid or unreadable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the engine layer.
    #[error(transparent)]
    Engine(#[from] engine::Error),

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    /// A permission, grantee or resource type argument is malformed.
    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
