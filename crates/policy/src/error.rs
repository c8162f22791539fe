//! Policy error types.

use crate::GranteeKind;
use thiserror::Error;

/// Validation errors raised while building permission-model values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A permission string is not one of `read`, `write`, `delete`, `admin`.
    #[error("unknown permission: {0}")]
    UnknownPermission(String),

    /// A resource type string has no matching variant.
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// A grantee kind string has no matching variant.
    #[error("unknown grantee kind: {0}")]
    UnknownGranteeKind(String),

    /// A resource id is empty.
    #[error("resource id must not be empty")]
    EmptyResourceId,

    /// A principal id is not a valid UUID.
    #[error("invalid principal id: {0}")]
    InvalidPrincipalId(String),

    /// The grantee fields do not match the grantee kind.
    #[error("invalid grantee: {0}")]
    InvalidGrantee(String),

    /// The grantee kind exists in the data model but cannot be granted to.
    #[error("grantee kind '{0}' is reserved")]
    ReservedGranteeKind(GranteeKind),
}

pub type Result<T> = std::result::Result<T, Error>;
