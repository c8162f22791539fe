//! Permission model for shared resources.
//!
//! Core principle: **a grant at level `g` satisfies a request for `r` iff
//! `r` is in `g`'s closure.** Everything else in the system builds on the
//! constant table in [`Permission::closure`].

mod error;
mod grantee;
mod permission;

pub use error::{Error, Result};
pub use grantee::{Grantee, GranteeKind, PrincipalId, PUBLIC_GRANTEE};
pub use permission::{Permission, ResourceType};
