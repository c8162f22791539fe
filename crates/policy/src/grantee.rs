//! Grantees: the subjects a permission can be granted to.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Name stored on public grants.
pub const PUBLIC_GRANTEE: &str = "*";

/// A unique identifier for a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalId(pub Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PrincipalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse()
            .map(Self)
            .map_err(|_| Error::InvalidPrincipalId(s.to_string()))
    }
}

/// Grantee kind as recorded on a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GranteeKind {
    User,
    Group,
    Public,
    /// Reserved; no grant may target it.
    Role,
}

impl GranteeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GranteeKind::User => "user",
            GranteeKind::Group => "group",
            GranteeKind::Public => "public",
            GranteeKind::Role => "role",
        }
    }
}

impl fmt::Display for GranteeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GranteeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(GranteeKind::User),
            "group" => Ok(GranteeKind::Group),
            "public" => Ok(GranteeKind::Public),
            "role" => Ok(GranteeKind::Role),
            other => Err(Error::UnknownGranteeKind(other.to_string())),
        }
    }
}

/// The subject of a grant.
///
/// Each variant carries exactly the field its kind requires, so a user
/// grantee never has a name and a group grantee never has a principal id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Grantee {
    User { id: PrincipalId },
    Group { name: String },
    Public,
}

impl Grantee {
    pub fn user(id: PrincipalId) -> Self {
        Grantee::User { id }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Grantee::Group { name: name.into() }
    }

    /// Build a grantee from loosely-typed parts, enforcing the field invariant.
    pub fn from_parts(
        kind: GranteeKind,
        id: Option<PrincipalId>,
        name: Option<&str>,
    ) -> Result<Self> {
        match (kind, id, name) {
            (GranteeKind::User, Some(id), None) => Ok(Grantee::User { id }),
            (GranteeKind::User, _, _) => Err(Error::InvalidGrantee(
                "user grantee requires a principal id and no name".to_string(),
            )),
            (GranteeKind::Group, None, Some(name)) if !name.trim().is_empty() => {
                Ok(Grantee::Group {
                    name: name.to_string(),
                })
            }
            (GranteeKind::Group, _, _) => Err(Error::InvalidGrantee(
                "group grantee requires a non-empty name and no principal id".to_string(),
            )),
            (GranteeKind::Public, None, None | Some(PUBLIC_GRANTEE)) => Ok(Grantee::Public),
            (GranteeKind::Public, _, _) => Err(Error::InvalidGrantee(format!(
                "public grantee takes no principal id and no name other than '{PUBLIC_GRANTEE}'"
            ))),
            (GranteeKind::Role, _, _) => Err(Error::ReservedGranteeKind(GranteeKind::Role)),
        }
    }

    pub fn kind(&self) -> GranteeKind {
        match self {
            Grantee::User { .. } => GranteeKind::User,
            Grantee::Group { .. } => GranteeKind::Group,
            Grantee::Public => GranteeKind::Public,
        }
    }

    /// The `granteeId` column value.
    pub fn principal_id(&self) -> Option<PrincipalId> {
        match self {
            Grantee::User { id } => Some(*id),
            _ => None,
        }
    }

    /// The `granteeName` column value.
    pub fn name(&self) -> Option<&str> {
        match self {
            Grantee::User { .. } => None,
            Grantee::Group { name } => Some(name),
            Grantee::Public => Some(PUBLIC_GRANTEE),
        }
    }
}

impl fmt::Display for Grantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grantee::User { id } => write!(f, "user:{id}"),
            Grantee::Group { name } => write!(f, "group:{name}"),
            Grantee::Public => f.write_str("public"),
        }
    }
}
