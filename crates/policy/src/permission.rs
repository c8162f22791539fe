use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A permission level. Ordered by inclusion: `Admin ⊇ Delete ⊇ Write ⊇ Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Delete,
    Admin,
}

impl Permission {
    /// All permission levels, lowest first.
    pub const ALL: [Permission; 4] = [
        Permission::Read,
        Permission::Write,
        Permission::Delete,
        Permission::Admin,
    ];

    /// The requested permissions a grant at this level is sufficient for.
    ///
    /// This table is the only place the hierarchy is defined.
    pub const fn closure(self) -> &'static [Permission] {
        match self {
            Permission::Admin => &[
                Permission::Admin,
                Permission::Delete,
                Permission::Write,
                Permission::Read,
            ],
            Permission::Delete => &[Permission::Delete, Permission::Write, Permission::Read],
            Permission::Write => &[Permission::Write, Permission::Read],
            Permission::Read => &[Permission::Read],
        }
    }

    /// Whether a grant at this level satisfies a request for `requested`.
    pub fn satisfies(self, requested: Permission) -> bool {
        self.closure().contains(&requested)
    }

    /// Grant levels whose closure contains `requested`.
    pub fn satisfied_by(requested: Permission) -> Vec<Permission> {
        Self::ALL
            .into_iter()
            .filter(|granted| granted.satisfies(requested))
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
            Permission::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "delete" => Ok(Permission::Delete),
            "admin" => Ok(Permission::Admin),
            other => Err(Error::UnknownPermission(other.to_string())),
        }
    }
}

/// Kind of protected resource.
///
/// New kinds are added as variants; the engine never inspects resource content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Document => "document",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "document" => Ok(ResourceType::Document),
            other => Err(Error::UnknownResourceType(other.to_string())),
        }
    }
}
