//! Grant records for the grant ledger.

use chrono::{DateTime, SubsecRound, Utc};
use policy::{Grantee, Permission, PrincipalId, ResourceType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a grant record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantId(pub Uuid);

impl GrantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GrantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single grant in the ledger.
///
/// Timestamps carry microsecond precision, matching what the store persists.
///
/// Records are immutable once written except for `active`, which only ever
/// goes from `true` to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub grantee: Grantee,
    pub permission: Permission,
    pub granted_by: PrincipalId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Grant {
    /// Create an active, non-expiring grant timestamped now.
    pub fn new(
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        grantee: Grantee,
        permission: Permission,
        granted_by: PrincipalId,
    ) -> Self {
        Self {
            id: GrantId::new(),
            resource_type,
            resource_id: resource_id.into(),
            grantee,
            permission,
            granted_by,
            granted_at: Utc::now().trunc_subsecs(6),
            expires_at: None,
            active: true,
        }
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at.map(|t| t.trunc_subsecs(6));
        self
    }

    /// Whether the grant counts towards decisions at `at`.
    pub fn is_current(&self, at: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|expiry| expiry > at)
    }
}
