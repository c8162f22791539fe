//! Authorization decisions and the grant/revoke protocol.

use crate::{Directory, Error, Result};
use chrono::{DateTime, Utc};
use policy::{Grantee, GranteeKind, Permission, PrincipalId, ResourceType};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use storage::{Grant, GrantStore, GranteeMatch, Principal};
use tracing::instrument;

/// Input to [`Engine::grant`].
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub grantee: Grantee,
    pub permission: Permission,
    pub granted_by: PrincipalId,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GrantRequest {
    pub fn new(
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        grantee: Grantee,
        permission: Permission,
        granted_by: PrincipalId,
    ) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
            grantee,
            permission,
            granted_by,
            expires_at: None,
        }
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Build a request from untyped wire values.
    ///
    /// Fails with [`policy::Error`] on an unknown permission, resource type or
    /// grantee kind, or when the grantee fields do not fit the kind.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        resource_type: &str,
        resource_id: &str,
        grantee_kind: &str,
        grantee_id: Option<&str>,
        grantee_name: Option<&str>,
        permission: &str,
        granted_by: PrincipalId,
        expires_at: Option<DateTime<Utc>>,
    ) -> policy::Result<Self> {
        let kind: GranteeKind = grantee_kind.parse()?;
        let grantee_id = grantee_id.map(str::parse::<PrincipalId>).transpose()?;
        Ok(Self {
            resource_type: resource_type.parse()?,
            resource_id: resource_id.to_string(),
            grantee: Grantee::from_parts(kind, grantee_id, grantee_name)?,
            permission: permission.parse()?,
            granted_by,
            expires_at,
        })
    }
}

/// A current grant together with the grantor's directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourcePermission {
    pub grant: Grant,
    /// `None` when the grantor is no longer in the directory.
    pub grantor: Option<Principal>,
}

/// Decision layer over a [`GrantStore`] and a [`Directory`].
///
/// The engine keeps no state of its own. Every call reads the store and the
/// directory afresh, and the three grantee branches of a decision are
/// separate queries with no shared snapshot: a revoke that lands between
/// them may be observed by one branch and not another.
pub struct Engine<D> {
    store: GrantStore,
    directory: D,
}

impl<D: Directory> Engine<D> {
    pub fn new(store: GrantStore, directory: D) -> Self {
        Self { store, directory }
    }

    pub fn store(&self) -> &GrantStore {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Can `principal` perform `permission` on the resource right now?
    pub fn has_permission(
        &self,
        principal: PrincipalId,
        resource_type: ResourceType,
        resource_id: &str,
        permission: Permission,
    ) -> Result<bool> {
        self.has_permission_at(principal, resource_type, resource_id, permission, Utc::now())
    }

    /// [`Engine::has_permission`] evaluated against expiry at `at`.
    ///
    /// Branch order is direct, public, then groups, so the directory is only
    /// consulted when the cheaper branches fail.
    #[instrument(
        level = "debug",
        skip(self, at),
        fields(principal = %principal, resource_type = %resource_type, permission = %permission)
    )]
    pub fn has_permission_at(
        &self,
        principal: PrincipalId,
        resource_type: ResourceType,
        resource_id: &str,
        permission: Permission,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let levels = Permission::satisfied_by(permission);
        let check = |grantee: GranteeMatch<'_>| {
            self.store
                .has_current(resource_type, resource_id, grantee, &levels, at)
        };

        if check(GranteeMatch::User(principal))? {
            tracing::debug!(via = "user", "allowed");
            return Ok(true);
        }
        if check(GranteeMatch::Public)? {
            tracing::debug!(via = "public", "allowed");
            return Ok(true);
        }

        let groups = self.directory.groups(principal)?;
        if check(GranteeMatch::Groups(&groups))? {
            tracing::debug!(via = "group", "allowed");
            return Ok(true);
        }

        tracing::debug!("denied");
        Ok(false)
    }

    /// Resource ids of `resource_type` on which `principal` holds `permission`.
    pub fn accessible_resources(
        &self,
        principal: PrincipalId,
        resource_type: ResourceType,
        permission: Permission,
    ) -> Result<BTreeSet<String>> {
        self.accessible_resources_at(principal, resource_type, permission, Utc::now())
    }

    #[instrument(
        level = "debug",
        skip(self, at),
        fields(principal = %principal, resource_type = %resource_type, permission = %permission)
    )]
    pub fn accessible_resources_at(
        &self,
        principal: PrincipalId,
        resource_type: ResourceType,
        permission: Permission,
        at: DateTime<Utc>,
    ) -> Result<BTreeSet<String>> {
        let levels = Permission::satisfied_by(permission);
        let groups = self.directory.groups(principal)?;

        let mut resources = BTreeSet::new();
        for grantee in [
            GranteeMatch::User(principal),
            GranteeMatch::Groups(&groups),
            GranteeMatch::Public,
        ] {
            resources.extend(
                self.store
                    .current_resource_ids(resource_type, grantee, &levels, at)?,
            );
        }

        tracing::debug!(count = resources.len(), "resolved accessible resources");
        Ok(resources)
    }

    /// The highest permission `principal` currently holds on the resource.
    pub fn effective_permission(
        &self,
        principal: PrincipalId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Option<Permission>> {
        let now = Utc::now();
        for permission in Permission::ALL.into_iter().rev() {
            if self.has_permission_at(principal, resource_type, resource_id, permission, now)? {
                return Ok(Some(permission));
            }
        }
        Ok(None)
    }

    /// Append a new grant to the ledger.
    ///
    /// Identical grants are never merged: each call writes its own record,
    /// and each record is revoked independently.
    #[instrument(
        skip(self, request),
        fields(
            resource_type = %request.resource_type,
            resource_id = %request.resource_id,
            grantee = %request.grantee,
            permission = %request.permission,
        )
    )]
    pub fn grant(&self, request: GrantRequest) -> Result<Grant> {
        if request.resource_id.is_empty() {
            return Err(policy::Error::EmptyResourceId.into());
        }
        if let Grantee::User { id } = request.grantee {
            if self.directory.principal(id)?.is_none() {
                return Err(Error::NotFound(format!("principal {id}")));
            }
        }

        let grant = Grant::new(
            request.resource_type,
            request.resource_id,
            request.grantee,
            request.permission,
            request.granted_by,
        )
        .with_expiry(request.expires_at);
        self.store.insert(&grant)?;

        tracing::info!(grant_id = %grant.id, granted_by = %grant.granted_by, "grant recorded");
        Ok(grant)
    }

    /// Soft-revoke every active grant of exactly `permission` to `grantee`.
    ///
    /// Returns how many records were deactivated; zero is not an error.
    #[instrument(skip(self, grantee), fields(grantee = %grantee))]
    pub fn revoke(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        grantee: &Grantee,
        permission: Permission,
    ) -> Result<usize> {
        let count = self
            .store
            .deactivate(resource_type, resource_id, grantee, permission)?;
        tracing::info!(count, "grants revoked");
        Ok(count)
    }

    /// Active, unexpired grants on a resource in grant order, with grantors
    /// resolved through the directory.
    pub fn resource_permissions(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Vec<ResourcePermission>> {
        let grants = self
            .store
            .current_for_resource(resource_type, resource_id, Utc::now())?;

        let mut grantors: HashMap<PrincipalId, Option<Principal>> = HashMap::new();
        let mut permissions = Vec::with_capacity(grants.len());
        for grant in grants {
            let grantor = match grantors.get(&grant.granted_by) {
                Some(known) => known.clone(),
                None => {
                    let found = self.directory.principal(grant.granted_by)?;
                    grantors.insert(grant.granted_by, found.clone());
                    found
                }
            };
            permissions.push(ResourcePermission { grant, grantor });
        }
        Ok(permissions)
    }

    /// Every grant ever recorded on a resource, revoked and expired included.
    pub fn history(&self, resource_type: ResourceType, resource_id: &str) -> Result<Vec<Grant>> {
        Ok(self.store.history(resource_type, resource_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticDirectory;
    use chrono::{Duration, TimeZone};

    const DOC: ResourceType = ResourceType::Document;

    fn engine() -> Engine<StaticDirectory> {
        Engine::new(GrantStore::in_memory().unwrap(), StaticDirectory::new())
    }

    fn user(engine: &Engine<StaticDirectory>, name: &str) -> PrincipalId {
        engine.directory().add(name).unwrap()
    }

    fn grant(
        engine: &Engine<StaticDirectory>,
        resource_id: &str,
        grantee: Grantee,
        permission: Permission,
        by: PrincipalId,
    ) -> Grant {
        engine
            .grant(GrantRequest::new(DOC, resource_id, grantee, permission, by))
            .unwrap()
    }

    #[test]
    fn test_default_deny() {
        let engine = engine();
        let alice = user(&engine, "alice");
        for permission in Permission::ALL {
            assert!(!engine.has_permission(alice, DOC, "d1", permission).unwrap());
        }
    }

    #[test]
    fn test_admin_grant_implies_every_permission() {
        let engine = engine();
        let alice = user(&engine, "alice");
        grant(&engine, "d1", Grantee::user(alice), Permission::Admin, alice);

        for permission in Permission::ALL {
            assert!(engine.has_permission(alice, DOC, "d1", permission).unwrap());
        }
        assert!(!engine.has_permission(alice, DOC, "d2", Permission::Read).unwrap());
    }

    #[test]
    fn test_group_grant() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let owner = user(&engine, "owner");
        engine.directory().join(alice, "eng").unwrap();
        grant(&engine, "d1", Grantee::group("eng"), Permission::Write, owner);

        assert!(engine.has_permission(alice, DOC, "d1", Permission::Read).unwrap());
        assert!(engine.has_permission(alice, DOC, "d1", Permission::Write).unwrap());
        assert!(!engine.has_permission(alice, DOC, "d1", Permission::Admin).unwrap());
    }

    #[test]
    fn test_group_membership_is_read_per_decision() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let owner = user(&engine, "owner");
        grant(&engine, "d1", Grantee::group("eng"), Permission::Read, owner);

        assert!(!engine.has_permission(alice, DOC, "d1", Permission::Read).unwrap());
        engine.directory().join(alice, "eng").unwrap();
        assert!(engine.has_permission(alice, DOC, "d1", Permission::Read).unwrap());
        engine.directory().leave(alice, "eng").unwrap();
        assert!(!engine.has_permission(alice, DOC, "d1", Permission::Read).unwrap());
    }

    #[test]
    fn test_public_grant_reaches_anyone() {
        let engine = engine();
        let owner = user(&engine, "owner");
        grant(&engine, "d1", Grantee::Public, Permission::Read, owner);

        // Not even registered in the directory.
        let stranger = PrincipalId::new();
        assert!(engine.has_permission(stranger, DOC, "d1", Permission::Read).unwrap());
        assert!(!engine.has_permission(stranger, DOC, "d1", Permission::Write).unwrap());
    }

    #[test]
    fn test_expired_grant_never_satisfies() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let past = Utc::now() - Duration::hours(1);
        engine
            .grant(
                GrantRequest::new(DOC, "d1", Grantee::user(alice), Permission::Admin, alice)
                    .expires_at(past),
            )
            .unwrap();

        assert!(!engine.has_permission(alice, DOC, "d1", Permission::Read).unwrap());
        assert!(engine.accessible_resources(alice, DOC, Permission::Read).unwrap().is_empty());
        assert!(engine.resource_permissions(DOC, "d1").unwrap().is_empty());
    }

    #[test]
    fn test_grant_expires_lazily() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let recorded = engine
            .grant(
                GrantRequest::new(DOC, "d1", Grantee::user(alice), Permission::Read, alice)
                    .expires_at(Utc::now() + Duration::hours(1)),
            )
            .unwrap();
        let expiry = recorded.expires_at.unwrap();

        let before = expiry - Duration::microseconds(1);
        let after = expiry + Duration::minutes(1);
        assert!(engine.has_permission_at(alice, DOC, "d1", Permission::Read, before).unwrap());
        // Expiry is exclusive.
        assert!(!engine.has_permission_at(alice, DOC, "d1", Permission::Read, expiry).unwrap());
        assert!(!engine.has_permission_at(alice, DOC, "d1", Permission::Read, after).unwrap());
        assert!(engine
            .accessible_resources_at(alice, DOC, Permission::Read, expiry)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_far_future_expiry() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        engine
            .grant(
                GrantRequest::new(DOC, "d1", Grantee::user(alice), Permission::Read, alice)
                    .expires_at(far),
            )
            .unwrap();

        assert!(engine.has_permission(alice, DOC, "d1", Permission::Read).unwrap());
        assert_eq!(engine.resource_permissions(DOC, "d1").unwrap().len(), 1);
        let history = engine.history(DOC, "d1").unwrap();
        assert_eq!(history[0].expires_at, Some(far));
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let owner = user(&engine, "owner");
        grant(&engine, "d1", Grantee::user(alice), Permission::Write, owner);
        grant(&engine, "d1", Grantee::user(alice), Permission::Write, owner);

        let grantee = Grantee::user(alice);
        assert_eq!(engine.revoke(DOC, "d1", &grantee, Permission::Write).unwrap(), 2);
        assert_eq!(engine.revoke(DOC, "d1", &grantee, Permission::Write).unwrap(), 0);
        assert!(!engine.has_permission(alice, DOC, "d1", Permission::Read).unwrap());
    }

    #[test]
    fn test_revoke_leaves_independent_grants() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let owner = user(&engine, "owner");
        engine.directory().join(alice, "eng").unwrap();
        grant(&engine, "d1", Grantee::user(alice), Permission::Write, owner);
        grant(&engine, "d1", Grantee::group("eng"), Permission::Read, owner);

        assert_eq!(
            engine.revoke(DOC, "d1", &Grantee::user(alice), Permission::Write).unwrap(),
            1
        );
        assert!(!engine.has_permission(alice, DOC, "d1", Permission::Write).unwrap());
        assert!(engine.has_permission(alice, DOC, "d1", Permission::Read).unwrap());
    }

    #[test]
    fn test_revoke_matches_exact_permission() {
        let engine = engine();
        let alice = user(&engine, "alice");
        grant(&engine, "d1", Grantee::user(alice), Permission::Write, alice);

        let grantee = Grantee::user(alice);
        assert_eq!(engine.revoke(DOC, "d1", &grantee, Permission::Admin).unwrap(), 0);
        assert!(engine.has_permission(alice, DOC, "d1", Permission::Write).unwrap());
    }

    #[test]
    fn test_grant_then_revoke_scenario() {
        let engine = engine();
        let u1 = user(&engine, "u1");
        grant(&engine, "D1", Grantee::user(u1), Permission::Admin, u1);
        assert!(engine.has_permission(u1, DOC, "D1", Permission::Delete).unwrap());

        assert_eq!(
            engine.revoke(DOC, "D1", &Grantee::user(u1), Permission::Admin).unwrap(),
            1
        );
        assert!(!engine.has_permission(u1, DOC, "D1", Permission::Delete).unwrap());
    }

    #[test]
    fn test_accessible_resources_dedup() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let owner = user(&engine, "owner");
        engine.directory().join(alice, "eng").unwrap();
        grant(&engine, "d1", Grantee::user(alice), Permission::Read, owner);
        grant(&engine, "d1", Grantee::Public, Permission::Read, owner);
        grant(&engine, "d1", Grantee::group("eng"), Permission::Admin, owner);
        grant(&engine, "d2", Grantee::group("eng"), Permission::Write, owner);
        grant(&engine, "d3", Grantee::group("ops"), Permission::Admin, owner);

        let readable = engine.accessible_resources(alice, DOC, Permission::Read).unwrap();
        assert_eq!(readable.into_iter().collect::<Vec<_>>(), vec!["d1", "d2"]);

        let writable = engine.accessible_resources(alice, DOC, Permission::Write).unwrap();
        assert_eq!(writable.into_iter().collect::<Vec<_>>(), vec!["d1", "d2"]);

        let admin = engine.accessible_resources(alice, DOC, Permission::Admin).unwrap();
        assert_eq!(admin.into_iter().collect::<Vec<_>>(), vec!["d1"]);
    }

    #[test]
    fn test_accessible_resources_agrees_with_has_permission() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let owner = user(&engine, "owner");
        engine.directory().join(alice, "eng").unwrap();
        grant(&engine, "d1", Grantee::user(alice), Permission::Delete, owner);
        grant(&engine, "d2", Grantee::group("eng"), Permission::Read, owner);
        grant(&engine, "d3", Grantee::Public, Permission::Write, owner);
        grant(&engine, "d4", Grantee::user(owner), Permission::Admin, owner);

        for permission in Permission::ALL {
            let listed = engine.accessible_resources(alice, DOC, permission).unwrap();
            for id in ["d1", "d2", "d3", "d4"] {
                assert_eq!(
                    listed.contains(id),
                    engine.has_permission(alice, DOC, id, permission).unwrap(),
                    "{id} / {permission}"
                );
            }
        }
    }

    #[test]
    fn test_grant_unknown_user_is_not_found() {
        let engine = engine();
        let owner = user(&engine, "owner");
        let err = engine
            .grant(GrantRequest::new(
                DOC,
                "d1",
                Grantee::user(PrincipalId::new()),
                Permission::Read,
                owner,
            ))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(engine.history(DOC, "d1").unwrap().is_empty());
    }

    #[test]
    fn test_grant_from_parts_validation() {
        let owner = PrincipalId::new();
        let bad_permission =
            GrantRequest::from_parts("document", "d1", "public", None, None, "owner", owner, None);
        assert!(matches!(bad_permission, Err(policy::Error::UnknownPermission(_))));

        let mismatched = GrantRequest::from_parts(
            "document",
            "d1",
            "group",
            Some(owner.to_string().as_str()),
            Some("eng"),
            "read",
            owner,
            None,
        );
        assert!(matches!(mismatched, Err(policy::Error::InvalidGrantee(_))));

        let request =
            GrantRequest::from_parts("document", "d1", "group", None, Some("eng"), "write", owner, None)
                .unwrap();
        assert_eq!(request.grantee, Grantee::group("eng"));
        assert_eq!(request.permission, Permission::Write);
    }

    #[test]
    fn test_grant_empty_resource_id() {
        let engine = engine();
        let owner = user(&engine, "owner");
        let err = engine
            .grant(GrantRequest::new(DOC, "", Grantee::Public, Permission::Read, owner))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(policy::Error::EmptyResourceId)));
    }

    #[test]
    fn test_duplicate_grants_are_kept() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let first = grant(&engine, "d1", Grantee::user(alice), Permission::Read, alice);
        let second = grant(&engine, "d1", Grantee::user(alice), Permission::Read, alice);

        assert_ne!(first.id, second.id);
        assert_eq!(engine.resource_permissions(DOC, "d1").unwrap().len(), 2);
    }

    #[test]
    fn test_resource_permissions_resolve_grantor() {
        let engine = engine();
        let owner = user(&engine, "owner");
        let alice = user(&engine, "alice");
        let ghost = PrincipalId::new();
        grant(&engine, "d1", Grantee::user(owner), Permission::Admin, owner);
        grant(&engine, "d1", Grantee::user(alice), Permission::Read, owner);
        grant(&engine, "d1", Grantee::Public, Permission::Read, ghost);
        engine.revoke(DOC, "d1", &Grantee::user(alice), Permission::Read).unwrap();

        let permissions = engine.resource_permissions(DOC, "d1").unwrap();
        assert_eq!(permissions.len(), 2);
        assert_eq!(permissions[0].grant.grantee, Grantee::user(owner));
        assert_eq!(
            permissions[0].grantor.as_ref().map(|p| p.name.as_str()),
            Some("owner")
        );
        assert_eq!(permissions[1].grant.grantee, Grantee::Public);
        assert!(permissions[1].grantor.is_none());

        // The revoked record stays in the ledger.
        let history = engine.history(DOC, "d1").unwrap();
        assert_eq!(history.len(), 3);
        assert!(!history[1].active);
    }

    #[test]
    fn test_effective_permission() {
        let engine = engine();
        let alice = user(&engine, "alice");
        let owner = user(&engine, "owner");
        engine.directory().join(alice, "eng").unwrap();
        assert_eq!(engine.effective_permission(alice, DOC, "d1").unwrap(), None);

        grant(&engine, "d1", Grantee::Public, Permission::Read, owner);
        assert_eq!(
            engine.effective_permission(alice, DOC, "d1").unwrap(),
            Some(Permission::Read)
        );

        grant(&engine, "d1", Grantee::group("eng"), Permission::Delete, owner);
        assert_eq!(
            engine.effective_permission(alice, DOC, "d1").unwrap(),
            Some(Permission::Delete)
        );
    }
}
