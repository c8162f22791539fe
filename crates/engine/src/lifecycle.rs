//! Resource lifecycle gate.
//!
//! [`Engine`] is a mechanism: it grants and revokes for anyone who calls it.
//! [`Lifecycle`] is what user-facing flows call instead. It checks the
//! caller's own permission first and refuses with [`Error::Denied`].

use crate::{Directory, Engine, Error, GrantRequest, Result};
use chrono::{DateTime, Utc};
use policy::{Grantee, Permission, PrincipalId, ResourceType};
use storage::Grant;

/// Permission-checked resource operations on behalf of a caller.
pub struct Lifecycle<'a, D> {
    engine: &'a Engine<D>,
}

impl<'a, D: Directory> Lifecycle<'a, D> {
    pub fn new(engine: &'a Engine<D>) -> Self {
        Self { engine }
    }

    /// Require `permission` before a protected action (download, delete, ...).
    pub fn authorize(
        &self,
        caller: PrincipalId,
        resource_type: ResourceType,
        resource_id: &str,
        permission: Permission,
    ) -> Result<()> {
        if self
            .engine
            .has_permission(caller, resource_type, resource_id, permission)?
        {
            Ok(())
        } else {
            Err(Error::Denied(format!(
                "{caller} lacks {permission} on {resource_type} {resource_id}"
            )))
        }
    }

    /// Record a newly created resource with its creator as admin.
    ///
    /// Call this in the same logical operation that creates the resource. A
    /// resource id that already has ledger entries is refused, so creation
    /// cannot be used to take over an existing resource.
    #[tracing::instrument(skip(self), fields(creator = %creator))]
    pub fn create_resource(
        &self,
        creator: PrincipalId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<Grant> {
        if resource_id.is_empty() {
            return Err(policy::Error::EmptyResourceId.into());
        }
        if self.engine.directory().principal(creator)?.is_none() {
            return Err(Error::NotFound(format!("principal {creator}")));
        }

        let grant = Grant::new(
            resource_type,
            resource_id,
            Grantee::user(creator),
            Permission::Admin,
            creator,
        );
        if !self.engine.store().insert_first(&grant)? {
            return Err(Error::Conflict(format!(
                "{resource_type} {resource_id} already exists"
            )));
        }
        tracing::info!(grant_id = %grant.id, "resource created");
        Ok(grant)
    }

    /// Grant access to another grantee. The caller must hold `admin`.
    pub fn share(
        &self,
        caller: PrincipalId,
        resource_type: ResourceType,
        resource_id: &str,
        grantee: Grantee,
        permission: Permission,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Grant> {
        self.authorize(caller, resource_type, resource_id, Permission::Admin)?;
        let mut request =
            GrantRequest::new(resource_type, resource_id, grantee, permission, caller);
        request.expires_at = expires_at;
        self.engine.grant(request)
    }

    /// Revoke access from a grantee. The caller must hold `admin`.
    pub fn unshare(
        &self,
        caller: PrincipalId,
        resource_type: ResourceType,
        resource_id: &str,
        grantee: &Grantee,
        permission: Permission,
    ) -> Result<usize> {
        self.authorize(caller, resource_type, resource_id, Permission::Admin)?;
        self.engine
            .revoke(resource_type, resource_id, grantee, permission)
    }

    /// Deactivate every grant on a deleted resource. The caller must hold
    /// `delete`. The records stay in the ledger.
    #[tracing::instrument(skip(self), fields(caller = %caller))]
    pub fn retire_resource(
        &self,
        caller: PrincipalId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<usize> {
        self.authorize(caller, resource_type, resource_id, Permission::Delete)?;
        let count = self
            .engine
            .store()
            .deactivate_resource(resource_type, resource_id)?;
        tracing::info!(count, "resource retired");
        Ok(count)
    }
}
