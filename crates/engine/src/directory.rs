//! Principal directory seam.

use policy::PrincipalId;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use storage::{Principal, PrincipalStore};
use thiserror::Error;

/// The directory could not answer.
#[derive(Debug, Error)]
#[error("directory unavailable: {0}")]
pub struct DirectoryError(pub String);

/// Source of principals and their group memberships.
///
/// The engine queries it on every decision and never keeps the answers, so
/// membership is exactly as fresh as the implementation makes it.
pub trait Directory {
    /// Look up a principal by id.
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>, DirectoryError>;

    /// Current group names of a principal. Unknown principals have none.
    fn groups(&self, id: PrincipalId) -> Result<Vec<String>, DirectoryError>;
}

impl<D: Directory + ?Sized> Directory for &D {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        (**self).principal(id)
    }

    fn groups(&self, id: PrincipalId) -> Result<Vec<String>, DirectoryError> {
        (**self).groups(id)
    }
}

impl Directory for PrincipalStore {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        self.get(id).map_err(|e| DirectoryError(e.to_string()))
    }

    fn groups(&self, id: PrincipalId) -> Result<Vec<String>, DirectoryError> {
        PrincipalStore::groups(self, id).map_err(|e| DirectoryError(e.to_string()))
    }
}

/// In-memory directory for embedding and tests.
#[derive(Default)]
pub struct StaticDirectory {
    inner: RwLock<Members>,
}

#[derive(Default)]
struct Members {
    principals: HashMap<PrincipalId, Principal>,
    groups: HashMap<PrincipalId, BTreeSet<String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a principal and return its id.
    pub fn add(&self, name: impl Into<String>) -> Result<PrincipalId, DirectoryError> {
        let principal = Principal {
            id: PrincipalId::new(),
            name: name.into(),
            created_at: chrono::Utc::now(),
        };
        let id = principal.id;
        self.write()?.principals.insert(id, principal);
        Ok(id)
    }

    pub fn join(&self, id: PrincipalId, group: impl Into<String>) -> Result<(), DirectoryError> {
        self.write()?.groups.entry(id).or_default().insert(group.into());
        Ok(())
    }

    pub fn leave(&self, id: PrincipalId, group: &str) -> Result<(), DirectoryError> {
        if let Some(groups) = self.write()?.groups.get_mut(&id) {
            groups.remove(group);
        }
        Ok(())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Members>, DirectoryError> {
        self.inner
            .write()
            .map_err(|_| DirectoryError("directory lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Members>, DirectoryError> {
        self.inner
            .read()
            .map_err(|_| DirectoryError("directory lock poisoned".to_string()))
    }
}

impl Directory for StaticDirectory {
    fn principal(&self, id: PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        Ok(self.read()?.principals.get(&id).cloned())
    }

    fn groups(&self, id: PrincipalId) -> Result<Vec<String>, DirectoryError> {
        Ok(self
            .read()?
            .groups
            .get(&id)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_directory_membership() {
        let directory = StaticDirectory::new();
        let alice = directory.add("alice").unwrap();
        directory.join(alice, "eng").unwrap();
        directory.join(alice, "design").unwrap();
        assert_eq!(directory.groups(alice).unwrap(), vec!["design", "eng"]);

        directory.leave(alice, "eng").unwrap();
        assert_eq!(directory.groups(alice).unwrap(), vec!["design"]);
        assert!(directory.groups(PrincipalId::new()).unwrap().is_empty());
    }

    #[test]
    fn test_principal_store_as_directory() {
        let store = PrincipalStore::in_memory().unwrap();
        let bob = store.create("bob").unwrap();
        store.join(bob.id, "ops").unwrap();

        let directory: &dyn Directory = &store;
        assert_eq!(directory.principal(bob.id).unwrap(), Some(bob.clone()));
        assert_eq!(directory.groups(bob.id).unwrap(), vec!["ops"]);
    }
}
