//! SQLite grant store implementation.

use crate::{Error, Grant, GrantId, Result};
use chrono::{DateTime, Utc};
use policy::{Grantee, GranteeKind, Permission, PrincipalId, ResourceType};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use std::time::Duration;

const GRANT_COLUMNS: &str = "id, resource_type, resource_id, grantee_kind, grantee_id, \
     grantee_name, permission, granted_by, granted_at, expires_at, active";

/// Which grantees a lookup is restricted to.
#[derive(Debug, Clone, Copy)]
pub enum GranteeMatch<'a> {
    /// Direct grants to one principal.
    User(PrincipalId),
    /// Grants to any of the named groups.
    Groups(&'a [String]),
    /// Public grants.
    Public,
}

impl GranteeMatch<'_> {
    /// A match that can never select a row.
    fn is_empty(&self) -> bool {
        matches!(self, GranteeMatch::Groups(names) if names.is_empty())
    }
}

/// SQLite-backed append-only grant ledger.
pub struct GrantStore {
    conn: Connection,
}

impl GrantStore {
    /// Open or create a grant store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory grant store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS grants (
                id TEXT PRIMARY KEY,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                grantee_kind TEXT NOT NULL,
                grantee_id TEXT,
                grantee_name TEXT,
                permission TEXT NOT NULL,
                granted_by TEXT NOT NULL,
                granted_at INTEGER NOT NULL,
                expires_at INTEGER,
                active INTEGER NOT NULL DEFAULT 1,
                CHECK ((grantee_id IS NULL) <> (grantee_name IS NULL))
            );
            CREATE INDEX IF NOT EXISTS idx_grants_resource
                ON grants(resource_type, resource_id);
            CREATE INDEX IF NOT EXISTS idx_grants_grantee_id
                ON grants(resource_type, grantee_kind, grantee_id);
            CREATE INDEX IF NOT EXISTS idx_grants_grantee_name
                ON grants(resource_type, grantee_kind, grantee_name);
            "#,
        )?;
        Ok(())
    }

    /// Append a grant to the ledger.
    #[tracing::instrument(skip(self, grant), fields(grant_id = %grant.id))]
    pub fn insert(&self, grant: &Grant) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO grants ({GRANT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                grant.id.to_string(),
                grant.resource_type.as_str(),
                grant.resource_id,
                grant.grantee.kind().as_str(),
                grant.grantee.principal_id().map(|id| id.to_string()),
                grant.grantee.name(),
                grant.permission.as_str(),
                grant.granted_by.to_string(),
                encode_time(grant.granted_at),
                grant.expires_at.map(encode_time),
                grant.active,
            ],
        )?;
        tracing::debug!(
            resource_id = %grant.resource_id,
            grantee = %grant.grantee,
            permission = %grant.permission,
            "grant appended"
        );
        Ok(())
    }

    /// Append a grant only if its resource has no ledger entries yet.
    ///
    /// The check and the insert are one statement, so of two connections
    /// racing on the same resource exactly one sees `true`.
    #[tracing::instrument(skip(self, grant), fields(grant_id = %grant.id))]
    pub fn insert_first(&self, grant: &Grant) -> Result<bool> {
        let inserted = self.conn.execute(
            &format!(
                "INSERT INTO grants ({GRANT_COLUMNS}) \
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11 \
                 WHERE NOT EXISTS (
                     SELECT 1 FROM grants WHERE resource_type = ?2 AND resource_id = ?3
                 )"
            ),
            params![
                grant.id.to_string(),
                grant.resource_type.as_str(),
                grant.resource_id,
                grant.grantee.kind().as_str(),
                grant.grantee.principal_id().map(|id| id.to_string()),
                grant.grantee.name(),
                grant.permission.as_str(),
                grant.granted_by.to_string(),
                encode_time(grant.granted_at),
                grant.expires_at.map(encode_time),
                grant.active,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Soft-revoke every active grant of exactly `permission` to `grantee`.
    ///
    /// Returns the number of records deactivated.
    #[tracing::instrument(skip(self, grantee), fields(grantee = %grantee))]
    pub fn deactivate(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        grantee: &Grantee,
        permission: Permission,
    ) -> Result<usize> {
        let count = self.conn.execute(
            "UPDATE grants SET active = 0
             WHERE resource_type = ?1 AND resource_id = ?2
               AND grantee_kind = ?3 AND grantee_id IS ?4 AND grantee_name IS ?5
               AND permission = ?6 AND active = 1",
            params![
                resource_type.as_str(),
                resource_id,
                grantee.kind().as_str(),
                grantee.principal_id().map(|id| id.to_string()),
                grantee.name(),
                permission.as_str(),
            ],
        )?;
        tracing::debug!(count, "grants deactivated");
        Ok(count)
    }

    /// Soft-revoke every active grant on a resource.
    #[tracing::instrument(skip(self))]
    pub fn deactivate_resource(&self, resource_type: ResourceType, resource_id: &str) -> Result<usize> {
        let count = self.conn.execute(
            "UPDATE grants SET active = 0
             WHERE resource_type = ?1 AND resource_id = ?2 AND active = 1",
            params![resource_type.as_str(), resource_id],
        )?;
        Ok(count)
    }

    /// Whether any current grant on the resource matches the grantee and one
    /// of `permissions`.
    pub fn has_current(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        grantee: GranteeMatch<'_>,
        permissions: &[Permission],
        at: DateTime<Utc>,
    ) -> Result<bool> {
        if grantee.is_empty() || permissions.is_empty() {
            return Ok(false);
        }

        let (mut clause, mut values) = current_filter(resource_type, grantee, permissions, at);
        clause.push_str(" AND resource_id = ?");
        values.push(Value::Text(resource_id.to_string()));

        let found = self.conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM grants WHERE {clause})"),
            params_from_iter(values.iter()),
            |row| row.get::<_, bool>(0),
        )?;
        Ok(found)
    }

    /// Distinct resource ids with a current grant matching the grantee and
    /// one of `permissions`.
    pub fn current_resource_ids(
        &self,
        resource_type: ResourceType,
        grantee: GranteeMatch<'_>,
        permissions: &[Permission],
        at: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        if grantee.is_empty() || permissions.is_empty() {
            return Ok(Vec::new());
        }

        let (clause, values) = current_filter(resource_type, grantee, permissions, at);
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT DISTINCT resource_id FROM grants WHERE {clause}"))?;
        let ids = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Active, unexpired grants on a resource, ordered by grant time.
    pub fn current_for_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Grant>> {
        self.load(
            &format!(
                "SELECT {GRANT_COLUMNS} FROM grants
                 WHERE resource_type = ?1 AND resource_id = ?2 AND active = 1
                   AND (expires_at IS NULL OR expires_at > ?3)
                 ORDER BY granted_at, rowid"
            ),
            &[
                Value::Text(resource_type.as_str().to_string()),
                Value::Text(resource_id.to_string()),
                Value::Integer(encode_time(at)),
            ],
        )
    }

    /// Every grant ever recorded on a resource, ordered by grant time.
    pub fn history(&self, resource_type: ResourceType, resource_id: &str) -> Result<Vec<Grant>> {
        self.load(
            &format!(
                "SELECT {GRANT_COLUMNS} FROM grants
                 WHERE resource_type = ?1 AND resource_id = ?2
                 ORDER BY granted_at, rowid"
            ),
            &[
                Value::Text(resource_type.as_str().to_string()),
                Value::Text(resource_id.to_string()),
            ],
        )
    }

    fn load(&self, sql: &str, values: &[Value]) -> Result<Vec<Grant>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), GrantRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Grant::try_from).collect()
    }
}

/// WHERE clause selecting current grants of `resource_type` for a grantee.
fn current_filter(
    resource_type: ResourceType,
    grantee: GranteeMatch<'_>,
    permissions: &[Permission],
    at: DateTime<Utc>,
) -> (String, Vec<Value>) {
    let mut clause = String::from(
        "resource_type = ? AND active = 1 AND (expires_at IS NULL OR expires_at > ?)",
    );
    let mut values = vec![
        Value::Text(resource_type.as_str().to_string()),
        Value::Integer(encode_time(at)),
    ];

    match grantee {
        GranteeMatch::User(id) => {
            clause.push_str(" AND grantee_kind = 'user' AND grantee_id = ?");
            values.push(Value::Text(id.to_string()));
        }
        GranteeMatch::Groups(names) => {
            clause.push_str(&format!(
                " AND grantee_kind = 'group' AND grantee_name IN ({})",
                placeholders(names.len())
            ));
            values.extend(names.iter().map(|name| Value::Text(name.clone())));
        }
        GranteeMatch::Public => clause.push_str(" AND grantee_kind = 'public'"),
    }

    clause.push_str(&format!(" AND permission IN ({})", placeholders(permissions.len())));
    values.extend(
        permissions
            .iter()
            .map(|permission| Value::Text(permission.as_str().to_string())),
    );

    (clause, values)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Microseconds since the Unix epoch, compared numerically in SQL.
pub(crate) fn encode_time(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn decode_time(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Corrupt(format!("timestamp out of range: {micros}")))
}

/// Raw column values, decoded after the statement finishes.
struct GrantRow {
    id: String,
    resource_type: String,
    resource_id: String,
    grantee_kind: String,
    grantee_id: Option<String>,
    grantee_name: Option<String>,
    permission: String,
    granted_by: String,
    granted_at: i64,
    expires_at: Option<i64>,
    active: bool,
}

impl GrantRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            resource_type: row.get(1)?,
            resource_id: row.get(2)?,
            grantee_kind: row.get(3)?,
            grantee_id: row.get(4)?,
            grantee_name: row.get(5)?,
            permission: row.get(6)?,
            granted_by: row.get(7)?,
            granted_at: row.get(8)?,
            expires_at: row.get(9)?,
            active: row.get(10)?,
        })
    }
}

impl TryFrom<GrantRow> for Grant {
    type Error = Error;

    fn try_from(row: GrantRow) -> Result<Self> {
        let corrupt = |e: policy::Error| Error::Corrupt(format!("grant {}: {e}", row.id));

        let kind: GranteeKind = row.grantee_kind.parse().map_err(corrupt)?;
        let grantee_id = row
            .grantee_id
            .as_deref()
            .map(str::parse::<PrincipalId>)
            .transpose()
            .map_err(corrupt)?;
        let grantee =
            Grantee::from_parts(kind, grantee_id, row.grantee_name.as_deref()).map_err(corrupt)?;

        Ok(Grant {
            id: GrantId(
                row.id
                    .parse()
                    .map_err(|_| Error::Corrupt(format!("bad grant id '{}'", row.id)))?,
            ),
            resource_type: row.resource_type.parse().map_err(corrupt)?,
            resource_id: row.resource_id,
            grantee,
            permission: row.permission.parse().map_err(corrupt)?,
            granted_by: row.granted_by.parse().map_err(corrupt)?,
            granted_at: decode_time(row.granted_at)?,
            expires_at: row.expires_at.map(decode_time).transpose()?,
            active: row.active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn doc_grant(resource_id: &str, grantee: Grantee, permission: Permission) -> Grant {
        Grant::new(
            ResourceType::Document,
            resource_id,
            grantee,
            permission,
            PrincipalId::new(),
        )
    }

    #[test]
    fn test_insert_and_history() {
        let store = GrantStore::in_memory().unwrap();
        let alice = PrincipalId::new();
        let first = doc_grant("d1", Grantee::user(alice), Permission::Admin);
        let second = doc_grant("d1", Grantee::group("eng"), Permission::Write);
        store.insert(&first).unwrap();
        store.insert(&second).unwrap();
        store
            .insert(&doc_grant("d2", Grantee::Public, Permission::Read))
            .unwrap();

        let history = store.history(ResourceType::Document, "d1").unwrap();
        assert_eq!(history, vec![first, second]);
    }

    #[test]
    fn test_has_current_respects_closure_filter() {
        let store = GrantStore::in_memory().unwrap();
        let alice = PrincipalId::new();
        store
            .insert(&doc_grant("d1", Grantee::user(alice), Permission::Write))
            .unwrap();
        let now = Utc::now();

        let read = Permission::satisfied_by(Permission::Read);
        let delete = Permission::satisfied_by(Permission::Delete);
        let user = GranteeMatch::User(alice);
        assert!(store.has_current(ResourceType::Document, "d1", user, &read, now).unwrap());
        assert!(!store.has_current(ResourceType::Document, "d1", user, &delete, now).unwrap());
        assert!(!store.has_current(ResourceType::Document, "d2", user, &read, now).unwrap());
    }

    #[test]
    fn test_expired_grants_are_not_current() {
        let store = GrantStore::in_memory().unwrap();
        let now = Utc::now();
        let grant = doc_grant("d1", Grantee::Public, Permission::Read)
            .with_expiry(Some(now - Duration::seconds(1)));
        store.insert(&grant).unwrap();

        let read = [Permission::Read];
        assert!(!store
            .has_current(ResourceType::Document, "d1", GranteeMatch::Public, &read, now)
            .unwrap());
        assert!(store.current_for_resource(ResourceType::Document, "d1", now).unwrap().is_empty());
        // Still in the ledger.
        assert_eq!(store.history(ResourceType::Document, "d1").unwrap().len(), 1);
    }

    #[test]
    fn test_deactivate_all_matching() {
        let store = GrantStore::in_memory().unwrap();
        let alice = PrincipalId::new();
        for _ in 0..3 {
            store
                .insert(&doc_grant("d1", Grantee::user(alice), Permission::Read))
                .unwrap();
        }
        store
            .insert(&doc_grant("d1", Grantee::user(alice), Permission::Write))
            .unwrap();

        let revoked = store
            .deactivate(ResourceType::Document, "d1", &Grantee::user(alice), Permission::Read)
            .unwrap();
        assert_eq!(revoked, 3);
        let again = store
            .deactivate(ResourceType::Document, "d1", &Grantee::user(alice), Permission::Read)
            .unwrap();
        assert_eq!(again, 0);

        let current = store
            .current_for_resource(ResourceType::Document, "d1", Utc::now())
            .unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].permission, Permission::Write);
    }

    #[test]
    fn test_deactivate_matches_group_and_public_by_name() {
        let store = GrantStore::in_memory().unwrap();
        store
            .insert(&doc_grant("d1", Grantee::group("eng"), Permission::Read))
            .unwrap();
        store
            .insert(&doc_grant("d1", Grantee::group("ops"), Permission::Read))
            .unwrap();
        store
            .insert(&doc_grant("d1", Grantee::Public, Permission::Read))
            .unwrap();

        let eng = store
            .deactivate(ResourceType::Document, "d1", &Grantee::group("eng"), Permission::Read)
            .unwrap();
        let public = store
            .deactivate(ResourceType::Document, "d1", &Grantee::Public, Permission::Read)
            .unwrap();
        assert_eq!((eng, public), (1, 1));

        let current = store
            .current_for_resource(ResourceType::Document, "d1", Utc::now())
            .unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].grantee, Grantee::group("ops"));
    }

    #[test]
    fn test_current_resource_ids_for_groups() {
        let store = GrantStore::in_memory().unwrap();
        store
            .insert(&doc_grant("d1", Grantee::group("eng"), Permission::Read))
            .unwrap();
        store
            .insert(&doc_grant("d1", Grantee::group("ops"), Permission::Admin))
            .unwrap();
        store
            .insert(&doc_grant("d2", Grantee::group("ops"), Permission::Read))
            .unwrap();
        store
            .insert(&doc_grant("d3", Grantee::group("sales"), Permission::Read))
            .unwrap();

        let groups = vec!["eng".to_string(), "ops".to_string()];
        let mut ids = store
            .current_resource_ids(
                ResourceType::Document,
                GranteeMatch::Groups(&groups),
                &Permission::satisfied_by(Permission::Read),
                Utc::now(),
            )
            .unwrap();
        ids.sort();
        assert_eq!(ids, vec!["d1", "d2"]);

        let none = store
            .current_resource_ids(
                ResourceType::Document,
                GranteeMatch::Groups(&[]),
                &Permission::ALL,
                Utc::now(),
            )
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_deactivate_resource() {
        let store = GrantStore::in_memory().unwrap();
        store
            .insert(&doc_grant("d1", Grantee::user(PrincipalId::new()), Permission::Admin))
            .unwrap();
        store
            .insert(&doc_grant("d1", Grantee::Public, Permission::Read))
            .unwrap();
        store
            .insert(&doc_grant("d2", Grantee::Public, Permission::Read))
            .unwrap();

        assert_eq!(store.deactivate_resource(ResourceType::Document, "d1").unwrap(), 2);
        assert_eq!(store.deactivate_resource(ResourceType::Document, "d1").unwrap(), 0);
        assert_eq!(
            store
                .current_for_resource(ResourceType::Document, "d2", Utc::now())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_insert_first_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.db");
        let a = GrantStore::open(&path).unwrap();
        let b = GrantStore::open(&path).unwrap();
        let alice = PrincipalId::new();
        let mallory = PrincipalId::new();

        assert!(a
            .insert_first(&doc_grant("d1", Grantee::user(alice), Permission::Admin))
            .unwrap());
        assert!(!b
            .insert_first(&doc_grant("d1", Grantee::user(mallory), Permission::Admin))
            .unwrap());
        assert!(b
            .insert_first(&doc_grant("d2", Grantee::user(mallory), Permission::Admin))
            .unwrap());

        let history = a.history(ResourceType::Document, "d1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].grantee, Grantee::user(alice));
    }

    #[test]
    fn test_far_future_expiry_is_current() {
        let store = GrantStore::in_memory().unwrap();
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        let grant = doc_grant("d1", Grantee::Public, Permission::Read).with_expiry(Some(far));
        store.insert(&grant).unwrap();

        let now = Utc::now();
        assert!(grant.is_current(now));
        assert!(store
            .has_current(ResourceType::Document, "d1", GranteeMatch::Public, &[Permission::Read], now)
            .unwrap());
        assert_eq!(store.current_for_resource(ResourceType::Document, "d1", now).unwrap().len(), 1);
        assert_eq!(store.history(ResourceType::Document, "d1").unwrap(), vec![grant]);
    }

    #[test]
    fn test_expiry_at_evaluation_instant_is_not_current() {
        let store = GrantStore::in_memory().unwrap();
        let expiry = Utc::now() + Duration::hours(1);
        let grant = doc_grant("d1", Grantee::Public, Permission::Read).with_expiry(Some(expiry));
        store.insert(&grant).unwrap();
        let at = grant.expires_at.unwrap();

        assert!(!grant.is_current(at));
        assert!(!store
            .has_current(ResourceType::Document, "d1", GranteeMatch::Public, &[Permission::Read], at)
            .unwrap());
    }

    #[test]
    fn test_reopen_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.db");
        let grant = doc_grant("d1", Grantee::Public, Permission::Read)
            .with_expiry(Some(Utc::now() + Duration::days(1)));
        {
            let store = GrantStore::open(&path).unwrap();
            store.insert(&grant).unwrap();
        }

        let store = GrantStore::open(&path).unwrap();
        assert_eq!(store.history(ResourceType::Document, "d1").unwrap(), vec![grant]);
    }
}
