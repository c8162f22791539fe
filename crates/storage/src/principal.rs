//! SQLite-backed principal and group-membership directory.

use crate::store::{decode_time, encode_time};
use crate::{Error, Result};
use chrono::{DateTime, SubsecRound, Utc};
use policy::PrincipalId;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// An actor that can hold grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Local principal directory.
///
/// Memberships are always read from the database; nothing is cached.
pub struct PrincipalStore {
    conn: Connection,
}

impl PrincipalStore {
    /// Open or create a principal store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory principal store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS principals (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS memberships (
                principal_id TEXT NOT NULL REFERENCES principals(id),
                group_name TEXT NOT NULL,
                PRIMARY KEY (principal_id, group_name)
            );
            "#,
        )?;
        Ok(())
    }

    /// Register a new principal with a unique name.
    ///
    /// A taken name fails with [`Error::Conflict`], including when another
    /// connection registers it first.
    #[tracing::instrument(skip(self))]
    pub fn create(&self, name: &str) -> Result<Principal> {
        let principal = Principal {
            id: PrincipalId::new(),
            name: name.to_string(),
            created_at: Utc::now().trunc_subsecs(6),
        };
        self.conn
            .execute(
                "INSERT INTO principals (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![
                    principal.id.to_string(),
                    principal.name,
                    encode_time(principal.created_at),
                ],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => {
                    Error::Conflict(format!("principal '{name}' already exists"))
                }
                _ => Error::Database(e),
            })?;
        tracing::info!(principal_id = %principal.id, name, "principal created");
        Ok(principal)
    }

    pub fn get(&self, id: PrincipalId) -> Result<Option<Principal>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM principals WHERE id = ?1",
                [id.to_string()],
                PrincipalRow::from_row,
            )
            .optional()?;
        row.map(Principal::try_from).transpose()
    }

    pub fn by_name(&self, name: &str) -> Result<Option<Principal>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM principals WHERE name = ?1",
                [name],
                PrincipalRow::from_row,
            )
            .optional()?;
        row.map(Principal::try_from).transpose()
    }

    /// All principals, ordered by name.
    pub fn list(&self) -> Result<Vec<Principal>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM principals ORDER BY name")?;
        let rows = stmt
            .query_map([], PrincipalRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Principal::try_from).collect()
    }

    /// Add a principal to a group. Returns `false` if already a member.
    #[tracing::instrument(skip(self))]
    pub fn join(&self, id: PrincipalId, group: &str) -> Result<bool> {
        if self.get(id)?.is_none() {
            return Err(Error::NotFound(format!("principal {id}")));
        }
        let added = self.conn.execute(
            "INSERT OR IGNORE INTO memberships (principal_id, group_name) VALUES (?1, ?2)",
            params![id.to_string(), group],
        )?;
        Ok(added > 0)
    }

    /// Remove a principal from a group. Returns `false` if not a member.
    #[tracing::instrument(skip(self))]
    pub fn leave(&self, id: PrincipalId, group: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM memberships WHERE principal_id = ?1 AND group_name = ?2",
            params![id.to_string(), group],
        )?;
        Ok(removed > 0)
    }

    /// Current group memberships of a principal, ordered by name.
    pub fn groups(&self, id: PrincipalId) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT group_name FROM memberships WHERE principal_id = ?1 ORDER BY group_name",
        )?;
        let groups = stmt
            .query_map([id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }
}

struct PrincipalRow {
    id: String,
    name: String,
    created_at: i64,
}

impl PrincipalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = Error;

    fn try_from(row: PrincipalRow) -> Result<Self> {
        Ok(Principal {
            id: row
                .id
                .parse()
                .map_err(|e| Error::Corrupt(format!("principal '{}': {e}", row.name)))?,
            created_at: decode_time(row.created_at)?,
            name: row.name,
        })
    }
}
