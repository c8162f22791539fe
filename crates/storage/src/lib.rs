//! SQLite-backed storage for grants and principals.
//!
//! This crate provides the durable half of the authorization system: the
//! grant ledger that every decision reads from, and a small local directory
//! of principals and group memberships.
//!
//! # Overview
//!
//! The grant ledger is append-only. A grant is written once and never
//! deleted; revocation flips its `active` flag. The "current" view is always
//! a filter over the ledger: active records whose expiry, if any, lies in
//! the future. Expiry is evaluated at read time, so nothing ever sweeps the
//! table.
//!
//! # Core Concepts
//!
//! ## GrantStore
//!
//! The [`GrantStore`] wraps a SQLite database holding the `grants` table with
//! indexes on `(resource_type, resource_id)`,
//! `(resource_type, grantee_kind, grantee_id)` and
//! `(resource_type, grantee_kind, grantee_name)`, so both "who can access R"
//! and "what can P access" touch only the relevant rows.
//!
//! ## Grant
//!
//! A [`Grant`] records who ([`policy::Grantee`]) received which
//! [`policy::Permission`] on which resource, who granted it, when, until
//! when, and whether it is still active.
//!
//! ## PrincipalStore
//!
//! The [`PrincipalStore`] keeps principals (unique names) and their group
//! memberships. It stands in for an external directory in the CLI and tests.
//!
//! # Example
//!
//! ```no_run
//! use policy::{Grantee, Permission, ResourceType};
//! use storage::{Grant, GrantStore, GranteeMatch, PrincipalStore};
//!
//! let principals = PrincipalStore::open("grants.db")?;
//! let grants = GrantStore::open("grants.db")?;
//!
//! let alice = principals.create("alice")?;
//! grants.insert(&Grant::new(
//!     ResourceType::Document,
//!     "report-q3",
//!     Grantee::user(alice.id),
//!     Permission::Admin,
//!     alice.id,
//! ))?;
//!
//! let readable = grants.current_resource_ids(
//!     ResourceType::Document,
//!     GranteeMatch::User(alice.id),
//!     &Permission::satisfied_by(Permission::Read),
//!     chrono::Utc::now(),
//! )?;
//! assert_eq!(readable, vec!["report-q3"]);
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod grant;
mod principal;
mod store;

pub use error::{Error, Result};
pub use grant::{Grant, GrantId};
pub use principal::{Principal, PrincipalStore};
pub use store::{GrantStore, GranteeMatch};
