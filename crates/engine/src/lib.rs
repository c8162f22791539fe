//! Authorization engine for shared resources.
//!
//! This crate answers two questions: "can principal P perform A on resource
//! R right now?" and "which resources can P perform A on?". It also owns the
//! grant/revoke protocol that writes to the ledger.
//!
//! # Overview
//!
//! - **Engine**: decisions and mutations over a [`storage::GrantStore`] and
//!   a [`Directory`]. It holds no mutable state and enforces nothing about
//!   who may call `grant` or `revoke`.
//! - **Directory**: the collaborator that supplies principals and their
//!   current group memberships, queried fresh on every decision.
//! - **Lifecycle**: the gate user-facing flows go through. It checks the
//!   caller's own permission before sharing, unsharing or retiring a
//!   resource, and makes the creator admin at creation time.
//!
//! A decision expands the requested permission to every level whose closure
//! contains it, then looks for a current grant to the principal directly,
//! to the public wildcard, or to any of the principal's groups.
//!
//! # Example
//!
//! ```
//! use engine::{Engine, Lifecycle, StaticDirectory};
//! use policy::{Grantee, Permission, ResourceType};
//! use storage::GrantStore;
//!
//! # fn example() -> engine::Result<()> {
//! let engine = Engine::new(GrantStore::in_memory()?, StaticDirectory::new());
//! let alice = engine.directory().add("alice")?;
//! let bob = engine.directory().add("bob")?;
//! engine.directory().join(bob, "eng")?;
//!
//! let lifecycle = Lifecycle::new(&engine);
//! lifecycle.create_resource(alice, ResourceType::Document, "roadmap")?;
//! lifecycle.share(
//!     alice,
//!     ResourceType::Document,
//!     "roadmap",
//!     Grantee::group("eng"),
//!     Permission::Write,
//!     None,
//! )?;
//!
//! assert!(engine.has_permission(bob, ResourceType::Document, "roadmap", Permission::Read)?);
//! assert!(!engine.has_permission(bob, ResourceType::Document, "roadmap", Permission::Admin)?);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod directory;
mod engine;
mod error;
mod lifecycle;

pub use directory::{Directory, DirectoryError, StaticDirectory};
pub use engine::{Engine, GrantRequest, ResourcePermission};
pub use error::{Error, Result};
pub use lifecycle::Lifecycle;
