//! Hierarchical group/stem engine backed by a directory store
//!
//! This crate manages a tree of stems and groups and provides:
//! - Rights resolution with inheritance from ancestor stems
//! - Validation and simplification of member/right modifications
//! - Incremental maintenance of flattened (transitively expanded) relations
//! - Group membership synchronised from remote SQL or directory queries
//! - Per-group audit and synchronisation logs
//!
//! # Core Concepts
//!
//! - **Stem**: internal node (`a.b.`), holds rights inherited by descendants
//! - **Group**: leaf node (`a.b.c`), holds members and rights
//! - **Mright**: one of `member`, `reader`, `updater`, `admin`
//! - **Flattened relation**: direct values with nested groups replaced by
//!   their own flattened members
//!
//! # Example
//!
//! ```rust,no_run
//! use groups_engine::{GroupsConfig, GroupsEngine, LoggedUser, MonoAttrs};
//! use groups_engine::repository::InMemoryDirectory;
//! use std::sync::Arc;
//!
//! # async fn demo() -> groups_engine::Result<()> {
//! let store = Arc::new(InMemoryDirectory::new());
//! let engine = GroupsEngine::new(store, GroupsConfig::default())?;
//!
//! let admin = LoggedUser::TrustedAdmin;
//! engine.create(&admin, "", MonoAttrs::new()).await?;
//! engine.create(&admin, "staff", MonoAttrs::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod check;
pub mod engine;
pub mod error;
pub mod expand;
pub mod filter;
pub mod hierarchy;
pub mod models;
pub mod mods;
pub mod remote;
pub mod repository;
pub mod schema;
pub mod subjects;

pub use audit_engine::{AuditLog, LogStream, SgroupLogs};
pub use cache::Cache;
pub use engine::*;
pub use error::*;
pub use expand::UpResult;
pub use models::*;
pub use mods::{MyMods, RelationMods, Replacement};
pub use remote::{RemoteQuery, TestRemoteQuery};
pub use schema::*;
