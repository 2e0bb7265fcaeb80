//! Append-only audit logs for groups and stems
//!
//! Every group has two JSON-lines files in the configured log directory:
//! - **Action log** (`<id>.jsonl`): `{action, when, who, msg?, ...data}` for
//!   each accepted mutation
//! - **Sync log** (`<id>-sync.jsonl`): `{when, mright, new_count, added, removed}`
//!   for each flattened-relation update
//!
//! Reading supports a byte budget: only the tail of the file is parsed and
//! the first, possibly truncated, line of the window is dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use audit_engine::{AuditLog, LogStream, SgroupAction};
//! use serde_json::json;
//!
//! # async fn demo() -> audit_engine::Result<()> {
//! let log = AuditLog::new(Some("/var/log/groups".into()));
//! log.log_sgroup_action("TrustedAdmin", "staff.", SgroupAction::Create, None, json!({ "ou": "Staff" }))
//!     .await?;
//!
//! let tail = log.read("staff.", 10_000, LogStream::Actions).await?;
//! println!("{} entries, whole file: {}", tail.logs.len(), tail.whole_file);
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod error;
pub mod trail;

pub use entry::*;
pub use error::*;
pub use trail::*;
