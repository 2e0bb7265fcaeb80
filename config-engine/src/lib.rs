//! Layered configuration loading
//!
//! Sources are merged in the order they are added, later sources overriding
//! earlier ones:
//! - **YAML files** or in-memory YAML documents
//! - **Environment variables** with a prefix, `__` separating nested keys
//!   (`GROUPS_LDAP__GROUPS_DN` sets `ldap.groups_dn`)
//!
//! # Example
//!
//! ```rust,no_run
//! use config_engine::ConfigLoader;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct AppConfig {
//!     log_dir: Option<String>,
//! }
//!
//! # fn main() -> config_engine::Result<()> {
//! let config: AppConfig = ConfigLoader::new()
//!     .with_yaml_file("/etc/groups/config.yaml")
//!     .with_env("GROUPS_")
//!     .extract()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod providers;

pub use error::*;
pub use providers::*;
