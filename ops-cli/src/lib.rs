//! Operations CLI for the groups engine
//!
//! # Example Usage
//!
//! ```bash
//! # Check a configuration file (GROUPS_* environment variables apply)
//! groups-ops --config /etc/groups/config.yaml validate-config
//!
//! # Last 10kB of a group's action log, or of its sync log
//! groups-ops --config config.yaml logs collab.staff --bytes 10000
//! groups-ops --config config.yaml logs collab.staff --sync
//!
//! # Parse a remote query, from its stored form or from YAML
//! groups-ops parse-remote 'sql: remote=apogee : select uid from students'
//! groups-ops parse-remote --yaml '{remote_cfg_name: apogee, select_query: "select 1"}'
//!
//! # Run a select query on a configured remote
//! groups-ops --config config.yaml test-sql apogee 'select uid from students'
//! ```

use anyhow::{bail, Context};
use audit_engine::{AuditLog, LogStream};
use clap::{Parser, Subcommand};
use groups_engine::remote::{SqlExecutor, SqlxExecutor, TEST_MAX_VALUES};
use groups_engine::{GroupsConfig, RemoteQuery};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "groups-ops")]
#[command(about = "Operations tool for the groups engine")]
pub struct Cli {
    /// Configuration file
    #[arg(long, short, env = "GROUPS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate the configuration
    ValidateConfig,

    /// Print the tail of a group's log
    Logs {
        id: String,
        /// Byte budget read from the end of the file
        #[arg(long, default_value_t = 100_000)]
        bytes: u64,
        /// Read the flattened-relations sync log instead of the action log
        #[arg(long)]
        sync: bool,
    },

    /// Parse a remote query and print it as JSON
    ParseRemote {
        query: String,
        /// The query is a YAML document instead of the stored form
        #[arg(long)]
        yaml: bool,
    },

    /// Run a select query on a configured remote
    TestSql { remote: String, query: String },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<GroupsConfig> {
    GroupsConfig::load(path.map(PathBuf::as_path)).context("invalid configuration")
}

pub fn parse_remote(query: &str, yaml: bool) -> anyhow::Result<RemoteQuery> {
    let remote: RemoteQuery = if yaml {
        config_engine::parse_yaml(query)?
    } else {
        RemoteQuery::parse(query)?
    };
    Ok(remote)
}

pub fn config_summary(config: &GroupsConfig) -> Value {
    json!({
        "groups_dn": config.ldap.groups_dn,
        "subject_sources": config.ldap.subject_sources.iter().map(|ss| &ss.dn).collect::<Vec<_>>(),
        "remotes": config.remotes.keys().collect::<Vec<_>>(),
        "log_dir": config.log_dir,
        "max_propagation_steps": config.max_propagation_steps,
    })
}

/// Run one command, returning what to print
pub async fn run(cli: &Cli) -> anyhow::Result<Value> {
    match &cli.command {
        Command::ValidateConfig => {
            let config = load_config(cli.config.as_ref())?;
            info!("configuration is valid");
            Ok(config_summary(&config))
        }
        Command::Logs { id, bytes, sync } => {
            let config = load_config(cli.config.as_ref())?;
            if config.log_dir.is_none() {
                bail!("log_dir is not configured");
            }
            let stream = if *sync { LogStream::Sync } else { LogStream::Actions };
            let logs = AuditLog::new(config.log_dir.clone()).read(id, *bytes, stream).await?;
            Ok(serde_json::to_value(logs)?)
        }
        Command::ParseRemote { query, yaml } => {
            let remote = parse_remote(query, *yaml)?;
            Ok(json!({ "remote_query": remote, "stored_as": remote.to_url() }))
        }
        Command::TestSql { remote, query } => {
            let config = load_config(cli.config.as_ref())?;
            let remote_cfg = config
                .remotes
                .get(remote)
                .with_context(|| format!("unknown remote {remote}"))?;
            let values = SqlxExecutor::new().query(remote, remote_cfg, query).await?;
            let count = values.len();
            Ok(json!({
                "count": count,
                "values": values.into_iter().take(TEST_MAX_VALUES).collect::<Vec<_>>(),
                "values_truncated": count > TEST_MAX_VALUES,
            }))
        }
    }
}
