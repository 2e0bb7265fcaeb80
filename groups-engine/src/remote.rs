//! Group membership synchronised from remote sources
//!
//! A synchronized group stores a single remote descriptor in its direct
//! `member` attribute:
//! - `sql: remote=<name> : [subject=<ssdn>?<id_attr> : ]<select query>`
//! - `ldap:///<base>?<attr>?<scope>?<filter>` (directory query)

use async_trait::async_trait;
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{mysql::MySqlPoolOptions, postgres::PgPoolOptions, MySqlPool, PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    error::{GroupsError, Result},
    filter::Filter,
    hierarchy::url_to_dn,
    models::*,
    repository::DirectoryStore,
    schema::{GroupsConfig, RemoteConfig, RemoteDriver},
};

lazy_static! {
    static ref SQL_URL: Regex = Regex::new(
        r"(?s)^sql: remote=(?P<remote>[^ ]+) : (?:subject=(?P<ssdn>[^?]+)\?(?P<id_attr>[^ ]+) : )?(?P<query>.+)$"
    )
    .unwrap();
}

const LDAP_URL_PREFIX: &str = "ldap:///";

/// Lookup chunk size when mapping remote values to subjects
const VALUES_CHUNK_SIZE: usize = 10;

/// Number of values returned by a remote query test
pub const TEST_MAX_VALUES: usize = 10;

/// Subject source and attribute used to map SQL values to subjects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToSubjectSource {
    pub ssdn: Dn,
    pub id_attr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteQuery {
    Sql {
        #[serde(default)]
        remote_cfg_name: Option<String>,
        select_query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_subject_source: Option<ToSubjectSource>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forced_periodicity: Option<String>,
    },
    Ldap {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forced_periodicity: Option<String>,
    },
}

impl RemoteQuery {
    pub fn sql(remote_cfg_name: &str, select_query: &str) -> Self {
        Self::Sql {
            remote_cfg_name: Some(remote_cfg_name.to_string()),
            select_query: select_query.to_string(),
            to_subject_source: None,
            forced_periodicity: None,
        }
    }

    pub fn is_sql(&self) -> bool {
        matches!(self, Self::Sql { .. })
    }

    pub fn remote_cfg_name(&self) -> Option<&str> {
        match self {
            Self::Sql { remote_cfg_name, .. } => remote_cfg_name.as_deref(),
            Self::Ldap { .. } => None,
        }
    }

    pub fn forced_periodicity(&self) -> Option<&str> {
        match self {
            Self::Sql { forced_periodicity, .. } | Self::Ldap { forced_periodicity, .. } => {
                forced_periodicity.as_deref()
            }
        }
    }

    pub fn set_forced_periodicity(&mut self, periodicity: Option<String>) {
        match self {
            Self::Sql { forced_periodicity, .. } | Self::Ldap { forced_periodicity, .. } => {
                *forced_periodicity = periodicity;
            }
        }
    }

    /// Single-value form stored in the direct `member` attribute
    pub fn to_url(&self) -> String {
        match self {
            Self::Sql {
                remote_cfg_name,
                select_query,
                to_subject_source,
                ..
            } => {
                let subject = to_subject_source
                    .as_ref()
                    .map(|ss| format!("subject={}?{} : ", ss.ssdn, ss.id_attr))
                    .unwrap_or_default();
                format!(
                    "sql: remote={} : {subject}{select_query}",
                    remote_cfg_name.as_deref().unwrap_or_default()
                )
            }
            Self::Ldap { url, .. } => url.clone(),
        }
    }

    /// SQL grammar first, then directory-query URL
    pub fn parse(text: &str) -> Result<Self> {
        parse_sql_url(text)
            .or_else(|| parse_ldap_url(text))
            .ok_or_else(|| GroupsError::Validation(format!("invalid remote query {text}")))
    }

    /// The remote descriptor of a synchronized group's direct members
    pub fn from_direct_members(urls: &[String]) -> Option<Self> {
        match urls {
            [url] => parse_sql_url(url).or_else(|| parse_ldap_url(url)),
            _ => None,
        }
    }

    /// Remote and subject source names must be configured
    pub fn validate(&self, config: &GroupsConfig) -> Result<()> {
        if let Self::Sql {
            remote_cfg_name,
            to_subject_source,
            ..
        } = self
        {
            let name = remote_cfg_name.as_deref().ok_or_else(|| {
                GroupsError::Configuration("remote_cfg_name is mandatory for remote SQL query".into())
            })?;
            if !config.remotes.contains_key(name) {
                return Err(GroupsError::Configuration(format!("unknown remote_cfg_name {name}")));
            }
            if let Some(ss) = to_subject_source {
                if config.subject_source(&ss.ssdn).is_none() {
                    return Err(GroupsError::Configuration(format!(
                        "unknown to_subject_source.ssdn {}",
                        ss.ssdn
                    )));
                }
            }
        }
        if let Self::Ldap { url, .. } = self {
            LdapUrl::parse(url)?;
        }
        Ok(())
    }
}

fn parse_sql_url(text: &str) -> Option<RemoteQuery> {
    let caps = SQL_URL.captures(text)?;
    let to_subject_source = match (caps.name("ssdn"), caps.name("id_attr")) {
        (Some(ssdn), Some(id_attr)) => Some(ToSubjectSource {
            ssdn: Dn::new(ssdn.as_str()),
            id_attr: id_attr.as_str().to_string(),
        }),
        _ => None,
    };
    Some(RemoteQuery::Sql {
        remote_cfg_name: Some(caps.name("remote")?.as_str().to_string()),
        select_query: caps.name("query")?.as_str().to_string(),
        to_subject_source,
        forced_periodicity: None,
    })
}

fn parse_ldap_url(text: &str) -> Option<RemoteQuery> {
    if url_to_dn(text).is_some() {
        return None;
    }
    LdapUrl::parse(text).ok().map(|_| RemoteQuery::Ldap {
        url: text.to_string(),
        forced_periodicity: None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    One,
    Sub,
}

/// Local directory query `ldap:///<base>?<attr>?<scope>?<filter>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUrl {
    pub base: Dn,
    /// Attribute whose values are the result dns; the entries' own dns when unset
    pub attr: Option<String>,
    pub scope: Scope,
    pub filter: Filter,
}

impl LdapUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || GroupsError::Validation(format!("invalid directory query URL {url}"));
        let rest = url.strip_prefix(LDAP_URL_PREFIX).ok_or_else(invalid)?;
        let mut parts = rest.splitn(4, '?');
        let base = parts.next().filter(|b| !b.is_empty()).ok_or_else(invalid)?;
        let attr = parts.next().filter(|a| !a.is_empty() && *a != "dn");
        let scope = match parts.next().unwrap_or_default() {
            "" | "base" => Scope::Base,
            "one" => Scope::One,
            "sub" => Scope::Sub,
            _ => return Err(invalid()),
        };
        let filter = match parts.next().filter(|f| !f.is_empty()) {
            Some(filter) => Filter::parse(filter)?,
            None => Filter::any_entry(),
        };
        Ok(Self {
            base: Dn::new(base),
            attr: attr.map(str::to_string),
            scope,
            filter,
        })
    }

    fn in_scope(&self, dn: &Dn) -> bool {
        match self.scope {
            Scope::Base => dn == &self.base,
            Scope::One => dn.parent().as_ref() == Some(&self.base),
            Scope::Sub => true,
        }
    }
}

/// Runs a select query on a configured remote, returning the first column of each row
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn query(&self, remote_name: &str, remote: &RemoteConfig, select_query: &str) -> Result<Vec<String>>;
}

/// Runs a directory query, returning the matching subjects
#[async_trait]
pub trait DirectoryQueryExecutor: Send + Sync {
    async fn query(&self, url: &str) -> Result<DnsOpts>;
}

/// sqlx-backed executor keeping one lazily-connected pool per remote
#[derive(Default)]
pub struct SqlxExecutor {
    mysql_pools: DashMap<String, MySqlPool>,
    pg_pools: DashMap<String, PgPool>,
}

impl SqlxExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn mysql_pool(&self, name: &str, remote: &RemoteConfig) -> MySqlPool {
        self.mysql_pools
            .entry(name.to_string())
            .or_insert_with(|| {
                let mut options = sqlx::mysql::MySqlConnectOptions::new()
                    .host(&remote.host)
                    .database(&remote.db)
                    .username(&remote.user)
                    .password(&remote.password);
                if let Some(port) = remote.port {
                    options = options.port(port);
                }
                MySqlPoolOptions::new()
                    .max_connections(2)
                    .acquire_timeout(Duration::from_secs(30))
                    .connect_lazy_with(options)
            })
            .clone()
    }

    fn pg_pool(&self, name: &str, remote: &RemoteConfig) -> PgPool {
        self.pg_pools
            .entry(name.to_string())
            .or_insert_with(|| {
                let mut options = sqlx::postgres::PgConnectOptions::new()
                    .host(&remote.host)
                    .database(&remote.db)
                    .username(&remote.user)
                    .password(&remote.password);
                if let Some(port) = remote.port {
                    options = options.port(port);
                }
                PgPoolOptions::new()
                    .max_connections(2)
                    .acquire_timeout(Duration::from_secs(30))
                    .connect_lazy_with(options)
            })
            .clone()
    }
}

fn first_column_as_text<R>(row: &R) -> Result<String>
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    for<'r> String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    match row.try_get::<String, _>(0usize) {
        Ok(value) => Ok(value),
        Err(_) => Ok(row.try_get::<i64, _>(0usize)?.to_string()),
    }
}

#[async_trait]
impl SqlExecutor for SqlxExecutor {
    async fn query(&self, remote_name: &str, remote: &RemoteConfig, select_query: &str) -> Result<Vec<String>> {
        debug!("SQL query on remote {remote_name}: {select_query}");
        match remote.driver {
            RemoteDriver::Mysql => {
                let pool = self.mysql_pool(remote_name, remote);
                let rows = sqlx::query(select_query).fetch_all(&pool).await?;
                rows.iter().map(first_column_as_text).collect()
            }
            RemoteDriver::Postgres => {
                let pool = self.pg_pool(remote_name, remote);
                let rows = sqlx::query(select_query).fetch_all(&pool).await?;
                rows.iter().map(first_column_as_text).collect()
            }
        }
    }
}

/// Directory queries answered by the local directory store
pub struct StoreDirectoryQuery {
    store: Arc<dyn DirectoryStore>,
}

impl StoreDirectoryQuery {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DirectoryQueryExecutor for StoreDirectoryQuery {
    async fn query(&self, url: &str) -> Result<DnsOpts> {
        let url = LdapUrl::parse(url)?;
        let wanted: Vec<&str> = url.attr.as_deref().into_iter().collect();
        let entries = self.store.search(&url.base, &url.filter, &wanted, None).await?;

        let mut dns = DnsOpts::new();
        for entry in entries.iter().filter(|e| url.in_scope(&e.dn)) {
            match &url.attr {
                None => {
                    dns.insert(entry.dn.clone(), DirectOptions::default());
                }
                Some(attr) => {
                    for value in entry.values(attr).iter().filter(|v| !v.is_empty()) {
                        dns.insert(Dn::new(value.as_str()), DirectOptions::default());
                    }
                }
            }
        }
        Ok(dns)
    }
}

/// Outcome of a dry run of a remote query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRemoteQuery {
    pub count: usize,
    pub values: Vec<String>,
    pub values_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ss_guess: Option<ToSubjectSource>,
}

/// Executes remote queries and maps their values to subjects
pub struct RemoteSync {
    store: Arc<dyn DirectoryStore>,
    config: Arc<GroupsConfig>,
    sql: Arc<dyn SqlExecutor>,
    directory: Arc<dyn DirectoryQueryExecutor>,
}

impl RemoteSync {
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        config: Arc<GroupsConfig>,
        sql: Arc<dyn SqlExecutor>,
        directory: Arc<dyn DirectoryQueryExecutor>,
    ) -> Self {
        Self {
            store,
            config,
            sql,
            directory,
        }
    }

    /// Raw values: SQL first column, or directory-query dns
    pub async fn values(&self, remote: &RemoteQuery) -> Result<Vec<String>> {
        remote.validate(&self.config)?;
        match remote {
            RemoteQuery::Sql {
                remote_cfg_name,
                select_query,
                ..
            } => {
                let name = remote_cfg_name.as_deref().unwrap_or_default();
                let remote_cfg = self
                    .config
                    .remotes
                    .get(name)
                    .ok_or_else(|| GroupsError::Configuration(format!("unknown remote_cfg_name {name}")))?;
                self.sql.query(name, remote_cfg, select_query).await
            }
            RemoteQuery::Ldap { url, .. } => Ok(self
                .directory
                .query(url)
                .await?
                .into_keys()
                .map(|dn| dn.to_string())
                .collect()),
        }
    }

    /// The subject set of a synchronized group
    pub async fn resolve(&self, remote: &RemoteQuery) -> Result<DnsOpts> {
        match remote {
            RemoteQuery::Sql { to_subject_source, .. } => {
                let values = self.values(remote).await?;
                info!("remote SQL query returned {} values", values.len());
                self.sql_values_to_dns(to_subject_source.as_ref(), &values).await
            }
            RemoteQuery::Ldap { url, .. } => self.directory.query(url).await,
        }
    }

    /// With a subject source, values are looked up by `id_attr`; otherwise they are dns
    pub async fn sql_values_to_dns(&self, to_ss: Option<&ToSubjectSource>, values: &[String]) -> Result<DnsOpts> {
        let Some(to_ss) = to_ss else {
            return Ok(values
                .iter()
                .map(|v| (Dn::new(v.as_str()), DirectOptions::default()))
                .collect());
        };
        let mut dns = DnsOpts::new();
        for chunk in values.chunks(VALUES_CHUNK_SIZE) {
            let filter = Filter::or(chunk.iter().map(|v| Filter::eq(&to_ss.id_attr, v)).collect());
            for entry in self.store.search(&to_ss.ssdn, &filter, &[], None).await? {
                dns.insert(entry.dn, DirectOptions::default());
            }
        }
        Ok(dns)
    }

    /// Subject source and identifying attribute matching the most values
    pub async fn guess_subject_source(&self, values: &[String]) -> Result<Option<ToSubjectSource>> {
        let mut best: Option<(usize, ToSubjectSource)> = None;
        for sscfg in &self.config.ldap.subject_sources {
            for id_attr in sscfg.id_attrs.iter().flatten() {
                let to_ss = ToSubjectSource {
                    ssdn: sscfg.dn.clone(),
                    id_attr: id_attr.clone(),
                };
                let count = self.sql_values_to_dns(Some(&to_ss), values).await?.len();
                if count > 0 && best.as_ref().map_or(true, |(c, _)| count > *c) {
                    best = Some((count, to_ss));
                }
            }
        }
        Ok(best.map(|(_, to_ss)| to_ss))
    }

    pub async fn test(&self, remote: &RemoteQuery) -> Result<TestRemoteQuery> {
        let all_values = self.values(remote).await?;
        let count = all_values.len();
        let values: Vec<String> = all_values.into_iter().take(TEST_MAX_VALUES).collect();
        let ss_guess = if count > 0 && remote.is_sql() {
            self.guess_subject_source(&values).await?
        } else {
            None
        };
        Ok(TestRemoteQuery {
            count,
            values,
            values_truncated: count > TEST_MAX_VALUES,
            ss_guess,
        })
    }
}
