use config_engine::ConfigLoader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::{
    error::{GroupsError, Result},
    hierarchy::Hierarchy,
    models::{Dn, Mright},
};

/// Prefix of environment variables overriding the configuration file
/// (`GROUPS_LDAP__GROUPS_DN=...`)
pub const ENV_PREFIX: &str = "GROUPS_";

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupsConfig {
    /// Bearer token identifying the trusted administrator
    #[serde(default, skip_serializing)]
    pub trusted_auth_bearer: Option<String>,

    /// Directory holding the per-group `.jsonl` logs. No logging when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    pub ldap: LdapConfig,

    /// Remote SQL servers usable by synchronized groups
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,

    /// Attribute holding a synchronized group's forced periodicity
    #[serde(default = "default_forced_periodicity_attr")]
    pub remote_forced_periodicity_attr: String,

    /// Cycle guard for flattened-relation propagation
    #[serde(default = "default_max_propagation_steps")]
    pub max_propagation_steps: usize,
}

fn default_forced_periodicity_attr() -> String {
    "groupaldOptions;x-remote-forced-periodicity".to_string()
}

fn default_max_propagation_steps() -> usize {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    pub groups_dn: Dn,
    #[serde(default)]
    pub stem_object_classes: BTreeSet<String>,
    pub group_object_classes: BTreeSet<String>,
    #[serde(default)]
    pub stem: StemConfig,
    pub subject_sources: Vec<SubjectSourceConfig>,
    #[serde(default)]
    pub groups_flattened_attr: FlattenedAttrs,
    /// Descriptive attributes a group/stem may carry
    #[serde(default)]
    pub sgroup_attrs: BTreeMap<String, AttrTexts>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StemConfig {
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub root_id: String,
}

fn default_separator() -> String {
    ".".to_string()
}

impl Default for StemConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            root_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSourceConfig {
    pub dn: Dn,
    pub name: String,
    #[serde(default)]
    pub display_attrs: Vec<String>,
    /// Attributes identifying a subject by an external id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_attrs: Option<Vec<String>>,
    /// Search template, `%TERM%` is replaced by the escaped search term
    pub search_filter: String,
}

/// Names of the flattened attribute of each relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedAttrs {
    pub member: String,
    pub reader: String,
    pub updater: String,
    pub admin: String,
}

impl FlattenedAttrs {
    pub fn attr(&self, mright: Mright) -> &str {
        match mright {
            Mright::Member => &self.member,
            Mright::Reader => &self.reader,
            Mright::Updater => &self.updater,
            Mright::Admin => &self.admin,
        }
    }
}

impl Default for FlattenedAttrs {
    fn default() -> Self {
        Self {
            member: "member".to_string(),
            reader: "supannGroupeLecteurDN".to_string(),
            updater: "supannGroupeUpdaterDN".to_string(),
            admin: "supannGroupeAdminDN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrTexts {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteDriver {
    Mysql,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub driver: RemoteDriver,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub db: String,
    #[serde(skip_serializing)]
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Resynchronisation schedule of the groups using this remote
    pub periodicity: String,
}

impl GroupsConfig {
    /// Load from an optional YAML file, overridden by `GROUPS_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = path {
            loader = loader.with_yaml_file(path);
        }
        let config: Self = loader.with_env(ENV_PREFIX).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document, without environment overrides
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = ConfigLoader::new().with_yaml_str(yaml).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sgroup_sscfg().is_none() {
            return Err(GroupsError::Configuration(format!(
                "ldap.groups_dn {} must be listed in ldap.subject_sources",
                self.ldap.groups_dn
            )));
        }
        if self.ldap.stem.separator.is_empty() {
            return Err(GroupsError::Configuration("ldap.stem.separator must not be empty".into()));
        }
        if self.ldap.group_object_classes.is_empty() {
            return Err(GroupsError::Configuration(
                "ldap.group_object_classes must not be empty".into(),
            ));
        }
        if self.max_propagation_steps == 0 {
            return Err(GroupsError::Configuration("max_propagation_steps must be positive".into()));
        }
        for (name, remote) in &self.remotes {
            if remote.periodicity.trim().is_empty() {
                return Err(GroupsError::Configuration(format!(
                    "remote {name}: periodicity must not be empty"
                )));
            }
        }
        Ok(())
    }

    pub fn hierarchy(&self) -> Hierarchy {
        Hierarchy::new(
            self.ldap.stem.separator.clone(),
            self.ldap.stem.root_id.clone(),
            self.ldap.groups_dn.clone(),
        )
    }

    /// The subject source describing groups themselves
    pub fn sgroup_sscfg(&self) -> Option<&SubjectSourceConfig> {
        self.ldap
            .subject_sources
            .iter()
            .find(|sscfg| sscfg.dn == self.ldap.groups_dn)
    }

    pub fn subject_source(&self, dn: &Dn) -> Option<&SubjectSourceConfig> {
        self.ldap.subject_sources.iter().find(|sscfg| &sscfg.dn == dn)
    }

    pub fn flattened_attr(&self, mright: Mright) -> &str {
        self.ldap.groups_flattened_attr.attr(mright)
    }

    pub fn sgroup_attr_names(&self) -> Vec<&str> {
        self.ldap.sgroup_attrs.keys().map(String::as_str).collect()
    }
}

impl Default for GroupsConfig {
    /// Layout used by the test fixtures: `ou=groups` and `ou=people` under `dc=nodomain`
    fn default() -> Self {
        let sgroup_attrs = [("ou", "Name"), ("description", "Description")]
            .into_iter()
            .map(|(attr, label)| {
                (
                    attr.to_string(),
                    AttrTexts {
                        label: label.to_string(),
                        description: String::new(),
                    },
                )
            })
            .collect();

        Self {
            trusted_auth_bearer: None,
            log_dir: None,
            ldap: LdapConfig {
                groups_dn: Dn::new("ou=groups,dc=nodomain"),
                stem_object_classes: ["organizationalRole".to_string()].into(),
                group_object_classes: ["groupOfNames".to_string(), "supannGroupe".to_string()].into(),
                stem: StemConfig::default(),
                subject_sources: vec![
                    SubjectSourceConfig {
                        dn: Dn::new("ou=people,dc=nodomain"),
                        name: "People".to_string(),
                        display_attrs: vec!["uid".into(), "displayName".into(), "mail".into()],
                        id_attrs: Some(vec!["uid".into(), "mail".into()]),
                        search_filter: "(|(uid=%TERM%)(sn=%TERM%*)(displayName=*%TERM%*))".to_string(),
                    },
                    SubjectSourceConfig {
                        dn: Dn::new("ou=groups,dc=nodomain"),
                        name: "Groups".to_string(),
                        display_attrs: vec!["cn".into(), "ou".into(), "description".into()],
                        id_attrs: None,
                        search_filter: "(|(cn=%TERM%*)(ou=*%TERM%*)(description=*%TERM%*))".to_string(),
                    },
                ],
                groups_flattened_attr: FlattenedAttrs::default(),
                sgroup_attrs,
            },
            remotes: BTreeMap::new(),
            remote_forced_periodicity_attr: default_forced_periodicity_attr(),
            max_propagation_steps: default_max_propagation_steps(),
        }
    }
}
