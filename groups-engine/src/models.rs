use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{GroupsError, Result};
use crate::remote::RemoteQuery;

/// Opaque directory identity (distinguished name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dn(String);

impl Dn {
    pub fn new(dn: impl Into<String>) -> Self {
        Self(dn.into())
    }

    /// The reserved value stored in an empty flattened `member` attribute
    pub fn empty_marker() -> Self {
        Self(String::new())
    }

    pub fn is_empty_marker(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent dn (`uid=a,ou=people,dc=x` => `ou=people,dc=x`)
    pub fn parent(&self) -> Option<Dn> {
        self.0.split_once(',').map(|(_, parent)| Dn::new(parent))
    }

    /// First RDN split into attribute and value (`uid=a,...` => `("uid", "a")`)
    pub fn rdn(&self) -> Option<(&str, &str)> {
        let rdn = self.0.split(',').next()?;
        rdn.split_once('=')
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Dn {
    fn from(dn: &str) -> Self {
        Self::new(dn)
    }
}

impl From<String> for Dn {
    fn from(dn: String) -> Self {
        Self(dn)
    }
}

/// Privilege level, totally ordered `Reader < Updater < Admin`
///
/// `Option<Right>` is the lattice used by rights resolution: `None` is the
/// bottom element and `Option::max` is the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Right {
    Reader,
    Updater,
    Admin,
}

impl Right {
    /// Rights satisfying `self`, best first
    pub fn allowed_rights(self) -> Vec<Right> {
        match self {
            Self::Reader => vec![Self::Admin, Self::Updater, Self::Reader],
            Self::Updater => vec![Self::Admin, Self::Updater],
            Self::Admin => vec![Self::Admin],
        }
    }

    pub fn to_mright(self) -> Mright {
        match self {
            Self::Reader => Mright::Reader,
            Self::Updater => Mright::Updater,
            Self::Admin => Mright::Admin,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.to_mright().as_str()
    }
}

/// Join of the rights lattice
pub fn max_right(a: Option<Right>, b: Option<Right>) -> Option<Right> {
    a.max(b)
}

impl FromStr for Right {
    type Err = GroupsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reader" => Ok(Self::Reader),
            "updater" => Ok(Self::Updater),
            "admin" => Ok(Self::Admin),
            _ => Err(GroupsError::Validation(format!("invalid right {s}"))),
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation kind: membership or one of the three privilege levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mright {
    Member,
    Reader,
    Updater,
    Admin,
}

impl Mright {
    pub const ALL: [Mright; 4] = [Self::Member, Self::Reader, Self::Updater, Self::Admin];
    pub const RIGHTS: [Mright; 3] = [Self::Reader, Self::Updater, Self::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Reader => "reader",
            Self::Updater => "updater",
            Self::Admin => "admin",
        }
    }

    /// Attribute holding the direct value (`memberURL;x-<mright>`)
    pub fn direct_attr(self) -> String {
        format!("memberURL;x-{}", self.as_str())
    }

    pub fn to_right(self) -> Option<Right> {
        match self {
            Self::Member => None,
            Self::Reader => Some(Right::Reader),
            Self::Updater => Some(Right::Updater),
            Self::Admin => Some(Right::Admin),
        }
    }
}

impl FromStr for Mright {
    type Err = GroupsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| GroupsError::Validation(format!("invalid mright {s}")))
    }
}

impl fmt::Display for Mright {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Group,
    Stem,
}

/// Identity of the caller of an engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedUser {
    /// Caller authenticated with the trusted bearer: every right
    TrustedAdmin,
    User(Dn),
}

impl LoggedUser {
    pub fn user(dn: impl Into<String>) -> Self {
        Self::User(Dn::new(dn))
    }

    pub fn is_trusted_admin(&self) -> bool {
        matches!(self, Self::TrustedAdmin)
    }
}

impl fmt::Display for LoggedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustedAdmin => f.write_str("TrustedAdmin"),
            Self::User(dn) => write!(f, "{dn}"),
        }
    }
}

/// Single-valued descriptive attributes
pub type MonoAttrs = BTreeMap<String, String>;

/// Raw directory attributes
pub type MultiAttrs = BTreeMap<String, Vec<String>>;

/// Options attached to a direct member/right value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enddate: Option<DateTime<Utc>>,
}

impl DirectOptions {
    pub fn until(enddate: DateTime<Utc>) -> Self {
        Self { enddate: Some(enddate) }
    }
}

pub type DnsOpts = BTreeMap<Dn, DirectOptions>;

/// Direct operation on a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MyMod {
    Add,
    Delete,
    Replace,
}

/// Group/stem id to its descriptive attributes
pub type SgroupsWithAttrs = BTreeMap<String, MonoAttrs>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectAttrs {
    pub attrs: MonoAttrs,
    /// Subject source the subject belongs to, `None` for unknown subjects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sscfg_dn: Option<Dn>,
    /// Set when the subject is itself a group/stem
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sgroup_id: Option<String>,
    #[serde(skip_serializing_if = "is_default_options")]
    pub options: DirectOptions,
}

fn is_default_options(options: &DirectOptions) -> bool {
    options.enddate.is_none()
}

pub type Subjects = BTreeMap<Dn, SubjectAttrs>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectsAndCount {
    pub count: usize,
    pub subjects: Subjects,
}

/// An ancestor stem with the right inherited down to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SgroupOutAndRight {
    pub sgroup_id: String,
    pub attrs: MonoAttrs,
    pub right: Option<Right>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SgroupOutMore {
    Stem {
        children: SgroupsWithAttrs,
    },
    Group {
        direct_members: Subjects,
    },
    SynchronizedGroup {
        remote_query: RemoteQuery,
        last_sync_date: Option<DateTime<Utc>>,
    },
}

/// Read model returned by `get_sgroup`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SgroupAndMoreOut {
    pub attrs: MonoAttrs,
    #[serde(flatten)]
    pub more: SgroupOutMore,
    pub right: Right,
    pub parents: Vec<SgroupOutAndRight>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectLookupError {
    NoMatch,
    MultipleMatch,
}

/// Result of looking a subject up by external id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubjectOut {
    Found {
        dn: Dn,
        attrs: MonoAttrs,
        ssdn: Dn,
    },
    Error {
        error: SubjectLookupError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdSubjectOut {
    pub id: String,
    #[serde(flatten)]
    pub subject: SubjectOut,
}
