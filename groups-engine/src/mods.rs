//! Member/right modification requests: validation, simplification and
//! translation into directory modifications

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::{
    error::{GroupsError, Result},
    hierarchy::{dn_to_url, url_to_dn, Hierarchy},
    models::*,
    remote::RemoteQuery,
    repository::{DirectoryStore, Modification},
};

/// Descriptive attribute bounding member end dates, in days
pub const MEMBER_TTL_MAX_ATTR: &str = "groupaldOptions;x-member-ttl-max";

/// Subject replacements larger than this are rewritten as add/delete
pub const REPLACE_SIMPLIFICATION_THRESHOLD: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Replacement {
    Subjects(DnsOpts),
    Remote(RemoteQuery),
}

/// Requested changes on one relation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationMods {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: DnsOpts,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub delete: BTreeSet<Dn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<Replacement>,
}

impl RelationMods {
    pub fn adding(dn: Dn, options: DirectOptions) -> Self {
        Self {
            add: [(dn, options)].into(),
            ..Self::default()
        }
    }

    pub fn deleting(dn: Dn) -> Self {
        Self {
            delete: [dn].into(),
            ..Self::default()
        }
    }

    pub fn replacing(replacement: Replacement) -> Self {
        Self {
            replace: Some(replacement),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.delete.is_empty() && self.replace.is_none()
    }

    fn remote(&self) -> Option<&RemoteQuery> {
        match &self.replace {
            Some(Replacement::Remote(remote)) => Some(remote),
            _ => None,
        }
    }
}

pub type MyMods = BTreeMap<Mright, RelationMods>;

/// Right needed to apply `mods`: updaters may only manage readers
pub fn required_right(mods: &MyMods) -> Right {
    if mods.keys().any(|mright| *mright != Mright::Reader) {
        Right::Admin
    } else {
        Right::Updater
    }
}

/// Structural checks not needing the store
pub fn check_mods(is_stem: bool, mods: &MyMods) -> Result<()> {
    for (mright, relation) in mods {
        if *mright == Mright::Member && is_stem {
            return Err(GroupsError::Validation("members are not allowed for stems".into()));
        }
        if relation.remote().is_some() {
            if *mright != Mright::Member {
                return Err(GroupsError::Validation(format!(
                    "remote queries are only allowed for members, not {mright}"
                )));
            }
            if !relation.add.is_empty() || !relation.delete.is_empty() {
                return Err(GroupsError::Validation(
                    "a remote query replacement can not be combined with add/delete".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Rewrite a large subject replacement as add/delete against `current`
pub fn simplify_relation(relation: RelationMods, current: &DnsOpts) -> RelationMods {
    let RelationMods { mut add, mut delete, replace } = relation;
    match replace {
        Some(Replacement::Subjects(wanted)) if wanted.len() > REPLACE_SIMPLIFICATION_THRESHOLD => {
            for (dn, options) in &wanted {
                if !current.contains_key(dn) {
                    add.insert(dn.clone(), options.clone());
                }
            }
            delete.extend(current.keys().filter(|dn| !wanted.contains_key(*dn)).cloned());
            debug!("replaced long replacement with {} adds, {} deletes", add.len(), delete.len());
            RelationMods { add, delete, replace: None }
        }
        replace => RelationMods { add, delete, replace },
    }
}

/// Enforce the group's member TTL policy on added/replaced members
pub fn check_member_ttl(attrs: &MonoAttrs, mods: &MyMods, now: DateTime<Utc>) -> Result<()> {
    let (Some(ttl_max), Some(member)) = (attrs.get(MEMBER_TTL_MAX_ATTR), mods.get(&Mright::Member)) else {
        return Ok(());
    };
    let days: i64 = ttl_max
        .trim()
        .parse()
        .map_err(|_| GroupsError::Validation("member-ttl-max must be an integer".into()))?;
    let max = now + Duration::days(days);

    let replaced = match &member.replace {
        Some(Replacement::Subjects(dns)) => Some(dns),
        _ => None,
    };
    for (dn, options) in member.add.iter().chain(replaced.into_iter().flatten()) {
        let enddate = options
            .enddate
            .ok_or_else(|| GroupsError::Validation(format!("enddate mandatory for this sgroup ({dn})")))?;
        if enddate > max {
            return Err(GroupsError::Validation(format!("enddate > member-ttl-max for {dn}")));
        }
    }
    Ok(())
}

/// Current direct values of a relation: dn to the stored URL
pub async fn read_direct_urls(
    store: &dyn DirectoryStore,
    hierarchy: &Hierarchy,
    id: &str,
    mright: Mright,
) -> Result<BTreeMap<Dn, String>> {
    let attr = mright.direct_attr();
    let entry = store
        .read_entry(&hierarchy.sgroup_id_to_dn(id), &[attr.as_str()])
        .await?
        .ok_or_else(|| GroupsError::NotFound(format!("sgroup \"{id}\" does not exist")))?;
    Ok(entry
        .values(&attr)
        .iter()
        .filter_map(|url| url_to_dn(url).map(|(dn, _)| (dn, url.clone())))
        .collect())
}

pub async fn read_direct_mright(
    store: &dyn DirectoryStore,
    hierarchy: &Hierarchy,
    id: &str,
    mright: Mright,
) -> Result<DnsOpts> {
    let attr = mright.direct_attr();
    let entry = store
        .read_entry(&hierarchy.sgroup_id_to_dn(id), &[attr.as_str()])
        .await?
        .ok_or_else(|| GroupsError::NotFound(format!("sgroup \"{id}\" does not exist")))?;
    Ok(entry.values(&attr).iter().filter_map(|url| url_to_dn(url)).collect())
}

/// Structural checks, then per-relation simplification. Relations left
/// empty are dropped; an empty result means there is nothing to do
pub async fn check_and_simplify_mods(
    store: &dyn DirectoryStore,
    hierarchy: &Hierarchy,
    id: &str,
    mods: MyMods,
) -> Result<MyMods> {
    check_mods(hierarchy.is_stem(id), &mods)?;

    let mut simplified = MyMods::new();
    for (mright, relation) in mods {
        let relation = match &relation.replace {
            Some(Replacement::Subjects(dns)) if dns.len() > REPLACE_SIMPLIFICATION_THRESHOLD => {
                let current = read_direct_mright(store, hierarchy, id, mright).await?;
                simplify_relation(relation, &current)
            }
            _ => relation,
        };
        if !relation.is_empty() {
            simplified.insert(mright, relation);
        }
    }
    Ok(simplified)
}

/// Directory modifications of the direct attribute of one relation.
/// `current` maps existing dns to their stored URL, so that deleting a dn
/// removes the exact stored value and re-adding it updates its options
pub fn to_modifications(
    mright: Mright,
    relation: &RelationMods,
    current: &BTreeMap<Dn, String>,
    forced_periodicity_attr: &str,
) -> Vec<Modification> {
    let attr = mright.direct_attr();
    let mut mods = Vec::new();

    if let Some(replace) = &relation.replace {
        match replace {
            Replacement::Subjects(dns) => {
                let urls = dns.iter().map(|(dn, options)| dn_to_url(dn, options)).collect();
                mods.push(Modification::Replace(attr.clone(), urls));
            }
            Replacement::Remote(remote) => {
                mods.push(Modification::Replace(attr.clone(), vec![remote.to_url()]));
                let periodicity = remote.forced_periodicity().map(str::to_string).into_iter().collect();
                mods.push(Modification::Replace(forced_periodicity_attr.to_string(), periodicity));
            }
        }
    }

    // dns absent from the relation are ignored on delete
    let mut to_delete: Vec<String> = relation.delete.iter().filter_map(|dn| current.get(dn).cloned()).collect();
    let mut to_add = Vec::new();
    for (dn, options) in &relation.add {
        let url = dn_to_url(dn, options);
        if let Some(existing) = current.get(dn).filter(|_| !relation.delete.contains(dn)) {
            if existing == &url {
                continue;
            }
            to_delete.push(existing.clone());
        }
        to_add.push(url);
    }

    if !to_delete.is_empty() {
        mods.push(Modification::Delete(attr.clone(), to_delete));
    }
    if !to_add.is_empty() {
        mods.push(Modification::Add(attr, to_add));
    }
    mods
}
