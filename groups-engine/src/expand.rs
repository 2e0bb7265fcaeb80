//! Incremental maintenance of flattened relations
//!
//! The flattened value of a relation is its direct value with every nested
//! group replaced by that group's flattened `member` set (and, for a
//! synchronized group, the direct value replaced by the remote query result).
//! A change of a group's flattened members cascades to every group or stem
//! referencing it.

use audit_engine::AuditLog;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    error::{GroupsError, Result},
    filter::Filter,
    hierarchy::{dn_to_url, url_to_dn, Hierarchy},
    models::*,
    remote::{RemoteQuery, RemoteSync},
    repository::{DirectoryStore, Modification},
    schema::GroupsConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpResult {
    Modified,
    Unchanged,
}

/// Flattened values diff: what a recompute wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenedDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl FlattenedDiff {
    pub fn between(current: &BTreeSet<String>, target: &BTreeSet<String>) -> Self {
        Self {
            added: target.difference(current).cloned().collect(),
            removed: current.difference(target).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Additions first, so that the attribute never goes through an empty state
    pub fn to_modifications(&self, attr: &str) -> Vec<Modification> {
        let mut mods = Vec::new();
        if !self.added.is_empty() {
            mods.push(Modification::Add(attr.to_string(), self.added.iter().cloned().collect()));
        }
        if !self.removed.is_empty() {
            mods.push(Modification::Delete(attr.to_string(), self.removed.iter().cloned().collect()));
        }
        mods
    }

    pub fn apply(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        current
            .difference(&self.removed)
            .cloned()
            .chain(self.added.iter().cloned())
            .collect()
    }
}

pub struct Flattener {
    store: Arc<dyn DirectoryStore>,
    config: Arc<GroupsConfig>,
    hierarchy: Hierarchy,
    remote: Arc<RemoteSync>,
    audit: Arc<AuditLog>,
}

impl Flattener {
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        config: Arc<GroupsConfig>,
        remote: Arc<RemoteSync>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let hierarchy = config.hierarchy();
        Self {
            store,
            config,
            hierarchy,
            remote,
            audit,
        }
    }

    /// Stored flattened values, the empty marker included
    async fn stored_flattened(&self, dn: &Dn, attr: &str) -> Result<Option<BTreeSet<String>>> {
        Ok(self
            .store
            .read_entry(dn, &[attr])
            .await?
            .map(|entry| entry.values(attr).iter().cloned().collect()))
    }

    /// Stored flattened set of a relation, without the empty marker
    pub async fn flattened_mright(&self, id: &str, mright: Mright) -> Result<BTreeSet<Dn>> {
        let attr = self.config.flattened_attr(mright);
        let values = self
            .stored_flattened(&self.hierarchy.sgroup_id_to_dn(id), attr)
            .await?
            .ok_or_else(|| GroupsError::NotFound(format!("sgroup \"{id}\" does not exist")))?;
        Ok(values
            .into_iter()
            .map(Dn::new)
            .filter(|dn| !dn.is_empty_marker())
            .collect())
    }

    /// Identities the direct value of a relation stands for
    async fn direct_identities(&self, id: &str, mright: Mright) -> Result<Vec<Dn>> {
        let attr = mright.direct_attr();
        let entry = self
            .store
            .read_entry(&self.hierarchy.sgroup_id_to_dn(id), &[attr.as_str()])
            .await?
            .ok_or_else(|| GroupsError::NotFound(format!("sgroup \"{id}\" does not exist")))?;
        let urls = entry.values(&attr);

        if mright == Mright::Member {
            if let Some(remote) = RemoteQuery::from_direct_members(urls) {
                debug!("{id} is synchronized from {}", remote.to_url());
                return Ok(self.remote.resolve(&remote).await?.into_keys().collect());
            }
        }
        Ok(urls.iter().filter_map(|url| url_to_dn(url)).map(|(dn, _)| dn).collect())
    }

    /// Expected flattened set of a relation from the current direct values
    pub async fn compute(&self, id: &str, mright: Mright) -> Result<BTreeSet<Dn>> {
        let member_attr = self.config.flattened_attr(Mright::Member);
        let mut flattened = BTreeSet::new();
        for dn in self.direct_identities(id, mright).await? {
            if !self.hierarchy.dn_is_sgroup(&dn) {
                flattened.insert(dn);
                continue;
            }
            match self.stored_flattened(&dn, member_attr).await? {
                Some(members) => {
                    flattened.extend(members.into_iter().map(Dn::new).filter(|dn| !dn.is_empty_marker()));
                }
                None => warn!("{id}: {mright} references missing group {dn}, ignored"),
            }
        }
        Ok(flattened)
    }

    /// Bring the stored flattened value of one relation in line with its direct value
    pub async fn recompute(&self, id: &str, mright: Mright) -> Result<UpResult> {
        let dn = self.hierarchy.sgroup_id_to_dn(id);
        let attr = self.config.flattened_attr(mright);

        let flattened = self.compute(id, mright).await?;
        let new_count = flattened.len();
        let mut target: BTreeSet<String> = flattened.into_iter().map(|dn| dn.to_string()).collect();
        if target.is_empty() && mright == Mright::Member {
            target.insert(Dn::empty_marker().to_string());
        }
        let current = self.stored_flattened(&dn, attr).await?.unwrap_or_default();

        let diff = FlattenedDiff::between(&current, &target);
        if diff.is_empty() {
            debug!("{id}: flattened {mright} unchanged");
            return Ok(UpResult::Unchanged);
        }
        self.store.modify(&dn, diff.to_modifications(attr)).await?;

        let without_marker =
            |values: &BTreeSet<String>| -> Vec<String> { values.iter().filter(|v| !v.is_empty()).cloned().collect() };
        info!(
            "{id}: flattened {mright} now has {new_count} values (+{} -{})",
            diff.added.len(),
            diff.removed.len()
        );
        self.audit
            .log_flattened_modifications(
                id,
                mright.as_str(),
                new_count,
                without_marker(&diff.added),
                without_marker(&diff.removed),
            )
            .await?;
        Ok(UpResult::Modified)
    }

    /// Groups/stems whose direct value of some relation references `id`
    pub async fn dependents(&self, id: &str) -> Result<Vec<(String, Mright)>> {
        let dn = self.hierarchy.sgroup_id_to_dn(id);
        let url = dn_to_url(&dn, &DirectOptions::default());
        let with_options = format!("{url}?");

        let filters = Mright::ALL
            .iter()
            .flat_map(|mright| {
                let attr = mright.direct_attr();
                [Filter::eq(&attr, &url), Filter::starts_with(&attr, &with_options)]
            })
            .collect();
        let attrs: Vec<String> = Mright::ALL.iter().map(|m| m.direct_attr()).collect();
        let attrs: Vec<&str> = attrs.iter().map(String::as_str).collect();
        let entries = self
            .store
            .search(self.hierarchy.groups_dn(), &Filter::or(filters), &attrs, None)
            .await?;

        let mut dependents = Vec::new();
        for entry in entries {
            let Some(dependent) = self.hierarchy.dn_to_sgroup_id(&entry.dn) else {
                continue;
            };
            for mright in Mright::ALL {
                let references = entry
                    .values(&mright.direct_attr())
                    .iter()
                    .filter_map(|v| url_to_dn(v))
                    .any(|(value, _)| value == dn);
                if references {
                    dependents.push((dependent.clone(), mright));
                }
            }
        }
        Ok(dependents)
    }

    /// Recompute the queued relations in FIFO order, cascading member changes
    /// to dependents. Returns the result of each recompute in order
    pub async fn propagate(&self, mut todo: VecDeque<(String, Mright)>) -> Result<Vec<(String, Mright, UpResult)>> {
        let max_steps = self.config.max_propagation_steps;
        let mut done = Vec::new();
        while let Some((id, mright)) = todo.pop_front() {
            if done.len() >= max_steps {
                return Err(GroupsError::Configuration(format!(
                    "flattening of {id} {mright} exceeds {max_steps} steps, is there a cycle in group members?"
                )));
            }
            let result = self.recompute(&id, mright).await.map_err(|e| match e {
                GroupsError::Configuration(_) => e,
                e => GroupsError::Store(format!("flattening {mright} of \"{id}\" failed: {e}")),
            })?;
            if result == UpResult::Modified && mright == Mright::Member {
                let dependents = self.dependents(&id).await?;
                debug!("{id} members changed, {} dependent relations queued", dependents.len());
                todo.extend(dependents);
            }
            done.push((id, mright, result));
        }
        Ok(done)
    }
}
