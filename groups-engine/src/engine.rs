use audit_engine::{AuditLog, LogStream, SgroupAction, SgroupLogs};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    cache::Cache,
    check::RightsChecker,
    error::{GroupsError, Result},
    expand::{Flattener, UpResult},
    filter::Filter,
    hierarchy::{dn_to_url, Hierarchy},
    models::*,
    mods::{self, MyMods, RelationMods, Replacement},
    remote::{
        DirectoryQueryExecutor, RemoteQuery, RemoteSync, SqlExecutor, SqlxExecutor, StoreDirectoryQuery,
        TestRemoteQuery,
    },
    repository::{DirectoryStore, Entry, Modification},
    schema::GroupsConfig,
    subjects::{terms_search_filters, SubjectSearch},
};

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value).map_err(anyhow::Error::from)?)
}

/// Core groups engine: every operation checks the caller's rights, applies
/// the change to the directory, records it in the audit log and keeps the
/// flattened relations up to date
pub struct GroupsEngine {
    /// Directory holding stems, groups and subjects
    store: Arc<dyn DirectoryStore>,

    config: Arc<GroupsConfig>,
    hierarchy: Hierarchy,

    /// Rights resolution with ancestor inheritance
    checker: Arc<RightsChecker>,

    subjects: Arc<SubjectSearch>,

    sql: Arc<dyn SqlExecutor>,
    directory: Arc<dyn DirectoryQueryExecutor>,
    remote: Arc<RemoteSync>,

    /// Flattened relations maintenance
    flattener: Arc<Flattener>,

    audit: Arc<AuditLog>,
    cache: Arc<Cache>,
}

impl GroupsEngine {
    /// Create an engine on `store`, with sqlx remotes and directory queries
    /// answered by the store itself
    pub fn new(store: Arc<dyn DirectoryStore>, config: GroupsConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let hierarchy = config.hierarchy();
        let checker = Arc::new(RightsChecker::new(store.clone(), config.clone()));
        let subjects = Arc::new(SubjectSearch::new(store.clone(), config.clone(), checker.clone()));
        let sql: Arc<dyn SqlExecutor> = Arc::new(SqlxExecutor::new());
        let directory: Arc<dyn DirectoryQueryExecutor> = Arc::new(StoreDirectoryQuery::new(store.clone()));
        let audit = Arc::new(AuditLog::new(config.log_dir.clone()));
        let remote = Arc::new(RemoteSync::new(
            store.clone(),
            config.clone(),
            sql.clone(),
            directory.clone(),
        ));
        let flattener = Arc::new(Flattener::new(
            store.clone(),
            config.clone(),
            remote.clone(),
            audit.clone(),
        ));

        Ok(Self {
            store,
            config,
            hierarchy,
            checker,
            subjects,
            sql,
            directory,
            remote,
            flattener,
            audit,
            cache: Arc::new(Cache::new()),
        })
    }

    fn rebuild_sync(mut self) -> Self {
        self.remote = Arc::new(RemoteSync::new(
            self.store.clone(),
            self.config.clone(),
            self.sql.clone(),
            self.directory.clone(),
        ));
        self.flattener = Arc::new(Flattener::new(
            self.store.clone(),
            self.config.clone(),
            self.remote.clone(),
            self.audit.clone(),
        ));
        self
    }

    /// Use another executor for remote SQL queries
    pub fn with_sql_executor(mut self, sql: Arc<dyn SqlExecutor>) -> Self {
        self.sql = sql;
        self.rebuild_sync()
    }

    /// Use another executor for directory-query URLs
    pub fn with_directory_executor(mut self, directory: Arc<dyn DirectoryQueryExecutor>) -> Self {
        self.directory = directory;
        self.rebuild_sync()
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Arc::new(audit);
        self.rebuild_sync()
    }

    /// Share a cache between engines
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &GroupsConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    // =============================================================================
    // Helpers
    // =============================================================================

    fn validate_sgroup_attrs(&self, attrs: &MonoAttrs) -> Result<()> {
        match attrs.keys().find(|attr| !self.config.ldap.sgroup_attrs.contains_key(*attr)) {
            Some(attr) => Err(GroupsError::Validation(format!("sgroup attr {attr} is not allowed"))),
            None => Ok(()),
        }
    }

    async fn read_sgroup(&self, id: &str, attrs: &[&str]) -> Result<Entry> {
        self.store
            .read_entry(&self.hierarchy.sgroup_id_to_dn(id), attrs)
            .await?
            .ok_or_else(|| GroupsError::NotFound(format!("sgroup \"{id}\" does not exist")))
    }

    async fn current_sgroup_attrs(&self, id: &str) -> Result<MonoAttrs> {
        let entry = self.read_sgroup(id, &self.config.sgroup_attr_names()).await?;
        Ok(self.checker.display_attrs(&entry))
    }

    /// Whether the group's members come from a remote query
    async fn is_synchronized(&self, id: &str) -> Result<bool> {
        if self.hierarchy.is_stem(id) {
            return Ok(false);
        }
        let member_attr = Mright::Member.direct_attr();
        let entry = self.read_sgroup(id, &[member_attr.as_str()]).await?;
        Ok(RemoteQuery::from_direct_members(entry.values(&member_attr)).is_some())
    }

    /// Stems and groups
    fn sgroup_filter(&self) -> Filter {
        let ldap = &self.config.ldap;
        Filter::or(
            ldap.stem_object_classes
                .iter()
                .chain(&ldap.group_object_classes)
                .map(|class| Filter::eq("objectClass", class))
                .collect(),
        )
    }

    fn group_filter(&self) -> Filter {
        Filter::and(
            self.config
                .ldap
                .group_object_classes
                .iter()
                .map(|class| Filter::eq("objectClass", class))
                .collect(),
        )
    }

    async fn right_filter(&self, user: &LoggedUser, right: Right) -> Result<Option<Filter>> {
        match user {
            LoggedUser::TrustedAdmin => Ok(None),
            LoggedUser::User(dn) => Ok(Some(self.checker.user_right_filter(dn, right).await?)),
        }
    }

    async fn search_sgroups_with_attrs(&self, filters: Vec<Filter>, size_limit: Option<usize>) -> Result<SgroupsWithAttrs> {
        let wanted = self.config.sgroup_attr_names();
        let mut sgroups = SgroupsWithAttrs::new();
        for filter in filters {
            for entry in self
                .store
                .search(self.hierarchy.groups_dn(), &filter, &wanted, size_limit)
                .await?
            {
                if let Some(id) = self.hierarchy.dn_to_sgroup_id(&entry.dn) {
                    sgroups.insert(id, self.checker.display_attrs(&entry));
                }
            }
        }
        Ok(sgroups)
    }

    /// Direct children of a stem, grandchildren excluded
    async fn children(&self, id: &str) -> Result<SgroupsWithAttrs> {
        let filter = Filter::and(vec![Filter::starts_with("cn", id), self.sgroup_filter()]);
        let children = self.search_sgroups_with_attrs(vec![filter], None).await?;
        Ok(children
            .into_iter()
            .filter(|(child_id, _)| child_id != id && !self.hierarchy.is_grandchild(id, child_id))
            .collect())
    }

    async fn has_children(&self, id: &str) -> Result<bool> {
        let filter = Filter::starts_with("cn", id);
        let self_dn = self.hierarchy.sgroup_id_to_dn(id);
        let found = self
            .store
            .search(self.hierarchy.groups_dn(), &filter, &["cn"], Some(2))
            .await?;
        Ok(found.iter().any(|entry| entry.dn != self_dn))
    }

    async fn propagate(&self, todo: Vec<(String, Mright)>) -> Result<Vec<(String, Mright, UpResult)>> {
        self.flattener.propagate(VecDeque::from(todo)).await
    }

    // =============================================================================
    // Group/stem lifecycle
    // =============================================================================

    /// Create a stem (`a.b.`) or a group (`a.b.c`). Needs admin on a parent stem
    pub async fn create(&self, user: &LoggedUser, id: &str, attrs: MonoAttrs) -> Result<()> {
        debug!("create({id}, _)");
        self.hierarchy.validate_sgroup_id(id)?;
        self.validate_sgroup_attrs(&attrs)?;
        self.checker.require_on_parents(user, id, Right::Admin).await?;

        let is_stem = self.hierarchy.is_stem(id);
        let object_classes = if is_stem {
            &self.config.ldap.stem_object_classes
        } else {
            &self.config.ldap.group_object_classes
        };
        let mut entry = MultiAttrs::new();
        entry.insert("objectClass".to_string(), object_classes.iter().cloned().collect());
        if !self.hierarchy.is_root(id) {
            entry.insert("cn".to_string(), vec![id.to_string()]);
        }
        if !is_stem {
            entry.insert(
                self.config.flattened_attr(Mright::Member).to_string(),
                vec![Dn::empty_marker().to_string()],
            );
        }
        for (attr, value) in attrs.iter().filter(|(_, value)| !value.is_empty()) {
            entry.insert(attr.clone(), vec![value.clone()]);
        }

        self.store.create(&self.hierarchy.sgroup_id_to_dn(id), entry).await?;
        info!("{user} created {id}");
        self.audit
            .log_sgroup_action(&user.to_string(), id, SgroupAction::Create, None, to_json(&attrs)?)
            .await?;
        Ok(())
    }

    /// Replace the descriptive attributes that differ from the stored ones.
    /// An empty value removes the attribute
    pub async fn modify_sgroup_attrs(&self, user: &LoggedUser, id: &str, attrs: MonoAttrs) -> Result<()> {
        debug!("modify_sgroup_attrs({id}, _)");
        self.hierarchy.validate_sgroup_id(id)?;
        self.validate_sgroup_attrs(&attrs)?;
        self.checker.require_on_self_or_parents(user, id, Right::Admin).await?;

        let current = self.current_sgroup_attrs(id).await?;
        let changed: MonoAttrs = attrs
            .into_iter()
            .filter(|(attr, value)| current.get(attr).map_or(!value.is_empty(), |v| v != value))
            .collect();
        if changed.is_empty() {
            debug!("{id}: no attribute modified");
            return Ok(());
        }

        let modifications = changed
            .iter()
            .map(|(attr, value)| {
                let values = if value.is_empty() { vec![] } else { vec![value.clone()] };
                Modification::Replace(attr.clone(), values)
            })
            .collect();
        self.store.modify(&self.hierarchy.sgroup_id_to_dn(id), modifications).await?;
        info!("{user} modified attributes of {id}");
        self.audit
            .log_sgroup_action(&user.to_string(), id, SgroupAction::ModifyAttrs, None, to_json(&changed)?)
            .await?;
        Ok(())
    }

    /// Delete a group or an empty stem. Groups referencing a deleted group are
    /// recomputed without it
    pub async fn delete(&self, user: &LoggedUser, id: &str) -> Result<()> {
        debug!("delete({id})");
        self.hierarchy.validate_sgroup_id(id)?;
        self.checker.require_on_self_or_parents(user, id, Right::Admin).await?;

        let is_stem = self.hierarchy.is_stem(id);
        if is_stem && self.has_children(id).await? {
            return Err(GroupsError::Conflict(format!("can not remove stem \"{id}\" with existing children")));
        }
        let current = self.current_sgroup_attrs(id).await?;
        let was_synchronized = self.is_synchronized(id).await?;

        self.store.delete(&self.hierarchy.sgroup_id_to_dn(id)).await?;
        info!("{user} deleted {id}");
        if was_synchronized {
            self.cache.clear_all();
        }
        self.audit
            .log_sgroup_action(&user.to_string(), id, SgroupAction::Delete, None, to_json(&current)?)
            .await?;

        if !is_stem {
            let dependents = self.flattener.dependents(id).await?;
            self.propagate(dependents).await?;
        }
        Ok(())
    }

    // =============================================================================
    // Members and rights
    // =============================================================================

    /// Single add/delete/replace of one subject on one relation
    #[allow(clippy::too_many_arguments)]
    pub async fn modify_member_or_right(
        &self,
        user: &LoggedUser,
        id: &str,
        mright: Mright,
        op: MyMod,
        dn: Dn,
        options: DirectOptions,
        msg: Option<&str>,
    ) -> Result<()> {
        let relation = match op {
            MyMod::Add => RelationMods::adding(dn, options),
            MyMod::Delete => RelationMods::deleting(dn),
            MyMod::Replace => RelationMods::replacing(Replacement::Subjects([(dn, options)].into())),
        };
        self.modify_members_or_rights(user, id, MyMods::from([(mright, relation)]), msg)
            .await
    }

    /// Apply member/right modifications, then update the flattened relations
    /// of the group and of every group depending on it
    pub async fn modify_members_or_rights(
        &self,
        user: &LoggedUser,
        id: &str,
        my_mods: MyMods,
        msg: Option<&str>,
    ) -> Result<()> {
        debug!("modify_members_or_rights({id}, _)");
        self.hierarchy.validate_sgroup_id(id)?;
        self.checker
            .require_on_self_or_parents(user, id, mods::required_right(&my_mods))
            .await?;
        for relation in my_mods.values() {
            if let Some(Replacement::Remote(remote)) = &relation.replace {
                remote.validate(&self.config)?;
            }
        }

        if my_mods.contains_key(&Mright::Member) {
            let mut wanted = self.config.sgroup_attr_names();
            wanted.push(mods::MEMBER_TTL_MAX_ATTR);
            let attrs = self.read_sgroup(id, &wanted).await?.mono_attrs();
            mods::check_member_ttl(&attrs, &my_mods, Utc::now())?;
        }

        let my_mods = mods::check_and_simplify_mods(self.store.as_ref(), &self.hierarchy, id, my_mods).await?;
        if my_mods.is_empty() {
            debug!("{id}: nothing to modify");
            return Ok(());
        }
        let was_synchronized = my_mods.contains_key(&Mright::Member) && self.is_synchronized(id).await?;

        let mut modifications = Vec::new();
        for (mright, relation) in &my_mods {
            let current = mods::read_direct_urls(self.store.as_ref(), &self.hierarchy, id, *mright).await?;
            modifications.extend(mods::to_modifications(
                *mright,
                relation,
                &current,
                &self.config.remote_forced_periodicity_attr,
            ));
        }
        if modifications.is_empty() {
            debug!("{id}: modifications already applied");
            return Ok(());
        }

        self.store.modify(&self.hierarchy.sgroup_id_to_dn(id), modifications).await?;
        info!("{user} modified {} of {id}", my_mods.keys().map(|m| m.as_str()).collect::<Vec<_>>().join(", "));
        let remote_modified = my_mods
            .values()
            .any(|relation| matches!(relation.replace, Some(Replacement::Remote(_))));
        if remote_modified || was_synchronized {
            // the remote => groups memo is stale
            self.cache.clear_all();
        }
        self.audit
            .log_sgroup_action(
                &user.to_string(),
                id,
                SgroupAction::ModifyMembersOrRights,
                msg,
                to_json(&my_mods)?,
            )
            .await?;

        self.propagate(my_mods.keys().map(|mright| (id.to_string(), *mright)).collect())
            .await?;
        Ok(())
    }

    /// Turn a group into a synchronized group, or back into a manual group with `None`
    pub async fn modify_remote_query(
        &self,
        user: &LoggedUser,
        id: &str,
        remote: Option<RemoteQuery>,
        msg: Option<&str>,
    ) -> Result<()> {
        debug!("modify_remote_query({id}, {remote:?})");
        self.hierarchy.validate_sgroup_id(id)?;
        if self.hierarchy.is_stem(id) {
            return Err(GroupsError::Validation("remote queries are not allowed for stems".into()));
        }
        self.checker.require_on_self_or_parents(user, id, Right::Admin).await?;
        if let Some(remote) = &remote {
            remote.validate(&self.config)?;
        }
        self.read_sgroup(id, &[]).await?;

        let member_attr = Mright::Member.direct_attr();
        let forced_attr = self.config.remote_forced_periodicity_attr.clone();
        let modifications = match &remote {
            Some(remote) => vec![
                Modification::Replace(member_attr, vec![remote.to_url()]),
                Modification::Replace(
                    forced_attr,
                    remote.forced_periodicity().map(str::to_string).into_iter().collect(),
                ),
            ],
            None => vec![
                Modification::Replace(member_attr, vec![]),
                Modification::Replace(forced_attr, vec![]),
            ],
        };
        self.store.modify(&self.hierarchy.sgroup_id_to_dn(id), modifications).await?;
        info!("{user} modified remote query of {id}");
        // the remote => groups memo is stale
        self.cache.clear_all();
        self.audit
            .log_sgroup_action(&user.to_string(), id, SgroupAction::ModifyRemoteQuery, msg, to_json(&remote)?)
            .await?;

        self.propagate(vec![(id.to_string(), Mright::Member)]).await?;
        Ok(())
    }

    /// Dry run of a remote query
    pub async fn test_remote_query(&self, user: &LoggedUser, id: &str, remote: &RemoteQuery) -> Result<TestRemoteQuery> {
        debug!("test_remote_query({id}, {remote:?})");
        self.hierarchy.validate_sgroup_id(id)?;
        self.checker.require_on_self_or_parents(user, id, Right::Admin).await?;
        remote.validate(&self.config)?;
        self.remote.test(remote).await
    }

    /// Force the recompute of flattened relations (all of them by default)
    pub async fn sync(
        &self,
        user: &LoggedUser,
        id: &str,
        mrights: Option<Vec<Mright>>,
    ) -> Result<BTreeMap<Mright, UpResult>> {
        debug!("sync({id}, {mrights:?})");
        self.hierarchy.validate_sgroup_id(id)?;
        self.checker.require_on_self_or_parents(user, id, Right::Admin).await?;
        self.read_sgroup(id, &[]).await?;

        let is_stem = self.hierarchy.is_stem(id);
        let mrights = mrights.unwrap_or_else(|| {
            if is_stem {
                Mright::RIGHTS.to_vec()
            } else {
                Mright::ALL.to_vec()
            }
        });
        if is_stem && mrights.contains(&Mright::Member) {
            return Err(GroupsError::Validation("members are not allowed for stems".into()));
        }

        let mut results = BTreeMap::new();
        for mright in mrights {
            let done = self.propagate(vec![(id.to_string(), mright)]).await?;
            if let Some((_, _, result)) = done.first() {
                results.insert(mright, *result);
            }
        }
        Ok(results)
    }

    /// Ids of the groups synchronized from `remote_name`, memoized
    async fn remote_groups(&self, remote_name: &str) -> Result<BTreeSet<String>> {
        if let Some(ids) = self.cache.remote_groups(remote_name) {
            return Ok(ids);
        }
        let attr = Mright::Member.direct_attr();
        let filter = Filter::starts_with(&attr, &format!("sql: remote={remote_name} : "));
        let ids: BTreeSet<String> = self
            .store
            .search(self.hierarchy.groups_dn(), &filter, &[attr.as_str()], None)
            .await?
            .iter()
            .filter_map(|entry| self.hierarchy.dn_to_sgroup_id(&entry.dn))
            .collect();
        self.cache.set_remote_groups(remote_name, ids.clone());
        Ok(ids)
    }

    /// Recompute every group synchronized from a remote. Returns the groups whose members changed
    pub async fn sync_remote_groups(&self, user: &LoggedUser, remote_name: &str) -> Result<Vec<String>> {
        if !user.is_trusted_admin() {
            return Err(GroupsError::Forbidden("only the trusted admin can synchronize remotes".into()));
        }
        if !self.config.remotes.contains_key(remote_name) {
            return Err(GroupsError::Configuration(format!("unknown remote_cfg_name {remote_name}")));
        }
        let ids = self.remote_groups(remote_name).await?;
        info!("synchronizing {} groups from remote {remote_name}", ids.len());

        let done = self
            .propagate(ids.iter().map(|id| (id.clone(), Mright::Member)).collect())
            .await?;
        Ok(done
            .into_iter()
            .filter(|(id, _, result)| *result == UpResult::Modified && ids.contains(id))
            .map(|(id, _, _)| id)
            .collect())
    }

    // =============================================================================
    // Read operations
    // =============================================================================

    /// Group/stem with its kind-specific part, the caller's right and the parents
    pub async fn get_sgroup(&self, user: &LoggedUser, id: &str) -> Result<SgroupAndMoreOut> {
        debug!("get_sgroup({id})");
        self.hierarchy.validate_sgroup_id(id)?;

        let member_attr = Mright::Member.direct_attr();
        let mut wanted = vec![member_attr.as_str(), self.config.remote_forced_periodicity_attr.as_str()];
        wanted.extend(self.checker.allowed_flattened_attrs(Right::Reader));
        wanted.extend(self.config.sgroup_attr_names());
        let entry = self.read_sgroup(id, &wanted).await?;

        let (right, parents) = self.checker.effective_right(user, id, Some(&entry)).await?;
        let right = right.ok_or_else(|| GroupsError::Forbidden(format!("no right to read sgroup \"{id}\"")))?;
        let attrs = self.checker.display_attrs(&entry);

        let more = if self.hierarchy.is_stem(id) {
            SgroupOutMore::Stem {
                children: self.children(id).await?,
            }
        } else {
            let direct_members = entry.values(&member_attr);
            match RemoteQuery::from_direct_members(direct_members) {
                Some(mut remote_query) => {
                    if let Some(periodicity) = entry.first_value(&self.config.remote_forced_periodicity_attr) {
                        remote_query.set_forced_periodicity(Some(periodicity.to_string()));
                    }
                    let last_sync_date = if self.audit.is_enabled() {
                        self.audit.read(id, 0, LogStream::Sync).await?.last_log_date
                    } else {
                        None
                    };
                    SgroupOutMore::SynchronizedGroup {
                        remote_query,
                        last_sync_date,
                    }
                }
                None => SgroupOutMore::Group {
                    direct_members: self.subjects.get_subjects_from_urls(direct_members).await?,
                },
            }
        };
        Ok(SgroupAndMoreOut {
            attrs,
            more,
            right,
            parents,
        })
    }

    pub async fn sgroup_exists(&self, user: &LoggedUser, id: &str) -> Result<bool> {
        self.hierarchy.validate_sgroup_id(id)?;
        self.checker.require_on_self_or_parents(user, id, Right::Reader).await?;
        Ok(self
            .store
            .read_entry(&self.hierarchy.sgroup_id_to_dn(id), &[])
            .await?
            .is_some())
    }

    /// Subjects holding a direct right, per right
    pub async fn get_sgroup_direct_rights(&self, user: &LoggedUser, id: &str) -> Result<BTreeMap<Right, Subjects>> {
        debug!("get_sgroup_direct_rights({id})");
        self.hierarchy.validate_sgroup_id(id)?;
        self.checker.require_on_self_or_parents(user, id, Right::Reader).await?;

        let attrs: Vec<String> = Mright::RIGHTS.iter().map(|m| m.direct_attr()).collect();
        let attrs: Vec<&str> = attrs.iter().map(String::as_str).collect();
        let entry = self.read_sgroup(id, &attrs).await?;

        let mut rights = BTreeMap::new();
        for right in Right::Reader.allowed_rights() {
            let urls = entry.values(&right.to_mright().direct_attr());
            if !urls.is_empty() {
                rights.insert(right, self.subjects.get_subjects_from_urls(urls).await?);
            }
        }
        Ok(rights)
    }

    /// Flattened subjects of a relation, optionally filtered by a search token
    pub async fn get_sgroup_flattened_mright(
        &self,
        user: &LoggedUser,
        id: &str,
        mright: Mright,
        search_token: Option<&str>,
        size_limit: Option<usize>,
    ) -> Result<SubjectsAndCount> {
        debug!("get_sgroup_flattened_mright({id}, {mright})");
        self.hierarchy.validate_sgroup_id(id)?;
        self.checker.require_on_self_or_parents(user, id, Right::Reader).await?;

        let dns = self.flattener.flattened_mright(id, mright).await?;
        let count = dns.len();
        let dn2opts: DnsOpts = dns
            .into_iter()
            .take(size_limit.unwrap_or(usize::MAX))
            .map(|dn| (dn, DirectOptions::default()))
            .collect();
        let subjects = self.subjects.get_subjects(&dn2opts, search_token, None).await?;
        Ok(SubjectsAndCount { count, subjects })
    }

    /// Tail of the action log (or sync log) of a group/stem
    pub async fn get_sgroup_logs(&self, user: &LoggedUser, id: &str, bytes: u64, stream: LogStream) -> Result<SgroupLogs> {
        debug!("get_sgroup_logs({id}, {bytes}, {stream:?})");
        self.hierarchy.validate_sgroup_id(id)?;
        self.checker.require_on_self_or_parents(user, id, Right::Admin).await?;
        Ok(self.audit.read(id, bytes, stream).await?)
    }

    // =============================================================================
    // Searches
    // =============================================================================

    /// Groups/stems matching `search_token` on which the caller has `right`.
    /// Multi-word tokens also match entries containing every word
    pub async fn search_sgroups(
        &self,
        user: &LoggedUser,
        right: Right,
        search_token: &str,
        size_limit: Option<usize>,
    ) -> Result<SgroupsWithAttrs> {
        debug!("search_sgroups({search_token}, {right})");
        let sscfg = self
            .config
            .sgroup_sscfg()
            .ok_or_else(|| GroupsError::Configuration("groups_dn must be a subject source".into()))?;
        let right_filter = self.right_filter(user, right).await?;
        let filters = terms_search_filters(sscfg, search_token)?
            .into_iter()
            .map(|term_filter| {
                Filter::and(
                    right_filter
                        .clone()
                        .into_iter()
                        .chain([term_filter, self.sgroup_filter()])
                        .collect(),
                )
            })
            .collect();
        self.search_sgroups_with_attrs(filters, size_limit).await
    }

    /// Groups on which the caller is updater or admin
    pub async fn mygroups(&self, user: &LoggedUser) -> Result<SgroupsWithAttrs> {
        let LoggedUser::User(user_dn) = user else {
            return Err(GroupsError::Validation("mygroups needs a real user".into()));
        };
        let direct = self
            .checker
            .allowed_flattened_attrs(Right::Updater)
            .into_iter()
            .map(|attr| Filter::eq(attr, user_dn.as_str()))
            .collect();
        let filter = Filter::and(vec![Filter::or(direct), self.group_filter()]);
        self.search_sgroups_with_attrs(vec![filter], None).await
    }

    /// Ids of the groups/stems having `subject_dn` as a direct value of `mright`
    pub async fn search_raw_sgroups_using_a_subject(
        &self,
        user: &LoggedUser,
        subject_dn: &Dn,
        mright: Mright,
    ) -> Result<Vec<String>> {
        debug!("search_raw_sgroups_using_a_subject({subject_dn}, {mright})");
        let right = mright.to_right().unwrap_or(Right::Reader);
        let attr = mright.direct_attr();
        let url = dn_to_url(subject_dn, &DirectOptions::default());
        let subject_filter = Filter::or(vec![
            Filter::eq(&attr, &url),
            Filter::starts_with(&attr, &format!("{url}?")),
        ]);
        let filters = self
            .right_filter(user, right)
            .await?
            .into_iter()
            .chain([subject_filter, self.sgroup_filter()])
            .collect();
        let entries = self
            .store
            .search(self.hierarchy.groups_dn(), &Filter::and(filters), &[attr.as_str()], None)
            .await?;
        Ok(entries
            .iter()
            .filter_map(|entry| self.hierarchy.dn_to_sgroup_id(&entry.dn))
            .collect())
    }

    /// Subjects matching `search_token`, per subject source
    pub async fn search_subjects(
        &self,
        user: &LoggedUser,
        search_token: &str,
        size_limit: Option<usize>,
        source_dn: Option<&Dn>,
        group_to_avoid: Option<&str>,
    ) -> Result<BTreeMap<Dn, Subjects>> {
        debug!("search_subjects({search_token}, {source_dn:?})");
        self.subjects
            .search_subjects(user, search_token, size_limit, source_dn, group_to_avoid)
            .await
    }

    pub async fn subject_id_to_dn(&self, user: &LoggedUser, subject_id: &str, source_dn: Option<&Dn>) -> Result<SubjectOut> {
        self.subjects.subject_id_to_dn(user, subject_id, source_dn).await
    }

    pub async fn subject_ids_to_dns(
        &self,
        user: &LoggedUser,
        subject_ids: &[String],
        source_dn: Option<&Dn>,
    ) -> Result<Vec<IdSubjectOut>> {
        self.subjects.subject_ids_to_dns(user, subject_ids, source_dn).await
    }

    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }
}
