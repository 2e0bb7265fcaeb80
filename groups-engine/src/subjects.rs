//! Subjects (people, groups, ...) living in the configured subject sources

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::{
    check::RightsChecker,
    error::Result,
    filter::Filter,
    hierarchy::{dn_to_url, urls_to_dns, Hierarchy},
    models::*,
    repository::{DirectoryStore, Entry},
    schema::{GroupsConfig, SubjectSourceConfig},
};

/// Subjects are looked up by batches of RDNs
const RDNS_CHUNK_SIZE: usize = 10;

/// Search filter of a subject source for a term. Whitespace is not significant
pub fn search_filter(sscfg: &SubjectSourceConfig, term: &str) -> Result<Filter> {
    let term: String = term.split_whitespace().collect();
    Filter::from_template(&sscfg.search_filter, &term)
}

/// The whole term first, then every word of the term when there are several
pub fn terms_search_filters(sscfg: &SubjectSourceConfig, search_token: &str) -> Result<Vec<Filter>> {
    let mut filters = vec![search_filter(sscfg, search_token)?];
    let words: Vec<&str> = search_token.split_whitespace().collect();
    if words.len() > 1 {
        let per_word = words
            .into_iter()
            .map(|word| search_filter(sscfg, word))
            .collect::<Result<Vec<_>>>()?;
        filters.push(Filter::and(per_word));
    }
    Ok(filters)
}

/// Subject lookups and searches across subject sources
pub struct SubjectSearch {
    store: Arc<dyn DirectoryStore>,
    config: Arc<GroupsConfig>,
    hierarchy: Hierarchy,
    checker: Arc<RightsChecker>,
}

impl SubjectSearch {
    pub fn new(store: Arc<dyn DirectoryStore>, config: Arc<GroupsConfig>, checker: Arc<RightsChecker>) -> Self {
        let hierarchy = config.hierarchy();
        Self {
            store,
            config,
            hierarchy,
            checker,
        }
    }

    fn to_subject(&self, sscfg: &SubjectSourceConfig, entry: Entry, options: DirectOptions) -> (Dn, SubjectAttrs) {
        let wanted = |attr: &String| {
            sscfg.display_attrs.is_empty() || sscfg.display_attrs.iter().any(|a| a.eq_ignore_ascii_case(attr))
        };
        let attrs = entry.mono_attrs().into_iter().filter(|(attr, _)| wanted(attr)).collect();
        let sgroup_id = self.hierarchy.dn_to_sgroup_id(&entry.dn);
        (
            entry.dn,
            SubjectAttrs {
                attrs,
                sscfg_dn: Some(sscfg.dn.clone()),
                sgroup_id,
                options,
            },
        )
    }

    /// Search one subject source, attaching the options known for each dn
    pub async fn search_in_source(
        &self,
        sscfg: &SubjectSourceConfig,
        filter: &Filter,
        dn2opts: &DnsOpts,
        size_limit: Option<usize>,
    ) -> Result<Subjects> {
        let attrs: Vec<&str> = sscfg.display_attrs.iter().map(String::as_str).collect();
        let entries = self.store.search(&sscfg.dn, filter, &attrs, size_limit).await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let options = dn2opts.get(&entry.dn).cloned().unwrap_or_default();
                self.to_subject(sscfg, entry, options)
            })
            .collect())
    }

    /// Resolve dns to subjects, grouped by subject source.
    ///
    /// Without a search token every dn is returned: dns outside any subject
    /// source, or missing from it, come back with no attributes. With a token
    /// only matching subjects are returned, stopping once `size_limit` is reached
    pub async fn get_subjects(
        &self,
        dn2opts: &DnsOpts,
        search_token: Option<&str>,
        size_limit: Option<usize>,
    ) -> Result<Subjects> {
        let mut by_parent: BTreeMap<Dn, Vec<Dn>> = BTreeMap::new();
        for dn in dn2opts.keys() {
            if let Some(parent) = dn.parent() {
                by_parent.entry(parent).or_default().push(dn.clone());
            }
        }

        let mut subjects = Subjects::new();
        for (parent_dn, dns) in by_parent {
            let Some(sscfg) = self.config.subject_source(&parent_dn) else {
                continue;
            };
            let token_filter = search_token.map(|token| search_filter(sscfg, token)).transpose()?;
            let mut count = 0;
            for chunk in dns.chunks(RDNS_CHUNK_SIZE) {
                let rdns = chunk
                    .iter()
                    .filter_map(|dn| dn.rdn())
                    .map(|(attr, value)| Filter::eq(attr, value))
                    .collect();
                let rdns_filter = Filter::or(rdns);
                let filter = match &token_filter {
                    Some(token_filter) => Filter::and(vec![rdns_filter, token_filter.clone()]),
                    None => rdns_filter,
                };
                let found = self.search_in_source(sscfg, &filter, dn2opts, None).await?;
                count += found.len();
                subjects.extend(found);
                if size_limit.is_some_and(|limit| count >= limit) {
                    break;
                }
            }
        }

        if search_token.is_none() {
            for (dn, options) in dn2opts {
                subjects.entry(dn.clone()).or_insert_with(|| SubjectAttrs {
                    attrs: MonoAttrs::new(),
                    sscfg_dn: None,
                    sgroup_id: self.hierarchy.dn_to_sgroup_id(dn),
                    options: options.clone(),
                });
            }
        }
        Ok(subjects)
    }

    /// Subjects of the plain dn URLs among `urls`
    pub async fn get_subjects_from_urls(&self, urls: &[String]) -> Result<Subjects> {
        match urls_to_dns(urls) {
            Some(dn2opts) => self.get_subjects(&dn2opts, None, None).await,
            None => Ok(Subjects::new()),
        }
    }

    /// Restrict a groups-source search to the groups visible to `user`,
    /// optionally excluding `group_to_avoid` and the groups containing it
    async fn restrict_filter(
        &self,
        user: &LoggedUser,
        sscfg: &SubjectSourceConfig,
        filter: Filter,
        group_to_avoid: Option<&str>,
    ) -> Result<Filter> {
        if sscfg.dn != *self.hierarchy.groups_dn() {
            return Ok(filter);
        }
        let mut filters = vec![filter];
        if let LoggedUser::User(user_dn) = user {
            filters.push(self.checker.user_right_filter(user_dn, Right::Reader).await?);
        }
        if let Some(id) = group_to_avoid {
            filters.push(Filter::negate(Filter::eq("cn", id)));
            let attr = Mright::Member.direct_attr();
            let url = dn_to_url(&self.hierarchy.sgroup_id_to_dn(id), &DirectOptions::default());
            filters.push(Filter::negate(Filter::or(vec![
                Filter::eq(&attr, &url),
                Filter::starts_with(&attr, &format!("{url}?")),
            ])));
        }
        Ok(Filter::and(filters))
    }

    /// Search every subject source (or only `source_dn`) for `search_token`
    pub async fn search_subjects(
        &self,
        user: &LoggedUser,
        search_token: &str,
        size_limit: Option<usize>,
        source_dn: Option<&Dn>,
        group_to_avoid: Option<&str>,
    ) -> Result<BTreeMap<Dn, Subjects>> {
        let mut results = BTreeMap::new();
        for sscfg in &self.config.ldap.subject_sources {
            if source_dn.is_some_and(|dn| dn != &sscfg.dn) {
                continue;
            }
            let filter = Filter::or(terms_search_filters(sscfg, search_token)?);
            let filter = self.restrict_filter(user, sscfg, filter, group_to_avoid).await?;
            debug!("searching subjects in {} with {filter}", sscfg.dn);
            let subjects = self.search_in_source(sscfg, &filter, &DnsOpts::new(), size_limit).await?;
            results.insert(sscfg.dn.clone(), subjects);
        }
        Ok(results)
    }

    /// Look a subject up by an external id, over the sources having `id_attrs`
    pub async fn subject_id_to_dn(
        &self,
        user: &LoggedUser,
        subject_id: &str,
        source_dn: Option<&Dn>,
    ) -> Result<SubjectOut> {
        let mut found: Option<SubjectOut> = None;
        for sscfg in &self.config.ldap.subject_sources {
            if source_dn.is_some_and(|dn| dn != &sscfg.dn) {
                continue;
            }
            let Some(id_attrs) = &sscfg.id_attrs else {
                continue;
            };
            let filter = Filter::or(id_attrs.iter().map(|attr| Filter::eq(attr, subject_id)).collect());
            let filter = self.restrict_filter(user, sscfg, filter, None).await?;
            let subjects = self.search_in_source(sscfg, &filter, &DnsOpts::new(), Some(2)).await?;
            if subjects.is_empty() {
                continue;
            }
            if subjects.len() > 1 || found.is_some() {
                return Ok(SubjectOut::Error {
                    error: SubjectLookupError::MultipleMatch,
                });
            }
            if let Some((dn, subject)) = subjects.into_iter().next() {
                found = Some(SubjectOut::Found {
                    dn,
                    attrs: subject.attrs,
                    ssdn: sscfg.dn.clone(),
                });
            }
        }
        Ok(found.unwrap_or(SubjectOut::Error {
            error: SubjectLookupError::NoMatch,
        }))
    }

    pub async fn subject_ids_to_dns(
        &self,
        user: &LoggedUser,
        subject_ids: &[String],
        source_dn: Option<&Dn>,
    ) -> Result<Vec<IdSubjectOut>> {
        let mut out = Vec::with_capacity(subject_ids.len());
        for id in subject_ids {
            let subject = self.subject_id_to_dn(user, id, source_dn).await?;
            out.push(IdSubjectOut { id: id.clone(), subject });
        }
        Ok(out)
    }
}
