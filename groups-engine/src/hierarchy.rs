use chrono::{DateTime, Utc};

use crate::error::{GroupsError, Result};
use crate::models::{DirectOptions, Dn, DnsOpts};

const URL_PREFIX: &str = "ldap:///";
const ENDDATE_PARAM: &str = "enddate=";

/// Group/stem id layout: separator, root id and the directory branch holding them
#[derive(Debug, Clone)]
pub struct Hierarchy {
    separator: String,
    root_id: String,
    groups_dn: Dn,
}

impl Hierarchy {
    pub fn new(separator: impl Into<String>, root_id: impl Into<String>, groups_dn: Dn) -> Self {
        Self {
            separator: separator.into(),
            root_id: root_id.into(),
            groups_dn,
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn groups_dn(&self) -> &Dn {
        &self.groups_dn
    }

    pub fn is_root(&self, id: &str) -> bool {
        id == self.root_id
    }

    pub fn is_stem(&self, id: &str) -> bool {
        self.is_root(id) || id.ends_with(&self.separator)
    }

    /// Accepts the root id, or non-empty `[A-Za-z0-9_:-]` segments with an
    /// optional trailing separator
    pub fn validate_sgroup_id(&self, id: &str) -> Result<()> {
        if self.is_root(id) {
            return Ok(());
        }
        let body = id.strip_suffix(self.separator.as_str()).unwrap_or(id);
        let valid = !body.is_empty() && body.split(self.separator.as_str()).all(is_valid_segment);
        if valid {
            Ok(())
        } else {
            Err(GroupsError::Validation(format!("invalid sgroup id \"{id}\"")))
        }
    }

    pub fn parent(&self, id: &str) -> Option<String> {
        if self.is_root(id) {
            return None;
        }
        let body = id.strip_suffix(self.separator.as_str()).unwrap_or(id);
        match body.rsplit_once(self.separator.as_str()) {
            Some((head, _)) => Some(format!("{head}{}", self.separator)),
            None => Some(self.root_id.clone()),
        }
    }

    /// Ancestor stems, root first, `id` excluded
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            current = self.parent(&parent);
            chain.push(parent);
        }
        chain.reverse();
        chain
    }

    /// Whether `id` is strictly below `stem_id`
    pub fn is_descendant(&self, stem_id: &str, id: &str) -> bool {
        id != stem_id && self.is_stem(stem_id) && id.starts_with(stem_id)
    }

    /// Whether `child_id` is below `parent_id` but not a direct child
    pub fn is_grandchild(&self, parent_id: &str, child_id: &str) -> bool {
        let Some(rest) = child_id.strip_prefix(parent_id) else {
            return false;
        };
        let rest = rest.strip_suffix(self.separator.as_str()).unwrap_or(rest);
        rest.contains(self.separator.as_str())
    }

    pub fn sgroup_id_to_dn(&self, id: &str) -> Dn {
        if self.is_root(id) {
            self.groups_dn.clone()
        } else {
            Dn::new(format!("cn={id},{}", self.groups_dn))
        }
    }

    pub fn dn_to_sgroup_id(&self, dn: &Dn) -> Option<String> {
        if dn == &self.groups_dn {
            return Some(self.root_id.clone());
        }
        let rdn = dn.as_str().strip_suffix(self.groups_dn.as_str())?.strip_suffix(',')?;
        let id = rdn.strip_prefix("cn=")?;
        (!id.contains(',')).then(|| id.to_string())
    }

    pub fn dn_is_sgroup(&self, dn: &Dn) -> bool {
        self.dn_to_sgroup_id(dn).is_some()
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-'))
}

/// `ldap:///<dn>` with an optional `?enddate=<rfc3339>` suffix
pub fn dn_to_url(dn: &Dn, options: &DirectOptions) -> String {
    match options.enddate {
        Some(enddate) => format!("{URL_PREFIX}{dn}?{ENDDATE_PARAM}{}", enddate.to_rfc3339()),
        None => format!("{URL_PREFIX}{dn}"),
    }
}

/// Reverse of [`dn_to_url`]. Any other query part means the value is not a
/// plain dn (e.g. a directory-query URL)
pub fn url_to_dn(url: &str) -> Option<(Dn, DirectOptions)> {
    let rest = url.strip_prefix(URL_PREFIX)?;
    match rest.split_once('?') {
        None => Some((Dn::new(rest), DirectOptions::default())),
        Some((dn, query)) => {
            let enddate = query.strip_prefix(ENDDATE_PARAM)?;
            if enddate.contains('?') {
                return None;
            }
            let enddate = DateTime::parse_from_rfc3339(enddate).ok()?.with_timezone(&Utc);
            Some((Dn::new(dn), DirectOptions::until(enddate)))
        }
    }
}

/// All values must be plain dn URLs
pub fn urls_to_dns(urls: &[String]) -> Option<DnsOpts> {
    urls.iter().map(|url| url_to_dn(url)).collect()
}
