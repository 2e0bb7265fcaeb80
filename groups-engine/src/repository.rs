use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::{error::GroupsError, filter::Filter, models::*};

/// A directory entry: identity plus (possibly projected) attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub dn: Dn,
    pub attrs: MultiAttrs,
}

impl Entry {
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    pub fn first_value(&self, attr: &str) -> Option<&str> {
        self.values(attr).first().map(String::as_str)
    }

    /// First value of each attribute
    pub fn mono_attrs(&self) -> MonoAttrs {
        self.attrs
            .iter()
            .filter_map(|(name, values)| values.first().map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

/// One change of a modify request, with per-value semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Fails with `Conflict` if a value is already present
    Add(String, Vec<String>),
    /// Fails with `Conflict` if a value (or, with no values, the attribute) is missing
    Delete(String, Vec<String>),
    /// An empty value list removes the attribute
    Replace(String, Vec<String>),
}

/// Directory service holding groups, stems and subjects
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Subtree search below `base`. An empty `attrs` slice returns every attribute
    async fn search(
        &self,
        base: &Dn,
        filter: &Filter,
        attrs: &[&str],
        size_limit: Option<usize>,
    ) -> Result<Vec<Entry>, GroupsError>;

    /// Read a single entry, `None` if it does not exist
    async fn read_entry(&self, dn: &Dn, attrs: &[&str]) -> Result<Option<Entry>, GroupsError>;

    /// Apply all modifications or none of them
    async fn modify(&self, dn: &Dn, mods: Vec<Modification>) -> Result<(), GroupsError>;

    async fn create(&self, dn: &Dn, attrs: MultiAttrs) -> Result<(), GroupsError>;

    async fn delete(&self, dn: &Dn) -> Result<(), GroupsError>;
}

/// In-memory directory for testing and development
pub struct InMemoryDirectory {
    entries: Arc<DashMap<Dn, MultiAttrs>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_below(dn: &Dn, base: &Dn) -> bool {
        if base.as_str().is_empty() || dn == base {
            return true;
        }
        dn.as_str()
            .strip_suffix(base.as_str())
            .is_some_and(|head| head.ends_with(','))
    }

    fn project(attrs: &MultiAttrs, wanted: &[&str]) -> MultiAttrs {
        if wanted.is_empty() {
            return attrs.clone();
        }
        attrs
            .iter()
            .filter(|(name, _)| wanted.iter().any(|w| w.eq_ignore_ascii_case(name)))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect()
    }

    fn attr_key(attrs: &MultiAttrs, attr: &str) -> String {
        attrs
            .keys()
            .find(|name| name.eq_ignore_ascii_case(attr))
            .cloned()
            .unwrap_or_else(|| attr.to_string())
    }

    fn apply(dn: &Dn, attrs: &mut MultiAttrs, modification: Modification) -> Result<(), GroupsError> {
        match modification {
            Modification::Add(attr, values) => {
                let key = Self::attr_key(attrs, &attr);
                let current = attrs.entry(key).or_default();
                for value in values {
                    if current.contains(&value) {
                        return Err(GroupsError::Conflict(format!(
                            "{dn}: value {value:?} already present in {attr}"
                        )));
                    }
                    current.push(value);
                }
            }
            Modification::Delete(attr, values) => {
                let key = Self::attr_key(attrs, &attr);
                let Some(current) = attrs.get_mut(&key) else {
                    return Err(GroupsError::Conflict(format!("{dn}: no attribute {attr}")));
                };
                for value in &values {
                    let Some(idx) = current.iter().position(|v| v == value) else {
                        return Err(GroupsError::Conflict(format!(
                            "{dn}: value {value:?} not present in {attr}"
                        )));
                    };
                    current.remove(idx);
                }
                if values.is_empty() || current.is_empty() {
                    attrs.remove(&key);
                }
            }
            Modification::Replace(attr, values) => {
                let key = Self::attr_key(attrs, &attr);
                if values.is_empty() {
                    attrs.remove(&key);
                } else {
                    attrs.insert(key, values);
                }
            }
        }
        Ok(())
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn search(
        &self,
        base: &Dn,
        filter: &Filter,
        attrs: &[&str],
        size_limit: Option<usize>,
    ) -> Result<Vec<Entry>, GroupsError> {
        let mut found: Vec<Entry> = self
            .entries
            .iter()
            .filter(|entry| Self::is_below(entry.key(), base) && filter.matches(entry.value()))
            .map(|entry| Entry {
                dn: entry.key().clone(),
                attrs: Self::project(entry.value(), attrs),
            })
            .collect();

        found.sort_by(|a, b| a.dn.cmp(&b.dn));
        if let Some(limit) = size_limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn read_entry(&self, dn: &Dn, attrs: &[&str]) -> Result<Option<Entry>, GroupsError> {
        Ok(self.entries.get(dn).map(|entry| Entry {
            dn: dn.clone(),
            attrs: Self::project(entry.value(), attrs),
        }))
    }

    async fn modify(&self, dn: &Dn, mods: Vec<Modification>) -> Result<(), GroupsError> {
        let mut entry = self
            .entries
            .get_mut(dn)
            .ok_or_else(|| GroupsError::NotFound(format!("no entry {dn}")))?;

        let mut updated = entry.value().clone();
        for modification in mods {
            Self::apply(dn, &mut updated, modification)?;
        }
        *entry.value_mut() = updated;
        Ok(())
    }

    async fn create(&self, dn: &Dn, attrs: MultiAttrs) -> Result<(), GroupsError> {
        match self.entries.entry(dn.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(GroupsError::Conflict(format!("entry {dn} already exists")))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(attrs);
                Ok(())
            }
        }
    }

    async fn delete(&self, dn: &Dn) -> Result<(), GroupsError> {
        self.entries
            .remove(dn)
            .map(|_| ())
            .ok_or_else(|| GroupsError::NotFound(format!("no entry {dn}")))
    }
}
