use std::sync::Arc;
use tracing::debug;

use crate::{
    error::{GroupsError, Result},
    filter::Filter,
    hierarchy::Hierarchy,
    models::*,
    repository::{DirectoryStore, Entry},
    schema::GroupsConfig,
};

/// Rights checker resolving a caller's effective right on a group/stem:
/// - Direct rights read from the node's flattened right attributes
/// - Rights inherited from every ancestor stem, folded root first
/// - The trusted administrator holds every right
pub struct RightsChecker {
    store: Arc<dyn DirectoryStore>,
    config: Arc<GroupsConfig>,
    hierarchy: Hierarchy,
}

impl RightsChecker {
    pub fn new(store: Arc<dyn DirectoryStore>, config: Arc<GroupsConfig>) -> Self {
        let hierarchy = config.hierarchy();
        Self { store, config, hierarchy }
    }

    /// Flattened attributes of the rights satisfying `right`, best first
    pub fn allowed_flattened_attrs(&self, right: Right) -> Vec<&str> {
        right
            .allowed_rights()
            .into_iter()
            .map(|r| self.config.flattened_attr(r.to_mright()))
            .collect()
    }

    /// Highest right whose flattened set on `entry` contains `user_dn`
    pub fn user_highest_right(&self, entry: &Entry, user_dn: &Dn) -> Option<Right> {
        Right::Reader.allowed_rights().into_iter().find(|right| {
            entry
                .values(self.config.flattened_attr(right.to_mright()))
                .iter()
                .any(|v| v == user_dn.as_str())
        })
    }

    fn direct_right(&self, user: &LoggedUser, entry: &Entry) -> Option<Right> {
        match user {
            LoggedUser::TrustedAdmin => Some(Right::Admin),
            LoggedUser::User(dn) => self.user_highest_right(entry, dn),
        }
    }

    /// Ancestor stems of `id`, root first, each with the right inherited down to it.
    /// Ancestors missing from the store are skipped
    pub async fn parents(&self, user: &LoggedUser, id: &str) -> Result<Vec<SgroupOutAndRight>> {
        let mut wanted = self.config.sgroup_attr_names();
        wanted.extend(self.allowed_flattened_attrs(Right::Reader));

        let mut parents = Vec::new();
        let mut best: Option<Right> = None;
        for parent_id in self.hierarchy.ancestors(id) {
            let dn = self.hierarchy.sgroup_id_to_dn(&parent_id);
            let Some(entry) = self.store.read_entry(&dn, &wanted).await? else {
                continue;
            };
            best = max_right(best, self.direct_right(user, &entry));
            let attrs = self.display_attrs(&entry);
            parents.push(SgroupOutAndRight {
                sgroup_id: parent_id,
                attrs,
                right: best,
            });
        }
        Ok(parents)
    }

    /// `max(self right, folded ancestor rights)` plus the ancestors for display
    pub async fn effective_right(
        &self,
        user: &LoggedUser,
        id: &str,
        self_entry: Option<&Entry>,
    ) -> Result<(Option<Right>, Vec<SgroupOutAndRight>)> {
        let self_right = self_entry.and_then(|entry| self.direct_right(user, entry));
        let parents = self.parents(user, id).await?;
        let inherited = parents.last().and_then(|p| p.right);
        let best = max_right(self_right, inherited);
        debug!("effective_right({id}) for {user} => {best:?}");
        Ok((best, parents))
    }

    pub async fn best_right_on_self_or_parents(&self, user: &LoggedUser, id: &str) -> Result<Option<Right>> {
        if user.is_trusted_admin() {
            return Ok(Some(Right::Admin));
        }
        let dn = self.hierarchy.sgroup_id_to_dn(id);
        let wanted = self.allowed_flattened_attrs(Right::Reader);
        let entry = self.store.read_entry(&dn, &wanted).await?;
        let (best, _) = self.effective_right(user, id, entry.as_ref()).await?;
        Ok(best)
    }

    pub async fn require_on_self_or_parents(&self, user: &LoggedUser, id: &str, right: Right) -> Result<()> {
        if user.is_trusted_admin() {
            return Ok(());
        }
        let best = self.best_right_on_self_or_parents(user, id).await?;
        if best >= Some(right) {
            Ok(())
        } else {
            Err(GroupsError::Forbidden(format!("no {right} right on \"{id}\"")))
        }
    }

    /// Used on creation: the node itself does not exist yet
    pub async fn require_on_parents(&self, user: &LoggedUser, id: &str, right: Right) -> Result<()> {
        match user {
            LoggedUser::TrustedAdmin => {
                if let Some(parent_id) = self.hierarchy.parent(id) {
                    let dn = self.hierarchy.sgroup_id_to_dn(&parent_id);
                    if self.store.read_entry(&dn, &[]).await?.is_none() {
                        return Err(GroupsError::NotFound(format!("stem \"{parent_id}\" does not exist")));
                    }
                }
                Ok(())
            }
            LoggedUser::User(_) => {
                let parents = self.parents(user, id).await?;
                let inherited = parents.last().and_then(|p| p.right);
                if inherited >= Some(right) {
                    Ok(())
                } else {
                    Err(GroupsError::Forbidden(format!("no {right} right on \"{id}\" parents")))
                }
            }
        }
    }

    /// Filter selecting the groups/stems on which `user_dn` holds `right`,
    /// directly or through an ancestor stem
    pub async fn user_right_filter(&self, user_dn: &Dn, right: Right) -> Result<Filter> {
        let direct: Vec<Filter> = self
            .allowed_flattened_attrs(right)
            .into_iter()
            .map(|attr| Filter::eq(attr, user_dn.as_str()))
            .collect();

        let with_right = self
            .store
            .search(self.hierarchy.groups_dn(), &Filter::or(direct.clone()), &[], None)
            .await?;
        let inherited = with_right
            .iter()
            .filter_map(|entry| self.hierarchy.dn_to_sgroup_id(&entry.dn))
            .filter(|id| self.hierarchy.is_stem(id))
            .map(|stem_id| Filter::starts_with("cn", &stem_id));

        Ok(Filter::or(direct.into_iter().chain(inherited).collect()))
    }

    /// Configured descriptive attributes of an entry
    pub fn display_attrs(&self, entry: &Entry) -> MonoAttrs {
        entry
            .mono_attrs()
            .into_iter()
            .filter(|(attr, _)| self.config.ldap.sgroup_attrs.contains_key(attr))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryDirectory;

    fn entry(dn: &str, pairs: &[(&str, &[&str])]) -> MultiAttrs {
        let mut attrs: MultiAttrs = pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect();
        if let Some(cn) = dn.strip_prefix("cn=").and_then(|s| s.split(',').next()) {
            attrs.insert("cn".into(), vec![cn.to_string()]);
        }
        attrs
    }

    async fn setup() -> RightsChecker {
        let store = Arc::new(InMemoryDirectory::new());
        let alice = "uid=alice,ou=people,dc=nodomain";
        let bob = "uid=bob,ou=people,dc=nodomain";
        for (dn, attrs) in [
            ("ou=groups,dc=nodomain", entry("", &[("supannGroupeLecteurDN", &[alice])])),
            ("cn=a.,ou=groups,dc=nodomain", entry("cn=a.,", &[("supannGroupeAdminDN", &[bob])])),
            ("cn=a.b.,ou=groups,dc=nodomain", entry("cn=a.b.,", &[("supannGroupeUpdaterDN", &[alice])])),
            ("cn=a.b.c,ou=groups,dc=nodomain", entry("cn=a.b.c,", &[])),
        ] {
            store.create(&Dn::new(dn), attrs).await.unwrap();
        }
        RightsChecker::new(store, Arc::new(GroupsConfig::default()))
    }

    #[tokio::test]
    async fn test_inherited_rights_are_folded_root_first() {
        let checker = setup().await;
        let alice = LoggedUser::user("uid=alice,ou=people,dc=nodomain");

        let parents = checker.parents(&alice, "a.b.c").await.unwrap();
        let rights: Vec<_> = parents.iter().map(|p| (p.sgroup_id.as_str(), p.right)).collect();
        assert_eq!(
            rights,
            vec![("", Some(Right::Reader)), ("a.", Some(Right::Reader)), ("a.b.", Some(Right::Updater))]
        );

        let best = checker.best_right_on_self_or_parents(&alice, "a.b.c").await.unwrap();
        assert_eq!(best, Some(Right::Updater));
    }

    #[tokio::test]
    async fn test_guards() {
        let checker = setup().await;
        let bob = LoggedUser::user("uid=bob,ou=people,dc=nodomain");
        let carol = LoggedUser::user("uid=carol,ou=people,dc=nodomain");

        checker.require_on_self_or_parents(&bob, "a.b.c", Right::Admin).await.unwrap();
        checker.require_on_parents(&bob, "a.new", Right::Admin).await.unwrap();
        assert!(matches!(
            checker.require_on_parents(&bob, "x.new", Right::Admin).await,
            Err(GroupsError::Forbidden(_))
        ));
        assert!(matches!(
            checker.require_on_self_or_parents(&carol, "a.b.c", Right::Reader).await,
            Err(GroupsError::Forbidden(_))
        ));

        // the trusted admin still needs an existing parent stem
        checker
            .require_on_parents(&LoggedUser::TrustedAdmin, "a.b.d", Right::Admin)
            .await
            .unwrap();
        assert!(matches!(
            checker.require_on_parents(&LoggedUser::TrustedAdmin, "z.y", Right::Admin).await,
            Err(GroupsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_user_right_filter_covers_stem_descendants() {
        let checker = setup().await;
        let filter = checker
            .user_right_filter(&Dn::new("uid=bob,ou=people,dc=nodomain"), Right::Admin)
            .await
            .unwrap();
        let group = entry("cn=a.b.c,", &[]);
        assert!(filter.matches(&group));
        assert!(!filter.matches(&entry("cn=other,", &[])));
    }
}
