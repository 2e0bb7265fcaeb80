//! Integration tests for the groups engine on the in-memory directory
//!
//! Fixture tree:
//! - "" (root stem)
//! - "a." stem administered by alice
//! - groups below "a." created per test

use chrono::{Duration, Utc};
use groups_engine::mods::MEMBER_TTL_MAX_ATTR;
use groups_engine::repository::{DirectoryStore, InMemoryDirectory, Modification};
use groups_engine::*;
use std::sync::Arc;
use tempfile::TempDir;

const PEOPLE: [(&str, &str); 5] = [
    ("alice", "Alice Martin"),
    ("bob", "Bob Martin"),
    ("carol", "Carol Durand"),
    ("dave", "Dave Petit"),
    ("erin", "Erin Leroy"),
];

fn person_dn(uid: &str) -> Dn {
    Dn::new(format!("uid={uid},ou=people,dc=nodomain"))
}

fn group_dn(id: &str) -> Dn {
    Dn::new(format!("cn={id},ou=groups,dc=nodomain"))
}

fn user(uid: &str) -> LoggedUser {
    LoggedUser::User(person_dn(uid))
}

fn attrs(pairs: &[(&str, &str)]) -> MonoAttrs {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

async fn people_store() -> Arc<InMemoryDirectory> {
    let store = Arc::new(InMemoryDirectory::new());
    for (uid, name) in PEOPLE {
        let entry = MultiAttrs::from([
            ("uid".to_string(), vec![uid.to_string()]),
            ("displayName".to_string(), vec![name.to_string()]),
            ("sn".to_string(), vec![name.rsplit(' ').next().unwrap_or_default().to_string()]),
            ("mail".to_string(), vec![format!("{uid}@example.org")]),
        ]);
        store.create(&person_dn(uid), entry).await.unwrap();
    }
    store
}

async fn engine_with(config: GroupsConfig) -> GroupsEngine {
    engine_on(people_store().await, config).await
}

async fn engine_on(store: Arc<InMemoryDirectory>, config: GroupsConfig) -> GroupsEngine {
    let engine = GroupsEngine::new(store, config).unwrap();

    let admin = LoggedUser::TrustedAdmin;
    engine.create(&admin, "", attrs(&[("ou", "Racine")])).await.unwrap();
    engine.create(&admin, "a.", attrs(&[("ou", "Applications")])).await.unwrap();
    engine
        .modify_member_or_right(&admin, "a.", Mright::Admin, MyMod::Add, person_dn("alice"), DirectOptions::default(), None)
        .await
        .unwrap();
    engine
}

async fn create_test_engine() -> GroupsEngine {
    engine_with(GroupsConfig::default()).await
}

async fn add(engine: &GroupsEngine, id: &str, mright: Mright, dn: Dn) -> Result<()> {
    engine
        .modify_member_or_right(&LoggedUser::TrustedAdmin, id, mright, MyMod::Add, dn, DirectOptions::default(), None)
        .await
}

async fn flattened(engine: &GroupsEngine, id: &str, mright: Mright) -> Vec<Dn> {
    engine
        .get_sgroup_flattened_mright(&LoggedUser::TrustedAdmin, id, mright, None, None)
        .await
        .unwrap()
        .subjects
        .into_keys()
        .collect()
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_create_group_as_stem_admin() {
    let engine = create_test_engine().await;

    engine
        .create(&user("alice"), "a.g1", attrs(&[("ou", "Group one"), ("description", "first")]))
        .await
        .unwrap();

    let sgroup = engine.get_sgroup(&user("alice"), "a.g1").await.unwrap();
    assert_eq!(sgroup.attrs, attrs(&[("ou", "Group one"), ("description", "first")]));
    assert_eq!(sgroup.right, Right::Admin);
    assert_eq!(
        sgroup.parents.iter().map(|p| p.sgroup_id.as_str()).collect::<Vec<_>>(),
        vec!["", "a."]
    );
    assert_eq!(sgroup.parents[1].right, Some(Right::Admin));
    assert!(matches!(sgroup.more, SgroupOutMore::Group { ref direct_members } if direct_members.is_empty()));

    // a fresh group has no flattened members
    assert!(flattened(&engine, "a.g1", Mright::Member).await.is_empty());
}

#[tokio::test]
async fn test_create_errors() {
    let engine = create_test_engine().await;
    let admin = LoggedUser::TrustedAdmin;

    let err = engine.create(&admin, "a.bad id", MonoAttrs::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = engine.create(&admin, "missing.g", MonoAttrs::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = engine.create(&user("bob"), "a.g", MonoAttrs::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = engine.create(&admin, "a.g", attrs(&[("telephoneNumber", "01")])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    engine.create(&admin, "a.g", MonoAttrs::new()).await.unwrap();
    let err = engine.create(&admin, "a.g", MonoAttrs::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_modify_sgroup_attrs() {
    let engine = create_test_engine().await;
    let alice = user("alice");
    engine.create(&alice, "a.g1", attrs(&[("ou", "One")])).await.unwrap();

    engine
        .modify_sgroup_attrs(&alice, "a.g1", attrs(&[("ou", "One"), ("description", "desc")]))
        .await
        .unwrap();
    let sgroup = engine.get_sgroup(&alice, "a.g1").await.unwrap();
    assert_eq!(sgroup.attrs, attrs(&[("ou", "One"), ("description", "desc")]));

    // an empty value removes the attribute
    engine
        .modify_sgroup_attrs(&alice, "a.g1", attrs(&[("description", "")]))
        .await
        .unwrap();
    let sgroup = engine.get_sgroup(&alice, "a.g1").await.unwrap();
    assert_eq!(sgroup.attrs, attrs(&[("ou", "One")]));

    let err = engine
        .modify_sgroup_attrs(&user("bob"), "a.g1", attrs(&[("ou", "Mine")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_stem_children_exclude_grandchildren() {
    let engine = create_test_engine().await;
    let alice = user("alice");
    engine.create(&alice, "a.g1", MonoAttrs::new()).await.unwrap();
    engine.create(&alice, "a.b.", attrs(&[("ou", "B")])).await.unwrap();
    engine.create(&alice, "a.b.c", MonoAttrs::new()).await.unwrap();

    let stem = engine.get_sgroup(&alice, "a.").await.unwrap();
    let SgroupOutMore::Stem { children } = stem.more else {
        panic!("a. is a stem");
    };
    assert_eq!(children.keys().cloned().collect::<Vec<_>>(), vec!["a.b.", "a.g1"]);
    assert_eq!(children["a.b."], attrs(&[("ou", "B")]));
}

#[tokio::test]
async fn test_delete_stem_with_children_conflicts() {
    let engine = create_test_engine().await;
    let alice = user("alice");
    engine.create(&alice, "a.b.", MonoAttrs::new()).await.unwrap();
    engine.create(&alice, "a.b.c", MonoAttrs::new()).await.unwrap();

    let err = engine.delete(&alice, "a.b.").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    engine.delete(&alice, "a.b.c").await.unwrap();
    engine.delete(&alice, "a.b.").await.unwrap();
    assert!(!engine.sgroup_exists(&alice, "a.b.").await.unwrap());

    let err = engine.delete(&alice, "a.b.").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// Rights
// =============================================================================

#[tokio::test]
async fn test_rights_inherited_from_stem() {
    let engine = create_test_engine().await;
    engine.create(&user("alice"), "a.g1", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.", Mright::Reader, person_dn("carol")).await.unwrap();

    let sgroup = engine.get_sgroup(&user("carol"), "a.g1").await.unwrap();
    assert_eq!(sgroup.right, Right::Reader);

    let err = engine.get_sgroup(&user("bob"), "a.g1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = engine.sgroup_exists(&user("bob"), "a.g1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // readers can not change members
    let err = engine
        .modify_member_or_right(
            &user("carol"),
            "a.g1",
            Mright::Member,
            MyMod::Add,
            person_dn("bob"),
            DirectOptions::default(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_updater_manages_readers_only() {
    let engine = create_test_engine().await;
    engine.create(&user("alice"), "a.g1", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.g1", Mright::Updater, person_dn("dave")).await.unwrap();
    let dave = user("dave");

    engine
        .modify_member_or_right(&dave, "a.g1", Mright::Reader, MyMod::Add, person_dn("erin"), DirectOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(flattened(&engine, "a.g1", Mright::Reader).await, vec![person_dn("erin")]);

    let err = engine
        .modify_member_or_right(&dave, "a.g1", Mright::Member, MyMod::Add, person_dn("erin"), DirectOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let rights = engine.get_sgroup_direct_rights(&dave, "a.g1").await.unwrap();
    assert_eq!(rights.keys().copied().collect::<Vec<_>>(), vec![Right::Reader, Right::Updater]);
    assert!(rights[&Right::Updater].contains_key(&person_dn("dave")));
}

// =============================================================================
// Members and flattening
// =============================================================================

#[tokio::test]
async fn test_nested_group_members_are_flattened() {
    let engine = create_test_engine().await;
    let alice = user("alice");
    engine.create(&alice, "a.g1", MonoAttrs::new()).await.unwrap();
    engine.create(&alice, "a.g2", MonoAttrs::new()).await.unwrap();

    add(&engine, "a.g1", Mright::Member, person_dn("alice")).await.unwrap();
    add(&engine, "a.g2", Mright::Member, group_dn("a.g1")).await.unwrap();
    add(&engine, "a.g2", Mright::Member, person_dn("carol")).await.unwrap();
    assert_eq!(
        flattened(&engine, "a.g2", Mright::Member).await,
        vec![person_dn("alice"), person_dn("carol")]
    );

    // a change in g1 cascades to g2
    add(&engine, "a.g1", Mright::Member, person_dn("bob")).await.unwrap();
    assert_eq!(
        flattened(&engine, "a.g2", Mright::Member).await,
        vec![person_dn("alice"), person_dn("bob"), person_dn("carol")]
    );

    // rights given to a group apply to its members
    engine.create(&alice, "a.g3", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.g3", Mright::Reader, group_dn("a.g2")).await.unwrap();
    let sgroup = engine.get_sgroup(&user("bob"), "a.g3").await.unwrap();
    assert_eq!(sgroup.right, Right::Reader);

    // direct members are shown with the nested group as a subject
    let sgroup = engine.get_sgroup(&alice, "a.g2").await.unwrap();
    let SgroupOutMore::Group { direct_members } = sgroup.more else {
        panic!("a.g2 is a plain group");
    };
    assert_eq!(direct_members.len(), 2);
    assert_eq!(direct_members[&group_dn("a.g1")].sgroup_id.as_deref(), Some("a.g1"));
    assert_eq!(direct_members[&person_dn("carol")].attrs["displayName"], "Carol Durand");
}

#[tokio::test]
async fn test_flattened_members_with_search_token() {
    let engine = create_test_engine().await;
    engine.create(&user("alice"), "a.g1", MonoAttrs::new()).await.unwrap();
    for uid in ["alice", "bob", "carol"] {
        add(&engine, "a.g1", Mright::Member, person_dn(uid)).await.unwrap();
    }

    let found = engine
        .get_sgroup_flattened_mright(&user("alice"), "a.g1", Mright::Member, Some("martin"), None)
        .await
        .unwrap();
    assert_eq!(found.count, 3);
    assert_eq!(
        found.subjects.into_keys().collect::<Vec<_>>(),
        vec![person_dn("alice"), person_dn("bob")]
    );
}

#[tokio::test]
async fn test_repeated_modifications_are_noops() {
    let engine = create_test_engine().await;
    engine.create(&user("alice"), "a.g1", MonoAttrs::new()).await.unwrap();

    add(&engine, "a.g1", Mright::Member, person_dn("bob")).await.unwrap();
    add(&engine, "a.g1", Mright::Member, person_dn("bob")).await.unwrap();
    engine
        .modify_member_or_right(
            &LoggedUser::TrustedAdmin,
            "a.g1",
            Mright::Member,
            MyMod::Delete,
            person_dn("carol"),
            DirectOptions::default(),
            None,
        )
        .await
        .unwrap();
    engine
        .modify_members_or_rights(&LoggedUser::TrustedAdmin, "a.g1", MyMods::new(), None)
        .await
        .unwrap();

    assert_eq!(flattened(&engine, "a.g1", Mright::Member).await, vec![person_dn("bob")]);
}

/// Number of entries in the action and sync logs
async fn log_counts(engine: &GroupsEngine, id: &str) -> (usize, usize) {
    let admin = LoggedUser::TrustedAdmin;
    let actions = engine.get_sgroup_logs(&admin, id, 1_000_000, LogStream::Actions).await.unwrap();
    let sync = engine.get_sgroup_logs(&admin, id, 1_000_000, LogStream::Sync).await.unwrap();
    (actions.logs.len(), sync.logs.len())
}

#[tokio::test]
async fn test_noop_replace_writes_no_log() {
    let dir = TempDir::new().unwrap();
    let mut config = GroupsConfig::default();
    config.log_dir = Some(dir.path().to_path_buf());
    let engine = engine_with(config).await;
    let alice = user("alice");
    engine.create(&alice, "a.g1", MonoAttrs::new()).await.unwrap();

    let everyone: DnsOpts = PEOPLE
        .iter()
        .map(|(uid, _)| (person_dn(uid), DirectOptions::default()))
        .collect();
    for dn in everyone.keys() {
        add(&engine, "a.g1", Mright::Member, dn.clone()).await.unwrap();
    }
    let before = log_counts(&engine, "a.g1").await;
    assert_eq!(before, (6, 5));

    let mods = MyMods::from([(Mright::Member, RelationMods::replacing(Replacement::Subjects(everyone)))]);
    engine
        .modify_members_or_rights(&alice, "a.g1", mods, Some("same members"))
        .await
        .unwrap();
    add(&engine, "a.g1", Mright::Member, person_dn("bob")).await.unwrap();

    assert_eq!(log_counts(&engine, "a.g1").await, before);
}

#[tokio::test]
async fn test_recompute_is_idempotent() {
    let store = people_store().await;
    let engine = engine_on(store.clone(), GroupsConfig::default()).await;
    let alice = user("alice");
    engine.create(&alice, "a.g1", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.g1", Mright::Member, person_dn("bob")).await.unwrap();

    // stale flattened value written behind the engine's back
    store
        .modify(
            &group_dn("a.g1"),
            vec![Modification::Replace("member".to_string(), vec![person_dn("carol").to_string()])],
        )
        .await
        .unwrap();
    assert_eq!(flattened(&engine, "a.g1", Mright::Member).await, vec![person_dn("carol")]);

    let first = engine.sync(&alice, "a.g1", Some(vec![Mright::Member])).await.unwrap();
    assert_eq!(first[&Mright::Member], UpResult::Modified);
    let second = engine.sync(&alice, "a.g1", Some(vec![Mright::Member])).await.unwrap();
    assert_eq!(second[&Mright::Member], UpResult::Unchanged);
    assert_eq!(flattened(&engine, "a.g1", Mright::Member).await, vec![person_dn("bob")]);
}

#[tokio::test]
async fn test_large_replace_keeps_flattened_consistent() {
    let engine = create_test_engine().await;
    engine.create(&user("alice"), "a.g1", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.g1", Mright::Member, person_dn("alice")).await.unwrap();

    let wanted: DnsOpts = ["bob", "carol", "dave", "erin", "alice"]
        .into_iter()
        .map(|uid| (person_dn(uid), DirectOptions::default()))
        .collect();
    let mods = MyMods::from([(Mright::Member, RelationMods::replacing(Replacement::Subjects(wanted.clone())))]);
    engine
        .modify_members_or_rights(&user("alice"), "a.g1", mods, Some("replace all"))
        .await
        .unwrap();
    assert_eq!(
        flattened(&engine, "a.g1", Mright::Member).await,
        wanted.keys().cloned().collect::<Vec<_>>()
    );

    let small: DnsOpts = [(person_dn("erin"), DirectOptions::default())].into();
    let mods = MyMods::from([(Mright::Member, RelationMods::replacing(Replacement::Subjects(small)))]);
    engine
        .modify_members_or_rights(&user("alice"), "a.g1", mods, None)
        .await
        .unwrap();
    assert_eq!(flattened(&engine, "a.g1", Mright::Member).await, vec![person_dn("erin")]);
}

#[tokio::test]
async fn test_members_not_allowed_on_stems() {
    let engine = create_test_engine().await;
    let err = add(&engine, "a.", Mright::Member, person_dn("bob")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = engine
        .sync(&LoggedUser::TrustedAdmin, "a.", Some(vec![Mright::Member]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_member_ttl_policy() {
    let mut config = GroupsConfig::default();
    config.ldap.sgroup_attrs.insert(
        MEMBER_TTL_MAX_ATTR.to_string(),
        AttrTexts {
            label: "Member TTL max".to_string(),
            description: String::new(),
        },
    );
    let engine = engine_with(config).await;
    let alice = user("alice");
    engine
        .create(&alice, "a.ttl", attrs(&[(MEMBER_TTL_MAX_ATTR, "30")]))
        .await
        .unwrap();

    let err = engine
        .modify_member_or_right(&alice, "a.ttl", Mright::Member, MyMod::Add, person_dn("bob"), DirectOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let too_late = DirectOptions::until(Utc::now() + Duration::days(60));
    let err = engine
        .modify_member_or_right(&alice, "a.ttl", Mright::Member, MyMod::Add, person_dn("bob"), too_late, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let enddate = Utc::now() + Duration::days(10);
    engine
        .modify_member_or_right(
            &alice,
            "a.ttl",
            Mright::Member,
            MyMod::Add,
            person_dn("bob"),
            DirectOptions::until(enddate),
            None,
        )
        .await
        .unwrap();

    let sgroup = engine.get_sgroup(&alice, "a.ttl").await.unwrap();
    let SgroupOutMore::Group { direct_members } = sgroup.more else {
        panic!("a.ttl is a plain group");
    };
    let stored = direct_members[&person_dn("bob")].options.enddate.unwrap();
    assert_eq!(stored.timestamp(), enddate.timestamp());
    // options do not leak into flattened values
    assert_eq!(flattened(&engine, "a.ttl", Mright::Member).await, vec![person_dn("bob")]);
}

#[tokio::test]
async fn test_deleting_a_group_updates_dependents() {
    let engine = create_test_engine().await;
    let alice = user("alice");
    engine.create(&alice, "a.g1", MonoAttrs::new()).await.unwrap();
    engine.create(&alice, "a.g2", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.g1", Mright::Member, person_dn("bob")).await.unwrap();
    add(&engine, "a.g2", Mright::Member, group_dn("a.g1")).await.unwrap();
    assert_eq!(flattened(&engine, "a.g2", Mright::Member).await, vec![person_dn("bob")]);

    engine.delete(&alice, "a.g1").await.unwrap();
    assert!(flattened(&engine, "a.g2", Mright::Member).await.is_empty());
}

#[tokio::test]
async fn test_sync_reports_unchanged_relations() {
    let engine = create_test_engine().await;
    engine.create(&user("alice"), "a.g1", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.g1", Mright::Member, person_dn("bob")).await.unwrap();

    let results = engine.sync(&user("alice"), "a.g1", None).await.unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.values().all(|r| *r == UpResult::Unchanged));

    let results = engine.sync(&user("alice"), "a.", None).await.unwrap();
    assert_eq!(results.keys().copied().collect::<Vec<_>>(), Mright::RIGHTS.to_vec());
}

#[tokio::test]
async fn test_propagation_step_cap() {
    let mut config = GroupsConfig::default();
    config.max_propagation_steps = 2;
    let engine = engine_with(config).await;
    let alice = user("alice");
    for id in ["a.g1", "a.g2", "a.g3"] {
        engine.create(&alice, id, MonoAttrs::new()).await.unwrap();
    }
    add(&engine, "a.g2", Mright::Member, group_dn("a.g1")).await.unwrap();
    add(&engine, "a.g3", Mright::Member, group_dn("a.g2")).await.unwrap();

    // g1, g2, then g3 would be a third step
    let err = add(&engine, "a.g1", Mright::Member, person_dn("bob")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_mutual_membership_converges() {
    let engine = create_test_engine().await;
    let alice = user("alice");
    engine.create(&alice, "a.g1", MonoAttrs::new()).await.unwrap();
    engine.create(&alice, "a.g2", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.g1", Mright::Member, group_dn("a.g2")).await.unwrap();
    add(&engine, "a.g2", Mright::Member, group_dn("a.g1")).await.unwrap();

    add(&engine, "a.g1", Mright::Member, person_dn("bob")).await.unwrap();
    assert_eq!(flattened(&engine, "a.g1", Mright::Member).await, vec![person_dn("bob")]);
    assert_eq!(flattened(&engine, "a.g2", Mright::Member).await, vec![person_dn("bob")]);
}

// =============================================================================
// Searches
// =============================================================================

#[tokio::test]
async fn test_search_sgroups_limited_to_readable() {
    let engine = create_test_engine().await;
    let admin = LoggedUser::TrustedAdmin;
    engine.create(&admin, "a.g1", attrs(&[("ou", "Team one")])).await.unwrap();
    engine.create(&admin, "a.g2", attrs(&[("ou", "Team two")])).await.unwrap();
    engine.create(&admin, "z.", MonoAttrs::new()).await.unwrap();
    engine.create(&admin, "z.team", attrs(&[("ou", "Team zed")])).await.unwrap();

    let found = engine.search_sgroups(&user("alice"), Right::Reader, "team", None).await.unwrap();
    assert_eq!(found.keys().cloned().collect::<Vec<_>>(), vec!["a.g1", "a.g2"]);

    let found = engine.search_sgroups(&admin, Right::Reader, "team", None).await.unwrap();
    assert_eq!(found.len(), 3);

    // every word must match
    let found = engine.search_sgroups(&admin, Right::Reader, "team two", None).await.unwrap();
    assert_eq!(found.keys().cloned().collect::<Vec<_>>(), vec!["a.g2"]);

    assert!(engine
        .search_sgroups(&user("bob"), Right::Reader, "team", None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_mygroups_and_raw_search() {
    let engine = create_test_engine().await;
    let admin = LoggedUser::TrustedAdmin;
    engine.create(&admin, "a.g1", MonoAttrs::new()).await.unwrap();
    engine.create(&admin, "a.g2", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.g1", Mright::Updater, person_dn("bob")).await.unwrap();
    add(&engine, "a.g2", Mright::Member, person_dn("bob")).await.unwrap();

    let mine = engine.mygroups(&user("bob")).await.unwrap();
    assert_eq!(mine.keys().cloned().collect::<Vec<_>>(), vec!["a.g1"]);
    // stem rights do not make groups "mine"
    assert!(engine.mygroups(&user("alice")).await.unwrap().is_empty());
    assert_eq!(engine.mygroups(&admin).await.unwrap_err().kind(), ErrorKind::Validation);

    let ids = engine
        .search_raw_sgroups_using_a_subject(&admin, &person_dn("bob"), Mright::Member)
        .await
        .unwrap();
    assert_eq!(ids, vec!["a.g2"]);
    let ids = engine
        .search_raw_sgroups_using_a_subject(&user("alice"), &person_dn("bob"), Mright::Updater)
        .await
        .unwrap();
    assert_eq!(ids, vec!["a.g1"]);
}

#[tokio::test]
async fn test_search_subjects_avoiding_a_group() {
    let engine = create_test_engine().await;
    let admin = LoggedUser::TrustedAdmin;
    engine.create(&admin, "a.team1", MonoAttrs::new()).await.unwrap();
    engine.create(&admin, "a.team2", MonoAttrs::new()).await.unwrap();
    engine.create(&admin, "a.team3", MonoAttrs::new()).await.unwrap();
    add(&engine, "a.team2", Mright::Member, group_dn("a.team1")).await.unwrap();

    let groups_dn = Dn::new("ou=groups,dc=nodomain");
    let found = engine
        .search_subjects(&user("alice"), "a.team", None, Some(&groups_dn), Some("a.team1"))
        .await
        .unwrap();
    assert_eq!(
        found[&groups_dn].keys().cloned().collect::<Vec<_>>(),
        vec![group_dn("a.team3")]
    );

    let out = engine.subject_id_to_dn(&admin, "carol", None).await.unwrap();
    assert!(matches!(out, SubjectOut::Found { ref dn, .. } if *dn == person_dn("carol")));
    let out = engine
        .subject_ids_to_dns(&admin, &["dave@example.org".to_string(), "nobody".to_string()], None)
        .await
        .unwrap();
    assert!(matches!(out[0].subject, SubjectOut::Found { .. }));
    assert_eq!(out[1].subject, SubjectOut::Error { error: SubjectLookupError::NoMatch });
}

// =============================================================================
// Logs
// =============================================================================

#[tokio::test]
async fn test_action_and_sync_logs() {
    let dir = TempDir::new().unwrap();
    let mut config = GroupsConfig::default();
    config.log_dir = Some(dir.path().to_path_buf());
    let engine = engine_with(config).await;
    let alice = user("alice");

    engine.create(&alice, "a.g1", attrs(&[("ou", "One")])).await.unwrap();
    engine
        .modify_member_or_right(&alice, "a.g1", Mright::Member, MyMod::Add, person_dn("bob"), DirectOptions::default(), Some("welcome"))
        .await
        .unwrap();

    let logs = engine
        .get_sgroup_logs(&alice, "a.g1", 1_000_000, LogStream::Actions)
        .await
        .unwrap();
    assert!(logs.whole_file);
    assert_eq!(logs.logs.len(), 2);
    assert_eq!(logs.logs[0]["action"], "create");
    assert_eq!(logs.logs[0]["who"], person_dn("alice").as_str());
    assert_eq!(logs.logs[1]["action"], "modify_members_or_rights");
    assert_eq!(logs.logs[1]["msg"], "welcome");

    let sync = engine.get_sgroup_logs(&alice, "a.g1", 1_000_000, LogStream::Sync).await.unwrap();
    assert_eq!(sync.logs.len(), 1);
    assert_eq!(sync.logs[0]["mright"], "member");
    assert_eq!(sync.logs[0]["new_count"], 1);
    assert_eq!(sync.logs[0]["added"][0], person_dn("bob").as_str());
    assert_eq!(sync.logs[0]["removed"].as_array().map(Vec::len), Some(0));

    let err = engine
        .get_sgroup_logs(&user("bob"), "a.g1", 1000, LogStream::Actions)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_logs_need_a_log_dir() {
    let engine = create_test_engine().await;
    let err = engine
        .get_sgroup_logs(&LoggedUser::TrustedAdmin, "a.", 1000, LogStream::Actions)
        .await
        .unwrap_err();
    assert!(matches!(err, GroupsError::Audit(_)));
}
