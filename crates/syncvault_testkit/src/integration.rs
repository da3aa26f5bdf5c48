//! Cross-crate integration test helpers.
//!
//! Provides utilities for checking behavior that spans the container,
//! storage and core crates.

use std::collections::BTreeMap;
use syncvault_core::{ListRequest, Record, Resource, SyncFile};

/// Pages through a listing with `page_size` and returns every item.
///
/// Panics if a page is larger than requested or the walk does not end.
pub fn collect_all<R: Record>(file: &SyncFile, request: &ListRequest, page_size: u32) -> Vec<R> {
    let mut items = Vec::new();
    let mut request = request.clone().page_size(page_size).page_token("");
    for _ in 0..100_000 {
        let page = file.list::<R>(&request).expect("Failed to list");
        assert!(
            page.items.len() <= page_size as usize,
            "page of {} exceeds size {}",
            page.items.len(),
            page_size
        );
        items.extend(page.items);
        if page.next_page_token.is_empty() {
            return items;
        }
        request = request.page_token(page.next_page_token);
    }
    panic!("pagination did not terminate");
}

/// Returns resource display names keyed by resource id for one generation.
pub fn resource_names(file: &SyncFile, sync_id: &str) -> BTreeMap<String, String> {
    collect_all::<Resource>(file, &ListRequest::new().sync_id(sync_id), 100)
        .into_iter()
        .map(|r| (r.id.resource, r.display_name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::generators::unique_resources_strategy;
    use crate::logging::init_tracing;
    use proptest::prelude::*;
    use std::io::Write;
    use syncvault_container::{ContainerError, HEADER};
    use syncvault_core::{
        Config, CoreError, Grant, ListFilter, ResourceId, SessionScope, SyncType,
    };

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_pagination_is_complete(resources in unique_resources_strategy(24)) {
            let vault = TestVault::memory();
            vault.finished_sync(&resources);
            let n = resources.len() as u32;

            for page_size in [1, n.max(1), n + 1] {
                let listed: Vec<Resource> = collect_all(&vault, &ListRequest::new(), page_size);
                prop_assert_eq!(&listed, &resources);
            }
        }

        #[test]
        fn test_container_round_trip(resources in unique_resources_strategy(16)) {
            let vault = TestVault::memory();
            let id = vault.finished_sync(&resources);
            let vault = vault.reopen();
            let listed: Vec<Resource> = collect_all(&vault, &ListRequest::new().sync_id(&id), 7);
            prop_assert_eq!(listed, resources);
        }
    }

    #[test]
    fn test_pagination_in_insertion_order() {
        let vault = TestVault::memory();
        let users = sample_users(10);
        vault.finished_sync(&users);

        let page = vault
            .list::<Resource>(&ListRequest::new().page_size(4))
            .unwrap();
        assert_eq!(page.items, users[..4].to_vec());
        assert!(page.has_more());
        assert!(
            vault
                .list::<Resource>(&ListRequest::new().page_size(10))
                .unwrap()
                .next_page_token
                .is_empty()
        );
    }

    #[test]
    fn test_generation_isolation() {
        init_tracing();
        let vault = TestVault::memory();
        let first = vault.finished_sync(&[user("alice"), user("bob")]);
        let second = vault.finished_sync(&[user("carol")]);

        let ids = |sync_id: &str| -> Vec<String> { resource_names(&vault, sync_id).into_keys().collect() };
        assert_eq!(ids(&first), vec!["alice", "bob"]);
        assert_eq!(ids(&second), vec!["carol"]);

        // Default reads follow the latest finished full sync.
        let latest: Vec<Resource> = collect_all(&vault, &ListRequest::new(), 10);
        assert_eq!(latest, vec![user("carol")]);

        vault.view_sync(&first).unwrap();
        let viewed: Vec<Resource> = collect_all(&vault, &ListRequest::new(), 10);
        assert_eq!(viewed.len(), 2);
        vault.clear_view();
    }

    #[test]
    fn test_active_sync_shadows_finished() {
        let vault = TestVault::memory();
        vault.finished_sync(&[user("alice")]);
        vault.start_sync().unwrap();
        vault.put(&[user("zed")]).unwrap();

        let current: Vec<Resource> = collect_all(&vault, &ListRequest::new(), 10);
        assert_eq!(current, vec![user("zed")]);
    }

    #[test]
    fn test_upsert_idempotence() {
        let vault = TestVault::memory();
        vault.start_sync().unwrap();
        let users = sample_users(3);
        vault.put(&users).unwrap();
        vault.put(&users).unwrap();
        vault.put(&users[..1]).unwrap();

        let listed: Vec<Resource> = collect_all(&vault, &ListRequest::new(), 2);
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn test_start_twice_returns_same_sync() {
        let vault = TestVault::memory();
        let (first, is_new) = vault.start_sync().unwrap();
        assert!(is_new);
        let (second, is_new) = vault.start_sync().unwrap();
        assert!(!is_new);
        assert_eq!(first, second);
    }

    #[test]
    fn test_compaction_scenario() {
        let vault = TestVault::memory();
        let base = vault.finished_sync(&[
            Resource::new(ResourceId::new("user", "k1"), "v1"),
            Resource::new(ResourceId::new("user", "k2"), "v2"),
        ]);
        let applied = vault.finished_sync_of_type(
            SyncType::Partial,
            Some(&base),
            &[
                Resource::new(ResourceId::new("user", "k2"), "v2b"),
                Resource::new(ResourceId::new("user", "k3"), "v3"),
            ],
        );
        let dest = vault.finished_sync::<Resource>(&[]);

        let expected: BTreeMap<String, String> = [("k1", "v1"), ("k2", "v2b"), ("k3", "v3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        vault.compact(&dest, &base, &applied).unwrap();
        assert_eq!(resource_names(&vault, &dest), expected);

        vault.compact(&dest, &base, &applied).unwrap();
        assert_eq!(resource_names(&vault, &dest), expected);

        // The inputs are untouched.
        assert_eq!(resource_names(&vault, &base).get("k2").map(String::as_str), Some("v2"));
    }

    #[test]
    fn test_diff_then_clone() {
        let vault = TestVault::memory();
        let base = vault.finished_sync(&[user("a")]);
        let applied = vault.finished_sync(&[user("a"), user("b")]);
        let diff = vault.generate_diff(&base, &applied).unwrap();
        assert_eq!(resource_names(&vault, &diff).into_keys().collect::<Vec<_>>(), vec!["b"]);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("diff.c1z");
        vault.clone_sync(&dest, Some(&diff)).unwrap();

        let cloned = SyncFile::open(&dest, Config::new().read_only(true)).unwrap();
        let run = cloned.get_sync(&diff).unwrap().unwrap();
        assert_eq!(run.parent_sync_id.as_deref(), Some(base.as_str()));
        assert_eq!(
            resource_names(&cloned, &diff).into_keys().collect::<Vec<_>>(),
            vec!["b"]
        );
    }

    #[test]
    fn test_grants_by_principal_and_entitlement() {
        let vault = TestVault::memory();
        let members = sample_users(3);
        let (group, ent, grants) = sample_membership("eng", &members);
        vault.start_sync().unwrap();
        vault.put(&sample_resource_types()).unwrap();
        vault.put(&members).unwrap();
        vault.put(&[group]).unwrap();
        vault.put(&[ent.clone()]).unwrap();
        vault.put(&grants).unwrap();
        vault.end_sync().unwrap();

        let of_ent: Vec<Grant> =
            collect_all(&vault, &ListRequest::new().filter(ListFilter::ByEntitlement(ent.id)), 2);
        assert_eq!(of_ent.len(), 3);

        let of_user: Vec<Grant> = collect_all(
            &vault,
            &ListRequest::new().filter(ListFilter::ByPrincipal(members[1].id.clone())),
            2,
        );
        assert_eq!(of_user, vec![grants[1].clone()]);

        let by_type: Vec<Grant> = collect_all(
            &vault,
            &ListRequest::new().filter(ListFilter::ByPrincipalTypes(vec![
                "group".into(),
                "user".into(),
            ])),
            10,
        );
        assert_eq!(by_type.len(), 3);
    }

    #[test]
    fn test_file_round_trip_and_sessions() {
        let vault = TestVault::file();
        let (id, _) = vault.start_sync().unwrap();
        vault.put(&sample_users(5)).unwrap();
        vault
            .session_store(SessionScope::new(&id).with_prefix("conn/"))
            .unwrap()
            .set("cursor", b"page-3")
            .unwrap();
        vault.end_sync().unwrap();

        let bytes = vault.container_bytes().unwrap_or_default();
        assert!(bytes.is_empty(), "nothing is saved before close");

        let vault = vault.reopen();
        let bytes = vault.container_bytes().unwrap();
        assert_eq!(&bytes[..HEADER.len()], &HEADER);

        let store = vault
            .session_store(SessionScope::new(&id).with_prefix("conn/"))
            .unwrap();
        assert_eq!(store.get("cursor").unwrap(), Some(b"page-3".to_vec()));
        assert_eq!(collect_all::<Resource>(&vault, &ListRequest::new(), 2).len(), 5);
    }

    #[test]
    fn test_corrupt_container_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.c1z");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"SQLite format 3\0 not a container").unwrap();
        drop(f);

        let err = SyncFile::open(&path, Config::default()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Container(ContainerError::InvalidHeader)
        ));
    }
}
