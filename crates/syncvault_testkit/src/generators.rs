//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records that satisfy the store's
//! invariants (distinct external ids within one batch).

use proptest::prelude::*;
use std::collections::BTreeMap;
use syncvault_core::{Annotations, Resource, ResourceId};

/// Strategy for generating resource type ids.
pub fn resource_type_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["user", "group", "role", "app"]).prop_map(str::to_string)
}

/// Strategy for generating resource ids.
pub fn resource_id_strategy() -> impl Strategy<Value = ResourceId> {
    (
        resource_type_strategy(),
        prop::string::string_regex("[a-z0-9][a-z0-9._-]{0,15}").expect("Invalid regex"),
    )
        .prop_map(|(t, id)| ResourceId::new(t, id))
}

/// Strategy for generating annotation maps.
pub fn annotations_strategy() -> impl Strategy<Value = Annotations> {
    prop::collection::btree_map("[a-z]{1,8}", "[ -~]{0,16}", 0..4)
}

/// Strategy for generating a resource.
pub fn resource_strategy() -> impl Strategy<Value = Resource> {
    (
        resource_id_strategy(),
        "[A-Za-z ]{0,24}",
        prop::option::of(resource_id_strategy()),
        annotations_strategy(),
    )
        .prop_map(|(id, display_name, parent, annotations)| {
            let mut resource = Resource::new(id, display_name);
            resource.parent_resource_id = parent;
            resource.annotations = annotations;
            resource
        })
}

/// Strategy for generating up to `max` resources with distinct ids.
pub fn unique_resources_strategy(max: usize) -> impl Strategy<Value = Vec<Resource>> {
    prop::collection::vec(resource_strategy(), 0..=max).prop_map(|resources| {
        let by_id: BTreeMap<ResourceId, Resource> = resources
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        by_id.into_values().collect()
    })
}
