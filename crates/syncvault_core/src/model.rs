//! Domain payloads stored in the object tables.
//!
//! Payloads are serialized with the canonical CBOR codec. Every map uses
//! `BTreeMap` so the serialized form only depends on content.

use crate::record::Record;
use crate::schema::{self, TableDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form key/value metadata attached to a payload.
pub type Annotations = BTreeMap<String, String>;

/// Identity of a resource: its type plus its id within that type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource type id.
    pub resource_type: String,
    /// Resource id within the type.
    pub resource: String,
}

impl ResourceId {
    /// Creates a resource id.
    pub fn new(resource_type: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource)
    }
}

/// Capability a resource type advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTrait {
    /// Human or service account.
    User,
    /// Collection of principals.
    Group,
    /// Assignable role.
    Role,
    /// Application.
    App,
    /// Credential or key.
    Secret,
}

/// A kind of resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceType {
    /// Resource type id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Advertised capabilities.
    pub traits: Vec<ResourceTrait>,
    /// Free-text description.
    pub description: String,
    /// Extra metadata.
    pub annotations: Annotations,
}

/// A discovered resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Identity.
    pub id: ResourceId,
    /// Owning resource, if nested.
    pub parent_resource_id: Option<ResourceId>,
    /// Display name.
    pub display_name: String,
    /// Free-text description.
    pub description: String,
    /// Extra metadata.
    pub annotations: Annotations,
}

impl Resource {
    /// Creates a top-level resource.
    pub fn new(id: ResourceId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            parent_resource_id: None,
            display_name: display_name.into(),
            description: String::new(),
            annotations: Annotations::new(),
        }
    }

    /// Sets the owning resource.
    #[must_use]
    pub fn with_parent(mut self, parent: ResourceId) -> Self {
        self.parent_resource_id = Some(parent);
        self
    }
}

/// Whether an entitlement grants access or ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Unspecified.
    #[default]
    Unspecified,
    /// Membership or access.
    Assignment,
    /// Ownership or permission over the resource.
    Permission,
}

/// Something that can be granted on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Entitlement id.
    pub id: String,
    /// Resource the entitlement belongs to.
    pub resource: Resource,
    /// Display name.
    pub display_name: String,
    /// Free-text description.
    pub description: String,
    /// Purpose.
    pub purpose: Purpose,
    /// Resource types that may receive the entitlement.
    pub grantable_to: Vec<String>,
    /// Short name.
    pub slug: String,
    /// Extra metadata.
    pub annotations: Annotations,
}

impl Entitlement {
    /// Creates an entitlement on `resource`.
    pub fn new(id: impl Into<String>, resource: Resource, slug: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource,
            display_name: String::new(),
            description: String::new(),
            purpose: Purpose::Assignment,
            grantable_to: Vec::new(),
            slug: slug.into(),
            annotations: Annotations::new(),
        }
    }
}

/// An entitlement held by a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Grant id.
    pub id: String,
    /// Entitlement granted.
    pub entitlement: Entitlement,
    /// Principal holding it.
    pub principal: Resource,
    /// Extra metadata.
    pub annotations: Annotations,
}

impl Grant {
    /// Creates a grant of `entitlement` to `principal`.
    ///
    /// The id follows `<entitlement id>:<principal type>:<principal id>`.
    pub fn new(entitlement: Entitlement, principal: Resource) -> Self {
        Self {
            id: format!("{}:{}", entitlement.id, principal.id),
            entitlement,
            principal,
            annotations: Annotations::new(),
        }
    }
}

impl Record for ResourceType {
    const TABLE: &'static TableDescriptor = &schema::RESOURCE_TYPES;

    fn external_id(&self) -> String {
        self.id.clone()
    }

    fn filter_values(&self) -> Vec<Option<String>> {
        Vec::new()
    }
}

impl Record for Resource {
    const TABLE: &'static TableDescriptor = &schema::RESOURCES;

    fn external_id(&self) -> String {
        self.id.to_string()
    }

    fn filter_values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.id.resource_type.clone()),
            self.parent_resource_id
                .as_ref()
                .map(|p| p.resource_type.clone()),
            self.parent_resource_id.as_ref().map(|p| p.resource.clone()),
        ]
    }
}

impl Record for Entitlement {
    const TABLE: &'static TableDescriptor = &schema::ENTITLEMENTS;

    fn external_id(&self) -> String {
        self.id.clone()
    }

    fn filter_values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.resource.id.resource_type.clone()),
            Some(self.resource.id.resource.clone()),
        ]
    }
}

impl Record for Grant {
    const TABLE: &'static TableDescriptor = &schema::GRANTS;

    fn external_id(&self) -> String {
        self.id.clone()
    }

    fn filter_values(&self) -> Vec<Option<String>> {
        let resource = &self.entitlement.resource.id;
        vec![
            Some(resource.resource_type.clone()),
            Some(resource.resource.clone()),
            Some(self.entitlement.id.clone()),
            Some(self.principal.id.resource_type.clone()),
            Some(self.principal.id.resource.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters_match_table<R: Record>(record: &R) {
        assert_eq!(record.filter_values().len(), R::TABLE.filter_columns.len());
    }

    #[test]
    fn resource_external_id_joins_type_and_id() {
        let r = Resource::new(ResourceId::new("user", "alice"), "Alice");
        assert_eq!(r.external_id(), "user:alice");
        filters_match_table(&r);
    }

    #[test]
    fn parent_columns_follow_parent() {
        let r = Resource::new(ResourceId::new("repo", "core"), "core")
            .with_parent(ResourceId::new("org", "acme"));
        assert_eq!(
            r.filter_values(),
            vec![
                Some("repo".to_string()),
                Some("org".to_string()),
                Some("acme".to_string())
            ]
        );
    }

    #[test]
    fn grant_filters_cover_both_sides() {
        let group = Resource::new(ResourceId::new("group", "admins"), "Admins");
        let ent = Entitlement::new("group:admins:member", group, "member");
        let user = Resource::new(ResourceId::new("user", "bob"), "Bob");
        let grant = Grant::new(ent, user);

        assert_eq!(grant.id, "group:admins:member:user:bob");
        filters_match_table(&grant);
        let f = grant.filter_values();
        assert_eq!(f[2].as_deref(), Some("group:admins:member"));
        assert_eq!(f[4].as_deref(), Some("bob"));
    }

    #[test]
    fn resource_type_has_no_filters() {
        let rt = ResourceType {
            id: "user".into(),
            ..Default::default()
        };
        filters_match_table(&rt);
    }
}
