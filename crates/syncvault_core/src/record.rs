//! Record trait and list requests.

use crate::model::ResourceId;
use crate::schema::TableDescriptor;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A payload stored in one of the object tables.
///
/// Implementors name their table and derive the external id and the
/// denormalized filter columns from the payload. Filter values are listed
/// in the order of `TABLE.filter_columns`.
pub trait Record: Serialize + DeserializeOwned {
    /// Table holding this record kind.
    const TABLE: &'static TableDescriptor;

    /// Business identifier, unique per sync.
    fn external_id(&self) -> String;

    /// Values for the table's filter columns.
    fn filter_values(&self) -> Vec<Option<String>>;
}

/// Row restriction applied by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListFilter {
    /// No restriction.
    #[default]
    None,
    /// Records of one resource type.
    ByResourceType(String),
    /// Records attached to one resource.
    ByResourceId(ResourceId),
    /// Resources whose parent is the given resource.
    ByOwningResource(ResourceId),
    /// Grants of one entitlement.
    ByEntitlement(String),
    /// Grants held by one principal.
    ByPrincipal(ResourceId),
    /// Grants whose principal is of any of the given types.
    ByPrincipalTypes(Vec<String>),
}

/// One column restriction: `column = value` or `column IN (values)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Condition {
    pub column: &'static str,
    pub values: Vec<String>,
}

impl Condition {
    fn eq(column: &'static str, value: &str) -> Self {
        Self {
            column,
            values: vec![value.to_string()],
        }
    }
}

impl ListFilter {
    /// Returns the column restrictions this filter applies.
    pub(crate) fn conditions(&self) -> Vec<Condition> {
        match self {
            Self::None => Vec::new(),
            Self::ByResourceType(rt) => vec![Condition::eq("resource_type_id", rt)],
            Self::ByResourceId(id) => vec![
                Condition::eq("resource_type_id", &id.resource_type),
                Condition::eq("resource_id", &id.resource),
            ],
            Self::ByOwningResource(id) => vec![
                Condition::eq("parent_resource_type_id", &id.resource_type),
                Condition::eq("parent_resource_id", &id.resource),
            ],
            Self::ByEntitlement(ent) => vec![Condition::eq("entitlement_id", ent)],
            Self::ByPrincipal(id) => vec![
                Condition::eq("principal_resource_type_id", &id.resource_type),
                Condition::eq("principal_resource_id", &id.resource),
            ],
            Self::ByPrincipalTypes(types) => vec![Condition {
                column: "principal_resource_type_id",
                values: types.clone(),
            }],
        }
    }
}

/// Parameters of a `list` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// Row restriction.
    pub filter: ListFilter,
    /// Token from the previous page, or empty.
    pub page_token: String,
    /// Requested page size; 0 means the maximum.
    pub page_size: u32,
    /// Explicit generation to read instead of the resolved one.
    pub sync_id: Option<String>,
}

impl ListRequest {
    /// Creates a request for the first page with no filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: ListFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the page token.
    #[must_use]
    pub fn page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = token.into();
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Reads from an explicit generation.
    #[must_use]
    pub fn sync_id(mut self, sync_id: impl Into<String>) -> Self {
        self.sync_id = Some(sync_id.into());
        self
    }
}
