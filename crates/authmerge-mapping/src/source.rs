//! Source documents and mapping extraction.

use std::collections::BTreeMap;

use crate::error::{MappingError, MappingResult};
use crate::mapping::{from_yaml, Mapping, RoleMapping, UserMapping};

/// Data key holding the role mapping list.
pub const MAP_ROLES_KEY: &str = "mapRoles";

/// Data key holding the user mapping list.
pub const MAP_USERS_KEY: &str = "mapUsers";

/// A named key-value document, usually the data payload of a ConfigMap.
///
/// The name doubles as the provenance token recorded on the merged result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDocument {
    pub name: String,
    pub namespace: String,
    pub resource_version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
}

impl SourceDocument {
    /// Create an empty document.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Replace the data payload.
    #[must_use]
    pub fn with_data(mut self, data: BTreeMap<String, String>) -> Self {
        self.data = data;
        self
    }

    /// Set a single data entry.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Replace the labels.
    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Set a single label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

fn extract<M: Mapping>(document: &SourceDocument) -> MappingResult<Vec<M>> {
    let Some(raw) = document.data.get(M::KIND.data_key()) else {
        return Ok(Vec::new());
    };

    from_yaml(raw).map_err(|source| MappingError::InvalidMappingList {
        kind: M::KIND,
        source_name: document.name.clone(),
        source,
    })
}

/// Role mappings declared by `document`. A missing key is an empty list.
pub fn role_mappings(document: &SourceDocument) -> MappingResult<Vec<RoleMapping>> {
    extract(document)
}

/// User mappings declared by `document`. A missing key is an empty list.
pub fn user_mappings(document: &SourceDocument) -> MappingResult<Vec<UserMapping>> {
    extract(document)
}

/// Both mapping lists declared by `document`.
pub fn extract_mappings(
    document: &SourceDocument,
) -> MappingResult<(Vec<RoleMapping>, Vec<UserMapping>)> {
    Ok((role_mappings(document)?, user_mappings(document)?))
}
