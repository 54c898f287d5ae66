//! Merge engine: folds every source document into the authoritative aws-auth
//! ConfigMap contents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{MappingError, MappingResult};
use crate::mapping::{
    from_yaml, merge_role_mappings, merge_user_mappings, to_yaml, RoleMapping, UserMapping,
};
use crate::source::{role_mappings, user_mappings, SourceDocument, MAP_ROLES_KEY, MAP_USERS_KEY};

/// Name of the ConfigMap the EKS authenticator reads.
pub const AUTHORITATIVE_NAME: &str = "aws-auth";

/// Namespace of the ConfigMap the EKS authenticator reads.
pub const AUTHORITATIVE_NAMESPACE: &str = "kube-system";

/// Label marking the authoritative object as owned by the merger.
pub const MANAGED_BY_LABEL_KEY: &str = "gruntwork.io/managed-by";
pub const MANAGED_BY_LABEL_VALUE: &str = "aws-auth-merger";

/// Annotation listing the contributing sources as a JSON array.
pub const SOURCES_ANNOTATION_KEY: &str = "gruntwork.io/aws-auth-merger-sources";

/// Annotation recording when the merge happened.
pub const TIMESTAMP_ANNOTATION_KEY: &str = "gruntwork.io/aws-auth-merger-timestamp";

/// Annotation set on a source created by migrating an unmanaged aws-auth.
pub const AUTO_CREATED_ANNOTATION_KEY: &str = "gruntwork.io/aws-auth-merger-created";

/// Generate-name prefix for the migrated copy of an unmanaged aws-auth.
pub const PRE_EXISTING_NAME_PREFIX: &str = "preexisting-aws-auth";

/// Format of the timestamp annotation.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// True when `labels` mark an object as managed by the merger.
#[must_use]
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels
        .get(MANAGED_BY_LABEL_KEY)
        .is_some_and(|v| v == MANAGED_BY_LABEL_VALUE)
}

/// The computed contents of the authoritative aws-auth ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedResult {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
}

impl MergedResult {
    /// Contributing source names, in merge order.
    pub fn sources(&self) -> Result<Vec<String>, serde_json::Error> {
        let raw = self
            .annotations
            .get(SOURCES_ANNOTATION_KEY)
            .map_or("[]", String::as_str);
        serde_json::from_str(raw)
    }

    /// Merge timestamp, as written in the annotation.
    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        self.annotations
            .get(TIMESTAMP_ANNOTATION_KEY)
            .map(String::as_str)
    }

    /// Merged role mappings, decoded back from the data payload.
    pub fn role_mappings(&self) -> Result<Vec<RoleMapping>, serde_yaml::Error> {
        from_yaml(self.data.get(MAP_ROLES_KEY).map_or("", String::as_str))
    }

    /// Merged user mappings, decoded back from the data payload.
    pub fn user_mappings(&self) -> Result<Vec<UserMapping>, serde_yaml::Error> {
        from_yaml(self.data.get(MAP_USERS_KEY).map_or("", String::as_str))
    }

    /// The result as a document ready to be written to the store.
    #[must_use]
    pub fn to_document(&self) -> SourceDocument {
        SourceDocument {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            resource_version: None,
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            data: self.data.clone(),
        }
    }

    /// Copy of the result with the timestamp annotation removed.
    ///
    /// Two merges over unchanged sources compare equal through this view.
    #[must_use]
    pub fn without_timestamp(&self) -> Self {
        let mut copy = self.clone();
        copy.annotations.remove(TIMESTAMP_ANNOTATION_KEY);
        copy
    }
}

/// Merge `sources` in the given order, stamped with the current time.
pub fn merge_all(sources: &[SourceDocument]) -> MappingResult<MergedResult> {
    merge_all_at(sources, Utc::now())
}

/// Merge `sources` in the given order, stamped with `now`.
///
/// The first parse error or conflict aborts the merge and is returned as is.
pub fn merge_all_at(sources: &[SourceDocument], now: DateTime<Utc>) -> MappingResult<MergedResult> {
    let mut provenance: Vec<&str> = Vec::with_capacity(sources.len());
    let mut roles: Vec<RoleMapping> = Vec::new();
    let mut users: Vec<UserMapping> = Vec::new();

    for source in sources {
        provenance.push(&source.name);

        let source_roles = role_mappings(source)?;
        let role_count = source_roles.len();
        roles = merge_role_mappings(roles, source_roles)?;

        let source_users = user_mappings(source)?;
        let user_count = source_users.len();
        users = merge_user_mappings(users, source_users)?;

        debug!(
            source = %source.name,
            roles = role_count,
            users = user_count,
            "folded source into merge"
        );
    }

    let sources_json =
        serde_json::to_string(&provenance).map_err(|e| MappingError::Serialization {
            what: SOURCES_ANNOTATION_KEY.to_string(),
            cause: e.to_string(),
        })?;

    let mut data = BTreeMap::new();
    data.insert(MAP_ROLES_KEY.to_string(), to_yaml(&roles)?);
    data.insert(MAP_USERS_KEY.to_string(), to_yaml(&users)?);

    let mut labels = BTreeMap::new();
    labels.insert(
        MANAGED_BY_LABEL_KEY.to_string(),
        MANAGED_BY_LABEL_VALUE.to_string(),
    );

    let mut annotations = BTreeMap::new();
    annotations.insert(SOURCES_ANNOTATION_KEY.to_string(), sources_json);
    annotations.insert(
        TIMESTAMP_ANNOTATION_KEY.to_string(),
        now.format(TIMESTAMP_FORMAT).to_string(),
    );

    Ok(MergedResult {
        name: AUTHORITATIVE_NAME.to_string(),
        namespace: AUTHORITATIVE_NAMESPACE.to_string(),
        labels,
        annotations,
        data,
    })
}
