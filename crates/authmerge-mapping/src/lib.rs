//! # authmerge-mapping
//!
//! Mapping model and merge engine for the aws-auth merger.
//!
//! Everything in this crate is pure: it never talks to the Kubernetes API.
//! The controller crate lists source ConfigMaps, hands them to
//! [`merge_all`] as [`SourceDocument`]s, and upserts the returned
//! [`MergedResult`].
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use authmerge_mapping::{merge_all, SourceDocument, MAP_ROLES_KEY};
//!
//! let mut data = BTreeMap::new();
//! data.insert(
//!     MAP_ROLES_KEY.to_string(),
//!     "- rolearn: arn:aws:iam::111122223333:role/ops\n  username: ops\n  groups:\n  - system:masters\n"
//!         .to_string(),
//! );
//! let source = SourceDocument::new("ops-team", "aws-auth-merger").with_data(data);
//!
//! let merged = merge_all(&[source]).unwrap();
//! assert_eq!(merged.sources().unwrap(), vec!["ops-team".to_string()]);
//! assert_eq!(merged.role_mappings().unwrap().len(), 1);
//! ```

pub mod error;
pub mod mapping;
pub mod merge;
pub mod source;

pub use error::{MappingError, MappingResult};
pub use mapping::{
    from_yaml, merge_mapping_lists, merge_role_mappings, merge_user_mappings, to_yaml, Mapping,
    MappingKind, RoleMapping, UserMapping,
};
pub use merge::{
    is_managed, merge_all, merge_all_at, MergedResult, AUTHORITATIVE_NAME,
    AUTHORITATIVE_NAMESPACE, AUTO_CREATED_ANNOTATION_KEY, MANAGED_BY_LABEL_KEY,
    MANAGED_BY_LABEL_VALUE, PRE_EXISTING_NAME_PREFIX, SOURCES_ANNOTATION_KEY,
    TIMESTAMP_ANNOTATION_KEY, TIMESTAMP_FORMAT,
};
pub use source::{
    extract_mappings, role_mappings, user_mappings, SourceDocument, MAP_ROLES_KEY, MAP_USERS_KEY,
};
