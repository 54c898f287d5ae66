//! Error types for the authmerge-mapping crate.

use thiserror::Error;

use crate::mapping::MappingKind;

/// Result alias for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// Errors that abort a merge cycle.
///
/// Conflicts and parse failures are recoverable at the cycle level. The
/// authoritative object is left untouched and the next trigger retries once
/// the offending source has been fixed.
#[derive(Debug, Error)]
pub enum MappingError {
    /// Two sources declare the same role or user ARN.
    #[error("{kind} ARN {identifier} is already in the {} mapping list.", .kind.as_lower_str())]
    Conflict {
        kind: MappingKind,
        identifier: String,
    },

    /// A recognized data key holds something that is not a mapping list.
    #[error("Error parsing {} on ConfigMap {source_name} : {source}", .kind.data_key())]
    InvalidMappingList {
        kind: MappingKind,
        source_name: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Encoding the merged result failed.
    #[error("Failed to serialize {what}: {cause}")]
    Serialization { what: String, cause: String },
}

impl MappingError {
    /// Returns true if this error is a cross-source conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, MappingError::Conflict { .. })
    }

    /// Name of the source document responsible, when known.
    #[must_use]
    pub fn source_name(&self) -> Option<&str> {
        match self {
            MappingError::InvalidMappingList { source_name, .. } => Some(source_name),
            _ => None,
        }
    }

    /// Mapping kind involved, when the error is tied to one.
    #[must_use]
    pub fn kind(&self) -> Option<MappingKind> {
        match self {
            MappingError::Conflict { kind, .. } | MappingError::InvalidMappingList { kind, .. } => {
                Some(*kind)
            }
            MappingError::Serialization { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml_error() -> serde_yaml::Error {
        serde_yaml::from_str::<Vec<String>>("{not: a list").unwrap_err()
    }

    #[test]
    fn test_conflict_display_matches_role_wording() {
        let err = MappingError::Conflict {
            kind: MappingKind::Role,
            identifier: "arn:aws:iam::123:role/admin".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Role ARN arn:aws:iam::123:role/admin is already in the role mapping list."
        );
        assert!(err.is_conflict());
        assert_eq!(err.kind(), Some(MappingKind::Role));
        assert!(err.source_name().is_none());
    }

    #[test]
    fn test_conflict_display_user() {
        let err = MappingError::Conflict {
            kind: MappingKind::User,
            identifier: "bob".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "User ARN bob is already in the user mapping list."
        );
    }

    #[test]
    fn test_invalid_mapping_list_names_key_and_source() {
        let err = MappingError::InvalidMappingList {
            kind: MappingKind::User,
            source_name: "team-a".to_string(),
            source: yaml_error(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Error parsing mapUsers on ConfigMap team-a : "));
        assert!(!err.is_conflict());
        assert_eq!(err.source_name(), Some("team-a"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
