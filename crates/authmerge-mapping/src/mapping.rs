//! Role and user mapping entries and the pairwise merge.
//!
//! A merge appends the second list to the first and refuses the whole
//! operation as soon as an ARN from the second list is already present in the
//! first. There is no winner on collision and no partial result.

use std::collections::HashSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{MappingError, MappingResult};

/// The two kinds of mapping carried by an aws-auth ConfigMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    /// IAM role to Kubernetes username/groups (`mapRoles`).
    Role,
    /// IAM user to Kubernetes username/groups (`mapUsers`).
    User,
}

impl MappingKind {
    /// ConfigMap data key holding this kind of mapping list.
    #[must_use]
    pub fn data_key(self) -> &'static str {
        match self {
            Self::Role => crate::source::MAP_ROLES_KEY,
            Self::User => crate::source::MAP_USERS_KEY,
        }
    }

    /// Lowercase name, as used in conflict messages.
    #[must_use]
    pub fn as_lower_str(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::User => "user",
        }
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role => write!(f, "Role"),
            Self::User => write!(f, "User"),
        }
    }
}

/// Maps an IAM role ARN to a Kubernetes username and groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    #[serde(default)]
    pub rolearn: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl RoleMapping {
    /// Create a new role mapping.
    pub fn new(
        rolearn: impl Into<String>,
        username: impl Into<String>,
        groups: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            rolearn: rolearn.into(),
            username: username.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }
}

/// Maps an IAM user ARN to a Kubernetes username and groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMapping {
    #[serde(default)]
    pub userarn: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserMapping {
    /// Create a new user mapping.
    pub fn new(
        userarn: impl Into<String>,
        username: impl Into<String>,
        groups: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            userarn: userarn.into(),
            username: username.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }
}

/// A mapping entry keyed by an ARN that must be unique in a merged result.
pub trait Mapping: Clone + Serialize + DeserializeOwned {
    /// Which mapping list this entry belongs to.
    const KIND: MappingKind;

    /// The ARN used to detect conflicts.
    fn key(&self) -> &str;
}

impl Mapping for RoleMapping {
    const KIND: MappingKind = MappingKind::Role;

    fn key(&self) -> &str {
        &self.rolearn
    }
}

impl Mapping for UserMapping {
    const KIND: MappingKind = MappingKind::User;

    fn key(&self) -> &str {
        &self.userarn
    }
}

/// Merge two mapping lists, `a` entries first, then `b` entries.
///
/// Only keys of `a` are tracked, so duplicates inside `b` itself are kept:
/// sources are trusted to be internally consistent.
pub fn merge_mapping_lists<M: Mapping>(a: Vec<M>, b: Vec<M>) -> MappingResult<Vec<M>> {
    let seen: HashSet<&str> = a.iter().map(Mapping::key).collect();
    if let Some(dup) = b.iter().find(|m| seen.contains(m.key())) {
        return Err(MappingError::Conflict {
            kind: M::KIND,
            identifier: dup.key().to_string(),
        });
    }

    let mut merged = Vec::with_capacity(a.len() + b.len());
    merged.extend(a);
    merged.extend(b);
    Ok(merged)
}

/// Merge two role mapping lists keyed by role ARN.
pub fn merge_role_mappings(
    a: Vec<RoleMapping>,
    b: Vec<RoleMapping>,
) -> MappingResult<Vec<RoleMapping>> {
    merge_mapping_lists(a, b)
}

/// Merge two user mapping lists keyed by user ARN.
pub fn merge_user_mappings(
    a: Vec<UserMapping>,
    b: Vec<UserMapping>,
) -> MappingResult<Vec<UserMapping>> {
    merge_mapping_lists(a, b)
}

/// Encode a mapping list the way the EKS authenticator expects it.
pub fn to_yaml<M: Mapping>(mappings: &[M]) -> MappingResult<String> {
    serde_yaml::to_string(mappings).map_err(|e| MappingError::Serialization {
        what: M::KIND.data_key().to_string(),
        cause: e.to_string(),
    })
}

/// Decode a mapping list. Blank or `null` documents decode to an empty list.
pub fn from_yaml<M: Mapping>(raw: &str) -> Result<Vec<M>, serde_yaml::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: Option<Vec<M>> = serde_yaml::from_str(raw)?;
    Ok(parsed.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(arn: &str) -> RoleMapping {
        RoleMapping::new(arn, arn.to_uppercase(), ["system:masters"])
    }

    fn user(arn: &str) -> UserMapping {
        UserMapping::new(arn, arn.to_uppercase(), Vec::<String>::new())
    }

    #[test]
    fn test_merge_disjoint_preserves_order() {
        let a = vec![role("a1"), role("a2")];
        let b = vec![role("b1"), role("b2")];

        let merged = merge_role_mappings(a.clone(), b.clone()).unwrap();

        let expected: Vec<RoleMapping> = a.into_iter().chain(b).collect();
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_merge_empty_lists_is_empty_vec() {
        let merged = merge_role_mappings(vec![], vec![]).unwrap();
        assert!(merged.is_empty());
        assert_eq!(to_yaml(&merged).unwrap(), "[]\n");
    }

    #[test]
    fn test_merge_conflict_names_identifier() {
        let a = vec![role("shared"), role("only-a")];
        let b = vec![role("only-b"), role("shared")];

        let err = merge_role_mappings(a, b).unwrap_err();
        match err {
            MappingError::Conflict { kind, identifier } => {
                assert_eq!(kind, MappingKind::Role);
                assert_eq!(identifier, "shared");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_user_conflict_uses_user_kind() {
        let err = merge_user_mappings(vec![user("x")], vec![user("x")]).unwrap_err();
        assert_eq!(err.kind(), Some(MappingKind::User));
    }

    #[test]
    fn test_duplicates_within_second_list_are_kept() {
        let merged = merge_role_mappings(vec![], vec![role("dup"), role("dup")]).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_duplicate_groups_are_preserved() {
        let mapping = RoleMapping::new("arn", "name", ["g", "g", "a"]);
        let yaml = to_yaml(&[mapping.clone()]).unwrap();
        let parsed: Vec<RoleMapping> = from_yaml(&yaml).unwrap();
        assert_eq!(parsed, vec![mapping]);
        assert_eq!(parsed[0].groups, vec!["g", "g", "a"]);
    }

    #[test]
    fn test_yaml_field_names() {
        let yaml = to_yaml(&[role("arn:aws:iam::1:role/x")]).unwrap();
        assert!(yaml.contains("rolearn: arn:aws:iam::1:role/x"));
        assert!(yaml.contains("groups:"));

        let yaml = to_yaml(&[user("arn:aws:iam::1:user/y")]).unwrap();
        assert!(yaml.contains("userarn: arn:aws:iam::1:user/y"));
    }

    #[test]
    fn test_from_yaml_blank_and_null() {
        assert!(from_yaml::<RoleMapping>("").unwrap().is_empty());
        assert!(from_yaml::<RoleMapping>("  \n").unwrap().is_empty());
        assert!(from_yaml::<RoleMapping>("null").unwrap().is_empty());
        assert!(from_yaml::<RoleMapping>("[]").unwrap().is_empty());
    }

    #[test]
    fn test_from_yaml_missing_groups_defaults_empty() {
        let parsed: Vec<UserMapping> =
            from_yaml("- userarn: arn:aws:iam::1:user/z\n  username: z\n").unwrap();
        assert_eq!(
            parsed,
            vec![UserMapping::new("arn:aws:iam::1:user/z", "z", Vec::<String>::new())]
        );
    }

    #[test]
    fn test_from_yaml_missing_arn_defaults_empty() {
        let roles: Vec<RoleMapping> = from_yaml("- username: x\n  groups: [a]\n").unwrap();
        assert_eq!(roles, vec![RoleMapping::new("", "x", ["a"])]);

        let users: Vec<UserMapping> = from_yaml("- username: y\n").unwrap();
        assert_eq!(users[0].userarn, "");
    }

    #[test]
    fn test_missing_arns_collide_across_lists() {
        let a: Vec<RoleMapping> = from_yaml("- username: a\n").unwrap();
        let b: Vec<RoleMapping> = from_yaml("- username: b\n").unwrap();
        let err = merge_role_mappings(a, b).unwrap_err();
        assert!(matches!(err, MappingError::Conflict { ref identifier, .. } if identifier.is_empty()));
    }

    #[test]
    fn test_from_yaml_rejects_non_list() {
        assert!(from_yaml::<RoleMapping>("rolearn: not-a-list").is_err());
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(MappingKind::Role.to_string(), "Role");
        assert_eq!(MappingKind::User.as_lower_str(), "user");
        assert_eq!(MappingKind::Role.data_key(), "mapRoles");
        assert_eq!(MappingKind::User.data_key(), "mapUsers");
    }
}
