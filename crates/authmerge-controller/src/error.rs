//! Error types for the authmerge-controller crate.

use std::time::Duration;

use authmerge_mapping::MappingError;
use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors returned by a [`crate::ConfigMapStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("ConfigMap {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    /// An object with the same name already exists.
    #[error("ConfigMap {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },

    /// The API server rejected the request.
    #[error("API error: {0}")]
    Api(String),

    /// Transport or client-side failure talking to the cluster.
    #[error("Kubernetes client error: {0}")]
    Kube(#[source] kube::Error),
}

impl StoreError {
    /// Returns true if the error means the object is missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Returns true if the error means the object name is taken.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Errors that stop the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A source could not be parsed or two sources conflict.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Reading or writing ConfigMaps failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The source watch never completed its initial list.
    #[error(
        "Timed out after {}s waiting for the ConfigMap cache to sync in namespace {namespace}",
        .timeout.as_secs()
    )]
    CacheSyncTimeout { namespace: String, timeout: Duration },

    /// The change notifier stopped delivering events.
    #[error("ConfigMap change notifier closed unexpectedly")]
    NotifierClosed,

    /// Kubernetes client configuration could not be loaded.
    #[error("Failed to load Kubernetes client configuration: {0}")]
    Kubeconfig(String),

    /// Invalid controller settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControllerError {
    /// Returns true if the error only aborts the current merge cycle.
    ///
    /// Parse errors and conflicts leave the authoritative object untouched and
    /// clear up once the offending source is fixed. Everything else points at
    /// the environment (API access, client setup, watch health).
    #[must_use]
    pub fn is_fatal_at_cycle(&self) -> bool {
        !matches!(self, ControllerError::Mapping(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authmerge_mapping::MappingKind;

    #[test]
    fn test_store_error_predicates() {
        let not_found = StoreError::NotFound {
            namespace: "kube-system".into(),
            name: "aws-auth".into(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_already_exists());
        assert_eq!(
            not_found.to_string(),
            "ConfigMap kube-system/aws-auth not found"
        );

        let exists = StoreError::AlreadyExists {
            namespace: "ns".into(),
            name: "x".into(),
        };
        assert!(exists.is_already_exists());
    }

    #[test]
    fn test_mapping_errors_are_cycle_scoped() {
        let err = ControllerError::from(MappingError::Conflict {
            kind: MappingKind::User,
            identifier: "arn".into(),
        });
        assert!(!err.is_fatal_at_cycle());
        assert_eq!(
            err.to_string(),
            "User ARN arn is already in the user mapping list."
        );
    }

    #[test]
    fn test_environment_errors_are_fatal() {
        assert!(ControllerError::NotifierClosed.is_fatal_at_cycle());
        assert!(ControllerError::from(StoreError::Api("boom".into())).is_fatal_at_cycle());

        let timeout = ControllerError::CacheSyncTimeout {
            namespace: "aws-auth-merger".into(),
            timeout: Duration::from_secs(60),
        };
        assert!(timeout.is_fatal_at_cycle());
        assert!(timeout.to_string().contains("60s"));
        assert!(timeout.to_string().contains("aws-auth-merger"));
    }
}
