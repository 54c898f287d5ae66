//! Controller settings.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigError;

/// Namespace watched for source ConfigMaps when none is configured.
pub const DEFAULT_WATCH_NAMESPACE: &str = "aws-auth-merger";

/// Settings for the merger controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergerConfig {
    /// Namespace holding the source ConfigMaps.
    pub watch_namespace: String,

    /// Label selector restricting which ConfigMaps count as sources.
    /// Empty selects every ConfigMap in the namespace.
    pub label_selector: String,

    /// Labels put on the source created when migrating an unmanaged aws-auth.
    pub autocreate_labels: BTreeMap<String, String>,

    /// Interval between forced merges, independent of watch events.
    pub refresh_interval: Duration,

    /// Quiet period before a burst of triggers turns into one merge.
    pub debounce_interval: Duration,

    /// How often the watch is restarted to force a full relist.
    pub resync_period: Duration,

    /// How long to wait for the initial source list before giving up.
    pub cache_sync_timeout: Duration,

    /// Merge sources in name order instead of list order.
    pub sort_sources: bool,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: DEFAULT_WATCH_NAMESPACE.to_string(),
            label_selector: String::new(),
            autocreate_labels: BTreeMap::new(),
            refresh_interval: Duration::from_secs(5 * 60),
            debounce_interval: Duration::from_secs(1),
            resync_period: Duration::from_secs(24 * 60 * 60),
            cache_sync_timeout: Duration::from_secs(60),
            sort_sources: false,
        }
    }
}

impl MergerConfig {
    /// Check the settings before the controller starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_namespace.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "watch_namespace".into(),
                "must not be empty".into(),
            ));
        }

        let intervals = [
            ("refresh_interval", self.refresh_interval),
            ("debounce_interval", self.debounce_interval),
            ("resync_period", self.resync_period),
            ("cache_sync_timeout", self.cache_sync_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(
                    name.into(),
                    "must be greater than zero".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Parse `key=value` pairs into a label map.
///
/// A bare `key` maps to an empty value. Everything after the first `=` is the
/// value, so values may themselves contain `=`. Later pairs win on duplicate keys.
pub fn parse_label_pairs<S: AsRef<str>>(pairs: &[S]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|pair| match pair.as_ref().split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.as_ref().to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MergerConfig::default();
        assert_eq!(config.watch_namespace, "aws-auth-merger");
        assert!(config.label_selector.is_empty());
        assert!(config.autocreate_labels.is_empty());
        assert_eq!(config.refresh_interval, Duration::from_secs(300));
        assert_eq!(config.debounce_interval, Duration::from_secs(1));
        assert_eq!(config.resync_period, Duration::from_secs(86_400));
        assert!(!config.sort_sources);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_namespace() {
        let config = MergerConfig {
            watch_namespace: "  ".into(),
            ..MergerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watch_namespace"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = MergerConfig {
            refresh_interval: Duration::ZERO,
            ..MergerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "refresh_interval"));
    }

    #[test]
    fn test_parse_label_pairs() {
        let labels = parse_label_pairs(&["team=platform", "bare", "expr=a=b=c", "empty="]);
        assert_eq!(labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(labels.get("bare").map(String::as_str), Some(""));
        assert_eq!(labels.get("expr").map(String::as_str), Some("a=b=c"));
        assert_eq!(labels.get("empty").map(String::as_str), Some(""));
        assert_eq!(labels.len(), 4);
    }

    #[test]
    fn test_parse_label_pairs_last_duplicate_wins() {
        let labels = parse_label_pairs(&["k=1".to_string(), "k=2".to_string()]);
        assert_eq!(labels.get("k").map(String::as_str), Some("2"));
        assert!(parse_label_pairs::<&str>(&[]).is_empty());
    }
}
