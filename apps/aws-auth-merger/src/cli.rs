//! Command-line flags. Every flag can also be set through an
//! `AWS_AUTH_MERGER_*` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use authmerge_controller::config::DEFAULT_WATCH_NAMESPACE;
use authmerge_controller::{parse_label_pairs, MergerConfig};
use clap::Parser;

use crate::logging::LogFormat;

/// Merge distributed aws-auth ConfigMaps into the one EKS reads.
#[derive(Parser, Debug)]
#[command(name = "aws-auth-merger")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Logging verbosity.
    #[arg(
        long,
        env = "AWS_AUTH_MERGER_LOGLEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub loglevel: String,

    /// Log output format.
    #[arg(long, env = "AWS_AUTH_MERGER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Namespace to watch for aws-auth source ConfigMaps.
    #[arg(long, env = "AWS_AUTH_MERGER_WATCH_NAMESPACE", default_value = DEFAULT_WATCH_NAMESPACE)]
    pub watch_namespace: String,

    /// Label selector restricting which ConfigMaps are merged. Empty selects all.
    #[arg(long, env = "AWS_AUTH_MERGER_WATCH_LABEL_SELECTOR", default_value = "")]
    pub watch_label_selector: String,

    /// Label (key=value) for the ConfigMap created when migrating an
    /// unmanaged aws-auth. Repeat the flag for several labels.
    #[arg(long, env = "AWS_AUTH_MERGER_AUTOCREATE_LABELS")]
    pub autocreate_labels: Vec<String>,

    /// Interval between forced merges, e.g. `5m` or `1h30m`.
    #[arg(
        long,
        env = "AWS_AUTH_MERGER_REFRESH_INTERVAL",
        default_value = "5m",
        value_parser = humantime::parse_duration
    )]
    pub refresh_interval: Duration,

    /// Kubeconfig file. When unset, in-cluster ServiceAccount credentials are used.
    #[arg(long, env = "AWS_AUTH_MERGER_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context. Only used together with --kubeconfig.
    #[arg(long, env = "AWS_AUTH_MERGER_CONTEXT")]
    pub context: Option<String>,

    /// Merge sources in name order instead of list order.
    #[arg(long, env = "AWS_AUTH_MERGER_SORT_SOURCES")]
    pub sort_sources: bool,
}

impl Cli {
    /// Controller settings derived from the flags.
    pub fn merger_config(&self) -> MergerConfig {
        MergerConfig {
            watch_namespace: self.watch_namespace.clone(),
            label_selector: self.watch_label_selector.clone(),
            autocreate_labels: parse_label_pairs(&self.autocreate_labels),
            refresh_interval: self.refresh_interval,
            sort_sources: self.sort_sources,
            ..MergerConfig::default()
        }
    }

    /// The kubeconfig path with a leading `~` expanded.
    pub fn kubeconfig_path(&self) -> Option<PathBuf> {
        self.kubeconfig.as_deref().map(expand_home)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
